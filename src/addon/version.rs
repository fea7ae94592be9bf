/*
 *  addon/version.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  Interface version gate
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

//! Interface version gate
//!
//! The host and the addon must agree exactly on the version of every
//! interface group in use. Versions are compared structurally, so `"2.0"`
//! and `"2.0.0"` are the same version, but there is no range matching.

use semver::Version;
use thiserror::Error;

use super::types::{InstanceType, REQUIRED_ON_ALL_TYPES};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("addon does not report a version for {instance_type}")]
    Missing { instance_type: InstanceType },

    #[error("addon reports unparsable version \"{reported}\" for {instance_type}")]
    Unparsable {
        instance_type: InstanceType,
        reported: String,
    },

    #[error("{instance_type} version mismatch: host {host}, addon {reported}")]
    Mismatch {
        instance_type: InstanceType,
        host: String,
        reported: String,
    },
}

impl VersionError {
    pub fn instance_type(&self) -> InstanceType {
        match self {
            VersionError::Missing { instance_type }
            | VersionError::Unparsable { instance_type, .. }
            | VersionError::Mismatch { instance_type, .. } => *instance_type,
        }
    }
}

/// Parse `major[.minor[.patch]]`, padding missing components with zero
pub fn parse_api_version(raw: &str) -> Option<Version> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let parts = raw.split('.').count();
    let padded = match parts {
        1 => format!("{}.0.0", raw),
        2 => format!("{}.0", raw),
        _ => raw.to_string(),
    };

    Version::parse(&padded).ok()
}

/// Compare the addon-reported version for one group with the host's
pub fn check(instance_type: InstanceType, reported: Option<&str>) -> Result<(), VersionError> {
    let reported = reported.ok_or(VersionError::Missing { instance_type })?;
    let host_raw = instance_type.host_version();

    let addon = parse_api_version(reported).ok_or_else(|| VersionError::Unparsable {
        instance_type,
        reported: reported.to_string(),
    })?;

    match parse_api_version(host_raw) {
        Some(host) if host == addon => Ok(()),
        _ => Err(VersionError::Mismatch {
            instance_type,
            host: host_raw.to_string(),
            reported: reported.to_string(),
        }),
    }
}

/// Groups to check at `create`: every always-required group plus the
/// requested one, without duplicates
pub fn gate_types(requested: InstanceType) -> Vec<InstanceType> {
    let mut types = REQUIRED_ON_ALL_TYPES.to_vec();
    if !types.contains(&requested) {
        types.push(requested);
    }
    types
}
