/*
 *  addon/descriptor.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  Static description of an installed addon
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

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::InstanceType;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Installed addon metadata
///
/// Immutable once loaded; the runtime only ever borrows it through an `Arc`.
///
/// ```yaml
/// id: audiodecoder.tone
/// name: Tone Generator
/// author: Stuart Hunter
/// path: /usr/share/addonhost/addons/audiodecoder.tone
/// library: libaddonhost_sample.so
/// provides: [audio_decoder]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author: String,

    /// Install directory; the library is looked for here first
    #[serde(default)]
    pub path: PathBuf,

    /// Per-user data directory for this addon
    #[serde(default)]
    pub profile_path: PathBuf,

    /// Library file name, e.g. `libaddonhost_sample.so`
    pub library: String,

    #[serde(default)]
    pub provides: Vec<InstanceType>,
}

impl AddonDescriptor {
    pub fn new(id: impl Into<String>, library: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            author: String::new(),
            path: PathBuf::new(),
            profile_path: PathBuf::new(),
            library: library.into(),
            provides: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_profile_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.profile_path = path.into();
        self
    }

    pub fn with_provides(mut self, provides: &[InstanceType]) -> Self {
        self.provides = provides.to_vec();
        self
    }

    /// Read and validate an `addon.yaml`
    ///
    /// A relative or empty `path` is resolved against the file's directory.
    pub fn from_yaml_file(path: &Path) -> Result<Self, DescriptorError> {
        let s = fs::read_to_string(path)?;
        let mut desc: AddonDescriptor = serde_yaml::from_str(&s)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if desc.path.as_os_str().is_empty() {
            desc.path = base.to_path_buf();
        } else if desc.path.is_relative() {
            desc.path = base.join(&desc.path);
        }
        if desc.name.is_empty() {
            desc.name = desc.id.clone();
        }

        desc.validate()?;
        Ok(desc)
    }

    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.id.trim().is_empty() {
            return Err(DescriptorError::Validation("addon id must not be empty".into()));
        }
        if self.id.contains(['/', '\\']) {
            return Err(DescriptorError::Validation(format!(
                "addon id must not contain path separators: {}",
                self.id
            )));
        }
        if self.library.trim().is_empty() {
            return Err(DescriptorError::Validation(format!(
                "addon {} does not name a library",
                self.id
            )));
        }
        Ok(())
    }

    pub fn provides(&self, instance_type: InstanceType) -> bool {
        self.provides.contains(&instance_type)
    }
}
