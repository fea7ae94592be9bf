/*
 *  lib.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
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

//! AddonHost library
//!
//! Split out of the binary so integration tests and embedding hosts can
//! drive the addon runtime directly. The `addonhost` binary is a thin CLI
//! over [`addon::AddonHost`].

pub mod addon;
pub mod config;

pub use addon::{
    AddonDescriptor,
    AddonHost,
    AddonRuntime,
    AddonStatus,
    HostServices,
    InstanceType,
};
