/*
 *  AddonHost Sample Addon
 *
 *  A dynamic addon for the AddonHost process that provides a sine tone
 *  audio decoder via the addon interface.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 */

//! # AddonHost Sample Tone Decoder
//!
//! Reference addon implementing every entry point of the host interface.
//!
//! ## Features
//!
//! - Reports interface versions for `global_main` and `audio_decoder`
//! - Exports its built-in defaults as saved settings on first create
//! - Settings under `restart.` report that a restart is required
//! - `debug.panic` panics inside the addon, for fault containment testing
//!
//! ## Usage
//!
//! ```sh
//! cargo build -p addonhost-sample
//! addonhost --addon addons/addonhost-sample/addon.yaml \
//!     --extra-library-dir target/debug \
//!     --instance-type audio_decoder --transfer-settings
//! ```

pub mod ffi;
mod plugin;

pub use plugin::{addon_create, addon_destroy, addon_get_type_version, ToneDecoder};
