/*
 *  addon/ffi.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  C ABI types shared between the host and addon libraries
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

//! FFI types for the addon interface
//!
//! Everything here is `#[repr(C)]` and forms the stable ABI between the
//! host and addon libraries. Addon entry points are declared
//! `extern "C-unwind"` so a panic raised inside the addon unwinds back into
//! the host, where it is caught and contained instead of aborting.
//!
//! An addon library exports three symbols:
//!
//! - `addon_get_type_version(type) -> *const c_char`
//! - `addon_create(globals, fault) -> status`
//! - `addon_destroy(fault)`
//!
//! `addon_create` receives the host callback table and fills in the addon
//! entry point table inside [`AddonGlobals`].

use std::ffi::c_void;
use std::os::raw::{c_char, c_int};

use super::fault::Fault;

/// Maximum length for fault messages
pub const ADDON_FAULT_MESSAGE_SIZE: usize = 256;

/// Buffer sizes for one exported saved setting
pub const ADDON_SETTING_KEY_SIZE: usize = 64;
pub const ADDON_SETTING_VALUE_SIZE: usize = 1024;

/// Key the addon returns once every saved setting has been exported
pub const SAVED_SETTINGS_END: &str = "###End";

pub const SYMBOL_GET_TYPE_VERSION: &[u8] = b"addon_get_type_version\0";
pub const SYMBOL_CREATE: &[u8] = b"addon_create\0";
pub const SYMBOL_DESTROY: &[u8] = b"addon_destroy\0";

pub const FAULT_NONE: c_int = 0;
pub const FAULT_STATUS: c_int = 1;
pub const FAULT_MESSAGE: c_int = 2;
pub const FAULT_UNKNOWN: c_int = 3;

/// Fault raised by the addon, written through an out pointer
#[repr(C)]
pub struct AddonFault {
    /// `FAULT_NONE`, `FAULT_STATUS`, `FAULT_MESSAGE` or `FAULT_UNKNOWN`
    pub kind: c_int,

    /// Status code for `FAULT_STATUS`
    pub code: c_int,

    /// Null-terminated message for `FAULT_MESSAGE`
    pub message: [c_char; ADDON_FAULT_MESSAGE_SIZE],
}

impl AddonFault {
    pub fn none() -> Self {
        Self {
            kind: FAULT_NONE,
            code: 0,
            message: [0; ADDON_FAULT_MESSAGE_SIZE],
        }
    }

    pub fn is_raised(&self) -> bool {
        self.kind != FAULT_NONE
    }

    /// Extract the message as a Rust string
    pub fn message_str(&self) -> String {
        extract_string(&self.message)
    }

    /// Host-side view of a raised fault, `None` when nothing was raised
    pub fn to_fault(&self) -> Option<Fault> {
        match self.kind {
            FAULT_NONE => None,
            FAULT_STATUS => Some(Fault::Status(self.code)),
            FAULT_MESSAGE => Some(Fault::Message(self.message_str())),
            _ => Some(Fault::Unknown),
        }
    }
}

impl Default for AddonFault {
    fn default() -> Self {
        Self::none()
    }
}

pub type LogFn = extern "C" fn(host: *mut c_void, level: c_int, message: *const c_char);
pub type PathFn = extern "C" fn(host: *mut c_void) -> *mut c_char;
pub type FreeStringFn = extern "C" fn(host: *mut c_void, string: *mut c_char);

/// Host to addon table, valid until `addon_destroy` returns
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HostCallbacks {
    /// Opaque host pointer passed back on every callback
    pub host_handle: *mut c_void,

    /// Log a line; level 0 debug, 1 info, 2 warning, 3 error
    pub log: Option<LogFn>,

    /// Path getters return host-allocated strings released by `free_string`
    pub get_addon_path: Option<PathFn>,
    pub get_user_path: Option<PathFn>,
    pub get_lib_path: Option<PathFn>,
    pub get_temp_path: Option<PathFn>,

    pub free_string: Option<FreeStringFn>,
}

pub type GetStatusFn = extern "C-unwind" fn(addon: *mut c_void, fault: *mut AddonFault) -> c_int;

pub type CreateInstanceFn = extern "C-unwind" fn(
    addon: *mut c_void,
    instance_type: c_int,
    instance_id: *const c_char,
    instance_data: *mut c_void,
    out_instance: *mut *mut c_void,
    fault: *mut AddonFault,
) -> c_int;

pub type DestroyInstanceFn = extern "C-unwind" fn(
    addon: *mut c_void,
    instance_type: c_int,
    instance: *mut c_void,
    fault: *mut AddonFault,
);

pub type SetSettingStringFn = extern "C-unwind" fn(
    addon: *mut c_void,
    id: *const c_char,
    value: *const c_char,
    fault: *mut AddonFault,
) -> c_int;

pub type SetSettingIntFn = extern "C-unwind" fn(
    addon: *mut c_void,
    id: *const c_char,
    value: c_int,
    fault: *mut AddonFault,
) -> c_int;

pub type SetSettingBoolFn = extern "C-unwind" fn(
    addon: *mut c_void,
    id: *const c_char,
    value: bool,
    fault: *mut AddonFault,
) -> c_int;

pub type SetSettingFloatFn = extern "C-unwind" fn(
    addon: *mut c_void,
    id: *const c_char,
    value: f32,
    fault: *mut AddonFault,
) -> c_int;

/// Export one saved setting by index into host buffers
pub type GetSavedSettingFn = extern "C-unwind" fn(
    addon: *mut c_void,
    index: c_int,
    key: *mut c_char,
    key_len: usize,
    value: *mut c_char,
    value_len: usize,
    fault: *mut AddonFault,
) -> c_int;

/// Addon to host table, filled in by `addon_create`
///
/// Entries the addon does not implement stay `None`; the host treats a
/// missing entry as a contract violation for that call only.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct AddonEntryPoints {
    pub addon_handle: *mut c_void,
    pub get_status: Option<GetStatusFn>,
    pub create_instance: Option<CreateInstanceFn>,
    pub destroy_instance: Option<DestroyInstanceFn>,
    pub set_setting_string: Option<SetSettingStringFn>,
    pub set_setting_int: Option<SetSettingIntFn>,
    pub set_setting_bool: Option<SetSettingBoolFn>,
    pub set_setting_float: Option<SetSettingFloatFn>,
    pub get_saved_setting: Option<GetSavedSettingFn>,
}

impl AddonEntryPoints {
    pub fn empty() -> Self {
        Self {
            addon_handle: std::ptr::null_mut(),
            get_status: None,
            create_instance: None,
            destroy_instance: None,
            set_setting_string: None,
            set_setting_int: None,
            set_setting_bool: None,
            set_setting_float: None,
            get_saved_setting: None,
        }
    }
}

/// Exchanged with `addon_create`
#[repr(C)]
pub struct AddonGlobals {
    /// Null-terminated addon id, owned by the host
    pub addon_id: *const c_char,
    pub to_host: *const HostCallbacks,
    pub to_addon: AddonEntryPoints,
}

pub type GetTypeVersionFn = extern "C-unwind" fn(instance_type: c_int) -> *const c_char;
pub type CreateFn = extern "C-unwind" fn(globals: *mut AddonGlobals, fault: *mut AddonFault) -> c_int;
pub type DestroyFn = extern "C-unwind" fn(fault: *mut AddonFault);

/// Extract a null-terminated string from a C buffer
pub fn extract_string(buffer: &[c_char]) -> String {
    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    let bytes: Vec<u8> = buffer[..len].iter().map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
