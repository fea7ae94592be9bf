/*
 *  AddonHost Sample Addon - FFI Types
 *
 *  C ABI types matching the AddonHost addon interface
 *  These types must match exactly with the host's FFI types
 */

use std::ffi::c_void;
use std::os::raw::{c_char, c_int};

/// Interface versions this addon was built against
pub const GLOBAL_MAIN_VERSION: &[u8] = b"2.0.0\0";
pub const AUDIO_DECODER_VERSION: &[u8] = b"3.0.0\0";

/// Maximum length for fault messages
pub const ADDON_FAULT_MESSAGE_SIZE: usize = 256;

pub const SAVED_SETTINGS_END: &str = "###End";

pub const FAULT_NONE: c_int = 0;
pub const FAULT_STATUS: c_int = 1;
pub const FAULT_MESSAGE: c_int = 2;

/// Status codes
pub const STATUS_OK: c_int = 0;
pub const STATUS_NEED_RESTART: c_int = 2;
pub const STATUS_UNKNOWN: c_int = 4;
pub const STATUS_PERMANENT_FAILURE: c_int = 5;
pub const STATUS_NOT_IMPLEMENTED: c_int = 6;
pub const STATUS_NEED_SAVED_SETTINGS: c_int = 7;

/// Instance type codes
pub const TYPE_GLOBAL_MAIN: c_int = 0;
pub const TYPE_AUDIO_DECODER: c_int = 102;

#[repr(C)]
pub struct AddonFault {
    pub kind: c_int,
    pub code: c_int,
    pub message: [c_char; ADDON_FAULT_MESSAGE_SIZE],
}

impl AddonFault {
    /// Fault carrying a message, truncated to fit
    pub fn message(message: &str) -> Self {
        let mut fault = Self {
            kind: FAULT_MESSAGE,
            code: 0,
            message: [0; ADDON_FAULT_MESSAGE_SIZE],
        };
        copy_str_to_buffer(message, fault.message.as_mut_ptr(), ADDON_FAULT_MESSAGE_SIZE);
        fault
    }

    pub fn status(code: c_int) -> Self {
        Self {
            kind: FAULT_STATUS,
            code,
            message: [0; ADDON_FAULT_MESSAGE_SIZE],
        }
    }
}

pub type LogFn = extern "C" fn(host: *mut c_void, level: c_int, message: *const c_char);
pub type PathFn = extern "C" fn(host: *mut c_void) -> *mut c_char;
pub type FreeStringFn = extern "C" fn(host: *mut c_void, string: *mut c_char);

#[repr(C)]
#[derive(Clone, Copy)]
pub struct HostCallbacks {
    pub host_handle: *mut c_void,
    pub log: Option<LogFn>,
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
pub type SetSettingIntFn =
    extern "C-unwind" fn(addon: *mut c_void, id: *const c_char, value: c_int, fault: *mut AddonFault) -> c_int;
pub type SetSettingBoolFn =
    extern "C-unwind" fn(addon: *mut c_void, id: *const c_char, value: bool, fault: *mut AddonFault) -> c_int;
pub type SetSettingFloatFn =
    extern "C-unwind" fn(addon: *mut c_void, id: *const c_char, value: f32, fault: *mut AddonFault) -> c_int;
pub type GetSavedSettingFn = extern "C-unwind" fn(
    addon: *mut c_void,
    index: c_int,
    key: *mut c_char,
    key_len: usize,
    value: *mut c_char,
    value_len: usize,
    fault: *mut AddonFault,
) -> c_int;

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

#[repr(C)]
pub struct AddonGlobals {
    pub addon_id: *const c_char,
    pub to_host: *const HostCallbacks,
    pub to_addon: AddonEntryPoints,
}

/// Copy a string into a C buffer, always null-terminated
pub fn copy_str_to_buffer(s: &str, buffer: *mut c_char, size: usize) {
    if buffer.is_null() || size == 0 {
        return;
    }
    let bytes = s.as_bytes();
    let len = bytes.len().min(size - 1);
    unsafe {
        for (i, &byte) in bytes.iter().take(len).enumerate() {
            *buffer.add(i) = byte as c_char;
        }
        *buffer.add(len) = 0;
    }
}
