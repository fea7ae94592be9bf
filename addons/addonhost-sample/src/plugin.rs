/*
 *  AddonHost Sample Addon - Entry Points
 *
 *  Sine tone "decoder" exercising every entry point of the addon interface
 */

use std::collections::BTreeMap;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::{Mutex, MutexGuard};

use crate::ffi::*;

/// Settings whose change only takes effect after a restart
const RESTART_PREFIX: &str = "restart.";

/// Setting id that makes the addon panic, used to exercise fault containment
const PANIC_SETTING: &str = "debug.panic";

struct HostLink(HostCallbacks);

// SAFETY: the host keeps the callback table alive until addon_destroy
unsafe impl Send for HostLink {}

struct SampleAddon {
    addon_id: String,
    host: Option<HostLink>,
    settings: BTreeMap<String, String>,
    live_instances: usize,
}

impl SampleAddon {
    fn log(&self, level: c_int, message: &str) {
        let Some(HostLink(cb)) = &self.host else {
            return;
        };
        if let (Some(log), Ok(line)) = (cb.log, CString::new(message)) {
            log(cb.host_handle, level, line.as_ptr());
        }
    }

    fn store(&mut self, id: &str, value: String) -> c_int {
        if id == PANIC_SETTING {
            panic!("asked to fail by {}", PANIC_SETTING);
        }
        self.log(0, &format!("{} = {}", id, value));
        self.settings.insert(id.to_string(), value);
        if id.starts_with(RESTART_PREFIX) {
            STATUS_NEED_RESTART
        } else {
            STATUS_OK
        }
    }
}

static ADDON: Mutex<Option<SampleAddon>> = Mutex::new(None);

fn addon() -> MutexGuard<'static, Option<SampleAddon>> {
    ADDON.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One tone generator per decoder instance
pub struct ToneDecoder {
    pub id: String,
    pub frequency: f32,
    pub sample_rate: u32,
    phase: f32,
}

impl ToneDecoder {
    fn new(id: String, frequency: f32) -> Self {
        Self {
            id,
            frequency,
            sample_rate: 48_000,
            phase: 0.0,
        }
    }

    /// Fill `out` with mono samples
    pub fn render(&mut self, out: &mut [f32]) {
        let step = self.frequency / self.sample_rate as f32;
        for sample in out.iter_mut() {
            *sample = (self.phase * std::f32::consts::TAU).sin();
            self.phase = (self.phase + step).fract();
        }
    }
}

macro_rules! catch_panic {
    ($fault:expr, $failed:expr, $code:block) => {
        match catch_unwind(AssertUnwindSafe(|| $code)) {
            Ok(result) => result,
            Err(panic_info) => {
                let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    format!("Addon panic: {}", s)
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    format!("Addon panic: {}", s)
                } else {
                    "Addon panic: unknown error".to_string()
                };
                if !$fault.is_null() {
                    unsafe {
                        *$fault = AddonFault::message(&message);
                    }
                }
                $failed
            }
        }
    };
}

fn c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

#[no_mangle]
pub extern "C-unwind" fn addon_get_type_version(instance_type: c_int) -> *const c_char {
    match instance_type {
        TYPE_GLOBAL_MAIN => GLOBAL_MAIN_VERSION.as_ptr() as *const c_char,
        TYPE_AUDIO_DECODER => AUDIO_DECODER_VERSION.as_ptr() as *const c_char,
        _ => ptr::null(),
    }
}

#[no_mangle]
pub extern "C-unwind" fn addon_create(globals: *mut AddonGlobals, fault: *mut AddonFault) -> c_int {
    catch_panic!(fault, STATUS_PERMANENT_FAILURE, {
        if globals.is_null() {
            if !fault.is_null() {
                unsafe {
                    *fault = AddonFault::status(STATUS_PERMANENT_FAILURE);
                }
            }
            return STATUS_PERMANENT_FAILURE;
        }
        let globals = unsafe { &mut *globals };
        let addon_id = c_str(globals.addon_id).unwrap_or_default();
        let host = (!globals.to_host.is_null()).then(|| HostLink(unsafe { *globals.to_host }));

        let mut settings = BTreeMap::new();
        settings.insert("tone.frequency".to_string(), "440".to_string());
        settings.insert("tone.waveform".to_string(), "sine".to_string());

        let sample = SampleAddon {
            addon_id,
            host,
            settings,
            live_instances: 0,
        };
        sample.log(1, &format!("{} created", sample.addon_id));
        *addon() = Some(sample);

        globals.to_addon = AddonEntryPoints {
            addon_handle: ptr::null_mut(),
            get_status: Some(get_status),
            create_instance: Some(create_instance),
            destroy_instance: Some(destroy_instance),
            set_setting_string: Some(set_setting_string),
            set_setting_int: Some(set_setting_int),
            set_setting_bool: Some(set_setting_bool),
            set_setting_float: Some(set_setting_float),
            get_saved_setting: Some(get_saved_setting),
        };

        // hand the built-in defaults to the host before taking its settings
        STATUS_NEED_SAVED_SETTINGS
    })
}

#[no_mangle]
pub extern "C-unwind" fn addon_destroy(_fault: *mut AddonFault) {
    if let Some(sample) = addon().take() {
        if sample.live_instances > 0 {
            sample.log(2, &format!("{} destroyed with {} live decoders", sample.addon_id, sample.live_instances));
        } else {
            sample.log(1, &format!("{} destroyed", sample.addon_id));
        }
    }
}

extern "C-unwind" fn get_status(_addon: *mut c_void, fault: *mut AddonFault) -> c_int {
    catch_panic!(fault, STATUS_UNKNOWN, {
        match addon().as_ref() {
            Some(_) => STATUS_OK,
            None => STATUS_UNKNOWN,
        }
    })
}

extern "C-unwind" fn create_instance(
    _addon: *mut c_void,
    instance_type: c_int,
    instance_id: *const c_char,
    _instance_data: *mut c_void,
    out_instance: *mut *mut c_void,
    fault: *mut AddonFault,
) -> c_int {
    catch_panic!(fault, STATUS_PERMANENT_FAILURE, {
        if instance_type != TYPE_AUDIO_DECODER {
            return STATUS_NOT_IMPLEMENTED;
        }
        if out_instance.is_null() {
            return STATUS_PERMANENT_FAILURE;
        }
        let mut guard = addon();
        let Some(sample) = guard.as_mut() else {
            return STATUS_UNKNOWN;
        };

        let frequency = sample
            .settings
            .get("tone.frequency")
            .and_then(|f| f.parse::<f32>().ok())
            .unwrap_or(440.0);
        let decoder = ToneDecoder::new(c_str(instance_id).unwrap_or_default(), frequency);
        sample.log(0, &format!("decoder {} at {} Hz", decoder.id, decoder.frequency));
        sample.live_instances += 1;

        unsafe {
            *out_instance = Box::into_raw(Box::new(decoder)) as *mut c_void;
        }
        STATUS_OK
    })
}

extern "C-unwind" fn destroy_instance(
    _addon: *mut c_void,
    _instance_type: c_int,
    instance: *mut c_void,
    fault: *mut AddonFault,
) {
    catch_panic!(fault, (), {
        if instance.is_null() {
            return;
        }
        let decoder = unsafe { Box::from_raw(instance as *mut ToneDecoder) };
        if let Some(sample) = addon().as_mut() {
            sample.live_instances = sample.live_instances.saturating_sub(1);
            sample.log(0, &format!("decoder {} closed", decoder.id));
        }
    })
}

fn set_setting(id: *const c_char, value: String) -> c_int {
    let Some(id) = c_str(id) else {
        return STATUS_UNKNOWN;
    };
    match addon().as_mut() {
        Some(sample) => sample.store(&id, value),
        None => STATUS_UNKNOWN,
    }
}

extern "C-unwind" fn set_setting_string(
    _addon: *mut c_void,
    id: *const c_char,
    value: *const c_char,
    fault: *mut AddonFault,
) -> c_int {
    catch_panic!(fault, STATUS_UNKNOWN, { set_setting(id, c_str(value).unwrap_or_default()) })
}

extern "C-unwind" fn set_setting_int(_addon: *mut c_void, id: *const c_char, value: c_int, fault: *mut AddonFault) -> c_int {
    catch_panic!(fault, STATUS_UNKNOWN, { set_setting(id, value.to_string()) })
}

extern "C-unwind" fn set_setting_bool(_addon: *mut c_void, id: *const c_char, value: bool, fault: *mut AddonFault) -> c_int {
    catch_panic!(fault, STATUS_UNKNOWN, { set_setting(id, value.to_string()) })
}

extern "C-unwind" fn set_setting_float(_addon: *mut c_void, id: *const c_char, value: f32, fault: *mut AddonFault) -> c_int {
    catch_panic!(fault, STATUS_UNKNOWN, { set_setting(id, value.to_string()) })
}

extern "C-unwind" fn get_saved_setting(
    _addon: *mut c_void,
    index: c_int,
    key: *mut c_char,
    key_len: usize,
    value: *mut c_char,
    value_len: usize,
    fault: *mut AddonFault,
) -> c_int {
    catch_panic!(fault, STATUS_UNKNOWN, {
        let guard = addon();
        let Some(sample) = guard.as_ref() else {
            return STATUS_UNKNOWN;
        };
        let entry = usize::try_from(index)
            .ok()
            .and_then(|i| sample.settings.iter().nth(i));
        match entry {
            Some((k, v)) => {
                copy_str_to_buffer(k, key, key_len);
                copy_str_to_buffer(v, value, value_len);
            }
            None => {
                copy_str_to_buffer(SAVED_SETTINGS_END, key, key_len);
                copy_str_to_buffer("", value, value_len);
            }
        }
        STATUS_OK
    })
}
