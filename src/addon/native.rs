/*
 *  addon/native.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  Shared library backed addon modules
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

//! Addon modules backed by a real shared library
//!
//! [`NativeLoader`] opens the library with `libloading`, resolves the three
//! exported entry points and wraps them as an [`AddonModule`]. The entry
//! point table returned by `addon_create` becomes a [`NativeFunctions`]
//! which keeps the library mapped for as long as the host holds it.

use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use log::{Level, debug, error, info, log};
use parking_lot::Mutex;

use super::bridge::{
    AddonFunctions,
    AddonModule,
    HostContext,
    InstanceData,
    InstanceHandle,
    ModuleCreate,
    SavedSetting,
};
use super::fault::Fault;
use super::ffi::{
    ADDON_SETTING_KEY_SIZE,
    ADDON_SETTING_VALUE_SIZE,
    AddonEntryPoints,
    AddonFault,
    AddonGlobals,
    CreateFn,
    DestroyFn,
    GetTypeVersionFn,
    HostCallbacks,
    SYMBOL_CREATE,
    SYMBOL_DESTROY,
    SYMBOL_GET_TYPE_VERSION,
    extract_string,
};
use super::loader::{LoadError, ModuleLoader};
use super::settings::SettingValue;
use super::types::{AddonStatus, InstanceType};

/// Loads addons from shared libraries on disk
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl ModuleLoader for NativeLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn AddonModule>, LoadError> {
        info!("Loading addon library from: {}", path.display());

        // SAFETY: loading a library runs its initializers; addon libraries
        // are trusted to the extent that they were installed by the user
        let library = unsafe { Library::new(path) }.map_err(|e| LoadError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let get_type_version: GetTypeVersionFn = resolve(&library, path, SYMBOL_GET_TYPE_VERSION)?;
        let create_fn: CreateFn = resolve(&library, path, SYMBOL_CREATE)?;
        let destroy_fn: DestroyFn = resolve(&library, path, SYMBOL_DESTROY)?;

        Ok(Box::new(NativeModule {
            path: path.to_path_buf(),
            get_type_version,
            create_fn,
            destroy_fn,
            host: Mutex::new(None),
            library: Arc::new(library),
        }))
    }
}

fn resolve<T: Copy>(library: &Library, path: &Path, symbol: &[u8]) -> Result<T, LoadError> {
    // SAFETY: the symbol types are fixed by the addon ABI in ffi.rs
    unsafe { library.get::<T>(symbol) }
        .map(|sym| *sym)
        .map_err(|_| LoadError::MissingSymbol {
            path: path.to_path_buf(),
            symbol: String::from_utf8_lossy(symbol.strip_suffix(b"\0").unwrap_or(symbol)).into_owned(),
        })
}

/// Build a C string, dropping interior NULs
fn c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

fn c_path(path: &Path) -> CString {
    c_string(&path.to_string_lossy())
}

fn raised(fault: &AddonFault) -> Result<(), Fault> {
    match fault.to_fault() {
        Some(f) => Err(f),
        None => Ok(()),
    }
}

/// Strings the host callbacks hand out; `host_handle` points here
struct HostState {
    addon_id: String,
    addon_id_c: CString,
    addon_path: CString,
    user_path: CString,
    library_path: CString,
    temp_path: CString,
}

/// Host callback table plus the state it points at
///
/// Boxed so the addresses handed to the addon stay fixed; kept alive until
/// the addon is destroyed and every entry point table is dropped.
struct HostBinding {
    state: Box<HostState>,
    callbacks: Box<HostCallbacks>,
}

// SAFETY: HostState is immutable after construction and HostCallbacks only
// carries a pointer back into it, so sharing across threads is sound.
unsafe impl Send for HostBinding {}
unsafe impl Sync for HostBinding {}

impl HostBinding {
    fn new(host: &HostContext) -> Self {
        let state = Box::new(HostState {
            addon_id: host.addon_id.clone(),
            addon_id_c: c_string(&host.addon_id),
            addon_path: c_path(&host.addon_path),
            user_path: c_path(&host.user_path),
            library_path: c_path(&host.library_path),
            temp_path: c_path(&host.temp_path),
        });

        let callbacks = Box::new(HostCallbacks {
            host_handle: &*state as *const HostState as *mut c_void,
            log: Some(host_log),
            get_addon_path: Some(host_addon_path),
            get_user_path: Some(host_user_path),
            get_lib_path: Some(host_lib_path),
            get_temp_path: Some(host_temp_path),
            free_string: Some(host_free_string),
        });

        Self { state, callbacks }
    }
}

fn with_state<R>(host: *mut c_void, f: impl FnOnce(&HostState) -> R) -> Option<R> {
    if host.is_null() {
        return None;
    }
    // SAFETY: host_handle always points at the boxed HostState of a live
    // HostBinding
    let state = unsafe { &*(host as *const HostState) };
    Some(f(state))
}

extern "C" fn host_log(host: *mut c_void, level: c_int, message: *const c_char) {
    if message.is_null() {
        return;
    }
    // SAFETY: the addon passes a null-terminated string valid for the call
    let message = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    let level = match level {
        0 => Level::Debug,
        1 => Level::Info,
        2 => Level::Warn,
        _ => Level::Error,
    };

    with_state(host, |state| {
        let target = format!("addon::{}", state.addon_id);
        log!(target: target.as_str(), level, "{}", message);
    });
}

extern "C" fn host_addon_path(host: *mut c_void) -> *mut c_char {
    with_state(host, |s| s.addon_path.clone().into_raw()).unwrap_or(std::ptr::null_mut())
}

extern "C" fn host_user_path(host: *mut c_void) -> *mut c_char {
    with_state(host, |s| s.user_path.clone().into_raw()).unwrap_or(std::ptr::null_mut())
}

extern "C" fn host_lib_path(host: *mut c_void) -> *mut c_char {
    with_state(host, |s| s.library_path.clone().into_raw()).unwrap_or(std::ptr::null_mut())
}

extern "C" fn host_temp_path(host: *mut c_void) -> *mut c_char {
    with_state(host, |s| s.temp_path.clone().into_raw()).unwrap_or(std::ptr::null_mut())
}

extern "C" fn host_free_string(_host: *mut c_void, string: *mut c_char) {
    if !string.is_null() {
        // SAFETY: every string handed out by the path callbacks came from
        // CString::into_raw
        drop(unsafe { CString::from_raw(string) });
    }
}

/// An addon library with its entry points resolved
pub struct NativeModule {
    path: PathBuf,
    get_type_version: GetTypeVersionFn,
    create_fn: CreateFn,
    destroy_fn: DestroyFn,
    host: Mutex<Option<Arc<HostBinding>>>,
    library: Arc<Library>,
}

impl AddonModule for NativeModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn type_version(&self, instance_type: InstanceType) -> Result<Option<String>, Fault> {
        let ptr = (self.get_type_version)(instance_type.to_raw());
        if ptr.is_null() {
            return Ok(None);
        }
        // SAFETY: the addon returns a static null-terminated string
        let version = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        Ok(Some(version))
    }

    fn create(&self, host: &HostContext) -> Result<ModuleCreate, Fault> {
        let binding = Arc::new(HostBinding::new(host));
        let mut globals = AddonGlobals {
            addon_id: binding.state.addon_id_c.as_ptr(),
            to_host: &*binding.callbacks,
            to_addon: AddonEntryPoints::empty(),
        };
        let mut fault = AddonFault::none();

        let raw = (self.create_fn)(&mut globals, &mut fault);
        *self.host.lock() = Some(Arc::clone(&binding));
        raised(&fault)?;

        let status = AddonStatus::from_raw(raw);
        let entry = globals.to_addon;
        debug!("{} create returned {} (handle {:p})", host.addon_id, status, entry.addon_handle);

        let provided = entry.get_status.is_some()
            || entry.create_instance.is_some()
            || entry.destroy_instance.is_some()
            || entry.set_setting_string.is_some()
            || entry.set_setting_int.is_some()
            || entry.set_setting_bool.is_some()
            || entry.set_setting_float.is_some()
            || entry.get_saved_setting.is_some();

        let functions = provided.then(|| {
            Arc::new(NativeFunctions {
                addon_id: host.addon_id.clone(),
                entry,
                _host: binding,
                _library: Arc::clone(&self.library),
            }) as Arc<dyn AddonFunctions>
        });

        Ok(ModuleCreate { status, functions })
    }

    fn destroy(&self) -> Result<(), Fault> {
        let mut fault = AddonFault::none();
        (self.destroy_fn)(&mut fault);
        self.host.lock().take();
        raised(&fault)
    }
}

/// Entry point table filled in by `addon_create`
pub struct NativeFunctions {
    addon_id: String,
    entry: AddonEntryPoints,
    _host: Arc<HostBinding>,
    _library: Arc<Library>,
}

// SAFETY: the addon handle is only passed back to the addon's own entry
// points, which must tolerate calls from any host thread.
unsafe impl Send for NativeFunctions {}
unsafe impl Sync for NativeFunctions {}

impl NativeFunctions {
    fn missing(&self, name: &str) {
        error!("{} does not provide {}", self.addon_id, name);
    }

    fn setter_missing(&self, name: &str) -> Result<AddonStatus, Fault> {
        self.missing(name);
        Ok(AddonStatus::NotImplemented)
    }
}

impl AddonFunctions for NativeFunctions {
    fn get_status(&self) -> Result<AddonStatus, Fault> {
        let Some(get_status) = self.entry.get_status else {
            self.missing("get_status");
            return Ok(AddonStatus::NotImplemented);
        };
        let mut fault = AddonFault::none();
        let raw = get_status(self.entry.addon_handle, &mut fault);
        raised(&fault)?;
        Ok(AddonStatus::from_raw(raw))
    }

    fn create_instance(
        &self,
        instance_type: InstanceType,
        instance_id: &str,
        data: InstanceData,
    ) -> Result<(AddonStatus, Option<InstanceHandle>), Fault> {
        let Some(create_instance) = self.entry.create_instance else {
            self.missing("create_instance");
            return Ok((AddonStatus::NotImplemented, None));
        };

        let id = c_string(instance_id);
        let mut instance: *mut c_void = std::ptr::null_mut();
        let mut fault = AddonFault::none();
        let raw = create_instance(
            self.entry.addon_handle,
            instance_type.to_raw(),
            id.as_ptr(),
            data.0,
            &mut instance,
            &mut fault,
        );
        raised(&fault)?;

        let status = AddonStatus::from_raw(raw);
        if instance.is_null() {
            if status.is_ok() {
                error!("{} returned no {} instance for {}", self.addon_id, instance_type, instance_id);
                return Ok((AddonStatus::PermanentFailure, None));
            }
            return Ok((status, None));
        }
        Ok((status, Some(InstanceHandle::new(instance, instance_type))))
    }

    fn destroy_instance(&self, instance: InstanceHandle) -> Result<(), Fault> {
        let Some(destroy_instance) = self.entry.destroy_instance else {
            self.missing("destroy_instance");
            return Ok(());
        };
        let mut fault = AddonFault::none();
        destroy_instance(
            self.entry.addon_handle,
            instance.instance_type().to_raw(),
            instance.as_ptr(),
            &mut fault,
        );
        raised(&fault)
    }

    fn set_setting(&self, id: &str, value: &SettingValue) -> Result<AddonStatus, Fault> {
        let handle = self.entry.addon_handle;
        let c_id = c_string(id);
        let mut fault = AddonFault::none();

        let raw = match value {
            SettingValue::String(s) => match self.entry.set_setting_string {
                Some(f) => f(handle, c_id.as_ptr(), c_string(s).as_ptr(), &mut fault),
                None => return self.setter_missing("set_setting_string"),
            },
            SettingValue::Int(v) => match self.entry.set_setting_int {
                Some(f) => f(handle, c_id.as_ptr(), *v, &mut fault),
                None => return self.setter_missing("set_setting_int"),
            },
            SettingValue::Bool(v) => match self.entry.set_setting_bool {
                Some(f) => f(handle, c_id.as_ptr(), *v, &mut fault),
                None => return self.setter_missing("set_setting_bool"),
            },
            SettingValue::Float(v) => match self.entry.set_setting_float {
                Some(f) => f(handle, c_id.as_ptr(), *v, &mut fault),
                None => return self.setter_missing("set_setting_float"),
            },
        };
        raised(&fault)?;
        Ok(AddonStatus::from_raw(raw))
    }

    fn saved_setting(&self, index: usize) -> Result<SavedSetting, Fault> {
        let Some(get_saved_setting) = self.entry.get_saved_setting else {
            self.missing("get_saved_setting");
            return Ok(SavedSetting {
                status: AddonStatus::Unknown,
                key: String::new(),
                value: String::new(),
            });
        };

        let mut key: [c_char; ADDON_SETTING_KEY_SIZE] = [0; ADDON_SETTING_KEY_SIZE];
        let mut value: [c_char; ADDON_SETTING_VALUE_SIZE] = [0; ADDON_SETTING_VALUE_SIZE];
        let mut fault = AddonFault::none();
        let raw = get_saved_setting(
            self.entry.addon_handle,
            index.min(c_int::MAX as usize) as c_int,
            key.as_mut_ptr(),
            key.len(),
            value.as_mut_ptr(),
            value.len(),
            &mut fault,
        );
        raised(&fault)?;

        Ok(SavedSetting {
            status: AddonStatus::from_raw(raw),
            key: extract_string(&key),
            value: extract_string(&value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_open_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("libnothing.so");
        let err = NativeLoader.load(&path).err().unwrap();
        assert!(matches!(err, LoadError::Open { .. }));
    }

    #[test]
    fn test_garbage_library_is_open_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("libgarbage.so");
        std::fs::write(&path, b"definitely not ELF").unwrap();
        assert!(matches!(NativeLoader.load(&path), Err(LoadError::Open { .. })));
    }

    #[test]
    fn test_host_callbacks() {
        let ctx = HostContext {
            addon_id: "test.addon".into(),
            addon_name: "Test".into(),
            addon_path: PathBuf::from("/opt/addons/test.addon"),
            user_path: PathBuf::from("/home/u/.addonhost/test.addon"),
            library_path: PathBuf::from("/opt/addons/test.addon/libtest.so"),
            temp_path: PathBuf::from("/tmp/addonhost"),
        };
        let binding = HostBinding::new(&ctx);
        let cb = *binding.callbacks;

        let get = cb.get_user_path.unwrap();
        let raw = get(cb.host_handle);
        assert!(!raw.is_null());
        let path = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
        assert_eq!(path, "/home/u/.addonhost/test.addon");
        (cb.free_string.unwrap())(cb.host_handle, raw);

        let msg = c_string("hello from the addon");
        (cb.log.unwrap())(cb.host_handle, 1, msg.as_ptr());
        (cb.log.unwrap())(cb.host_handle, 7, std::ptr::null());

        assert!(host_temp_path(std::ptr::null_mut()).is_null());
    }

    #[test]
    fn test_c_string_strips_nul() {
        assert_eq!(c_string("a\0b").to_str().unwrap(), "ab");
    }
}
