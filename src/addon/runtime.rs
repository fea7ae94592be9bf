/*
 *  addon/runtime.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  Per-addon lifecycle and instance registry
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

//! Addon runtime handle
//!
//! One [`AddonRuntime`] owns one loaded library and every instance created
//! inside it. All lifecycle operations serialize on a per-runtime mutex.
//! Steady-state calls clone the active function table under the lock and
//! run without it, so a slow addon call never blocks unrelated callers.
//!
//! Any fault raised by addon code trips the bridge. During normal use the
//! runtime is then torn down, the addon is disabled in the catalog and the
//! user is told which addon failed. Faults raised during teardown only trip
//! the bridge.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use super::bridge::{AddonFunctions, Bridge, BridgeState, HostContext, InstanceData, InstanceHandle, ModuleCreate};
use super::descriptor::AddonDescriptor;
use super::fault::{self, CallError, CallPhase, Fault};
use super::ffi::SAVED_SETTINGS_END;
use super::loader::{self, LoadError, LoadedModule, ModuleOrigin};
use super::services::{HostServices, MessageKind, UserMessage};
use super::settings;
use super::types::{AddonStatus, InstanceType};
use super::version;

/// Upper bound on saved settings pulled from one addon at teardown
const MAX_SAVED_SETTINGS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Loaded,
    Initialized,
}

#[derive(Default)]
struct RuntimeState {
    module: Option<LoadedModule>,
    bridge: Bridge,
    /// Module level create was called on the current module
    created: bool,
    initialized: bool,
    needs_saved_settings: bool,
    instances: HashMap<String, InstanceHandle>,
    /// Bumped on every attach; a fault from an older table is stale
    epoch: u64,
}

pub struct AddonRuntime {
    descriptor: Arc<AddonDescriptor>,
    services: HostServices,
    child_generation: Option<u64>,
    state: Mutex<RuntimeState>,
}

impl AddonRuntime {
    pub fn new(descriptor: Arc<AddonDescriptor>, services: HostServices) -> Self {
        Self {
            descriptor,
            services,
            child_generation: None,
            state: Mutex::new(RuntimeState::default()),
        }
    }

    /// Runtime over a private copy of the addon library
    pub fn new_child(descriptor: Arc<AddonDescriptor>, services: HostServices, generation: u64) -> Self {
        Self {
            descriptor,
            services,
            child_generation: Some(generation),
            state: Mutex::new(RuntimeState::default()),
        }
    }

    pub fn descriptor(&self) -> &Arc<AddonDescriptor> {
        &self.descriptor
    }

    pub fn is_child(&self) -> bool {
        self.child_generation.is_some()
    }

    pub fn child_generation(&self) -> Option<u64> {
        self.child_generation
    }

    pub fn state(&self) -> LifecycleState {
        let st = self.state.lock();
        if st.initialized {
            LifecycleState::Initialized
        } else if st.module.is_some() {
            LifecycleState::Loaded
        } else {
            LifecycleState::Unloaded
        }
    }

    pub fn bridge_state(&self) -> BridgeState {
        self.state.lock().bridge.state()
    }

    pub fn instance_count(&self) -> usize {
        self.state.lock().instances.len()
    }

    pub fn instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn instance_type(&self, instance_id: &str) -> Option<InstanceType> {
        self.state
            .lock()
            .instances
            .get(instance_id)
            .map(|h| h.instance_type())
    }

    /// Path of the library currently loaded, if any
    pub fn library_path(&self) -> Option<PathBuf> {
        self.state.lock().module.as_ref().map(|m| m.path().to_path_buf())
    }

    /// Load, version check and create the addon
    pub fn create(&self, instance_type: InstanceType) -> AddonStatus {
        let mut st = self.state.lock();
        self.create_locked(&mut st, instance_type)
    }

    /// Create one instance inside the addon, creating the addon first if needed
    pub fn create_instance(
        &self,
        instance_type: InstanceType,
        instance_id: &str,
        data: InstanceData,
    ) -> AddonStatus {
        let mut st = self.state.lock();

        if st.instances.contains_key(instance_id) {
            error!("{}: instance {} already exists", self.descriptor.id, instance_id);
            return AddonStatus::PermanentFailure;
        }

        if !st.initialized {
            let status = self.create_locked(&mut st, instance_type);
            if !status.is_ok() {
                return status;
            }
        }

        if !self.gate_locked(&mut st, instance_type) {
            return AddonStatus::PermanentFailure;
        }

        let functions = match st.bridge.functions() {
            Ok(functions) => functions,
            Err(e) => {
                warn!("{}: cannot create {}: {}", self.descriptor.id, instance_id, e);
                return AddonStatus::PermanentFailure;
            }
        };

        let result = fault::isolate(&self.descriptor.id, "create_instance", || {
            functions.create_instance(instance_type, instance_id, data)
        });

        match result {
            Ok((AddonStatus::Ok, Some(handle))) => {
                debug!("{}: created {} instance {}", self.descriptor.id, instance_type, instance_id);
                st.instances.insert(instance_id.to_string(), handle);
                AddonStatus::Ok
            }
            Ok((AddonStatus::Ok, None)) => {
                error!("{}: create_instance returned no handle for {}", self.descriptor.id, instance_id);
                AddonStatus::PermanentFailure
            }
            Ok((status, _)) => {
                warn!("{}: create_instance {} returned {}", self.descriptor.id, instance_id, status);
                status
            }
            Err(fault) => {
                self.contain(&mut st, CallPhase::Active, "create_instance", fault);
                AddonStatus::Unknown
            }
        }
    }

    /// Destroy one instance; the last one takes the addon down with it
    pub fn destroy_instance(&self, instance_id: &str) {
        let mut st = self.state.lock();

        let Some(handle) = st.instances.remove(instance_id) else {
            warn!("{}: no instance {} to destroy", self.descriptor.id, instance_id);
            return;
        };

        if let Ok(functions) = st.bridge.functions() {
            if let Err(fault) = fault::isolate(&self.descriptor.id, "destroy_instance", || {
                functions.destroy_instance(handle)
            }) {
                self.contain(&mut st, CallPhase::Active, "destroy_instance", fault);
            }
        }

        if st.instances.is_empty() {
            self.destroy_locked(&mut st);
        }
    }

    /// Tear the addon down; safe to call repeatedly
    pub fn destroy(&self) {
        let mut st = self.state.lock();
        self.destroy_locked(&mut st);
    }

    /// Run `f` against a live instance
    ///
    /// Kind-specific forwarding code goes through here so a fault raised in
    /// it is contained like any other addon call.
    pub fn call_instance<R, F>(&self, instance_id: &str, function: &str, f: F) -> Result<R, CallError>
    where
        F: FnOnce(InstanceHandle) -> Result<R, Fault>,
    {
        let (functions, handle, epoch) = {
            let st = self.state.lock();
            let functions = st.bridge.functions()?;
            let handle = *st
                .instances
                .get(instance_id)
                .ok_or_else(|| CallError::UnknownInstance(instance_id.to_string()))?;
            (functions, handle, st.epoch)
        };

        let result = fault::isolate(&self.descriptor.id, function, || f(handle));
        drop(functions);
        self.settle(function, epoch, result)
    }

    /// Ask the addon for its current status
    pub fn get_status(&self) -> Result<AddonStatus, CallError> {
        self.call("get_status", |functions| functions.get_status())
    }

    /// Push every stored setting into the running addon
    pub fn transfer_settings(&self) -> AddonStatus {
        let mut st = self.state.lock();
        if !st.bridge.is_active() {
            warn!("{}: settings transfer requested while not running", self.descriptor.id);
            return AddonStatus::Unknown;
        }
        self.transfer_locked(&mut st)
    }

    fn call<R, F>(&self, function: &str, f: F) -> Result<R, CallError>
    where
        F: FnOnce(&dyn AddonFunctions) -> Result<R, Fault>,
    {
        let (functions, epoch) = {
            let st = self.state.lock();
            (st.bridge.functions()?, st.epoch)
        };
        let result = fault::isolate(&self.descriptor.id, function, || f(functions.as_ref()));
        drop(functions);
        self.settle(function, epoch, result)
    }

    /// Contain a fault from a call made without the lock held
    ///
    /// The runtime may have been torn down and recreated meanwhile; a fault
    /// from the older table must not take the new one down.
    fn settle<R>(&self, function: &str, epoch: u64, result: Result<R, Fault>) -> Result<R, CallError> {
        result.map_err(|fault| {
            let mut st = self.state.lock();
            if st.epoch == epoch {
                self.contain(&mut st, CallPhase::Active, function, fault.clone());
            } else {
                warn!("{}: ignoring stale fault in {}: {}", self.descriptor.id, function, fault);
            }
            CallError::Fault(fault)
        })
    }

    fn create_locked(&self, st: &mut RuntimeState, instance_type: InstanceType) -> AddonStatus {
        if st.bridge.is_tripped() {
            warn!("{}: disabled after a fault, not creating", self.descriptor.id);
            return AddonStatus::PermanentFailure;
        }
        if st.initialized {
            return AddonStatus::Ok;
        }
        if self.services.catalog.is_disabled(&self.descriptor.id) {
            warn!("{}: disabled in the catalog, not loading", self.descriptor.id);
            return AddonStatus::PermanentFailure;
        }

        if st.module.is_none() {
            match self.load() {
                Ok(module) => st.module = Some(module),
                Err(status) => return status,
            }
        }

        if !self.gate_locked(st, instance_type) {
            if !st.created {
                if let Some(module) = st.module.take() {
                    module.unload();
                }
            }
            return AddonStatus::PermanentFailure;
        }

        let ctx = self.host_context(st);
        let result = match st.module.as_ref() {
            Some(module) => fault::isolate(&self.descriptor.id, "create", || module.module().create(&ctx)),
            None => return AddonStatus::PermanentFailure,
        };
        st.created = true;

        let ModuleCreate { status, functions } = match result {
            Ok(created) => created,
            Err(fault) => {
                self.contain(st, CallPhase::Active, "create", fault);
                return AddonStatus::Unknown;
            }
        };

        let functions = match (status, functions) {
            (AddonStatus::Ok | AddonStatus::NeedSettings | AddonStatus::NeedSavedSettings, Some(f)) => f,
            (AddonStatus::Ok | AddonStatus::NeedSettings | AddonStatus::NeedSavedSettings, None) => {
                error!("{}: create returned {} without an entry point table", self.descriptor.id, status);
                self.bad_status_at_create(st, AddonStatus::PermanentFailure);
                return AddonStatus::PermanentFailure;
            }
            (other, _) => {
                self.bad_status_at_create(st, other);
                return other;
            }
        };

        let functions = match st.module.as_ref() {
            Some(module) => module.pin_functions(functions),
            None => functions,
        };
        st.bridge.attach(functions);
        st.epoch += 1;

        if status == AddonStatus::Ok {
            st.initialized = true;
            info!("{} ({}) created", self.descriptor.name, self.descriptor.id);
            return AddonStatus::Ok;
        }

        if status == AddonStatus::NeedSavedSettings {
            st.needs_saved_settings = true;
        }
        let transferred = self.transfer_locked(st);
        if transferred.is_ok() && st.bridge.is_active() {
            st.initialized = true;
            info!("{} created after settings transfer", self.descriptor.id);
            AddonStatus::Ok
        } else if st.bridge.is_tripped() {
            AddonStatus::PermanentFailure
        } else {
            transferred
        }
    }

    fn bad_status_at_create(&self, st: &mut RuntimeState, status: AddonStatus) {
        error!("{}: create failed with {}", self.descriptor.id, status);
        st.bridge.detach();
        self.services.notifier.notify(UserMessage::new(
            MessageKind::BadStatusAtCreate,
            self.descriptor.name.clone(),
            format!("Failed to start {}: {}", self.descriptor.name, status),
        ));
    }

    fn load(&self) -> Result<LoadedModule, AddonStatus> {
        let desc = &self.descriptor;
        let search = &self.services.search;

        let (path, origin) = match self.child_generation {
            None => match loader::locate_primary(desc, search) {
                Some(path) => (path, ModuleOrigin::Primary),
                None => return Err(self.load_failed(&LoadError::NotFound {
                    addon_id: desc.id.clone(),
                    library: desc.library.clone(),
                })),
            },
            Some(generation) => match loader::locate_child(desc, search, generation) {
                Ok(child) => (child.path, ModuleOrigin::Child { parent: child.parent }),
                Err(e) => return Err(self.load_failed(&e)),
            },
        };

        match self.services.loader.load(&path) {
            Ok(module) => {
                debug!("{}: loaded {}", desc.id, path.display());
                Ok(LoadedModule::new(module, path, origin))
            }
            Err(e) => {
                if let ModuleOrigin::Child { .. } = origin {
                    if let Err(io) = std::fs::remove_file(&path) {
                        warn!("Failed to remove child copy {}: {}", path.display(), io);
                    }
                }
                Err(self.load_failed(&e))
            }
        }
    }

    fn load_failed(&self, err: &LoadError) -> AddonStatus {
        error!("{}: {}", self.descriptor.id, err);
        let kind = match err {
            LoadError::NotFound { .. } => MessageKind::LibraryNotFound,
            _ => MessageKind::LoadFailed,
        };
        self.services.notifier.notify(UserMessage::new(
            kind,
            self.descriptor.name.clone(),
            err.to_string(),
        ));
        AddonStatus::PermanentFailure
    }

    /// Check every group needed for `instance_type`; false stops the caller
    fn gate_locked(&self, st: &mut RuntimeState, instance_type: InstanceType) -> bool {
        for ty in version::gate_types(instance_type) {
            let reported = match st.module.as_ref() {
                Some(module) => fault::isolate(&self.descriptor.id, "get_type_version", || {
                    module.module().type_version(ty)
                }),
                None => return false,
            };
            let reported = match reported {
                Ok(reported) => reported,
                Err(fault) => {
                    self.contain(st, CallPhase::Active, "get_type_version", fault);
                    return false;
                }
            };

            if let Err(e) = version::check(ty, reported.as_deref()) {
                error!(
                    "{}: {} interface mismatch for addon {}: host {}, addon {}",
                    self.descriptor.id,
                    ty,
                    self.descriptor.name,
                    ty.host_version(),
                    reported.as_deref().unwrap_or("<none>")
                );
                self.services.notifier.notify(UserMessage::new(
                    MessageKind::IncompatibleVersion,
                    self.descriptor.name.clone(),
                    e.to_string(),
                ));
                return false;
            }
        }
        true
    }

    fn transfer_locked(&self, st: &mut RuntimeState) -> AddonStatus {
        let functions = match st.bridge.functions() {
            Ok(functions) => functions,
            Err(e) => {
                warn!("{}: settings transfer skipped: {}", self.descriptor.id, e);
                return AddonStatus::Unknown;
            }
        };

        let id = self.descriptor.id.as_str();
        let provider = Arc::clone(&self.services.settings);
        let schema = provider.schema(id);
        let mut raised = None;

        let outcome = settings::transfer(
            id,
            &schema,
            |key| provider.value(id, key),
            |key, value| match fault::isolate(id, "set_setting", || functions.set_setting(key, &value)) {
                Ok(status) => Some(status),
                Err(fault) => {
                    raised = Some(fault);
                    None
                }
            },
        );
        drop(functions);

        if let Some(fault) = raised {
            self.contain(st, CallPhase::Active, "set_setting", fault);
            return AddonStatus::Unknown;
        }

        debug!("{}: transferred {} settings", id, outcome.calls);
        if let Some(message) = settings::report(&self.descriptor.name, &outcome) {
            self.services.notifier.notify(message);
        }
        AddonStatus::Ok
    }

    fn export_saved_settings(&self, st: &mut RuntimeState) {
        let Ok(functions) = st.bridge.functions() else {
            return;
        };
        let id = self.descriptor.id.as_str();
        let provider = Arc::clone(&self.services.settings);

        let mut exported = 0;
        for index in 0..MAX_SAVED_SETTINGS {
            let saved = match fault::isolate(id, "get_saved_setting", || functions.saved_setting(index)) {
                Ok(saved) => saved,
                Err(fault) => {
                    self.contain(st, CallPhase::Teardown, "get_saved_setting", fault);
                    break;
                }
            };
            if saved.status == AddonStatus::Unknown || saved.key == SAVED_SETTINGS_END {
                break;
            }
            provider.store(id, &saved.key, &saved.value);
            exported += 1;
        }

        if exported == MAX_SAVED_SETTINGS {
            warn!("{}: stopped saved settings export after {} entries", id, exported);
        }
        debug!("{}: exported {} saved settings", id, exported);

        if let Err(e) = provider.flush(id) {
            error!("{}: failed to persist saved settings: {}", id, e);
        }
    }

    fn destroy_locked(&self, st: &mut RuntimeState) {
        if st.module.is_none() && st.instances.is_empty() {
            st.bridge.detach();
            st.initialized = false;
            return;
        }

        if st.needs_saved_settings && st.bridge.is_active() {
            self.export_saved_settings(st);
        }

        let leftover: Vec<(String, InstanceHandle)> = st.instances.drain().collect();
        for (instance_id, handle) in leftover {
            let Ok(functions) = st.bridge.functions() else {
                break;
            };
            debug!("{}: destroying leftover instance {}", self.descriptor.id, instance_id);
            if let Err(fault) = fault::isolate(&self.descriptor.id, "destroy_instance", || {
                functions.destroy_instance(handle)
            }) {
                self.contain(st, CallPhase::Teardown, "destroy_instance", fault);
            }
        }

        let tripped = st.bridge.is_tripped();
        st.bridge.detach();
        st.initialized = false;
        st.needs_saved_settings = false;

        if let Some(module) = st.module.take() {
            if st.created && !tripped {
                if let Err(fault) = fault::isolate(&self.descriptor.id, "destroy", || module.module().destroy()) {
                    self.contain(st, CallPhase::Teardown, "destroy", fault);
                }
            } else if tripped {
                warn!("{}: skipping destroy after fault", self.descriptor.id);
            }
            module.unload();
        }
        st.created = false;

        info!("{} unloaded", self.descriptor.id);
    }

    /// Trip the bridge; outside teardown also unload, disable and tell the user
    fn contain(&self, st: &mut RuntimeState, phase: CallPhase, function: &str, fault: Fault) {
        let already_tripped = st.bridge.is_tripped();
        st.bridge.trip();

        if phase == CallPhase::Teardown || already_tripped {
            return;
        }

        let desc = &self.descriptor;
        error!("{} ({}) faulted in {}: {}; disabling", desc.name, desc.id, function, fault);

        self.destroy_locked(st);
        self.services
            .catalog
            .disable(&desc.id, &format!("fault in {}: {}", function, fault));

        let author = if desc.author.is_empty() { "unknown author" } else { desc.author.as_str() };
        self.services.notifier.notify(UserMessage::new(
            MessageKind::AddonFault,
            desc.name.clone(),
            format!("{} by {} failed and has been disabled", desc.name, author),
        ));
    }

    fn host_context(&self, st: &RuntimeState) -> HostContext {
        let desc = &self.descriptor;
        HostContext {
            addon_id: desc.id.clone(),
            addon_name: desc.name.clone(),
            addon_path: desc.path.clone(),
            user_path: desc.profile_path.clone(),
            library_path: st.module.as_ref().map(|m| m.path().to_path_buf()).unwrap_or_default(),
            temp_path: self.services.search.staging_dir.clone(),
        }
    }
}

impl Drop for AddonRuntime {
    fn drop(&mut self) {
        let mut st = self.state.lock();
        self.destroy_locked(&mut st);
    }
}
