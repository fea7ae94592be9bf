/*
 *  addon/testing.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  Scripted mock addon for runtime tests
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

//! Mock addon module for testing
//!
//! [`MockModule`] behaves like a loaded addon library driven by a
//! [`MockBehavior`] script. Every call is appended to a shared
//! [`MockState`] so tests can assert on exact call order after the module
//! itself has been unloaded.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use super::bridge::{
    AddonFunctions,
    AddonModule,
    HostContext,
    InstanceData,
    InstanceHandle,
    ModuleCreate,
    SavedSetting,
};
use super::descriptor::AddonDescriptor;
use super::fault::Fault;
use super::ffi::SAVED_SETTINGS_END;
use super::loader::{LoadError, ModuleLoader, SearchPaths};
use super::runtime::AddonRuntime;
use super::services::{HostServices, MemoryCatalog, MemorySettings, MessageKind, Notifier, UserMessage};
use super::settings::SettingValue;
use super::types::{AddonStatus, InstanceType};

/// How a scripted call fails
#[derive(Debug, Clone)]
pub enum FaultAction {
    /// `panic!` with a message
    Panic(String),
    /// Panic carrying a bare status code
    Status(i32),
    /// Reported structured fault
    Message(String),
    /// Panic with a payload nobody recognises
    Unknown,
}

impl FaultAction {
    fn raise<T>(&self) -> Result<T, Fault> {
        match self {
            FaultAction::Panic(msg) => panic!("{}", msg),
            FaultAction::Status(code) => std::panic::panic_any(*code),
            FaultAction::Message(msg) => Err(Fault::Message(msg.clone())),
            FaultAction::Unknown => std::panic::panic_any(()),
        }
    }
}

/// Script for a mock addon
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Reported interface versions; absent types report none
    pub versions: HashMap<InstanceType, String>,
    pub create_status: AddonStatus,
    pub instance_status: AddonStatus,
    pub setting_status: HashMap<String, AddonStatus>,
    /// Call name -> fault raised by that call
    pub fault_on: HashMap<String, FaultAction>,
    pub saved_settings: Vec<(String, String)>,
    /// Saved setting index -> status answered with it, `Ok` when absent
    pub saved_status: HashMap<usize, AddonStatus>,
    pub provide_functions: bool,
    pub fail_load: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            versions: InstanceType::ALL
                .iter()
                .map(|t| (*t, t.host_version().to_string()))
                .collect(),
            create_status: AddonStatus::Ok,
            instance_status: AddonStatus::Ok,
            setting_status: HashMap::new(),
            fault_on: HashMap::new(),
            saved_settings: Vec::new(),
            saved_status: HashMap::new(),
            provide_functions: true,
            fail_load: false,
        }
    }
}

/// Shared call log
#[derive(Debug, Default)]
pub struct MockState {
    pub calls: Vec<String>,
    pub settings: Vec<(String, SettingValue)>,
    pub contexts: Vec<HostContext>,
}

struct Shared {
    behavior: MockBehavior,
    state: Arc<Mutex<MockState>>,
}

impl Shared {
    fn record(&self, call: impl Into<String>) {
        self.state.lock().calls.push(call.into());
    }

    fn check(&self, name: &str) -> Result<(), Fault> {
        match self.behavior.fault_on.get(name) {
            Some(action) => action.raise(),
            None => Ok(()),
        }
    }
}

pub struct MockModule {
    path: PathBuf,
    shared: Arc<Shared>,
}

impl Drop for MockModule {
    fn drop(&mut self) {
        self.shared.record("drop");
    }
}

impl AddonModule for MockModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn type_version(&self, instance_type: InstanceType) -> Result<Option<String>, Fault> {
        self.shared.record(format!("type_version:{}", instance_type));
        self.shared.check("type_version")?;
        Ok(self.shared.behavior.versions.get(&instance_type).cloned())
    }

    fn create(&self, host: &HostContext) -> Result<ModuleCreate, Fault> {
        self.shared.record("create");
        self.shared.state.lock().contexts.push(host.clone());
        self.shared.check("create")?;

        let functions = self.shared.behavior.provide_functions.then(|| {
            Arc::new(MockFunctions {
                shared: Arc::clone(&self.shared),
                next_instance: Mutex::new(0x1000),
                instances: Mutex::new(HashMap::new()),
            }) as Arc<dyn AddonFunctions>
        });
        Ok(ModuleCreate {
            status: self.shared.behavior.create_status,
            functions,
        })
    }

    fn destroy(&self) -> Result<(), Fault> {
        self.shared.record("destroy");
        self.shared.check("destroy")
    }
}

pub struct MockFunctions {
    shared: Arc<Shared>,
    next_instance: Mutex<usize>,
    /// Handle address -> instance id
    instances: Mutex<HashMap<usize, String>>,
}

impl AddonFunctions for MockFunctions {
    fn get_status(&self) -> Result<AddonStatus, Fault> {
        self.shared.record("get_status");
        self.shared.check("get_status")?;
        Ok(AddonStatus::Ok)
    }

    fn create_instance(
        &self,
        instance_type: InstanceType,
        instance_id: &str,
        _data: InstanceData,
    ) -> Result<(AddonStatus, Option<InstanceHandle>), Fault> {
        self.shared.record(format!("create_instance:{}", instance_id));
        self.shared.check("create_instance")?;

        let status = self.shared.behavior.instance_status;
        if !status.is_ok() {
            return Ok((status, None));
        }
        let mut next = self.next_instance.lock();
        *next += 0x10;
        self.instances.lock().insert(*next, instance_id.to_string());
        Ok((status, Some(InstanceHandle::new(*next as *mut c_void, instance_type))))
    }

    fn destroy_instance(&self, instance: InstanceHandle) -> Result<(), Fault> {
        let id = self
            .instances
            .lock()
            .remove(&(instance.as_ptr() as usize))
            .unwrap_or_default();
        self.shared.record(format!("destroy_instance:{}", id));
        self.shared.check("destroy_instance")
    }

    fn set_setting(&self, id: &str, value: &SettingValue) -> Result<AddonStatus, Fault> {
        self.shared.record(format!("set_setting:{}", id));
        self.shared.state.lock().settings.push((id.to_string(), value.clone()));
        self.shared.check("set_setting")?;
        Ok(self
            .shared
            .behavior
            .setting_status
            .get(id)
            .copied()
            .unwrap_or(AddonStatus::Ok))
    }

    fn saved_setting(&self, index: usize) -> Result<SavedSetting, Fault> {
        self.shared.record("saved_setting");
        self.shared.check("saved_setting")?;
        let (key, value) = self
            .shared
            .behavior
            .saved_settings
            .get(index)
            .cloned()
            .unwrap_or_else(|| (SAVED_SETTINGS_END.to_string(), String::new()));
        let status = self
            .shared
            .behavior
            .saved_status
            .get(&index)
            .copied()
            .unwrap_or(AddonStatus::Ok);
        Ok(SavedSetting {
            status,
            key,
            value,
        })
    }
}

pub struct MockLoader {
    shared: Arc<Shared>,
}

impl ModuleLoader for MockLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn AddonModule>, LoadError> {
        if self.shared.behavior.fail_load {
            return Err(LoadError::Open {
                path: path.to_path_buf(),
                reason: "mock refused to load".into(),
            });
        }
        self.shared.record("load");
        Ok(Box::new(MockModule {
            path: path.to_path_buf(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Notifier that keeps every message
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<UserMessage>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<UserMessage> {
        self.messages.lock().clone()
    }

    pub fn kinds(&self) -> Vec<MessageKind> {
        self.messages.lock().iter().map(|m| m.kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: UserMessage) {
        self.messages.lock().push(message);
    }
}

/// A mock addon installed in a temporary directory with recording services
pub struct TestHost {
    pub dir: TempDir,
    pub state: Arc<Mutex<MockState>>,
    pub catalog: Arc<MemoryCatalog>,
    pub settings: Arc<MemorySettings>,
    pub notifier: Arc<RecordingNotifier>,
    pub services: HostServices,
    descriptor: Arc<AddonDescriptor>,
}

impl TestHost {
    pub fn new(behavior: MockBehavior) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let install = dir.path().join("addons").join("audiodecoder.mock");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("libmock.so"), b"mock library").unwrap();

        let descriptor = AddonDescriptor::new("audiodecoder.mock", "libmock.so")
            .with_name("Mock Decoder")
            .with_author("Stuart Hunter")
            .with_path(&install)
            .with_profile_path(dir.path().join("userdata"))
            .with_provides(&[InstanceType::AudioDecoder]);

        let state = Arc::new(Mutex::new(MockState::default()));
        let shared = Arc::new(Shared {
            behavior,
            state: Arc::clone(&state),
        });
        let catalog = Arc::new(MemoryCatalog::new());
        let settings = Arc::new(MemorySettings::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let search = SearchPaths {
            fallback_roots: vec![dir.path().join("addons")],
            extra_library_dir: None,
            staging_dir: dir.path().join("staging"),
        };
        let services = HostServices::new(search)
            .with_catalog(catalog.clone())
            .with_settings(settings.clone())
            .with_notifier(notifier.clone())
            .with_loader(Arc::new(MockLoader { shared }));

        Self {
            dir,
            state,
            catalog,
            settings,
            notifier,
            services,
            descriptor: Arc::new(descriptor),
        }
    }

    pub fn descriptor(&self) -> &AddonDescriptor {
        &self.descriptor
    }

    pub fn primary_library(&self) -> PathBuf {
        self.descriptor.path.join(&self.descriptor.library)
    }

    pub fn runtime(&self) -> AddonRuntime {
        AddonRuntime::new(Arc::clone(&self.descriptor), self.services.clone())
    }

    pub fn runtime_for(&self, descriptor: AddonDescriptor) -> AddonRuntime {
        AddonRuntime::new(Arc::new(descriptor), self.services.clone())
    }

    pub fn child(&self, generation: u64) -> AddonRuntime {
        AddonRuntime::new_child(Arc::clone(&self.descriptor), self.services.clone(), generation)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn settings_pushed(&self) -> Vec<(String, SettingValue)> {
        self.state.lock().settings.clone()
    }
}
