/*
 *  addon/bridge.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  Host-side view of an addon's function table
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

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::fault::{CallError, Fault};
use super::settings::SettingValue;
use super::types::{AddonStatus, InstanceType};

/// Opaque handle to an instance living inside an addon
///
/// Only the address is kept; the host never dereferences it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle {
    addr: usize,
    instance_type: InstanceType,
}

impl InstanceHandle {
    pub fn new(ptr: *mut c_void, instance_type: InstanceType) -> Self {
        Self {
            addr: ptr as usize,
            instance_type,
        }
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.addr as *mut c_void
    }

    pub fn instance_type(&self) -> InstanceType {
        self.instance_type
    }
}

/// Kind-specific data forwarded untouched into `create_instance`
#[derive(Debug, Clone, Copy)]
pub struct InstanceData(pub *mut c_void);

impl InstanceData {
    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }
}

impl Default for InstanceData {
    fn default() -> Self {
        Self::null()
    }
}

/// Paths and identity handed to an addon when it is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    pub addon_id: String,
    pub addon_name: String,
    pub addon_path: PathBuf,
    pub user_path: PathBuf,
    pub library_path: PathBuf,
    pub temp_path: PathBuf,
}

/// One exported saved setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSetting {
    pub status: AddonStatus,
    pub key: String,
    pub value: String,
}

/// Result of the module level create call
pub struct ModuleCreate {
    pub status: AddonStatus,

    /// Entry point table; `None` when the addon filled nothing in
    pub functions: Option<Arc<dyn AddonFunctions>>,
}

/// A loaded addon library
///
/// Implemented by [`super::native::NativeModule`] for real shared libraries
/// and by scripted mocks in tests. Every method may raise a [`Fault`].
pub trait AddonModule: Send + Sync {
    fn path(&self) -> &Path;

    /// Interface version the addon was built against for one type
    fn type_version(&self, instance_type: InstanceType) -> Result<Option<String>, Fault>;

    fn create(&self, host: &HostContext) -> Result<ModuleCreate, Fault>;

    fn destroy(&self) -> Result<(), Fault>;
}

/// Entry point table returned by a successful module create
pub trait AddonFunctions: Send + Sync {
    fn get_status(&self) -> Result<AddonStatus, Fault>;

    fn create_instance(
        &self,
        instance_type: InstanceType,
        instance_id: &str,
        data: InstanceData,
    ) -> Result<(AddonStatus, Option<InstanceHandle>), Fault>;

    fn destroy_instance(&self, instance: InstanceHandle) -> Result<(), Fault>;

    fn set_setting(&self, id: &str, value: &SettingValue) -> Result<AddonStatus, Fault>;

    fn saved_setting(&self, index: usize) -> Result<SavedSetting, Fault>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Detached,
    Active,
    Tripped,
}

/// The addon function table as the host sees it
///
/// `Tripped` means the table was dropped after a fault; it only leaves
/// that state when the runtime is replaced.
#[derive(Default)]
pub enum Bridge {
    #[default]
    Detached,
    Active(Arc<dyn AddonFunctions>),
    Tripped,
}

impl Bridge {
    pub fn state(&self) -> BridgeState {
        match self {
            Bridge::Detached => BridgeState::Detached,
            Bridge::Active(_) => BridgeState::Active,
            Bridge::Tripped => BridgeState::Tripped,
        }
    }

    /// Clone out the active table
    pub fn functions(&self) -> Result<Arc<dyn AddonFunctions>, CallError> {
        match self {
            Bridge::Active(functions) => Ok(Arc::clone(functions)),
            Bridge::Detached => Err(CallError::Detached),
            Bridge::Tripped => Err(CallError::Tripped),
        }
    }

    pub fn attach(&mut self, functions: Arc<dyn AddonFunctions>) {
        *self = Bridge::Active(functions);
    }

    pub fn detach(&mut self) {
        if !self.is_tripped() {
            *self = Bridge::Detached;
        }
    }

    pub fn trip(&mut self) {
        *self = Bridge::Tripped;
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Bridge::Active(_))
    }

    pub fn is_tripped(&self) -> bool {
        matches!(self, Bridge::Tripped)
    }
}
