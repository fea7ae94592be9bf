/*
 *  addon/mod.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  Native addon hosting: loading, version gating, instances, fault containment
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

//! Native addon host
//!
//! Addons are independently compiled shared libraries (.so/.dylib/.dll)
//! that expose a small C ABI. The host loads them, checks that every
//! interface they were built against matches the host exactly, creates
//! typed instances inside them and keeps the rest of the process alive when
//! addon code faults.
//!
//! ## Layers
//!
//! 1. **FFI** (`ffi.rs`) - `#[repr(C)]` tables exchanged with the addon
//! 2. **Loader** (`loader.rs`, `native.rs`) - locates, stages and loads libraries
//! 3. **Version gate** (`version.rs`) - exact interface version matching
//! 4. **Bridge** (`bridge.rs`) - host-side view of the addon's function table
//! 5. **Runtime** (`runtime.rs`, `host.rs`) - lifecycle and instance registry
//! 6. **Settings** (`settings.rs`) - typed settings transfer into the addon
//! 7. **Faults** (`fault.rs`) - containment of faults raised by addon code
//!
//! ## Library Discovery
//!
//! The declared path of the addon wins. Otherwise the fallback roots are
//! searched in order, each as `<root>/<addon-id>/<library>`, followed by the
//! optional flat extra library directory (`<dir>/<library>`).
//!
//! ## Lifecycle
//!
//! ```text
//! Unloaded -> Loaded -> Initialized <-> instances live -> Unloaded
//! ```
//!
//! Removing the last live instance unloads the addon.

pub mod bridge;
pub mod descriptor;
pub mod fault;
pub mod ffi;
pub mod host;
pub mod loader;
pub mod native;
pub mod runtime;
pub mod services;
pub mod settings;
pub mod types;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{
    AddonFunctions,
    AddonModule,
    Bridge,
    BridgeState,
    HostContext,
    InstanceData,
    InstanceHandle,
    ModuleCreate,
    SavedSetting,
};
pub use descriptor::{AddonDescriptor, DescriptorError};
pub use fault::{CallError, CallPhase, Fault};
pub use host::AddonHost;
pub use loader::{LoadError, LoadedModule, ModuleLoader, ModuleOrigin, SearchPaths};
pub use native::NativeLoader;
pub use runtime::{AddonRuntime, LifecycleState};
pub use services::{
    AddonCatalog,
    AddonSettings,
    HostServices,
    LogNotifier,
    MemoryCatalog,
    MemorySettings,
    MessageKind,
    Notifier,
    SettingsError,
    SettingsProvider,
    UserMessage,
};
pub use settings::{SettingDefinition, SettingValue, SettingsCategory};
pub use types::{AddonStatus, InstanceType};
pub use version::VersionError;
