/*
 *  addon/host.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  Registry of running addons
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

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;

use super::bridge::BridgeState;
use super::descriptor::AddonDescriptor;
use super::loader::next_child_generation;
use super::runtime::AddonRuntime;
use super::services::HostServices;

/// One runtime per addon identity, plus explicitly spawned children
///
/// Children share the identity of their parent but load a private copy of
/// the library, so they are handed to the caller and never tracked here.
pub struct AddonHost {
    services: HostServices,
    running: Mutex<HashMap<String, Arc<AddonRuntime>>>,
}

impl AddonHost {
    pub fn new(services: HostServices) -> Self {
        Self {
            services,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &HostServices {
        &self.services
    }

    /// Runtime for an addon, created on first use
    ///
    /// A runtime that was tripped by a fault is replaced by a fresh one.
    pub fn runtime(&self, descriptor: Arc<AddonDescriptor>) -> Arc<AddonRuntime> {
        let mut running = self.running.lock();

        if let Some(existing) = running.get(&descriptor.id) {
            if existing.bridge_state() != BridgeState::Tripped {
                return Arc::clone(existing);
            }
            info!("Replacing faulted runtime for {}", descriptor.id);
        }

        debug!("New runtime for {}", descriptor.id);
        let runtime = Arc::new(AddonRuntime::new(Arc::clone(&descriptor), self.services.clone()));
        running.insert(descriptor.id.clone(), Arc::clone(&runtime));
        runtime
    }

    /// Independent runtime over a fresh copy of the addon library
    pub fn spawn_child(&self, descriptor: Arc<AddonDescriptor>) -> AddonRuntime {
        let generation = next_child_generation();
        debug!("Spawning child {} of {}", generation, descriptor.id);
        AddonRuntime::new_child(descriptor, self.services.clone(), generation)
    }

    pub fn get(&self, addon_id: &str) -> Option<Arc<AddonRuntime>> {
        self.running.lock().get(addon_id).cloned()
    }

    /// Tear down and forget one addon
    pub fn remove(&self, addon_id: &str) -> bool {
        let removed = self.running.lock().remove(addon_id);
        match removed {
            Some(runtime) => {
                runtime.destroy();
                true
            }
            None => false,
        }
    }

    pub fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.running.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Tear down every tracked addon
    pub fn shutdown(&self) {
        let runtimes: Vec<Arc<AddonRuntime>> = self.running.lock().drain().map(|(_, rt)| rt).collect();
        for runtime in runtimes {
            runtime.destroy();
        }
    }
}

impl Drop for AddonHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}
