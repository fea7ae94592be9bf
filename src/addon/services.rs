/*
 *  addon/services.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  Host collaborators: addon catalog, settings storage, user notification
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

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::loader::{ModuleLoader, SearchPaths};
use super::native::NativeLoader;
use super::settings::SettingsCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    LibraryNotFound,
    LoadFailed,
    IncompatibleVersion,
    BadStatusAtCreate,
    SettingsOutcome,
    AddonFault,
}

/// A message meant for the person running the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    pub kind: MessageKind,
    pub heading: String,
    pub body: String,
}

impl UserMessage {
    pub fn new(kind: MessageKind, heading: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            heading: heading.into(),
            body: body.into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, message: UserMessage);
}

/// Installed addon database; the runtime disables faulting addons and
/// refuses to start disabled ones
pub trait AddonCatalog: Send + Sync {
    fn disable(&self, addon_id: &str, reason: &str);
    fn is_disabled(&self, addon_id: &str) -> bool;
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-addon settings storage
pub trait SettingsProvider: Send + Sync {
    fn schema(&self, addon_id: &str) -> Vec<SettingsCategory>;
    fn value(&self, addon_id: &str, key: &str) -> Option<String>;
    fn store(&self, addon_id: &str, key: &str, value: &str);
    fn flush(&self, addon_id: &str) -> Result<(), SettingsError>;
}

/// Logs user messages instead of showing them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: UserMessage) {
        match message.kind {
            MessageKind::SettingsOutcome => info!("[{}] {}", message.heading, message.body),
            MessageKind::BadStatusAtCreate => warn!("[{}] {}", message.heading, message.body),
            _ => error!("[{}] {}", message.heading, message.body),
        }
    }
}

/// Catalog that only remembers which addons were disabled and why
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    disabled: Mutex<HashMap<String, String>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_disabled(&self, addon_id: &str) -> bool {
        self.disabled.lock().contains_key(addon_id)
    }

    pub fn disabled_reason(&self, addon_id: &str) -> Option<String> {
        self.disabled.lock().get(addon_id).cloned()
    }

    pub fn enable(&self, addon_id: &str) {
        self.disabled.lock().remove(addon_id);
    }
}

impl AddonCatalog for MemoryCatalog {
    fn disable(&self, addon_id: &str, reason: &str) {
        warn!("Disabling addon {}: {}", addon_id, reason);
        self.disabled.lock().insert(addon_id.to_string(), reason.to_string());
    }

    fn is_disabled(&self, addon_id: &str) -> bool {
        MemoryCatalog::is_disabled(self, addon_id)
    }
}

/// Schema and values of one addon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddonSettings {
    #[serde(default)]
    pub categories: Vec<SettingsCategory>,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// Settings kept in memory, optionally backed by a YAML file
///
/// The file maps addon ids to their schema and stored values:
///
/// ```yaml
/// audiodecoder.tone:
///   categories:
///     - label: General
///       settings:
///         - { id: frequency, type: slider, option: int }
///   values:
///     frequency: "440"
/// ```
#[derive(Debug, Default)]
pub struct MemorySettings {
    addons: Mutex<HashMap<String, AddonSettings>>,
    persist_to: Option<PathBuf>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from YAML; `flush` writes back to the same file
    pub fn from_yaml_file(path: &Path) -> Result<Self, SettingsError> {
        let addons: HashMap<String, AddonSettings> = if path.exists() {
            let s = fs::read_to_string(path)?;
            serde_yaml::from_str(&s)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            addons: Mutex::new(addons),
            persist_to: Some(path.to_path_buf()),
        })
    }

    pub fn insert(&self, addon_id: &str, settings: AddonSettings) {
        self.addons.lock().insert(addon_id.to_string(), settings);
    }

    pub fn get(&self, addon_id: &str) -> Option<AddonSettings> {
        self.addons.lock().get(addon_id).cloned()
    }
}

impl SettingsProvider for MemorySettings {
    fn schema(&self, addon_id: &str) -> Vec<SettingsCategory> {
        self.addons
            .lock()
            .get(addon_id)
            .map(|s| s.categories.clone())
            .unwrap_or_default()
    }

    fn value(&self, addon_id: &str, key: &str) -> Option<String> {
        self.addons.lock().get(addon_id)?.values.get(key).cloned()
    }

    fn store(&self, addon_id: &str, key: &str, value: &str) {
        self.addons
            .lock()
            .entry(addon_id.to_string())
            .or_default()
            .values
            .insert(key.to_string(), value.to_string());
    }

    fn flush(&self, addon_id: &str) -> Result<(), SettingsError> {
        let Some(path) = self.persist_to.as_ref() else {
            return Ok(());
        };

        // whole file is rewritten; all addons share it
        let snapshot: BTreeMap<String, AddonSettings> = self
            .addons
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let s = serde_yaml::to_string(&snapshot)?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, s)?;
        debug!("Flushed settings for {} to {}", addon_id, path.display());
        Ok(())
    }
}

/// Everything a runtime needs from the host
#[derive(Clone)]
pub struct HostServices {
    pub catalog: Arc<dyn AddonCatalog>,
    pub settings: Arc<dyn SettingsProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub loader: Arc<dyn ModuleLoader>,
    pub search: SearchPaths,
}

impl HostServices {
    /// Native loader with in-memory collaborators
    pub fn new(search: SearchPaths) -> Self {
        Self {
            catalog: Arc::new(MemoryCatalog::new()),
            settings: Arc::new(MemorySettings::new()),
            notifier: Arc::new(LogNotifier),
            loader: Arc::new(NativeLoader),
            search,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn AddonCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = loader;
        self
    }
}
