/*
 *  addon/loader.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  Addon loader - locates and stages .so/.dylib/.dll files
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

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use thiserror::Error;

use super::bridge::{AddonFunctions, AddonModule, InstanceData, InstanceHandle, SavedSetting};
use super::descriptor::AddonDescriptor;
use super::fault::Fault;
use super::settings::SettingValue;
use super::types::{AddonStatus, InstanceType};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("library {library} for addon {addon_id} not found")]
    NotFound { addon_id: String, library: String },

    #[error("failed to load {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("{path} does not export {symbol}")]
    MissingSymbol { path: PathBuf, symbol: String },

    #[error("failed to stage child copy {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where to look for addon libraries, in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPaths {
    /// Each root is searched as `<root>/<addon-id>/<library>`
    pub fallback_roots: Vec<PathBuf>,

    /// Flat directory searched last as `<dir>/<library>`
    pub extra_library_dir: Option<PathBuf>,

    /// Child copies are written here
    pub staging_dir: PathBuf,
}

impl Default for SearchPaths {
    fn default() -> Self {
        Self {
            fallback_roots: Vec::new(),
            extra_library_dir: None,
            staging_dir: std::env::temp_dir().join("addonhost"),
        }
    }
}

impl SearchPaths {
    /// Candidate library paths for an addon, declared path first
    pub fn candidates(&self, desc: &AddonDescriptor) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if !desc.path.as_os_str().is_empty() {
            paths.push(desc.path.join(&desc.library));
        }
        for root in &self.fallback_roots {
            paths.push(root.join(&desc.id).join(&desc.library));
        }
        if let Some(dir) = self.extra_library_dir.as_ref() {
            paths.push(dir.join(&desc.library));
        }

        paths
    }
}

/// Find the addon's own library; first existing candidate wins
pub fn locate_primary(desc: &AddonDescriptor, search: &SearchPaths) -> Option<PathBuf> {
    for path in search.candidates(desc) {
        if path.is_file() {
            debug!("Found {} at: {}", desc.id, path.display());
            return Some(path);
        }
    }

    debug!("Library {} not found for addon: {}", desc.library, desc.id);
    None
}

static CHILD_GENERATION: AtomicU64 = AtomicU64::new(0);

/// Next process-wide child generation; never reset
pub fn next_child_generation() -> u64 {
    CHILD_GENERATION.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildLocation {
    /// Staged copy to load
    pub path: PathBuf,

    /// Primary library it was copied from
    pub parent: PathBuf,
}

/// Stage a private copy of the addon library for a child runtime
///
/// The copy is named `<addon-id>-<generation><ext>` and only written when it
/// does not exist yet. A missing primary is an error; children never fall
/// back to the primary file.
pub fn locate_child(
    desc: &AddonDescriptor,
    search: &SearchPaths,
    generation: u64,
) -> Result<ChildLocation, LoadError> {
    let parent = locate_primary(desc, search).ok_or_else(|| LoadError::NotFound {
        addon_id: desc.id.clone(),
        library: desc.library.clone(),
    })?;

    let ext = match parent.extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => std::env::consts::DLL_SUFFIX.to_string(),
    };
    let path = search
        .staging_dir
        .join(format!("{}-{}{}", desc.id, generation, ext));

    if !path.exists() {
        let staged = fs::create_dir_all(&search.staging_dir).and_then(|_| fs::copy(&parent, &path));
        if let Err(source) = staged {
            return Err(LoadError::Stage { path, source });
        }
        info!("Staged child copy of {}: {}", desc.id, path.display());
    }

    Ok(ChildLocation { path, parent })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOrigin {
    Primary,
    Child { parent: PathBuf },
}

/// Opens a library and resolves its entry points
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn AddonModule>, LoadError>;
}

/// Staged child library, removed once the last holder lets go
///
/// Everything that can keep the library mapped holds a clone, so the file
/// outlives every mapping of it.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed child copy {}", self.path.display()),
            Err(e) => warn!("Failed to remove child copy {}: {}", self.path.display(), e),
        }
    }
}

/// Function table pinned to a staged child file
///
/// `inner` drops before the staged file guard.
struct StagedFunctions {
    inner: Arc<dyn AddonFunctions>,
    _staged: Arc<StagedFile>,
}

impl AddonFunctions for StagedFunctions {
    fn get_status(&self) -> Result<AddonStatus, Fault> {
        self.inner.get_status()
    }

    fn create_instance(
        &self,
        instance_type: InstanceType,
        instance_id: &str,
        data: InstanceData,
    ) -> Result<(AddonStatus, Option<InstanceHandle>), Fault> {
        self.inner.create_instance(instance_type, instance_id, data)
    }

    fn destroy_instance(&self, instance: InstanceHandle) -> Result<(), Fault> {
        self.inner.destroy_instance(instance)
    }

    fn set_setting(&self, id: &str, value: &SettingValue) -> Result<AddonStatus, Fault> {
        self.inner.set_setting(id, value)
    }

    fn saved_setting(&self, index: usize) -> Result<SavedSetting, Fault> {
        self.inner.saved_setting(index)
    }
}

/// A library owned by exactly one runtime
pub struct LoadedModule {
    // field order is drop order: the library goes before the staged file
    module: Box<dyn AddonModule>,
    path: PathBuf,
    origin: ModuleOrigin,
    staged: Option<Arc<StagedFile>>,
}

impl LoadedModule {
    pub fn new(module: Box<dyn AddonModule>, path: PathBuf, origin: ModuleOrigin) -> Self {
        let staged = match origin {
            ModuleOrigin::Child { .. } => Some(Arc::new(StagedFile { path: path.clone() })),
            ModuleOrigin::Primary => None,
        };
        Self {
            module,
            path,
            origin,
            staged,
        }
    }

    pub fn module(&self) -> &dyn AddonModule {
        self.module.as_ref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn origin(&self) -> &ModuleOrigin {
        &self.origin
    }

    /// Tie a function table from this module to its staged file, if any
    pub fn pin_functions(&self, functions: Arc<dyn AddonFunctions>) -> Arc<dyn AddonFunctions> {
        match self.staged.as_ref() {
            Some(staged) => Arc::new(StagedFunctions {
                inner: functions,
                _staged: Arc::clone(staged),
            }),
            None => functions,
        }
    }

    /// Drop the library; a child's staged copy goes with the last mapping
    pub fn unload(self) {
        let LoadedModule { module, path, staged, .. } = self;
        drop(module);
        debug!("Unloaded {}", path.display());
        drop(staged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn install(root: &Path, id: &str, library: &str) -> PathBuf {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(library);
        fs::write(&path, b"not really a library").unwrap();
        path
    }

    #[test]
    fn test_declared_path_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let declared = install(tmp.path(), "declared", "libx.so");
        install(&tmp.path().join("root"), "x.addon", "libx.so");

        let desc = AddonDescriptor::new("x.addon", "libx.so").with_path(declared.parent().unwrap());
        let search = SearchPaths {
            fallback_roots: vec![tmp.path().join("root")],
            ..SearchPaths::default()
        };
        assert_eq!(locate_primary(&desc, &search), Some(declared));
    }

    #[test]
    fn test_fallback_order() {
        let tmp = tempfile::tempdir().unwrap();
        let second = install(&tmp.path().join("b"), "x.addon", "libx.so");
        let extra = tmp.path().join("extra");
        fs::create_dir_all(&extra).unwrap();
        fs::write(extra.join("libx.so"), b"x").unwrap();

        let desc = AddonDescriptor::new("x.addon", "libx.so").with_path(tmp.path().join("missing"));
        let search = SearchPaths {
            fallback_roots: vec![tmp.path().join("a"), tmp.path().join("b")],
            extra_library_dir: Some(extra.clone()),
            staging_dir: tmp.path().join("staging"),
        };
        assert_eq!(locate_primary(&desc, &search), Some(second.clone()));

        fs::remove_file(&second).unwrap();
        assert_eq!(locate_primary(&desc, &search), Some(extra.join("libx.so")));

        fs::remove_file(extra.join("libx.so")).unwrap();
        assert_eq!(locate_primary(&desc, &search), None);
    }

    #[test]
    fn test_child_copies_are_distinct_and_cleaned_independently() {
        let tmp = tempfile::tempdir().unwrap();
        let primary = install(tmp.path(), "x.addon", "libx.so");
        let desc = AddonDescriptor::new("x.addon", "libx.so").with_path(primary.parent().unwrap());
        let search = SearchPaths {
            staging_dir: tmp.path().join("staging"),
            ..SearchPaths::default()
        };

        let a = locate_child(&desc, &search, next_child_generation()).unwrap();
        let b = locate_child(&desc, &search, next_child_generation()).unwrap();
        assert_ne!(a.path, b.path);
        assert_eq!(a.parent, primary);
        assert!(a.path.exists() && b.path.exists());
        assert!(a.path.to_string_lossy().ends_with(".so"));

        // staging twice with the same generation reuses the file
        let again = locate_child(&desc, &search, 1_000_000).unwrap();
        fs::write(&again.path, b"modified").unwrap();
        let reused = locate_child(&desc, &search, 1_000_000).unwrap();
        assert_eq!(fs::read(&reused.path).unwrap(), b"modified");

        struct Inert(PathBuf);
        impl AddonModule for Inert {
            fn path(&self) -> &Path {
                &self.0
            }
            fn type_version(
                &self,
                _ty: crate::addon::InstanceType,
            ) -> Result<Option<String>, crate::addon::Fault> {
                Ok(None)
            }
            fn create(
                &self,
                _host: &crate::addon::HostContext,
            ) -> Result<crate::addon::ModuleCreate, crate::addon::Fault> {
                Err(crate::addon::Fault::Unknown)
            }
            fn destroy(&self) -> Result<(), crate::addon::Fault> {
                Ok(())
            }
        }

        let loaded = LoadedModule::new(
            Box::new(Inert(a.path.clone())),
            a.path.clone(),
            ModuleOrigin::Child { parent: a.parent.clone() },
        );
        loaded.unload();
        assert!(!a.path.exists());
        assert!(b.path.exists());
        assert!(primary.exists());
    }

    struct Idle;

    impl AddonFunctions for Idle {
        fn get_status(&self) -> Result<AddonStatus, Fault> {
            Ok(AddonStatus::Ok)
        }

        fn create_instance(
            &self,
            _instance_type: InstanceType,
            _instance_id: &str,
            _data: InstanceData,
        ) -> Result<(AddonStatus, Option<InstanceHandle>), Fault> {
            Ok((AddonStatus::NotImplemented, None))
        }

        fn destroy_instance(&self, _instance: InstanceHandle) -> Result<(), Fault> {
            Ok(())
        }

        fn set_setting(&self, _id: &str, _value: &SettingValue) -> Result<AddonStatus, Fault> {
            Ok(AddonStatus::Ok)
        }

        fn saved_setting(&self, _index: usize) -> Result<SavedSetting, Fault> {
            Err(Fault::Unknown)
        }
    }

    struct Held(PathBuf);

    impl AddonModule for Held {
        fn path(&self) -> &Path {
            &self.0
        }

        fn type_version(&self, _ty: InstanceType) -> Result<Option<String>, Fault> {
            Ok(None)
        }

        fn create(&self, _host: &crate::addon::HostContext) -> Result<crate::addon::ModuleCreate, Fault> {
            Err(Fault::Unknown)
        }

        fn destroy(&self) -> Result<(), Fault> {
            Ok(())
        }
    }

    #[test]
    fn test_staged_copy_outlives_in_flight_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let primary = install(&tmp.path().join("addons"), "x.addon", "libx.so");
        let desc = AddonDescriptor::new("x.addon", "libx.so").with_path(primary.parent().unwrap());
        let search = SearchPaths {
            staging_dir: tmp.path().join("staging"),
            ..SearchPaths::default()
        };
        let child = locate_child(&desc, &search, next_child_generation()).unwrap();

        let loaded = LoadedModule::new(
            Box::new(Held(child.path.clone())),
            child.path.clone(),
            ModuleOrigin::Child { parent: child.parent.clone() },
        );
        let pinned = loaded.pin_functions(Arc::new(Idle));
        loaded.unload();
        assert!(child.path.exists());

        assert_eq!(pinned.get_status(), Ok(AddonStatus::Ok));
        drop(pinned);
        assert!(!child.path.exists());
        assert!(primary.exists());
    }

    #[test]
    fn test_primary_tables_are_not_wrapped() {
        let loaded = LoadedModule::new(
            Box::new(Held(PathBuf::from("/opt/libx.so"))),
            PathBuf::from("/opt/libx.so"),
            ModuleOrigin::Primary,
        );
        let functions: Arc<dyn AddonFunctions> = Arc::new(Idle);
        let pinned = loaded.pin_functions(Arc::clone(&functions));
        assert!(Arc::ptr_eq(&functions, &pinned));
        loaded.unload();
    }

    #[test]
    fn test_child_without_primary_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let desc = AddonDescriptor::new("ghost", "libghost.so");
        let search = SearchPaths {
            staging_dir: tmp.path().to_path_buf(),
            ..SearchPaths::default()
        };
        let err = locate_child(&desc, &search, 0).unwrap_err();
        assert!(matches!(err, LoadError::NotFound { .. }));
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_generation_is_unique_across_threads() {
        let seen = Arc::new(parking_lot::Mutex::new(HashSet::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(seen.lock().insert(next_child_generation()));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(seen.lock().len(), 800);
    }
}
