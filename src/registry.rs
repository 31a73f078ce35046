//! Backend registry.
//!
//! [`Settings`] names its collaborators by identifier (`storage.backend =
//! "filesystem"`, `kvstore.backend = "json"`, `engine = "image"`). The
//! registry maps each identifier to a constructor and wires a
//! [`ThumbnailBackend`] once at startup. Relative paths in the settings are
//! resolved against a root directory, normally the config file's directory.
//!
//! | Kind | Built-in identifiers |
//! |------|----------------------|
//! | storage | `filesystem`, `memory` |
//! | kvstore | `json`, `memory` |
//! | engine | `image` |

use crate::config::{KvStoreConfig, Settings, StorageConfig};
use crate::imaging::{ImageBackend, RustBackend};
use crate::kvstore::{JsonFileKvStore, KvBackend, MemoryKvStore};
use crate::storage::{FileSystemStorage, MemoryStorage, Storage};
use crate::thumbnail::ThumbnailBackend;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown {kind} backend '{name}'")]
    Unknown { kind: &'static str, name: String },
    #[error("Cannot build {kind} backend: {reason}")]
    Build { kind: &'static str, reason: String },
}

pub type StorageConstructor =
    Box<dyn Fn(&StorageConfig, &Path) -> Result<Arc<dyn Storage>, RegistryError> + Send + Sync>;
pub type KvConstructor =
    Box<dyn Fn(&KvStoreConfig, &Path) -> Result<Arc<dyn KvBackend>, RegistryError> + Send + Sync>;
pub type EngineConstructor =
    Box<dyn Fn(&Settings) -> Result<Arc<dyn ImageBackend>, RegistryError> + Send + Sync>;

#[derive(Default)]
pub struct Registry {
    storages: HashMap<String, StorageConstructor>,
    kvstores: HashMap<String, KvConstructor>,
    engines: HashMap<String, EngineConstructor>,
}

impl Registry {
    /// Registry with no constructors at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register_storage("filesystem", |config, root| {
            let location = root.join(&config.location);
            Ok(Arc::new(FileSystemStorage::new(location, config.base_url.clone())))
        });
        registry.register_storage("memory", |config, _| {
            Ok(Arc::new(MemoryStorage::new(config.location.clone())))
        });
        registry.register_kvstore("json", |config, root| {
            if config.path.trim().is_empty() {
                return Err(RegistryError::Build {
                    kind: "kvstore",
                    reason: "json store needs a path".to_string(),
                });
            }
            Ok(Arc::new(JsonFileKvStore::open(root.join(&config.path))))
        });
        registry.register_kvstore("memory", |_, _| Ok(Arc::new(MemoryKvStore::new())));
        registry.register_engine("image", |_| Ok(Arc::new(RustBackend::new())));
        registry
    }

    pub fn register_storage<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&StorageConfig, &Path) -> Result<Arc<dyn Storage>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.storages.insert(name.to_string(), Box::new(constructor));
    }

    pub fn register_kvstore<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&KvStoreConfig, &Path) -> Result<Arc<dyn KvBackend>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.kvstores.insert(name.to_string(), Box::new(constructor));
    }

    pub fn register_engine<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&Settings) -> Result<Arc<dyn ImageBackend>, RegistryError> + Send + Sync + 'static,
    {
        self.engines.insert(name.to_string(), Box::new(constructor));
    }

    pub fn storage(&self, config: &StorageConfig, root: &Path) -> Result<Arc<dyn Storage>, RegistryError> {
        let constructor = self
            .storages
            .get(&config.backend)
            .ok_or_else(|| unknown("storage", &config.backend))?;
        constructor(config, root)
    }

    pub fn kvstore(
        &self,
        config: &KvStoreConfig,
        root: &Path,
    ) -> Result<Arc<dyn KvBackend>, RegistryError> {
        let constructor = self
            .kvstores
            .get(&config.backend)
            .ok_or_else(|| unknown("kvstore", &config.backend))?;
        constructor(config, root)
    }

    pub fn engine(&self, settings: &Settings) -> Result<Arc<dyn ImageBackend>, RegistryError> {
        let constructor = self
            .engines
            .get(&settings.engine)
            .ok_or_else(|| unknown("engine", &settings.engine))?;
        constructor(settings)
    }

    /// Wire an orchestrator from `settings`.
    ///
    /// When the thumbnail and source storage configs are identical, one
    /// instance serves both.
    pub fn build(&self, settings: Settings, root: &Path) -> Result<ThumbnailBackend, RegistryError> {
        let engine = self.engine(&settings)?;
        let storage = self.storage(&settings.storage, root)?;
        let source_storage = if settings.source_storage == settings.storage {
            Arc::clone(&storage)
        } else {
            self.storage(&settings.source_storage, root)?
        };
        let kv = self.kvstore(&settings.kvstore, root)?;
        Ok(ThumbnailBackend::new(settings, engine, storage, source_storage, kv))
    }
}

fn unknown(kind: &'static str, name: &str) -> RegistryError {
    RegistryError::Unknown {
        kind,
        name: name.to_string(),
    }
}
