//! Metadata store: which images exist, how big they are, and which
//! thumbnails were made from which source.
//!
//! # Design
//!
//! The store is split in two layers:
//!
//! - [`KvBackend`] is a dumb string-to-string map with prefix listing.
//!   [`MemoryKvStore`] keeps it in process; [`JsonFileKvStore`] persists it
//!   as one versioned JSON document on disk.
//! - [`MetadataStore`] layers image semantics on top. Records are JSON
//!   [`ArtifactMetadata`] documents under two key families:
//!
//! ```text
//! {prefix}||image||{key}        → {"name": ..., "storage": {...}, "size": [w, h], "format": ...}
//! {prefix}||thumbnails||{key}   → ["<thumbnail key>", ...]
//! ```
//!
//! A record that fails to decode is treated as a miss, never as an error:
//! the orchestrator regenerates and overwrites it. Only backend I/O failures
//! surface as [`KvStoreError`].
//!
//! ## On-disk format
//!
//! [`JsonFileKvStore`] writes the whole document after every change. A
//! missing, corrupt, or version-mismatched file loads as an empty store,
//! which costs a regeneration pass but never a crash.

use crate::images::{ArtifactMetadata, ImageFile};
use crate::storage::{Storage, StorageId};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;

/// Version of the on-disk document. Bump to invalidate existing stores when
/// the record format changes.
const DOCUMENT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum KvStoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raw string map with prefix listing.
pub trait KvBackend: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<String>, KvStoreError>;
    fn set_raw(&self, key: &str, value: String) -> Result<(), KvStoreError>;
    fn delete_raw(&self, key: &str) -> Result<(), KvStoreError>;
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvStoreError>;
}

// ============================================================================
// Backends
// ============================================================================

/// In-process backend; contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryKvStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>, KvStoreError> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: String) -> Result<(), KvStoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete_raw(&self, key: &str) -> Result<(), KvStoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvStoreError> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// The document persisted by [`JsonFileKvStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Document {
    version: u32,
    entries: BTreeMap<String, String>,
}

impl Document {
    fn empty() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            entries: BTreeMap::new(),
        }
    }

    /// Empty if the file doesn't exist or can't be parsed.
    fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        let document: Self = match serde_json::from_str(&content) {
            Ok(d) => d,
            Err(e) => {
                warn!("Ignoring unreadable metadata store {}: {}", path.display(), e);
                return Self::empty();
            }
        };
        if document.version != DOCUMENT_VERSION {
            debug!(
                "Metadata store {} has version {}, starting empty",
                path.display(),
                document.version
            );
            return Self::empty();
        }
        document
    }

    fn save(&self, path: &Path) -> Result<(), KvStoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Backend persisted as a single JSON file.
#[derive(Debug)]
pub struct JsonFileKvStore {
    path: PathBuf,
    document: Mutex<Document>,
}

impl JsonFileKvStore {
    /// Open the store at `path`, loading whatever is readable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = Document::load(&path);
        Self {
            path,
            document: Mutex::new(document),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        self.document.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl KvBackend for JsonFileKvStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>, KvStoreError> {
        Ok(self.lock().entries.get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: String) -> Result<(), KvStoreError> {
        let mut document = self.lock();
        document.entries.insert(key.to_string(), value);
        document.save(&self.path)
    }

    fn delete_raw(&self, key: &str) -> Result<(), KvStoreError> {
        let mut document = self.lock();
        if document.entries.remove(key).is_some() {
            document.save(&self.path)?;
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvStoreError> {
        Ok(self
            .lock()
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Metadata store
// ============================================================================

/// Outcome of [`MetadataStore::cleanup`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Image records dropped because their artifact is gone.
    pub removed: usize,
    /// Thumbnail lists rewritten or dropped.
    pub pruned: usize,
}

/// Image semantics on top of a [`KvBackend`].
///
/// Thumbnail lists are read, modified and written back under `list_lock`,
/// so concurrent registrations through one store never drop each other.
/// Separate processes sharing a backend are last-writer-wins on a list;
/// `cleanup` only removes entries, it never restores lost ones.
pub struct MetadataStore {
    backend: Arc<dyn KvBackend>,
    prefix: String,
    list_lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(backend: Arc<dyn KvBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            list_lock: Mutex::new(()),
        }
    }

    fn lock_lists(&self) -> MutexGuard<'_, ()> {
        self.list_lock.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn image_key(&self, key: &str) -> String {
        format!("{}||image||{}", self.prefix, key)
    }

    fn thumbnails_key(&self, key: &str) -> String {
        format!("{}||thumbnails||{}", self.prefix, key)
    }

    /// Stored record for `image`, if any.
    pub fn get(&self, image: &ImageFile) -> Result<Option<ImageFile>, KvStoreError> {
        self.get_by_key(image.key())
    }

    pub fn get_by_key(&self, key: &str) -> Result<Option<ImageFile>, KvStoreError> {
        let Some(raw) = self.backend.get_raw(&self.image_key(key))? else {
            return Ok(None);
        };
        match serde_json::from_str::<ArtifactMetadata>(&raw) {
            Ok(metadata) => Ok(Some(ImageFile::from_parts(key.to_string(), metadata))),
            Err(e) => {
                debug!("Undecodable metadata for {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Store `image`, and register it as a thumbnail of `source` if given.
    pub fn set(&self, image: &ImageFile, source: Option<&ImageFile>) -> Result<(), KvStoreError> {
        let json = serde_json::to_string(image.metadata())?;
        self.backend.set_raw(&self.image_key(image.key()), json)?;
        if let Some(source) = source {
            let _lists = self.lock_lists();
            let mut keys = self.thumbnail_keys(source.key())?;
            if !keys.iter().any(|k| k == image.key()) {
                keys.push(image.key().to_string());
                self.set_thumbnail_keys(source.key(), &keys)?;
            }
        }
        Ok(())
    }

    /// Stored record, or `image` itself after storing it.
    pub fn get_or_set(&self, image: &ImageFile) -> Result<ImageFile, KvStoreError> {
        if let Some(stored) = self.get(image)? {
            return Ok(stored);
        }
        self.set(image, None)?;
        Ok(image.clone())
    }

    /// Remove `image`; with `delete_thumbnails`, also every thumbnail
    /// registered for it. Returns the removed thumbnail records.
    pub fn delete(
        &self,
        image: &ImageFile,
        delete_thumbnails: bool,
    ) -> Result<Vec<ImageFile>, KvStoreError> {
        let mut removed = Vec::new();
        if delete_thumbnails {
            let _lists = self.lock_lists();
            removed = self.thumbnails(image)?;
            for thumbnail in &removed {
                self.backend.delete_raw(&self.image_key(thumbnail.key()))?;
            }
            self.backend.delete_raw(&self.thumbnails_key(image.key()))?;
        }
        self.backend.delete_raw(&self.image_key(image.key()))?;
        Ok(removed)
    }

    /// Thumbnail records registered for `source` that still have a record.
    pub fn thumbnails(&self, source: &ImageFile) -> Result<Vec<ImageFile>, KvStoreError> {
        let mut found = Vec::new();
        for key in self.thumbnail_keys(source.key())? {
            if let Some(image) = self.get_by_key(&key)? {
                found.push(image);
            }
        }
        Ok(found)
    }

    fn thumbnail_keys(&self, source_key: &str) -> Result<Vec<String>, KvStoreError> {
        Ok(self
            .backend
            .get_raw(&self.thumbnails_key(source_key))?
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default())
    }

    fn set_thumbnail_keys(&self, source_key: &str, keys: &[String]) -> Result<(), KvStoreError> {
        self.backend
            .set_raw(&self.thumbnails_key(source_key), serde_json::to_string(keys)?)
    }

    /// Drop records whose artifact no longer exists and prune thumbnail
    /// lists. Records in storages `resolve` cannot open are left alone.
    pub fn cleanup(
        &self,
        resolve: &dyn Fn(&StorageId) -> Option<Arc<dyn Storage>>,
    ) -> Result<CleanupReport, KvStoreError> {
        let mut report = CleanupReport::default();

        let image_prefix = self.image_key("");
        for full_key in self.backend.keys_with_prefix(&image_prefix)? {
            let key = &full_key[image_prefix.len()..];
            let Some(image) = self.get_by_key(key)? else {
                self.backend.delete_raw(&full_key)?;
                report.removed += 1;
                continue;
            };
            let Some(storage) = resolve(image.storage()) else {
                continue;
            };
            match storage.exists(image.name()) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Removing record for missing {}", image.name());
                    self.backend.delete_raw(&full_key)?;
                    report.removed += 1;
                }
                Err(e) => warn!("Could not check {}: {}", image.name(), e),
            }
        }

        let list_prefix = self.thumbnails_key("");
        let _lists = self.lock_lists();
        for full_key in self.backend.keys_with_prefix(&list_prefix)? {
            let source_key = &full_key[list_prefix.len()..];
            if self.get_by_key(source_key)?.is_none() {
                self.backend.delete_raw(&full_key)?;
                report.pruned += 1;
                continue;
            }
            let keys = self.thumbnail_keys(source_key)?;
            let mut kept = Vec::with_capacity(keys.len());
            for key in &keys {
                if self.get_by_key(key)?.is_some() {
                    kept.push(key.clone());
                }
            }
            if kept.len() != keys.len() {
                if kept.is_empty() {
                    self.backend.delete_raw(&full_key)?;
                } else {
                    self.set_thumbnail_keys(source_key, &kept)?;
                }
                report.pruned += 1;
            }
        }

        Ok(report)
    }

    /// Delete every key under this store's prefix. Returns how many.
    pub fn clear(&self) -> Result<usize, KvStoreError> {
        let keys = self.backend.keys_with_prefix(&format!("{}||", self.prefix))?;
        for key in &keys {
            self.backend.delete_raw(key)?;
        }
        Ok(keys.len())
    }
}
