//! Storage backends for sources and generated thumbnails.
//!
//! A [`Storage`] is a flat namespace of byte blobs addressed by `/`-separated
//! names. Implementations provide the raw primitives (`exists`, `open`,
//! `write`, `delete`, `url`); the trait supplies name resolution on top:
//!
//! - [`Storage::get_available_name`] checks `exists` and appends `_1`,
//!   `_2`, … before the extension until a free name is found.
//! - [`Storage::save`] resolves an available name, writes, and returns the
//!   name actually used.
//!
//! A thumbnail cache miss therefore produces this call sequence against
//! the thumbnail storage:
//!
//! ```text
//! exists(target) → open(source) → save(target) → get_available_name(target) → exists(target)
//! ```
//!
//! ## Implementations
//!
//! | Type | Backing | Writable |
//! |---|---|---|
//! | [`FileSystemStorage`] | directory on disk, served under a base URL | yes |
//! | [`MemoryStorage`] | in-process map | yes |
//! | [`UrlStorage`] | HTTP(S) via `ureq` | no |

use crate::naming::numbered_name;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("IO error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("HTTP error for {url}: {reason}")]
    Http { url: String, reason: String },
    #[error("Storage is read-only: cannot write {0}")]
    ReadOnly(String),
    #[error("Invalid name: {0:?}")]
    InvalidName(String),
    #[error("No available name for {0}")]
    NoAvailableName(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    fn io(name: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(name.to_string())
        } else {
            StorageError::Io {
                name: name.to_string(),
                source,
            }
        }
    }
}

/// Serializable identity of a storage, persisted with every metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StorageId {
    #[serde(rename = "filesystem")]
    FileSystem { location: PathBuf, base_url: String },
    #[serde(rename = "url")]
    Url,
    #[serde(rename = "memory")]
    Memory { label: String },
}

impl StorageId {
    /// Stable text form mixed into source keys.
    pub fn tag(&self) -> String {
        match self {
            StorageId::FileSystem { location, .. } => format!("filesystem:{}", location.display()),
            StorageId::Url => "url".to_string(),
            StorageId::Memory { label } => format!("memory:{label}"),
        }
    }
}

/// Upper bound on `_N` suffixes tried by [`Storage::get_available_name`].
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// A flat blob namespace.
pub trait Storage: Send + Sync {
    fn id(&self) -> StorageId;

    fn exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Read a whole blob. Missing blobs are [`StorageError::NotFound`].
    fn open(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Write a blob under exactly `name`, replacing any existing content.
    fn write(&self, name: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Remove a blob. Deleting a missing blob is not an error.
    fn delete(&self, name: &str) -> Result<(), StorageError>;

    /// Public URL of a blob.
    fn url(&self, name: &str) -> String;

    /// Map equivalent spellings of a name to one form.
    fn normalize_name(&self, name: &str) -> String {
        name.to_string()
    }

    /// First name, starting with `name` itself, that does not exist yet.
    fn get_available_name(&self, name: &str) -> Result<String, StorageError> {
        find_available_name(self, name)
    }

    /// Write under an available name derived from `name` and return it.
    fn save(&self, name: &str, data: &[u8]) -> Result<String, StorageError> {
        let name = self.get_available_name(name)?;
        self.write(&name, data)?;
        Ok(name)
    }
}

/// First spelling of `name` that `storage` does not have yet.
///
/// The provided [`Storage::get_available_name`] delegates here; wrappers that
/// override it can call this to keep the numbering rule.
pub fn find_available_name<S: Storage + ?Sized>(
    storage: &S,
    name: &str,
) -> Result<String, StorageError> {
    if !storage.exists(name)? {
        return Ok(name.to_string());
    }
    for n in 1..=MAX_NAME_ATTEMPTS {
        let candidate = numbered_name(name, n);
        if !storage.exists(&candidate)? {
            return Ok(candidate);
        }
    }
    Err(StorageError::NoAvailableName(name.to_string()))
}

// ============================================================================
// Filesystem
// ============================================================================

/// Files under a root directory, served under `base_url`.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    location: PathBuf,
    base_url: String,
}

impl FileSystemStorage {
    pub fn new(location: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let location = location.into();
        let location = std::path::absolute(&location).unwrap_or(location);
        Self {
            location,
            base_url: base_url.into(),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Resolve a name to a path inside the root, refusing to escape it.
    fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let relative = self.normalize_name(name);
        let escapes = Path::new(&relative)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || escapes {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.location.join(relative))
    }
}

impl Storage for FileSystemStorage {
    fn id(&self) -> StorageId {
        StorageId::FileSystem {
            location: self.location.clone(),
            base_url: self.base_url.clone(),
        }
    }

    fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.resolve(name)?.exists())
    }

    fn open(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        std::fs::read(self.resolve(name)?).map_err(|e| StorageError::io(name, e))
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(name, e))?;
        }
        std::fs::write(&path, data).map_err(|e| StorageError::io(name, e))
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.resolve(name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(name, e)),
        }
    }

    fn url(&self, name: &str) -> String {
        let encoded: Vec<String> = self
            .normalize_name(name)
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", self.base_url.trim_end_matches('/'), encoded.join("/"))
    }

    /// Absolute paths under the root become relative; `./` is dropped.
    fn normalize_name(&self, name: &str) -> String {
        let path = Path::new(name);
        let relative = path.strip_prefix(&self.location).unwrap_or(path);
        relative
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Blobs held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    label: String,
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Every stored name, sorted.
    pub fn names(&self) -> Vec<String> {
        let files = self.files.read().unwrap_or_else(|p| p.into_inner());
        files.keys().cloned().collect()
    }
}

impl Storage for MemoryStorage {
    fn id(&self) -> StorageId {
        StorageId::Memory {
            label: self.label.clone(),
        }
    }

    fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let files = self.files.read().unwrap_or_else(|p| p.into_inner());
        Ok(files.contains_key(name))
    }

    fn open(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let files = self.files.read().unwrap_or_else(|p| p.into_inner());
        files
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let mut files = self.files.write().unwrap_or_else(|p| p.into_inner());
        files.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        let mut files = self.files.write().unwrap_or_else(|p| p.into_inner());
        files.remove(name);
        Ok(())
    }

    fn url(&self, name: &str) -> String {
        format!("memory://{}/{}", self.label, name)
    }
}

// ============================================================================
// Remote URLs
// ============================================================================

/// Read-only storage where every name is an absolute HTTP(S) URL.
pub struct UrlStorage {
    agent: ureq::Agent,
}

impl UrlStorage {
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent }
    }

    fn http_error(url: &str, e: ureq::Error) -> StorageError {
        match e {
            ureq::Error::StatusCode(404 | 410) => StorageError::NotFound(url.to_string()),
            other => StorageError::Http {
                url: url.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl Default for UrlStorage {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Storage for UrlStorage {
    fn id(&self) -> StorageId {
        StorageId::Url
    }

    fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let url = normalize_url(name);
        match self.agent.head(&url).call() {
            Ok(_) => Ok(true),
            Err(e) => match Self::http_error(&url, e) {
                StorageError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    fn open(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let url = normalize_url(name);
        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| Self::http_error(&url, e))?;
        response
            .into_body()
            .read_to_vec()
            .map_err(|e| Self::http_error(&url, e))
    }

    fn write(&self, name: &str, _data: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::ReadOnly(name.to_string()))
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        Err(StorageError::ReadOnly(name.to_string()))
    }

    fn url(&self, name: &str) -> String {
        normalize_url(name)
    }

    fn normalize_name(&self, name: &str) -> String {
        normalize_url(name)
    }
}

/// Characters that separate URL components and are kept verbatim.
const URL_DELIMITERS: &[char] = &['/', '?', '&', '=', ':', '#', ';', '@'];

/// Make a URL safe to request.
///
/// Non-ASCII characters are dropped and everything between component
/// delimiters is percent-encoded. Existing escapes are decoded first so
/// they are not encoded twice.
pub fn normalize_url(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, url),
    };

    let encode_segment = |segment: &str| -> String {
        let decoded = urlencoding::decode(segment)
            .map(Cow::into_owned)
            .unwrap_or_else(|_| segment.to_string());
        let ascii: String = decoded.chars().filter(char::is_ascii).collect();
        urlencoding::encode(&ascii).into_owned()
    };

    let mut out = String::with_capacity(url.len());
    if let Some(scheme) = scheme {
        out.push_str(scheme);
        out.push_str("://");
    }
    let mut segment = String::new();
    for c in rest.chars() {
        if URL_DELIMITERS.contains(&c) {
            out.push_str(&encode_segment(&segment));
            segment.clear();
            out.push(c);
        } else {
            segment.push(c);
        }
    }
    out.push_str(&encode_segment(&segment));
    out
}

/// Whether a source reference points at a remote URL.
pub fn is_remote(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}
