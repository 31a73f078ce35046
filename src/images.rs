//! Image references and their persisted metadata.
//!
//! [`ImageFile`] is the unit the metadata store deals in: a cache key plus
//! an [`ArtifactMetadata`] record (name, storage identity, size, format).
//! Sources and thumbnails share the type; only the key derivation differs.

use crate::imaging::{Dimensions, OutputFormat};
use crate::keys::{KeyError, ThumbnailKey, source_key};
use crate::storage::{Storage, StorageId};
use serde::{Deserialize, Serialize};

/// Persisted description of one stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub name: String,
    pub storage: StorageId,
    /// `[width, height]`; absent for sources that were never measured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
}

/// A keyed reference to an image in some storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    key: String,
    metadata: ArtifactMetadata,
}

impl ImageFile {
    /// Reference a source image. The name is normalized by the storage so
    /// equivalent spellings share a key.
    pub fn source(reference: &str, storage: &dyn Storage) -> Result<Self, KeyError> {
        let name = storage.normalize_name(reference.trim());
        let id = storage.id();
        let key = source_key(&name, &id)?;
        Ok(Self {
            key,
            metadata: ArtifactMetadata {
                format: OutputFormat::from_name(&name),
                name,
                storage: id,
                size: None,
            },
        })
    }

    /// Reference a thumbnail artifact stored under `name`.
    pub fn thumbnail(
        key: &ThumbnailKey,
        name: String,
        storage: StorageId,
        format: OutputFormat,
    ) -> Self {
        Self {
            key: key.to_string(),
            metadata: ArtifactMetadata {
                name,
                storage,
                size: None,
                format: Some(format),
            },
        }
    }

    pub fn from_parts(key: String, metadata: ArtifactMetadata) -> Self {
        Self { key, metadata }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn storage(&self) -> &StorageId {
        &self.metadata.storage
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    pub fn format(&self) -> Option<OutputFormat> {
        self.metadata.format
    }

    pub fn size(&self) -> Option<Dimensions> {
        self.metadata.size.map(|[w, h]| Dimensions::new(w, h))
    }

    pub fn set_size(&mut self, size: Dimensions) {
        self.metadata.size = Some([size.width, size.height]);
    }

    pub fn with_size(mut self, size: Dimensions) -> Self {
        self.set_size(size);
        self
    }

    pub fn width(&self) -> u32 {
        self.size().map_or(0, |d| d.width)
    }

    pub fn height(&self) -> u32 {
        self.size().map_or(0, |d| d.height)
    }

    /// Width over height; `0.0` when unmeasured.
    pub fn ratio(&self) -> f64 {
        match self.size() {
            Some(d) if d.height > 0 => d.ratio(),
            _ => 0.0,
        }
    }

    pub fn is_portrait(&self) -> bool {
        self.size().is_some_and(|d| d.is_portrait())
    }
}

/// What a thumbnail is requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A name in the source storage or an `http(s)://` URL.
    Reference(String),
    /// An already resolved image.
    File(ImageFile),
    /// No source at all.
    Missing,
}

impl From<&str> for Source {
    fn from(s: &str) -> Self {
        Source::Reference(s.to_string())
    }
}

impl From<String> for Source {
    fn from(s: String) -> Self {
        Source::Reference(s)
    }
}

impl From<&String> for Source {
    fn from(s: &String) -> Self {
        Source::Reference(s.clone())
    }
}

impl<T: Into<Source>> From<Option<T>> for Source {
    fn from(s: Option<T>) -> Self {
        s.map_or(Source::Missing, Into::into)
    }
}

impl From<ImageFile> for Source {
    fn from(f: ImageFile) -> Self {
        Source::File(f)
    }
}

impl From<&ImageFile> for Source {
    fn from(f: &ImageFile) -> Self {
        Source::File(f.clone())
    }
}
