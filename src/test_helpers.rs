//! Shared test utilities for the thumbstore test suite.
//!
//! Provides a storage wrapper that records the calls made against it,
//! synthetic image encoders, and a ready-wired [`ThumbnailBackend`] over
//! in-memory collaborators.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let storage = RecordingStorage::new("test");
//! storage.inner().write("org.avif", &encode_png(500, 500, false)).unwrap();
//! let backend = memory_backend(settings(), storage.clone(), mock_engine(500, 500));
//!
//! backend.get_thumbnail("org.avif", "50x50", &OptionSet::new()).unwrap();
//! assert_eq!(storage.log()[0], format!("exists: {}", expected_name));
//! ```

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

use crate::config::Settings;
use crate::imaging::ImageBackend;
use crate::imaging::backend::tests::MockBackend;
use crate::kvstore::MemoryKvStore;
use crate::storage::{MemoryStorage, Storage, StorageError, StorageId, find_available_name};
use crate::thumbnail::ThumbnailBackend;

// =========================================================================
// Recording storage
// =========================================================================

/// In-memory storage that logs `exists`, `open`, `save`,
/// `get_available_name` and `delete` as `"op: name"` lines.
pub struct RecordingStorage {
    inner: MemoryStorage,
    log: Mutex<Vec<String>>,
}

impl RecordingStorage {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStorage::new(label),
            log: Mutex::new(Vec::new()),
        })
    }

    /// Unlogged access to the backing store, for fixtures and assertions.
    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    fn record(&self, op: &str, name: &str) {
        self.log.lock().unwrap().push(format!("{op}: {name}"));
    }
}

impl Storage for RecordingStorage {
    fn id(&self) -> StorageId {
        self.inner.id()
    }

    fn exists(&self, name: &str) -> Result<bool, StorageError> {
        self.record("exists", name);
        self.inner.exists(name)
    }

    fn open(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.record("open", name);
        self.inner.open(name)
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        self.inner.write(name, data)
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.record("delete", name);
        self.inner.delete(name)
    }

    fn url(&self, name: &str) -> String {
        self.inner.url(name)
    }

    fn get_available_name(&self, name: &str) -> Result<String, StorageError> {
        self.record("get_available_name", name);
        find_available_name(self, name)
    }

    fn save(&self, name: &str, data: &[u8]) -> Result<String, StorageError> {
        self.record("save", name);
        let name = self.get_available_name(name)?;
        self.write(&name, data)?;
        Ok(name)
    }
}

// =========================================================================
// Backend wiring
// =========================================================================

/// Settings with a recognizable prefix and no alternative resolutions.
pub fn settings() -> Settings {
    Settings {
        prefix: "test/cache/".to_string(),
        ..Settings::default()
    }
}

pub fn mock_engine(width: u32, height: u32) -> Arc<MockBackend> {
    Arc::new(MockBackend::with_size(width, height))
}

/// Orchestrator whose sources and thumbnails share `storage`, with an
/// in-memory metadata store.
pub fn memory_backend(
    settings: Settings,
    storage: Arc<RecordingStorage>,
    engine: Arc<dyn ImageBackend>,
) -> ThumbnailBackend {
    let storage: Arc<dyn Storage> = storage;
    ThumbnailBackend::new(
        settings,
        engine,
        storage.clone(),
        storage,
        Arc::new(MemoryKvStore::new()),
    )
}

// =========================================================================
// Synthetic images
// =========================================================================

fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// Gradient PNG; with `alpha`, the left half is fully transparent.
pub fn encode_png(width: u32, height: u32, alpha: bool) -> Vec<u8> {
    if alpha {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            let a = if x < width / 2 { 0 } else { 255 };
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, a])
        });
        encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
    } else {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
    }
}

/// Gradient JPEG.
pub fn encode_test_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

/// PNG whose top half is white and bottom half black.
pub fn split_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |_, y| {
        if y < height / 2 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
}
