//! Image codec backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the orchestrator
//! needs from a codec engine: identify (decode headers, report oriented
//! dimensions) and render (execute a [`RenderParams`] plan and encode).
//!
//! Backends work on in-memory bytes rather than paths: sources may come from
//! any [`Storage`](crate::storage::Storage), including remote URLs.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend).

use super::params::RenderParams;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported image: {0}")]
    Unsupported(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn ratio(self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn is_portrait(self) -> bool {
        self.height > self.width
    }

    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl From<(u32, u32)> for Dimensions {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    /// Dimensions as stored in the file.
    pub stored: Dimensions,
    /// Whether the EXIF orientation swaps width and height (90°/270°).
    pub transposed: bool,
}

impl ImageInfo {
    /// Dimensions after optionally applying the EXIF orientation.
    pub fn dimensions(&self, apply_orientation: bool) -> Dimensions {
        if apply_orientation && self.transposed {
            Dimensions::new(self.stored.height, self.stored.width)
        } else {
            self.stored
        }
    }
}

/// An encoded artifact ready for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub data: Vec<u8>,
    pub dimensions: Dimensions,
}

/// Trait for image codec backends.
///
/// Implementations must be thread-safe: one backend instance serves every
/// concurrent thumbnail request.
pub trait ImageBackend: Send + Sync {
    /// Read the image header.
    fn identify(&self, data: &[u8]) -> Result<ImageInfo, BackendError>;

    /// Decode, transform according to `params`, and encode.
    fn render(&self, data: &[u8], params: &RenderParams) -> Result<Rendered, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::params::CropWindow;
    use std::sync::Mutex;

    /// Mock backend that records operations without touching pixels.
    ///
    /// `identify` reports a fixed size; `render` reports the size the plan
    /// would produce and returns a small deterministic payload.
    pub struct MockBackend {
        pub size: Dimensions,
        pub fail_identify: bool,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Identify(usize),
        Render(RenderParams),
    }

    impl MockBackend {
        pub fn with_size(width: u32, height: u32) -> Self {
            Self {
                size: Dimensions::new(width, height),
                fail_identify: false,
                operations: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                fail_identify: true,
                ..Self::with_size(1, 1)
            }
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        pub fn render_count(&self) -> usize {
            self.get_operations()
                .iter()
                .filter(|op| matches!(op, RecordedOp::Render(_)))
                .count()
        }
    }

    /// Size the plan would produce, step by step.
    pub fn planned_size(source: Dimensions, params: &RenderParams) -> Dimensions {
        let mut size = match params.cropbox {
            Some(b) => Dimensions::new(b.width(), b.height()),
            None => source,
        };
        if let Some(scaled) = params.scale {
            size = scaled.into();
        }
        size = match params.crop {
            Some(CropWindow::Region { width, height, .. })
            | Some(CropWindow::Smart { width, height }) => Dimensions::new(width, height),
            None => size,
        };
        if let Some(p) = params.padding {
            size = Dimensions::new(p.width, p.height);
        }
        size
    }

    impl ImageBackend for MockBackend {
        fn identify(&self, data: &[u8]) -> Result<ImageInfo, BackendError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Identify(data.len()));
            if self.fail_identify {
                return Err(BackendError::Unsupported("mock refuses to decode".into()));
            }
            Ok(ImageInfo {
                stored: self.size,
                transposed: false,
            })
        }

        fn render(&self, _data: &[u8], params: &RenderParams) -> Result<Rendered, BackendError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Render(params.clone()));
            let dimensions = planned_size(self.size, params);
            Ok(Rendered {
                data: format!("{}x{}", dimensions.width, dimensions.height).into_bytes(),
                dimensions,
            })
        }
    }

    #[test]
    fn dimensions_portrait_and_ratio() {
        let d = Dimensions::new(50, 200);
        assert!(d.is_portrait());
        assert_eq!(d.ratio(), 0.25);
        assert!(!Dimensions::new(500, 2).is_portrait());
        assert!(!Dimensions::new(10, 10).is_portrait());
    }

    #[test]
    fn image_info_applies_orientation() {
        let info = ImageInfo {
            stored: Dimensions::new(100, 200),
            transposed: true,
        };
        assert_eq!(info.dimensions(true), Dimensions::new(200, 100));
        assert_eq!(info.dimensions(false), Dimensions::new(100, 200));
    }

    #[test]
    fn mock_records_identify() {
        let backend = MockBackend::with_size(800, 600);
        let info = backend.identify(b"abc").unwrap();
        assert_eq!(info.stored, Dimensions::new(800, 600));
        assert_eq!(backend.get_operations(), vec![RecordedOp::Identify(3)]);
    }

    #[test]
    fn mock_failing_identify_errors() {
        let backend = MockBackend::failing();
        assert!(backend.identify(b"").is_err());
    }
}
