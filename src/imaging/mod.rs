//! Image processing in pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image` decoders, `avif-parse` for AVIF headers |
//! | **Decode AVIF** | `rav1d` |
//! | **Resize** | Lanczos3 (`imageops::resize`) |
//! | **Encode** | `image` encoders (AVIF via rav1e, JPEG, PNG, WebP, GIF) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for geometry math (unit testable)
//! - **Parameters**: Data structures describing a render
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: Turning requested options into a concrete render plan

pub mod backend;
pub mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend, ImageInfo, Rendered};
pub use params::{
    Colorspace, Crop, CropBox, CropOffset, CropWindow, OutputFormat, Padding, Quality,
    RenderParams,
};
pub use rust_backend::RustBackend;
