//! Parameter types for image operations.
//!
//! These types describe *what* to render, not *how*. They are the interface
//! between the pure planning code in [`calculations`](super::calculations)
//! and the [`backend`](super::backend) that does the pixel work, so the
//! orchestrator can be tested against a mock backend.
//!
//! ## Types
//!
//! - [`Quality`]: lossy encoding quality (1–100, default 95). Clamped on construction.
//! - [`OutputFormat`]: encoded format of a thumbnail, with its file extension.
//! - [`Colorspace`]: pixel layout of the rendered image.
//! - [`Crop`] / [`CropOffset`]: parsed `crop` option.
//! - [`CropBox`]: explicit source rectangle applied before scaling.
//! - [`RenderParams`]: the full render plan handed to the backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(95)
    }
}

/// Encoded output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Gif,
    #[serde(rename = "WEBP")]
    WebP,
    Avif,
}

impl OutputFormat {
    /// Canonical option value, as it appears in keys and config files.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "JPEG",
            OutputFormat::Png => "PNG",
            OutputFormat::Gif => "GIF",
            OutputFormat::WebP => "WEBP",
            OutputFormat::Avif => "AVIF",
        }
    }

    /// File extension used for stored thumbnail names.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Gif => "gif",
            OutputFormat::WebP => "webp",
            OutputFormat::Avif => "avif",
        }
    }

    /// Guess the format from a file name's extension.
    pub fn from_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        ext.parse().ok()
    }

    pub fn supports_alpha(self) -> bool {
        !matches!(self, OutputFormat::Jpeg)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "JPEG" | "JPG" => Ok(OutputFormat::Jpeg),
            "PNG" => Ok(OutputFormat::Png),
            "GIF" => Ok(OutputFormat::Gif),
            "WEBP" => Ok(OutputFormat::WebP),
            "AVIF" => Ok(OutputFormat::Avif),
            other => Err(format!("unknown format: {other}")),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel layout of the rendered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Colorspace {
    Rgb,
    Rgba,
    Gray,
}

impl Colorspace {
    pub fn as_str(self) -> &'static str {
        match self {
            Colorspace::Rgb => "RGB",
            Colorspace::Rgba => "RGBA",
            Colorspace::Gray => "GRAY",
        }
    }
}

impl FromStr for Colorspace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RGB" => Ok(Colorspace::Rgb),
            "RGBA" => Ok(Colorspace::Rgba),
            "GRAY" | "L" => Ok(Colorspace::Gray),
            other => Err(format!("unknown colorspace: {other}")),
        }
    }
}

/// Offset of the crop window along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropOffset {
    /// Percentage of the slack (scaled size minus window size).
    Percent(u32),
    /// Absolute pixel offset, clamped to the slack.
    Pixels(u32),
}

/// Parsed `crop` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crop {
    /// Crop is requested but the image is left as scaled.
    Noop,
    /// Trim the lowest-entropy edges until the window fits.
    Smart,
    /// Fixed anchor, one offset per axis.
    Anchor { x: CropOffset, y: CropOffset },
}

impl Crop {
    pub fn center() -> Self {
        Crop::Anchor {
            x: CropOffset::Percent(50),
            y: CropOffset::Percent(50),
        }
    }

    /// Scale pixel offsets for a density variant; percentages are unitless.
    pub fn scaled(self, density: f64) -> Self {
        let scale = |offset: CropOffset| match offset {
            CropOffset::Pixels(px) => CropOffset::Pixels((px as f64 * density).round() as u32),
            percent => percent,
        };
        match self {
            Crop::Anchor { x, y } => Crop::Anchor {
                x: scale(x),
                y: scale(y),
            },
            other => other,
        }
    }
}

/// Explicit rectangle `(x, y)`–`(x2, y2)` in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CropBox {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y)
    }
}

/// Where the crop window sits inside the scaled image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropWindow {
    Region {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    Smart {
        width: u32,
        height: u32,
    },
}

/// Letterbox the rendered image onto a canvas of the requested geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub width: u32,
    pub height: u32,
    pub color: [u8; 4],
}

/// Full render plan for one artifact.
///
/// Steps run as: orientation, cropbox, colorspace, scale, crop, blur,
/// padding, then encode. The cropbox is expressed in oriented pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    pub cropbox: Option<CropBox>,
    /// Apply the EXIF orientation tag before anything else.
    pub orientation: bool,
    pub colorspace: Colorspace,
    /// Resize to exactly these dimensions; `None` keeps the current size.
    pub scale: Option<(u32, u32)>,
    pub crop: Option<CropWindow>,
    /// Gaussian blur sigma.
    pub blur: Option<f32>,
    pub padding: Option<Padding>,
    pub format: OutputFormat,
    pub quality: Quality,
    pub progressive: bool,
}
