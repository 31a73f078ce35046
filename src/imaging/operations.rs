//! High-level image operations.
//!
//! These functions combine the pure calculations with resolved options to
//! produce a [`RenderParams`] plan for a backend. [`resolve_target`] is the
//! single place a geometry is turned into pixels; planning and
//! [`crate::options::resolve`] both go through it.

use super::backend::{Dimensions, ImageInfo};
use super::calculations::{
    Geometry, ParseError, calculate_crop_window, calculate_scale, clamp_cropbox, density_geometry,
};
use super::params::{
    Colorspace, Crop, CropBox, OutputFormat, Padding, Quality, RenderParams,
};

/// Option values that drive rendering, already parsed and validated.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub crop: Option<Crop>,
    pub cropbox: Option<CropBox>,
    pub upscale: bool,
    pub orientation: bool,
    pub colorspace: Colorspace,
    pub blur: Option<f32>,
    /// Letterbox color; `None` disables padding.
    pub padding: Option<[u8; 4]>,
    pub format: OutputFormat,
    pub quality: Quality,
    pub progressive: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            crop: None,
            cropbox: None,
            upscale: true,
            orientation: true,
            colorspace: Colorspace::Rgb,
            blur: None,
            padding: None,
            format: OutputFormat::Avif,
            quality: Quality::default(),
            progressive: true,
        }
    }
}

/// A render plan together with the geometry it was planned for.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRender {
    /// Requested target size, after filling in a missing dimension.
    pub target: (u32, u32),
    pub params: RenderParams,
}

/// Dimensions the geometry is resolved against: the cropbox when one is
/// set, otherwise the (optionally re-oriented) source.
pub fn source_frame(
    info: &ImageInfo,
    config: &RenderConfig,
) -> Result<(Dimensions, Option<CropBox>), ParseError> {
    let source = info.dimensions(config.orientation);
    match config.cropbox {
        Some(cropbox) => {
            let clamped = clamp_cropbox(cropbox, source.as_tuple()).ok_or_else(|| {
                ParseError::InvalidCropBox(format!(
                    "{},{},{},{} lies outside {}x{}",
                    cropbox.x, cropbox.y, cropbox.x2, cropbox.y2, source.width, source.height
                ))
            })?;
            Ok((
                Dimensions::new(clamped.width(), clamped.height()),
                Some(clamped),
            ))
        }
        None => Ok((source, None)),
    }
}

/// Geometry resolved against a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedTarget {
    /// What is scaled: the clamped cropbox, or the oriented source.
    pub frame: Dimensions,
    pub cropbox: Option<CropBox>,
    /// Output size, density applied.
    pub target: (u32, u32),
}

/// Fill in the geometry against the source frame and apply `density`.
pub fn resolve_target(
    info: &ImageInfo,
    geometry: Geometry,
    density: Option<f64>,
    config: &RenderConfig,
) -> Result<ResolvedTarget, ParseError> {
    let (frame, cropbox) = source_frame(info, config)?;
    let base = geometry.resolve(frame.ratio());
    let target = match density {
        Some(d) => density_geometry(base, d),
        None => base,
    };
    Ok(ResolvedTarget {
        frame,
        cropbox,
        target,
    })
}

/// Plan a render without executing it.
///
/// `density` multiplies the resolved target size (and pixel crop offsets)
/// for alternative-resolution variants.
pub fn plan_render(
    info: &ImageInfo,
    geometry: Geometry,
    density: Option<f64>,
    config: &RenderConfig,
) -> Result<PlannedRender, ParseError> {
    let ResolvedTarget {
        frame,
        cropbox,
        target,
    } = resolve_target(info, geometry, density, config)?;
    let crop = config
        .crop
        .map(|c| density.map_or(c, |d| c.scaled(d)));

    let scale = calculate_scale(frame.as_tuple(), target, crop.is_some(), config.upscale);
    let scaled = scale.unwrap_or(frame.as_tuple());
    let window = crop.and_then(|c| calculate_crop_window(scaled, target, c));

    Ok(PlannedRender {
        target,
        params: RenderParams {
            cropbox,
            orientation: config.orientation,
            colorspace: config.colorspace,
            scale,
            crop: window,
            blur: config.blur,
            padding: config.padding.map(|color| Padding {
                width: target.0,
                height: target.1,
                color,
            }),
            format: config.format,
            quality: config.quality,
            progressive: config.progressive,
        },
    })
}
