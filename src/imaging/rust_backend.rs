//! Pure Rust codec backend: everything statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, TIFF, WebP) | `image` crate decoders, EXIF orientation via `ImageDecoder::orientation` |
//! | Decode (AVIF) | `avif-parse` (container) + `rav1d` (AV1 decode) + BT.601 YUV→RGB |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Smart crop | edge trimming by luma histogram entropy |
//! | Blur | `DynamicImage::blur` |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//! | Encode → JPEG / PNG / WebP / GIF | `image` crate encoders |
//!
//! JPEG output is always baseline: the `image` encoder has no progressive
//! mode, so the `progressive` option only participates in the cache key.

use super::backend::{BackendError, Dimensions, ImageBackend, ImageInfo, Rendered};
use super::params::{Colorspace, CropWindow, OutputFormat, Padding, RenderParams};
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// ISO-BMFF `ftyp` box with an AVIF brand.
fn is_avif(data: &[u8]) -> bool {
    data.len() >= 12 && &data[4..8] == b"ftyp" && matches!(&data[8..12], b"avif" | b"avis")
}

fn is_transposed(orientation: Orientation) -> bool {
    matches!(
        orientation,
        Orientation::Rotate90
            | Orientation::Rotate270
            | Orientation::Rotate90FlipH
            | Orientation::Rotate270FlipH
    )
}

fn decode_failed(e: impl std::fmt::Display) -> BackendError {
    BackendError::ProcessingFailed(format!("Failed to decode image: {e}"))
}

/// Decode bytes into an image plus its EXIF orientation.
fn load_image(data: &[u8]) -> Result<(DynamicImage, Orientation), BackendError> {
    if is_avif(data) {
        return Ok((decode_avif(data)?, Orientation::NoTransforms));
    }
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    if reader.format().is_none() {
        return Err(BackendError::Unsupported("unrecognized image format".into()));
    }
    let mut decoder = reader.into_decoder().map_err(decode_failed)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let img = DynamicImage::from_decoder(decoder).map_err(decode_failed)?;
    Ok((img, orientation))
}

/// Extract dimensions from an AVIF container (no full decode needed).
fn identify_avif(data: &[u8]) -> Result<Dimensions, BackendError> {
    let avif = avif_parse::read_avif(&mut Cursor::new(data))
        .map_err(|e| BackendError::ProcessingFailed(format!("Failed to parse AVIF: {e:?}")))?;
    let meta = avif.primary_item_metadata().map_err(|e| {
        BackendError::ProcessingFailed(format!("Failed to read AVIF metadata: {e:?}"))
    })?;
    Ok(Dimensions::new(
        meta.max_frame_width.get(),
        meta.max_frame_height.get(),
    ))
}

/// Decode an AVIF payload using avif-parse (container) + rav1d (AV1 decode).
///
/// The `image` crate's `"avif"` feature only provides the encoder; its
/// decoder needs the dav1d C library, so the pure Rust port is driven here.
fn decode_avif(data: &[u8]) -> Result<DynamicImage, BackendError> {
    use rav1d::include::dav1d::data::Dav1dData;
    use rav1d::include::dav1d::dav1d::Dav1dSettings;
    use rav1d::include::dav1d::headers::{
        DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
        DAV1D_PIXEL_LAYOUT_I444,
    };
    use rav1d::include::dav1d::picture::Dav1dPicture;
    use rav1d::src::lib as dav1d;
    use std::ptr::NonNull;

    let avif = avif_parse::read_avif(&mut Cursor::new(data))
        .map_err(|e| BackendError::ProcessingFailed(format!("Failed to parse AVIF: {e:?}")))?;
    let av1: &[u8] = &avif.primary_item;
    let failed = |what: &str, rc: i32| {
        BackendError::ProcessingFailed(format!("rav1d {what} failed ({rc})"))
    };

    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    let Some(settings_ptr) = NonNull::new(settings.as_mut_ptr()) else {
        return Err(failed("default_settings", -1));
    };
    unsafe { dav1d::dav1d_default_settings(settings_ptr) };
    let mut settings = unsafe { settings.assume_init() };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    let rc = unsafe { dav1d::dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(failed("open", rc.0));
    }

    let mut input = Dav1dData::default();
    let buf = unsafe { dav1d::dav1d_data_create(NonNull::new(&mut input), av1.len()) };
    if buf.is_null() {
        unsafe { dav1d::dav1d_close(NonNull::new(&mut ctx)) };
        return Err(failed("data_create", -1));
    }
    unsafe { std::ptr::copy_nonoverlapping(av1.as_ptr(), buf, av1.len()) };

    let rc = unsafe { dav1d::dav1d_send_data(ctx, NonNull::new(&mut input)) };
    if rc.0 != 0 {
        unsafe {
            dav1d::dav1d_data_unref(NonNull::new(&mut input));
            dav1d::dav1d_close(NonNull::new(&mut ctx));
        }
        return Err(failed("send_data", rc.0));
    }

    let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
    let rc = unsafe { dav1d::dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
    if rc.0 != 0 {
        unsafe { dav1d::dav1d_close(NonNull::new(&mut ctx)) };
        return Err(failed("get_picture", rc.0));
    }

    let layout = pic.p.layout;
    let subsampling = match layout {
        DAV1D_PIXEL_LAYOUT_I400 => None,
        DAV1D_PIXEL_LAYOUT_I420 => Some((true, true)),
        DAV1D_PIXEL_LAYOUT_I422 => Some((true, false)),
        DAV1D_PIXEL_LAYOUT_I444 => Some((false, false)),
        _ => {
            unsafe {
                dav1d::dav1d_picture_unref(NonNull::new(&mut pic));
                dav1d::dav1d_close(NonNull::new(&mut ctx));
            }
            return Err(BackendError::Unsupported(format!(
                "AVIF pixel layout {layout}"
            )));
        }
    };

    let plane = |i: usize| {
        pic.data[i]
            .map(|p| p.as_ptr() as *const u8)
            .unwrap_or(std::ptr::null())
    };
    let planes = YuvPlanes {
        y: plane(0),
        u: plane(1),
        v: plane(2),
        y_stride: pic.stride[0],
        uv_stride: pic.stride[1],
        width: pic.p.w as u32,
        height: pic.p.h as u32,
        bpc: pic.p.bpc as u32,
        subsampling,
    };
    let decoded = if planes.y.is_null() {
        None
    } else {
        planes.to_image()
    };

    unsafe {
        dav1d::dav1d_picture_unref(NonNull::new(&mut pic));
        dav1d::dav1d_close(NonNull::new(&mut ctx));
    }

    decoded.ok_or_else(|| BackendError::ProcessingFailed("AVIF picture has no pixel data".into()))
}

/// Borrowed YUV planes of a decoded rav1d picture.
struct YuvPlanes {
    y: *const u8,
    u: *const u8,
    v: *const u8,
    y_stride: isize,
    uv_stride: isize,
    width: u32,
    height: u32,
    bpc: u32,
    /// Chroma subsampling (horizontal, vertical); `None` for monochrome.
    subsampling: Option<(bool, bool)>,
}

impl YuvPlanes {
    /// Sample one plane value, 8-bit or 16-bit storage.
    fn sample(&self, plane: *const u8, stride: isize, x: u32, y: u32) -> f32 {
        if self.bpc <= 8 {
            (unsafe { *plane.offset(y as isize * stride + x as isize) }) as f32
        } else {
            let offset = y as isize * stride + x as isize * 2;
            (unsafe { *(plane.offset(offset) as *const u16) }) as f32
        }
    }

    /// Convert to an 8-bit image with BT.601 coefficients.
    fn to_image(&self) -> Option<DynamicImage> {
        let max = ((1u32 << self.bpc) - 1) as f32;
        let center = (1u32 << (self.bpc - 1)) as f32;
        let scale = 255.0 / max;
        let to_u8 = |v: f32| (v * scale).clamp(0.0, 255.0) as u8;

        let Some((ss_x, ss_y)) = self.subsampling else {
            let luma = image::GrayImage::from_fn(self.width, self.height, |x, y| {
                image::Luma([to_u8(self.sample(self.y, self.y_stride, x, y))])
            });
            return Some(DynamicImage::ImageLuma8(luma));
        };
        if self.u.is_null() || self.v.is_null() {
            return None;
        }

        let rgb = image::RgbImage::from_fn(self.width, self.height, |x, y| {
            let luma = self.sample(self.y, self.y_stride, x, y);
            let cx = if ss_x { x / 2 } else { x };
            let cy = if ss_y { y / 2 } else { y };
            let cb = self.sample(self.u, self.uv_stride, cx, cy) - center;
            let cr = self.sample(self.v, self.uv_stride, cx, cy) - center;
            image::Rgb([
                to_u8(luma + 1.402 * cr),
                to_u8(luma - 0.344136 * cb - 0.714136 * cr),
                to_u8(luma + 1.772 * cb),
            ])
        });
        Some(DynamicImage::ImageRgb8(rgb))
    }
}

fn convert_colorspace(img: DynamicImage, colorspace: Colorspace) -> DynamicImage {
    match colorspace {
        // RGB keeps an existing alpha channel; the encoder drops it when
        // the output format cannot carry it.
        Colorspace::Rgb if img.color().has_alpha() => DynamicImage::ImageRgba8(img.to_rgba8()),
        Colorspace::Rgb => DynamicImage::ImageRgb8(img.to_rgb8()),
        Colorspace::Rgba => DynamicImage::ImageRgba8(img.to_rgba8()),
        Colorspace::Gray => DynamicImage::ImageLuma8(img.to_luma8()),
    }
}

/// Shannon entropy of the luma histogram.
fn entropy(img: &DynamicImage) -> f64 {
    let luma = img.to_luma8();
    let mut histogram = [0u64; 256];
    for p in luma.pixels() {
        histogram[p.0[0] as usize] += 1;
    }
    let total = luma.pixels().len() as f64;
    if total == 0.0 {
        return 0.0;
    }
    histogram
        .iter()
        .filter(|&&n| n > 0)
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Trim up to 10px strips from whichever edge carries less information
/// until the image fits the window.
fn smart_crop(mut img: DynamicImage, width: u32, height: u32) -> DynamicImage {
    while img.width() > width {
        let (w, h) = (img.width(), img.height());
        let slice = (w - width).min(10);
        let left = img.crop_imm(0, 0, slice, h);
        let right = img.crop_imm(w - slice, 0, slice, h);
        img = if entropy(&left) < entropy(&right) {
            img.crop_imm(slice, 0, w - slice, h)
        } else {
            img.crop_imm(0, 0, w - slice, h)
        };
    }
    while img.height() > height {
        let (w, h) = (img.width(), img.height());
        let slice = (h - height).min(10);
        let top = img.crop_imm(0, 0, w, slice);
        let bottom = img.crop_imm(0, h - slice, w, slice);
        img = if entropy(&top) < entropy(&bottom) {
            img.crop_imm(0, slice, w, h - slice)
        } else {
            img.crop_imm(0, 0, w, h - slice)
        };
    }
    img
}

fn pad(img: DynamicImage, padding: Padding) -> DynamicImage {
    if (img.width(), img.height()) == (padding.width, padding.height) {
        return img;
    }
    let mut canvas =
        image::RgbaImage::from_pixel(padding.width, padding.height, image::Rgba(padding.color));
    let x = (padding.width as i64 - img.width() as i64) / 2;
    let y = (padding.height as i64 - img.height() as i64) / 2;
    image::imageops::overlay(&mut canvas, &img.to_rgba8(), x, y);
    DynamicImage::ImageRgba8(canvas)
}

/// Encode into the requested format, dropping alpha where unsupported.
fn encode(img: &DynamicImage, params: &RenderParams) -> Result<Vec<u8>, BackendError> {
    let encode_failed = |e: image::ImageError| {
        BackendError::ProcessingFailed(format!("{} encode failed: {e}", params.format))
    };
    let quality = params.quality.value() as u8;
    let has_alpha = img.color().has_alpha();
    let flattened = if has_alpha && !params.format.supports_alpha() {
        DynamicImage::ImageRgb8(img.to_rgb8())
    } else {
        img.clone()
    };

    let mut buf = Vec::new();
    match params.format {
        OutputFormat::Jpeg => {
            let flattened = match flattened {
                gray @ DynamicImage::ImageLuma8(_) => gray,
                other => DynamicImage::ImageRgb8(other.to_rgb8()),
            };
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
            flattened.write_with_encoder(encoder).map_err(encode_failed)?;
        }
        OutputFormat::Png => {
            let encoder = image::codecs::png::PngEncoder::new(&mut buf);
            flattened.write_with_encoder(encoder).map_err(encode_failed)?;
        }
        OutputFormat::WebP => {
            let rgb = if has_alpha {
                DynamicImage::ImageRgba8(flattened.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(flattened.to_rgb8())
            };
            let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut buf);
            rgb.write_with_encoder(encoder).map_err(encode_failed)?;
        }
        OutputFormat::Gif => {
            let rgba = DynamicImage::ImageRgba8(flattened.to_rgba8());
            let mut cursor = Cursor::new(&mut buf);
            rgba.write_to(&mut cursor, ImageFormat::Gif)
                .map_err(encode_failed)?;
        }
        OutputFormat::Avif => {
            let rgb = if has_alpha {
                DynamicImage::ImageRgba8(flattened.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(flattened.to_rgb8())
            };
            let encoder =
                image::codecs::avif::AvifEncoder::new_with_speed_quality(&mut buf, 6, quality);
            rgb.write_with_encoder(encoder).map_err(encode_failed)?;
        }
    }
    Ok(buf)
}

impl ImageBackend for RustBackend {
    fn identify(&self, data: &[u8]) -> Result<ImageInfo, BackendError> {
        if is_avif(data) {
            return Ok(ImageInfo {
                stored: identify_avif(data)?,
                transposed: false,
            });
        }
        let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
        if reader.format().is_none() {
            return Err(BackendError::Unsupported("unrecognized image format".into()));
        }
        let mut decoder = reader.into_decoder().map_err(decode_failed)?;
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let (width, height) = decoder.dimensions();
        Ok(ImageInfo {
            stored: Dimensions::new(width, height),
            transposed: is_transposed(orientation),
        })
    }

    fn render(&self, data: &[u8], params: &RenderParams) -> Result<Rendered, BackendError> {
        let (mut img, orientation) = load_image(data)?;

        if params.orientation {
            img.apply_orientation(orientation);
        }
        if let Some(b) = params.cropbox {
            img = img.crop_imm(b.x, b.y, b.width(), b.height());
        }
        img = convert_colorspace(img, params.colorspace);
        if let Some((w, h)) = params.scale {
            img = img.resize_exact(w, h, FilterType::Lanczos3);
        }
        img = match params.crop {
            Some(CropWindow::Region {
                x,
                y,
                width,
                height,
            }) => img.crop_imm(x, y, width, height),
            Some(CropWindow::Smart { width, height }) => smart_crop(img, width, height),
            None => img,
        };
        if let Some(sigma) = params.blur {
            img = img.blur(sigma);
        }
        if let Some(padding) = params.padding {
            img = pad(img, padding);
        }

        let dimensions = Dimensions::new(img.width(), img.height());
        let data = encode(&img, params)?;
        Ok(Rendered { data, dimensions })
    }
}
