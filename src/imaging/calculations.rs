//! Pure calculation functions for thumbnail geometry.
//!
//! All functions here are pure and testable without any I/O or images.
//! Scaled dimensions round half away from zero (`f64::round`) and never drop
//! below one pixel; crop offsets and margins truncate toward zero.

use super::params::{Crop, CropBox, CropOffset, CropWindow};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("geometry does not have the correct syntax: {0:?}")]
    InvalidGeometry(String),
    #[error("unrecognized crop option: {0:?}")]
    InvalidCrop(String),
    #[error("unrecognized cropbox option: {0:?}")]
    InvalidCropBox(String),
}

/// Requested geometry, either dimension optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Geometry {
    /// Fill in a missing dimension from the source aspect ratio (width / height).
    pub fn resolve(self, ratio: f64) -> (u32, u32) {
        match (self.width, self.height) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) => (w, round_dimension(w as f64 / ratio)),
            (None, Some(h)) => (round_dimension(h as f64 * ratio), h),
            // parse_geometry never yields this
            (None, None) => (1, 1),
        }
    }
}

/// Parse `"WxH"`, `"Wx"`, `"xH"` or a bare `"N"` (square).
///
/// # Examples
/// ```
/// # use thumbstore::imaging::calculations::{parse_geometry, Geometry};
/// assert_eq!(
///     parse_geometry("x66").unwrap(),
///     Geometry { width: None, height: Some(66) }
/// );
/// assert_eq!(
///     parse_geometry("32").unwrap(),
///     Geometry { width: Some(32), height: Some(32) }
/// );
/// ```
pub fn parse_geometry(geometry: &str) -> Result<Geometry, ParseError> {
    let invalid = || ParseError::InvalidGeometry(geometry.to_string());
    let dimension = |s: &str| -> Result<Option<u32>, ParseError> {
        if s.is_empty() {
            return Ok(None);
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        match s.parse::<u32>() {
            Ok(0) | Err(_) => Err(invalid()),
            Ok(v) => Ok(Some(v)),
        }
    };

    let trimmed = geometry.trim();
    let (width, height) = match trimmed.split_once('x') {
        Some((w, h)) => (dimension(w)?, dimension(h)?),
        None => {
            let n = dimension(trimmed)?;
            (n, n)
        }
    };
    if width.is_none() && height.is_none() {
        return Err(invalid());
    }
    Ok(Geometry { width, height })
}

/// Round a scaled dimension half away from zero, minimum 1.
pub fn round_dimension(value: f64) -> u32 {
    (value.round() as u32).max(1)
}

/// Target dimensions for a density variant.
pub fn density_geometry(target: (u32, u32), density: f64) -> (u32, u32) {
    (
        round_dimension(target.0 as f64 * density),
        round_dimension(target.1 as f64 * density),
    )
}

/// Parse a `crop` option.
///
/// Accepts `noop`, `smart`, one keyword (`center`, `top`, `bottom`, `left`,
/// `right`), or one or two `N%` / `Npx` tokens. A single axis keyword
/// centers the other axis; a single offset token applies to both axes.
pub fn parse_crop(crop: &str) -> Result<Crop, ParseError> {
    let invalid = || ParseError::InvalidCrop(crop.to_string());
    let tokens: Vec<&str> = crop.split_whitespace().collect();

    let (x, y) = match tokens.as_slice() {
        ["noop"] => return Ok(Crop::Noop),
        ["smart"] => return Ok(Crop::Smart),
        [single] => match *single {
            "left" | "right" => (*single, "center"),
            "top" | "bottom" => ("center", *single),
            other => (other, other),
        },
        [x, y] => (*x, *y),
        _ => return Err(invalid()),
    };

    let x = match x {
        "left" => "0%",
        "center" => "50%",
        "right" => "100%",
        other => other,
    };
    let y = match y {
        "top" => "0%",
        "center" => "50%",
        "bottom" => "100%",
        other => other,
    };

    Ok(Crop::Anchor {
        x: parse_offset(x).ok_or_else(invalid)?,
        y: parse_offset(y).ok_or_else(invalid)?,
    })
}

fn parse_offset(token: &str) -> Option<CropOffset> {
    if let Some(v) = token.strip_suffix('%') {
        return v.parse().ok().map(CropOffset::Percent);
    }
    if let Some(v) = token.strip_suffix("px") {
        return v.parse().ok().map(CropOffset::Pixels);
    }
    None
}

/// Parse a `cropbox` option: `"x,y,x2,y2"`.
pub fn parse_cropbox(cropbox: &str) -> Result<CropBox, ParseError> {
    let invalid = || ParseError::InvalidCropBox(cropbox.to_string());
    let values = cropbox
        .split(',')
        .map(|v| v.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;
    match values.as_slice() {
        [x, y, x2, y2] if x2 > x && y2 > y => Ok(CropBox {
            x: *x,
            y: *y,
            x2: *x2,
            y2: *y2,
        }),
        _ => Err(invalid()),
    }
}

/// Clamp a cropbox to the source bounds. `None` if nothing is left.
pub fn clamp_cropbox(cropbox: CropBox, source: (u32, u32)) -> Option<CropBox> {
    let clamped = CropBox {
        x: cropbox.x.min(source.0),
        y: cropbox.y.min(source.1),
        x2: cropbox.x2.min(source.0),
        y2: cropbox.y2.min(source.1),
    };
    (clamped.width() > 0 && clamped.height() > 0).then_some(clamped)
}

/// Calculate the scaled size for a target geometry.
///
/// The factor is the larger of the two axis ratios when cropping (cover)
/// and the smaller otherwise (fit). Returns `None` when no resize happens:
/// the factor is at least 1 and upscaling is off.
pub fn calculate_scale(
    source: (u32, u32),
    target: (u32, u32),
    crop: bool,
    upscale: bool,
) -> Option<(u32, u32)> {
    let (src_w, src_h) = (source.0 as f64, source.1 as f64);
    let factors = (target.0 as f64 / src_w, target.1 as f64 / src_h);
    let factor = if crop {
        factors.0.max(factors.1)
    } else {
        factors.0.min(factors.1)
    };

    if factor < 1.0 || upscale {
        let scaled = (round_dimension(src_w * factor), round_dimension(src_h * factor));
        (scaled != source).then_some(scaled)
    } else {
        None
    }
}

/// Offset along one axis, clamped to `[0, slack]`.
pub fn crop_offset(offset: CropOffset, slack: u32) -> u32 {
    match offset {
        CropOffset::Percent(p) => ((slack as f64 * p as f64 / 100.0) as u32).min(slack),
        CropOffset::Pixels(px) => px.min(slack),
    }
}

/// Place the crop window inside the scaled image.
///
/// The window never exceeds the scaled image. Returns `None` for `noop` or
/// when the window already covers the whole image.
pub fn calculate_crop_window(scaled: (u32, u32), target: (u32, u32), crop: Crop) -> Option<CropWindow> {
    let width = scaled.0.min(target.0);
    let height = scaled.1.min(target.1);
    if (width, height) == scaled {
        return None;
    }

    match crop {
        Crop::Noop => None,
        Crop::Smart => Some(CropWindow::Smart { width, height }),
        Crop::Anchor { x, y } => Some(CropWindow::Region {
            x: crop_offset(x, scaled.0 - width),
            y: crop_offset(y, scaled.1 - height),
            width,
            height,
        }),
    }
}

/// CSS margin `[top, right, bottom, left]` that centers an image of
/// `image` size inside a box of `frame` size. Odd remainders go to the
/// right and bottom.
pub fn calculate_margin(image: (u32, u32), frame: (u32, u32)) -> [i64; 4] {
    let ex = frame.0 as i64 - image.0 as i64;
    let ey = frame.1 as i64 - image.1 as i64;

    let half = |e: i64| (e as f64 / 2.0) as i64;
    let odd = |e: i64| ((e as f64 / 2.0) + if e % 2 != 0 { 1.0 } else { 0.0 }) as i64;

    [half(ey), odd(ex), odd(ey), half(ex)]
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // parse_geometry
    // =========================================================================

    #[test]
    fn geometry_both_dimensions() {
        assert_eq!(
            parse_geometry("400x300").unwrap(),
            Geometry {
                width: Some(400),
                height: Some(300)
            }
        );
    }

    #[test]
    fn geometry_width_only() {
        let g = parse_geometry("100x").unwrap();
        assert_eq!((g.width, g.height), (Some(100), None));
    }

    #[test]
    fn geometry_height_only() {
        let g = parse_geometry("x66").unwrap();
        assert_eq!((g.width, g.height), (None, Some(66)));
    }

    #[test]
    fn geometry_bare_integer_is_square() {
        let g = parse_geometry("32").unwrap();
        assert_eq!((g.width, g.height), (Some(32), Some(32)));
    }

    #[test]
    fn geometry_rejects_garbage() {
        for bad in ["", "x", "axb", "10x10x10", "-5x5", "0x10", "10 x 10"] {
            assert!(parse_geometry(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn geometry_resolve_from_ratio() {
        // 120x100 source asked for x66 → 79x66
        let g = parse_geometry("x66").unwrap();
        assert_eq!(g.resolve(120.0 / 100.0), (79, 66));
        // 100x120 source → 55x66
        assert_eq!(g.resolve(100.0 / 120.0), (55, 66));
    }

    #[test]
    fn geometry_resolve_never_zero() {
        let g = parse_geometry("1x").unwrap();
        assert_eq!(g.resolve(10.0), (1, 1));
    }

    #[test]
    fn density_geometry_rounds() {
        assert_eq!(density_geometry((50, 50), 1.5), (75, 75));
        assert_eq!(density_geometry((50, 50), 2.0), (100, 100));
        // 33 * 1.5 = 49.5 → 50 (half away from zero)
        assert_eq!(density_geometry((33, 33), 1.5), (50, 50));
    }

    // =========================================================================
    // parse_crop
    // =========================================================================

    #[test]
    fn crop_keywords() {
        assert_eq!(parse_crop("center").unwrap(), Crop::center());
        assert_eq!(parse_crop("smart").unwrap(), Crop::Smart);
        assert_eq!(parse_crop("noop").unwrap(), Crop::Noop);
        assert_eq!(
            parse_crop("top").unwrap(),
            Crop::Anchor {
                x: CropOffset::Percent(50),
                y: CropOffset::Percent(0)
            }
        );
        assert_eq!(
            parse_crop("right").unwrap(),
            Crop::Anchor {
                x: CropOffset::Percent(100),
                y: CropOffset::Percent(50)
            }
        );
    }

    #[test]
    fn crop_single_token_applies_to_both_axes() {
        assert_eq!(
            parse_crop("50px").unwrap(),
            Crop::Anchor {
                x: CropOffset::Pixels(50),
                y: CropOffset::Pixels(50)
            }
        );
    }

    #[test]
    fn crop_two_tokens() {
        assert_eq!(
            parse_crop("13% 89%").unwrap(),
            Crop::Anchor {
                x: CropOffset::Percent(13),
                y: CropOffset::Percent(89)
            }
        );
        assert_eq!(
            parse_crop("left bottom").unwrap(),
            Crop::Anchor {
                x: CropOffset::Percent(0),
                y: CropOffset::Percent(100)
            }
        );
    }

    #[test]
    fn crop_rejects_garbage() {
        for bad in ["", "middle", "1 2 3", "50", "10pt", "top left"] {
            assert!(parse_crop(bad).is_err(), "{bad:?} should fail");
        }
    }

    // =========================================================================
    // parse_cropbox / clamp_cropbox
    // =========================================================================

    #[test]
    fn cropbox_parses_four_values() {
        assert_eq!(
            parse_cropbox("0,50,100,150").unwrap(),
            CropBox {
                x: 0,
                y: 50,
                x2: 100,
                y2: 150
            }
        );
        assert!(parse_cropbox(" 0, 0, 10, 10 ").is_ok());
    }

    #[test]
    fn cropbox_rejects_bad_input() {
        for bad in ["0,0,100", "a,b,c,d", "10,10,5,20", "0,0,0,0"] {
            assert!(parse_cropbox(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn cropbox_clamps_to_source() {
        let b = parse_cropbox("50,0,300,100").unwrap();
        assert_eq!(
            clamp_cropbox(b, (200, 100)),
            Some(CropBox {
                x: 50,
                y: 0,
                x2: 200,
                y2: 100
            })
        );
        let outside = parse_cropbox("300,0,400,100").unwrap();
        assert_eq!(clamp_cropbox(outside, (200, 100)), None);
    }

    // =========================================================================
    // calculate_scale
    // =========================================================================

    #[test]
    fn scale_no_upscale_keeps_small_source() {
        // 100x100 into 400x300 without upscale stays 100x100
        assert_eq!(calculate_scale((100, 100), (400, 300), false, false), None);
    }

    #[test]
    fn scale_upscale_fits_inside() {
        assert_eq!(
            calculate_scale((100, 100), (400, 300), false, true),
            Some((300, 300))
        );
    }

    #[test]
    fn scale_crop_covers_target() {
        // 200x100 into 400x300 with crop and upscale → 600x300
        assert_eq!(
            calculate_scale((200, 100), (400, 300), true, true),
            Some((600, 300))
        );
        // without upscale nothing happens
        assert_eq!(calculate_scale((200, 100), (400, 300), true, false), None);
    }

    #[test]
    fn scale_downscale_preserves_aspect() {
        // 100x200 into 50x50 → 25x50
        assert_eq!(
            calculate_scale((100, 200), (50, 50), false, false),
            Some((25, 50))
        );
    }

    // =========================================================================
    // calculate_crop_window
    // =========================================================================

    #[test]
    fn crop_window_center() {
        assert_eq!(
            calculate_crop_window((600, 300), (400, 300), Crop::center()),
            Some(CropWindow::Region {
                x: 100,
                y: 0,
                width: 400,
                height: 300
            })
        );
    }

    #[test]
    fn crop_window_never_exceeds_scaled() {
        // 200x100 not upscaled, asked for 400x300: nothing to crop
        assert_eq!(
            calculate_crop_window((200, 100), (400, 300), Crop::center()),
            None
        );
    }

    #[test]
    fn crop_window_clamps_offsets() {
        // landscape 200x100 → 100x100 window, "50% 200%" clamps y to 0 slack
        let crop = parse_crop("50% 200%").unwrap();
        assert_eq!(
            calculate_crop_window((200, 100), (100, 100), crop),
            Some(CropWindow::Region {
                x: 50,
                y: 0,
                width: 100,
                height: 100
            })
        );
        let crop = parse_crop("50px 700px").unwrap();
        assert_eq!(
            calculate_crop_window((200, 100), (100, 100), crop),
            Some(CropWindow::Region {
                x: 50,
                y: 0,
                width: 100,
                height: 100
            })
        );
    }

    #[test]
    fn crop_window_bottom_of_portrait() {
        let crop = parse_crop("bottom").unwrap();
        assert_eq!(
            calculate_crop_window((100, 200), (100, 100), crop),
            Some(CropWindow::Region {
                x: 0,
                y: 100,
                width: 100,
                height: 100
            })
        );
    }

    #[test]
    fn crop_window_smart_and_noop() {
        assert_eq!(
            calculate_crop_window((64, 32), (32, 32), Crop::Smart),
            Some(CropWindow::Smart {
                width: 32,
                height: 32
            })
        );
        assert_eq!(calculate_crop_window((64, 32), (32, 32), Crop::Noop), None);
    }

    // =========================================================================
    // calculate_margin
    // =========================================================================

    #[test]
    fn margin_centers_image() {
        assert_eq!(calculate_margin((500, 500), (1000, 1000)), [250, 250, 250, 250]);
        assert_eq!(calculate_margin((500, 500), (800, 1000)), [250, 150, 250, 150]);
        assert_eq!(calculate_margin((500, 500), (500, 500)), [0, 0, 0, 0]);
    }

    #[test]
    fn margin_odd_remainder_goes_right_and_bottom() {
        assert_eq!(calculate_margin((500, 500), (500, 501)), [0, 0, 1, 0]);
        assert_eq!(calculate_margin((500, 500), (503, 500)), [0, 2, 0, 1]);
    }

    #[test]
    fn margin_negative_when_frame_is_smaller() {
        assert_eq!(
            calculate_margin((500, 500), (300, 300)),
            [-100, -100, -100, -100]
        );
    }
}
