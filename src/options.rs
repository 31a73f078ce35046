//! Thumbnail options: parsing, merging, canonical form and resolution.
//!
//! An [`OptionSet`] is a sorted map of option name to JSON value. Options
//! arrive from three places:
//!
//! - settings defaults (`[options]` in `thumbstore.toml`)
//! - library callers (`OptionSet::new().with("crop", "center")`)
//! - the CLI (`-o crop=center -o quality=80`, see [`OptionSet::parse_pair`])
//!
//! Defaults are merged *under* the caller's options before the canonical
//! form is computed, so spelling out a default changes nothing about the
//! key. Unknown option names are kept: they take part in the key but the
//! renderer ignores them.
//!
//! ## Recognized options
//!
//! | Option | Value | Effect |
//! |---|---|---|
//! | `crop` | `center`, `top`, `smart`, `noop`, `"10% 80%"`, `"5px 0px"` | crop to the exact geometry |
//! | `cropbox` | `"x,y,x2,y2"` | source rectangle applied before scaling |
//! | `upscale` | bool | allow scaling beyond the source size |
//! | `quality` | 1–100 | lossy encoder quality |
//! | `blur` | number > 0 | Gaussian blur sigma |
//! | `colorspace` | `RGB`, `RGBA`, `GRAY` | output pixel layout |
//! | `format` | `JPEG`, `PNG`, `GIF`, `WEBP`, `AVIF` | output format |
//! | `progressive` | bool | progressive encoding hint |
//! | `padding` | bool | letterbox onto the requested geometry |
//! | `padding_color` | `#rgb`, `#rrggbb`, `#rrggbbaa` | letterbox color |
//! | `orientation` | bool | apply the EXIF orientation tag |

use crate::imaging::calculations::{ParseError, parse_crop, parse_cropbox, parse_geometry};
use crate::imaging::operations::{RenderConfig, resolve_target};
use crate::imaging::{Colorspace, Crop, CropBox, ImageInfo, OutputFormat, Quality};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptionError {
    #[error("Invalid value for option '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("Malformed option '{0}', expected key=value")]
    MalformedPair(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

fn invalid(key: &str, reason: impl Into<String>) -> OptionError {
    OptionError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Whole-valued floats as integers, so `80.0` and `80` hash alike.
fn normalized(value: Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f)
                if !n.is_i64()
                    && !n.is_u64()
                    && f.fract() == 0.0
                    && f >= i64::MIN as f64
                    && f < i64::MAX as f64 =>
            {
                Value::from(f as i64)
            }
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalized).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, normalized(v))).collect())
        }
        other => other,
    }
}

/// Named thumbnail options in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionSet(BTreeMap<String, Value>);

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Parse a CLI style `key=value` pair.
    ///
    /// Values are typed the way a config file would type them: `true` and
    /// `false` become booleans, numeric text becomes a number, anything else
    /// stays a string.
    pub fn parse_pair(pair: &str) -> Result<(String, Value), OptionError> {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| OptionError::MalformedPair(pair.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(OptionError::MalformedPair(pair.to_string()));
        }
        let raw = raw.trim();
        let value = match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => {
                if let Ok(i) = raw.parse::<i64>() {
                    Value::from(i)
                } else if let Some(n) = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .and_then(serde_json::Number::from_f64)
                {
                    normalized(Value::Number(n))
                } else {
                    Value::String(raw.to_string())
                }
            }
        };
        Ok((key.to_string(), value))
    }

    /// Build a set from `key=value` pairs; later pairs win.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, OptionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for pair in pairs {
            let (key, value) = Self::parse_pair(pair.as_ref())?;
            set.0.insert(key, value);
        }
        Ok(set)
    }

    /// These options layered over `defaults`.
    pub fn merged_over(&self, defaults: &OptionSet) -> OptionSet {
        let mut merged = defaults.0.clone();
        merged.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        OptionSet(merged)
    }

    /// Canonical text form: `{"geometry":...,"options":{...}}` with sorted keys.
    pub fn canonical(&self, geometry: &str) -> String {
        let mut root = serde_json::Map::new();
        root.insert("geometry".into(), Value::String(geometry.trim().to_string()));
        root.insert(
            "options".into(),
            Value::Object(
                self.0
                    .iter()
                    .map(|(k, v)| (k.clone(), normalized(v.clone())))
                    .collect(),
            ),
        );
        Value::Object(root).to_string()
    }

    /// Output format, falling back to `fallback` when unset.
    pub fn format(&self, fallback: OutputFormat) -> Result<OutputFormat, OptionError> {
        match self.get("format") {
            Some(v) => string_value("format", v)?
                .parse()
                .map_err(|e: String| invalid("format", e)),
            None => Ok(fallback),
        }
    }

    /// Parse and validate every recognized option into a render config.
    pub fn render_config(&self) -> Result<RenderConfig, OptionError> {
        let defaults = RenderConfig::default();
        let crop = match self.get("crop") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(Value::Bool(true)) => Some(Crop::center()),
            Some(v) => Some(parse_crop(string_value("crop", v)?)?),
        };
        let cropbox = match self.get("cropbox") {
            None | Some(Value::Null) => None,
            Some(v) => Some(parse_cropbox(string_value("cropbox", v)?)?),
        };
        let quality = match self.get("quality") {
            Some(v) => {
                let q = number_value("quality", v)?;
                if !(1.0..=100.0).contains(&q) {
                    return Err(invalid("quality", "must be between 1 and 100"));
                }
                Quality::new(q.round() as u32)
            }
            None => defaults.quality,
        };
        let blur = match self.get("blur") {
            None | Some(Value::Null) => None,
            Some(v) => {
                let sigma = number_value("blur", v)?;
                if sigma <= 0.0 {
                    return Err(invalid("blur", "must be positive"));
                }
                Some(sigma as f32)
            }
        };
        let colorspace = match self.get("colorspace") {
            Some(v) => string_value("colorspace", v)?
                .parse::<Colorspace>()
                .map_err(|e| invalid("colorspace", e))?,
            None => defaults.colorspace,
        };
        let padding = if bool_value(self.get("padding"), "padding", false)? {
            let color = match self.get("padding_color") {
                Some(v) => parse_color(string_value("padding_color", v)?)
                    .ok_or_else(|| invalid("padding_color", "expected #rgb, #rrggbb or #rrggbbaa"))?,
                None => [255, 255, 255, 255],
            };
            Some(color)
        } else {
            None
        };

        Ok(RenderConfig {
            crop,
            cropbox,
            upscale: bool_value(self.get("upscale"), "upscale", defaults.upscale)?,
            orientation: bool_value(self.get("orientation"), "orientation", defaults.orientation)?,
            colorspace,
            blur,
            padding,
            format: self.format(defaults.format)?,
            quality,
            progressive: bool_value(self.get("progressive"), "progressive", defaults.progressive)?,
        })
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for OptionSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        OptionSet(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn string_value<'a>(key: &str, value: &'a Value) -> Result<&'a str, OptionError> {
    value
        .as_str()
        .ok_or_else(|| invalid(key, format!("expected a string, got {value}")))
}

fn number_value(key: &str, value: &Value) -> Result<f64, OptionError> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|f: &f64| f.is_finite())
        .ok_or_else(|| invalid(key, format!("expected a number, got {value}")))
}

fn bool_value(value: Option<&Value>, key: &str, default: bool) -> Result<bool, OptionError> {
    match value {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
        Some(other) => Err(invalid(key, format!("expected a boolean, got {other}"))),
    }
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`.
pub fn parse_color(s: &str) -> Option<[u8; 4]> {
    let hex = s.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |i: usize, len: usize| u8::from_str_radix(&hex[i * len..(i + 1) * len], 16).ok();
    match hex.len() {
        3 => {
            let c = |i| channel(i, 1).map(|v| v * 17);
            Some([c(0)?, c(1)?, c(2)?, 255])
        }
        6 => Some([channel(0, 2)?, channel(1, 2)?, channel(2, 2)?, 255]),
        8 => Some([channel(0, 2)?, channel(1, 2)?, channel(2, 2)?, channel(3, 2)?]),
        _ => None,
    }
}

/// Reject density multipliers that are not positive and finite.
pub fn validate_densities(densities: &[f64]) -> Result<(), OptionError> {
    if let Some(d) = densities.iter().find(|d| !d.is_finite() || **d <= 0.0) {
        return Err(invalid(
            "alternative_resolutions",
            format!("density {d} must be positive"),
        ));
    }
    for (i, d) in densities.iter().enumerate() {
        if densities[..i].contains(d) {
            return Err(invalid(
                "alternative_resolutions",
                format!("density {d} is listed twice"),
            ));
        }
    }
    Ok(())
}

/// Numeric target of a thumbnail request against a known source.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub width: u32,
    pub height: u32,
    pub crop: Option<Crop>,
    /// Cropbox clamped to the source bounds.
    pub cropbox: Option<CropBox>,
    /// `(density, width, height)` per variant, in configured order.
    pub densities: Vec<(f64, u32, u32)>,
}

/// Resolve a geometry and options against an identified source.
///
/// The source size is taken after EXIF orientation when the `orientation`
/// option is on, exactly as rendering does.
pub fn resolve(
    geometry: &str,
    options: &OptionSet,
    source: &ImageInfo,
    densities: &[f64],
) -> Result<Resolved, OptionError> {
    let geometry = parse_geometry(geometry)?;
    let config = options.render_config()?;
    validate_densities(densities)?;

    let base = resolve_target(source, geometry, None, &config)?;
    let densities = densities
        .iter()
        .map(|&d| {
            let (w, h) = resolve_target(source, geometry, Some(d), &config)?.target;
            Ok((d, w, h))
        })
        .collect::<Result<Vec<_>, ParseError>>()?;

    Ok(Resolved {
        width: base.target.0,
        height: base.target.1,
        crop: config.crop,
        cropbox: base.cropbox,
        densities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::{CropOffset, Dimensions};

    // =========================================================================
    // Parsing pairs
    // =========================================================================

    #[test]
    fn parse_pair_types_values() {
        assert_eq!(
            OptionSet::parse_pair("upscale=false").unwrap(),
            ("upscale".into(), Value::Bool(false))
        );
        assert_eq!(
            OptionSet::parse_pair("quality=80").unwrap(),
            ("quality".into(), Value::from(80))
        );
        assert_eq!(
            OptionSet::parse_pair("blur=1.5").unwrap(),
            ("blur".into(), Value::from(1.5))
        );
        assert_eq!(
            OptionSet::parse_pair("crop= center").unwrap(),
            ("crop".into(), Value::from("center"))
        );
    }

    #[test]
    fn parse_pair_rejects_missing_equals() {
        assert!(matches!(
            OptionSet::parse_pair("crop"),
            Err(OptionError::MalformedPair(_))
        ));
        assert!(OptionSet::parse_pair("=center").is_err());
    }

    #[test]
    fn from_pairs_later_wins() {
        let set = OptionSet::from_pairs(["quality=50", "quality=60"]).unwrap();
        assert_eq!(set.get("quality"), Some(&Value::from(60)));
    }

    // =========================================================================
    // Canonical form
    // =========================================================================

    #[test]
    fn canonical_ignores_insertion_order() {
        let a = OptionSet::new().with("crop", "center").with("quality", 80);
        let b = OptionSet::new().with("quality", 80).with("crop", "center");
        assert_eq!(a.canonical("50x50"), b.canonical("50x50"));
        assert_eq!(
            a.canonical("50x50"),
            r#"{"geometry":"50x50","options":{"crop":"center","quality":80}}"#
        );
    }

    #[test]
    fn whole_floats_canonicalize_as_integers() {
        assert_eq!(
            OptionSet::parse_pair("quality=80.0").unwrap(),
            ("quality".into(), Value::from(80))
        );
        let int = OptionSet::from_pairs(["quality=80"]).unwrap();
        let parsed = OptionSet::from_pairs(["quality=80.0"]).unwrap();
        let built = OptionSet::new().with("quality", 80.0);
        assert_eq!(int.canonical("50"), parsed.canonical("50"));
        assert_eq!(int.canonical("50"), built.canonical("50"));
        assert_ne!(
            int.canonical("50"),
            OptionSet::new().with("quality", 80.5).canonical("50")
        );
    }

    #[test]
    fn explicit_default_hashes_like_omitted() {
        let defaults = OptionSet::new().with("format", "AVIF").with("quality", 95);
        let explicit = OptionSet::new().with("quality", 95).merged_over(&defaults);
        let omitted = OptionSet::new().merged_over(&defaults);
        assert_eq!(explicit.canonical("100"), omitted.canonical("100"));
    }

    #[test]
    fn caller_overrides_defaults() {
        let defaults = OptionSet::new().with("quality", 95);
        let merged = OptionSet::new().with("quality", 40).merged_over(&defaults);
        assert_eq!(merged.get("quality"), Some(&Value::from(40)));
    }

    #[test]
    fn unknown_options_change_canonical_form() {
        let plain = OptionSet::new();
        let extra = OptionSet::new().with("watermark", "logo");
        assert_ne!(plain.canonical("50"), extra.canonical("50"));
        assert!(extra.render_config().is_ok());
    }

    // =========================================================================
    // Render config
    // =========================================================================

    #[test]
    fn empty_set_uses_render_defaults() {
        assert_eq!(
            OptionSet::new().render_config().unwrap(),
            RenderConfig::default()
        );
    }

    #[test]
    fn render_config_parses_everything() {
        let set = OptionSet::new()
            .with("crop", "left")
            .with("cropbox", "0,0,10,10")
            .with("upscale", false)
            .with("quality", 70)
            .with("blur", 2)
            .with("colorspace", "gray")
            .with("format", "png")
            .with("progressive", false)
            .with("padding", true)
            .with("padding_color", "#000")
            .with("orientation", false);
        let config = set.render_config().unwrap();
        assert_eq!(
            config.crop,
            Some(Crop::Anchor {
                x: CropOffset::Percent(0),
                y: CropOffset::Percent(50)
            })
        );
        assert_eq!(config.cropbox.unwrap().width(), 10);
        assert!(!config.upscale);
        assert_eq!(config.quality.value(), 70);
        assert_eq!(config.blur, Some(2.0));
        assert_eq!(config.colorspace, Colorspace::Gray);
        assert_eq!(config.format, OutputFormat::Png);
        assert!(!config.progressive);
        assert_eq!(config.padding, Some([0, 0, 0, 255]));
        assert!(!config.orientation);
    }

    #[test]
    fn render_config_rejects_bad_values() {
        for set in [
            OptionSet::new().with("quality", 0),
            OptionSet::new().with("quality", "high"),
            OptionSet::new().with("blur", -1),
            OptionSet::new().with("format", "bmp"),
            OptionSet::new().with("colorspace", "CMYK"),
            OptionSet::new().with("upscale", 3),
            OptionSet::new().with("padding", true).with("padding_color", "red"),
        ] {
            assert!(
                matches!(set.render_config(), Err(OptionError::InvalidValue { .. })),
                "{set:?}"
            );
        }
    }

    #[test]
    fn render_config_surfaces_parse_errors() {
        let set = OptionSet::new().with("crop", "diagonal");
        assert!(matches!(
            set.render_config(),
            Err(OptionError::Parse(ParseError::InvalidCrop(_)))
        ));
        let set = OptionSet::new().with("cropbox", "10,10,5,5");
        assert!(matches!(
            set.render_config(),
            Err(OptionError::Parse(ParseError::InvalidCropBox(_)))
        ));
    }

    #[test]
    fn colors() {
        assert_eq!(parse_color("#fff"), Some([255, 255, 255, 255]));
        assert_eq!(parse_color("#102030"), Some([16, 32, 48, 255]));
        assert_eq!(parse_color("#10203080"), Some([16, 32, 48, 128]));
        assert_eq!(parse_color("fff"), None);
        assert_eq!(parse_color("#ggg"), None);
    }

    // =========================================================================
    // Resolve
    // =========================================================================

    fn source(width: u32, height: u32) -> ImageInfo {
        ImageInfo {
            stored: Dimensions::new(width, height),
            transposed: false,
        }
    }

    #[test]
    fn resolve_fills_missing_dimension() {
        let r = resolve("x66", &OptionSet::new(), &source(120, 100), &[]).unwrap();
        assert_eq!((r.width, r.height), (79, 66));
    }

    #[test]
    fn resolve_uses_cropbox_ratio() {
        let set = OptionSet::new().with("cropbox", "0,0,100,50");
        let r = resolve("200", &set, &source(400, 400), &[]).unwrap();
        assert_eq!((r.width, r.height), (200, 200));
        let r = resolve("200x", &set, &source(400, 400), &[]).unwrap();
        assert_eq!((r.width, r.height), (200, 100));
    }

    #[test]
    fn resolve_lists_density_variants() {
        let r = resolve("50x50", &OptionSet::new(), &source(500, 500), &[1.5, 2.0]).unwrap();
        assert_eq!(r.densities, vec![(1.5, 75, 75), (2.0, 100, 100)]);
    }

    #[test]
    fn resolve_rejects_bad_input() {
        assert!(matches!(
            resolve("50x50x50", &OptionSet::new(), &source(10, 10), &[]),
            Err(OptionError::Parse(ParseError::InvalidGeometry(_)))
        ));
        assert!(resolve("50", &OptionSet::new(), &source(10, 10), &[0.0]).is_err());
        assert!(resolve("50", &OptionSet::new(), &source(10, 10), &[f64::NAN]).is_err());
        assert!(resolve("50", &OptionSet::new(), &source(10, 10), &[2.0, 1.5, 2.0]).is_err());
        let set = OptionSet::new().with("cropbox", "500,500,600,600");
        assert!(resolve("50", &set, &source(100, 100), &[]).is_err());
    }

    #[test]
    fn resolve_applies_orientation() {
        let rotated = ImageInfo {
            stored: Dimensions::new(100, 200),
            transposed: true,
        };
        let r = resolve("x50", &OptionSet::new(), &rotated, &[2.0]).unwrap();
        assert_eq!((r.width, r.height), (100, 50));
        assert_eq!(r.densities, vec![(2.0, 200, 100)]);

        let unrotated = OptionSet::new().with("orientation", false);
        let r = resolve("x50", &unrotated, &rotated, &[]).unwrap();
        assert_eq!((r.width, r.height), (25, 50));
    }
}
