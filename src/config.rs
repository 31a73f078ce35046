//! Settings module.
//!
//! Handles loading, validating, and merging `thumbstore.toml`. Stock
//! defaults are the base layer; a user file overrides any subset of keys.
//! The resulting [`Settings`] value is passed explicitly to the
//! [`ThumbnailBackend`](crate::thumbnail::ThumbnailBackend); nothing reads
//! configuration from global state.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! debug = false                 # propagate source/generation errors
//! prefix = "cache/"             # stored name prefix for thumbnails
//! engine = "image"              # codec engine
//! alternative_resolutions = []  # density variants, e.g. [1.5, 2]
//! url_timeout_secs = 30         # timeout for remote sources
//!
//! [storage]                     # where thumbnails are written
//! backend = "filesystem"
//! location = "media"
//! base_url = "/media/"
//!
//! [source_storage]              # where source names are resolved
//! backend = "filesystem"
//! location = "media"
//! base_url = "/media/"
//!
//! [kvstore]
//! backend = "json"              # "json" or "memory"
//! path = ".thumbstore/metadata.json"
//! key_prefix = "thumbstore"
//!
//! [options]                     # defaults merged under every request
//! format = "AVIF"
//! quality = 95
//! upscale = true
//! colorspace = "RGB"
//! orientation = true
//! progressive = true
//!
//! [dummy]
//! enabled = false
//! source = "https://dummyimage.com/{width}x{height}"
//! ratio = 1.5
//!
//! [processing]
//! max_processes = 4             # batch workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early, except inside
//! `[options]`, where any name is allowed and becomes part of the cache key.

use crate::options::{OptionSet, validate_densities};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// File name looked up in the working directory when `--config` is absent.
pub const CONFIG_FILENAME: &str = "thumbstore.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Settings loaded from `thumbstore.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Propagate source and generation errors instead of degrading.
    pub debug: bool,
    /// Prefix of every stored thumbnail name.
    pub prefix: String,
    /// Codec engine identifier.
    pub engine: String,
    /// Pixel density multipliers rendered next to every thumbnail.
    pub alternative_resolutions: Vec<f64>,
    /// Timeout for fetching `http(s)://` sources.
    pub url_timeout_secs: u64,
    /// Thumbnail storage.
    pub storage: StorageConfig,
    /// Storage source names resolve against.
    pub source_storage: StorageConfig,
    pub kvstore: KvStoreConfig,
    /// Default thumbnail options.
    pub options: OptionSet,
    pub dummy: DummyConfig,
    pub processing: ProcessingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            prefix: "cache/".to_string(),
            engine: "image".to_string(),
            alternative_resolutions: Vec::new(),
            url_timeout_secs: 30,
            storage: StorageConfig::default(),
            source_storage: StorageConfig::default(),
            kvstore: KvStoreConfig::default(),
            options: default_options(),
            dummy: DummyConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

fn default_options() -> OptionSet {
    OptionSet::new()
        .with("format", "AVIF")
        .with("quality", 95)
        .with("upscale", true)
        .with("colorspace", "RGB")
        .with("orientation", true)
        .with("progressive", true)
}

impl Settings {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::Validation("prefix must not be empty".into()));
        }
        if self.kvstore.key_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "kvstore.key_prefix must not be empty".into(),
            ));
        }
        validate_densities(&self.alternative_resolutions)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        if !(self.dummy.ratio.is_finite() && self.dummy.ratio > 0.0) {
            return Err(ConfigError::Validation(
                "dummy.ratio must be positive".into(),
            ));
        }
        self.options
            .render_config()
            .map_err(|e| ConfigError::Validation(format!("options: {e}")))?;
        Ok(())
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Registry identifier: `filesystem` or `memory`.
    pub backend: String,
    /// Root directory for `filesystem`; label for `memory`.
    pub location: String,
    /// URL prefix thumbnails are served under.
    pub base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "filesystem".to_string(),
            location: "media".to_string(),
            base_url: "/media/".to_string(),
        }
    }
}

/// Metadata store selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KvStoreConfig {
    /// Registry identifier: `json` or `memory`.
    pub backend: String,
    /// File used by the `json` backend.
    pub path: String,
    /// Namespace of every key this crate writes.
    pub key_prefix: String,
}

impl Default for KvStoreConfig {
    fn default() -> Self {
        Self {
            backend: "json".to_string(),
            path: ".thumbstore/metadata.json".to_string(),
            key_prefix: "thumbstore".to_string(),
        }
    }
}

/// Offline placeholder mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DummyConfig {
    pub enabled: bool,
    /// URL template with `{width}` and `{height}` placeholders.
    pub source: String,
    /// Width over height used when the geometry leaves one side open.
    pub ratio: f64,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            source: "https://dummyimage.com/{width}x{height}".to_string(),
            ratio: 1.5,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel batch workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(Settings::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Settings, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let settings: Settings = merged.try_into()?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from the file at `path`.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Settings, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `thumbstore.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# thumbstore configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error (except inside [options]).

# Propagate missing-source and generation errors instead of rendering nothing.
debug = false

# Prefix of every stored thumbnail name. May contain "/".
prefix = "cache/"

# Codec engine. Only "image" ships with thumbstore.
engine = "image"

# Extra pixel densities rendered next to every thumbnail, e.g. [1.5, 2].
# Variants are stored as <name>@1.5x.<ext>, <name>@2x.<ext>.
alternative_resolutions = []

# Timeout in seconds for http(s):// sources.
url_timeout_secs = 30

# ---------------------------------------------------------------------------
# Thumbnail storage
# ---------------------------------------------------------------------------
[storage]
# "filesystem" or "memory".
backend = "filesystem"
# Root directory (filesystem) or label (memory).
location = "media"
# URL prefix thumbnails are served under.
base_url = "/media/"

# ---------------------------------------------------------------------------
# Source storage: plain source names resolve against this.
# http:// and https:// sources are always fetched remotely.
# ---------------------------------------------------------------------------
[source_storage]
backend = "filesystem"
location = "media"
base_url = "/media/"

# ---------------------------------------------------------------------------
# Metadata store
# ---------------------------------------------------------------------------
[kvstore]
# "json" (persisted to `path`) or "memory" (per process).
backend = "json"
path = ".thumbstore/metadata.json"
# Namespace of every key written; `clear` removes only this namespace.
key_prefix = "thumbstore"

# ---------------------------------------------------------------------------
# Default thumbnail options, merged under every request.
# Spelling out a default in a request does not change its cache key.
# ---------------------------------------------------------------------------
[options]
# JPEG, PNG, GIF, WEBP or AVIF.
format = "AVIF"
# Lossy encoder quality, 1-100.
quality = 95
# Allow thumbnails larger than their source.
upscale = true
# RGB, RGBA or GRAY.
colorspace = "RGB"
# Apply the EXIF orientation tag.
orientation = true
progressive = true
# Other recognized options (no default):
# crop = "center"          # center, top, bottom, left, right, smart, noop, "10% 50%", "5px 0px"
# cropbox = "0,0,100,100"  # x,y,x2,y2 in source pixels
# blur = 2                 # Gaussian blur sigma
# padding = true           # letterbox onto the requested geometry
# padding_color = "#ffffff"

# ---------------------------------------------------------------------------
# Dummy mode: placeholder URLs, no storage or metadata access.
# ---------------------------------------------------------------------------
[dummy]
enabled = false
source = "https://dummyimage.com/{width}x{height}"
# Width over height used when the geometry leaves one side open.
ratio = 1.5

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for `batch` (omit for auto = CPU cores).
# max_processes = 4
"##
}
