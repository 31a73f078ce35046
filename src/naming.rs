//! Stored names for thumbnail artifacts.
//!
//! All artifacts follow one pattern:
//!
//! ```text
//! {prefix}{key[0..4]}{key}{suffix}.{ext}
//! ```
//!
//! - `prefix` comes from settings (`cache/` by default) and may contain `/`.
//! - `key[0..4]` repeats the first four hex characters of the key so that
//!   listings sort into stable buckets.
//! - `suffix` is empty for the base artifact and `@{density}x` for variants.
//! - `ext` follows the output format.
//!
//! Examples:
//! - `cache/f72bf72bf3cc30f735dc610ee69fca86d192.avif` (base)
//! - `cache/f72bf72bf3cc30f735dc610ee69fca86d192@1.5x.avif` (variant)

use crate::imaging::OutputFormat;
use crate::keys::ThumbnailKey;

/// Stored name of the artifact addressed by `key`.
pub fn thumbnail_name(prefix: &str, key: &ThumbnailKey, format: OutputFormat) -> String {
    let hash = key.hash();
    let bucket = &hash[..hash.len().min(4)];
    format!(
        "{}{}{}{}.{}",
        prefix,
        bucket,
        hash,
        key.suffix(),
        format.extension()
    )
}

/// Format a density multiplier without trailing zeros: `1.5`, `2`, `0.75`.
///
/// Uses the shortest text that parses back to the same value, so distinct
/// densities never share a suffix.
pub fn format_density(density: f64) -> String {
    density.to_string()
}

/// Insert `_{n}` before the extension: `a/b.avif` → `a/b_1.avif`.
pub fn numbered_name(name: &str, n: u32) -> String {
    let (dir, file) = match name.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, name),
    };
    let numbered = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{n}.{ext}"),
        _ => format!("{file}_{n}"),
    };
    match dir {
        Some(dir) => format!("{dir}/{numbered}"),
        None => numbered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ThumbnailKey {
        ThumbnailKey::derive("source", "options", None).unwrap()
    }

    #[test]
    fn base_name_repeats_bucket() {
        let k = key();
        let name = thumbnail_name("cache/", &k, OutputFormat::Avif);
        assert_eq!(name, format!("cache/{}{}.avif", &k.hash()[..4], k.hash()));
    }

    #[test]
    fn variant_name_carries_suffix() {
        let k = key().variant(1.5);
        let name = thumbnail_name("test/cache/", &k, OutputFormat::Avif);
        assert!(name.starts_with("test/cache/"));
        assert!(name.ends_with("@1.5x.avif"));
    }

    #[test]
    fn extension_follows_format() {
        let k = key();
        assert!(thumbnail_name("", &k, OutputFormat::Jpeg).ends_with(".jpg"));
        assert!(thumbnail_name("", &k, OutputFormat::WebP).ends_with(".webp"));
        assert!(thumbnail_name("", &k, OutputFormat::Png).ends_with(".png"));
    }

    #[test]
    fn density_formatting() {
        assert_eq!(format_density(1.5), "1.5");
        assert_eq!(format_density(2.0), "2");
        assert_eq!(format_density(0.75), "0.75");
        assert_eq!(format_density(3.0), "3");
    }

    #[test]
    fn close_densities_get_distinct_suffixes() {
        assert_eq!(format_density(1.0001), "1.0001");
        assert_ne!(format_density(1.0001), format_density(1.0004));
        assert_ne!(format_density(1.0), format_density(1.0001));
    }

    #[test]
    fn numbered_name_before_extension() {
        assert_eq!(numbered_name("cache/ab.avif", 1), "cache/ab_1.avif");
        assert_eq!(numbered_name("ab.avif", 2), "ab_2.avif");
        assert_eq!(numbered_name("cache.d/noext", 1), "cache.d/noext_1");
        assert_eq!(numbered_name(".hidden", 1), ".hidden_1");
    }
}
