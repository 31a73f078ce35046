//! CLI output formatting.
//!
//! # Information-First Display
//!
//! The primary line for every thumbnail is its stored name, the identity a
//! user can look up in storage. URL, size and density variants follow as
//! indented context lines:
//!
//! ```text
//! cache/2cf22cf24dba5fb0a30e26e83b2ac5b9e29e.avif
//!     URL: /media/cache/2cf22cf24dba5fb0a30e26e83b2ac5b9e29e.avif
//!     Size: 50x50
//!     @2x: cache/2cf22cf24dba5fb0a30e26e83b2ac5b9e29e@2x.avif (100x100)
//! ```
//!
//! Dummy placeholders have no stored name and show `(placeholder)` instead.
//!
//! ## Batch
//!
//! ```text
//! 001 photos/a.jpg → cache/….avif (50x33)
//! 002 photos/b.jpg → failed: Source not found: photos/b.jpg
//!
//! Cache: 1 generated
//! 1 failed
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability; `main` prints the lines. Format functions are pure.

use crate::kvstore::CleanupReport;
use crate::options::Resolved;
use crate::thumbnail::{CacheStats, Thumbnail, ThumbnailError};

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn size_label(t: &Thumbnail) -> String {
    format!("{}x{}", t.width(), t.height())
}

fn name_or_placeholder(t: &Thumbnail) -> &str {
    t.name().unwrap_or("(placeholder)")
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

// ============================================================================
// Single thumbnail
// ============================================================================

pub fn format_thumbnail(t: &Thumbnail) -> Vec<String> {
    let mut lines = vec![name_or_placeholder(t).to_string()];
    lines.push(format!("{}URL: {}", indent(1), t.url()));
    lines.push(format!("{}Size: {}", indent(1), size_label(t)));
    for v in t.variants() {
        lines.push(format!(
            "{}@{}x: {} ({})",
            indent(1),
            crate::naming::format_density(v.density),
            name_or_placeholder(&v.thumbnail),
            size_label(&v.thumbnail)
        ));
    }
    lines
}

/// Lenient lookups that degraded to nothing.
pub fn format_missing(source: &str) -> Vec<String> {
    vec![format!("{} (no thumbnail)", source)]
}

/// Dry-run target of a request: size, fit mode, cropbox and variants.
pub fn format_resolved(source: &str, r: &Resolved) -> Vec<String> {
    let mode = if r.crop.is_some() { "crop" } else { "fit" };
    let mut lines = vec![format!("{} → {}x{} ({})", source, r.width, r.height, mode)];
    if let Some(b) = r.cropbox {
        lines.push(format!("{}Cropbox: {},{},{},{}", indent(1), b.x, b.y, b.x2, b.y2));
    }
    for &(density, width, height) in &r.densities {
        lines.push(format!(
            "{}@{}x: {}x{}",
            indent(1),
            crate::naming::format_density(density),
            width,
            height
        ));
    }
    lines
}

// ============================================================================
// Batch
// ============================================================================

/// One line per batch entry, in input order.
pub fn format_batch_item(
    index: usize,
    source: &str,
    result: &Result<Thumbnail, ThumbnailError>,
) -> String {
    match result {
        Ok(t) => format!(
            "{} {} → {} ({})",
            format_index(index),
            source,
            name_or_placeholder(t),
            size_label(t)
        ),
        Err(e) => format!("{} {} → failed: {}", format_index(index), source, e),
    }
}

pub fn format_batch_summary(stats: &CacheStats, failed: usize) -> Vec<String> {
    let mut lines = vec![String::new(), format!("Cache: {}", stats)];
    if failed > 0 {
        lines.push(format!("{} failed", failed));
    }
    lines
}

// ============================================================================
// Maintenance
// ============================================================================

pub fn format_delete(source: &str, removed: usize, files_deleted: bool) -> Vec<String> {
    let mut line = format!("{}: forgot {}", source, plural(removed, "thumbnail"));
    if files_deleted && removed > 0 {
        line.push_str(" and deleted the files");
    }
    vec![line]
}

pub fn format_cleanup(report: &CleanupReport) -> Vec<String> {
    vec![format!(
        "Cleanup: removed {}, pruned {}",
        plural(report.removed, "stale record"),
        plural(report.pruned, "thumbnail list")
    )]
}

pub fn format_clear(count: usize) -> Vec<String> {
    vec![format!("Cleared {}", plural(count, "metadata key"))]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::imaging::{Crop, CropBox};
    use crate::storage::Storage;
    use crate::options::OptionSet;
    use crate::test_helpers::*;

    fn thumbnail(densities: Vec<f64>) -> Thumbnail {
        let storage = RecordingStorage::new("out");
        storage.inner().write("a.jpg", b"bytes").unwrap();
        let s = Settings {
            alternative_resolutions: densities,
            ..settings()
        };
        memory_backend(s, storage, mock_engine(300, 200))
            .get_thumbnail("a.jpg", "60", &OptionSet::new())
            .unwrap()
    }

    fn placeholder() -> Thumbnail {
        let mut s = settings();
        s.dummy.enabled = true;
        memory_backend(s, RecordingStorage::new("out"), mock_engine(1, 1))
            .get_thumbnail("a.jpg", "200x100", &OptionSet::new())
            .unwrap()
    }

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(1000), "1000");
    }

    #[test]
    fn indent_levels() {
        assert_eq!(indent(0), "");
        assert_eq!(indent(2), "        ");
    }

    #[test]
    fn plural_forms() {
        assert_eq!(plural(1, "key"), "1 key");
        assert_eq!(plural(0, "key"), "0 keys");
    }

    // =========================================================================
    // Thumbnail display
    // =========================================================================

    #[test]
    fn thumbnail_lines() {
        let t = thumbnail(vec![2.0]);
        let lines = format_thumbnail(&t);
        let name = t.name().unwrap();
        assert_eq!(lines[0], name);
        assert_eq!(lines[1], format!("    URL: memory://out/{name}"));
        assert_eq!(lines[2], "    Size: 60x40");
        assert!(lines[3].starts_with("    @2x: test/cache/"));
        assert!(lines[3].ends_with("@2x.avif (120x80)"));
    }

    #[test]
    fn placeholder_lines() {
        let lines = format_thumbnail(&placeholder());
        assert_eq!(
            lines,
            vec![
                "(placeholder)",
                "    URL: https://dummyimage.com/200x100",
                "    Size: 200x100",
            ]
        );
    }

    // =========================================================================
    // Batch
    // =========================================================================

    #[test]
    fn batch_item_success_and_failure() {
        let ok = Ok(placeholder());
        assert_eq!(
            format_batch_item(1, "a.jpg", &ok),
            "001 a.jpg → (placeholder) (200x100)"
        );
        let err = Err(ThumbnailError::SourceNotFound("b.jpg".into()));
        assert_eq!(
            format_batch_item(2, "b.jpg", &err),
            "002 b.jpg → failed: Source not found: b.jpg"
        );
    }

    #[test]
    fn batch_summary_reports_failures() {
        let stats = CacheStats {
            hits: 0,
            adopted: 0,
            generated: 3,
        };
        assert_eq!(format_batch_summary(&stats, 0), vec!["", "Cache: 3 generated"]);
        assert_eq!(
            format_batch_summary(&stats, 2),
            vec!["", "Cache: 3 generated", "2 failed"]
        );
    }

    #[test]
    fn resolved_lines() {
        let r = Resolved {
            width: 50,
            height: 33,
            crop: None,
            cropbox: Some(CropBox {
                x: 0,
                y: 0,
                x2: 300,
                y2: 200,
            }),
            densities: vec![(1.5, 75, 50), (2.0, 100, 67)],
        };
        assert_eq!(
            format_resolved("a.jpg", &r),
            vec![
                "a.jpg → 50x33 (fit)",
                "    Cropbox: 0,0,300,200",
                "    @1.5x: 75x50",
                "    @2x: 100x67",
            ]
        );

        let cropped = Resolved {
            crop: Some(Crop::center()),
            cropbox: None,
            densities: Vec::new(),
            ..r
        };
        assert_eq!(format_resolved("a.jpg", &cropped), vec!["a.jpg → 50x33 (crop)"]);
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    #[test]
    fn delete_lines() {
        assert_eq!(
            format_delete("a.jpg", 2, true),
            vec!["a.jpg: forgot 2 thumbnails and deleted the files"]
        );
        assert_eq!(
            format_delete("a.jpg", 0, true),
            vec!["a.jpg: forgot 0 thumbnails"]
        );
        assert_eq!(
            format_delete("a.jpg", 1, false),
            vec!["a.jpg: forgot 1 thumbnail"]
        );
    }

    #[test]
    fn cleanup_and_clear_lines() {
        let report = CleanupReport {
            removed: 1,
            pruned: 2,
        };
        assert_eq!(
            format_cleanup(&report),
            vec!["Cleanup: removed 1 stale record, pruned 2 thumbnail lists"]
        );
        assert_eq!(format_clear(5), vec!["Cleared 5 metadata keys"]);
        assert_eq!(format_missing("x.jpg"), vec!["x.jpg (no thumbnail)"]);
    }
}
