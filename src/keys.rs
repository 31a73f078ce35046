//! Deterministic cache keys for sources and thumbnails.
//!
//! Every stored artifact is addressed by a key derived from *what* it is,
//! never from when or where it was produced:
//!
//! - **Source key**: SHA-256 of the normalized source name and the identity
//!   of the storage it lives in. `a.png` and `/media/a.png` under a
//!   filesystem storage rooted at `/media` normalize to the same name, so
//!   they share a key.
//!
//! - **Thumbnail key**: SHA-256 of the source key and the canonical option
//!   form (see [`OptionSet::canonical`](crate::options::OptionSet::canonical)).
//!   Density variants carry a lexical `@{d}x` suffix on top of the base
//!   hash, so a variant never collides with its base and each is
//!   addressable on its own.
//!
//! Hashes are truncated to [`KEY_LEN`] hex characters. Nothing here reads
//! the clock, the process id, or the iteration order of a hash map.

use crate::naming::format_density;
use crate::storage::StorageId;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Number of hex characters kept from each SHA-256 digest.
pub const KEY_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid reference: {0}")]
    InvalidReference(String),
}

/// SHA-256 of `input`, truncated to [`KEY_LEN`] hex characters.
pub fn tokey(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(KEY_LEN);
    hex
}

/// Key for a source image: `tokey(name + "+" + storage tag)`.
pub fn source_key(name: &str, storage: &StorageId) -> Result<String, KeyError> {
    if name.trim().is_empty() {
        return Err(KeyError::InvalidReference("empty source name".into()));
    }
    Ok(tokey(&format!("{}+{}", name, storage.tag())))
}

/// Key of a thumbnail, optionally for a density variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailKey {
    hash: String,
    density: Option<f64>,
}

impl ThumbnailKey {
    /// Derive the key for `source_key` rendered with `canonical_options`.
    pub fn derive(
        source_key: &str,
        canonical_options: &str,
        density: Option<f64>,
    ) -> Result<Self, KeyError> {
        if source_key.is_empty() {
            return Err(KeyError::InvalidReference("empty source key".into()));
        }
        Ok(Self {
            hash: tokey(&format!("{}+{}", source_key, canonical_options)),
            density,
        })
    }

    /// The same thumbnail at another pixel density.
    pub fn variant(&self, density: f64) -> Self {
        Self {
            hash: self.hash.clone(),
            density: Some(density),
        }
    }

    /// Hash shared by the base artifact and all of its variants.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn density(&self) -> Option<f64> {
        self.density
    }

    /// `@1.5x` style suffix; empty for the base artifact.
    pub fn suffix(&self) -> String {
        match self.density {
            Some(d) => format!("@{}x", format_density(d)),
            None => String::new(),
        }
    }
}

impl fmt::Display for ThumbnailKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.hash, self.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fs_storage() -> StorageId {
        StorageId::FileSystem {
            location: PathBuf::from("/media"),
            base_url: "/media/".into(),
        }
    }

    // =========================================================================
    // tokey
    // =========================================================================

    #[test]
    fn tokey_is_truncated_hex() {
        let k = tokey("hello");
        assert_eq!(k.len(), KEY_LEN);
        assert!(k.chars().all(|c| c.is_ascii_hexdigit()));
        // sha256("hello") = 2cf24dba5fb0a30e26e83b2ac5b9e29e...
        assert_eq!(k, "2cf24dba5fb0a30e26e83b2ac5b9e29e");
    }

    #[test]
    fn tokey_deterministic() {
        assert_eq!(tokey("same input"), tokey("same input"));
        assert_ne!(tokey("input a"), tokey("input b"));
    }

    // =========================================================================
    // Source keys
    // =========================================================================

    #[test]
    fn source_key_depends_on_storage() {
        let a = source_key("a.png", &fs_storage()).unwrap();
        let b = source_key("a.png", &StorageId::Url).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn source_key_rejects_empty_name() {
        assert!(matches!(
            source_key("", &fs_storage()),
            Err(KeyError::InvalidReference(_))
        ));
        assert!(source_key("   ", &fs_storage()).is_err());
    }

    // =========================================================================
    // Thumbnail keys
    // =========================================================================

    #[test]
    fn derive_is_pure() {
        let a = ThumbnailKey::derive("src", r#"{"geometry":"50x50"}"#, None).unwrap();
        let b = ThumbnailKey::derive("src", r#"{"geometry":"50x50"}"#, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn derive_varies_with_options_and_source() {
        let base = ThumbnailKey::derive("src", "opts-a", None).unwrap();
        assert_ne!(base, ThumbnailKey::derive("src", "opts-b", None).unwrap());
        assert_ne!(base, ThumbnailKey::derive("other", "opts-a", None).unwrap());
    }

    #[test]
    fn derive_rejects_empty_source_key() {
        assert!(matches!(
            ThumbnailKey::derive("", "opts", None),
            Err(KeyError::InvalidReference(_))
        ));
    }

    #[test]
    fn variant_suffix_is_distinct() {
        let base = ThumbnailKey::derive("src", "opts", None).unwrap();
        let v15 = base.variant(1.5);
        let v2 = base.variant(2.0);

        assert_eq!(base.suffix(), "");
        assert_eq!(v15.suffix(), "@1.5x");
        assert_eq!(v2.suffix(), "@2x");
        assert_eq!(v15.hash(), base.hash());
        assert_ne!(v15.to_string(), base.to_string());
        assert_ne!(v15.to_string(), v2.to_string());
        assert_eq!(v2.to_string(), format!("{}@2x", base.hash()));
    }
}
