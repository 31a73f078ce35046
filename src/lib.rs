//! # Thumbstore
//!
//! Content-addressed thumbnail generation with pluggable storage and a
//! metadata cache. A thumbnail is identified by its source and the options
//! it was rendered with; the first request renders and stores it, every
//! later request is answered from metadata alone.
//!
//! # Architecture: Key → Lookup → Render
//!
//! ```text
//! 1. Key      source + geometry + options  →  ThumbnailKey   (pure, no I/O)
//! 2. Lookup   key  →  metadata store                          (hit ends here)
//! 3. Render   storage.open(source) → engine → storage.save → metadata
//! ```
//!
//! This separation exists for three reasons:
//!
//! - **Cheap hits**: a cached thumbnail costs one metadata read and zero
//!   storage calls, which matters when storage is a remote bucket.
//! - **Deterministic names**: the stored name is derived from the key, so an
//!   artifact whose metadata was lost is found again and adopted instead of
//!   re-rendered.
//! - **Testability**: keys, option parsing and geometry math are pure
//!   functions; the orchestrator runs against in-memory storage and a mock
//!   engine.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`thumbnail`] | The orchestrator: `get_thumbnail`, `margin`, `delete`, `cleanup` |
//! | [`keys`] | SHA-256 key derivation for sources and thumbnails |
//! | [`options`] | Option sets, canonical form, validation into a render config |
//! | [`naming`] | Stored names (`prefix/abcdabcd….avif`) and `_N` collision names |
//! | [`images`] | `ImageFile` references and their persisted metadata |
//! | [`storage`] | `Storage` trait with filesystem, in-memory and remote-URL backends |
//! | [`kvstore`] | Key/value backends and the `MetadataStore` built on them |
//! | [`imaging`] | Geometry math, render planning, the `ImageBackend` trait and `RustBackend` |
//! | [`registry`] | Identifier → constructor maps used to wire a backend from settings |
//! | [`config`] | `thumbstore.toml` loading, merging and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Options Are Part of the Identity
//!
//! Options are merged over the configured defaults before hashing, then
//! serialized with sorted keys. Spelling out a default (`quality=95`) or
//! reordering options yields the same key; any real difference yields a new
//! artifact. Unknown options are kept in the key even though the engine
//! ignores them.
//!
//! ## Storage Is a Flat Namespace
//!
//! The [`storage::Storage`] trait is deliberately narrow: exists, open,
//! save, delete, url. Saving never overwrites; a taken name gets an `_N`
//! suffix. When two workers race on the same thumbnail, the loser's
//! numbered copy is deleted so both converge on the canonical name.
//!
//! ## Explicit Settings
//!
//! There is no global configuration. [`config::Settings`] is loaded once and
//! handed to the [`thumbnail::ThumbnailBackend`] together with its
//! collaborators, either directly or through [`registry::Registry`].

pub mod config;
pub mod images;
pub mod imaging;
pub mod keys;
pub mod kvstore;
pub mod naming;
pub mod options;
pub mod output;
pub mod registry;
pub mod storage;
pub mod thumbnail;

#[cfg(test)]
pub(crate) mod test_helpers;
