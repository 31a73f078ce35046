//! Thumbnail orchestrator.
//!
//! [`ThumbnailBackend::get_thumbnail`] turns a source reference, a geometry
//! and an option set into a stored thumbnail, doing as little work as the
//! metadata store allows:
//!
//! ```text
//! source + geometry + options
//!   → merge defaults, canonicalize            (options)
//!   → derive key and stored name              (keys, naming)
//!   → metadata lookup ──hit──→ handle         (kvstore, no storage I/O)
//!        │ miss
//!        ▼
//!   exists(target) ──yes──→ adopt: open + identify the artifact
//!        │ no
//!        ▼
//!   open(source) → identify → plan → render → save(target)
//!   → persist source, then thumbnail metadata
//!
//! then, on every path, for each density without a record:
//!   exists(variant) ──yes──→ adopt
//!        │ no
//!        ▼
//!   render → save(variant) → persist      (source read at most once)
//! ```
//!
//! ## Error policy
//!
//! [`get_thumbnail`](ThumbnailBackend::get_thumbnail) returns every failure.
//! [`get_thumbnail_lenient`](ThumbnailBackend::get_thumbnail_lenient) is the
//! template-friendly variant: outside debug mode, a missing source or a
//! failed render is logged and yields `Ok(None)`.
//!
//! ## Dummy mode
//!
//! With `dummy.enabled`, no storage, metadata or codec work happens at all.
//! The handle points at the placeholder URL template filled with the
//! resolved size.
//!
//! ## Concurrency
//!
//! The backend is `Send + Sync`. Two threads asking for the same new
//! thumbnail may both render it; the second `save` lands under a numbered
//! name, which is deleted again so both converge on the canonical name.

use crate::config::Settings;
use crate::images::{ImageFile, Source};
use crate::imaging::calculations::{
    Geometry, ParseError, calculate_margin, density_geometry, parse_geometry,
};
use crate::imaging::operations::{RenderConfig, plan_render};
use crate::imaging::{BackendError, Dimensions, ImageBackend, ImageInfo};
use crate::keys::{KeyError, ThumbnailKey};
use crate::kvstore::{CleanupReport, KvBackend, KvStoreError, MetadataStore};
use crate::naming::{format_density, thumbnail_name};
use crate::options::{OptionError, OptionSet, Resolved};
use crate::storage::{FileSystemStorage, Storage, StorageError, StorageId, UrlStorage, is_remote};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    InvalidReference(#[from] KeyError),
    #[error("Invalid option: {0}")]
    InvalidOption(#[from] OptionError),
    #[error("Source not found: {0}")]
    SourceNotFound(String),
    #[error("Thumbnail generation failed for {name}: {source}")]
    GenerationFailure {
        name: String,
        #[source]
        source: BackendError,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Metadata store error: {0}")]
    Metadata(#[from] KvStoreError),
}

impl ThumbnailError {
    /// The source could not be read.
    pub fn is_source_missing(&self) -> bool {
        matches!(self, ThumbnailError::SourceNotFound(_))
    }

    /// Failures that lenient callers turn into "no thumbnail".
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            ThumbnailError::SourceNotFound(_) | ThumbnailError::GenerationFailure { .. }
        )
    }
}

impl From<ParseError> for ThumbnailError {
    fn from(e: ParseError) -> Self {
        ThumbnailError::InvalidOption(OptionError::Parse(e))
    }
}

// ============================================================================
// Handles
// ============================================================================

/// A generated (or placeholder) thumbnail.
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    /// Stored artifact; `None` for dummy placeholders.
    image: Option<ImageFile>,
    url: String,
    size: Dimensions,
    variants: Vec<Variant>,
}

/// An alternative-resolution rendition of a thumbnail.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub density: f64,
    pub thumbnail: Thumbnail,
}

impl Thumbnail {
    fn stored(image: ImageFile, url: String) -> Self {
        let size = image.size().unwrap_or(Dimensions::new(0, 0));
        Self {
            image: Some(image),
            url,
            size,
            variants: Vec::new(),
        }
    }

    fn placeholder(url: String, size: Dimensions) -> Self {
        Self {
            image: None,
            url,
            size,
            variants: Vec::new(),
        }
    }

    pub fn image(&self) -> Option<&ImageFile> {
        self.image.as_ref()
    }

    /// Stored name; `None` for dummy placeholders.
    pub fn name(&self) -> Option<&str> {
        self.image.as_ref().map(ImageFile::name)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn size(&self) -> Dimensions {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn ratio(&self) -> f64 {
        if self.size.height == 0 {
            0.0
        } else {
            self.size.ratio()
        }
    }

    pub fn is_portrait(&self) -> bool {
        self.size.is_portrait()
    }

    pub fn is_dummy(&self) -> bool {
        self.image.is_none()
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// `srcset` attribute value: the base at `1x`, then each variant.
    pub fn srcset(&self) -> String {
        std::iter::once(format!("{} 1x", self.url))
            .chain(self.variants.iter().map(|v| {
                format!("{} {}x", v.thumbnail.url, format_density(v.density))
            }))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl From<&Thumbnail> for Source {
    fn from(t: &Thumbnail) -> Self {
        t.image.clone().map_or(Source::Missing, Source::File)
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Summary of cache performance over the backend's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Answered from the metadata store.
    pub hits: u32,
    /// Found in storage without metadata and adopted.
    pub adopted: u32,
    /// Rendered from the source.
    pub generated: u32,
}

impl CacheStats {
    pub fn total(&self) -> u32 {
        self.hits + self.adopted + self.generated
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 || self.adopted > 0 {
            if self.adopted > 0 {
                write!(
                    f,
                    "{} cached, {} adopted, {} generated ({} total)",
                    self.hits,
                    self.adopted,
                    self.generated,
                    self.total()
                )
            } else {
                write!(
                    f,
                    "{} cached, {} generated ({} total)",
                    self.hits,
                    self.generated,
                    self.total()
                )
            }
        } else {
            write!(f, "{} generated", self.generated)
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU32,
    adopted: AtomicU32,
    generated: AtomicU32,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Source bytes and header, read at most once per request.
struct LoadedSource {
    data: Vec<u8>,
    info: ImageInfo,
}

/// A thumbnail request after validation, before any I/O.
struct Request {
    geometry: Geometry,
    config: RenderConfig,
    key: ThumbnailKey,
    name: String,
}

/// The thumbnail orchestrator. See the [module docs](self).
pub struct ThumbnailBackend {
    settings: Settings,
    engine: Arc<dyn ImageBackend>,
    storage: Arc<dyn Storage>,
    source_storage: Arc<dyn Storage>,
    url_storage: Arc<dyn Storage>,
    kvstore: MetadataStore,
    counters: Counters,
}

impl ThumbnailBackend {
    pub fn new(
        settings: Settings,
        engine: Arc<dyn ImageBackend>,
        storage: Arc<dyn Storage>,
        source_storage: Arc<dyn Storage>,
        kv_backend: Arc<dyn KvBackend>,
    ) -> Self {
        let url_storage: Arc<dyn Storage> = Arc::new(UrlStorage::new(Duration::from_secs(
            settings.url_timeout_secs,
        )));
        let kvstore = MetadataStore::new(kv_backend, settings.kvstore.key_prefix.clone());
        Self {
            settings,
            engine,
            storage,
            source_storage,
            url_storage,
            kvstore,
            counters: Counters::default(),
        }
    }

    /// Replace the storage used for `http(s)://` sources.
    pub fn with_url_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.url_storage = storage;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn kvstore(&self) -> &MetadataStore {
        &self.kvstore
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            adopted: self.counters.adopted.load(Ordering::Relaxed),
            generated: self.counters.generated.load(Ordering::Relaxed),
        }
    }

    /// Resolve a source to an image reference without any I/O.
    pub fn source_image(&self, source: impl Into<Source>) -> Result<ImageFile, ThumbnailError> {
        match source.into() {
            Source::Missing => Err(ThumbnailError::InvalidArgument(
                "no source given".to_string(),
            )),
            Source::Reference(r) if r.trim().is_empty() => Err(ThumbnailError::InvalidArgument(
                "empty source reference".to_string(),
            )),
            Source::Reference(r) if is_remote(&r) => {
                Ok(ImageFile::source(&r, self.url_storage.as_ref())?)
            }
            Source::Reference(r) => Ok(ImageFile::source(&r, self.source_storage.as_ref())?),
            Source::File(f) => Ok(f),
        }
    }

    /// Storage an image record points at.
    pub fn storage_for(&self, id: &StorageId) -> Option<Arc<dyn Storage>> {
        let known = [&self.storage, &self.source_storage, &self.url_storage];
        if let Some(s) = known.into_iter().find(|s| &s.id() == id) {
            return Some(Arc::clone(s));
        }
        match id {
            StorageId::FileSystem { location, base_url } => Some(Arc::new(
                FileSystemStorage::new(location.clone(), base_url.clone()),
            )),
            StorageId::Url => Some(Arc::clone(&self.url_storage)),
            StorageId::Memory { .. } => None,
        }
    }

    fn request(
        &self,
        source: &ImageFile,
        geometry: &str,
        options: &OptionSet,
    ) -> Result<Request, ThumbnailError> {
        let parsed = parse_geometry(geometry)?;
        let merged = options.merged_over(&self.settings.options);
        let config = merged.render_config()?;
        let key = ThumbnailKey::derive(source.key(), &merged.canonical(geometry), None)?;
        let name = thumbnail_name(&self.settings.prefix, &key, config.format);
        Ok(Request {
            geometry: parsed,
            config,
            key,
            name,
        })
    }

    /// Get or create a thumbnail of `source` at `geometry`.
    ///
    /// Density variants are filled in on every path: a variant without a
    /// metadata record is adopted from storage or rendered, so variants
    /// survive lost metadata and densities added to the settings later.
    pub fn get_thumbnail(
        &self,
        source: impl Into<Source>,
        geometry: &str,
        options: &OptionSet,
    ) -> Result<Thumbnail, ThumbnailError> {
        let source = self.source_image(source)?;
        if self.settings.dummy.enabled {
            return self.dummy_thumbnail(geometry);
        }
        let request = self.request(&source, geometry, options)?;
        let mut loaded = None;

        let lookup = ImageFile::thumbnail(
            &request.key,
            request.name.clone(),
            self.storage.id(),
            request.config.format,
        );
        let base = match self.kvstore.get(&lookup)? {
            Some(cached) => {
                debug!("Cache hit for {}", cached.name());
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                cached
            }
            None => {
                debug!("Cache miss for {}", request.name);
                if self.storage.exists(&request.name)? {
                    self.adopt(&source, lookup, &mut loaded)?
                } else {
                    self.generate(&source, lookup, &request, &mut loaded)?
                }
            }
        };

        let url = self.storage.url(base.name());
        let mut thumbnail = Thumbnail::stored(base, url);
        thumbnail.variants = self.variants(&source, &request, &mut loaded)?;
        Ok(thumbnail)
    }

    /// Like [`get_thumbnail`](Self::get_thumbnail), but outside debug mode a
    /// missing source or failed render is logged and yields `Ok(None)`.
    pub fn get_thumbnail_lenient(
        &self,
        source: impl Into<Source>,
        geometry: &str,
        options: &OptionSet,
    ) -> Result<Option<Thumbnail>, ThumbnailError> {
        match self.get_thumbnail(source, geometry, options) {
            Ok(t) => Ok(Some(t)),
            Err(e) if !self.settings.debug && e.is_degradable() => {
                error!("Thumbnail unavailable: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Target size, crop and density sizes `get_thumbnail` would produce,
    /// without rendering or storing anything. Reads the source once.
    pub fn resolve(
        &self,
        source: impl Into<Source>,
        geometry: &str,
        options: &OptionSet,
    ) -> Result<Resolved, ThumbnailError> {
        let source = self.source_image(source)?;
        let merged = options.merged_over(&self.settings.options);
        // validate before touching the source
        parse_geometry(geometry)?;
        merged.render_config()?;
        let loaded = self.load_source(&source)?;
        Ok(crate::options::resolve(
            geometry,
            &merged,
            &loaded.info,
            &self.settings.alternative_resolutions,
        )?)
    }

    /// Record an artifact that is already in storage but unknown to the
    /// metadata store.
    fn adopt(
        &self,
        source: &ImageFile,
        mut thumb: ImageFile,
        loaded: &mut Option<LoadedSource>,
    ) -> Result<ImageFile, ThumbnailError> {
        thumb.set_size(self.measure_artifact(thumb.name())?);

        if self.kvstore.get(source)?.is_none() {
            let info = self.load_cached(source, loaded)?.info;
            self.kvstore
                .set(&source.clone().with_size(info.dimensions(true)), None)?;
        }
        self.kvstore.set(&thumb, Some(source))?;
        debug!("Adopted existing {}", thumb.name());
        self.counters.adopted.fetch_add(1, Ordering::Relaxed);
        Ok(thumb)
    }

    fn generate(
        &self,
        source: &ImageFile,
        mut thumb: ImageFile,
        request: &Request,
        loaded: &mut Option<LoadedSource>,
    ) -> Result<ImageFile, ThumbnailError> {
        let src = self.load_cached(source, loaded)?;
        let size = self.render_and_save(source.name(), src, request, None, thumb.name())?;
        thumb.set_size(size);

        let measured = source
            .clone()
            .with_size(src.info.dimensions(request.config.orientation));
        self.kvstore.get_or_set(&measured)?;
        self.kvstore.set(&thumb, Some(source))?;
        self.counters.generated.fetch_add(1, Ordering::Relaxed);
        info!("Generated {} ({}x{})", thumb.name(), size.width, size.height);
        Ok(thumb)
    }

    /// One variant per configured density: from metadata when recorded,
    /// otherwise adopted from storage or rendered.
    fn variants(
        &self,
        source: &ImageFile,
        request: &Request,
        loaded: &mut Option<LoadedSource>,
    ) -> Result<Vec<Variant>, ThumbnailError> {
        let mut variants = Vec::with_capacity(self.settings.alternative_resolutions.len());
        for &density in &self.settings.alternative_resolutions {
            let key = request.key.variant(density);
            let image = match self.kvstore.get_by_key(&key.to_string())? {
                Some(image) => image,
                None => self.variant_artifact(source, request, &key, density, loaded)?,
            };
            let url = self.storage.url(image.name());
            variants.push(Variant {
                density,
                thumbnail: Thumbnail::stored(image, url),
            });
        }
        Ok(variants)
    }

    fn variant_artifact(
        &self,
        source: &ImageFile,
        request: &Request,
        key: &ThumbnailKey,
        density: f64,
        loaded: &mut Option<LoadedSource>,
    ) -> Result<ImageFile, ThumbnailError> {
        let name = thumbnail_name(&self.settings.prefix, key, request.config.format);
        let size = if self.storage.exists(&name)? {
            debug!("Adopted existing variant {}", name);
            self.measure_artifact(&name)?
        } else {
            let src = self.load_cached(source, loaded)?;
            let size = self.render_and_save(source.name(), src, request, Some(density), &name)?;
            debug!("Generated variant {}", name);
            size
        };
        let variant = ImageFile::thumbnail(key, name, self.storage.id(), request.config.format)
            .with_size(size);
        self.kvstore.set(&variant, Some(source))?;
        Ok(variant)
    }

    /// Render one artifact and save it under exactly `name`.
    fn render_and_save(
        &self,
        source_name: &str,
        src: &LoadedSource,
        request: &Request,
        density: Option<f64>,
        name: &str,
    ) -> Result<Dimensions, ThumbnailError> {
        let plan = plan_render(&src.info, request.geometry, density, &request.config)?;
        let rendered = self
            .engine
            .render(&src.data, &plan.params)
            .map_err(|source| ThumbnailError::GenerationFailure {
                name: source_name.to_string(),
                source,
            })?;

        let saved = self.storage.save(name, &rendered.data)?;
        if saved != name {
            warn!("{} was written concurrently; discarding duplicate {}", name, saved);
            self.storage.delete(&saved)?;
        }
        Ok(rendered.dimensions)
    }

    /// The source read from its storage and identified.
    fn load_source(&self, source: &ImageFile) -> Result<LoadedSource, ThumbnailError> {
        let data = self.read_source(source)?;
        let info = self.identify(source.name(), &data)?;
        Ok(LoadedSource { data, info })
    }

    /// Load the source on first use; later calls reuse it.
    fn load_cached<'a>(
        &self,
        source: &ImageFile,
        loaded: &'a mut Option<LoadedSource>,
    ) -> Result<&'a LoadedSource, ThumbnailError> {
        let src = match loaded.take() {
            Some(src) => src,
            None => self.load_source(source)?,
        };
        Ok(loaded.insert(src))
    }

    fn read_source(&self, source: &ImageFile) -> Result<Vec<u8>, ThumbnailError> {
        let storage = self.storage_for(source.storage()).ok_or_else(|| {
            ThumbnailError::InvalidArgument(format!(
                "no storage available for {}",
                source.storage().tag()
            ))
        })?;
        storage.open(source.name()).map_err(|e| match e {
            StorageError::NotFound(_) => ThumbnailError::SourceNotFound(source.name().to_string()),
            other => ThumbnailError::Storage(other),
        })
    }

    fn identify(&self, name: &str, data: &[u8]) -> Result<ImageInfo, ThumbnailError> {
        self.engine
            .identify(data)
            .map_err(|source| ThumbnailError::GenerationFailure {
                name: name.to_string(),
                source,
            })
    }

    /// Size of an artifact already in thumbnail storage.
    fn measure_artifact(&self, name: &str) -> Result<Dimensions, ThumbnailError> {
        let data = self.storage.open(name)?;
        Ok(self.identify(name, &data)?.stored)
    }

    /// Source with its oriented size filled in.
    fn measure(&self, source: &ImageFile) -> Result<ImageFile, ThumbnailError> {
        let info = self.load_source(source)?.info;
        Ok(source.clone().with_size(info.dimensions(true)))
    }

    fn dummy_thumbnail(&self, geometry: &str) -> Result<Thumbnail, ThumbnailError> {
        let size = parse_geometry(geometry)?.resolve(self.settings.dummy.ratio);
        let mut thumbnail = Thumbnail::placeholder(self.dummy_url(size), size.into());
        for &density in &self.settings.alternative_resolutions {
            let scaled = density_geometry(size, density);
            thumbnail.variants.push(Variant {
                density,
                thumbnail: Thumbnail::placeholder(self.dummy_url(scaled), scaled.into()),
            });
        }
        Ok(thumbnail)
    }

    fn dummy_url(&self, (width, height): (u32, u32)) -> String {
        self.settings
            .dummy
            .source
            .replace("{width}", &width.to_string())
            .replace("{height}", &height.to_string())
    }

    /// CSS margin that centers `source` in a box of `geometry`.
    ///
    /// The source size comes from the metadata store when known; otherwise
    /// the source is measured once and recorded.
    pub fn margin(&self, source: impl Into<Source>, geometry: &str) -> Result<String, ThumbnailError> {
        let source = self.source_image(source)?;
        if self.settings.dummy.enabled {
            return Ok("auto".to_string());
        }
        let parsed = parse_geometry(geometry)?;

        let size = match source.size() {
            Some(size) => size,
            None => match self.kvstore.get(&source)?.and_then(|s| s.size()) {
                Some(size) => size,
                None => {
                    let measured = self.measure(&source)?;
                    self.kvstore.set(&measured, None)?;
                    measured.size().unwrap_or(Dimensions::new(0, 0))
                }
            },
        };
        if size.height == 0 {
            return Err(ThumbnailError::InvalidArgument(format!(
                "{} has no size",
                source.name()
            )));
        }

        let frame = parsed.resolve(size.ratio());
        let [top, right, bottom, left] = calculate_margin(size.as_tuple(), frame);
        Ok(format!("{top}px {right}px {bottom}px {left}px"))
    }

    /// Forget `source` and its thumbnails; with `delete_files`, also remove
    /// the stored thumbnail files. Returns how many thumbnails were dropped.
    pub fn delete(
        &self,
        source: impl Into<Source>,
        delete_files: bool,
    ) -> Result<usize, ThumbnailError> {
        let source = self.source_image(source)?;
        let removed = self.kvstore.delete(&source, true)?;
        if delete_files {
            for thumb in &removed {
                match self.storage_for(thumb.storage()) {
                    Some(storage) => storage.delete(thumb.name())?,
                    None => warn!("Cannot delete {}: storage unavailable", thumb.name()),
                }
            }
        }
        info!("Deleted {} thumbnail record(s) for {}", removed.len(), source.name());
        Ok(removed.len())
    }

    /// Drop metadata whose artifacts are gone.
    pub fn cleanup(&self) -> Result<CleanupReport, ThumbnailError> {
        Ok(self.kvstore.cleanup(&|id: &StorageId| self.storage_for(id))?)
    }

    /// Drop all metadata under the configured key prefix.
    pub fn clear(&self) -> Result<usize, ThumbnailError> {
        Ok(self.kvstore.clear()?)
    }
}
