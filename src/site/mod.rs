//! Site adapters: everything that differs between content hosts.
//!
//! The pipeline only ever talks to [`SiteAdapter`]. Each adapter knows its
//! site's URL shapes and markup, and turns them into the shared data model:
//!
//! - [`CatalogEntry`] - one series in a site's catalog
//! - [`Chapter`] - one installment of a series, in the target language
//! - [`AssetPlan`] - how to reach a chapter's images: an explicit URL list,
//!   or a hash-addressed [`AssetSequence`] enumerated until it runs dry
//!
//! Concurrency for catalog pages is owned by the adapter; retry and file
//! writes are left to [`crate::download::Downloader`].
//!
//! # Adapters
//!
//! - [`ComickAdapter`] - JSON API listings, hash-addressed CDN images
//! - [`AsuraAdapter`] - scraped HTML listings, numbered chapter pages, listed images

mod asura;
mod comick;
mod error;
mod probe;

pub use asura::AsuraAdapter;
pub use comick::ComickAdapter;
pub use error::SiteError;
pub use probe::{CONSECUTIVE_FAILURE_LIMIT, ProbeState, SequentialProbe};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::HeaderMap;

use crate::config::PipelineConfig;
use crate::download::Transport;
use crate::headers::HeaderProfile;

/// Only chapters in this language are discovered.
pub const TARGET_LANGUAGE: &str = "en";

/// Site-assigned identifier of a catalog entry or chapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExternalId {
    /// Monotonic numeric id; usable for threshold filtering.
    Numeric(u64),
    /// Opaque token.
    Opaque(String),
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(id) => write!(f, "{id}"),
            Self::Opaque(id) => f.write_str(id),
        }
    }
}

/// One series in a site's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Site-assigned id.
    pub external_id: ExternalId,
    /// URL-safe identifier, unique within one site.
    pub slug: String,
    /// Display title.
    pub title: String,
    /// Cover image URL, when the listing carries one.
    pub cover_url: Option<String>,
}

impl CatalogEntry {
    /// Entry synthesized from a caller-given slug; the cover is unknown.
    #[must_use]
    pub fn from_slug(slug: &str) -> Self {
        Self {
            external_id: ExternalId::Opaque(slug.to_string()),
            slug: slug.to_string(),
            title: slug.to_string(),
            cover_url: None,
        }
    }
}

/// Restriction applied while discovering the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CatalogFilter {
    /// Keep every entry.
    #[default]
    All,
    /// Keep entries whose numeric id is at least this value.
    MinId(u64),
}

impl CatalogFilter {
    /// Whether `id` passes the filter. Opaque ids never pass an id threshold.
    #[must_use]
    pub fn matches(&self, id: &ExternalId) -> bool {
        match (self, id) {
            (Self::All, _) => true,
            (Self::MinId(min), ExternalId::Numeric(value)) => value >= min,
            (Self::MinId(_), ExternalId::Opaque(_)) => false,
        }
    }
}

/// One installment of a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    /// Site-assigned id.
    pub external_id: ExternalId,
    /// Identifier used to address the chapter on the site (hid or page index).
    pub key: String,
    /// Display number; may be fractional ("10.5"). Names the output directory.
    pub number: String,
    /// Language tag.
    pub language: String,
    /// Asset URLs already extracted while discovering the chapter.
    pub prefetched_assets: Option<Vec<String>>,
}

/// A hash-addressed image sequence of unknown length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSequence {
    /// CDN base URL, no trailing slash.
    pub base: String,
    /// Series slug.
    pub slug: String,
    /// Chapter path segment (e.g. `0_12`).
    pub chapter_segment: String,
    /// Language segment.
    pub language: String,
    /// Opaque hash segment.
    pub hash: String,
    /// File extension of every asset.
    pub extension: String,
    /// Safety cap on indices tried.
    pub cap: usize,
}

impl AssetSequence {
    /// `{base}/{slug}/{chapter_segment}/{language}/{hash}/{index}.{extension}`
    #[must_use]
    pub fn url_for(&self, index: usize) -> String {
        format!(
            "{}/{}/{}/{}/{}/{index}.{}",
            self.base, self.slug, self.chapter_segment, self.language, self.hash, self.extension
        )
    }
}

/// How a chapter's assets are reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetPlan {
    /// Every asset URL, in reading order.
    Listed(Vec<String>),
    /// Constructed URLs, probed from index 0 until exhausted.
    Sequence(AssetSequence),
}

/// Optional operations a site supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SiteCapabilities {
    /// Catalog entries carry monotonic numeric ids, so [`CatalogFilter::MinId`] works.
    pub id_filter: bool,
}

/// Uniform shape of every supported site.
#[async_trait]
pub trait SiteAdapter: Send + Sync + fmt::Debug {
    /// Stable lowercase identifier.
    fn name(&self) -> &'static str;

    /// Optional operations this site supports.
    fn capabilities(&self) -> SiteCapabilities;

    /// Request headers for each role.
    fn header_profile(&self) -> &'static HeaderProfile;

    /// Discovers the catalog, fanning out over listing pages.
    ///
    /// Individual page failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// [`SiteError::CatalogUnavailable`] when no page could be read,
    /// [`SiteError::Unsupported`] for a filter the site cannot apply.
    async fn discover_catalog(&self, filter: &CatalogFilter) -> Result<Vec<CatalogEntry>, SiteError>;

    /// Finds a cover image URL for `entry`, if any.
    ///
    /// # Errors
    ///
    /// Any failure fetching the page that carries the cover.
    async fn resolve_cover(&self, entry: &CatalogEntry) -> Result<Option<String>, SiteError> {
        Ok(entry.cover_url.clone())
    }

    /// Discovers every chapter of `entry` in [`TARGET_LANGUAGE`].
    ///
    /// # Errors
    ///
    /// Failures that prevent discovery from starting at all.
    async fn discover_chapters(&self, entry: &CatalogEntry) -> Result<Vec<Chapter>, SiteError>;

    /// Works out how to reach `chapter`'s assets.
    ///
    /// # Errors
    ///
    /// [`SiteError::HashNotFound`] or [`SiteError::NoAssets`] when nothing
    /// downloadable could be located.
    async fn resolve_assets(
        &self,
        entry: &CatalogEntry,
        chapter: &Chapter,
    ) -> Result<AssetPlan, SiteError>;
}

/// The supported sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteKind {
    /// comick.live
    Comick,
    /// asuracomic.net
    Asura,
}

impl SiteKind {
    /// Every supported site, in dispatch order.
    pub const ALL: [SiteKind; 2] = [SiteKind::Comick, SiteKind::Asura];

    /// Stable lowercase identifier.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Comick => "comick",
            Self::Asura => "asura",
        }
    }
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SiteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "comick" => Ok(Self::Comick),
            "asura" => Ok(Self::Asura),
            other => Err(format!("unknown site '{other}' (supported: comick, asura)")),
        }
    }
}

/// Builds the production adapter for `kind`.
///
/// # Errors
///
/// Returns [`SiteError::Pool`] if the configured catalog page pool is invalid.
pub fn build_adapter(
    kind: SiteKind,
    transport: Arc<dyn Transport>,
    config: &PipelineConfig,
) -> Result<Arc<dyn SiteAdapter>, SiteError> {
    Ok(match kind {
        SiteKind::Comick => Arc::new(ComickAdapter::new(transport, config)?),
        SiteKind::Asura => Arc::new(AsuraAdapter::new(transport, config)?),
    })
}

/// GET a page and return its body, mapping non-200 statuses to errors.
pub(crate) async fn fetch_text(
    transport: &dyn Transport,
    site: &'static str,
    url: &str,
    headers: &HeaderMap,
) -> Result<String, SiteError> {
    let response = transport
        .get(url, headers)
        .await
        .map_err(|e| SiteError::request(site, e))?
        .error_for_status()
        .map_err(|e| SiteError::request(site, e))?;
    response.text().await.map_err(|e| SiteError::request(site, e))
}

/// True for ASCII letters and digits only (and non-empty).
pub(crate) fn is_alphanumeric(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Compiles a regex literal that is known to be valid.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}
