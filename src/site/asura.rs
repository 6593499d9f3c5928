//! Adapter for asura: scraped HTML listings and numbered chapter pages.
//!
//! There is no chapter listing endpoint, so chapters are found by probing
//! `/series/{slug}/chapter/{n}` from 0 until three consecutive 404s. Each
//! chapter page embeds its image list, which is captured during the probe.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{
    AssetPlan, CatalogEntry, CatalogFilter, Chapter, ExternalId, SequentialProbe, SiteAdapter,
    SiteCapabilities, SiteError, TARGET_LANGUAGE, compile_static_regex, fetch_text,
    is_alphanumeric,
};
use crate::config::PipelineConfig;
use crate::download::{Transport, WorkerPool};
use crate::headers::{HeaderProfile, RequestRole};

const SITE: &str = "asura";

/// Production site root.
pub const DEFAULT_BASE_URL: &str = "https://asuracomic.net";
/// Production media CDN root.
pub const DEFAULT_CDN_URL: &str = "https://gg.asuracomic.net";

/// Listing pages on the series index.
const CATALOG_PAGES: u32 = 20;
/// Chapter indices probed at most.
const CHAPTER_PROBE_CAP: usize = 500;
/// Shortest accepted trailing hid in a series slug.
const MIN_HID_LEN: usize = 8;

static SERIES_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"<a[^>]+href=["']/?series/([^"'/?#]+)["'][^>]*>"#)
});
static PAGES_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#""pages":\s*\[(.*?)\]"#));

/// Header overlays for asura.
pub static ASURA_HEADERS: HeaderProfile = HeaderProfile {
    site: SITE,
    api: &[
        ("accept", "*/*"),
        ("sec-fetch-site", "same-origin"),
        ("sec-fetch-mode", "cors"),
        ("sec-fetch-dest", "empty"),
    ],
    page: &[
        (
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
        ),
        ("sec-fetch-site", "same-origin"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-user", "?1"),
        ("sec-fetch-dest", "document"),
        ("referer", "https://asuracomic.net/"),
        ("upgrade-insecure-requests", "1"),
    ],
    image: &[
        (
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
        ),
        ("sec-fetch-site", "none"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-user", "?1"),
        ("sec-fetch-dest", "document"),
        ("upgrade-insecure-requests", "1"),
    ],
};

#[derive(Debug, Deserialize)]
struct PageRef {
    #[serde(default)]
    url: String,
}

/// Media URL patterns, built per CDN root.
#[derive(Debug)]
struct MediaPatterns {
    cover: Regex,
    cover_fallback: Regex,
    optimized: Regex,
}

impl MediaPatterns {
    fn for_cdn(cdn_url: &str) -> Self {
        let root = regex::escape(cdn_url);
        Self {
            cover: compile_static_regex(&format!(
                r#"{root}/storage/media/\d+/[^"'\s]+\.webp"#
            )),
            cover_fallback: compile_static_regex(&format!(
                r"{root}/storage/media/\d+/[^/]+\.webp"
            )),
            optimized: compile_static_regex(&format!(
                r"{root}/storage/media/\d+/conversions/\d+-optimized\.webp"
            )),
        }
    }
}

/// Asura site adapter.
pub struct AsuraAdapter {
    transport: Arc<dyn Transport>,
    base_url: String,
    patterns: MediaPatterns,
    page_pool: WorkerPool,
    probe_delay: Duration,
    catalog_pages: u32,
}

impl fmt::Debug for AsuraAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsuraAdapter")
            .field("base_url", &self.base_url)
            .field("page_pool", &self.page_pool.capacity())
            .field("probe_delay", &self.probe_delay)
            .field("catalog_pages", &self.catalog_pages)
            .finish_non_exhaustive()
    }
}

impl AsuraAdapter {
    /// Adapter against the production site.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Pool`] for an invalid catalog page pool size.
    pub fn new(transport: Arc<dyn Transport>, config: &PipelineConfig) -> Result<Self, SiteError> {
        Self::with_base_urls(transport, config, DEFAULT_BASE_URL, DEFAULT_CDN_URL)
    }

    /// Adapter against custom roots (used by tests and mirrors).
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Pool`] for an invalid catalog page pool size.
    pub fn with_base_urls(
        transport: Arc<dyn Transport>,
        config: &PipelineConfig,
        base_url: &str,
        cdn_url: &str,
    ) -> Result<Self, SiteError> {
        let page_pool = WorkerPool::new("catalog-pages", config.catalog_page_workers)
            .map_err(|e| SiteError::pool(SITE, e))?;
        Ok(Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            patterns: MediaPatterns::for_cdn(cdn_url.trim_end_matches('/')),
            page_pool,
            probe_delay: config.probe_delay,
            catalog_pages: CATALOG_PAGES,
        })
    }

    /// Overrides the number of listing pages fetched.
    #[must_use]
    pub fn with_catalog_pages(mut self, pages: u32) -> Self {
        self.catalog_pages = pages.max(1);
        self
    }

    fn chapter_url(&self, slug: &str, key: &str) -> String {
        format!("{}/series/{slug}/chapter/{key}", self.base_url)
    }

    /// First full-size media image on a series page.
    fn extract_cover_url(&self, html: &str) -> Option<String> {
        let primary = self.patterns.cover.find_iter(html).map(|m| m.as_str()).find(|url| {
            !url.contains("-optimized")
                && !url.contains("-thumbnail")
                && !url.contains("-small")
                && !url.contains("/conversions/")
        });
        primary
            .or_else(|| {
                self.patterns
                    .cover_fallback
                    .find_iter(html)
                    .map(|m| m.as_str())
                    .find(|url| !url.contains("/conversions/"))
            })
            .map(str::to_string)
    }

    /// Image URLs of a chapter page: the embedded pages array, else optimized media in order.
    fn extract_image_urls(&self, html: &str) -> Vec<String> {
        let listed = extract_pages_json(html);
        if !listed.is_empty() {
            return listed;
        }

        let mut seen = HashSet::new();
        self.patterns
            .optimized
            .find_iter(html)
            .map(|m| m.as_str().to_string())
            .filter(|url| seen.insert(url.clone()))
            .collect()
    }
}

#[async_trait]
impl SiteAdapter for AsuraAdapter {
    fn name(&self) -> &'static str {
        SITE
    }

    fn capabilities(&self) -> SiteCapabilities {
        SiteCapabilities { id_filter: false }
    }

    fn header_profile(&self) -> &'static HeaderProfile {
        &ASURA_HEADERS
    }

    #[instrument(skip(self), fields(site = SITE))]
    async fn discover_catalog(&self, filter: &CatalogFilter) -> Result<Vec<CatalogEntry>, SiteError> {
        if let CatalogFilter::MinId(_) = filter {
            return Err(SiteError::unsupported(SITE, "id filtering"));
        }

        let headers = ASURA_HEADERS.headers(RequestRole::Page);
        let collected: Arc<Mutex<(Vec<CatalogEntry>, HashSet<String>)>> =
            Arc::new(Mutex::new((Vec::new(), HashSet::new())));
        let succeeded = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::with_capacity(self.catalog_pages as usize);
        for page in 1..=self.catalog_pages {
            let pool = self.page_pool.clone();
            let transport = Arc::clone(&self.transport);
            let url = format!("{}/series?page={page}", self.base_url);
            let headers = headers.clone();
            let collected = Arc::clone(&collected);
            let succeeded = Arc::clone(&succeeded);

            handles.push(tokio::spawn(async move {
                let _permit = match pool.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        warn!(page, error = %e, "catalog page skipped");
                        return;
                    }
                };

                match fetch_text(transport.as_ref(), SITE, &url, &headers).await {
                    Ok(html) => {
                        let found = parse_series_links(&html);
                        let (added, total) = {
                            let mut guard = collected.lock().unwrap_or_else(PoisonError::into_inner);
                            let (entries, seen) = &mut *guard;
                            let mut added = 0usize;
                            for entry in found {
                                if seen.insert(entry.slug.clone()) {
                                    entries.push(entry);
                                    added += 1;
                                }
                            }
                            (added, entries.len())
                        };
                        succeeded.fetch_add(1, Ordering::SeqCst);
                        debug!(page, added, total, "catalog page parsed");
                    }
                    Err(e) => warn!(page, error = %e, "catalog page failed"),
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "catalog page task panicked");
            }
        }

        if succeeded.load(Ordering::SeqCst) == 0 {
            return Err(SiteError::CatalogUnavailable {
                site: SITE,
                pages: self.catalog_pages,
            });
        }

        let entries = std::mem::take(
            &mut collected
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .0,
        );
        info!(entries = entries.len(), "catalog discovered");
        Ok(entries)
    }

    #[instrument(skip(self, entry), fields(site = SITE, slug = %entry.slug))]
    async fn resolve_cover(&self, entry: &CatalogEntry) -> Result<Option<String>, SiteError> {
        if entry.cover_url.is_some() {
            return Ok(entry.cover_url.clone());
        }
        let url = format!("{}/series/{}", self.base_url, entry.slug);
        let html = fetch_text(
            self.transport.as_ref(),
            SITE,
            &url,
            &ASURA_HEADERS.headers(RequestRole::Page),
        )
        .await?;
        let cover = self.extract_cover_url(&html);
        debug!(cover = ?cover, "cover lookup");
        Ok(cover)
    }

    #[instrument(skip(self, entry), fields(site = SITE, slug = %entry.slug))]
    async fn discover_chapters(&self, entry: &CatalogEntry) -> Result<Vec<Chapter>, SiteError> {
        let headers = ASURA_HEADERS.headers(RequestRole::Page);
        let mut probe = SequentialProbe::new(CHAPTER_PROBE_CAP);
        let mut chapters = Vec::new();

        while let Some(index) = probe.next_index() {
            if index > 0 && !self.probe_delay.is_zero() {
                tokio::time::sleep(self.probe_delay).await;
            }

            let url = self.chapter_url(&entry.slug, &index.to_string());
            match fetch_text(self.transport.as_ref(), SITE, &url, &headers).await {
                Ok(html) => {
                    let images = self.extract_image_urls(&html);
                    if images.is_empty() {
                        debug!(index, "chapter page has no images");
                        continue;
                    }
                    probe.record_success();
                    chapters.push(Chapter {
                        external_id: ExternalId::Numeric(index as u64),
                        key: index.to_string(),
                        number: (index + 1).to_string(),
                        language: TARGET_LANGUAGE.to_string(),
                        prefetched_assets: Some(images),
                    });
                }
                Err(e) if e.is_not_found() => {
                    probe.record_failure();
                    debug!(
                        index,
                        consecutive = probe.consecutive_failures(),
                        "chapter not found"
                    );
                }
                // Only 404s count toward termination.
                Err(e) => debug!(index, error = %e, "chapter probe failed"),
            }
        }

        if chapters.is_empty() {
            warn!("no chapters found");
        } else {
            info!(chapters = chapters.len(), state = ?probe.state(), "chapters discovered");
        }
        Ok(chapters)
    }

    #[instrument(skip(self, entry, chapter), fields(site = SITE, slug = %entry.slug, chapter = %chapter.number))]
    async fn resolve_assets(
        &self,
        entry: &CatalogEntry,
        chapter: &Chapter,
    ) -> Result<AssetPlan, SiteError> {
        if let Some(urls) = chapter.prefetched_assets.as_ref().filter(|u| !u.is_empty()) {
            return Ok(AssetPlan::Listed(urls.clone()));
        }

        let url = self.chapter_url(&entry.slug, &chapter.key);
        let html = fetch_text(
            self.transport.as_ref(),
            SITE,
            &url,
            &ASURA_HEADERS.headers(RequestRole::Page),
        )
        .await?;
        let urls = self.extract_image_urls(&html);
        if urls.is_empty() {
            return Err(SiteError::no_assets(SITE, &entry.slug, &chapter.number));
        }
        Ok(AssetPlan::Listed(urls))
    }
}

/// Series links on a listing page, de-duplicated, with title and hid derived from the slug.
fn parse_series_links(html: &str) -> Vec<CatalogEntry> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for capture in SERIES_LINK_RE.captures_iter(html) {
        let Some(slug) = capture.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if !seen.insert(slug.to_string()) {
            continue;
        }
        if let Some(entry) = entry_from_slug(slug) {
            entries.push(entry);
        }
    }
    entries
}

/// `title-words-<hid>` to an entry titled "Title Words" with id `<hid>`.
fn entry_from_slug(slug: &str) -> Option<CatalogEntry> {
    let (stem, hid) = slug.rsplit_once('-')?;
    if stem.is_empty() || hid.len() < MIN_HID_LEN || !is_alphanumeric(hid) {
        return None;
    }
    Some(CatalogEntry {
        external_id: ExternalId::Opaque(hid.to_string()),
        slug: slug.to_string(),
        title: title_case(stem),
        cover_url: None,
    })
}

fn title_case(stem: &str) -> String {
    stem.split('-')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// URLs from an embedded `"pages":[{"order":..,"url":..}]` array, in array order.
fn extract_pages_json(html: &str) -> Vec<String> {
    let Some(inner) = PAGES_JSON_RE.captures(html).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    let json = format!("[{}]", inner.as_str());
    match serde_json::from_str::<Vec<PageRef>>(&json) {
        Ok(pages) => pages
            .into_iter()
            .map(|p| p.url)
            .filter(|u| !u.is_empty())
            .collect(),
        Err(e) => {
            debug!(error = %e, "pages array did not decode");
            Vec::new()
        }
    }
}
