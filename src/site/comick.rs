//! Adapter for comick: JSON listings and hash-addressed CDN images.
//!
//! - Catalog: `/api/search?page=N`, one request per page under the catalog
//!   page pool, bounded by the first page's `last_page`.
//! - Chapters: `/api/comics/{slug}/chapter-list[?page=N]`, walked until an
//!   empty page or three consecutive failures.
//! - Assets: `{cdn}/{slug}/0_{chap}/en/{hash}/{i}.webp`, where the hash is
//!   scraped from the chapter page and confirmed by fetching image 0.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{
    AssetPlan, AssetSequence, CatalogEntry, CatalogFilter, Chapter, ExternalId, SequentialProbe,
    SiteAdapter, SiteCapabilities, SiteError, TARGET_LANGUAGE, compile_static_regex, fetch_text,
    is_alphanumeric,
};
use crate::config::PipelineConfig;
use crate::download::{Transport, WorkerPool};
use crate::headers::{HeaderProfile, RequestRole};

const SITE: &str = "comick";

/// Production site root.
pub const DEFAULT_BASE_URL: &str = "https://comick.live";
/// Production image CDN root.
pub const DEFAULT_CDN_URL: &str = "https://cdn1.comicknew.pictures";

/// Listing pages assumed to exist when the first page does not say.
const ASSUMED_CATALOG_PAGES: u32 = 3830;
/// Chapter listing pages walked at most.
const CHAPTER_PAGE_CAP: usize = 100;
/// Images tried per chapter at most.
const IMAGE_CAP: usize = 200;
/// Hash length on the CDN.
const HASH_LEN: usize = 8;
/// Script-token candidates validated per chapter.
const MAX_SCRIPT_CANDIDATES: usize = 5;
/// Catalog progress is logged every this many pages.
const PROGRESS_EVERY: u32 = 50;

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<script[^>]*>(.*?)</script>"));
static SCRIPT_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"["'/]([A-Za-z0-9]{8})["'/\\]"#));

/// Header overlays for comick.
pub static COMICK_HEADERS: HeaderProfile = HeaderProfile {
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
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
        ("sec-fetch-site", "same-origin"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-dest", "document"),
    ],
    image: &[
        (
            "accept",
            "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8",
        ),
        ("sec-fetch-site", "cross-site"),
        ("sec-fetch-mode", "no-cors"),
        ("sec-fetch-dest", "image"),
        ("referer", "https://comick.live/"),
    ],
};

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    data: Vec<ComicSummary>,
    #[serde(default)]
    last_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ComicSummary {
    id: u64,
    slug: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    default_thumbnail: Option<String>,
}

impl ComicSummary {
    fn into_entry(self) -> CatalogEntry {
        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.slug.clone());
        CatalogEntry {
            external_id: ExternalId::Numeric(self.id),
            title,
            cover_url: self.default_thumbnail.filter(|u| !u.is_empty()),
            slug: self.slug,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChapterListPage {
    #[serde(default)]
    data: Vec<ChapterSummary>,
}

#[derive(Debug, Deserialize)]
struct ChapterSummary {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    hid: String,
    #[serde(default)]
    chap: Option<String>,
    #[serde(default)]
    lang: Option<String>,
}

/// Comick site adapter.
pub struct ComickAdapter {
    transport: Arc<dyn Transport>,
    base_url: String,
    cdn_url: String,
    page_pool: WorkerPool,
    max_catalog_pages: u32,
}

impl fmt::Debug for ComickAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComickAdapter")
            .field("base_url", &self.base_url)
            .field("cdn_url", &self.cdn_url)
            .field("page_pool", &self.page_pool.capacity())
            .field("max_catalog_pages", &self.max_catalog_pages)
            .finish_non_exhaustive()
    }
}

impl ComickAdapter {
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
            cdn_url: cdn_url.trim_end_matches('/').to_string(),
            page_pool,
            max_catalog_pages: ASSUMED_CATALOG_PAGES,
        })
    }

    /// Caps the catalog fan-out below the assumed page count.
    #[must_use]
    pub fn with_max_catalog_pages(mut self, pages: u32) -> Self {
        self.max_catalog_pages = pages.max(1);
        self
    }

    fn search_url(&self, page: u32) -> String {
        format!("{}/api/search?page={page}", self.base_url)
    }

    fn chapter_list_url(&self, slug: &str, page: usize) -> String {
        if page == 0 {
            format!("{}/api/comics/{slug}/chapter-list", self.base_url)
        } else {
            format!("{}/api/comics/{slug}/chapter-list?page={page}", self.base_url)
        }
    }

    fn chapter_page_url(&self, slug: &str, chapter: &Chapter) -> String {
        format!(
            "{}/comic/{slug}/{}-chapter-{}-{}",
            self.base_url, chapter.key, chapter.number, chapter.language
        )
    }

    /// CDN root without scheme, as it appears inside page markup.
    fn cdn_host_path(&self) -> &str {
        self.cdn_url
            .strip_prefix("https://")
            .or_else(|| self.cdn_url.strip_prefix("http://"))
            .unwrap_or(&self.cdn_url)
    }

    /// Ordered, de-duplicated hash candidates for one chapter page.
    fn hash_candidates(&self, body: &str, slug: &str, chapter: &Chapter) -> Vec<String> {
        let host = self.cdn_host_path();
        let direct = format!("{host}/{slug}/0_{}/{}/", chapter.number, chapter.language);
        let escaped = direct.replace('/', "\\/");

        let mut candidates = Vec::new();
        candidates.extend(extract_hash_after(body, &direct));
        candidates.extend(extract_hash_after(body, &escaped));
        candidates.extend(script_tokens(body, &[slug, host]));
        candidates.extend(hid_guesses(&chapter.key));

        let mut seen = HashSet::new();
        candidates.retain(|c| seen.insert(c.clone()));
        candidates
    }

    /// True when image 0 of the sequence answers HTTP 200.
    async fn validate_hash(&self, sequence: &AssetSequence) -> bool {
        let url = sequence.url_for(0);
        match self
            .transport
            .get(&url, &COMICK_HEADERS.headers(RequestRole::Image))
            .await
        {
            Ok(response) => response.is_ok(),
            Err(e) => {
                debug!(url = %url, error = %e, "hash validation request failed");
                false
            }
        }
    }
}

#[async_trait]
impl SiteAdapter for ComickAdapter {
    fn name(&self) -> &'static str {
        SITE
    }

    fn capabilities(&self) -> SiteCapabilities {
        SiteCapabilities { id_filter: true }
    }

    fn header_profile(&self) -> &'static HeaderProfile {
        &COMICK_HEADERS
    }

    #[instrument(skip(self), fields(site = SITE))]
    async fn discover_catalog(&self, filter: &CatalogFilter) -> Result<Vec<CatalogEntry>, SiteError> {
        let headers = COMICK_HEADERS.headers(RequestRole::Api);
        let results: Arc<Mutex<Vec<CatalogEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let succeeded = Arc::new(AtomicU32::new(0));
        let processed = Arc::new(AtomicU32::new(0));

        // The first page is fetched alone: it tells us how many pages exist.
        let mut bound = self.max_catalog_pages;
        match fetch_search_page(self.transport.as_ref(), &self.search_url(1), &headers).await {
            Ok(page) => {
                if let Some(last) = page.last_page.filter(|&n| n > 0) {
                    bound = bound.min(last);
                }
                let mut kept: Vec<CatalogEntry> = page
                    .data
                    .into_iter()
                    .map(ComicSummary::into_entry)
                    .filter(|e| filter.matches(&e.external_id))
                    .collect();
                results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .append(&mut kept);
                succeeded.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => warn!(page = 1, error = %e, "catalog page failed"),
        }
        processed.fetch_add(1, Ordering::SeqCst);
        info!(pages = bound, "fetching catalog");

        let mut handles = Vec::with_capacity(bound.saturating_sub(1) as usize);
        for page in 2..=bound {
            let pool = self.page_pool.clone();
            let transport = Arc::clone(&self.transport);
            let url = self.search_url(page);
            let headers = headers.clone();
            let filter = *filter;
            let results = Arc::clone(&results);
            let succeeded = Arc::clone(&succeeded);
            let processed = Arc::clone(&processed);

            handles.push(tokio::spawn(async move {
                let _permit = match pool.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        warn!(page, error = %e, "catalog page skipped");
                        return;
                    }
                };

                match fetch_search_page(transport.as_ref(), &url, &headers).await {
                    Ok(body) => {
                        let mut kept: Vec<CatalogEntry> = body
                            .data
                            .into_iter()
                            .map(ComicSummary::into_entry)
                            .filter(|e| filter.matches(&e.external_id))
                            .collect();
                        let total = {
                            let mut guard = results.lock().unwrap_or_else(PoisonError::into_inner);
                            guard.append(&mut kept);
                            guard.len()
                        };
                        succeeded.fetch_add(1, Ordering::SeqCst);
                        let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                        if done % PROGRESS_EVERY == 0 {
                            info!(pages_done = done, entries = total, "catalog progress");
                        }
                    }
                    Err(e) => {
                        processed.fetch_add(1, Ordering::SeqCst);
                        warn!(page, error = %e, "catalog page failed");
                    }
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
                pages: bound,
            });
        }

        let entries = std::mem::take(&mut *results.lock().unwrap_or_else(PoisonError::into_inner));
        info!(
            entries = entries.len(),
            pages_ok = succeeded.load(Ordering::SeqCst),
            pages = bound,
            "catalog discovered"
        );
        Ok(entries)
    }

    #[instrument(skip(self, entry), fields(site = SITE, slug = %entry.slug))]
    async fn discover_chapters(&self, entry: &CatalogEntry) -> Result<Vec<Chapter>, SiteError> {
        let headers = COMICK_HEADERS.headers(RequestRole::Api);
        let mut probe = SequentialProbe::new(CHAPTER_PAGE_CAP);
        let mut chapters = Vec::new();
        let mut seen_numbers = HashSet::new();

        while let Some(page) = probe.next_index() {
            let url = self.chapter_list_url(&entry.slug, page);
            let listing = match fetch_text(self.transport.as_ref(), SITE, &url, &headers).await {
                Ok(body) => serde_json::from_str::<ChapterListPage>(&body)
                    .map_err(|e| SiteError::decode(SITE, "chapter list", &url, e)),
                Err(e) => Err(e),
            };

            let listing = match listing {
                Ok(listing) => listing,
                Err(e) => {
                    probe.record_failure();
                    debug!(
                        page,
                        consecutive = probe.consecutive_failures(),
                        error = %e,
                        "chapter list page failed"
                    );
                    continue;
                }
            };
            probe.record_success();

            if listing.data.is_empty() {
                probe.finish();
                break;
            }

            for summary in listing.data {
                if summary.lang.as_deref() != Some(TARGET_LANGUAGE) {
                    continue;
                }
                let Some(number) = summary.chap.filter(|c| !c.trim().is_empty()) else {
                    continue;
                };
                // One directory per chapter number; the first upload listed wins.
                if !seen_numbers.insert(number.clone()) {
                    continue;
                }
                chapters.push(Chapter {
                    external_id: ExternalId::Numeric(summary.id),
                    key: summary.hid,
                    number,
                    language: TARGET_LANGUAGE.to_string(),
                    prefetched_assets: None,
                });
            }
        }

        debug!(chapters = chapters.len(), state = ?probe.state(), "chapter walk finished");
        Ok(chapters)
    }

    #[instrument(skip(self, entry, chapter), fields(site = SITE, slug = %entry.slug, chapter = %chapter.number))]
    async fn resolve_assets(
        &self,
        entry: &CatalogEntry,
        chapter: &Chapter,
    ) -> Result<AssetPlan, SiteError> {
        let url = self.chapter_page_url(&entry.slug, chapter);
        let body = match fetch_text(
            self.transport.as_ref(),
            SITE,
            &url,
            &COMICK_HEADERS.headers(RequestRole::Page),
        )
        .await
        {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, "chapter page unavailable, trying identifier guesses only");
                String::new()
            }
        };

        for hash in self.hash_candidates(&body, &entry.slug, chapter) {
            let sequence = AssetSequence {
                base: self.cdn_url.clone(),
                slug: entry.slug.clone(),
                chapter_segment: format!("0_{}", chapter.number),
                language: chapter.language.clone(),
                hash,
                extension: "webp".to_string(),
                cap: IMAGE_CAP,
            };
            if self.validate_hash(&sequence).await {
                debug!(hash = %sequence.hash, "hash validated");
                return Ok(AssetPlan::Sequence(sequence));
            }
            debug!(hash = %sequence.hash, "hash candidate rejected");
        }

        Err(SiteError::hash_not_found(SITE, &entry.slug, &chapter.number))
    }
}

async fn fetch_search_page(
    transport: &dyn Transport,
    url: &str,
    headers: &reqwest::header::HeaderMap,
) -> Result<SearchPage, SiteError> {
    let body = fetch_text(transport, SITE, url, headers).await?;
    serde_json::from_str(&body).map_err(|e| SiteError::decode(SITE, "catalog page", url, e))
}

/// The 8-char alphanumeric segment right after `pattern`, if present.
fn extract_hash_after(content: &str, pattern: &str) -> Option<String> {
    let start = content.find(pattern)? + pattern.len();
    let rest = &content[start..];
    let end = rest.find(['/', '"', '\'', '\\'])?;
    let hash = &rest[..end];
    (hash.len() == HASH_LEN && is_alphanumeric(hash)).then(|| hash.to_string())
}

/// Mixed letter/digit 8-char tokens inside scripts that mention any of `needles`.
fn script_tokens(body: &str, needles: &[&str]) -> Vec<String> {
    let mut tokens = Vec::new();
    for script in SCRIPT_RE.captures_iter(body) {
        let Some(content) = script.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if !needles.iter().any(|n| !n.is_empty() && content.contains(n)) {
            continue;
        }
        for token in SCRIPT_TOKEN_RE.captures_iter(content) {
            let Some(token) = token.get(1).map(|m| m.as_str()) else {
                continue;
            };
            let has_digit = token.chars().any(|c| c.is_ascii_digit());
            let has_alpha = token.chars().any(|c| c.is_ascii_alphabetic());
            if has_digit && has_alpha && !tokens.iter().any(|t| t == token) {
                tokens.push(token.to_string());
                if tokens.len() >= MAX_SCRIPT_CANDIDATES {
                    return tokens;
                }
            }
        }
    }
    tokens
}

/// Hash-length guesses derived from the chapter hid: whole, lowercase, first 8, last 8.
fn hid_guesses(hid: &str) -> Vec<String> {
    if !is_alphanumeric(hid) {
        return Vec::new();
    }
    let mut guesses = vec![hid.to_string(), hid.to_lowercase()];
    if hid.len() > HASH_LEN {
        guesses.push(hid[..HASH_LEN].to_string());
        guesses.push(hid[hid.len() - HASH_LEN..].to_string());
    }
    let mut seen = HashSet::new();
    guesses.retain(|g| g.len() == HASH_LEN && seen.insert(g.clone()));
    guesses
}
