//! Pipeline orchestrator: one end-to-end run against one site.
//!
//! A run discovers the catalog (or synthesizes a single entry), then for
//! every entry downloads the cover, discovers chapters and downloads each
//! chapter's assets. Items, chapters and assets fan out as Tokio tasks, each
//! stage gated by its own [`WorkerPool`].
//!
//! Failures below the catalog are logged and counted, never propagated: a
//! run returns `Ok` with a [`RunSummary`] unless catalog discovery itself
//! fails or the requested mode cannot start.

mod stats;

pub use stats::RunSummary;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::header::HeaderMap;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, PipelineConfig};
use crate::download::{
    Downloader, OutputLayout, PoolError, RateLimiter, RetryPolicy, Transport, WorkerPool,
    image_extension,
};
use crate::headers::RequestRole;
use crate::site::{
    AssetPlan, AssetSequence, CatalogEntry, CatalogFilter, Chapter, SequentialProbe, SiteAdapter,
    SiteError,
};
use stats::RunStats;

/// Upper bound on the start-up stagger of one listed asset task.
const MAX_ASSET_STAGGER: Duration = Duration::from_secs(2);

/// What a run downloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// The whole catalog.
    Full,
    /// One series, addressed by slug; catalog discovery is skipped.
    BySlug(String),
    /// Catalog entries whose numeric id is at least this value.
    AfterId(u64),
}

impl RunMode {
    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::BySlug(_) => "slug",
            Self::AfterId(_) => "after-id",
        }
    }
}

/// Failures that stop a run before or during catalog discovery.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// By-slug mode was given an empty slug.
    #[error("a non-empty slug is required for slug mode")]
    MissingSlug,

    /// The site cannot perform the requested mode.
    #[error("[{site}] {operation} is not supported")]
    Unsupported {
        /// Site identifier.
        site: &'static str,
        /// Operation name.
        operation: &'static str,
    },

    /// Catalog discovery failed outright.
    #[error("catalog discovery failed: {0}")]
    Catalog(#[source] SiteError),

    /// The configuration was rejected.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    /// A stage pool could not be built.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

struct Inner {
    adapter: Arc<dyn SiteAdapter>,
    downloader: Downloader,
    item_pool: WorkerPool,
    chapter_pool: WorkerPool,
    asset_pool: WorkerPool,
    layout: OutputLayout,
    asset_delay: Duration,
}

/// One site's orchestrator. Cheap to clone; clones share pools and counters.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("site", &self.inner.adapter.name())
            .field("item_pool", &self.inner.item_pool.capacity())
            .field("chapter_pool", &self.inner.chapter_pool.capacity())
            .field("asset_pool", &self.inner.asset_pool.capacity())
            .field("layout", &self.inner.layout)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Builds a pipeline with its own pools, downloader and rate limiter.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        adapter: Arc<dyn SiteAdapter>,
        transport: Arc<dyn Transport>,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let policy = RetryPolicy::new(config.max_retries, config.retry_base_delay);
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit));
        let downloader = Downloader::with_rate_limiter(transport, policy, rate_limiter);

        Ok(Self {
            inner: Arc::new(Inner {
                adapter,
                downloader,
                item_pool: WorkerPool::new("items", config.item_workers)?,
                chapter_pool: WorkerPool::new("chapters", config.chapter_workers)?,
                asset_pool: WorkerPool::new("assets", config.asset_workers)?,
                layout: OutputLayout::new(config.output_dir.clone()),
                asset_delay: config.asset_delay,
            }),
        })
    }

    /// Name of the site this pipeline drives.
    #[must_use]
    pub fn site_name(&self) -> &'static str {
        self.inner.adapter.name()
    }

    /// Directory every file of this pipeline is written under.
    #[must_use]
    pub fn output_root(&self) -> &Path {
        self.inner.layout.root()
    }

    /// Whether the site can run [`RunMode::AfterId`].
    #[must_use]
    pub fn supports(&self, mode: &RunMode) -> bool {
        match mode {
            RunMode::AfterId(_) => self.inner.adapter.capabilities().id_filter,
            RunMode::Full | RunMode::BySlug(_) => true,
        }
    }

    /// Runs `mode` to completion.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::run_full`], [`Pipeline::run_by_slug`] and
    /// [`Pipeline::run_after_id`].
    pub async fn run(&self, mode: &RunMode) -> Result<RunSummary, PipelineError> {
        match mode {
            RunMode::Full => self.run_full().await,
            RunMode::BySlug(slug) => self.run_by_slug(slug).await,
            RunMode::AfterId(id) => self.run_after_id(*id).await,
        }
    }

    /// Discovers the whole catalog and downloads every entry.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Catalog`] when catalog discovery fails.
    #[instrument(skip(self), fields(site = self.site_name()))]
    pub async fn run_full(&self) -> Result<RunSummary, PipelineError> {
        let entries = self
            .inner
            .adapter
            .discover_catalog(&CatalogFilter::All)
            .await
            .map_err(PipelineError::Catalog)?;
        Ok(self.process_entries(entries).await)
    }

    /// Downloads a single series without touching the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingSlug`] for an empty slug.
    #[instrument(skip(self), fields(site = self.site_name()))]
    pub async fn run_by_slug(&self, slug: &str) -> Result<RunSummary, PipelineError> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(PipelineError::MissingSlug);
        }
        Ok(self
            .process_entries(vec![CatalogEntry::from_slug(slug)])
            .await)
    }

    /// Downloads catalog entries whose id is at least `min_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Unsupported`] for sites without numeric ids,
    /// [`PipelineError::Catalog`] when catalog discovery fails.
    #[instrument(skip(self), fields(site = self.site_name()))]
    pub async fn run_after_id(&self, min_id: u64) -> Result<RunSummary, PipelineError> {
        if !self.inner.adapter.capabilities().id_filter {
            return Err(PipelineError::Unsupported {
                site: self.site_name(),
                operation: "after-id filtering",
            });
        }
        let entries = self
            .inner
            .adapter
            .discover_catalog(&CatalogFilter::MinId(min_id))
            .await
            .map_err(PipelineError::Catalog)?;
        Ok(self.process_entries(entries).await)
    }

    async fn process_entries(&self, mut entries: Vec<CatalogEntry>) -> RunSummary {
        let mut seen = HashSet::new();
        entries.retain(|entry| seen.insert(entry.slug.clone()));

        let total = entries.len();
        let site = self.site_name();
        info!(site, total, "processing catalog entries");

        let stats = Arc::new(RunStats::default());
        let retries_before = self.inner.downloader.retries();
        let mut handles = Vec::with_capacity(total);

        for (index, entry) in entries.into_iter().enumerate() {
            let this = self.clone();
            let stats = Arc::clone(&stats);

            handles.push(tokio::spawn(async move {
                let _permit = match this.inner.item_pool.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        warn!(site, slug = %entry.slug, error = %e, "item skipped");
                        stats.item_done(false);
                        return;
                    }
                };

                let ok = match this.process_entry(&entry, &stats).await {
                    Ok(true) => true,
                    Ok(false) => {
                        warn!(
                            site,
                            slug = %entry.slug,
                            index = index + 1,
                            total,
                            "item failed: no chapter completed"
                        );
                        false
                    }
                    Err(e) => {
                        warn!(
                            site,
                            slug = %entry.slug,
                            index = index + 1,
                            total,
                            error = %e,
                            "item failed"
                        );
                        false
                    }
                };
                let done = stats.item_done(ok);
                info!(site, slug = %entry.slug, "[{done}/{total}] item finished");
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(site, error = %e, "item task panicked");
            }
        }

        let retries = self
            .inner
            .downloader
            .retries()
            .saturating_sub(retries_before);
        let summary = stats.summary(retries);
        info!(site, %summary, "run finished");
        summary
    }

    /// Cover plus every chapter of one entry. `Ok(false)` when chapters
    /// existed but none of them completed.
    async fn process_entry(&self, entry: &CatalogEntry, stats: &Arc<RunStats>) -> Result<bool, SiteError> {
        self.download_cover(entry).await;

        let chapters = self.inner.adapter.discover_chapters(entry).await?;
        let total = chapters.len();
        if total == 0 {
            info!(site = self.site_name(), slug = %entry.slug, "no chapters to download");
            return Ok(true);
        }

        let entry = Arc::new(entry.clone());
        let completed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(total);

        for (index, chapter) in chapters.into_iter().enumerate() {
            let this = self.clone();
            let entry = Arc::clone(&entry);
            let stats = Arc::clone(stats);
            let completed = Arc::clone(&completed);

            handles.push(tokio::spawn(async move {
                let site = this.site_name();
                let _permit = match this.inner.chapter_pool.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        warn!(site, slug = %entry.slug, chapter = %chapter.number, error = %e, "chapter skipped");
                        stats.chapter_done(false);
                        return;
                    }
                };

                let ok = match this.process_chapter(&entry, &chapter, &stats).await {
                    Ok(0) => {
                        warn!(
                            site,
                            slug = %entry.slug,
                            chapter = %chapter.number,
                            index = index + 1,
                            total,
                            "chapter produced no assets"
                        );
                        false
                    }
                    Ok(_) => true,
                    Err(e) => {
                        warn!(
                            site,
                            slug = %entry.slug,
                            chapter = %chapter.number,
                            index = index + 1,
                            total,
                            error = %e,
                            "chapter failed"
                        );
                        false
                    }
                };
                stats.chapter_done(ok);
                if ok {
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    info!(site, slug = %entry.slug, chapter = %chapter.number, "({done}/{total}) chapter complete");
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(site = self.site_name(), slug = %entry.slug, error = %e, "chapter task panicked");
            }
        }
        Ok(completed.load(Ordering::SeqCst) > 0)
    }

    /// Best-effort cover download; every failure is logged and dropped.
    async fn download_cover(&self, entry: &CatalogEntry) {
        let site = self.site_name();
        let url = match self.inner.adapter.resolve_cover(entry).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                debug!(site, slug = %entry.slug, "no cover");
                return;
            }
            Err(e) => {
                warn!(site, slug = %entry.slug, error = %e, "cover lookup failed");
                return;
            }
        };

        let dest = self.inner.layout.cover_path(&entry.slug, image_extension(&url));
        let headers = self.image_headers();
        if let Err(e) = self.inner.downloader.download(&url, &dest, &headers).await {
            warn!(site, slug = %entry.slug, error = %e, "cover download failed");
        }
    }

    /// Downloads one chapter's assets and returns how many were written.
    async fn process_chapter(
        &self,
        entry: &Arc<CatalogEntry>,
        chapter: &Chapter,
        stats: &Arc<RunStats>,
    ) -> Result<usize, SiteError> {
        match self.inner.adapter.resolve_assets(entry, chapter).await? {
            AssetPlan::Listed(urls) => Ok(self.download_listed(entry, chapter, urls, stats).await),
            AssetPlan::Sequence(sequence) => {
                Ok(self.download_sequence(entry, chapter, &sequence, stats).await)
            }
        }
    }

    /// Every URL concurrently under the asset pool, each start staggered by index.
    async fn download_listed(
        &self,
        entry: &Arc<CatalogEntry>,
        chapter: &Chapter,
        urls: Vec<String>,
        stats: &Arc<RunStats>,
    ) -> usize {
        let total = urls.len();
        let downloaded = Arc::new(AtomicUsize::new(0));
        let number: Arc<str> = Arc::from(chapter.number.as_str());
        let mut handles = Vec::with_capacity(total);

        for (index, url) in urls.into_iter().enumerate() {
            let this = self.clone();
            let entry = Arc::clone(entry);
            let number = Arc::clone(&number);
            let stats = Arc::clone(stats);
            let downloaded = Arc::clone(&downloaded);

            handles.push(tokio::spawn(async move {
                let stagger = this.stagger_for(index);
                if !stagger.is_zero() {
                    tokio::time::sleep(stagger).await;
                }

                let site = this.site_name();
                let _permit = match this.inner.asset_pool.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        warn!(site, slug = %entry.slug, chapter = %number, index = index + 1, total, error = %e, "asset skipped");
                        stats.asset_done(false);
                        return;
                    }
                };

                let dest = this
                    .inner
                    .layout
                    .asset_path(&entry.slug, &number, index, image_extension(&url));
                match this
                    .inner
                    .downloader
                    .download(&url, &dest, &this.image_headers())
                    .await
                {
                    Ok(outcome) => {
                        debug!(site, path = %outcome.path.display(), bytes = outcome.bytes_written, "asset saved");
                        downloaded.fetch_add(1, Ordering::SeqCst);
                        stats.asset_done(true);
                    }
                    Err(e) => {
                        warn!(
                            site,
                            slug = %entry.slug,
                            chapter = %number,
                            index = index + 1,
                            total,
                            error = %e,
                            "asset failed"
                        );
                        stats.asset_done(false);
                    }
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(site = self.site_name(), error = %e, "asset task panicked");
            }
        }
        downloaded.load(Ordering::SeqCst)
    }

    /// Walks a hash-addressed sequence from index 0 until three misses in a row.
    async fn download_sequence(
        &self,
        entry: &CatalogEntry,
        chapter: &Chapter,
        sequence: &AssetSequence,
        stats: &Arc<RunStats>,
    ) -> usize {
        let site = self.site_name();
        let headers = self.image_headers();
        let mut probe = SequentialProbe::new(sequence.cap);
        let mut downloaded = 0usize;

        while let Some(index) = probe.next_index() {
            if !self.inner.asset_delay.is_zero() {
                tokio::time::sleep(self.inner.asset_delay).await;
            }

            let _permit = match self.inner.asset_pool.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(site, slug = %entry.slug, chapter = %chapter.number, error = %e, "asset pool closed");
                    break;
                }
            };

            let url = sequence.url_for(index);
            let dest = self.inner.layout.asset_path(
                &entry.slug,
                &chapter.number,
                index,
                &sequence.extension,
            );
            match self.inner.downloader.download(&url, &dest, &headers).await {
                Ok(_) => {
                    probe.record_success();
                    downloaded += 1;
                    stats.asset_done(true);
                }
                Err(e) if e.is_not_found() => {
                    probe.record_failure();
                    debug!(site, slug = %entry.slug, chapter = %chapter.number, index = index + 1, "asset not found");
                }
                Err(e) => {
                    probe.record_failure();
                    stats.asset_done(false);
                    warn!(
                        site,
                        slug = %entry.slug,
                        chapter = %chapter.number,
                        index = index + 1,
                        error = %e,
                        "asset failed"
                    );
                }
            }
        }

        debug!(site, slug = %entry.slug, chapter = %chapter.number, downloaded, state = ?probe.state(), "sequence finished");
        downloaded
    }

    fn stagger_for(&self, index: usize) -> Duration {
        let factor = u32::try_from(index).unwrap_or(u32::MAX);
        self.inner
            .asset_delay
            .saturating_mul(factor)
            .min(MAX_ASSET_STAGGER)
    }

    fn image_headers(&self) -> HeaderMap {
        self.inner.adapter.header_profile().headers(RequestRole::Image)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::headers::HeaderProfile;
    use crate::site::{ExternalId, SiteCapabilities};
    use crate::test_support::transport::{RouteTransport, ScriptedReply};
    use async_trait::async_trait;
    use tempfile::TempDir;

    static FAKE_HEADERS: HeaderProfile = HeaderProfile {
        site: "fake",
        api: &[],
        page: &[],
        image: &[("accept", "image/webp,*/*")],
    };

    #[derive(Debug)]
    struct FakeAdapter {
        catalog: Option<Vec<CatalogEntry>>,
        chapters: Vec<Chapter>,
        plan: AssetPlan,
        id_filter: bool,
    }

    #[async_trait]
    impl SiteAdapter for FakeAdapter {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn capabilities(&self) -> SiteCapabilities {
            SiteCapabilities {
                id_filter: self.id_filter,
            }
        }

        fn header_profile(&self) -> &'static HeaderProfile {
            &FAKE_HEADERS
        }

        async fn discover_catalog(
            &self,
            filter: &CatalogFilter,
        ) -> Result<Vec<CatalogEntry>, SiteError> {
            match &self.catalog {
                Some(entries) => Ok(entries
                    .iter()
                    .filter(|e| filter.matches(&e.external_id))
                    .cloned()
                    .collect()),
                None => Err(SiteError::CatalogUnavailable {
                    site: "fake",
                    pages: 1,
                }),
            }
        }

        async fn discover_chapters(&self, _entry: &CatalogEntry) -> Result<Vec<Chapter>, SiteError> {
            Ok(self.chapters.clone())
        }

        async fn resolve_assets(
            &self,
            _entry: &CatalogEntry,
            _chapter: &Chapter,
        ) -> Result<AssetPlan, SiteError> {
            Ok(self.plan.clone())
        }
    }

    fn chapter(number: &str) -> Chapter {
        Chapter {
            external_id: ExternalId::Opaque(number.into()),
            key: number.into(),
            number: number.into(),
            language: "en".into(),
            prefetched_assets: None,
        }
    }

    fn config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig {
            asset_delay: Duration::ZERO,
            retry_base_delay: Duration::from_millis(1),
            output_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        }
    }

    fn pipeline(adapter: FakeAdapter, transport: RouteTransport, dir: &TempDir) -> Pipeline {
        Pipeline::new(Arc::new(adapter), Arc::new(transport), &config(dir)).unwrap()
    }

    #[tokio::test]
    async fn test_listed_assets_written_in_order() {
        let dir = TempDir::new().unwrap();
        let adapter = FakeAdapter {
            catalog: None,
            chapters: vec![chapter("7")],
            plan: AssetPlan::Listed(vec![
                "https://cdn.test/x/0.webp".into(),
                "https://cdn.test/x/1.webp".into(),
            ]),
            id_filter: false,
        };
        let transport = RouteTransport::new()
            .route("https://cdn.test/x/0.webp", ScriptedReply::ok(b"zero"))
            .route("https://cdn.test/x/1.webp", ScriptedReply::ok(b"one"));

        let summary = pipeline(adapter, transport, &dir)
            .run(&RunMode::BySlug("solo".into()))
            .await
            .unwrap();

        let chapter_dir = dir.path().join("solo").join("chapter_7");
        assert_eq!(std::fs::read(chapter_dir.join("000.webp")).unwrap(), b"zero");
        assert_eq!(std::fs::read(chapter_dir.join("001.webp")).unwrap(), b"one");
        assert_eq!(summary.items_completed, 1);
        assert_eq!(summary.chapters_completed, 1);
        assert_eq!(summary.assets_downloaded, 2);
    }

    #[tokio::test]
    async fn test_sequence_stops_after_three_misses() {
        let dir = TempDir::new().unwrap();
        let sequence = AssetSequence {
            base: "https://cdn.test".into(),
            slug: "solo".into(),
            chapter_segment: "0_1".into(),
            language: "en".into(),
            hash: "ab12cd34".into(),
            extension: "webp".into(),
            cap: 200,
        };
        let mut transport = RouteTransport::new();
        for i in 0..2 {
            transport = transport.route(sequence.url_for(i), ScriptedReply::ok(b"img"));
        }
        let transport = Arc::new(transport);
        let adapter = FakeAdapter {
            catalog: None,
            chapters: vec![chapter("1")],
            plan: AssetPlan::Sequence(sequence.clone()),
            id_filter: false,
        };
        let pipeline = Pipeline::new(Arc::new(adapter), transport.clone(), &config(&dir)).unwrap();

        let summary = pipeline.run_by_slug("solo").await.unwrap();

        assert_eq!(summary.assets_downloaded, 2);
        assert_eq!(summary.assets_failed, 0);
        assert!(transport.was_requested(&sequence.url_for(4)));
        assert!(!transport.was_requested(&sequence.url_for(5)));
        assert!(dir.path().join("solo/chapter_1/001.webp").exists());
        assert!(!dir.path().join("solo/chapter_1/002.webp").exists());
    }

    #[tokio::test]
    async fn test_chapter_without_assets_counts_as_failed() {
        let dir = TempDir::new().unwrap();
        let adapter = FakeAdapter {
            catalog: None,
            chapters: vec![chapter("1"), chapter("2")],
            plan: AssetPlan::Listed(vec!["https://cdn.test/missing.webp".into()]),
            id_filter: false,
        };

        let summary = pipeline(adapter, RouteTransport::new(), &dir)
            .run_by_slug("solo")
            .await
            .unwrap();

        assert_eq!(summary.items_completed, 0);
        assert_eq!(summary.items_failed, 1);
        assert_eq!(summary.chapters_failed, 2);
        assert_eq!(summary.assets_failed, 2);
    }

    #[tokio::test]
    async fn test_item_fails_when_every_chapter_asset_is_missing() {
        let dir = TempDir::new().unwrap();
        let adapter = FakeAdapter {
            catalog: None,
            chapters: vec![chapter("1"), chapter("2"), chapter("3")],
            plan: AssetPlan::Listed(vec![
                "https://cdn.test/gone/0.webp".into(),
                "https://cdn.test/gone/1.webp".into(),
            ]),
            id_filter: false,
        };
        let transport = RouteTransport::new()
            .route("https://cdn.test/gone/0.webp", ScriptedReply::status(404))
            .route("https://cdn.test/gone/1.webp", ScriptedReply::status(404));

        let summary = pipeline(adapter, transport, &dir)
            .run_by_slug("solo")
            .await
            .unwrap();

        assert_eq!(summary.items_completed, 0);
        assert_eq!(summary.items_failed, 1);
        assert_eq!(summary.chapters_completed, 0);
        assert_eq!(summary.chapters_failed, 3);
        assert_eq!(summary.assets_downloaded, 0);
        assert!(!dir.path().join("solo/chapter_1/000.webp").exists());
    }

    #[tokio::test]
    async fn test_item_without_chapters_still_completes() {
        let dir = TempDir::new().unwrap();
        let adapter = FakeAdapter {
            catalog: None,
            chapters: Vec::new(),
            plan: AssetPlan::Listed(Vec::new()),
            id_filter: false,
        };

        let summary = pipeline(adapter, RouteTransport::new(), &dir)
            .run_by_slug("solo")
            .await
            .unwrap();

        assert_eq!(summary.items_completed, 1);
        assert_eq!(summary.items_failed, 0);
    }

    #[tokio::test]
    async fn test_retries_are_counted_per_run() {
        use crate::test_support::transport::ScriptedTransport;

        let dir = TempDir::new().unwrap();
        let adapter = FakeAdapter {
            catalog: None,
            chapters: vec![chapter("1")],
            plan: AssetPlan::Listed(vec!["https://cdn.test/x/0.webp".into()]),
            id_filter: false,
        };
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedReply::status(500),
            ScriptedReply::ok(b"first"),
            ScriptedReply::status(500),
            ScriptedReply::ok(b"second"),
        ]));
        let pipeline = Pipeline::new(Arc::new(adapter), transport.clone(), &config(&dir)).unwrap();

        let first = pipeline.run_by_slug("solo").await.unwrap();
        let second = pipeline.run_by_slug("solo").await.unwrap();

        assert_eq!(first.retries, 1);
        assert_eq!(second.retries, 1);
        assert_eq!(second.assets_downloaded, 1);
        assert_eq!(transport.calls(), 4);
        assert_eq!(
            std::fs::read(dir.path().join("solo/chapter_1/000.webp")).unwrap(),
            b"second"
        );
    }

    #[tokio::test]
    async fn test_empty_slug_is_rejected() {
        let dir = TempDir::new().unwrap();
        let adapter = FakeAdapter {
            catalog: None,
            chapters: Vec::new(),
            plan: AssetPlan::Listed(Vec::new()),
            id_filter: false,
        };
        let err = pipeline(adapter, RouteTransport::new(), &dir)
            .run(&RunMode::BySlug("  ".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingSlug));
    }

    #[tokio::test]
    async fn test_after_id_requires_capability() {
        let dir = TempDir::new().unwrap();
        let adapter = FakeAdapter {
            catalog: Some(Vec::new()),
            chapters: Vec::new(),
            plan: AssetPlan::Listed(Vec::new()),
            id_filter: false,
        };
        let pipeline = pipeline(adapter, RouteTransport::new(), &dir);
        assert!(!pipeline.supports(&RunMode::AfterId(3)));
        let err = pipeline.run_after_id(3).await.unwrap_err();
        assert!(matches!(err, PipelineError::Unsupported { site: "fake", .. }));
    }

    #[tokio::test]
    async fn test_catalog_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let adapter = FakeAdapter {
            catalog: None,
            chapters: Vec::new(),
            plan: AssetPlan::Listed(Vec::new()),
            id_filter: true,
        };
        let err = pipeline(adapter, RouteTransport::new(), &dir)
            .run(&RunMode::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Catalog(_)));
    }

    #[tokio::test]
    async fn test_after_id_filters_catalog_and_dedupes() {
        let dir = TempDir::new().unwrap();
        let entry = |slug: &str, id: u64| CatalogEntry {
            external_id: ExternalId::Numeric(id),
            slug: slug.into(),
            title: slug.into(),
            cover_url: None,
        };
        let adapter = FakeAdapter {
            catalog: Some(vec![entry("alpha", 1), entry("beta", 5), entry("beta", 5)]),
            chapters: Vec::new(),
            plan: AssetPlan::Listed(Vec::new()),
            id_filter: true,
        };
        let summary = pipeline(adapter, RouteTransport::new(), &dir)
            .run(&RunMode::AfterId(3))
            .await
            .unwrap();
        assert_eq!(summary.items_total(), 1);
    }

    #[test]
    fn test_stagger_is_capped() {
        let dir = TempDir::new().unwrap();
        let adapter = FakeAdapter {
            catalog: None,
            chapters: Vec::new(),
            plan: AssetPlan::Listed(Vec::new()),
            id_filter: false,
        };
        let config = PipelineConfig {
            asset_delay: Duration::from_millis(50),
            output_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let pipeline =
            Pipeline::new(Arc::new(adapter), Arc::new(RouteTransport::new()), &config).unwrap();
        assert_eq!(pipeline.stagger_for(0), Duration::ZERO);
        assert_eq!(pipeline.stagger_for(3), Duration::from_millis(150));
        assert_eq!(pipeline.stagger_for(1000), MAX_ASSET_STAGGER);
    }
}
