//! Multi-site coordinator: one site failing must not affect another, and
//! sites never share output paths.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use manhwa_core::download::{HttpTransport, Transport};
use manhwa_core::site::{
    AssetPlan, CatalogEntry, CatalogFilter, Chapter, ExternalId, SiteAdapter, SiteCapabilities,
    SiteError,
};
use manhwa_core::{
    Coordinator, CoordinatorError, HeaderProfile, Pipeline, PipelineConfig, RunMode,
};
mod support;
use support::socket_guard::start_mock_server_or_skip;

static NO_EXTRA_HEADERS: HeaderProfile = HeaderProfile {
    site: "test",
    api: &[],
    page: &[],
    image: &[],
};

/// Catalog discovery always fails.
#[derive(Debug)]
struct BrokenSite;

#[async_trait]
impl SiteAdapter for BrokenSite {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn capabilities(&self) -> SiteCapabilities {
        SiteCapabilities { id_filter: true }
    }

    fn header_profile(&self) -> &'static HeaderProfile {
        &NO_EXTRA_HEADERS
    }

    async fn discover_catalog(&self, _filter: &CatalogFilter) -> Result<Vec<CatalogEntry>, SiteError> {
        Err(SiteError::CatalogUnavailable {
            site: "broken",
            pages: 3,
        })
    }

    async fn discover_chapters(&self, _entry: &CatalogEntry) -> Result<Vec<Chapter>, SiteError> {
        Ok(Vec::new())
    }

    async fn resolve_assets(
        &self,
        entry: &CatalogEntry,
        chapter: &Chapter,
    ) -> Result<AssetPlan, SiteError> {
        Err(SiteError::no_assets("broken", &entry.slug, &chapter.number))
    }
}

/// One series, one chapter, one listed image.
#[derive(Debug)]
struct WorkingSite {
    name: &'static str,
    slug: &'static str,
    image_url: String,
    id_filter: bool,
}

#[async_trait]
impl SiteAdapter for WorkingSite {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capabilities(&self) -> SiteCapabilities {
        SiteCapabilities {
            id_filter: self.id_filter,
        }
    }

    fn header_profile(&self) -> &'static HeaderProfile {
        &NO_EXTRA_HEADERS
    }

    async fn discover_catalog(&self, _filter: &CatalogFilter) -> Result<Vec<CatalogEntry>, SiteError> {
        Ok(vec![CatalogEntry {
            external_id: ExternalId::Numeric(5),
            slug: self.slug.into(),
            title: self.slug.into(),
            cover_url: None,
        }])
    }

    async fn discover_chapters(&self, _entry: &CatalogEntry) -> Result<Vec<Chapter>, SiteError> {
        Ok(vec![Chapter {
            external_id: ExternalId::Numeric(1),
            key: "1".into(),
            number: "1".into(),
            language: "en".into(),
            prefetched_assets: None,
        }])
    }

    async fn resolve_assets(
        &self,
        _entry: &CatalogEntry,
        _chapter: &Chapter,
    ) -> Result<AssetPlan, SiteError> {
        Ok(AssetPlan::Listed(vec![self.image_url.clone()]))
    }
}

fn config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig {
        asset_delay: Duration::ZERO,
        output_dir: dir.path().to_path_buf(),
        ..PipelineConfig::default()
    }
}

fn pipeline(adapter: Arc<dyn SiteAdapter>, config: &PipelineConfig) -> Pipeline {
    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new(Duration::from_secs(5)).unwrap());
    Pipeline::new(adapter, transport, config).unwrap()
}

/// One pipeline per site, each under `{dir}/{site}`.
fn scoped_pipeline(adapter: Arc<dyn SiteAdapter>, dir: &TempDir) -> Pipeline {
    let config = config(dir).scoped_to_site(adapter.name());
    pipeline(adapter, &config)
}

fn working(name: &'static str, slug: &'static str, image_url: String) -> WorkingSite {
    WorkingSite {
        name,
        slug,
        image_url,
        id_filter: true,
    }
}

#[tokio::test]
async fn test_one_failing_site_does_not_affect_the_other() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/beta/0.webp"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"page".to_vec()))
        .mount(&server)
        .await;

    let working = working("working", "beta", format!("{}/beta/0.webp", server.uri()));
    let coordinator = Coordinator::new(vec![
        scoped_pipeline(Arc::new(BrokenSite), &dir),
        scoped_pipeline(Arc::new(working), &dir),
    ]);

    let err = coordinator.run(&RunMode::Full).await.unwrap_err();
    let CoordinatorError::SitesFailed {
        count,
        messages,
        report,
    } = err
    else {
        panic!("expected SitesFailed");
    };
    assert_eq!(count, 1);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("broken:"), "{messages:?}");

    assert_eq!(report.summaries.len(), 1);
    let (site, summary) = report.summaries[0];
    assert_eq!(site, "working");
    assert_eq!(summary.items_completed, 1);
    assert_eq!(summary.assets_downloaded, 1);

    let image = dir.path().join("working/beta/chapter_1/000.webp");
    assert_eq!(std::fs::read(image).unwrap(), b"page");
}

#[tokio::test]
async fn test_two_sites_on_one_slug_keep_separate_files() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();

    for (route, body) in [("/cdn-a/x/0.webp", "from comick"), ("/cdn-b/y/0.webp", "from asura")] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;
    }

    let comick = working("comick", "solo", format!("{}/cdn-a/x/0.webp", server.uri()));
    let asura = working("asura", "solo", format!("{}/cdn-b/y/0.webp", server.uri()));
    let coordinator = Coordinator::new(vec![
        scoped_pipeline(Arc::new(comick), &dir),
        scoped_pipeline(Arc::new(asura), &dir),
    ]);

    let report = coordinator
        .run(&RunMode::BySlug("solo".into()))
        .await
        .unwrap();

    let downloaded: usize = report.summaries.iter().map(|(_, s)| s.assets_downloaded).sum();
    assert_eq!(downloaded, 2);
    let read = |site: &str| {
        std::fs::read_to_string(dir.path().join(site).join("solo/chapter_1/000.webp")).unwrap()
    };
    assert_eq!(read("comick"), "from comick");
    assert_eq!(read("asura"), "from asura");
}

#[tokio::test]
async fn test_sites_sharing_an_output_root_are_refused() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("img"))
        .expect(0)
        .mount(&server)
        .await;

    let shared = config(&dir);
    let coordinator = Coordinator::new(vec![
        pipeline(
            Arc::new(working("comick", "solo", format!("{}/a.webp", server.uri()))),
            &shared,
        ),
        pipeline(
            Arc::new(working("asura", "solo", format!("{}/b.webp", server.uri()))),
            &shared,
        ),
    ]);

    let err = coordinator
        .run(&RunMode::BySlug("solo".into()))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            CoordinatorError::SharedOutputRoot {
                first: "comick",
                second: "asura",
                ..
            }
        ),
        "got {err:?}"
    );
    assert!(!dir.path().join("solo").exists());
}

#[tokio::test]
async fn test_unsupported_mode_is_skipped_not_failed() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/beta/0.webp"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"page".to_vec()))
        .mount(&server)
        .await;

    let no_ids = WorkingSite {
        id_filter: false,
        ..working("working", "beta", format!("{}/beta/0.webp", server.uri()))
    };
    let coordinator = Coordinator::new(vec![pipeline(Arc::new(no_ids), &config(&dir))]);

    let report = coordinator.run(&RunMode::AfterId(3)).await.unwrap();
    assert_eq!(report.skipped, vec!["working"]);
    assert!(report.summaries.is_empty());
    assert!(!dir.path().join("beta").exists());
}
