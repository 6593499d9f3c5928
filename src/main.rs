//! CLI entry point for the manhwa downloader.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use manhwa_core::{
    Coordinator, CoordinatorReport, FileConfig, HttpTransport, Pipeline, PipelineConfig,
    Transport, build_adapter,
};
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let file_config = match &args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => FileConfig::load_default()?,
    };

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > default (info)
    let default_level = if args.quiet {
        "error".to_string()
    } else {
        match args.verbose {
            0 => file_config
                .as_ref()
                .and_then(|c| c.log_level.clone())
                .unwrap_or_else(|| "info".to_string()),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    // Built-in defaults < config file < explicit flags
    let mut config = PipelineConfig::default();
    if let Some(file) = &file_config {
        file.apply(&mut config);
    }
    args.apply(&mut config);
    config.validate()?;

    let mode = args.run_mode().map_err(anyhow::Error::msg)?;
    let kinds = args.site.kinds();
    let multi_site = kinds.len() > 1;

    info!(
        sites = ?kinds,
        mode = mode.label(),
        output_dir = %config.output_dir.display(),
        "Manhwa downloader starting"
    );

    let mut pipelines = Vec::with_capacity(kinds.len());
    for kind in kinds {
        // Each site gets its own subtree when several share one output root.
        let site_config = if multi_site {
            config.scoped_to_site(kind.name())
        } else {
            config.clone()
        };
        // One transport per site keeps connection pools independent.
        let transport: Arc<dyn Transport> = Arc::new(
            HttpTransport::new(site_config.transport_timeout)
                .with_context(|| format!("building HTTP client for {kind}"))?,
        );
        let adapter = build_adapter(kind, Arc::clone(&transport), &site_config)?;
        pipelines.push(Pipeline::new(adapter, transport, &site_config)?);
    }

    if let [pipeline] = pipelines.as_slice() {
        if !pipeline.supports(&mode) {
            bail!(
                "--mode {} is not supported for site '{}'",
                mode.label(),
                pipeline.site_name()
            );
        }
    }

    let outcome = Coordinator::new(pipelines).run(&mode).await;
    let report = match &outcome {
        Ok(report) => Some(report),
        Err(e) => e.report(),
    };
    if let Some(report) = report {
        log_report(report);
    }
    outcome?;

    Ok(())
}

fn log_report(report: &CoordinatorReport) {
    for site in &report.skipped {
        info!(site, "skipped (mode not supported)");
    }
    for (site, summary) in &report.summaries {
        info!(
            site,
            items_completed = summary.items_completed,
            items_failed = summary.items_failed,
            chapters_completed = summary.chapters_completed,
            chapters_failed = summary.chapters_failed,
            assets_downloaded = summary.assets_downloaded,
            assets_failed = summary.assets_failed,
            retries = summary.retries,
            "Download complete"
        );
    }
}
