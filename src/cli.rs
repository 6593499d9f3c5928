//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use manhwa_core::{PipelineConfig, RunMode, SiteKind};

/// Which site(s) to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SiteChoice {
    /// comick.live
    Comick,
    /// asuracomic.net
    Asura,
    /// Every supported site concurrently
    All,
}

impl SiteChoice {
    /// The concrete sites selected.
    #[must_use]
    pub fn kinds(self) -> Vec<SiteKind> {
        match self {
            Self::Comick => vec![SiteKind::Comick],
            Self::Asura => vec![SiteKind::Asura],
            Self::All => SiteKind::ALL.to_vec(),
        }
    }
}

/// What to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeChoice {
    /// The whole catalog
    Full,
    /// A single series given by --slug
    Slug,
    /// Catalog entries with an id of at least --start-id
    AfterId,
}

/// Discover and bulk-download manhwa chapters.
///
/// Walks a site's catalog (or a single series), discovers its English
/// chapters and saves every page image under the output directory.
#[derive(Parser, Debug)]
#[command(name = "manhwa-dl")]
#[command(author, version, about)]
pub struct Args {
    /// Site to download from
    #[arg(long, value_enum, default_value_t = SiteChoice::Comick)]
    pub site: SiteChoice,

    /// Operation mode
    #[arg(long, value_enum, default_value_t = ModeChoice::Full)]
    pub mode: ModeChoice,

    /// Series slug (required for --mode slug)
    #[arg(long)]
    pub slug: Option<String>,

    /// Minimum catalog id (required for --mode after-id)
    #[arg(long)]
    pub start_id: Option<u64>,

    /// Concurrent image downloads (1-50)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u8).range(1..=50))]
    pub workers: Option<u8>,

    /// Maximum attempts for transient failures (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: Option<u8>,

    /// Per-request timeout in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=600))]
    pub timeout: Option<u64>,

    /// Output directory
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Minimum delay between requests to the same host in milliseconds (0 to disable, max 60000)
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: Option<u64>,

    /// Config file (defaults to $XDG_CONFIG_HOME/manhwa-downloader/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Overlays explicitly given flags onto `config`.
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(workers) = self.workers {
            config.asset_workers = usize::from(workers);
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = u32::from(retries);
        }
        if let Some(secs) = self.timeout {
            config.transport_timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(ms) = self.rate_limit {
            config.rate_limit = Duration::from_millis(ms);
        }
    }

    /// Resolves `--mode` and its companion flag into a [`RunMode`].
    ///
    /// # Errors
    ///
    /// A usage message when the companion flag is missing or invalid.
    pub fn run_mode(&self) -> Result<RunMode, String> {
        match self.mode {
            ModeChoice::Full => Ok(RunMode::Full),
            ModeChoice::Slug => match self.slug.as_deref().map(str::trim) {
                Some(slug) if !slug.is_empty() => Ok(RunMode::BySlug(slug.to_string())),
                _ => Err("--slug is required for --mode slug".to_string()),
            },
            ModeChoice::AfterId => match self.start_id {
                Some(id) if id > 0 => Ok(RunMode::AfterId(id)),
                _ => Err("--start-id greater than 0 is required for --mode after-id".to_string()),
            },
        }
    }
}
