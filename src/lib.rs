//! Manhwa Downloader Core Library
//!
//! Discovers series on content-hosting sites and bulk-downloads their
//! chapters as image files, with bounded concurrency at every stage.
//!
//! # Architecture
//!
//! - [`download`] - transport, retrying downloader, worker pools, output layout
//! - [`headers`] - per-site request header profiles
//! - [`site`] - the [`SiteAdapter`] trait and the comick / asura adapters
//! - [`pipeline`] - one end-to-end run against one site
//! - [`coordinator`] - the same run against several sites concurrently
//! - [`config`] - run configuration and the optional TOML file

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod coordinator;
pub mod download;
pub mod headers;
pub mod pipeline;
pub mod site;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use config::{ConfigError, FileConfig, PipelineConfig};
pub use coordinator::{Coordinator, CoordinatorError, CoordinatorReport};
pub use download::{
    DEFAULT_MAX_RETRIES, DownloadError, Downloader, FailureType, HttpTransport, RateLimiter,
    RetryDecision, RetryPolicy, Transport, WorkerPool, classify_error,
};
pub use headers::{HeaderProfile, RequestRole};
pub use pipeline::{Pipeline, PipelineError, RunMode, RunSummary};
pub use site::{SiteAdapter, SiteError, SiteKind, build_adapter};
