//! Runs one mode against several sites at once.
//!
//! Each pipeline runs in its own task. A site that fails does not cancel or
//! affect the others; its error is collected and reported once every site
//! has finished. Sites that cannot perform the requested mode are skipped
//! with a notice.
//!
//! Output paths are only unique within one site, so two pipelines that
//! would run against the same output root are refused before anything is
//! downloaded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{info, warn};

use crate::pipeline::{Pipeline, RunMode, RunSummary};

/// Aggregate failure of a multi-site run.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// At least one site's run ended in an error.
    #[error("{count} site(s) failed: {}", messages.join("; "))]
    SitesFailed {
        /// Number of failed sites.
        count: usize,
        /// `site: error` per failed site.
        messages: Vec<String>,
        /// What the sites that did finish produced.
        report: Box<CoordinatorReport>,
    },

    /// Two sites would write into the same directory tree.
    #[error("sites {first} and {second} share output root {}", root.display())]
    SharedOutputRoot {
        /// The contested root.
        root: PathBuf,
        /// Site registered first for `root`.
        first: &'static str,
        /// Site that collided with it.
        second: &'static str,
    },
}

impl CoordinatorError {
    /// Partial report carried by [`CoordinatorError::SitesFailed`].
    #[must_use]
    pub fn report(&self) -> Option<&CoordinatorReport> {
        match self {
            Self::SitesFailed { report, .. } => Some(report.as_ref()),
            Self::SharedOutputRoot { .. } => None,
        }
    }
}

/// What every non-failing site did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoordinatorReport {
    /// Per-site summaries, in completion order.
    pub summaries: Vec<(&'static str, RunSummary)>,
    /// Sites skipped because they cannot run the mode.
    pub skipped: Vec<&'static str>,
}

/// Fans a run out over several pipelines.
#[derive(Debug, Clone, Default)]
pub struct Coordinator {
    pipelines: Vec<Pipeline>,
}

impl Coordinator {
    /// Creates a coordinator over `pipelines`.
    #[must_use]
    pub fn new(pipelines: Vec<Pipeline>) -> Self {
        Self { pipelines }
    }

    /// Sites this coordinator dispatches to.
    #[must_use]
    pub fn sites(&self) -> Vec<&'static str> {
        self.pipelines.iter().map(Pipeline::site_name).collect()
    }

    /// Runs `mode` on every supporting pipeline concurrently and waits for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::SharedOutputRoot`] before any request if
    /// two supporting pipelines write under the same root, and
    /// [`CoordinatorError::SitesFailed`] listing every site whose run failed.
    /// Other sites' work is complete by the time this returns and their
    /// summaries travel in the error's report.
    pub async fn run(&self, mode: &RunMode) -> Result<CoordinatorReport, CoordinatorError> {
        let mut skipped = Vec::new();
        let mut runnable = Vec::with_capacity(self.pipelines.len());
        for pipeline in &self.pipelines {
            if pipeline.supports(mode) {
                runnable.push(pipeline);
            } else {
                info!(
                    site = pipeline.site_name(),
                    mode = mode.label(),
                    "mode not supported by site, skipping"
                );
                skipped.push(pipeline.site_name());
            }
        }
        check_distinct_roots(&runnable)?;

        let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let summaries: Arc<Mutex<Vec<(&'static str, RunSummary)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::with_capacity(runnable.len());

        for pipeline in runnable {
            let site = pipeline.site_name();
            let pipeline = pipeline.clone();
            let mode = mode.clone();
            let failures = Arc::clone(&failures);
            let summaries = Arc::clone(&summaries);

            handles.push((
                site,
                tokio::spawn(async move {
                    info!(site, mode = mode.label(), "site run starting");
                    match pipeline.run(&mode).await {
                        Ok(summary) => {
                            info!(site, %summary, "site run finished");
                            summaries
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push((site, summary));
                        }
                        Err(e) => {
                            warn!(site, error = %e, "site run failed");
                            failures
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(format!("{site}: {e}"));
                        }
                    }
                }),
            ));
        }

        for (site, handle) in handles {
            if let Err(e) = handle.await {
                warn!(site, error = %e, "site task panicked");
                failures
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(format!("{site}: task panicked: {e}"));
            }
        }

        let summaries =
            std::mem::take(&mut *summaries.lock().unwrap_or_else(PoisonError::into_inner));
        let report = CoordinatorReport { summaries, skipped };

        let messages = std::mem::take(&mut *failures.lock().unwrap_or_else(PoisonError::into_inner));
        if !messages.is_empty() {
            return Err(CoordinatorError::SitesFailed {
                count: messages.len(),
                messages,
                report: Box::new(report),
            });
        }
        Ok(report)
    }
}

fn check_distinct_roots(pipelines: &[&Pipeline]) -> Result<(), CoordinatorError> {
    let mut roots: HashMap<PathBuf, &'static str> = HashMap::new();
    for pipeline in pipelines {
        let root = pipeline.output_root().to_path_buf();
        if let Some(&first) = roots.get(&root) {
            return Err(CoordinatorError::SharedOutputRoot {
                root,
                first,
                second: pipeline.site_name(),
            });
        }
        roots.insert(root, pipeline.site_name());
    }
    Ok(())
}
