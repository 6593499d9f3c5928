//! Run-level counters shared by every task of one pipeline run.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters updated concurrently while a run is in flight.
#[derive(Debug, Default)]
pub(crate) struct RunStats {
    items_done: AtomicUsize,
    items_completed: AtomicUsize,
    items_failed: AtomicUsize,
    chapters_completed: AtomicUsize,
    chapters_failed: AtomicUsize,
    assets_downloaded: AtomicUsize,
    assets_failed: AtomicUsize,
}

impl RunStats {
    /// Records a finished item and returns how many items are done so far.
    pub(crate) fn item_done(&self, ok: bool) -> usize {
        if ok {
            self.items_completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.items_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.items_done.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn chapter_done(&self, ok: bool) {
        if ok {
            self.chapters_completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.chapters_failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn asset_done(&self, ok: bool) {
        if ok {
            self.assets_downloaded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.assets_failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Snapshot, with the retries taken during this run folded in.
    pub(crate) fn summary(&self, retries: u64) -> RunSummary {
        RunSummary {
            items_completed: self.items_completed.load(Ordering::SeqCst),
            items_failed: self.items_failed.load(Ordering::SeqCst),
            chapters_completed: self.chapters_completed.load(Ordering::SeqCst),
            chapters_failed: self.chapters_failed.load(Ordering::SeqCst),
            assets_downloaded: self.assets_downloaded.load(Ordering::SeqCst),
            assets_failed: self.assets_failed.load(Ordering::SeqCst),
            retries,
        }
    }
}

/// Outcome counts of one finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Items with no chapters, or with at least one completed chapter.
    pub items_completed: usize,
    /// Items whose chapter discovery failed or whose every chapter failed.
    pub items_failed: usize,
    /// Chapters with at least one downloaded asset.
    pub chapters_completed: usize,
    /// Chapters that produced no asset.
    pub chapters_failed: usize,
    /// Assets written to disk.
    pub assets_downloaded: usize,
    /// Assets that failed for a reason other than end-of-sequence.
    pub assets_failed: usize,
    /// Retry sleeps taken by the downloader.
    pub retries: u64,
}

impl RunSummary {
    /// Items attempted.
    #[must_use]
    pub fn items_total(&self) -> usize {
        self.items_completed + self.items_failed
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "items {}/{} ok, chapters {} ok / {} failed, assets {} ok / {} failed, {} retries",
            self.items_completed,
            self.items_total(),
            self.chapters_completed,
            self.chapters_failed,
            self.assets_downloaded,
            self.assets_failed,
            self.retries
        )
    }
}
