//! Open-ended sequential enumeration with consecutive-failure termination.
//!
//! Used wherever the number of items is unknown up front (numbered chapter
//! pages, paginated chapter listings, hash-addressed images): indices are
//! handed out from 0 until either `limit` consecutive failures are recorded
//! or the safety cap is reached.

/// Consecutive failures that end an enumeration.
pub const CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// Where a probe is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// More indices may be handed out.
    Probing,
    /// Stopped after `limit` consecutive failures.
    Exhausted,
    /// Stopped because the safety cap was reached.
    Capped,
}

impl ProbeState {
    /// True for either terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Probing)
    }
}

/// Index generator plus failure counter.
///
/// ```
/// use manhwa_core::site::{ProbeState, SequentialProbe};
///
/// let mut probe = SequentialProbe::new(500);
/// while let Some(index) = probe.next_index() {
///     if index < 5 {
///         probe.record_success();
///     } else {
///         probe.record_failure();
///     }
/// }
/// assert_eq!(probe.state(), ProbeState::Exhausted);
/// assert_eq!(probe.issued(), 8);
/// ```
#[derive(Debug, Clone)]
pub struct SequentialProbe {
    next: usize,
    cap: usize,
    limit: u32,
    consecutive_failures: u32,
    state: ProbeState,
}

impl SequentialProbe {
    /// Probe over indices `0..cap` with the default failure limit.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self::with_limit(cap, CONSECUTIVE_FAILURE_LIMIT)
    }

    /// Probe over indices `0..cap` stopping after `limit` consecutive failures.
    #[must_use]
    pub fn with_limit(cap: usize, limit: u32) -> Self {
        Self {
            next: 0,
            cap,
            limit: limit.max(1),
            consecutive_failures: 0,
            state: ProbeState::Probing,
        }
    }

    /// Next index to try, or `None` once terminal.
    pub fn next_index(&mut self) -> Option<usize> {
        if self.state.is_terminal() {
            return None;
        }
        if self.next >= self.cap {
            self.state = ProbeState::Capped;
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(index)
    }

    /// A success resets the failure counter.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// A counted failure; the `limit`-th in a row ends the probe.
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.limit {
            self.state = ProbeState::Exhausted;
        }
    }

    /// Marks the probe finished early (e.g. an empty listing page).
    pub fn finish(&mut self) {
        self.state = ProbeState::Exhausted;
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// Failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// How many indices were handed out.
    #[must_use]
    pub fn issued(&self) -> usize {
        self.next
    }
}
