//! # Baseline rate selectors
//!
//! Two classic single-vantage algorithms used for comparison against the
//! scout orchestrator:
//!
//! - [`SampleRate`]: picks the rate with the lowest average transmission
//!   time and periodically samples rates that could be faster.
//! - [`RobustRate`]: RRAA-style windowed loss thresholds that step one
//!   rate up or down at a time.
//!
//! Both consume outcomes directly. [`BaselineAdaptation`] keeps the
//! outcome history and retracts outcomes from the selector as they age out.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::{Outcome, Rate, RateSet};

mod robust;
mod sample;

pub use robust::{default_window_size, RobustRate, RRAA_ALPHA, RRAA_BETA, RRAA_DIFS_US};
pub use sample::{tx_time_us, BootstrapOrder, SampleRate, DIFS_80211AG_US, DIFS_80211B_US};

/// How long outcomes stay in the baseline history.
pub const HISTORY_RETENTION: Duration = Duration::from_millis(10_500);

/// A stateful per-packet rate selection algorithm.
pub trait RateSelector: fmt::Display + Send {
    /// Decide the rate for the next packet.
    fn select_rate(&mut self, now: Instant) -> Rate;

    /// Account for a delivery outcome.
    fn record(&mut self, outcome: &Outcome);

    /// Reverse the accounting of a previously recorded outcome.
    fn forget(&mut self, outcome: &Outcome);

    /// The rate chosen by the last decision.
    fn current_rate(&self) -> Rate;

    /// Discard all statistics.
    fn reset(&mut self);
}

/// Which baseline algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaselineKind {
    SampleRate,
    Rraa,
}

/// A baseline selector plus the outcome history feeding it.
pub struct BaselineAdaptation {
    kind: BaselineKind,
    selector: Box<dyn RateSelector>,
    history: VecDeque<Outcome>,
    retention: Duration,
}

impl BaselineAdaptation {
    /// Wrap an existing selector.
    pub fn new(kind: BaselineKind, selector: Box<dyn RateSelector>) -> Self {
        Self {
            kind,
            selector,
            history: VecDeque::new(),
            retention: HISTORY_RETENTION,
        }
    }

    /// Build the selector for `kind` over `rates`.
    pub fn with_kind(
        kind: BaselineKind,
        rates: RateSet,
        bootstrap: BootstrapOrder,
        seed: Option<u64>,
    ) -> Self {
        let selector: Box<dyn RateSelector> = match kind {
            BaselineKind::SampleRate => {
                let sample = match seed {
                    Some(seed) => SampleRate::with_seed(rates, bootstrap, seed),
                    None => SampleRate::new(rates, bootstrap),
                };
                Box::new(sample)
            }
            BaselineKind::Rraa => Box::new(RobustRate::new(&rates)),
        };
        Self::new(kind, selector)
    }

    /// Which algorithm is wrapped.
    pub fn kind(&self) -> BaselineKind {
        self.kind
    }

    /// Change how long outcomes are retained.
    pub fn set_retention(&mut self, retention: Duration) {
        self.retention = retention;
    }

    /// Outcomes currently accounted in the selector.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Record a delivery outcome and expire old ones. `Sent` is ignored.
    pub fn insert_record(&mut self, outcome: Outcome) {
        if !outcome.status.is_feedback() {
            return;
        }
        self.history.push_back(outcome);
        self.selector.record(&outcome);
        self.expire(outcome.timestamp);
    }

    /// Retract every outcome older than the retention period at `now`.
    pub fn expire(&mut self, now: Instant) {
        while let Some(front) = self.history.front() {
            let fresh = now
                .checked_duration_since(front.timestamp)
                .map_or(true, |age| age < self.retention);
            if fresh {
                break;
            }
            let old = *front;
            self.history.pop_front();
            self.selector.forget(&old);
            trace!(seq = old.seq, rate = old.rate, "baseline outcome expired");
        }
    }

    /// Rate for the next packet.
    pub fn select_rate(&mut self, now: Instant) -> Rate {
        self.selector.select_rate(now)
    }

    /// Rate chosen by the last selection.
    pub fn current_rate(&self) -> Rate {
        self.selector.current_rate()
    }

    /// Clear history and selector statistics.
    pub fn reset(&mut self) {
        self.history.clear();
        self.selector.reset();
    }
}

impl fmt::Debug for BaselineAdaptation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaselineAdaptation")
            .field("kind", &self.kind)
            .field("current_rate", &self.selector.current_rate())
            .field("history", &self.history.len())
            .finish()
    }
}

impl fmt::Display for BaselineAdaptation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.selector.fmt(f)
    }
}
