//! Time-bounded log of delivery outcomes for one vantage point.
//!
//! Outcomes are appended in send-time order and evicted once they fall
//! more than the retention duration behind the newest insert. Range
//! queries locate the half-open sub-range `[start, end)` with a binary
//! search and tally it per rate.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::{Error, Outcome, PacketStatus, Rate, RateSet, INVALID_LOSS};

/// Default retention window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(2);

/// A rate with at least this many sends and no ack is infeasible.
const MIN_SENT_FOR_INFEASIBLE: u32 = 2;

/// Per-rate sent/acked counts over a queried range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateTally {
    pub sent: u32,
    pub acked: u32,
}

impl RateTally {
    /// `1 - acked/sent`, or [`INVALID_LOSS`] if nothing was sent.
    pub fn loss(&self) -> f64 {
        if self.sent == 0 {
            INVALID_LOSS
        } else {
            1.0 - self.acked as f64 / self.sent as f64
        }
    }

    /// Never sent, or acked at least once.
    pub fn is_feasible(&self) -> bool {
        self.acked > 0 || self.sent < MIN_SENT_FOR_INFEASIBLE
    }
}

#[derive(Debug)]
struct WindowState {
    duration: Duration,
    records: VecDeque<Outcome>,
}

impl WindowState {
    /// True if `[start, end)` overlaps the stored span at all.
    fn covers(&self, start: Instant, end: Instant) -> bool {
        match (self.records.front(), self.records.back()) {
            (Some(first), Some(last)) => end >= first.timestamp && start <= last.timestamp,
            _ => false,
        }
    }

    /// Smallest index whose timestamp is not less than `t`.
    fn lower_bound(&self, t: Instant) -> usize {
        self.records.partition_point(|o| o.timestamp < t)
    }

    fn tally(&self, rates: &RateSet, start: Instant, end: Instant) -> Vec<RateTally> {
        let mut table = vec![RateTally::default(); rates.len()];
        let left = self.lower_bound(start);
        let right = self.lower_bound(end).max(left);
        for outcome in self.records.range(left..right) {
            if let Some(i) = rates.index_of(outcome.rate) {
                table[i].sent += 1;
                if outcome.status == PacketStatus::Acked {
                    table[i].acked += 1;
                }
            }
        }
        table
    }
}

/// Sliding window of delivery outcomes.
///
/// All operations take the per-instance lock for their duration only.
#[derive(Debug)]
pub struct FeedbackWindow {
    rates: RateSet,
    state: Mutex<WindowState>,
}

impl FeedbackWindow {
    /// Create an empty window over `rates` retaining `duration` of history.
    pub fn new(rates: RateSet, duration: Duration) -> Self {
        Self {
            rates,
            state: Mutex::new(WindowState {
                duration,
                records: VecDeque::new(),
            }),
        }
    }

    /// Candidate rates this window tallies.
    pub fn rates(&self) -> &RateSet {
        &self.rates
    }

    /// Record a feedback outcome and evict stale entries.
    ///
    /// `timestamp` defaults to now. Returns true if any entry was evicted.
    ///
    /// # Errors
    /// `Error::InvalidStatus` for `Sent`, `Error::UnknownRate` for a rate
    /// outside the candidate set. Nothing is recorded in either case.
    pub fn insert(
        &self,
        seq: u32,
        status: PacketStatus,
        rate: Rate,
        timestamp: Option<Instant>,
    ) -> Result<bool, Error> {
        let timestamp = timestamp.unwrap_or_else(Instant::now);
        self.insert_outcome(Outcome::new(seq, status, rate, 0, timestamp))
    }

    /// Record a complete outcome. See [`FeedbackWindow::insert`].
    pub fn insert_outcome(&self, outcome: Outcome) -> Result<bool, Error> {
        if !outcome.status.is_feedback() {
            return Err(Error::InvalidStatus(outcome.status));
        }
        if !self.rates.contains(outcome.rate) {
            return Err(Error::UnknownRate(outcome.rate));
        }

        let mut state = self.state.lock();
        state.records.push_back(outcome);

        let latest = outcome.timestamp;
        let duration = state.duration;
        let mut evicted = false;
        while let Some(front) = state.records.front() {
            if latest.saturating_duration_since(front.timestamp) <= duration {
                break;
            }
            state.records.pop_front();
            evicted = true;
        }
        trace!(
            seq = outcome.seq,
            rate = outcome.rate,
            status = ?outcome.status,
            evicted,
            "feedback recorded"
        );
        Ok(evicted)
    }

    /// Change the retention duration. Takes effect on the next insert.
    pub fn set_window(&self, duration: Duration) {
        self.state.lock().duration = duration;
    }

    /// Current retention duration.
    pub fn window(&self) -> Duration {
        self.state.lock().duration
    }

    /// Outcomes currently retained.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// True when no outcome is retained.
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Drop every stored outcome.
    pub fn clear(&self) {
        self.state.lock().records.clear();
    }

    /// Timestamps of the oldest and newest stored outcomes.
    pub fn span(&self) -> Option<(Instant, Instant)> {
        let state = self.state.lock();
        Some((state.records.front()?.timestamp, state.records.back()?.timestamp))
    }

    /// Per-rate tallies over `[start, end)`, indexed like the rate set.
    ///
    /// Returns `None` if the window is empty or the range lies entirely
    /// outside the stored span.
    pub fn tally(&self, start: Instant, end: Instant) -> Option<Vec<RateTally>> {
        let state = self.state.lock();
        if !state.covers(start, end) {
            return None;
        }
        Some(state.tally(&self.rates, start, end))
    }

    /// Loss of each requested rate over `[start, end)`.
    ///
    /// A rate with no sends in range (including one outside the candidate
    /// set) reports [`INVALID_LOSS`]. `None` means no data for the range.
    pub fn loss_rates(&self, start: Instant, end: Instant, rates: &[Rate]) -> Option<Vec<f64>> {
        let table = self.tally(start, end)?;
        Some(
            rates
                .iter()
                .map(|&rate| match self.rates.index_of(rate) {
                    Some(i) => table[i].loss(),
                    None => INVALID_LOSS,
                })
                .collect(),
        )
    }

    /// Loss of a single rate over `[start, end)`; [`INVALID_LOSS`] if unavailable.
    pub fn loss_rate(&self, start: Instant, end: Instant, rate: Rate) -> f64 {
        self.loss_rates(start, end, &[rate])
            .map(|loss| loss[0])
            .unwrap_or(INVALID_LOSS)
    }

    /// Rates not ruled out by `[start, end)`: never sent, or acked at least once.
    ///
    /// `None` means no data for the range; callers treat every rate as feasible.
    pub fn feasible_rates(&self, start: Instant, end: Instant) -> Option<Vec<Rate>> {
        let table = self.tally(start, end)?;
        Some(
            self.rates
                .iter()
                .zip(table.iter())
                .filter(|(_, tally)| tally.is_feasible())
                .map(|(rate, _)| rate)
                .collect(),
        )
    }
}

impl fmt::Display for FeedbackWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        let origin = state.records.front().map(|o| o.timestamp);
        writeln!(f, "No\tTime(ms)\tSeq\tRate\tStatus")?;
        for (i, o) in state.records.iter().enumerate() {
            let offset = origin
                .map(|t| o.timestamp.duration_since(t).as_secs_f64() * 1000.0)
                .unwrap_or(0.0);
            writeln!(
                f,
                "{}\t{:.3}\t{}\t{}\t{:?}",
                i + 1,
                offset,
                o.seq,
                o.rate,
                o.status
            )?;
        }
        Ok(())
    }
}
