//! Smoothed per-rate loss estimates.
//!
//! One map per vantage point (plus the scout lookup and the combined
//! result). Each holds its own lock and never calls into another
//! component while holding it.

use std::fmt;

use parking_lot::Mutex;

use crate::{is_valid_loss, Error, Rate, RateSet, INVALID_LOSS};

/// Loss estimate and raw counters for one rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossEntry {
    pub sent: u32,
    pub acked: u32,
    /// In `[0, 1]`, or [`INVALID_LOSS`] before any information arrived.
    pub loss: f64,
}

impl Default for LossEntry {
    fn default() -> Self {
        Self {
            sent: 0,
            acked: 0,
            loss: INVALID_LOSS,
        }
    }
}

impl LossEntry {
    /// Blend a fresh sample into the estimate.
    ///
    /// With a positive weight and valid old and new values the result is
    /// `old * weight + new * (1 - weight)`. A non-positive weight, or no
    /// valid prior, replaces the estimate outright (even with
    /// [`INVALID_LOSS`]). An invalid sample over a valid prior is ignored.
    fn blend(&mut self, loss: f64, previous_weight: f64) {
        if previous_weight > 0.0 && is_valid_loss(loss) && is_valid_loss(self.loss) {
            self.loss = self.loss * previous_weight + loss * (1.0 - previous_weight);
        } else if previous_weight <= 0.0 || !is_valid_loss(self.loss) {
            self.loss = loss;
        }
    }
}

/// Thread-safe map from candidate rate to [`LossEntry`].
#[derive(Debug)]
pub struct LossMap {
    rates: RateSet,
    entries: Mutex<Vec<LossEntry>>,
}

impl LossMap {
    /// Create a map with every rate at [`INVALID_LOSS`].
    pub fn new(rates: RateSet) -> Self {
        let entries = vec![LossEntry::default(); rates.len()];
        Self {
            rates,
            entries: Mutex::new(entries),
        }
    }

    /// Rates this map covers.
    pub fn rates(&self) -> &RateSet {
        &self.rates
    }

    fn index(&self, rate: Rate) -> Result<usize, Error> {
        self.rates.index_of(rate).ok_or(Error::UnknownRate(rate))
    }

    /// Blend `loss` into the estimate for `rate`.
    ///
    /// # Errors
    /// `Error::UnknownRate`, `Error::InvalidLoss` for a loss outside
    /// `[0, 1]` other than the sentinel, `Error::InvalidWeight` above 1.
    pub fn update_loss(&self, rate: Rate, loss: f64, previous_weight: f64) -> Result<(), Error> {
        let index = self.index(rate)?;
        if is_valid_loss(loss) && !(0.0..=1.0).contains(&loss) {
            return Err(Error::InvalidLoss(loss));
        }
        if previous_weight > 1.0 {
            return Err(Error::InvalidWeight(previous_weight));
        }
        self.entries.lock()[index].blend(loss, previous_weight);
        Ok(())
    }

    /// Replace the estimate for `rate` without blending.
    pub fn replace_loss(&self, rate: Rate, loss: f64) -> Result<(), Error> {
        self.update_loss(rate, loss, -1.0)
    }

    /// Overwrite the raw counters for `rate`.
    pub fn update_counts(&self, rate: Rate, sent: u32, acked: u32) -> Result<(), Error> {
        let index = self.index(rate)?;
        let mut entries = self.entries.lock();
        entries[index].sent = sent;
        entries[index].acked = acked;
        Ok(())
    }

    /// Loss estimate for `rate`, or [`INVALID_LOSS`](crate::INVALID_LOSS) if unknown.
    pub fn loss(&self, rate: Rate) -> Result<f64, Error> {
        let index = self.index(rate)?;
        Ok(self.entries.lock()[index].loss)
    }

    /// Mirrored sent tally for `rate`.
    pub fn sent_count(&self, rate: Rate) -> Result<u32, Error> {
        let index = self.index(rate)?;
        Ok(self.entries.lock()[index].sent)
    }

    /// Mirrored ack tally for `rate`.
    pub fn ack_count(&self, rate: Rate) -> Result<u32, Error> {
        let index = self.index(rate)?;
        Ok(self.entries.lock()[index].acked)
    }

    /// Loss and counts for `rate` in one read.
    pub fn entry(&self, rate: Rate) -> Result<LossEntry, Error> {
        let index = self.index(rate)?;
        Ok(self.entries.lock()[index])
    }

    /// Copy of every entry, in rate order.
    pub fn snapshot(&self) -> Vec<(Rate, LossEntry)> {
        let entries = self.entries.lock();
        self.rates.iter().zip(entries.iter().copied()).collect()
    }

    /// Best `rate * (1 - loss)` over rates with a valid estimate.
    ///
    /// In units of the rate (tenths of Mbps). `None` if no rate has data.
    pub fn throughput_estimate(&self) -> Option<f64> {
        let entries = self.entries.lock();
        self.rates
            .iter()
            .zip(entries.iter())
            .filter(|(_, e)| is_valid_loss(e.loss))
            .map(|(rate, e)| rate as f64 * (1.0 - e.loss))
            .fold(None, |best: Option<f64>, th| Some(best.map_or(th, |b| b.max(th))))
    }

    // Index-based access for callers that already hold a validated index.

    pub(crate) fn loss_at(&self, index: usize) -> f64 {
        self.entries.lock()[index].loss
    }

    pub(crate) fn update_loss_at(&self, index: usize, loss: f64, previous_weight: f64) {
        debug_assert!(!is_valid_loss(loss) || (0.0..=1.0).contains(&loss));
        self.entries.lock()[index].blend(loss, previous_weight);
    }

    pub(crate) fn update_counts_at(&self, index: usize, sent: u32, acked: u32) {
        let mut entries = self.entries.lock();
        entries[index].sent = sent;
        entries[index].acked = acked;
    }
}

impl fmt::Display for LossMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (rate, entry) in self.snapshot() {
            writeln!(f, "{}\t{:.3}\t{}/{}", rate, entry.loss, entry.acked, entry.sent)?;
        }
        Ok(())
    }
}
