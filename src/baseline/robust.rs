//! RRAA-style robust rate adaptation.
//!
//! Each rate owns an estimation window. When the window count expires the
//! rate's byte-loss ratio is compared against two thresholds derived from
//! the airtime ratio of neighbouring rates:
//!
//! - `p_mtl` (maximum tolerable loss): above it, step one rate down.
//! - `p_ori` (opportunistic rate increase): below it, step one rate up.

use std::fmt;
use std::time::Instant;

use tracing::debug;

use super::RateSelector;
use crate::{Error, Outcome, PacketStatus, Rate, RateSet};

/// Empirical tolerance factor for `p_mtl`.
pub const RRAA_ALPHA: f64 = 1.25;

/// Divisor turning the next rate's `p_mtl` into this rate's `p_ori`.
pub const RRAA_BETA: f64 = 2.0;

/// DIFS used by the threshold formula, microseconds.
pub const RRAA_DIFS_US: f64 = 80.0;

/// Reference packet length for the threshold formula, bytes.
const RRAA_PACKET_LEN: f64 = 1000.0;

const EPSILON: f64 = 1e-9;

/// Estimation window (in packets) for a rate.
pub fn default_window_size(rate: Rate) -> u32 {
    match rate {
        0..=55 => 6,
        56..=110 => 10,
        111..=180 => 20,
        _ => 40,
    }
}

fn reference_tx_time(rate: Rate) -> f64 {
    8.0 * 10.0 * RRAA_PACKET_LEN / rate as f64 + RRAA_DIFS_US
}

#[derive(Debug, Clone)]
struct RraaEntry {
    rate: Rate,
    window: u32,
    p_mtl: f64,
    p_ori: f64,
    loss_ratio: f64,
    sent: u32,
    acked: u32,
    len_sent: f64,
    len_acked: f64,
}

/// RRAA selector.
#[derive(Debug, Clone)]
pub struct RobustRate {
    table: Vec<RraaEntry>,
    window_counter: u32,
    current: usize,
    dirty: bool,
}

impl RobustRate {
    /// Build the table over `rates` with [`default_window_size`] windows.
    pub fn new(rates: &RateSet) -> Self {
        let schedule: Vec<(Rate, u32)> = rates
            .iter()
            .map(|rate| (rate, default_window_size(rate)))
            .collect();
        Self::build(&schedule)
    }

    /// Build the table from an explicit `(rate, window)` schedule.
    ///
    /// # Errors
    /// Rates must be non-empty and strictly ascending; windows must be positive.
    pub fn with_schedule(schedule: &[(Rate, u32)]) -> Result<Self, Error> {
        let rates: Vec<Rate> = schedule.iter().map(|&(rate, _)| rate).collect();
        RateSet::new(&rates)?;
        if let Some(&(rate, _)) = schedule.iter().find(|&&(_, window)| window == 0) {
            return Err(Error::InvalidWindow(rate));
        }
        Ok(Self::build(schedule))
    }

    fn build(schedule: &[(Rate, u32)]) -> Self {
        let mut table: Vec<RraaEntry> = schedule
            .iter()
            .enumerate()
            .map(|(i, &(rate, window))| {
                let p_mtl = if i == 0 {
                    1.0
                } else {
                    let prev = schedule[i - 1].0;
                    RRAA_ALPHA * (1.0 - reference_tx_time(rate) / reference_tx_time(prev))
                };
                RraaEntry {
                    rate,
                    window: window.max(1),
                    p_mtl,
                    p_ori: 0.0,
                    loss_ratio: 1.0,
                    sent: 0,
                    acked: 0,
                    len_sent: 0.0,
                    len_acked: 0.0,
                }
            })
            .collect();
        for i in 0..table.len().saturating_sub(1) {
            table[i].p_ori = table[i + 1].p_mtl / RRAA_BETA;
        }

        let window_counter = table[0].window;
        Self {
            table,
            window_counter,
            current: 0,
            dirty: true,
        }
    }

    fn entry(&self, rate: Rate) -> Option<&RraaEntry> {
        self.table.iter().find(|e| e.rate == rate)
    }

    /// Maximum tolerable loss for `rate`.
    pub fn p_mtl(&self, rate: Rate) -> Option<f64> {
        self.entry(rate).map(|e| e.p_mtl)
    }

    /// Opportunistic increase threshold for `rate`.
    pub fn p_ori(&self, rate: Rate) -> Option<f64> {
        self.entry(rate).map(|e| e.p_ori)
    }

    /// Byte-loss ratio for `rate` as of the last decision.
    pub fn loss_ratio(&self, rate: Rate) -> Option<f64> {
        self.entry(rate).map(|e| e.loss_ratio)
    }

    /// Packets left before the current window is evaluated.
    pub fn window_counter(&self) -> u32 {
        self.window_counter
    }

    fn refresh(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        for e in &mut self.table {
            if e.len_sent.abs() < EPSILON {
                e.len_sent = 0.0;
            }
            if e.len_acked.abs() < EPSILON {
                e.len_acked = 0.0;
            }
            e.loss_ratio = if e.len_sent > 0.0 {
                (e.len_sent - e.len_acked) / e.len_sent
            } else {
                1.0
            };
        }
    }
}

impl RateSelector for RobustRate {
    fn select_rate(&mut self, _now: Instant) -> Rate {
        self.refresh();

        self.window_counter = self.window_counter.saturating_sub(1);
        if self.window_counter == 0 {
            let e = &self.table[self.current];
            let next = if e.loss_ratio > e.p_mtl && e.sent > 0 {
                self.current.saturating_sub(1)
            } else if e.loss_ratio < e.p_ori && e.sent > 0 {
                (self.current + 1).min(self.table.len() - 1)
            } else {
                self.current
            };
            self.window_counter = self.table[next].window;

            if next != self.current {
                debug!(
                    from = self.table[self.current].rate,
                    to = self.table[next].rate,
                    loss = self.table[self.current].loss_ratio,
                    "rraa switched rate"
                );
                self.current = next;
            }
        }
        self.table[self.current].rate
    }

    fn record(&mut self, outcome: &Outcome) {
        if !outcome.status.is_feedback() {
            return;
        }
        let Some(e) = self.table.iter_mut().find(|e| e.rate == outcome.rate) else {
            return;
        };
        e.sent += 1;
        e.len_sent += outcome.length as f64;
        if outcome.status == PacketStatus::Acked {
            e.acked += 1;
            e.len_acked += outcome.length as f64;
        }
        self.dirty = true;
    }

    fn forget(&mut self, outcome: &Outcome) {
        if !outcome.status.is_feedback() {
            return;
        }
        let Some(e) = self.table.iter_mut().find(|e| e.rate == outcome.rate) else {
            return;
        };
        e.sent = e.sent.saturating_sub(1);
        e.len_sent -= outcome.length as f64;
        if outcome.status == PacketStatus::Acked {
            e.acked = e.acked.saturating_sub(1);
            e.len_acked -= outcome.length as f64;
        }
        self.dirty = true;
    }

    fn current_rate(&self) -> Rate {
        self.table[self.current].rate
    }

    fn reset(&mut self) {
        for e in &mut self.table {
            e.sent = 0;
            e.acked = 0;
            e.len_sent = 0.0;
            e.len_acked = 0.0;
            e.loss_ratio = 1.0;
        }
        self.current = 0;
        self.window_counter = self.table[0].window;
        self.dirty = true;
    }
}

impl fmt::Display for RobustRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Robust Rate Table:")?;
        writeln!(f, "rate(Mbps)\tsent\tacked\tloss_ratio\tp_ori\tp_mtl\twindow")?;
        for e in &self.table {
            writeln!(
                f,
                "{}\t\t{}\t{}\t{:.3}\t\t{:.3}\t{:.3}\t{}",
                e.rate as f64 / 10.0,
                e.sent,
                e.acked,
                e.loss_ratio,
                e.p_ori,
                e.p_mtl,
                e.window
            )?;
        }
        Ok(())
    }
}
