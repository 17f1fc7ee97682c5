//! SampleRate-style selection by average transmission time.
//!
//! Per decision:
//! 1. No ack seen yet: take the lowest (or highest) rate that has not
//!    failed four times in a row.
//! 2. Every tenth packet: sample a random rate whose best-case time beats
//!    the current rate's average.
//! 3. Otherwise: the rate with the lowest average transmission time.

use std::fmt;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use super::RateSelector;
use crate::{Outcome, PacketStatus, Rate, RateSet};

/// DIFS for 802.11b rates, microseconds.
pub const DIFS_80211B_US: f64 = 50.0;

/// DIFS for 802.11a/g rates, microseconds.
pub const DIFS_80211AG_US: f64 = 28.0;

const MAX_CONSECUTIVE_LOSSES: u32 = 4;
const SAMPLE_INTERVAL: u32 = 10;
/// Sampling only looks this far past the current index.
const SAMPLE_LOOKAHEAD: usize = 3;
const NO_TX_TIME: f64 = 1e10;
const CONSECUTIVE_LOSS_RESET: Duration = Duration::from_secs(10);
const EPSILON: f64 = 1e-9;

/// Where the bootstrap search for a usable rate starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapOrder {
    #[default]
    LowestFirst,
    HighestFirst,
}

fn is_80211b(rate: Rate) -> bool {
    matches!(rate, 10 | 20 | 55 | 110)
}

/// Airtime of a `len`-byte packet at `rate`, including DIFS, in microseconds.
pub fn tx_time_us(rate: Rate, len: u16) -> f64 {
    let difs = if is_80211b(rate) {
        DIFS_80211B_US
    } else {
        DIFS_80211AG_US
    };
    len as f64 * 80.0 / rate as f64 + difs
}

#[derive(Debug, Clone)]
struct RateStats {
    sent: u32,
    acked: u32,
    naked: u32,
    timed_out: u32,
    len_sent: f64,
    len_acked: f64,
    len_naked: f64,
    len_timed_out: f64,
    consecutive_losses: u32,
    total_tx_time: f64,
    avg_tx_time: f64,
    min_avg_tx_time: f64,
}

impl Default for RateStats {
    fn default() -> Self {
        Self {
            sent: 0,
            acked: 0,
            naked: 0,
            timed_out: 0,
            len_sent: 0.0,
            len_acked: 0.0,
            len_naked: 0.0,
            len_timed_out: 0.0,
            consecutive_losses: 0,
            total_tx_time: 0.0,
            avg_tx_time: NO_TX_TIME,
            min_avg_tx_time: 0.0,
        }
    }
}

impl RateStats {
    fn is_usable(&self) -> bool {
        self.consecutive_losses < MAX_CONSECUTIVE_LOSSES
    }

    fn recompute(&mut self) {
        if self.len_sent.abs() < EPSILON {
            self.len_sent = 0.0;
        }
        if self.total_tx_time.abs() < EPSILON {
            self.total_tx_time = 0.0;
        } else if self.len_sent > 0.0 {
            self.min_avg_tx_time = self.total_tx_time / self.len_sent;
        }

        if self.len_acked.abs() < EPSILON {
            self.len_acked = 0.0;
        }
        if self.len_acked == 0.0 {
            self.avg_tx_time = NO_TX_TIME;
        } else if self.total_tx_time >= self.min_avg_tx_time {
            self.avg_tx_time = self.total_tx_time / self.len_acked;
        }
    }
}

/// SampleRate selector.
#[derive(Debug)]
pub struct SampleRate {
    rates: RateSet,
    stats: Vec<RateStats>,
    total_acked: u32,
    packet_count: u32,
    current: usize,
    dirty: bool,
    bootstrap: BootstrapOrder,
    last_loss_reset: Instant,
    rng: StdRng,
}

impl SampleRate {
    /// Create a selector seeded from entropy.
    pub fn new(rates: RateSet, bootstrap: BootstrapOrder) -> Self {
        Self::with_rng(rates, bootstrap, StdRng::from_entropy())
    }

    /// Create a selector with a deterministic sampling sequence.
    pub fn with_seed(rates: RateSet, bootstrap: BootstrapOrder, seed: u64) -> Self {
        Self::with_rng(rates, bootstrap, StdRng::seed_from_u64(seed))
    }

    fn with_rng(rates: RateSet, bootstrap: BootstrapOrder, rng: StdRng) -> Self {
        let stats = vec![RateStats::default(); rates.len()];
        Self {
            rates,
            stats,
            total_acked: 0,
            packet_count: 0,
            current: 0,
            dirty: true,
            bootstrap,
            last_loss_reset: Instant::now(),
            rng,
        }
    }

    /// Average transmission time per acked byte for `rate`.
    pub fn avg_tx_time(&mut self, rate: Rate) -> Option<f64> {
        self.refresh(Instant::now());
        let i = self.rates.index_of(rate)?;
        Some(self.stats[i].avg_tx_time)
    }

    /// Consecutive losses recorded for `rate`.
    pub fn consecutive_losses(&self, rate: Rate) -> Option<u32> {
        let i = self.rates.index_of(rate)?;
        Some(self.stats[i].consecutive_losses)
    }

    /// Acks currently accounted across all rates.
    pub fn total_acked(&self) -> u32 {
        self.total_acked
    }

    fn refresh(&mut self, now: Instant) {
        if !self.dirty {
            return;
        }
        self.dirty = false;

        if now.saturating_duration_since(self.last_loss_reset) > CONSECUTIVE_LOSS_RESET {
            self.last_loss_reset = now;
            for stats in &mut self.stats {
                stats.consecutive_losses = 0;
            }
        }
        for stats in &mut self.stats {
            stats.recompute();
        }
    }

    fn bootstrap_index(&self) -> usize {
        match self.bootstrap {
            BootstrapOrder::LowestFirst => {
                self.stats.iter().position(RateStats::is_usable).unwrap_or(0)
            }
            BootstrapOrder::HighestFirst => self
                .stats
                .iter()
                .rposition(RateStats::is_usable)
                .unwrap_or(self.stats.len() - 1),
        }
    }

    fn sample_index(&mut self) -> usize {
        let current_avg = self.stats[self.current].avg_tx_time;
        let limit = self.stats.len().min(self.current + SAMPLE_LOOKAHEAD);
        let candidates: Vec<usize> = (0..limit)
            .filter(|&i| {
                let s = &self.stats[i];
                i != self.current && s.is_usable() && s.min_avg_tx_time < current_avg
            })
            .collect();
        candidates
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(self.current)
    }

    fn fastest_index(&self) -> usize {
        let mut best = NO_TX_TIME;
        let mut index = self.current;
        for (i, stats) in self.stats.iter().enumerate() {
            if stats.avg_tx_time < best {
                best = stats.avg_tx_time;
                index = i;
            }
        }
        index
    }
}

impl RateSelector for SampleRate {
    fn select_rate(&mut self, now: Instant) -> Rate {
        self.refresh(now);
        self.packet_count += 1;

        let next = if self.total_acked == 0 {
            self.bootstrap_index()
        } else if self.packet_count % SAMPLE_INTERVAL == 0 {
            self.packet_count = 0;
            self.sample_index()
        } else {
            self.fastest_index()
        };

        if next != self.current {
            debug!(
                from = self.rates.at(self.current),
                to = self.rates.at(next),
                "samplerate switched rate"
            );
            self.current = next;
        }
        self.rates.at(self.current)
    }

    fn record(&mut self, outcome: &Outcome) {
        let Some(i) = self.rates.index_of(outcome.rate) else {
            return;
        };
        if !outcome.status.is_feedback() {
            return;
        }
        let len = outcome.length as f64;
        let stats = &mut self.stats[i];
        stats.sent += 1;
        stats.len_sent += len;
        stats.total_tx_time += tx_time_us(outcome.rate, outcome.length);

        match outcome.status {
            PacketStatus::Acked => {
                self.total_acked += 1;
                stats.acked += 1;
                stats.len_acked += len;
                stats.consecutive_losses = 0;
            }
            PacketStatus::Naked => {
                stats.naked += 1;
                stats.len_naked += len;
                stats.consecutive_losses += 1;
            }
            PacketStatus::TimedOut => {
                stats.timed_out += 1;
                stats.len_timed_out += len;
                stats.consecutive_losses += 1;
            }
            PacketStatus::Sent => {}
        }
        self.dirty = true;
    }

    fn forget(&mut self, outcome: &Outcome) {
        let Some(i) = self.rates.index_of(outcome.rate) else {
            return;
        };
        if !outcome.status.is_feedback() {
            return;
        }
        let len = outcome.length as f64;
        let stats = &mut self.stats[i];
        stats.sent = stats.sent.saturating_sub(1);
        stats.len_sent -= len;
        stats.total_tx_time -= tx_time_us(outcome.rate, outcome.length);

        match outcome.status {
            PacketStatus::Acked => {
                self.total_acked = self.total_acked.saturating_sub(1);
                stats.acked = stats.acked.saturating_sub(1);
                stats.len_acked -= len;
            }
            PacketStatus::Naked => {
                stats.naked = stats.naked.saturating_sub(1);
                stats.len_naked -= len;
            }
            PacketStatus::TimedOut => {
                stats.timed_out = stats.timed_out.saturating_sub(1);
                stats.len_timed_out -= len;
            }
            PacketStatus::Sent => {}
        }
        self.dirty = true;
    }

    fn current_rate(&self) -> Rate {
        self.rates.at(self.current)
    }

    fn reset(&mut self) {
        self.stats = vec![RateStats::default(); self.rates.len()];
        self.total_acked = 0;
        self.packet_count = 0;
        self.current = 0;
        self.dirty = true;
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sample Rate Table: total acked {}", self.total_acked)?;
        writeln!(
            f,
            "rate(Mbps)\tsent\tacked\tlost\tconti_loss\ttotal_tx(us)\tavg_tx(us)\tmin_avg_tx(us)"
        )?;
        for (rate, s) in self.rates.iter().zip(self.stats.iter()) {
            writeln!(
                f,
                "{}\t\t{}\t{}\t{}\t{}\t\t{:.1}\t\t{:.3}\t\t{:.3}",
                rate as f64 / 10.0,
                s.sent,
                s.acked,
                s.naked + s.timed_out,
                s.consecutive_losses,
                s.total_tx_time,
                s.avg_tx_time,
                s.min_avg_tx_time
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates() -> RateSet {
        RateSet::new(&[10, 20, 55, 110]).unwrap()
    }

    fn outcome(seq: u32, status: PacketStatus, rate: Rate, t: Instant) -> Outcome {
        Outcome::new(seq, status, rate, 1000, t)
    }

    #[test]
    fn test_tx_time() {
        // 1000 bytes at 1 Mbps = 8000us plus 802.11b DIFS.
        assert!((tx_time_us(10, 1000) - 8050.0).abs() < 1e-9);
        // 1000 bytes at 6 Mbps plus 802.11a/g DIFS.
        assert!((tx_time_us(60, 1000) - (8000.0 / 6.0 + 28.0)).abs() < 1e-9);
    }

    #[test]
    fn test_bootstrap_lowest() {
        let mut sr = SampleRate::with_seed(rates(), BootstrapOrder::LowestFirst, 7);
        assert_eq!(sr.select_rate(Instant::now()), 10);
    }

    #[test]
    fn test_bootstrap_highest() {
        let mut sr = SampleRate::with_seed(rates(), BootstrapOrder::HighestFirst, 7);
        assert_eq!(sr.select_rate(Instant::now()), 110);
    }

    #[test]
    fn test_bootstrap_skips_failing_rates() {
        let mut sr = SampleRate::with_seed(rates(), BootstrapOrder::HighestFirst, 7);
        let t = Instant::now();
        for seq in 0..4 {
            sr.record(&outcome(seq, PacketStatus::Naked, 110, t));
        }
        assert_eq!(sr.consecutive_losses(110), Some(4));
        assert_eq!(sr.select_rate(t), 55);
    }

    #[test]
    fn test_consecutive_losses_reset_after_interval() {
        let mut sr = SampleRate::with_seed(rates(), BootstrapOrder::HighestFirst, 7);
        let t = Instant::now();
        for seq in 0..4 {
            sr.record(&outcome(seq, PacketStatus::Naked, 110, t));
        }
        assert_eq!(sr.select_rate(t), 55);

        sr.record(&outcome(4, PacketStatus::Naked, 55, t));
        assert_eq!(sr.select_rate(t + Duration::from_secs(5)), 55);
        assert_eq!(sr.consecutive_losses(110), Some(4));

        sr.record(&outcome(5, PacketStatus::Naked, 55, t));
        assert_eq!(sr.select_rate(t + Duration::from_secs(11)), 110);
        assert_eq!(sr.consecutive_losses(110), Some(0));
        assert_eq!(sr.consecutive_losses(55), Some(0));
    }

    #[test]
    fn test_lowest_avg_tx_time_wins() {
        let mut sr = SampleRate::with_seed(rates(), BootstrapOrder::LowestFirst, 7);
        let t = Instant::now();
        sr.record(&outcome(1, PacketStatus::Acked, 10, t));
        sr.record(&outcome(2, PacketStatus::Acked, 20, t));
        assert_eq!(sr.select_rate(t), 20);
        assert!((sr.avg_tx_time(20).unwrap() - 4.05).abs() < 1e-9);
    }

    #[test]
    fn test_tenth_packet_samples_faster_rate() {
        let mut sr = SampleRate::with_seed(rates(), BootstrapOrder::LowestFirst, 42);
        let t = Instant::now();
        sr.record(&outcome(1, PacketStatus::Acked, 10, t));
        sr.record(&outcome(2, PacketStatus::Acked, 20, t));

        for _ in 0..9 {
            assert_eq!(sr.select_rate(t), 20);
        }
        // Untried 5.5 and 11 Mbps have a zero best-case time.
        let sampled = sr.select_rate(t);
        assert!(sampled == 55 || sampled == 110, "sampled {}", sampled);
    }

    #[test]
    fn test_ack_resets_consecutive_losses() {
        let mut sr = SampleRate::with_seed(rates(), BootstrapOrder::LowestFirst, 7);
        let t = Instant::now();
        sr.record(&outcome(1, PacketStatus::Naked, 20, t));
        sr.record(&outcome(2, PacketStatus::TimedOut, 20, t));
        assert_eq!(sr.consecutive_losses(20), Some(2));
        sr.record(&outcome(3, PacketStatus::Acked, 20, t));
        assert_eq!(sr.consecutive_losses(20), Some(0));
    }

    #[test]
    fn test_forget_reverses_record() {
        let mut sr = SampleRate::with_seed(rates(), BootstrapOrder::LowestFirst, 7);
        let t = Instant::now();
        let acked = outcome(1, PacketStatus::Acked, 55, t);
        let lost = outcome(2, PacketStatus::TimedOut, 55, t);
        sr.record(&acked);
        sr.record(&lost);
        assert_eq!(sr.total_acked(), 1);

        sr.forget(&acked);
        sr.forget(&lost);
        assert_eq!(sr.total_acked(), 0);
        assert_eq!(sr.avg_tx_time(55), Some(NO_TX_TIME));
        let s = &sr.stats[2];
        assert_eq!((s.sent, s.acked, s.timed_out), (0, 0, 0));
        assert_eq!(s.len_sent, 0.0);
        assert_eq!(s.total_tx_time, 0.0);
    }

    #[test]
    fn test_unknown_rate_ignored() {
        let mut sr = SampleRate::with_seed(rates(), BootstrapOrder::LowestFirst, 7);
        sr.record(&outcome(1, PacketStatus::Acked, 60, Instant::now()));
        assert_eq!(sr.total_acked(), 0);
    }

    #[test]
    fn test_reset() {
        let mut sr = SampleRate::with_seed(rates(), BootstrapOrder::LowestFirst, 7);
        let t = Instant::now();
        sr.record(&outcome(1, PacketStatus::Acked, 20, t));
        assert_eq!(sr.select_rate(t), 20);
        sr.reset();
        assert_eq!(sr.current_rate(), 10);
        assert_eq!(sr.total_acked(), 0);
    }
}
