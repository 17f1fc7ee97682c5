//! Orchestrator configuration.

use std::time::Duration;

use crate::baseline::BootstrapOrder;
use crate::Error;

/// Configuration for [`ScoutRateAdaptation`](super::ScoutRateAdaptation).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoutConfig {
    // === Coding parameters ===
    /// Coding field size; bounds `n` before probe packets are reserved.
    pub field_size: usize,

    /// Maximum number of original packets per batch.
    pub max_k: usize,

    // === Scout lookup ===
    /// Distance between the front and back antennas in metres.
    pub antenna_distance_m: f64,

    /// Width of the front lookup window around the aligned instant.
    pub front_window: Duration,

    /// How far back the back vantage is consulted for feasible rates.
    pub back_window: Duration,

    /// Retention of both feedback windows.
    pub total_window: Duration,

    /// Blend weight applied to the prior on window recomputes.
    pub back_loss_weight: f64,

    // === Decision thresholds ===
    /// Combined loss above which a batch is also duplicated.
    pub duplicate_threshold: f64,

    /// Loss above which bounded-loss modes never select a rate.
    pub loss_bound: f64,

    // === Probing ===
    /// Probe packets at higher rates added to each batch.
    pub num_sample_rates: usize,

    /// How many rates above the current one random probing draws from.
    pub sample_bound: usize,

    /// Bootstrap preference of the SampleRate baseline.
    pub bootstrap_order: BootstrapOrder,

    /// Fixed seed for probing and baseline sampling; entropy if `None`.
    pub seed: Option<u64>,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            // GF(256)
            field_size: 256,
            max_k: 32,

            antenna_distance_m: 1.1,
            front_window: Duration::from_millis(50),
            back_window: Duration::from_millis(100),
            total_window: Duration::from_secs(10),
            back_loss_weight: 0.2,

            duplicate_threshold: 0.7,
            loss_bound: 0.65,

            num_sample_rates: 1,
            sample_bound: 2,
            bootstrap_order: BootstrapOrder::LowestFirst,
            seed: None,
        }
    }
}

impl ScoutConfig {
    /// Probe two higher rates per batch, drawn from the next three.
    pub fn aggressive_probing() -> Self {
        Self {
            num_sample_rates: 2,
            sample_bound: 3,
            ..Self::default()
        }
    }

    /// Duplicate early and never probe.
    pub fn conservative() -> Self {
        Self {
            duplicate_threshold: 0.4,
            num_sample_rates: 0,
            sample_bound: 0,
            ..Self::default()
        }
    }

    /// Field size left for coded packets once probes are reserved.
    #[inline]
    pub fn effective_field_size(&self) -> usize {
        self.field_size.saturating_sub(self.num_sample_rates)
    }

    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_k == 0 {
            return Err(Error::InvalidMaxK);
        }
        // TimeOut sizing divides by (field - 1) and needs room for k.
        if self.effective_field_size() <= self.max_k {
            return Err(Error::InvalidFieldSize {
                field_size: self.field_size,
                max_k: self.max_k,
                probes: self.num_sample_rates,
            });
        }
        if self.num_sample_rates > self.sample_bound {
            return Err(Error::InvalidSampling {
                count: self.num_sample_rates,
                bound: self.sample_bound,
            });
        }
        for value in [self.duplicate_threshold, self.loss_bound] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidLoss(value));
            }
        }
        if self.back_loss_weight > 1.0 {
            return Err(Error::InvalidWeight(self.back_loss_weight));
        }
        Ok(())
    }
}
