//! Probe rate selection.
//!
//! Probes go to rates above the current one. If fewer than requested are
//! found, the remainder is filled with the rate just below the current
//! selection so the top rates still get protective redundancy.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::{Rate, RateSet};

/// How probe rates are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleMode {
    /// No probing.
    None,
    /// The next higher rates, in order.
    Sequential,
    /// Uniformly from a bounded band of higher rates, without replacement.
    Random,
}

/// A rate is feasible if `feasible` is empty (no evidence) or contains it.
#[inline]
pub fn is_feasible(feasible: &[Rate], rate: Rate) -> bool {
    feasible.is_empty() || feasible.contains(&rate)
}

/// Feasible rates among the `count` rates starting at index `start`.
pub fn sample_sequential(rates: &RateSet, start: usize, count: usize, feasible: &[Rate]) -> Vec<Rate> {
    rates
        .as_slice()
        .iter()
        .skip(start)
        .take(count)
        .copied()
        .filter(|&rate| is_feasible(feasible, rate))
        .collect()
}

/// Up to `count` distinct feasible rates drawn from the `bound` rates
/// starting at index `start`.
pub fn sample_random<R: Rng + ?Sized>(
    rates: &RateSet,
    start: usize,
    count: usize,
    bound: usize,
    feasible: &[Rate],
    rng: &mut R,
) -> Vec<Rate> {
    debug_assert!(count <= bound);
    let band: Vec<Rate> = rates
        .as_slice()
        .iter()
        .skip(start)
        .take(bound)
        .copied()
        .filter(|&rate| is_feasible(feasible, rate))
        .collect();
    band.choose_multiple(rng, count).copied().collect()
}

/// Probe rates for a batch sent at `rates[current]`.
pub fn sample_rates<R: Rng + ?Sized>(
    mode: SampleMode,
    rates: &RateSet,
    current: usize,
    count: usize,
    bound: usize,
    feasible: &[Rate],
    rng: &mut R,
) -> Vec<Rate> {
    let start = current + 1;
    let mut samples = match mode {
        SampleMode::None => return Vec::new(),
        _ if count == 0 => return Vec::new(),
        SampleMode::Sequential => sample_sequential(rates, start, count, feasible),
        SampleMode::Random => sample_random(rates, start, count, bound, feasible, rng),
    };

    let below = rates.at(current.saturating_sub(1));
    samples.resize(count, below);
    samples
}
