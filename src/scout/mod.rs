//! # Scout rate adaptation
//!
//! Per-flow orchestrator combining the front and back vantage points into
//! one decision per batch.
//!
//! ## Decision flow
//!
//! 1. Combine per-rate loss estimates according to the active mode's
//!    [`CombineMode`] (skipped for [`TransmitMode::TimeOut`]).
//! 2. Pick the rate: the baseline selector, the fixed rate, or the rate
//!    with the highest expected goodput.
//! 3. Size FEC for the transmit mode.
//! 4. Decide duplication over the secondary path.
//! 5. Add probe packets at higher rates and build the per-packet rate list.
//!
//! ## Locking
//!
//! Every window and loss map carries its own lock. The orchestrator's
//! decision state is held across a decision and may take component locks
//! one at a time; component locks are never nested. Reads across maps
//! within one decision are therefore not a consistent snapshot, and
//! feedback racing a decision may be seen half-applied.

use std::fmt::{self, Write as _};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::baseline::{BaselineAdaptation, BaselineKind};
use crate::{
    is_valid_loss, Error, FeedbackWindow, LossMap, LossView, Outcome, Rate, RateSet, Vantage,
    INVALID_LOSS,
};

mod config;
mod fec;
mod sampling;

#[cfg(test)]
mod tests;

pub use config::ScoutConfig;
pub use fec::{
    packet_duration_us, FecSize, FecSizer, DATA_START_REDUNDANCY, EXTRA_REDUNDANCY,
    RECOVERY_START_REDUNDANCY,
};
pub use sampling::{is_feasible, sample_random, sample_rates, sample_sequential, SampleMode};

/// Probes allowed on a duplicated batch.
const DUPLICATE_PROBES: usize = 1;

/// Sampling bound on a duplicated batch.
const DUPLICATE_SAMPLE_BOUND: usize = 2;

/// Replace rather than blend.
const REPLACE: f64 = -1.0;

// =============================================================================
// Modes
// =============================================================================

/// Rate adaptation algorithm driving a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdaptationMode {
    /// Stay on the rate set with `set_rate`.
    Fixed,
    /// SampleRate baseline on back feedback.
    SampleRate,
    /// RRAA baseline on back feedback.
    Rraa,
    /// Delayed front/back combine, sequential probing.
    BatchSequential,
    /// Delayed front/back combine, random probing.
    BatchRandom,
    /// Scout lookup, sequential probing.
    ScoutSequential,
    /// Scout lookup, random probing.
    ScoutRandom,
    /// Scout lookup, sequential probing, rates above the loss bound excluded.
    ScoutBoundedLossSequential,
    /// Scout lookup, random probing, rates above the loss bound excluded.
    ScoutBoundedLossRandom,
}

/// How vantage estimates are merged into the combined loss map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombineMode {
    FrontOnly,
    BackOnly,
    /// Delayed front and back estimates.
    DelayCombine,
    /// Front resolved at the back antenna's current location, then combined with back.
    ScoutCombine,
}

/// Combine and sample behaviour of an [`AdaptationMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeProfile {
    pub combine: CombineMode,
    pub sample: SampleMode,
}

/// Indexed by `AdaptationMode as usize`.
const MODE_TABLE: [(AdaptationMode, CombineMode, SampleMode); 9] = [
    (AdaptationMode::Fixed, CombineMode::BackOnly, SampleMode::None),
    (AdaptationMode::SampleRate, CombineMode::BackOnly, SampleMode::None),
    (AdaptationMode::Rraa, CombineMode::BackOnly, SampleMode::None),
    (AdaptationMode::BatchSequential, CombineMode::DelayCombine, SampleMode::Sequential),
    (AdaptationMode::BatchRandom, CombineMode::DelayCombine, SampleMode::Random),
    (AdaptationMode::ScoutSequential, CombineMode::ScoutCombine, SampleMode::Sequential),
    (AdaptationMode::ScoutRandom, CombineMode::ScoutCombine, SampleMode::Random),
    (
        AdaptationMode::ScoutBoundedLossSequential,
        CombineMode::ScoutCombine,
        SampleMode::Sequential,
    ),
    (
        AdaptationMode::ScoutBoundedLossRandom,
        CombineMode::ScoutCombine,
        SampleMode::Random,
    ),
];

// Every mode must sit at its own index.
const _: () = {
    let mut i = 0;
    while i < MODE_TABLE.len() {
        assert!(MODE_TABLE[i].0 as usize == i);
        assert!(AdaptationMode::ALL[i] as usize == i);
        i += 1;
    }
};

impl AdaptationMode {
    /// Every mode, in code order.
    pub const ALL: [AdaptationMode; 9] = [
        AdaptationMode::Fixed,
        AdaptationMode::SampleRate,
        AdaptationMode::Rraa,
        AdaptationMode::BatchSequential,
        AdaptationMode::BatchRandom,
        AdaptationMode::ScoutSequential,
        AdaptationMode::ScoutRandom,
        AdaptationMode::ScoutBoundedLossSequential,
        AdaptationMode::ScoutBoundedLossRandom,
    ];

    /// Decode a numeric mode as used by configuration front-ends.
    pub fn from_code(code: u8) -> Result<Self, Error> {
        Self::ALL
            .get(code as usize)
            .copied()
            .ok_or(Error::InvalidMode(code))
    }

    /// Numeric code accepted by [`from_code`](Self::from_code).
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Combine and sampling behaviour of this mode.
    #[inline]
    pub fn profile(self) -> ModeProfile {
        let (_, combine, sample) = MODE_TABLE[self as usize];
        ModeProfile { combine, sample }
    }

    /// The baseline algorithm this mode runs, if any.
    pub fn baseline(self) -> Option<BaselineKind> {
        match self {
            AdaptationMode::SampleRate => Some(BaselineKind::SampleRate),
            AdaptationMode::Rraa => Some(BaselineKind::Rraa),
            _ => None,
        }
    }

    /// Whether rates above the loss bound are excluded.
    pub fn is_bounded_loss(self) -> bool {
        matches!(
            self,
            AdaptationMode::ScoutBoundedLossSequential | AdaptationMode::ScoutBoundedLossRandom
        )
    }
}

impl fmt::Display for AdaptationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdaptationMode::Fixed => "Fixed rate",
            AdaptationMode::SampleRate => "Sample Rate",
            AdaptationMode::Rraa => "RRAA",
            AdaptationMode::BatchSequential => "Batch sequential",
            AdaptationMode::BatchRandom => "Batch random",
            AdaptationMode::ScoutSequential => "Scout sequential",
            AdaptationMode::ScoutRandom => "Scout random",
            AdaptationMode::ScoutBoundedLossSequential => "Scout bounded loss sequential",
            AdaptationMode::ScoutBoundedLossRandom => "Scout bounded loss random",
        };
        f.write_str(name)
    }
}

/// Why a decision is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitMode {
    /// First packet of a fresh batch.
    Data,
    /// Flush of a partial batch of `k` packets after a batch timeout.
    /// Reuses the previous rate decision.
    TimeOut { k: usize },
    /// Retransmission of `k` lost packets.
    Retransmission { k: usize },
}

/// Parameters for one coded batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Original packets in the batch.
    pub k: usize,
    /// Packets to transmit, probes included. Equals `rates.len()`.
    pub n: usize,
    /// Rate of each transmitted packet.
    pub rates: Vec<Rate>,
    /// Also send the batch over the secondary path.
    pub duplicate: bool,
}

/// Merge a front and a back loss estimate.
///
/// Unknown on either side yields the other side (the larger of the two);
/// a zero on either side halves the larger; otherwise losses are treated
/// as independent and multiplied.
pub fn combine_front_back(front: f64, back: f64) -> f64 {
    if !is_valid_loss(front) || !is_valid_loss(back) {
        front.max(back)
    } else if front == 0.0 || back == 0.0 {
        front.max(back) / 2.0
    } else {
        front * back
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

#[derive(Debug)]
struct DecisionState {
    mode: AdaptationMode,
    rate_index: usize,
    use_fec: bool,
    enable_duplicate: bool,
    /// Metres per second; non-positive means unknown.
    speed: f64,
    duplicate_threshold: f64,
    loss_bound: f64,
    /// Rates not ruled out at the back vantage; empty means unconstrained.
    feasible: Vec<Rate>,
    samples: Vec<Rate>,
    rng: StdRng,
}

/// Link adaptation for one flow.
///
/// Feedback may be inserted from any number of threads. Decisions for a
/// flow are expected from a single sender thread.
pub struct ScoutRateAdaptation {
    rates: RateSet,
    config: ScoutConfig,
    front: FeedbackWindow,
    back: FeedbackWindow,
    front_loss: LossMap,
    back_loss: LossMap,
    scout_loss: LossMap,
    combined_loss: LossMap,
    baseline: Mutex<Option<BaselineAdaptation>>,
    state: Mutex<DecisionState>,
}

impl ScoutRateAdaptation {
    /// Create an orchestrator in [`AdaptationMode::ScoutSequential`],
    /// starting on the lowest rate.
    ///
    /// # Errors
    /// Whatever [`ScoutConfig::validate`] rejects.
    pub fn new(rates: RateSet, config: ScoutConfig) -> Result<Self, Error> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let state = DecisionState {
            mode: AdaptationMode::ScoutSequential,
            rate_index: 0,
            use_fec: true,
            enable_duplicate: true,
            speed: -1.0,
            duplicate_threshold: config.duplicate_threshold,
            loss_bound: config.loss_bound,
            feasible: Vec::new(),
            samples: Vec::new(),
            rng,
        };

        Ok(Self {
            front: FeedbackWindow::new(rates.clone(), config.total_window),
            back: FeedbackWindow::new(rates.clone(), config.total_window),
            front_loss: LossMap::new(rates.clone()),
            back_loss: LossMap::new(rates.clone()),
            scout_loss: LossMap::new(rates.clone()),
            combined_loss: LossMap::new(rates.clone()),
            baseline: Mutex::new(None),
            state: Mutex::new(state),
            rates,
            config,
        })
    }

    /// Candidate rates, ascending.
    pub fn rates(&self) -> &RateSet {
        &self.rates
    }

    /// Configuration this context was built with.
    pub fn config(&self) -> &ScoutConfig {
        &self.config
    }

    /// Feedback window of a vantage point.
    pub fn feedback_window(&self, vantage: Vantage) -> &FeedbackWindow {
        match vantage {
            Vantage::Front => &self.front,
            Vantage::Back => &self.back,
        }
    }

    /// One of the four loss maps, for statistics reporting.
    pub fn loss_map(&self, view: LossView) -> &LossMap {
        match view {
            LossView::Front => &self.front_loss,
            LossView::Back => &self.back_loss,
            LossView::Scout => &self.scout_loss,
            LossView::Combined => &self.combined_loss,
        }
    }

    /// Best `rate * (1 - loss)` in a view, skipping rates without data.
    pub fn throughput_estimate(&self, view: LossView) -> Option<f64> {
        self.loss_map(view).throughput_estimate()
    }

    // -------------------------------------------------------------------------
    // Feedback
    // -------------------------------------------------------------------------

    /// Record a delivery outcome seen from `vantage`.
    ///
    /// Back outcomes also feed the baseline selector while a baseline mode
    /// is active.
    pub fn insert_feedback(&self, vantage: Vantage, outcome: Outcome) -> Result<(), Error> {
        self.feedback_window(vantage).insert_outcome(outcome)?;
        if vantage == Vantage::Back {
            self.feed_baseline(std::slice::from_ref(&outcome));
        }
        Ok(())
    }

    /// Record a burst of outcomes and refresh the vantage's loss estimate
    /// over the span they cover.
    ///
    /// Every outcome is validated before any is recorded.
    pub fn insert_feedback_batch(&self, vantage: Vantage, outcomes: &[Outcome]) -> Result<(), Error> {
        for outcome in outcomes {
            if !outcome.status.is_feedback() {
                return Err(Error::InvalidStatus(outcome.status));
            }
            if !self.rates.contains(outcome.rate) {
                return Err(Error::UnknownRate(outcome.rate));
            }
        }
        let (Some(first), Some(last)) = (
            outcomes.iter().map(|o| o.timestamp).min(),
            outcomes.iter().map(|o| o.timestamp).max(),
        ) else {
            return Ok(());
        };

        let window = self.feedback_window(vantage);
        for outcome in outcomes {
            window.insert_outcome(*outcome)?;
        }
        if vantage == Vantage::Back {
            self.feed_baseline(outcomes);
        }

        let nudge = Duration::from_nanos(1);
        let start = first.checked_sub(nudge).unwrap_or(first);
        self.update_loss_from_window(vantage, start, last + nudge);
        Ok(())
    }

    fn feed_baseline(&self, outcomes: &[Outcome]) {
        if self.state.lock().mode.baseline().is_none() {
            return;
        }
        if let Some(baseline) = self.baseline.lock().as_mut() {
            for outcome in outcomes {
                baseline.insert_record(*outcome);
            }
        }
    }

    /// Blend the loss observed by `vantage` over `[start, end)` into its
    /// loss map and mirror the per-rate counts.
    ///
    /// Rates without data in range keep their previous estimate.
    pub fn update_loss_from_window(&self, vantage: Vantage, start: Instant, end: Instant) {
        let map = self.loss_map(vantage.into());
        let tally = self.feedback_window(vantage).tally(start, end);
        for i in 0..self.rates.len() {
            match &tally {
                Some(table) => {
                    map.update_loss_at(i, table[i].loss(), self.config.back_loss_weight);
                    map.update_counts_at(i, table[i].sent, table[i].acked);
                }
                None => map.update_loss_at(i, INVALID_LOSS, self.config.back_loss_weight),
            }
        }
    }

    /// Force the front, back and scout estimates to total loss.
    pub fn set_high_loss(&self) {
        warn!(rates = %self.rates, "forcing high loss on all rates");
        for map in [&self.front_loss, &self.back_loss, &self.scout_loss] {
            for i in 0..self.rates.len() {
                map.update_loss_at(i, 1.0, REPLACE);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Decisions
    // -------------------------------------------------------------------------

    /// Decide `(k, n)`, the per-packet rates and duplication for the next batch.
    ///
    /// `coherence_us` bounds the batch airtime, `extra_us` is per-packet
    /// overhead on top of the payload airtime.
    pub fn make_decision(
        &self,
        mode: TransmitMode,
        coherence_us: u32,
        packet_size: u16,
        extra_us: u32,
    ) -> Result<Decision, Error> {
        self.make_decision_at(Instant::now(), mode, coherence_us, packet_size, extra_us)
    }

    /// [`make_decision`](Self::make_decision) at an explicit instant.
    pub fn make_decision_at(
        &self,
        now: Instant,
        mode: TransmitMode,
        coherence_us: u32,
        packet_size: u16,
        extra_us: u32,
    ) -> Result<Decision, Error> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let profile = state.mode.profile();

        if !matches!(mode, TransmitMode::TimeOut { .. }) {
            self.combine_losses(state, profile.combine, now);
            self.apply_rate(state, now);
        }

        let rate = self.rates.at(state.rate_index);
        let loss = self.combined_loss.loss_at(state.rate_index);
        let sizer = FecSizer {
            field_size: self.config.effective_field_size(),
            max_k: self.config.max_k,
            use_fec: state.use_fec,
        };
        let packet_us = packet_duration_us(rate, packet_size, extra_us);
        let size = match mode {
            TransmitMode::Data => sizer.data(loss, coherence_us, packet_us)?,
            TransmitMode::TimeOut { k } => sizer.timeout(loss, k)?,
            TransmitMode::Retransmission { k } => {
                sizer.retransmission(loss, k, coherence_us, packet_us)?
            }
        };

        let high_loss = loss > state.duplicate_threshold;
        let retransmission = matches!(mode, TransmitMode::Retransmission { .. });
        let bootstrapping = state.rate_index == 0;
        let duplicate = state.enable_duplicate && (high_loss || retransmission || bootstrapping);

        // A duplicated batch must not slow the secondary link down.
        let (coded, probes, bound) = if duplicate {
            (
                size.k,
                self.config.num_sample_rates.min(DUPLICATE_PROBES),
                DUPLICATE_SAMPLE_BOUND,
            )
        } else {
            (size.n, self.config.num_sample_rates, self.config.sample_bound)
        };
        state.samples = sample_rates(
            profile.sample,
            &self.rates,
            state.rate_index,
            probes,
            bound,
            &state.feasible,
            &mut state.rng,
        );

        let rates = self.rates_for_batch(state, rate, coded, now);
        let decision = Decision {
            k: size.k,
            n: rates.len(),
            rates,
            duplicate,
        };
        debug!(
            mode = ?mode,
            rate,
            loss,
            k = decision.k,
            n = decision.n,
            duplicate,
            high_loss,
            bootstrapping,
            samples = ?state.samples,
            "batch decision"
        );
        Ok(decision)
    }

    fn combine_losses(&self, state: &mut DecisionState, combine: CombineMode, now: Instant) {
        if combine == CombineMode::ScoutCombine {
            self.scout_lookup(state, now);
        }

        for i in 0..self.rates.len() {
            let loss = match combine {
                CombineMode::FrontOnly => self.front_loss.loss_at(i),
                CombineMode::BackOnly => self.back_loss.loss_at(i),
                CombineMode::DelayCombine => {
                    combine_front_back(self.front_loss.loss_at(i), self.back_loss.loss_at(i))
                }
                CombineMode::ScoutCombine => {
                    let front = self.scout_loss.loss_at(i).max(self.front_loss.loss_at(i));
                    combine_front_back(front, self.back_loss.loss_at(i))
                }
            };
            self.combined_loss.update_loss_at(i, loss, REPLACE);
        }
    }

    /// Look up what the front antenna saw where the back antenna is now,
    /// and refresh the feasible rates from recent back feedback.
    fn scout_lookup(&self, state: &mut DecisionState, now: Instant) {
        let lookup = self.aligned_front_window(state.speed, now).and_then(|(start, end)| {
            self.front.loss_rates(start, end, self.rates.as_slice())
        });
        for i in 0..self.rates.len() {
            let loss = lookup.as_ref().map_or(INVALID_LOSS, |losses| losses[i]);
            self.scout_loss.update_loss_at(i, loss, REPLACE);
        }

        let since = now.checked_sub(self.config.back_window).unwrap_or(now);
        state.feasible = self
            .back
            .feasible_rates(since, now)
            .unwrap_or_else(|| self.rates.as_slice().to_vec());
    }

    /// Front window centred on when the front antenna was at the back
    /// antenna's current location.
    fn aligned_front_window(&self, speed: f64, now: Instant) -> Option<(Instant, Instant)> {
        if speed <= 0.0 {
            return None;
        }
        let lag = Duration::try_from_secs_f64(self.config.antenna_distance_m / speed).ok()?;
        let aligned = now.checked_sub(lag)?;
        let half = self.config.front_window / 2;
        Some((aligned.checked_sub(half)?, aligned.checked_add(half)?))
    }

    fn apply_rate(&self, state: &mut DecisionState, now: Instant) {
        match state.mode {
            AdaptationMode::SampleRate | AdaptationMode::Rraa => {
                if let Some(baseline) = self.baseline.lock().as_mut() {
                    let rate = baseline.select_rate(now);
                    if let Some(index) = self.rates.index_of(rate) {
                        state.rate_index = index;
                    }
                }
            }
            AdaptationMode::Fixed => {}
            AdaptationMode::ScoutBoundedLossSequential | AdaptationMode::ScoutBoundedLossRandom => {
                let bound = state.loss_bound;
                self.apply_rate_scout(state, bound);
            }
            AdaptationMode::BatchSequential
            | AdaptationMode::BatchRandom
            | AdaptationMode::ScoutSequential
            | AdaptationMode::ScoutRandom => self.apply_rate_scout(state, f64::INFINITY),
        }
    }

    /// Move to the feasible rate with the best expected goodput.
    ///
    /// Untried rates above the current one score zero; untried rates at
    /// or below it score their nominal rate.
    fn apply_rate_scout(&self, state: &mut DecisionState, loss_threshold: f64) {
        let current = self.rates.at(state.rate_index);
        let mut best = (0, f64::NEG_INFINITY);
        for (i, rate) in self.rates.iter().enumerate() {
            let loss = self.combined_loss.loss_at(i);
            let nominal = rate as f64 / 10.0;
            let mut goodput = if !is_valid_loss(loss) {
                if rate > current {
                    0.0
                } else {
                    nominal
                }
            } else {
                nominal * (1.0 - loss)
            };
            if !is_feasible(&state.feasible, rate) || loss > loss_threshold {
                goodput = 0.0;
            }
            if goodput > best.1 {
                best = (i, goodput);
            }
        }
        state.rate_index = best.0;
    }

    fn rates_for_batch(&self, state: &DecisionState, rate: Rate, coded: usize, now: Instant) -> Vec<Rate> {
        match state.mode {
            AdaptationMode::SampleRate | AdaptationMode::Rraa => {
                let mut rates = Vec::with_capacity(coded.max(1));
                rates.push(rate);
                match self.baseline.lock().as_mut() {
                    Some(baseline) => {
                        rates.extend((1..coded).map(|_| baseline.select_rate(now)));
                    }
                    None => rates.resize(coded.max(1), rate),
                }
                rates
            }
            AdaptationMode::Fixed => vec![rate; coded],
            _ => {
                let mut rates = vec![rate; coded];
                rates.extend_from_slice(&state.samples);
                rates.sort_unstable();
                rates
            }
        }
    }

    // -------------------------------------------------------------------------
    // Runtime settings
    // -------------------------------------------------------------------------

    /// Active adaptation mode.
    pub fn mode(&self) -> AdaptationMode {
        self.state.lock().mode
    }

    /// Switch algorithm. Entering a baseline mode builds its selector on
    /// first use, or rebuilds it when the baseline kind changes.
    pub fn set_mode(&self, mode: AdaptationMode) {
        let mut state = self.state.lock();
        if let Some(kind) = mode.baseline() {
            let mut baseline = self.baseline.lock();
            if baseline.as_ref().map(|b| b.kind()) != Some(kind) {
                *baseline = Some(BaselineAdaptation::with_kind(
                    kind,
                    self.rates.clone(),
                    self.config.bootstrap_order,
                    self.config.seed,
                ));
            }
        }
        if state.mode != mode {
            info!(from = %state.mode, to = %mode, "adaptation mode changed");
        }
        state.mode = mode;
    }

    /// How the active mode merges front and back loss.
    pub fn combine_mode(&self) -> CombineMode {
        self.mode().profile().combine
    }

    /// How the active mode picks probe rates.
    pub fn sample_mode(&self) -> SampleMode {
        self.mode().profile().sample
    }

    /// Whether data batches carry redundancy.
    pub fn use_fec(&self) -> bool {
        self.state.lock().use_fec
    }

    /// Turn redundancy on or off for later decisions.
    pub fn set_use_fec(&self, use_fec: bool) {
        self.state.lock().use_fec = use_fec;
    }

    /// Whether high loss switches to duplicated batches.
    pub fn enable_duplicate(&self) -> bool {
        self.state.lock().enable_duplicate
    }

    /// Allow or forbid duplicated batches.
    pub fn set_enable_duplicate(&self, enable: bool) {
        self.state.lock().enable_duplicate = enable;
    }

    /// Client speed in metres per second.
    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    /// Client speed in metres per second; non-positive disables the scout lookup.
    pub fn set_speed(&self, speed: f64) {
        self.state.lock().speed = speed;
    }

    /// Loss above which batches are duplicated.
    pub fn duplicate_threshold(&self) -> f64 {
        self.state.lock().duplicate_threshold
    }

    /// Set the duplication threshold. Must lie in `[0, 1]`.
    pub fn set_duplicate_threshold(&self, threshold: f64) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidLoss(threshold));
        }
        self.state.lock().duplicate_threshold = threshold;
        Ok(())
    }

    /// Loss ceiling for the bounded-loss modes.
    pub fn loss_bound(&self) -> f64 {
        self.state.lock().loss_bound
    }

    /// Set the bounded-loss ceiling. Must lie in `[0, 1]`.
    pub fn set_loss_bound(&self, bound: f64) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&bound) {
            return Err(Error::InvalidLoss(bound));
        }
        self.state.lock().loss_bound = bound;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Current selection
    // -------------------------------------------------------------------------

    /// Rate chosen by the last decision.
    pub fn rate(&self) -> Rate {
        self.rates.at(self.state.lock().rate_index)
    }

    /// Index of [`rate`](Self::rate) in the candidate set.
    pub fn rate_index(&self) -> usize {
        self.state.lock().rate_index
    }

    /// Candidate rate at `index`.
    pub fn rate_at(&self, index: usize) -> Option<Rate> {
        self.rates.get(index)
    }

    /// Pin the rate. Used by [`AdaptationMode::Fixed`].
    pub fn set_rate(&self, rate: Rate) -> Result<(), Error> {
        let index = self.rates.index_of(rate).ok_or(Error::UnknownRate(rate))?;
        self.state.lock().rate_index = index;
        Ok(())
    }

    /// Still on the lowest rate.
    pub fn is_bootstrapping(&self) -> bool {
        self.state.lock().rate_index == 0
    }

    /// Feasible rates from the last scout lookup; empty means unconstrained.
    pub fn feasible_rates(&self) -> Vec<Rate> {
        self.state.lock().feasible.clone()
    }

    /// Whether `rate` passed the last feasibility check.
    pub fn is_feasible(&self, rate: Rate) -> bool {
        is_feasible(&self.state.lock().feasible, rate)
    }

    /// Probe rates added to the last decision.
    pub fn sample_rates(&self) -> Vec<Rate> {
        self.state.lock().samples.clone()
    }

    /// Human-readable state of every component.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = self.write_dump(&mut out);
        out
    }

    fn write_dump(&self, out: &mut String) -> fmt::Result {
        let (mode, rate) = {
            let state = self.state.lock();
            (state.mode, self.rates.at(state.rate_index))
        };
        writeln!(out, "Rate adaptation version: {mode}")?;
        writeln!(out, "Rates: {}  current: {}", self.rates, rate)?;
        for (title, map) in [
            ("Front", &self.front_loss),
            ("Back", &self.back_loss),
            ("Scout", &self.scout_loss),
            ("Combine", &self.combined_loss),
        ] {
            writeln!(out, "---{title} Loss Map---")?;
            write!(out, "{map}")?;
        }
        writeln!(out, "===Front Feedback Records===")?;
        write!(out, "{}", self.front)?;
        writeln!(out, "===Back Feedback Records===")?;
        write!(out, "{}", self.back)?;
        if let Some(baseline) = self.baseline.lock().as_ref() {
            write!(out, "{baseline}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ScoutRateAdaptation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScoutRateAdaptation")
            .field("rates", &self.rates)
            .field("mode", &state.mode)
            .field("rate", &self.rates.at(state.rate_index))
            .field("use_fec", &state.use_fec)
            .field("enable_duplicate", &state.enable_duplicate)
            .finish()
    }
}
