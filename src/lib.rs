//! # Scout Rate Adaptation
//!
//! Link-adaptation core for a wireless access point. Given a stream of
//! per-packet delivery outcomes (ACK / NAK / timeout) observed from one or
//! more vantage points, it decides:
//!
//! - which transmission rate to use for the next batch,
//! - how much FEC redundancy to add (the `(k, n)` pair handed to the coder),
//! - whether the batch should also be duplicated over a secondary path.
//!
//! ## Architecture
//!
//! ```text
//!  outcomes ──► FeedbackWindow (front) ──┐
//!           ──► FeedbackWindow (back)  ──┼──► LossMap ×4 ──► combine ──► rate ──► FEC ──► probes
//!           ──► baseline selector ───────┘   (front, back,                           │
//!               (SampleRate / RRAA)           scout, combined)                       ▼
//!                                                                    Decision { k, n, rates, duplicate }
//! ```
//!
//! The coder, the transport and the retransmission buffer live elsewhere;
//! this crate only produces the parameters they consume.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Instant;
//! use scout_rate::{Outcome, PacketStatus, RateSet, Vantage};
//! use scout_rate::scout::{ScoutConfig, ScoutRateAdaptation, TransmitMode};
//!
//! let rates = RateSet::new(&[60, 90, 120, 180, 240]).unwrap();
//! let scout = ScoutRateAdaptation::new(rates, ScoutConfig::default()).unwrap();
//!
//! let now = Instant::now();
//! scout
//!     .insert_feedback(Vantage::Back, Outcome::new(1, PacketStatus::Acked, 60, 1400, now))
//!     .unwrap();
//!
//! let decision = scout.make_decision(TransmitMode::Data, 20_000, 1500, 100).unwrap();
//! assert!(decision.k >= 1 && decision.k <= decision.n);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

pub mod baseline;
pub mod feedback;
pub mod flows;
pub mod loss_map;
pub mod scout;

pub use feedback::{FeedbackWindow, RateTally};
pub use loss_map::{LossEntry, LossMap};

/// A link rate, expressed as ten times its value in Mbps (e.g. `55` = 5.5 Mbps).
pub type Rate = u16;

/// Sentinel loss value meaning "no information yet".
pub const INVALID_LOSS: f64 = -1.0;

/// Whether a loss value carries information (is not [`INVALID_LOSS`]).
#[inline]
pub fn is_valid_loss(loss: f64) -> bool {
    loss != INVALID_LOSS
}

/// Error type for rate adaptation operations.
///
/// Every variant is a precondition violation by the caller; "no data"
/// situations are never reported as errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The candidate rate set is empty.
    #[error("candidate rate set is empty")]
    EmptyRateSet,

    /// Candidate rates are not strictly ascending.
    #[error("candidate rates must be strictly ascending")]
    UnsortedRates,

    /// Rate is not a member of the candidate rate set.
    #[error("rate {0} is not a candidate rate")]
    UnknownRate(Rate),

    /// A `Sent` status was passed where only delivery feedback is accepted.
    #[error("packet status {0:?} is not delivery feedback")]
    InvalidStatus(PacketStatus),

    /// Loss value outside `[0, 1]` that is not the invalid sentinel.
    #[error("loss {0} is outside [0, 1]")]
    InvalidLoss(f64),

    /// Blend weight above 1.
    #[error("previous weight {0} is greater than 1")]
    InvalidWeight(f64),

    /// Unknown numeric adaptation mode.
    #[error("invalid adaptation mode code {0}")]
    InvalidMode(u8),

    /// Maximum batch size of zero.
    #[error("max_k must be at least 1")]
    InvalidMaxK,

    /// Coding field too small for the configured batch and probe sizes.
    #[error("field size {field_size} cannot hold max_k {max_k} plus {probes} probe packets")]
    InvalidFieldSize {
        field_size: usize,
        max_k: usize,
        probes: usize,
    },

    /// Invalid probing configuration.
    #[error("cannot sample {count} rates out of a bound of {bound}")]
    InvalidSampling { count: usize, bound: usize },

    /// Batch size outside the range the transmit mode accepts.
    #[error("batch size {k} outside 1..={max}")]
    InvalidBatch { k: usize, max: usize },

    /// Coherence time too short to fit a single packet.
    #[error("coherence time {coherence_us}us shorter than one packet ({packet_us}us)")]
    CoherenceTooShort { coherence_us: u32, packet_us: u32 },

    /// Window size of zero in a rate schedule.
    #[error("window size for rate {0} must be positive")]
    InvalidWindow(Rate),

    /// No flow context registered for the client.
    #[error("no flow registered for client {0}")]
    UnknownClient(u32),
}

// =============================================================================
// Packet outcomes
// =============================================================================

/// Delivery status of a transmitted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketStatus {
    /// Handed to the radio, no feedback yet.
    Sent,
    /// Positively acknowledged.
    Acked,
    /// Negatively acknowledged.
    Naked,
    /// No feedback before the ACK deadline.
    TimedOut,
}

impl PacketStatus {
    /// Whether this status is delivery feedback (anything but `Sent`).
    #[inline]
    pub fn is_feedback(self) -> bool {
        !matches!(self, PacketStatus::Sent)
    }

    /// Whether this status counts as a loss.
    #[inline]
    pub fn is_loss(self) -> bool {
        matches!(self, PacketStatus::Naked | PacketStatus::TimedOut)
    }
}

/// One recorded delivery outcome. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome {
    /// When the packet was sent.
    pub timestamp: Instant,
    /// Transport sequence number.
    pub seq: u32,
    /// Rate the packet was sent at.
    pub rate: Rate,
    /// Payload length in bytes.
    pub length: u16,
    /// Delivery status.
    pub status: PacketStatus,
}

impl Outcome {
    /// Create a new outcome record.
    pub fn new(seq: u32, status: PacketStatus, rate: Rate, length: u16, timestamp: Instant) -> Self {
        Self {
            timestamp,
            seq,
            rate,
            length,
            status,
        }
    }
}

// =============================================================================
// Vantage points
// =============================================================================

/// An observer that reports delivery outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vantage {
    /// Leading antenna; sees the channel a moving client is about to enter.
    Front,
    /// Trailing antenna; sees the channel the data is actually delivered on.
    Back,
}

/// A loss estimate maintained by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossView {
    /// Delayed front feedback.
    Front,
    /// Delayed back feedback.
    Back,
    /// Front feedback looked up at the back antenna's current location.
    Scout,
    /// Result of combining the vantage points.
    Combined,
}

impl From<Vantage> for LossView {
    fn from(vantage: Vantage) -> Self {
        match vantage {
            Vantage::Front => LossView::Front,
            Vantage::Back => LossView::Back,
        }
    }
}

// =============================================================================
// Candidate rate set
// =============================================================================

/// Ascending, fixed set of supported rates.
///
/// Cheap to clone; every component built from the same set shares one
/// allocation. Indices into the set are used as compact rate identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateSet {
    rates: Arc<[Rate]>,
}

impl RateSet {
    /// Create a rate set.
    ///
    /// # Errors
    /// Returns `Error::EmptyRateSet` for an empty slice and
    /// `Error::UnsortedRates` unless rates are strictly ascending.
    pub fn new(rates: &[Rate]) -> Result<Self, Error> {
        if rates.is_empty() {
            return Err(Error::EmptyRateSet);
        }
        if rates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::UnsortedRates);
        }
        Ok(Self {
            rates: Arc::from(rates),
        })
    }

    /// Number of candidate rates.
    #[inline]
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Always false; construction rejects empty sets.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Rates in ascending order.
    #[inline]
    pub fn as_slice(&self) -> &[Rate] {
        &self.rates
    }

    /// Iterate the rates in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Rate> + '_ {
        self.rates.iter().copied()
    }

    /// Index of `rate` in the set.
    #[inline]
    pub fn index_of(&self, rate: Rate) -> Option<usize> {
        self.rates.binary_search(&rate).ok()
    }

    /// Whether `rate` is a candidate.
    #[inline]
    pub fn contains(&self, rate: Rate) -> bool {
        self.index_of(rate).is_some()
    }

    /// Rate at `index`, if in bounds.
    #[inline]
    pub fn get(&self, index: usize) -> Option<Rate> {
        self.rates.get(index).copied()
    }

    /// Rate at `index`. Panics if out of bounds.
    #[inline]
    pub fn at(&self, index: usize) -> Rate {
        self.rates[index]
    }

    /// Slowest candidate rate.
    #[inline]
    pub fn lowest(&self) -> Rate {
        self.rates[0]
    }

    /// Fastest candidate rate.
    #[inline]
    pub fn highest(&self) -> Rate {
        self.rates[self.rates.len() - 1]
    }
}

impl fmt::Display for RateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, rate) in self.rates.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", *rate as f64 / 10.0)?;
        }
        write!(f, "] Mbps")
    }
}
