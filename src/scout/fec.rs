//! FEC `(k, n)` sizing for a batch.
//!
//! Every variant adds `EXTRA_REDUNDANCY` on top of the estimated loss (or
//! a high starting redundancy when the loss is unknown) and then makes
//! sure at least one packet beyond the loss-only requirement is sent.
//! The steps are applied in a fixed order; capping `k` first and
//! tightening it afterwards can leave `k` below what either rule alone
//! would give.

use crate::{is_valid_loss, Error, Rate};

/// Starting redundancy for a data batch at a rate with no loss estimate.
pub const DATA_START_REDUNDANCY: f64 = 0.6;

/// Starting redundancy for timeout and retransmission batches.
pub const RECOVERY_START_REDUNDANCY: f64 = 0.8;

/// Margin for bursty loss.
pub const EXTRA_REDUNDANCY: f64 = 0.05;

/// Packets added beyond the loss-only requirement.
const EXTRA_PACKETS: usize = 1;

/// Above this loss the extra-packet rule is skipped.
const MAX_LOSS: f64 = 0.9;

/// Airtime of one packet in microseconds.
///
/// `rate` is in tenths of Mbps, `extra_us` covers per-packet overhead.
pub fn packet_duration_us(rate: Rate, packet_size: u16, extra_us: u32) -> u32 {
    (packet_size as f64 * 8.0 / (rate as f64 / 10.0) + extra_us as f64) as u32
}

/// A coding decision: `k` originals encoded into `n` packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecSize {
    pub k: usize,
    pub n: usize,
}

/// Sizing limits shared by the three variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecSizer {
    /// Upper bound on `n`, with probe packets already reserved.
    pub field_size: usize,
    pub max_k: usize,
    /// With FEC off, `n == k`.
    pub use_fec: bool,
}

fn loss_known(loss: f64) -> bool {
    is_valid_loss(loss) && loss <= MAX_LOSS
}

fn redundancy(loss: f64, start: f64) -> f64 {
    if is_valid_loss(loss) {
        loss + EXTRA_REDUNDANCY
    } else {
        start + EXTRA_REDUNDANCY
    }
}

/// Packets needed to carry `k` originals across `loss`, plus the extra.
fn loss_only_with_extra(k: usize, loss: f64) -> Option<usize> {
    if loss_known(loss) {
        Some((k as f64 / (1.0 - loss)).ceil() as usize + EXTRA_PACKETS)
    } else {
        None
    }
}

impl FecSizer {
    /// Size a fresh data batch filling one coherence time.
    ///
    /// # Errors
    /// `Error::CoherenceTooShort` if not even one packet fits.
    pub fn data(&self, loss: f64, coherence_us: u32, packet_us: u32) -> Result<FecSize, Error> {
        let fit = (coherence_us / packet_us.max(1)) as usize;
        if fit == 0 {
            return Err(Error::CoherenceTooShort {
                coherence_us,
                packet_us,
            });
        }
        if !self.use_fec {
            let n = fit.min(self.max_k);
            return Ok(FecSize { k: n, n });
        }

        let redundancy = redundancy(loss, DATA_START_REDUNDANCY);
        let mut n = fit;
        let mut k = (n as f64 * (1.0 - redundancy)).floor() as i64;
        if k > self.max_k as i64 {
            k = self.max_k as i64;
            n = (k as f64 / (1.0 - redundancy)).ceil() as usize;
        }
        n = n.min(self.field_size);
        if loss_known(loss) {
            let k_loss_only = (n as f64 * (1.0 - loss)).floor() as i64;
            let k_with_extra = k_loss_only - EXTRA_PACKETS as i64;
            if k_with_extra < k {
                k = k_with_extra;
            }
        }
        let k = k.max(1) as usize;

        assert!(k <= self.max_k && k <= n && n <= self.field_size);
        Ok(FecSize { k, n })
    }

    /// Size the flush of a partial batch of `k` packets after a batch timeout.
    ///
    /// # Errors
    /// `Error::InvalidBatch` unless `1 <= k <= max_k`.
    pub fn timeout(&self, loss: f64, k: usize) -> Result<FecSize, Error> {
        if k == 0 || k > self.max_k {
            return Err(Error::InvalidBatch { k, max: self.max_k });
        }
        if !self.use_fec {
            return Ok(FecSize { k, n: k });
        }

        // The minus one leaves headroom for the ceil below.
        let max_redundancy = 1.0 - k as f64 / (self.field_size - 1) as f64;
        let redundancy = redundancy(loss, RECOVERY_START_REDUNDANCY).min(max_redundancy);
        let mut n = (k as f64 / (1.0 - redundancy)).ceil() as usize;
        if let Some(needed) = loss_only_with_extra(k, loss) {
            if n < needed && needed <= self.field_size {
                n = needed;
            }
        }
        let n = n.min(self.field_size);

        assert!(k <= n && n <= self.field_size);
        Ok(FecSize { k, n })
    }

    /// Size the retransmission of `k` lost packets within one coherence time.
    ///
    /// # Errors
    /// `Error::InvalidBatch` unless `1 <= k <= min(max_k, packets that fit)`.
    pub fn retransmission(
        &self,
        loss: f64,
        k: usize,
        coherence_us: u32,
        packet_us: u32,
    ) -> Result<FecSize, Error> {
        let max_n = ((coherence_us / packet_us.max(1)) as usize).min(self.field_size);
        if k == 0 || k > max_n || k > self.max_k {
            return Err(Error::InvalidBatch {
                k,
                max: max_n.min(self.max_k),
            });
        }
        if !self.use_fec {
            return Ok(FecSize { k, n: k });
        }

        let redundancy = redundancy(loss, RECOVERY_START_REDUNDANCY);
        let mut n = if redundancy < 1.0 {
            (k as f64 / (1.0 - redundancy)).ceil() as usize
        } else {
            max_n
        };
        if let Some(needed) = loss_only_with_extra(k, loss) {
            if n < needed && needed <= max_n {
                n = needed;
            }
        }
        let n = n.min(max_n);

        assert!(k <= n && n <= max_n);
        Ok(FecSize { k, n })
    }
}
