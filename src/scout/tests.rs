//! Orchestrator scenario tests.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::{LossView, Outcome, PacketStatus, RateSet, Vantage, INVALID_LOSS};

const COHERENCE_US: u32 = 20_000;
const PACKET_SIZE: u16 = 1500;
const EXTRA_US: u32 = 100;

fn rates() -> RateSet {
    RateSet::new(&[60, 90, 120, 180, 240]).unwrap()
}

fn scout_with(config: ScoutConfig) -> ScoutRateAdaptation {
    ScoutRateAdaptation::new(
        rates(),
        ScoutConfig {
            seed: Some(42),
            ..config
        },
    )
    .unwrap()
}

fn scout() -> ScoutRateAdaptation {
    scout_with(ScoutConfig::default())
}

fn ms(t0: Instant, ms: u64) -> Instant {
    t0 + Duration::from_millis(ms)
}

fn burst(t: Instant, rate: Rate, acked: u32, lost: u32) -> Vec<Outcome> {
    let acks = (0..acked).map(|seq| Outcome::new(seq, PacketStatus::Acked, rate, PACKET_SIZE, t));
    let naks = (acked..acked + lost)
        .map(|seq| Outcome::new(seq, PacketStatus::Naked, rate, PACKET_SIZE, t));
    acks.chain(naks).collect()
}

/// Back loss: 6 Mbps 0.0, 9 Mbps 0.0, 12 Mbps 0.5, higher rates untried.
fn seed_back(scout: &ScoutRateAdaptation, t: Instant) {
    let mut outcomes = burst(t, 60, 10, 0);
    outcomes.extend(burst(t, 90, 10, 0));
    outcomes.extend(burst(t, 120, 5, 5));
    scout.insert_feedback_batch(Vantage::Back, &outcomes).unwrap();
}

fn data(scout: &ScoutRateAdaptation, now: Instant) -> Decision {
    scout
        .make_decision_at(now, TransmitMode::Data, COHERENCE_US, PACKET_SIZE, EXTRA_US)
        .unwrap()
}

#[test]
fn test_combine_front_back() {
    assert_eq!(combine_front_back(INVALID_LOSS, 0.3), 0.3);
    assert_eq!(combine_front_back(0.3, INVALID_LOSS), 0.3);
    assert_eq!(combine_front_back(INVALID_LOSS, INVALID_LOSS), INVALID_LOSS);
    assert!((combine_front_back(0.0, 0.4) - 0.2).abs() < 1e-12);
    assert!((combine_front_back(0.4, 0.0) - 0.2).abs() < 1e-12);
    assert!((combine_front_back(0.5, 0.4) - 0.2).abs() < 1e-12);
    // Discontinuous at zero: a tiny loss multiplies, zero halves.
    assert!(combine_front_back(1e-6, 0.4) < combine_front_back(0.0, 0.4));
}

#[test]
fn test_mode_table() {
    for (code, mode) in AdaptationMode::ALL.iter().enumerate() {
        assert_eq!(AdaptationMode::from_code(code as u8), Ok(*mode));
        assert_eq!(mode.code(), code as u8);
    }
    assert_eq!(AdaptationMode::from_code(9), Err(Error::InvalidMode(9)));

    let profile = |mode: AdaptationMode| mode.profile();
    for mode in [AdaptationMode::Fixed, AdaptationMode::SampleRate, AdaptationMode::Rraa] {
        assert_eq!(
            profile(mode),
            ModeProfile {
                combine: CombineMode::BackOnly,
                sample: SampleMode::None
            }
        );
    }
    assert_eq!(profile(AdaptationMode::BatchRandom).combine, CombineMode::DelayCombine);
    assert_eq!(profile(AdaptationMode::BatchRandom).sample, SampleMode::Random);
    assert_eq!(
        profile(AdaptationMode::ScoutBoundedLossSequential),
        ModeProfile {
            combine: CombineMode::ScoutCombine,
            sample: SampleMode::Sequential
        }
    );
    assert!(AdaptationMode::ScoutBoundedLossRandom.is_bounded_loss());
    assert!(!AdaptationMode::ScoutRandom.is_bounded_loss());
}

#[test]
fn test_bootstrap_decision_duplicates() {
    let s = scout();
    assert_eq!(s.mode(), AdaptationMode::ScoutSequential);
    assert!(s.is_bootstrapping());

    let d = data(&s, Instant::now());
    // 9 packets fit; unknown loss gives k = floor(9 * 0.35).
    assert_eq!(d.k, 3);
    assert!(d.duplicate);
    // Duplicated: k packets plus one probe at the next rate.
    assert_eq!(d.rates, vec![60, 60, 60, 90]);
    assert_eq!(d.n, 4);
    assert_eq!(s.feasible_rates(), rates().as_slice().to_vec());
}

#[test]
fn test_duplicate_disabled_sends_full_batch() {
    let s = scout();
    s.set_enable_duplicate(false);
    let d = data(&s, Instant::now());
    assert!(!d.duplicate);
    assert_eq!(d.k, 3);
    assert_eq!(d.n, 10);
    assert_eq!(d.rates.iter().filter(|&&r| r == 60).count(), 9);
    assert_eq!(d.rates.last(), Some(&90));
}

#[test]
fn test_picks_best_goodput() {
    let s = scout();
    let t0 = Instant::now();
    seed_back(&s, t0);

    assert_eq!(s.loss_map(LossView::Back).loss(120).unwrap(), 0.5);
    assert_eq!(s.loss_map(LossView::Back).sent_count(120).unwrap(), 10);

    let d = data(&s, ms(t0, 10));
    assert_eq!(s.rate(), 90);
    assert_eq!(s.rate_index(), 1);
    assert!(!s.is_bootstrapping());
    assert!(!d.duplicate);
    // 13 packets fit at 9 Mbps; loss 0 gives k = 12.
    assert_eq!(d.k, 12);
    assert_eq!(d.n, 14);
    assert_eq!(d.rates.len(), d.n);
    assert_eq!(d.rates.last(), Some(&120));
    assert_eq!(s.sample_rates(), vec![120]);
    assert_eq!(s.loss_map(LossView::Combined).loss(90).unwrap(), 0.0);
}

#[test]
fn test_infeasible_rate_is_never_chosen() {
    let s = scout();
    let t0 = Instant::now();
    seed_back(&s, t0);

    // Two fresh failures at 9 Mbps, not yet folded into the loss map.
    let later = ms(t0, 1000);
    for seq in 0..2 {
        let nak = Outcome::new(100 + seq, PacketStatus::Naked, 90, PACKET_SIZE, later);
        s.insert_feedback(Vantage::Back, nak).unwrap();
    }
    assert_eq!(s.loss_map(LossView::Back).loss(90).unwrap(), 0.0);

    data(&s, ms(t0, 1001));
    assert_eq!(s.feasible_rates(), vec![60, 120, 180, 240]);
    assert!(!s.is_feasible(90));
    // 9 Mbps is out; 6 Mbps and 12 Mbps tie at 6 Mbps goodput and the lower wins.
    assert_eq!(s.rate(), 60);
}

#[test]
fn test_bounded_loss_mode() {
    let t0 = Instant::now();
    let seed = |s: &ScoutRateAdaptation| {
        let mut outcomes = burst(t0, 60, 10, 0);
        outcomes.extend(burst(t0, 90, 7, 3));
        outcomes.extend(burst(t0, 120, 6, 4));
        s.insert_feedback_batch(Vantage::Back, &outcomes).unwrap();
    };

    let unbounded = scout();
    seed(&unbounded);
    data(&unbounded, ms(t0, 5));
    assert_eq!(unbounded.rate(), 120);

    let bounded = scout();
    bounded.set_mode(AdaptationMode::ScoutBoundedLossSequential);
    bounded.set_loss_bound(0.35).unwrap();
    seed(&bounded);
    data(&bounded, ms(t0, 5));
    assert_eq!(bounded.rate(), 90);

    assert_eq!(bounded.set_loss_bound(1.2), Err(Error::InvalidLoss(1.2)));
    assert_eq!(bounded.loss_bound(), 0.35);
}

#[test]
fn test_fixed_mode() {
    let s = scout();
    s.set_mode(AdaptationMode::Fixed);
    s.set_rate(120).unwrap();
    assert_eq!(s.set_rate(130), Err(Error::UnknownRate(130)));

    let d = data(&s, Instant::now());
    // 18 packets fit at 12 Mbps, unknown loss.
    assert_eq!(d.k, 6);
    assert_eq!(d.n, 18);
    assert!(!d.duplicate);
    assert!(d.rates.iter().all(|&r| r == 120));
}

#[test]
fn test_high_loss_forces_duplication() {
    let s = scout();
    s.set_mode(AdaptationMode::Fixed);
    s.set_rate(120).unwrap();
    s.set_high_loss();
    for view in [LossView::Front, LossView::Back, LossView::Scout] {
        assert_eq!(s.loss_map(view).loss(240).unwrap(), 1.0);
    }

    let d = data(&s, Instant::now());
    assert_eq!(
        d,
        Decision {
            k: 1,
            n: 1,
            rates: vec![120],
            duplicate: true
        }
    );
}

#[test]
fn test_timeout_reuses_rate() {
    let s = scout();
    let t0 = Instant::now();
    seed_back(&s, t0);
    data(&s, ms(t0, 10));
    assert_eq!(s.rate(), 90);

    // New evidence is ignored until the next data decision.
    s.insert_feedback_batch(Vantage::Back, &burst(ms(t0, 20), 90, 0, 10))
        .unwrap();
    let d = s
        .make_decision_at(ms(t0, 30), TransmitMode::TimeOut { k: 4 }, COHERENCE_US, PACKET_SIZE, EXTRA_US)
        .unwrap();
    assert_eq!(s.rate(), 90);
    assert_eq!(d.k, 4);
    assert_eq!(d.rates, vec![90, 90, 90, 90, 90, 120]);
    assert!(!d.duplicate);
}

#[test]
fn test_retransmission_duplicates() {
    let s = scout();
    let t0 = Instant::now();
    seed_back(&s, t0);
    let d = s
        .make_decision_at(
            ms(t0, 10),
            TransmitMode::Retransmission { k: 1 },
            COHERENCE_US,
            PACKET_SIZE,
            EXTRA_US,
        )
        .unwrap();
    assert!(d.duplicate);
    assert_eq!(d.k, 1);
    assert_eq!(d.rates, vec![90, 120]);

    s.set_enable_duplicate(false);
    let d = s
        .make_decision_at(
            ms(t0, 11),
            TransmitMode::Retransmission { k: 1 },
            COHERENCE_US,
            PACKET_SIZE,
            EXTRA_US,
        )
        .unwrap();
    assert!(!d.duplicate);
    assert!(d.n > 2);
}

#[test]
fn test_decision_errors() {
    let s = scout();
    assert_eq!(
        s.make_decision(TransmitMode::Data, 1000, PACKET_SIZE, EXTRA_US),
        Err(Error::CoherenceTooShort {
            coherence_us: 1000,
            packet_us: 2100
        })
    );
    assert_eq!(
        s.make_decision(TransmitMode::TimeOut { k: 0 }, COHERENCE_US, PACKET_SIZE, EXTRA_US),
        Err(Error::InvalidBatch { k: 0, max: 32 })
    );
}

#[test]
fn test_fec_disabled() {
    let s = scout();
    s.set_use_fec(false);
    s.set_enable_duplicate(false);
    let d = data(&s, Instant::now());
    assert_eq!(d.k, 9);
    assert_eq!(d.n, 10);
}

#[test]
fn test_scout_lookup_uses_front_history() {
    let s = scout();
    let t0 = Instant::now();
    for outcome in burst(t0, 120, 0, 10) {
        s.insert_feedback(Vantage::Front, outcome).unwrap();
    }

    // 1.1 m at 11 m/s: the back antenna reaches t0's spot 100 ms later.
    s.set_speed(11.0);
    data(&s, ms(t0, 100));
    assert_eq!(s.loss_map(LossView::Scout).loss(120).unwrap(), 1.0);
    assert_eq!(s.loss_map(LossView::Scout).loss(60).unwrap(), INVALID_LOSS);
    assert_eq!(s.loss_map(LossView::Front).loss(120).unwrap(), INVALID_LOSS);
    assert_eq!(s.loss_map(LossView::Combined).loss(120).unwrap(), 1.0);

    // Too far past the aligned instant: nothing to look up.
    data(&s, ms(t0, 300));
    assert_eq!(s.loss_map(LossView::Scout).loss(120).unwrap(), INVALID_LOSS);

    s.set_speed(0.0);
    data(&s, ms(t0, 100));
    assert_eq!(s.loss_map(LossView::Scout).loss(120).unwrap(), INVALID_LOSS);
}

#[test]
fn test_unbounded_windows() {
    let s = scout_with(ScoutConfig {
        front_window: Duration::MAX,
        total_window: Duration::MAX,
        ..ScoutConfig::default()
    });
    let t0 = Instant::now();
    for vantage in [Vantage::Front, Vantage::Back] {
        s.insert_feedback_batch(vantage, &burst(t0, 120, 4, 1)).unwrap();
        s.insert_feedback_batch(vantage, &burst(ms(t0, 50), 120, 4, 1)).unwrap();
        assert_eq!(s.feedback_window(vantage).len(), 10);
    }

    // The aligned front range cannot be represented, so there is no lookup.
    s.set_speed(11.0);
    data(&s, ms(t0, 100));
    assert_eq!(s.loss_map(LossView::Scout).loss(120).unwrap(), INVALID_LOSS);
}

#[test]
fn test_delay_combine() {
    let s = scout();
    s.set_mode(AdaptationMode::BatchSequential);
    let t0 = Instant::now();
    s.insert_feedback_batch(Vantage::Front, &burst(t0, 90, 5, 5)).unwrap();
    s.insert_feedback_batch(Vantage::Back, &burst(t0, 90, 6, 4)).unwrap();
    s.insert_feedback_batch(Vantage::Back, &burst(t0, 60, 10, 0)).unwrap();

    data(&s, ms(t0, 1));
    let combined = s.loss_map(LossView::Combined);
    assert!((combined.loss(90).unwrap() - 0.5 * 0.4).abs() < 1e-9);
    // Front unknown at 6 Mbps: the back estimate wins.
    assert_eq!(combined.loss(60).unwrap(), 0.0);
    assert_eq!(s.rate(), 90);
}

#[test]
fn test_update_loss_from_window() {
    let s = scout();
    let t0 = Instant::now();
    for outcome in burst(t0, 60, 3, 1) {
        s.insert_feedback(Vantage::Front, outcome).unwrap();
    }
    for outcome in burst(ms(t0, 10), 60, 0, 4) {
        s.insert_feedback(Vantage::Front, outcome).unwrap();
    }
    let front = s.loss_map(LossView::Front);
    assert_eq!(front.loss(60).unwrap(), INVALID_LOSS);

    s.update_loss_from_window(Vantage::Front, t0, ms(t0, 5));
    assert_eq!(front.loss(60).unwrap(), 0.25);
    assert_eq!((front.sent_count(60).unwrap(), front.ack_count(60).unwrap()), (4, 3));

    s.update_loss_from_window(Vantage::Front, ms(t0, 10), ms(t0, 11));
    assert!((front.loss(60).unwrap() - (0.25 * 0.2 + 1.0 * 0.8)).abs() < 1e-12);

    // No data in range keeps the estimate.
    let before = front.loss(60).unwrap();
    s.update_loss_from_window(Vantage::Front, ms(t0, 50), ms(t0, 60));
    assert_eq!(front.loss(60).unwrap(), before);
}

#[test]
fn test_throughput_estimate() {
    let s = scout();
    assert_eq!(s.throughput_estimate(LossView::Back), None);
    seed_back(&s, Instant::now());
    assert_eq!(s.throughput_estimate(LossView::Back), Some(90.0));
}

#[test]
fn test_feedback_validation() {
    let s = scout();
    let t = Instant::now();
    assert_eq!(
        s.insert_feedback(Vantage::Back, Outcome::new(1, PacketStatus::Sent, 60, 100, t)),
        Err(Error::InvalidStatus(PacketStatus::Sent))
    );
    assert_eq!(
        s.insert_feedback(Vantage::Front, Outcome::new(1, PacketStatus::Acked, 55, 100, t)),
        Err(Error::UnknownRate(55))
    );

    let mut outcomes = burst(t, 60, 3, 0);
    outcomes.push(Outcome::new(9, PacketStatus::Acked, 55, 100, t));
    assert_eq!(
        s.insert_feedback_batch(Vantage::Back, &outcomes),
        Err(Error::UnknownRate(55))
    );
    assert!(s.feedback_window(Vantage::Back).is_empty());
    assert!(s.insert_feedback_batch(Vantage::Back, &[]).is_ok());
}

#[test]
fn test_baseline_modes() {
    let s = scout();
    let t0 = Instant::now();
    // Recorded before a baseline mode exists: never reaches the selector.
    s.insert_feedback(Vantage::Back, Outcome::new(1, PacketStatus::Acked, 120, 1000, t0))
        .unwrap();

    s.set_mode(AdaptationMode::SampleRate);
    s.insert_feedback(Vantage::Back, Outcome::new(2, PacketStatus::Acked, 60, 1000, t0))
        .unwrap();
    let d = data(&s, ms(t0, 1));
    // Only the 6 Mbps ack is on record.
    assert_eq!(d.rates, vec![60, 60, 60]);
    assert!(d.duplicate);
    assert!(s.dump().contains("Sample Rate Table"));

    s.set_mode(AdaptationMode::Rraa);
    assert_eq!(s.combine_mode(), CombineMode::BackOnly);
    assert_eq!(s.sample_mode(), SampleMode::None);
    let d = data(&s, ms(t0, 2));
    assert_eq!(d.rates[0], 60);
    assert!(s.dump().contains("Robust Rate Table"));
}

#[test]
fn test_aggressive_probing() {
    let s = scout_with(ScoutConfig::aggressive_probing());
    s.set_mode(AdaptationMode::ScoutRandom);
    let t0 = Instant::now();
    seed_back(&s, t0);

    for i in 0..20 {
        let d = data(&s, ms(t0, 10 + i));
        assert_eq!(s.rate(), 90);
        let samples = s.sample_rates();
        assert_eq!(samples.len(), 2);
        assert_ne!(samples[0], samples[1]);
        assert!(samples.iter().all(|r| [120, 180, 240].contains(r)));
        assert_eq!(d.n, 15);
    }
}

#[test]
fn test_decision_invariants_across_modes() {
    let mut rng = StdRng::seed_from_u64(3);
    for mode in AdaptationMode::ALL {
        let s = scout();
        s.set_mode(mode);
        let t0 = Instant::now();
        for step in 0..40u64 {
            let t = ms(t0, step * 5);
            let outcomes: Vec<Outcome> = (0..8)
                .map(|seq| {
                    let rate = s.rates().at(rng.gen_range(0..s.rates().len()));
                    let status = if rng.gen_bool(0.7) {
                        PacketStatus::Acked
                    } else {
                        PacketStatus::Naked
                    };
                    Outcome::new(seq, status, rate, PACKET_SIZE, t)
                })
                .collect();
            s.insert_feedback_batch(Vantage::Back, &outcomes).unwrap();
            s.insert_feedback_batch(Vantage::Front, &outcomes).unwrap();

            let d = data(&s, ms(t, 1));
            assert!(d.k >= 1 && d.k <= s.config().max_k, "{mode}: k {}", d.k);
            assert_eq!(d.n, d.rates.len());
            assert!(d.rates.iter().all(|&r| s.rates().contains(r)));
            if mode.baseline().is_none() && mode != AdaptationMode::Fixed {
                assert!(d.rates.windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }
}

#[test]
fn test_dump() {
    let s = scout();
    seed_back(&s, Instant::now());
    let dump = s.dump();
    assert!(dump.contains("Rate adaptation version: Scout sequential"));
    assert!(dump.contains("---Combine Loss Map---"));
    assert!(dump.contains("===Back Feedback Records==="));
}
