//! Drive the rate adaptation core over a simulated lossy channel.
//!
//! One sender thread per client asks for a decision per batch, "transmits"
//! it over a channel whose loss grows with the rate, and hands the outcomes
//! to a feedback thread that reports them from both vantage points.
//!
//! ```text
//! cargo run --example drive_scout -- --mode 5 --clients 2 --batches 300
//! ```

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, Level};

use scout_rate::flows::{ClientId, FlowTable};
use scout_rate::scout::{AdaptationMode, ScoutConfig, ScoutRateAdaptation, TransmitMode};
use scout_rate::{Outcome, PacketStatus, Rate, RateSet, Vantage};

const RATES: [Rate; 8] = [60, 90, 120, 180, 240, 360, 480, 540];
const COHERENCE_US: u32 = 20_000;
const PACKET_SIZE: u16 = 1400;
const EXTRA_US: u32 = 100;

#[derive(Parser, Debug)]
#[command(name = "drive_scout")]
#[command(about = "Simulate scout rate adaptation over a lossy channel")]
struct Args {
    /// Adaptation mode code (0 = fixed ... 8 = scout bounded-loss random)
    #[arg(long, default_value = "5")]
    mode: u8,

    /// Number of simulated clients
    #[arg(long, default_value = "2")]
    clients: u32,

    /// Batches sent per client
    #[arg(long, default_value = "300")]
    batches: u32,

    /// Loss at the lowest rate; grows linearly to the top rate
    #[arg(long, default_value = "0.05")]
    base_loss: f64,

    /// Client speed in m/s for the scout lookup
    #[arg(long, default_value = "1.5")]
    speed: f64,

    /// Seed for the channel and the probing
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn check_args(args: &Args) -> Result<()> {
    if !args.base_loss.is_finite() {
        anyhow::bail!("--base-loss must be a finite number, got {}", args.base_loss);
    }
    Ok(())
}

/// Loss probability of the simulated channel at `rate`.
fn channel_loss(rate: Rate, base_loss: f64) -> f64 {
    let lowest = RATES[0] as f64;
    let highest = RATES[RATES.len() - 1] as f64;
    let position = (rate as f64 - lowest) / (highest - lowest);
    (base_loss + position * 0.9).clamp(0.0, 1.0)
}

fn run_sender(
    client: ClientId,
    flow: Arc<ScoutRateAdaptation>,
    feedback: mpsc::Sender<Vec<Outcome>>,
    args: &Args,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(args.seed ^ client as u64);
    let mut seq = 0u32;
    let mut delivered = 0usize;
    let mut duplicated = 0u32;

    for batch in 0..args.batches {
        let decision = flow
            .make_decision(TransmitMode::Data, COHERENCE_US, PACKET_SIZE, EXTRA_US)
            .with_context(|| format!("decision for client {client} batch {batch}"))?;
        if decision.duplicate {
            duplicated += 1;
        }

        let now = Instant::now();
        let outcomes: Vec<Outcome> = decision
            .rates
            .iter()
            .map(|&rate| {
                seq = seq.wrapping_add(1);
                let status = if rng.gen_bool(channel_loss(rate, args.base_loss)) {
                    PacketStatus::Naked
                } else {
                    PacketStatus::Acked
                };
                Outcome::new(seq, status, rate, PACKET_SIZE, now)
            })
            .collect();

        let acked = outcomes
            .iter()
            .filter(|o| o.status == PacketStatus::Acked)
            .count();
        if acked >= decision.k {
            delivered += decision.k;
        }

        debug!(
            client,
            batch,
            k = decision.k,
            n = decision.n,
            acked,
            duplicate = decision.duplicate,
            "batch sent"
        );
        feedback
            .send(outcomes)
            .context("feedback thread stopped early")?;
        thread::sleep(Duration::from_millis(2));
    }

    info!(
        client,
        delivered,
        duplicated,
        final_rate = flow.rate(),
        "sender done"
    );
    Ok(())
}

fn run_feedback(flow: Arc<ScoutRateAdaptation>, outcomes: mpsc::Receiver<Vec<Outcome>>) -> Result<()> {
    for batch in outcomes {
        flow.insert_feedback_batch(Vantage::Front, &batch)
            .context("front feedback rejected")?;
        flow.insert_feedback_batch(Vantage::Back, &batch)
            .context("back feedback rejected")?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    check_args(&args)?;

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let mode = AdaptationMode::from_code(args.mode).context("invalid --mode")?;
    let rates = RateSet::new(&RATES).context("invalid rate table")?;
    let table = FlowTable::new();

    info!(
        "Simulating {} clients, mode={}, rates={}, base_loss={}",
        args.clients, mode, rates, args.base_loss
    );

    for client in 0..args.clients {
        let config = ScoutConfig {
            seed: Some(args.seed.wrapping_add(client as u64)),
            ..ScoutConfig::default()
        };
        let flow = table
            .register(client, rates.clone(), config)
            .with_context(|| format!("failed to register client {client}"))?;
        flow.set_mode(mode);
        flow.set_speed(args.speed);
    }

    thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::new();
        for client in table.clients() {
            let flow = table.get(client)?;
            let (tx, rx) = mpsc::channel();

            let feedback_flow = Arc::clone(&flow);
            handles.push(scope.spawn(move || run_feedback(feedback_flow, rx)));
            let args = &args;
            handles.push(scope.spawn(move || run_sender(client, flow, tx, args)));
        }
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("worker thread panicked"))??;
        }
        Ok(())
    })?;

    for client in table.clients() {
        let throughput = table.throughput_report(client)?;
        info!(
            client,
            throughput_mbps = throughput.map(|t| t / 10.0),
            "final estimate"
        );
        if args.verbose {
            debug!("\n{}", table.get(client)?.dump());
        }
    }
    Ok(())
}
