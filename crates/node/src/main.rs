//! Leader Consensus Node
//!
//! Runs a local multi-validator simulation of leader rotation: every height
//! is started on the controller manager, leaders seal blocks after collecting
//! signed votes, and silent leaders are replaced through reelection.

use anyhow::Result;
use clap::Parser;
use leader_consensus::{Address, LeaderNotifier};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod simulation;

use config::NodeConfig;
use simulation::Simulation;

/// Leader rotation consensus node
#[derive(Parser, Debug)]
#[command(name = "leader-node")]
#[command(about = "Local simulation of leader rotation consensus", long_about = None)]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of validators
    #[arg(long)]
    validators: Option<usize>,

    /// Stop after this many heights (0 = run until Ctrl+C)
    #[arg(long)]
    heights: Option<u64>,

    /// Every N-th leader stays silent and is reelected (0 = never)
    #[arg(long)]
    stall_every: Option<u64>,

    /// Wall-clock pacing between heights in milliseconds
    #[arg(long)]
    block_interval_ms: Option<u64>,

    /// Broadcast block interval
    #[arg(long)]
    bc_interval: Option<u64>,

    /// Reelection interval, a multiple of the broadcast interval
    #[arg(long)]
    reelect_interval: Option<u64>,

    /// Broadcast account (generated when unset)
    #[arg(long)]
    broadcast_address: Option<Address>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(v) = self.validators {
            config.validators = v;
        }
        if let Some(v) = self.heights {
            config.heights = v;
        }
        if let Some(v) = self.stall_every {
            config.stall_every = v;
        }
        if let Some(v) = self.block_interval_ms {
            config.block_interval_ms = v;
        }
        if let Some(v) = self.bc_interval {
            config.election.interval.bc_interval = v;
        }
        if let Some(v) = self.reelect_interval {
            config.election.interval.reelect_interval = v;
        }
        if let Some(v) = self.broadcast_address {
            config.election.broadcast_address = v;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    tracing::info!("Starting leader consensus node");
    tracing::info!("  Validators: {}", config.validators);
    tracing::info!(
        "  Intervals: broadcast {}, reelection {}",
        config.election.interval.bc_interval,
        config.election.interval.reelect_interval
    );
    tracing::info!(
        "  Turn timing: POS {}s (+{}s first turn), reelect {}s",
        config.election.leader.pos_out_time,
        config.election.leader.parent_mining_time,
        config.election.leader.reelect_out_time
    );
    if config.stall_every > 0 {
        tracing::info!("  Stalling every {} heights", config.stall_every);
    }

    let notifier = Arc::new(LeaderNotifier::new());

    // Log every leader change
    let mut notifications = notifier.subscribe();
    let notify_logger = tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notify) => {
                    tracing::info!(
                        "Leader change: height {} turn {}/{} leader {} next {} ({})",
                        notify.number,
                        notify.consensus_turn,
                        notify.reelect_turn,
                        notify.leader,
                        notify.next_leader,
                        if notify.consensus_state { "consensus" } else { "reelection" }
                    );
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Notify logger lagged {} messages", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let heights = config.heights;
    let mut ticker = tokio::time::interval(Duration::from_millis(config.block_interval_ms.max(1)));
    let mut sim = Simulation::new(config, notifier.clone())?;

    tracing::info!("Press Ctrl+C to stop.");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let header = sim.produce_height()?;
                if heights > 0 && header.number >= heights {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    let stats = sim.stats();
    let bus = notifier.stats();
    tracing::info!(
        "Produced {} blocks ({} broadcast), {} reelections, {} votes, {} leader notifies",
        stats.blocks,
        stats.broadcast_blocks,
        stats.reelections,
        stats.votes,
        bus.published
    );

    notify_logger.abort();
    tracing::info!("Node stopped");

    Ok(())
}
