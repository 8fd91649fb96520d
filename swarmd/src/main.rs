//! swarmd: the swarm load-balancer daemon.
//!
//! Connects to every fleet host at startup, then runs two loops until a
//! signal arrives: a background worker that keeps per-host fitness fresh,
//! and the main loop answering placement requests over the shared-memory
//! rendezvous with the hostname of the currently best host.

mod balancer;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use swarm_common::config::{
    HOSTNAME_MAX_LEN, PLACEMENT_SLOT_NAME, REQUEST_WAIT, SELECT_PROBE_WINDOW_S,
};
use swarm_common::hosts::{self, encode_hostname};
use swarm_common::ipc::PlacementReply;
use swarm_common::logging;
use swarm_common::shutdown;
use swarm_common::ssh::{HostKeyPolicy, Session, SshOptions};

use balancer::{best_index, pace, refresh_pass, FitnessBoard};

#[derive(Parser)]
#[command(name = "swarmd", about = "swarm load balancer daemon")]
struct Cli {
    /// Number of refresh passes (0 = run until a signal arrives)
    #[arg(short = 'n', default_value_t = 0)]
    passes: u64,

    /// Refresh interval in seconds (0 = free-running)
    #[arg(short = 'i', default_value_t = 1.0)]
    interval: f64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    shutdown::install_handlers().context("installing signal handlers")?;

    let fleet = hosts::fleet();
    info!(hosts = fleet.len(), "starting load balancer");

    // The daemon holds one session per host for its whole lifetime; an
    // unreachable host at startup is a configuration problem, not a
    // runtime condition to paper over.
    let opts = SshOptions::from_env(HostKeyPolicy::AcceptNew)?;
    let mut sessions = Vec::with_capacity(fleet.len());
    for hostname in &fleet {
        let session = Session::connect(hostname, &opts)
            .with_context(|| format!("connecting to fleet host '{hostname}'"))?;
        sessions.push(session);
    }

    let board = Arc::new(FitnessBoard::new(sessions.len()));
    let interval = Duration::from_secs_f64(cli.interval.max(0.0));
    let passes = cli.passes;

    let worker_board = Arc::clone(&board);
    let worker = thread::spawn(move || {
        let mut completed = 0u64;
        while !shutdown::quit_requested() {
            let started = Instant::now();
            refresh_pass(&sessions, &worker_board, SELECT_PROBE_WINDOW_S);
            completed += 1;
            if passes != 0 && completed >= passes {
                info!(passes = completed, "refresh pass budget exhausted");
                break;
            }
            if !shutdown::quit_requested() {
                pace(started, interval);
            }
        }
    });

    let rendezvous = PlacementReply::create(PLACEMENT_SLOT_NAME, HOSTNAME_MAX_LEN, REQUEST_WAIT)
        .context("creating placement rendezvous")?;
    info!(slot = PLACEMENT_SLOT_NAME, "serving placement requests");

    while !shutdown::quit_requested() {
        if !rendezvous.available()? {
            continue;
        }

        let fitness = board.snapshot();
        let winner = best_index(&fitness);
        let hostname = fleet.get(winner).map(String::as_str).unwrap_or("localhost");

        let mut slot = [0u8; HOSTNAME_MAX_LEN];
        encode_hostname(hostname, &mut slot);
        rendezvous.publish(&slot)?;
        info!(
            host = hostname,
            fitness = fitness.get(winner).copied().unwrap_or(0.0),
            "placement served"
        );
    }

    info!("shutting down");
    if worker.join().is_err() {
        warn!("refresh worker panicked during shutdown");
    }
    Ok(())
}
