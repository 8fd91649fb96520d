//! swarm-top: live fleet fitness table.
//!
//! Connects to every fleet host and prints one telemetry row per host per
//! refresh, with the table header repeated every ten rows. `--format json`
//! emits one JSON object per row instead, for scripting.

mod table;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;

use swarm_common::config::VIEWER_PROBE_WINDOW_S;
use swarm_common::hosts;
use swarm_common::logging;
use swarm_common::shutdown;
use swarm_common::ssh::probe::FitnessSample;
use swarm_common::ssh::{HostKeyPolicy, Session, SshOptions};

#[derive(Parser)]
#[command(name = "swarm-top", about = "swarm fleet fitness viewer")]
struct Cli {
    /// Number of refresh iterations (0 = run until a signal arrives)
    #[arg(short = 'n', default_value_t = 0)]
    iterations: u64,

    /// Refresh interval in seconds
    #[arg(short = 'i', default_value_t = 1.0)]
    interval: f64,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Table,
    Json,
}

/// One telemetry row, as serialized in JSON mode.
#[derive(Serialize)]
struct HostRow<'a> {
    host: &'a str,
    #[serde(flatten)]
    sample: FitnessSample,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    shutdown::install_handlers().context("installing signal handlers")?;

    let fleet = hosts::fleet();
    let opts = SshOptions::from_env(HostKeyPolicy::AcceptNew)?;
    let mut sessions = Vec::with_capacity(fleet.len());
    for hostname in &fleet {
        let session = Session::connect(hostname, &opts)
            .with_context(|| format!("connecting to fleet host '{hostname}'"))?;
        sessions.push(session);
    }

    let interval = Duration::from_secs_f64(cli.interval.max(0.0));
    let mut remaining = cli.iterations;
    let mut passes = 0u64;

    while !shutdown::quit_requested() {
        let started = Instant::now();

        if cli.format == OutputFormat::Table && passes % 10 == 0 {
            print!("{}", table::header());
        }
        passes += 1;

        for session in &sessions {
            let sample = session.fitness(VIEWER_PROBE_WINDOW_S);
            match cli.format {
                OutputFormat::Table => {
                    print!("{}", table::row(session.hostname(), &sample));
                }
                OutputFormat::Json => {
                    let row = HostRow {
                        host: session.hostname(),
                        sample,
                    };
                    println!("{}", serde_json::to_string(&row)?);
                }
            }
        }

        if cli.iterations != 0 {
            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }

        if !shutdown::quit_requested() && !interval.is_zero() {
            let elapsed = started.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
    }

    Ok(())
}
