// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Stand-in for the recording host PC
//!
//! Connects to a running `ramcontrol-task`, answers the handshake and prints a
//! summary of what the task sent once it exits.

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use ramcontrol::control::{MockHost, MockHostSettings};
use ramcontrol::observability::{debug_flags_help, init_stderr_logging, split_debug_args};
use tracing::{info, warn};

/// ramcontrol mock host - plays the host PC side of the control channel
#[derive(Parser, Debug)]
#[command(name = "ramcontrol-mock-host", version, long_about = None, after_help = debug_flags_help())]
struct Args {
    /// Address of the task machine
    #[arg(long, default_value = "tcp://127.0.0.1:8889")]
    address: String,

    /// SYNC round trips per clock alignment
    #[arg(long, default_value_t = 10)]
    sync_rounds: u32,

    /// Do not answer READY with START
    #[arg(long, default_value_t = false)]
    no_start: bool,

    /// Stop echoing heartbeats (the task should declare the link lost)
    #[arg(long, default_value_t = false)]
    silent: bool,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 600)]
    limit_s: u64,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<ExitCode> {
    let (debug_flags, rest) = split_debug_args(std::env::args());
    let args = Args::parse_from(rest);
    init_stderr_logging(&debug_flags, &args.log_level).context("Failed to initialize logging")?;

    let settings = MockHostSettings {
        sync_rounds: args.sync_rounds,
        answer_ready: !args.no_start,
        echo_heartbeats: !args.silent,
        ..MockHostSettings::default()
    };
    let mut host = MockHost::connect(&args.address, settings)
        .with_context(|| format!("Failed to connect to {}", args.address))?;
    info!("Connected to task machine at {}", args.address);

    let report = host.run(Duration::from_secs(args.limit_s))?;

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for kind in report.kinds() {
        *counts.entry(kind).or_default() += 1;
    }
    for (kind, count) in &counts {
        info!("{:>12}: {}", kind, count);
    }
    if !report.clock_offsets.is_empty() {
        let n = report.clock_offsets.len() as f64;
        let mean = report.clock_offsets.iter().sum::<f64>() / n;
        info!("Mean clock offset {:.3} ms over {} round trips", mean, n);
    }

    if report.exited {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("Task never sent EXIT");
        Ok(ExitCode::FAILURE)
    }
}
