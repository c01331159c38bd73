// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Voice activity detection worker
//!
//! Spawned by the task process. Reads requests on stdin and answers on stdout;
//! logs go to stderr.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use ramcontrol_observability::{debug_flags_help, init_stderr_logging, split_debug_args};
use ramcontrol_voice::{serve, SourceSpec, WorkerOptions};
use tracing::{error, info};

/// ramcontrol VAD worker - speech onset/offset detection over a stdio pipe
#[derive(Parser, Debug)]
#[command(name = "ramcontrol-vad-worker", version, long_about = None, after_help = debug_flags_help())]
struct Args {
    /// Raw s16le mono PCM to analyse instead of silence
    #[arg(long)]
    pcm_file: Option<PathBuf>,

    #[arg(long, default_value_t = 32000)]
    sample_rate: u32,

    /// Frame length in milliseconds
    #[arg(long, default_value_t = 20)]
    frame_ms: u32,

    /// Speech frames in a row before an onset is reported
    #[arg(long, default_value_t = 3)]
    consecutive_frames: usize,

    /// RMS level (dBFS) at which a frame counts as speech
    #[arg(long, default_value_t = -35.0, allow_negative_numbers = true)]
    threshold_dbfs: f64,

    /// Read audio as fast as possible instead of at the sample rate
    #[arg(long, default_value_t = false)]
    no_realtime: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let (debug_flags, rest) = split_debug_args(std::env::args());
    let args = Args::parse_from(rest);

    init_stderr_logging(&debug_flags, &args.log_level).context("Failed to initialize logging")?;

    let options = WorkerOptions {
        source: args
            .pcm_file
            .map_or(SourceSpec::Silence, SourceSpec::PcmFile),
        sample_rate: args.sample_rate,
        frame_ms: args.frame_ms,
        consecutive_frames: args.consecutive_frames,
        threshold_dbfs: args.threshold_dbfs,
        realtime: !args.no_realtime,
        timestamp_interval: Duration::from_secs(1),
    };
    info!(
        "VAD worker ready ({} Hz, {} ms frames, {:?})",
        options.sample_rate, options.frame_ms, options.source
    );

    let stdin = io::stdin();
    if let Err(e) = serve(stdin.lock(), Box::new(io::stdout()), options) {
        error!("VAD worker failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}
