// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! ramcontrol task runner
//!
//! Binds the control channel, walks through the host handshake and runs a
//! paced demo session: a few word lists, a distractor and a recall period with
//! the voice worker listening. Exits with status 2 when the host link is lost.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use ramcontrol::config::{load_config, validate_config};
use ramcontrol::control::{
    Control, ControlError, ControlResult, ControlState, ShutdownReason, Tick,
};
use ramcontrol::io::MathPayload;
use ramcontrol::observability::{debug_flags_help, init_logging, split_debug_args, LoggingSettings};
use tracing::{error, info, warn};

const DEMO_WORDS: &[&str] = &[
    "APPLE", "RIVER", "CANDLE", "GARDEN", "PILLOW", "TICKET", "MARBLE", "SADDLE", "BUCKET",
    "FOREST", "LADDER", "MIRROR",
];

const DEMO_STATES: &[&str] = &["INSTRUCT", "ENCODING", "WORD", "DISTRACT", "RETRIEVAL"];

/// Exit status when the host stopped answering heartbeats
const EXIT_LINK_LOST: u8 = 2;

/// ramcontrol task runner - demo session against a recording host
#[derive(Parser, Debug)]
#[command(name = "ramcontrol-task", version, long_about = None, after_help = debug_flags_help())]
struct Args {
    /// Configuration file (default: search for ramcontrol.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "FR1")]
    experiment: String,

    /// Experiment version reported to the host
    #[arg(long, default_value = "1.0.0")]
    exp_version: String,

    #[arg(long, default_value_t = 0)]
    session: u32,

    #[arg(long, default_value = "R1001P")]
    subject: String,

    /// Override `network.address`
    #[arg(long)]
    address: Option<String>,

    /// Run without a host PC
    #[arg(long, default_value_t = false)]
    no_host: bool,

    /// Start the voice activity worker
    #[arg(long, default_value_t = false)]
    voice: bool,

    /// Skip the clock alignment exchange
    #[arg(long, default_value_t = false)]
    skip_align: bool,

    /// Number of word lists
    #[arg(long, default_value_t = 2)]
    lists: u32,

    #[arg(long, default_value_t = 4)]
    words_per_list: usize,

    #[arg(long, default_value_t = 800)]
    word_ms: u64,

    #[arg(long, default_value_t = 5000)]
    recall_ms: u64,

    /// Override `logging.level`
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if let Some(address) = &self.address {
            overrides.insert("address".to_string(), address.clone());
        }
        if self.no_host {
            overrides.insert("no_host".to_string(), "true".to_string());
        }
        if self.voice {
            overrides.insert("voice_server".to_string(), "true".to_string());
        }
        if let Some(level) = &self.log_level {
            overrides.insert("log_level".to_string(), level.clone());
        }
        overrides
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(reason) if reason.is_failure() => ExitCode::from(EXIT_LINK_LOST),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ramcontrol-task: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ShutdownReason> {
    let (debug_flags, rest) = split_debug_args(std::env::args());
    let args = Args::parse_from(rest);

    let config = load_config(args.config.as_deref(), Some(&args.overrides()))
        .context("Failed to load configuration")?;
    validate_config(&config).context("Invalid configuration")?;

    let logging = LoggingSettings {
        level: config.logging.level.clone(),
        log_dir: config.logging.log_dir.clone(),
        retention_days: config.logging.retention_days,
        retention_runs: config.logging.retention_runs,
        console: true,
    };
    let guard = init_logging(&debug_flags, &logging).context("Failed to initialize logging")?;
    info!("ramcontrol {} logging to {}", ramcontrol::VERSION, guard.log_dir().display());

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        warn!("Interrupt received, shutting down (press Ctrl+C again to force)");
    })
    .context("Failed to install Ctrl-C handler")?;

    let mut control = Control::from_config(&config).context("Failed to set up control channel")?;
    control.configure(&args.experiment, &args.exp_version, args.session, &args.subject)?;
    control.set_allowed_states(DEMO_STATES.iter().copied())?;

    let poll = Duration::from_millis(config.network.idle_sleep_ms.max(1));
    if config.session.no_host {
        warn!("***** PROCEEDING WITHOUT CONNECTING TO HOST PC *****");
    } else {
        match handshake(&mut control, &args, poll, &interrupted) {
            Ok(()) => {}
            Err(ControlError::SessionEnded(reason)) => {
                error!("Session ended during handshake: {}", reason);
                return Ok(reason);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if let Err(reason) = run_session(&mut control, &args, &interrupted) {
        if reason == ShutdownReason::Interrupted {
            control.shutdown_with(ShutdownReason::Interrupted);
        }
    }
    control.shutdown();

    let reason = control
        .shutdown_reason()
        .cloned()
        .unwrap_or(ShutdownReason::Requested);
    if reason.is_failure() {
        error!("Session ended: {}", reason);
    } else {
        info!("Session ended: {}", reason);
    }
    Ok(reason)
}

fn handshake(
    control: &mut Control,
    args: &Args,
    poll: Duration,
    interrupted: &AtomicBool,
) -> ControlResult<()> {
    // The waits cannot be cancelled from outside; an interrupt ends the process
    let bail_on_interrupt = |state: ControlState| {
        if interrupted.load(Ordering::SeqCst) {
            error!("Interrupted while {}", state);
            std::process::exit(130);
        }
    };
    control.initiate_connection(bail_on_interrupt, poll)?;
    if !args.skip_align {
        control.align_clocks(bail_on_interrupt, poll)?;
    }
    control.wait_for_start_message(bail_on_interrupt, poll)
}

/// Keep the link serviced for `duration`
///
/// Returns the reason when the session ends or the operator interrupts.
fn pace(
    control: &mut Control,
    duration: Duration,
    interrupted: &AtomicBool,
) -> Result<(), ShutdownReason> {
    let tick = control.settings().idle_sleep.max(Duration::from_millis(1));
    let began = Instant::now();
    loop {
        if interrupted.load(Ordering::SeqCst) {
            return Err(ShutdownReason::Interrupted);
        }
        match control.update() {
            Tick::Open => {}
            Tick::LinkLost => {
                return Err(control
                    .shutdown_reason()
                    .cloned()
                    .unwrap_or(ShutdownReason::LinkLost { silent_ms: 0 }))
            }
            Tick::Closed(reason) => return Err(reason),
        }
        if began.elapsed() >= duration {
            return Ok(());
        }
        thread::sleep(tick);
    }
}

fn run_session(
    control: &mut Control,
    args: &Args,
    interrupted: &AtomicBool,
) -> Result<(), ShutdownReason> {
    let word_time = Duration::from_millis(args.word_ms);

    control.send_state("INSTRUCT", true);
    pace(control, word_time, interrupted)?;
    control.send_state("INSTRUCT", false);

    for list in 0..args.lists {
        control.send_trial(i64::from(list) + 1);
        info!("List {} of {}", list + 1, args.lists);

        control.send_state("ENCODING", true);
        for serialpos in 0..args.words_per_list {
            let word = DEMO_WORDS[(list as usize * args.words_per_list + serialpos) % DEMO_WORDS.len()];
            control.send_state("WORD", true);
            control.send_word(word, serialpos as u32);
            pace(control, word_time, interrupted)?;
            control.send_state("WORD", false);
        }
        control.send_state("ENCODING", false);

        control.send_state("DISTRACT", true);
        let (a, b) = (list + 2, list + 5);
        control.send_math(&MathPayload {
            problem: format!("{a} + {b} = "),
            response: (a + b).to_string(),
            correct: true,
            response_time_ms: 1200,
        });
        pace(control, word_time, interrupted)?;
        control.send_state("DISTRACT", false);

        control.send_state("RETRIEVAL", true);
        let recall = Duration::from_millis(args.recall_ms);
        match control.with_voice_gate(|c| pace(c, recall, interrupted)) {
            Ok(outcome) => outcome?,
            Err(e) => error!("Recall ran without voice detection: {}", e),
        }
        control.send_state("RETRIEVAL", false);
    }

    // Let queued messages reach the host before EXIT
    pace(control, Duration::from_millis(100), interrupted)
}
