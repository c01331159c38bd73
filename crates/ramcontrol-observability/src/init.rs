// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Logging initialization
//!
//! Every run gets its own folder with per-crate JSON files, the wire log,
//! the event log and a combined file. Old run folders are pruned on start.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;
use crate::config::LoggingSettings;
use crate::{crate_target, EVENTS_TARGET, KNOWN_CRATES, NETWORK_TARGET, VOICE_TIMES_TARGET};

const RUN_PREFIX: &str = "run_";
const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Keeps the non-blocking writers alive; logs are flushed when dropped
pub struct LoggingGuard {
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: PathBuf,
}

impl LoggingGuard {
    /// The folder of the current run
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn json_file_layer(
    run_folder: &Path,
    file_name: &str,
    filter: EnvFilter,
    guards: &mut Vec<tracing_appender::non_blocking::WorkerGuard>,
) -> BoxedLayer {
    let appender = rolling::never(run_folder, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    guards.push(guard);

    tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .with_filter(filter)
        .boxed()
}

fn env_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives).with_context(|| format!("Invalid log filter: {directives}"))
}

/// Initialize logging with file output and console output
///
/// ```text
/// ./logs/
///   └── run_20250101_120000/
///       ├── ramcontrol-io.log
///       ├── ramcontrol-control.log
///       ├── network.log
///       ├── events.log
///       └── ramcontrol.log (combined)
/// ```
pub fn init_logging(debug_flags: &CrateDebugFlags, settings: &LoggingSettings) -> Result<LoggingGuard> {
    let timestamp = Utc::now().format(RUN_TIMESTAMP_FORMAT);
    let run_folder = settings.log_dir.join(format!("{RUN_PREFIX}{timestamp}"));
    std::fs::create_dir_all(&run_folder)
        .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;

    cleanup_old_logs(
        &settings.log_dir,
        settings.retention_days,
        settings.retention_runs,
        Utc::now(),
    )?;

    let filter = debug_flags.to_filter_string(&settings.level);

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut file_guards = Vec::new();

    if settings.console {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter(&format!("{filter},{NETWORK_TARGET}=warn"))?)
            .boxed();
        layers.push(console_layer);
    }

    for crate_name in KNOWN_CRATES {
        let directive = format!(
            "{}={}",
            crate_target(crate_name),
            debug_flags.log_level(crate_name).as_str().to_ascii_lowercase()
        );
        layers.push(json_file_layer(
            &run_folder,
            &format!("{crate_name}.log"),
            env_filter(&directive)?,
            &mut file_guards,
        ));
    }

    layers.push(json_file_layer(
        &run_folder,
        "network.log",
        env_filter(&format!("{NETWORK_TARGET}=info"))?,
        &mut file_guards,
    ));
    layers.push(json_file_layer(
        &run_folder,
        "events.log",
        env_filter(&format!("{EVENTS_TARGET}=info,{VOICE_TIMES_TARGET}=info"))?,
        &mut file_guards,
    ));
    layers.push(json_file_layer(
        &run_folder,
        "ramcontrol.log",
        env_filter(&filter)?,
        &mut file_guards,
    ));

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow!("Logging already initialized: {e}"))?;

    Ok(LoggingGuard {
        _file_guards: file_guards,
        log_dir: run_folder,
    })
}

/// Console-only logging for helper processes
///
/// The VAD worker owns stdout for its pipe protocol, so everything goes to stderr.
pub fn init_stderr_logging(debug_flags: &CrateDebugFlags, level: &str) -> Result<()> {
    let filter = env_filter(&debug_flags.to_filter_string(level))?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("Logging already initialized: {e}"))
}

fn parse_run_timestamp(dir_name: &str) -> Option<DateTime<Utc>> {
    let stamp = dir_name.strip_prefix(RUN_PREFIX)?;
    NaiveDateTime::parse_from_str(stamp, RUN_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Remove run folders older than `retention_days`, then all but the newest `retention_runs`
///
/// Folders whose names are not `run_<timestamp>` are left alone.
pub fn cleanup_old_logs(
    base_log_dir: &Path,
    retention_days: u64,
    retention_runs: usize,
    now: DateTime<Utc>,
) -> Result<()> {
    if !base_log_dir.exists() {
        return Ok(());
    }

    let cutoff_date = now - chrono::Duration::days(retention_days as i64);

    let mut runs: Vec<(PathBuf, DateTime<Utc>)> = Vec::new();
    for entry in std::fs::read_dir(base_log_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let stamp = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_run_timestamp);
        if let Some(dt) = stamp {
            runs.push((path, dt));
        }
    }

    // Newest first
    runs.sort_by(|a, b| b.1.cmp(&a.1));

    for (index, (path, dt)) in runs.iter().enumerate() {
        if *dt < cutoff_date || index >= retention_runs {
            if let Err(e) = std::fs::remove_dir_all(path) {
                eprintln!(
                    "Warning: Failed to remove old log directory {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }

    Ok(())
}
