// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Logging settings handed to [`crate::init_logging`]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Base level for everything without a debug flag (trace, debug, info, warn, error)
    pub level: String,

    /// Parent of the per-run `run_YYYYmmdd_HHMMSS` folders
    pub log_dir: PathBuf,

    /// Delete run folders older than this many days
    pub retention_days: u64,

    /// Keep at most this many run folders
    pub retention_runs: usize,

    /// Echo human-readable output to stderr
    pub console: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: "info".to_string(),
            log_dir: PathBuf::from("./logs"),
            retention_days: 30,
            retention_runs: 10,
            console: true,
        }
    }
}
