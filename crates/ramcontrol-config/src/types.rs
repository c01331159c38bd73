// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! Each struct maps to a section of `ramcontrol.toml`. Every section is
//! `#[serde(default)]`, so a partial file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RamConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub voice: VoiceConfig,
    pub logging: LoggingConfig,
}

/// Control channel to the host PC
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// ZMQ address the task machine binds (the host always connects)
    pub address: String,
    /// Seconds without a host heartbeat before the link is declared dead
    pub connection_timeout_s: f64,
    pub heartbeat_interval_ms: u64,
    pub outbound_queue_capacity: usize,
    /// Upper bound on the inbound wait of a single pump
    pub inbound_poll_ms: u64,
    pub max_inbound_per_pump: usize,
    pub linger_ms: i32,
    /// Sleep between pump cycles inside the blocking waits
    pub idle_sleep_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "tcp://*:8889".to_string(),
            connection_timeout_s: 10.0,
            heartbeat_interval_ms: 1000,
            outbound_queue_capacity: 32,
            inbound_poll_ms: 1,
            max_inbound_per_pump: 64,
            linger_ms: 250,
            idle_sleep_ms: 5,
        }
    }
}

impl NetworkConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connection_timeout_s.max(0.0))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Environment surface consumed by the session runner
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Run without a host PC (development mode)
    pub no_host: bool,
    /// Start the voice activity detection worker
    pub voice_server: bool,
}

/// Voice activity detection worker
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Worker executable. `None` resolves `ramcontrol-vad-worker` next to the current binary.
    pub worker_path: Option<PathBuf>,
    pub start_ack_timeout_ms: u64,
    pub stop_ack_attempts: u32,
    pub stop_ack_poll_ms: u64,
    pub join_timeout_ms: u64,
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub consecutive_frames: usize,
    pub threshold_dbfs: f64,
    /// Raw signed 16-bit little-endian mono PCM file to analyze instead of silence
    pub pcm_file: Option<PathBuf>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            worker_path: None,
            start_ack_timeout_ms: 100,
            stop_ack_attempts: 6,
            stop_ack_poll_ms: 100,
            join_timeout_ms: 1000,
            sample_rate: 32000,
            frame_ms: 20,
            consecutive_frames: 3,
            threshold_dbfs: -35.0,
            pcm_file: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: PathBuf,
    pub retention_days: u64,
    pub retention_runs: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("./logs"),
            retention_days: 30,
            retention_runs: 10,
        }
    }
}
