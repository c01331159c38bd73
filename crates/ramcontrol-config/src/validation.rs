// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Checks that values are usable before any socket is bound or worker spawned.
//! All problems are collected and reported together.

use crate::{ConfigError, ConfigResult, RamConfig};

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
    InvalidAddress { field: String, address: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
            Self::InvalidAddress { field, address } => {
                write!(
                    f,
                    "{} = '{}' is not a ZMQ endpoint (expected tcp://, ipc:// or inproc://)",
                    field, address
                )
            }
        }
    }
}

/// Validate the complete configuration
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &RamConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_network(config, &mut errors);
    validate_voice(config, &mut errors);
    validate_logging(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn positive(field: &str, ok: bool, errors: &mut Vec<ConfigValidationError>) {
    if !ok {
        errors.push(ConfigValidationError::InvalidValue {
            field: field.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
}

fn validate_network(config: &RamConfig, errors: &mut Vec<ConfigValidationError>) {
    let network = &config.network;

    if network.address.is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "network.address".to_string(),
        });
    } else if !["tcp://", "ipc://", "inproc://"]
        .iter()
        .any(|scheme| network.address.starts_with(scheme))
    {
        errors.push(ConfigValidationError::InvalidAddress {
            field: "network.address".to_string(),
            address: network.address.clone(),
        });
    } else if let Some(endpoint) = network.address.strip_prefix("tcp://") {
        let port_ok = endpoint
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !port_ok {
            errors.push(ConfigValidationError::InvalidValue {
                field: "network.address".to_string(),
                reason: format!("'{}' needs a host and a numeric port", network.address),
            });
        }
    }

    if !network.connection_timeout_s.is_finite() || network.connection_timeout_s <= 0.0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "network.connection_timeout_s".to_string(),
            reason: format!("{} is not a positive number of seconds", network.connection_timeout_s),
        });
    }

    positive("network.heartbeat_interval_ms", network.heartbeat_interval_ms > 0, errors);
    positive("network.outbound_queue_capacity", network.outbound_queue_capacity > 0, errors);
    positive("network.max_inbound_per_pump", network.max_inbound_per_pump > 0, errors);

    // A heartbeat slower than the timeout would let the host declare us dead.
    let timeout_ms = network.connection_timeout_s * 1000.0;
    if network.heartbeat_interval_ms > 0 && (network.heartbeat_interval_ms as f64) >= timeout_ms {
        errors.push(ConfigValidationError::InvalidValue {
            field: "network.heartbeat_interval_ms".to_string(),
            reason: format!(
                "{} ms must be shorter than connection_timeout_s ({} s)",
                network.heartbeat_interval_ms, network.connection_timeout_s
            ),
        });
    }
}

fn validate_voice(config: &RamConfig, errors: &mut Vec<ConfigValidationError>) {
    let voice = &config.voice;

    positive("voice.start_ack_timeout_ms", voice.start_ack_timeout_ms > 0, errors);
    positive("voice.stop_ack_attempts", voice.stop_ack_attempts > 0, errors);
    positive("voice.sample_rate", voice.sample_rate > 0, errors);
    positive("voice.frame_ms", voice.frame_ms > 0, errors);
    positive("voice.consecutive_frames", voice.consecutive_frames > 0, errors);

    if voice.sample_rate > 0 && voice.frame_ms > 0 {
        let samples = u64::from(voice.sample_rate) * u64::from(voice.frame_ms);
        if samples % 1000 != 0 {
            errors.push(ConfigValidationError::InvalidValue {
                field: "voice.frame_ms".to_string(),
                reason: format!(
                    "{} ms at {} Hz is not a whole number of samples",
                    voice.frame_ms, voice.sample_rate
                ),
            });
        }
    }

    if !voice.threshold_dbfs.is_finite() || voice.threshold_dbfs > 0.0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "voice.threshold_dbfs".to_string(),
            reason: format!("{} must be a finite value at or below 0 dBFS", voice.threshold_dbfs),
        });
    }

    if let Some(path) = &voice.pcm_file {
        if config.session.voice_server && !path.exists() {
            errors.push(ConfigValidationError::InvalidValue {
                field: "voice.pcm_file".to_string(),
                reason: format!("{} does not exist", path.display()),
            });
        }
    }
}

fn validate_logging(config: &RamConfig, errors: &mut Vec<ConfigValidationError>) {
    let level = config.logging.level.to_ascii_lowercase();
    if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "logging.level".to_string(),
            reason: format!("unknown level '{}'", config.logging.level),
        });
    }

    // The current run folder counts against the limit.
    positive("logging.retention_runs", config.logging.retention_runs > 0, errors);
}
