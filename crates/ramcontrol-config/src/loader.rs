// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! Three tiers, applied in order:
//! 1. TOML file (or built-in defaults when no file exists)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, RamConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "ramcontrol.toml";
pub const CONFIG_PATH_ENV: &str = "RAMCONTROL_CONFIG_PATH";

/// Legacy JSON object set by the experiment launcher, e.g. `{"no_host": true, "voiceserver": false}`.
const LEGACY_ENV: &str = "RAM_CONFIG";

/// Find the configuration file
///
/// Search order:
/// 1. `RAMCONTROL_CONFIG_PATH` environment variable
/// 2. Current working directory: `./ramcontrol.toml`
/// 3. Up to five parent directories
///
/// Returns `Ok(None)` when nothing is found; running on defaults is allowed.
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if `RAMCONTROL_CONFIG_PATH` names a missing file
pub fn find_config_file() -> ConfigResult<Option<PathBuf>> {
    if let Ok(env_path) = env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::FileNotFound(format!(
            "file specified by {} does not exist: {}",
            CONFIG_PATH_ENV,
            path.display()
        )));
    }

    let Ok(cwd) = env::current_dir() else {
        return Ok(None);
    };

    let mut current = Some(cwd.as_path());
    for _ in 0..6 {
        let Some(dir) = current else { break };
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(Some(candidate));
        }
        current = dir.parent();
    }

    Ok(None)
}

/// Load configuration
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, the file is searched for.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if an explicitly named file is missing or contains invalid TOML
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<RamConfig> {
    let config_file = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file()?,
    };

    let mut config = match config_file {
        Some(path) => {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)?
        }
        None => RamConfig::default(),
    };

    apply_environment_overrides(&mut config)?;

    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli)?;
    }

    Ok(config)
}

fn parse_bool(name: &str, raw: &str) -> ConfigResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(format!(
            "invalid boolean for {name}: '{raw}'"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> ConfigResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(format!("invalid number for {name}: '{raw}'")))
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `RAMCONTROL_ADDRESS` -> `network.address`
/// - `RAMCONTROL_CONNECTION_TIMEOUT_S` -> `network.connection_timeout_s`
/// - `RAMCONTROL_HEARTBEAT_INTERVAL_MS` -> `network.heartbeat_interval_ms`
/// - `RAMCONTROL_NO_HOST` -> `session.no_host`
/// - `RAMCONTROL_VOICE_SERVER` -> `session.voice_server`
/// - `RAMCONTROL_LOG_LEVEL` -> `logging.level`
/// - `RAMCONTROL_LOG_DIR` -> `logging.log_dir`
/// - `RAM_CONFIG` (JSON) -> `session.no_host`, `session.voice_server`
pub fn apply_environment_overrides(config: &mut RamConfig) -> ConfigResult<()> {
    if let Ok(raw) = env::var(LEGACY_ENV) {
        let legacy: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
            ConfigError::InvalidValue(format!("{LEGACY_ENV} is not valid JSON: {e}"))
        })?;
        if let Some(no_host) = legacy.get("no_host").and_then(|v| v.as_bool()) {
            config.session.no_host = no_host;
        }
        if let Some(voice) = legacy.get("voiceserver").and_then(|v| v.as_bool()) {
            config.session.voice_server = voice;
        }
    }

    if let Ok(value) = env::var("RAMCONTROL_ADDRESS") {
        config.network.address = value;
    }
    if let Ok(value) = env::var("RAMCONTROL_CONNECTION_TIMEOUT_S") {
        config.network.connection_timeout_s =
            parse_number("RAMCONTROL_CONNECTION_TIMEOUT_S", &value)?;
    }
    if let Ok(value) = env::var("RAMCONTROL_HEARTBEAT_INTERVAL_MS") {
        config.network.heartbeat_interval_ms =
            parse_number("RAMCONTROL_HEARTBEAT_INTERVAL_MS", &value)?;
    }
    if let Ok(value) = env::var("RAMCONTROL_NO_HOST") {
        config.session.no_host = parse_bool("RAMCONTROL_NO_HOST", &value)?;
    }
    if let Ok(value) = env::var("RAMCONTROL_VOICE_SERVER") {
        config.session.voice_server = parse_bool("RAMCONTROL_VOICE_SERVER", &value)?;
    }
    if let Ok(value) = env::var("RAMCONTROL_LOG_LEVEL") {
        config.logging.level = value;
    }
    if let Ok(value) = env::var("RAMCONTROL_LOG_DIR") {
        config.logging.log_dir = PathBuf::from(value);
    }

    Ok(())
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - Key/value overrides (e.g., `{"address": "tcp://*:9000", "no_host": "true"}`)
pub fn apply_cli_overrides(
    config: &mut RamConfig,
    cli_args: &HashMap<String, String>,
) -> ConfigResult<()> {
    if let Some(value) = cli_args.get("address") {
        config.network.address = value.clone();
    }
    if let Some(value) = cli_args.get("connection_timeout_s") {
        config.network.connection_timeout_s = parse_number("connection_timeout_s", value)?;
    }
    if let Some(value) = cli_args.get("heartbeat_interval_ms") {
        config.network.heartbeat_interval_ms = parse_number("heartbeat_interval_ms", value)?;
    }
    if let Some(value) = cli_args.get("no_host") {
        config.session.no_host = parse_bool("no_host", value)?;
    }
    if let Some(value) = cli_args.get("voice_server") {
        config.session.voice_server = parse_bool("voice_server", value)?;
    }
    if let Some(value) = cli_args.get("worker_path") {
        config.voice.worker_path = Some(PathBuf::from(value));
    }
    if let Some(value) = cli_args.get("pcm_file") {
        config.voice.pcm_file = Some(PathBuf::from(value));
    }
    if let Some(value) = cli_args.get("log_level") {
        config.logging.level = value.clone();
    }
    if let Some(value) = cli_args.get("log_dir") {
        config.logging.log_dir = PathBuf::from(value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        CONFIG_PATH_ENV,
        LEGACY_ENV,
        "RAMCONTROL_ADDRESS",
        "RAMCONTROL_CONNECTION_TIMEOUT_S",
        "RAMCONTROL_HEARTBEAT_INTERVAL_MS",
        "RAMCONTROL_NO_HOST",
        "RAMCONTROL_VOICE_SERVER",
        "RAMCONTROL_LOG_LEVEL",
        "RAMCONTROL_LOG_DIR",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom.toml");
        File::create(&config_path).unwrap();

        env::set_var(CONFIG_PATH_ENV, config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var(CONFIG_PATH_ENV);

        assert_eq!(result.unwrap(), Some(config_path));
    }

    #[test]
    fn test_find_config_file_env_var_missing_file() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var(CONFIG_PATH_ENV, "/definitely/not/here/ramcontrol.toml");
        let result = find_config_file();
        env::remove_var(CONFIG_PATH_ENV);

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[network]").unwrap();
        writeln!(file, "address = \"tcp://127.0.0.1:9100\"").unwrap();
        writeln!(file, "connection_timeout_s = 4.5").unwrap();
        writeln!(file, "[voice]").unwrap();
        writeln!(file, "stop_ack_attempts = 3").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.network.address, "tcp://127.0.0.1:9100");
        assert_eq!(config.network.connection_timeout_s, 4.5);
        assert_eq!(config.voice.stop_ack_attempts, 3);
        assert_eq!(config.voice.start_ack_timeout_ms, 100);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "[network\naddress = ").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_env();
        let mut config = RamConfig::default();

        env::set_var("RAMCONTROL_ADDRESS", "tcp://*:9999");
        env::set_var("RAMCONTROL_CONNECTION_TIMEOUT_S", "3");
        env::set_var("RAMCONTROL_NO_HOST", "yes");

        let result = apply_environment_overrides(&mut config);
        clear_env();

        result.unwrap();
        assert_eq!(config.network.address, "tcp://*:9999");
        assert_eq!(config.network.connection_timeout_s, 3.0);
        assert!(config.session.no_host);
    }

    #[test]
    fn test_legacy_ram_config_env() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_env();
        let mut config = RamConfig::default();

        env::set_var(LEGACY_ENV, r#"{"no_host": true, "voiceserver": true, "ps4": false}"#);
        let result = apply_environment_overrides(&mut config);
        clear_env();

        result.unwrap();
        assert!(config.session.no_host);
        assert!(config.session.voice_server);
    }

    #[test]
    fn test_bad_boolean_is_rejected() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_env();
        let mut config = RamConfig::default();

        env::set_var("RAMCONTROL_VOICE_SERVER", "maybe");
        let result = apply_environment_overrides(&mut config);
        clear_env();

        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_cli_overrides_win_over_file() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "[session]\nno_host = false\n").unwrap();

        let mut cli = HashMap::new();
        cli.insert("no_host".to_string(), "true".to_string());
        cli.insert("address".to_string(), "tcp://*:7000".to_string());

        let config = load_config(Some(&config_path), Some(&cli)).unwrap();
        assert!(config.session.no_host);
        assert_eq!(config.network.address, "tcp://*:7000");
    }
}
