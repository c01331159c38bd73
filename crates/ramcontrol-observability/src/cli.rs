// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! CLI argument parsing for per-crate debug flags
//!
//! Supports flags like `--debug-ramcontrol-io` or `--debug-all`.

use std::collections::BTreeSet;
use std::env;

use crate::{crate_target, KNOWN_CRATES};

/// Environment variable listing crates to debug (comma-separated, or `all`)
pub const DEBUG_ENV: &str = "RAMCONTROL_DEBUG";

/// Per-crate debug switches
///
/// # Example
/// ```rust
/// use ramcontrol_observability::CrateDebugFlags;
///
/// let flags = CrateDebugFlags::from_args(vec!["--debug-ramcontrol-io".to_string()]);
/// assert!(flags.is_enabled("ramcontrol-io"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CrateDebugFlags {
    pub enabled_crates: BTreeSet<String>,
}

impl CrateDebugFlags {
    /// Looks for arguments matching `--debug-{crate-name}` and `--debug-all`.
    /// Anything else is ignored so the full argv can be passed in.
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut flags = CrateDebugFlags::default();

        for arg in args {
            if arg == "--debug-all" {
                flags.enable_all();
                continue;
            }

            if let Some(crate_name) = arg.strip_prefix("--debug-") {
                flags.enabled_crates.insert(crate_name.to_string());
            }
        }

        flags
    }

    pub fn enable_all(&mut self) {
        for crate_name in KNOWN_CRATES {
            self.enabled_crates.insert(crate_name.to_string());
        }
    }

    /// Apply a `RAMCONTROL_DEBUG` value: `all` or comma-separated crate names
    pub fn merge_env_value(&mut self, value: &str) {
        if value.trim() == "all" {
            self.enable_all();
            return;
        }
        for crate_name in value.split(',') {
            let crate_name = crate_name.trim();
            if !crate_name.is_empty() {
                self.enabled_crates.insert(crate_name.to_string());
            }
        }
    }

    pub fn is_enabled(&self, crate_name: &str) -> bool {
        self.enabled_crates.contains(crate_name)
    }

    pub fn any_enabled(&self) -> bool {
        !self.enabled_crates.is_empty()
    }

    /// `DEBUG` for enabled crates, `INFO` otherwise
    pub fn log_level(&self, crate_name: &str) -> tracing::Level {
        if self.is_enabled(crate_name) {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Build an `EnvFilter` directive string
    ///
    /// Format: `ramcontrol_io=debug,ramcontrol_voice=debug,<base>`.
    pub fn to_filter_string(&self, base_level: &str) -> String {
        let mut filters: Vec<String> = self
            .enabled_crates
            .iter()
            .map(|name| format!("{}=debug", crate_target(name)))
            .collect();
        filters.push(base_level.to_string());
        filters.join(",")
    }
}

/// Parse debug flags from the process arguments and `RAMCONTROL_DEBUG`
pub fn parse_debug_flags() -> CrateDebugFlags {
    let mut flags = CrateDebugFlags::from_args(env::args());
    if let Ok(env_var) = env::var(DEBUG_ENV) {
        flags.merge_env_value(&env_var);
    }
    flags
}

/// Separate debug flags from the remaining arguments
///
/// Binaries parse the remainder with clap, which would otherwise reject the
/// open-ended `--debug-{crate-name}` family. `RAMCONTROL_DEBUG` is merged in.
pub fn split_debug_args<I>(args: I) -> (CrateDebugFlags, Vec<String>)
where
    I: IntoIterator<Item = String>,
{
    let (debug, rest): (Vec<String>, Vec<String>) =
        args.into_iter().partition(|arg| arg.starts_with("--debug-"));

    let mut flags = CrateDebugFlags::from_args(debug);
    if let Ok(env_var) = env::var(DEBUG_ENV) {
        flags.merge_env_value(&env_var);
    }
    (flags, rest)
}

/// Help text appended to the binaries' `--help`
pub fn debug_flags_help() -> String {
    format!(
        r#"Debug Flags:
  --debug-all                    Enable debug logging for all crates
  --debug-{{crate-name}}          Enable debug logging for specific crate

Available crates:
  {}

Environment Variable:
  {}={{crate-name}}[,{{crate-name}}]
  {}=all
"#,
        KNOWN_CRATES.join(", "),
        DEBUG_ENV,
        DEBUG_ENV
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_crate_flag() {
        let flags = CrateDebugFlags::from_args(vec![
            "ramcontrol-task".to_string(),
            "--debug-ramcontrol-io".to_string(),
        ]);
        assert!(flags.is_enabled("ramcontrol-io"));
        assert!(!flags.is_enabled("ramcontrol-voice"));
        assert_eq!(flags.log_level("ramcontrol-io"), tracing::Level::DEBUG);
        assert_eq!(flags.log_level("ramcontrol-voice"), tracing::Level::INFO);
    }

    #[test]
    fn test_debug_all() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-all".to_string()]);
        for crate_name in KNOWN_CRATES {
            assert!(flags.is_enabled(crate_name), "{} should be enabled", crate_name);
        }
    }

    #[test]
    fn test_filter_string_uses_module_paths() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-ramcontrol-control".to_string()]);
        assert_eq!(flags.to_filter_string("warn"), "ramcontrol_control=debug,warn");

        let mut none = CrateDebugFlags::default();
        assert_eq!(none.to_filter_string("info"), "info");
        assert!(!none.any_enabled());

        none.merge_env_value(" ramcontrol-voice , ,ramcontrol ");
        assert!(none.is_enabled("ramcontrol-voice"));
        assert!(none.is_enabled("ramcontrol"));
        assert_eq!(none.enabled_crates.len(), 2);
    }

    #[test]
    fn test_split_debug_args_leaves_other_arguments() {
        let (flags, rest) = split_debug_args(vec![
            "ramcontrol-task".to_string(),
            "--debug-ramcontrol-io".to_string(),
            "--no-host".to_string(),
        ]);
        assert!(flags.is_enabled("ramcontrol-io"));
        assert_eq!(rest, vec!["ramcontrol-task".to_string(), "--no-host".to_string()]);
    }
}
