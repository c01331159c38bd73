// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! # ramcontrol-observability
//!
//! Logging setup shared by the task runner, the mock host and the VAD worker.
//!
//! Besides the usual per-crate output, two named targets carry the session
//! record that experimenters read after a run:
//! - [`NETWORK_TARGET`]: every message sent to or received from the host
//! - [`EVENTS_TARGET`]: task events such as detected vocalizations

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod init;

pub use cli::*;
pub use config::*;
pub use init::*;

/// Known ramcontrol crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "ramcontrol",
    "ramcontrol-config",
    "ramcontrol-io",
    "ramcontrol-voice",
    "ramcontrol-control",
];

/// Tracing target for the wire log (one record per message, with direction)
pub const NETWORK_TARGET: &str = "ramcontrol::network";

/// Tracing target for the task event log
pub const EVENTS_TARGET: &str = "ramcontrol::events";

/// Tracing target for the worker's periodic timestamp records
pub const VOICE_TIMES_TARGET: &str = "ramcontrol::voicetimes";

/// Module path prefix used by tracing for a crate name (`ramcontrol-io` -> `ramcontrol_io`)
pub fn crate_target(crate_name: &str) -> String {
    crate_name.replace('-', "_")
}
