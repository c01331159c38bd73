// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! # ramcontrol
//!
//! Task-machine side of the control link between a behavioural experiment and
//! a physiological recording host. The host connects over a ZMQ PAIR socket,
//! the task identifies the session, both ends align clocks, and from then on
//! the task reports experiment events while a heartbeat keeps the link honest.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use ramcontrol::prelude::*;
//!
//! let config = load_config(None, None)?;
//! let mut control = Control::from_config(&config)?;
//! control.configure("FR1", "1.0.0", 0, "R1001P")?;
//!
//! let poll = Duration::from_millis(10);
//! control.initiate_connection(|_| {}, poll)?;
//! control.align_clocks(|_| {}, poll)?;
//! control.wait_for_start_message(|_| {}, poll)?;
//!
//! control.send_trial(1);
//! control.send_word("APPLE", 1);
//! control.update();
//! control.shutdown();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Foundation: ramcontrol-config, ramcontrol-observability│
//! │  (TOML settings, logging, per-crate debug flags)        │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  I/O: ramcontrol-io                                     │
//! │  (message codec, outbound queue, ZMQ PAIR transport)    │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Worker: ramcontrol-voice                               │
//! │  (VAD worker process, line protocol over stdin/stdout)  │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Control: ramcontrol-control                            │
//! │  (session state, heartbeat, dispatch, shutdown)         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Binaries
//!
//! - `ramcontrol-task`: runs a paced demo session against a host
//! - `ramcontrol-mock-host`: stands in for the recording host
//! - `ramcontrol-vad-worker`: the voice activity worker (from `ramcontrol-voice`)

pub use ramcontrol_config as config;
pub use ramcontrol_control as control;
pub use ramcontrol_io as io;
pub use ramcontrol_observability as observability;
pub use ramcontrol_voice as voice;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::config::{load_config, validate_config, RamConfig};
    pub use crate::control::{
        Control, ControlError, ControlResult, ControlSettings, ControlState, HandlerContext,
        HandlerResult, ShutdownReason, Tick,
    };
    pub use crate::io::{MathPayload, Message, MessageType};
    pub use crate::voice::{WorkerEvent, WorkerSession, WorkerSettings};
}
