// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! # ramcontrol-control
//!
//! The task machine's side of the session with the recording host.
//!
//! [`Control`] walks the session lifecycle (configure, connect, align clocks,
//! wait for `START`, run, shut down), dispatches inbound messages, keeps the
//! link alive with the [`HeartbeatMonitor`] and forwards voice worker events.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use ramcontrol_control::{Control, ControlSettings, Tick};
//!
//! let mut control = Control::new(ControlSettings::default());
//! control.bind("tcp://*:8889").expect("bind");
//! control.configure("FR1", "1.0.0", 0, "R1001P").expect("configure");
//!
//! let poll = Duration::from_millis(10);
//! control.initiate_connection(|_| {}, poll).expect("connect");
//! control.wait_for_start_message(|_| {}, poll).expect("start");
//!
//! control.send_trial(1);
//! while control.update() == Tick::Open {
//!     // experiment loop
//! #   break;
//! }
//! control.shutdown();
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod clock;
pub mod control;
pub mod error;
pub mod handlers;
pub mod heartbeat;
pub mod mock_host;
pub mod state;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use control::{Control, ControlSettings, VOCALIZATION_STATE};
pub use error::{ControlError, ControlResult};
pub use handlers::{Handler, HandlerContext, HandlerError, HandlerRegistry, HandlerResult};
pub use heartbeat::HeartbeatMonitor;
pub use mock_host::{MockHost, MockHostReport, MockHostSettings};
pub use state::{Connection, ControlState, SessionInfo, ShutdownReason, Tick};
