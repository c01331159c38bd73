// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Session lifecycle state

use std::fmt;

/// Lifecycle of the host link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlState {
    Unconfigured,
    Configured,
    Connecting,
    Connected,
    Syncing,
    Synced,
    AwaitingStart,
    Running,
    Shutdown,
}

impl ControlState {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlState::Unconfigured => "UNCONFIGURED",
            ControlState::Configured => "CONFIGURED",
            ControlState::Connecting => "CONNECTING",
            ControlState::Connected => "CONNECTED",
            ControlState::Syncing => "SYNCING",
            ControlState::Synced => "SYNCED",
            ControlState::AwaitingStart => "AWAITING_START",
            ControlState::Running => "RUNNING",
            ControlState::Shutdown => "SHUTDOWN",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ControlState::Shutdown
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags driven by received messages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Connection {
    pub configured: bool,
    pub connected: bool,
    pub synced: bool,
    pub started: bool,
    /// Milliseconds since epoch
    pub last_heartbeat_received_at: Option<f64>,
}

/// Identity of the running session, sent to the host during the handshake
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub experiment: String,
    pub version: String,
    pub session_number: u32,
    pub subject: String,
    /// Sent as `DEFINE` when non-empty
    pub allowed_states: Vec<String>,
}

impl SessionInfo {
    pub fn new(experiment: &str, version: &str, session_number: u32, subject: &str) -> Self {
        SessionInfo {
            experiment: experiment.to_string(),
            version: version.to_string(),
            session_number,
            subject: subject.to_string(),
            allowed_states: Vec::new(),
        }
    }
}

/// Why the session closed
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// The program called `shutdown`
    Requested,
    /// The host sent `EXIT`
    HostExit,
    /// No heartbeat from the host for `silent_ms`
    LinkLost { silent_ms: u64 },
    /// Interrupted by the operator (Ctrl-C)
    Interrupted,
}

impl ShutdownReason {
    /// Whether the session ended because of a failure rather than by agreement
    pub fn is_failure(&self) -> bool {
        matches!(self, ShutdownReason::LinkLost { .. })
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Requested => f.write_str("shutdown requested"),
            ShutdownReason::HostExit => f.write_str("host sent EXIT"),
            ShutdownReason::LinkLost { silent_ms } => {
                write!(f, "no heartbeat from host for {silent_ms} ms")
            }
            ShutdownReason::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// Outcome of one [`Control::update`](crate::Control::update)
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Link open, keep going
    Open,
    /// This tick found the link dead; the session has been shut down
    LinkLost,
    /// The session is over (host `EXIT`, an earlier shutdown)
    Closed(ShutdownReason),
}
