// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

use ramcontrol_io::RamNetworkError;
use ramcontrol_voice::WorkerError;
use thiserror::Error;

use crate::state::{ControlState, ShutdownReason};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    /// Connect, sync or start-wait before `configure`
    #[error("ControlError: Session is not configured")]
    NotConfigured,

    #[error("ControlError: Not connected to the host")]
    NotConnected,

    #[error("ControlError: {operation} is not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: ControlState,
    },

    /// A blocking wait was cut short because the session closed
    #[error("ControlError: Session ended: {0}")]
    SessionEnded(ShutdownReason),

    #[error(transparent)]
    Network(#[from] RamNetworkError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

pub type ControlResult<T> = Result<T, ControlError>;
