// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkerError {
    #[error("WorkerError: Unable to launch worker: {0}")]
    Spawn(String),

    /// No acknowledgement, or the wrong one, within the configured bound
    #[error("WorkerError: No {expected} acknowledgement after {waited:?}: {detail}")]
    AckTimeout {
        expected: &'static str,
        waited: Duration,
        detail: String,
    },

    /// The worker reported an unrecoverable fault
    #[error("WorkerError: Worker failed: {msg}\n{traceback}")]
    Critical { msg: String, traceback: String },

    #[error("WorkerError: Pipe failure: {0}")]
    Pipe(String),

    #[error("WorkerError: Worker is not running")]
    NotRunning,

    #[error("WorkerError: Audio source failure: {0}")]
    Audio(String),
}
