// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Pipe protocol between the main process and the VAD worker
//!
//! Newline-delimited JSON. Requests go down the worker's stdin, acknowledgements
//! and events come back on its stdout:
//!
//! ```text
//! {"type": "START", "data": null, "created": 1700000000.25}
//! {"type": "STARTED", "data": null, "created": 1700000000.26}
//! {"type": "VOCALIZATION", "data": {"speaking": true, "timestamp": 1700000001234.5}, "created": ...}
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkerError;

/// Seconds since the Unix epoch
pub fn created_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessageType {
    Start,
    Stop,
    Started,
    Stopped,
    Vocalization,
    Timestamp,
    Critical,
}

impl WorkerMessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerMessageType::Start => "START",
            WorkerMessageType::Stop => "STOP",
            WorkerMessageType::Started => "STARTED",
            WorkerMessageType::Stopped => "STOPPED",
            WorkerMessageType::Vocalization => "VOCALIZATION",
            WorkerMessageType::Timestamp => "TIMESTAMP",
            WorkerMessageType::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    #[serde(rename = "type")]
    pub kind: WorkerMessageType,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "created_now")]
    pub created: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VocalizationEvent {
    pub speaking: bool,
    /// Milliseconds since epoch; for onsets, the first speech frame of the run
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimestampEvent {
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalEvent {
    pub msg: String,
    pub traceback: String,
}

/// Asynchronous notifications from the worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Vocalization(VocalizationEvent),
    /// Worker clock sample, about once a second while listening
    Timestamp(TimestampEvent),
    Critical(CriticalEvent),
}

impl WorkerMessage {
    pub fn new(kind: WorkerMessageType) -> Self {
        WorkerMessage {
            kind,
            data: Value::Null,
            created: created_now(),
        }
    }

    fn with_data<T: Serialize>(kind: WorkerMessageType, data: &T) -> Self {
        WorkerMessage {
            kind,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            created: created_now(),
        }
    }

    pub fn vocalization(event: VocalizationEvent) -> Self {
        Self::with_data(WorkerMessageType::Vocalization, &event)
    }

    pub fn timestamp(timestamp: f64) -> Self {
        Self::with_data(WorkerMessageType::Timestamp, &TimestampEvent { timestamp })
    }

    pub fn critical(msg: &str, traceback: &str) -> Self {
        Self::with_data(
            WorkerMessageType::Critical,
            &CriticalEvent {
                msg: msg.to_string(),
                traceback: traceback.to_string(),
            },
        )
    }

    /// Interpret as an asynchronous event. `None` for requests and acknowledgements.
    pub fn to_event(&self) -> Result<Option<WorkerEvent>, WorkerError> {
        let parse = |what: &str, e: serde_json::Error| {
            WorkerError::Pipe(format!("malformed {what} payload: {e}"))
        };
        let event = match self.kind {
            WorkerMessageType::Vocalization => WorkerEvent::Vocalization(
                serde_json::from_value(self.data.clone()).map_err(|e| parse("VOCALIZATION", e))?,
            ),
            WorkerMessageType::Timestamp => WorkerEvent::Timestamp(
                serde_json::from_value(self.data.clone()).map_err(|e| parse("TIMESTAMP", e))?,
            ),
            WorkerMessageType::Critical => WorkerEvent::Critical(
                serde_json::from_value(self.data.clone()).map_err(|e| parse("CRITICAL", e))?,
            ),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// One line of the pipe, newline included
    pub fn encode_line(&self) -> Result<String, WorkerError> {
        let mut line =
            serde_json::to_string(self).map_err(|e| WorkerError::Pipe(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode_line(line: &str) -> Result<Self, WorkerError> {
        serde_json::from_str(line.trim()).map_err(|e| WorkerError::Pipe(e.to_string()))
    }
}
