// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Structured `data` payloads for the tags that carry an object

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `SESSION.data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub session_number: u32,
    /// The experiment name; the host files the session under it
    pub session_type: String,
}

/// `STATE.data`: an application-defined state name and its new value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    pub name: String,
    pub value: Value,
}

/// `TRIAL.data`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialPayload {
    pub trial: i64,
}

/// `WORD.data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordPayload {
    pub word: String,
    pub serialpos: u32,
}

/// `MATH.data`: one answered arithmetic problem from the distractor phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MathPayload {
    pub problem: String,
    pub response: String,
    pub correct: bool,
    pub response_time_ms: u64,
}
