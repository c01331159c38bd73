// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Heartbeat emitter and liveness timer
//!
//! Purely time-driven: the control loop feeds it the current time every tick
//! and acts on the answers. Nothing here blocks or owns a thread.

use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval_ms: f64,
    timeout_ms: f64,
    running: bool,
    next_emit_at: f64,
    last_received_at: f64,
    lost: bool,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        HeartbeatMonitor {
            interval_ms: interval.as_secs_f64() * 1000.0,
            timeout_ms: timeout.as_secs_f64() * 1000.0,
            running: false,
            next_emit_at: 0.0,
            last_received_at: 0.0,
            lost: false,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms.round() as u64
    }

    /// Begin emitting and watching. The liveness clock starts now; the first
    /// heartbeat goes out one interval from now.
    pub fn start(&mut self, now_ms: f64) {
        debug!(
            "Heartbeat monitor started (interval {} ms, timeout {} ms)",
            self.interval_ms, self.timeout_ms
        );
        self.running = true;
        self.lost = false;
        self.next_emit_at = now_ms + self.interval_ms;
        self.last_received_at = now_ms;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn record_heartbeat(&mut self, now_ms: f64) {
        self.last_received_at = now_ms;
    }

    pub fn last_received_at(&self) -> Option<f64> {
        self.running.then_some(self.last_received_at)
    }

    /// Whether a heartbeat should be sent now. Missed intervals are not replayed.
    pub fn emission_due(&mut self, now_ms: f64) -> bool {
        if !self.running || now_ms < self.next_emit_at {
            return false;
        }
        self.next_emit_at += self.interval_ms;
        if self.next_emit_at <= now_ms {
            self.next_emit_at = now_ms + self.interval_ms;
        }
        true
    }

    /// Silence in milliseconds, reported once when it first exceeds the timeout
    pub fn check(&mut self, now_ms: f64) -> Option<u64> {
        if !self.running || self.lost {
            return None;
        }
        let silent = now_ms - self.last_received_at;
        if silent > self.timeout_ms {
            self.lost = true;
            self.running = false;
            return Some(silent.max(0.0) as u64);
        }
        None
    }
}
