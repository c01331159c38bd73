// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Time sources for the control loop
//!
//! Timestamps are milliseconds since the Unix epoch, as on the wire.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ramcontrol_io::timestamp_ms;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;

    /// Pause between polls of a blocking wait
    fn sleep(&self, duration: Duration);
}

/// Wall-clock anchored once, then advanced by a monotonic timer
///
/// Immune to wall-clock steps during a session, which keeps sync echoes and
/// heartbeat ages consistent.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor_ms: f64,
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            anchor_ms: timestamp_ms(),
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.anchor_ms + self.anchor.elapsed().as_secs_f64() * 1000.0
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Hand-driven clock for tests. `sleep` advances it instead of blocking.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        ManualClock {
            now: Arc::new(Mutex::new(start_ms)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.now.lock() += duration.as_secs_f64() * 1000.0;
    }

    pub fn set(&self, now_ms: f64) {
        *self.now.lock() = now_ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_tracks_wall_time() {
        let clock = MonotonicClock::new();
        let first = clock.now_ms();
        clock.sleep(Duration::from_millis(5));
        let second = clock.now_ms();

        assert!(second - first >= 5.0);
        assert!((second - timestamp_ms()).abs() < 1000.0);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(1000.0);
        let handle = clock.clone();

        handle.advance(Duration::from_millis(250));
        assert_eq!(clock.now_ms(), 1250.0);
        clock.sleep(Duration::from_secs(1));
        assert_eq!(handle.now_ms(), 2250.0);
        handle.set(0.0);
        assert_eq!(clock.now_ms(), 0.0);
    }
}
