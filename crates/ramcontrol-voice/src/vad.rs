// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Frame classification and onset/offset debouncing

use crate::protocol::VocalizationEvent;

/// Speech/non-speech decision for one frame of signed 16-bit samples
pub trait FrameClassifier: Send {
    fn is_speech(&mut self, frame: &[i16]) -> bool;
}

/// Calls a frame speech when its RMS level reaches `threshold_dbfs`
#[derive(Debug, Clone, Copy)]
pub struct EnergyClassifier {
    threshold_dbfs: f64,
}

impl EnergyClassifier {
    pub fn new(threshold_dbfs: f64) -> Self {
        EnergyClassifier { threshold_dbfs }
    }

    /// RMS level relative to full scale. Silence and empty frames are `-inf`.
    pub fn frame_dbfs(frame: &[i16]) -> f64 {
        if frame.is_empty() {
            return f64::NEG_INFINITY;
        }
        let sum_squares: f64 = frame.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
        let rms = (sum_squares / frame.len() as f64).sqrt();
        20.0 * (rms / 32768.0).log10()
    }
}

impl FrameClassifier for EnergyClassifier {
    fn is_speech(&mut self, frame: &[i16]) -> bool {
        Self::frame_dbfs(frame) >= self.threshold_dbfs
    }
}

/// Turns per-frame decisions into onset/offset events
///
/// Onset needs `consecutive_frames` speech frames in a row and is stamped with
/// the first frame of that run. Offset fires on the first non-speech frame.
#[derive(Debug, Clone)]
pub struct SpeechTracker {
    consecutive_frames: usize,
    run_start: Option<f64>,
    run_length: usize,
    speaking: bool,
}

impl SpeechTracker {
    pub fn new(consecutive_frames: usize) -> Self {
        SpeechTracker {
            consecutive_frames: consecutive_frames.max(1),
            run_start: None,
            run_length: 0,
            speaking: false,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn observe(&mut self, is_speech: bool, timestamp_ms: f64) -> Option<VocalizationEvent> {
        if is_speech {
            let run_start = *self.run_start.get_or_insert(timestamp_ms);
            self.run_length += 1;
            if self.run_length >= self.consecutive_frames && !self.speaking {
                self.speaking = true;
                return Some(VocalizationEvent {
                    speaking: true,
                    timestamp: run_start,
                });
            }
            return None;
        }

        self.run_start = None;
        self.run_length = 0;
        if self.speaking {
            self.speaking = false;
            return Some(VocalizationEvent {
                speaking: false,
                timestamp: timestamp_ms,
            });
        }
        None
    }

    /// Forget any partial run; an ongoing vocalization is ended at `timestamp_ms`
    pub fn reset(&mut self, timestamp_ms: f64) -> Option<VocalizationEvent> {
        self.observe(false, timestamp_ms)
    }
}
