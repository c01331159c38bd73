// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! # ramcontrol-voice
//!
//! Voice activity detection runs in its own process, `ramcontrol-vad-worker`,
//! controlled over a newline-delimited JSON pipe.
//!
//! Main-process side: [`WorkerSession`] spawns the worker, sends `START`/`STOP`
//! with bounded acknowledgement waits and polls asynchronous [`WorkerEvent`]s.
//! [`VoiceGate`] scopes a listening period.
//!
//! Worker side: [`serve`] runs the request loop over stdin/stdout, classifying
//! frames from an [`AudioSource`] with an [`EnergyClassifier`] and debouncing
//! them through a [`SpeechTracker`].
//!
//! ```rust,no_run
//! use ramcontrol_voice::{WorkerSession, WorkerSettings};
//!
//! let settings = WorkerSettings::new("ramcontrol-vad-worker");
//! let mut worker = WorkerSession::spawn(settings).expect("spawn");
//! {
//!     let gate = worker.gate().expect("worker did not acknowledge START");
//!     // record
//!     gate.finish().expect("worker did not acknowledge STOP");
//! }
//! for event in worker.poll_events() {
//!     println!("{event:?}");
//! }
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod audio;
pub mod error;
pub mod protocol;
pub mod session;
pub mod vad;
pub mod worker;

pub use audio::{AudioSource, PcmFileSource, SilenceSource, SourceSpec};
pub use error::WorkerError;
pub use protocol::{
    CriticalEvent, TimestampEvent, VocalizationEvent, WorkerEvent, WorkerMessage,
    WorkerMessageType,
};
pub use session::{resolve_worker_path, VoiceGate, WorkerSession, WorkerSettings, WORKER_BINARY};
pub use vad::{EnergyClassifier, FrameClassifier, SpeechTracker};
pub use worker::{serve, WorkerOptions};
