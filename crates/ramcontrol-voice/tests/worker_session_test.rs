// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests against the real `ramcontrol-vad-worker` binary

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use ramcontrol_voice::{WorkerError, WorkerEvent, WorkerSession, WorkerSettings};

fn worker_settings() -> WorkerSettings {
    let settings = WorkerSettings::new(env!("CARGO_BIN_EXE_ramcontrol-vad-worker"));
    // Process start-up is slower than a warm worker's reply
    WorkerSettings {
        start_ack_timeout: Duration::from_secs(5),
        ..settings
    }
}

#[test]
fn test_start_stop_with_silence() {
    let mut worker = WorkerSession::spawn(worker_settings()).unwrap();

    worker.start().unwrap();
    assert!(worker.is_listening());
    worker.stop().unwrap();
    assert!(!worker.is_listening());
    assert!(worker.is_running());

    worker.quit();
    assert!(!worker.is_running());
}

#[test]
fn test_gate_stops_on_drop() {
    let mut worker = WorkerSession::spawn(worker_settings()).unwrap();

    {
        let gate = worker.gate().unwrap();
        assert!(gate.is_listening());
    }
    assert!(!worker.is_listening());
    assert!(worker.last_error().is_none());

    let gate = worker.gate().unwrap();
    gate.finish().unwrap();
}

#[test]
fn test_missing_audio_reports_critical() {
    let settings = worker_settings().with_args(["--pcm-file", "/no/such/recording.pcm"]);
    let mut worker = WorkerSession::spawn(settings).unwrap();

    let err = worker.start().unwrap_err();
    assert!(matches!(err, WorkerError::Critical { ref msg, .. } if msg == "Failed to open audio stream"));
    assert!(!worker.is_running());
    assert_eq!(worker.last_error(), Some(&err));
    assert_eq!(worker.start(), Err(WorkerError::NotRunning));
}

#[test]
fn test_vocalization_events_from_pcm() {
    let sample_rate = 8000usize;
    let frame = sample_rate / 50;
    let mut samples = vec![0i16; frame * 10];
    samples.extend((0..frame * 10).map(|i| if i % 2 == 0 { 10000 } else { -10000 }));
    samples.extend(vec![0i16; frame * 10]);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    for s in &samples {
        file.write_all(&s.to_le_bytes()).unwrap();
    }
    file.flush().unwrap();

    let settings = worker_settings().with_args([
        "--no-realtime".to_string(),
        "--sample-rate".to_string(),
        sample_rate.to_string(),
        "--pcm-file".to_string(),
        file.path().display().to_string(),
    ]);
    let mut worker = WorkerSession::spawn(settings).unwrap();
    worker.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut speaking = Vec::new();
    let mut saw_timestamp = false;
    while speaking.len() < 2 && Instant::now() < deadline {
        for event in worker.poll_events() {
            match event {
                WorkerEvent::Vocalization(v) => speaking.push(v.speaking),
                WorkerEvent::Timestamp(_) => saw_timestamp = true,
                WorkerEvent::Critical(c) => panic!("worker failed: {}", c.msg),
            }
        }
        thread::sleep(Duration::from_millis(10));
    }
    worker.stop().unwrap();

    assert_eq!(speaking, vec![true, false]);
    assert!(saw_timestamp);
}

#[cfg(unix)]
#[test]
fn test_silent_worker_times_out() {
    let settings = WorkerSettings {
        join_timeout: Duration::from_millis(50),
        ..WorkerSettings::new("sleep").with_args(["5"])
    };
    let mut worker = WorkerSession::spawn(settings).unwrap();

    let began = Instant::now();
    let err = worker.start().unwrap_err();
    let elapsed = began.elapsed();

    assert!(matches!(err, WorkerError::AckTimeout { expected: "STARTED", .. }));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");

    let began = Instant::now();
    worker.quit();
    assert!(began.elapsed() < Duration::from_secs(2));
}

#[cfg(unix)]
#[test]
fn test_wrong_reply_is_not_an_acknowledgement() {
    // `cat` echoes the START request back
    let mut worker = WorkerSession::spawn(WorkerSettings::new("cat")).unwrap();

    let err = worker.start().unwrap_err();
    match err {
        WorkerError::AckTimeout { expected, detail, .. } => {
            assert_eq!(expected, "STARTED");
            assert!(detail.contains("START"), "{detail}");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let stop = WorkerSettings {
        stop_ack_attempts: 2,
        stop_ack_poll: Duration::from_millis(20),
        ..WorkerSettings::new("cat")
    };
    let mut worker = WorkerSession::spawn(stop).unwrap();
    let began = Instant::now();
    assert!(matches!(
        worker.stop(),
        Err(WorkerError::AckTimeout { expected: "STOPPED", .. })
    ));
    assert!(began.elapsed() < Duration::from_secs(1));
}
