// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Worker side of the pipe: request loop and the capture thread
//!
//! The request loop reads `START`/`STOP` lines and acknowledges each one. While
//! listening, a capture thread classifies audio frames and writes
//! `VOCALIZATION` and `TIMESTAMP` events to the same output. End of input
//! stops everything.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioSource, SourceSpec};
use crate::error::WorkerError;
use crate::protocol::{now_ms, WorkerMessage, WorkerMessageType};
use crate::vad::{EnergyClassifier, FrameClassifier, SpeechTracker};

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub source: SourceSpec,
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub consecutive_frames: usize,
    pub threshold_dbfs: f64,
    /// Pace frames at the audio rate, as a live input would
    pub realtime: bool,
    pub timestamp_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions {
            source: SourceSpec::Silence,
            sample_rate: 32000,
            frame_ms: 20,
            consecutive_frames: 3,
            threshold_dbfs: -35.0,
            realtime: true,
            timestamp_interval: Duration::from_secs(1),
        }
    }
}

impl WorkerOptions {
    /// Samples per frame
    pub fn frame_len(&self) -> usize {
        (u64::from(self.sample_rate) * u64::from(self.frame_ms) / 1000) as usize
    }
}

pub(crate) type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

fn emit(out: &SharedWriter, message: &WorkerMessage) -> Result<(), WorkerError> {
    let line = message.encode_line()?;
    let mut writer = out.lock();
    writer
        .write_all(line.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| WorkerError::Pipe(e.to_string()))
}

pub(crate) struct Capture {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Capture {
    pub(crate) fn launch(
        options: &WorkerOptions,
        source: Box<dyn AudioSource>,
        out: SharedWriter,
    ) -> Capture {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let options = options.clone();
        let handle = thread::spawn(move || capture_loop(&options, source, &out, &thread_stop));
        Capture { stop, handle }
    }

    pub(crate) fn halt(self) {
        self.stop.store(true, Ordering::Release);
        if self.handle.join().is_err() {
            error!("Capture thread panicked");
        }
    }
}

fn capture_loop(
    options: &WorkerOptions,
    mut source: Box<dyn AudioSource>,
    out: &SharedWriter,
    stop: &AtomicBool,
) {
    let mut classifier = EnergyClassifier::new(options.threshold_dbfs);
    let mut tracker = SpeechTracker::new(options.consecutive_frames);
    let frame_period = Duration::from_millis(u64::from(options.frame_ms));
    let mut frame = vec![0i16; options.frame_len()];
    let mut exhausted = false;
    let mut last_timestamp: Option<Instant> = None;
    let mut next_frame_at = Instant::now();

    while !stop.load(Ordering::Acquire) {
        if !exhausted {
            let event = match source.read_frame(&mut frame) {
                Ok(true) => {
                    let speech = classifier.is_speech(&frame);
                    tracker.observe(speech, now_ms())
                }
                Ok(false) => {
                    info!("Audio source exhausted");
                    exhausted = true;
                    tracker.reset(now_ms())
                }
                Err(e) => {
                    error!("Audio read failed: {}", e);
                    exhausted = true;
                    if emit(out, &WorkerMessage::critical("IOError", &e.to_string())).is_err() {
                        return;
                    }
                    tracker.reset(now_ms())
                }
            };
            if let Some(event) = event {
                debug!(
                    "{} speaking at {:.1}",
                    if event.speaking { "Started" } else { "Stopped" },
                    event.timestamp
                );
                if emit(out, &WorkerMessage::vocalization(event)).is_err() {
                    return;
                }
            }
        }

        if last_timestamp.map_or(true, |t| t.elapsed() >= options.timestamp_interval) {
            if emit(out, &WorkerMessage::timestamp(now_ms())).is_err() {
                return;
            }
            last_timestamp = Some(Instant::now());
        }

        if options.realtime {
            next_frame_at += frame_period;
            let now = Instant::now();
            if next_frame_at > now {
                thread::sleep(next_frame_at - now);
            } else {
                next_frame_at = now;
            }
        } else if exhausted {
            thread::sleep(frame_period);
        }
    }

    if let Some(event) = tracker.reset(now_ms()) {
        let _ = emit(out, &WorkerMessage::vocalization(event));
    }
}

fn handle_requests<R: BufRead>(
    input: R,
    out: &SharedWriter,
    options: &WorkerOptions,
    capture: &mut Option<Capture>,
) -> Result<(), WorkerError> {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Broken pipe: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let request = match WorkerMessage::decode_line(&line) {
            Ok(request) => request,
            Err(e) => {
                error!("Unexpected message received: {} ({})", line, e);
                continue;
            }
        };

        match request.kind {
            WorkerMessageType::Start => {
                info!("Got request to start VAD");
                if capture.is_some() {
                    emit(out, &WorkerMessage::new(WorkerMessageType::Started))?;
                    continue;
                }
                match options.source.open() {
                    Ok(source) => {
                        emit(out, &WorkerMessage::new(WorkerMessageType::Started))?;
                        *capture = Some(Capture::launch(options, source, Arc::clone(out)));
                    }
                    Err(e) => {
                        error!("Failed to open audio stream: {}", e);
                        emit(
                            out,
                            &WorkerMessage::critical("Failed to open audio stream", &e.to_string()),
                        )?;
                    }
                }
            }
            WorkerMessageType::Stop => {
                info!("Got request to stop VAD");
                if let Some(active) = capture.take() {
                    active.halt();
                }
                emit(out, &WorkerMessage::new(WorkerMessageType::Stopped))?;
            }
            other => {
                error!("Unexpected message type received: {}", other.as_str());
            }
        }
    }
    Ok(())
}

/// Run the worker until `input` reaches end of file
///
/// # Errors
///
/// `WorkerError::Pipe` when the output can no longer be written
pub fn serve<R: BufRead>(
    input: R,
    output: Box<dyn Write + Send>,
    options: WorkerOptions,
) -> Result<(), WorkerError> {
    let out: SharedWriter = Arc::new(Mutex::new(output));
    let mut capture = None;

    let result = handle_requests(input, &out, &options, &mut capture);

    if let Some(active) = capture.take() {
        active.halt();
    }
    info!("Shutting down voice worker");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WorkerEvent;
    use std::io::Cursor;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn messages(&self) -> Vec<WorkerMessage> {
            let text = String::from_utf8(self.0.lock().clone()).unwrap();
            text.lines()
                .map(|l| WorkerMessage::decode_line(l).unwrap())
                .collect()
        }
    }

    fn request(kind: WorkerMessageType) -> String {
        WorkerMessage::new(kind).encode_line().unwrap()
    }

    fn kinds(messages: &[WorkerMessage]) -> Vec<WorkerMessageType> {
        messages
            .iter()
            .map(|m| m.kind)
            .filter(|k| *k != WorkerMessageType::Timestamp)
            .collect()
    }

    #[test]
    fn test_start_stop_acknowledged() {
        let input = format!(
            "{}not json\n{}{}",
            request(WorkerMessageType::Start),
            request(WorkerMessageType::Stopped),
            request(WorkerMessageType::Stop)
        );
        let buf = SharedBuf::default();
        let options = WorkerOptions {
            realtime: false,
            ..WorkerOptions::default()
        };

        serve(Cursor::new(input), Box::new(buf.clone()), options).unwrap();

        assert_eq!(
            kinds(&buf.messages()),
            vec![WorkerMessageType::Started, WorkerMessageType::Stopped]
        );
    }

    #[test]
    fn test_unopenable_source_reports_critical() {
        let input = request(WorkerMessageType::Start);
        let buf = SharedBuf::default();
        let options = WorkerOptions {
            source: SourceSpec::PcmFile("/no/such/file.pcm".into()),
            ..WorkerOptions::default()
        };

        serve(Cursor::new(input), Box::new(buf.clone()), options).unwrap();

        let messages = buf.messages();
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            messages[0].to_event().unwrap(),
            Some(WorkerEvent::Critical(_))
        ));
    }

    #[test]
    fn test_capture_detects_burst() {
        let options = WorkerOptions {
            sample_rate: 8000,
            realtime: false,
            ..WorkerOptions::default()
        };
        let frame_len = options.frame_len();
        let mut samples = vec![0i16; frame_len * 5];
        samples.extend((0..frame_len * 6).map(|i| if i % 2 == 0 { 12000 } else { -12000 }));
        samples.extend(vec![0i16; frame_len * 5]);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        for s in &samples {
            file.write_all(&s.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();

        let buf = SharedBuf::default();
        let source = SourceSpec::PcmFile(file.path().to_path_buf()).open().unwrap();
        let writer: Box<dyn Write + Send> = Box::new(buf.clone());
        let out: SharedWriter = Arc::new(Mutex::new(writer));
        let capture = Capture::launch(&options, source, out);

        let deadline = Instant::now() + Duration::from_secs(5);
        let vocalizations = loop {
            let found: Vec<bool> = buf
                .messages()
                .iter()
                .filter_map(|m| match m.to_event() {
                    Ok(Some(WorkerEvent::Vocalization(v))) => Some(v.speaking),
                    _ => None,
                })
                .collect();
            if found.len() >= 2 || Instant::now() > deadline {
                break found;
            }
            thread::sleep(Duration::from_millis(10));
        };
        capture.halt();

        assert_eq!(vocalizations, vec![true, false]);
    }
}
