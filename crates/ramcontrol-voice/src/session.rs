// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Main-process side of the worker pipe
//!
//! [`WorkerSession`] owns the spawned `ramcontrol-vad-worker` child. Requests are
//! written to its stdin; a reader thread decodes its stdout into a channel so
//! that acknowledgement waits are bounded and event polling never blocks.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use ramcontrol_config::VoiceConfig;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::protocol::{CriticalEvent, WorkerEvent, WorkerMessage, WorkerMessageType};

/// File name of the worker binary, without platform suffix
pub const WORKER_BINARY: &str = "ramcontrol-vad-worker";

/// Locate the worker executable
///
/// An explicit path wins. Otherwise the binary is looked up next to the current
/// executable, then one directory up (test harnesses run from `deps/`).
pub fn resolve_worker_path(configured: Option<&Path>) -> Result<PathBuf, WorkerError> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    let exe = std::env::current_exe()
        .map_err(|e| WorkerError::Spawn(format!("cannot locate current executable: {e}")))?;
    let file_name = format!("{}{}", WORKER_BINARY, std::env::consts::EXE_SUFFIX);
    let dir = exe
        .parent()
        .ok_or_else(|| WorkerError::Spawn("current executable has no parent directory".into()))?;

    let beside = dir.join(&file_name);
    if beside.exists() {
        return Ok(beside);
    }
    if let Some(above) = dir.parent().map(|p| p.join(&file_name)) {
        if above.exists() {
            return Ok(above);
        }
    }
    Ok(beside)
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub start_ack_timeout: Duration,
    pub stop_ack_attempts: u32,
    /// Length of one STOP polling attempt
    pub stop_ack_poll: Duration,
    /// Grace period between closing stdin and killing the child
    pub join_timeout: Duration,
}

impl WorkerSettings {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        WorkerSettings {
            program: program.into(),
            args: Vec::new(),
            start_ack_timeout: Duration::from_millis(100),
            stop_ack_attempts: 6,
            stop_ack_poll: Duration::from_millis(100),
            join_timeout: Duration::from_millis(1000),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn from_config(config: &VoiceConfig) -> Result<Self, WorkerError> {
        let program = resolve_worker_path(config.worker_path.as_deref())?;
        let mut args = vec![
            "--sample-rate".to_string(),
            config.sample_rate.to_string(),
            "--frame-ms".to_string(),
            config.frame_ms.to_string(),
            "--consecutive-frames".to_string(),
            config.consecutive_frames.to_string(),
            format!("--threshold-dbfs={}", config.threshold_dbfs),
        ];
        if let Some(pcm) = &config.pcm_file {
            args.push("--pcm-file".to_string());
            args.push(pcm.display().to_string());
        }

        Ok(WorkerSettings {
            program,
            args,
            start_ack_timeout: Duration::from_millis(config.start_ack_timeout_ms),
            stop_ack_attempts: config.stop_ack_attempts,
            stop_ack_poll: Duration::from_millis(config.stop_ack_poll_ms),
            join_timeout: Duration::from_millis(config.join_timeout_ms),
        })
    }
}

fn read_replies(stdout: ChildStdout, tx: Sender<WorkerMessage>) {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Worker output unreadable: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match WorkerMessage::decode_line(&line) {
            Ok(message) => {
                if tx.send(message).is_err() {
                    break;
                }
            }
            Err(e) => warn!("Ignoring worker output {:?}: {}", line, e),
        }
    }
    debug!("Worker output closed");
}

/// A spawned VAD worker and its duplex pipe
pub struct WorkerSession {
    settings: WorkerSettings,
    child: Child,
    stdin: Option<ChildStdin>,
    replies: Receiver<WorkerMessage>,
    reader: Option<JoinHandle<()>>,
    pending: VecDeque<WorkerEvent>,
    running: bool,
    listening: bool,
    last_error: Option<WorkerError>,
}

impl WorkerSession {
    pub fn spawn(settings: WorkerSettings) -> Result<Self, WorkerError> {
        info!(
            "Launching voice worker {} {}",
            settings.program.display(),
            settings.args.join(" ")
        );
        let mut child = Command::new(&settings.program)
            .args(&settings.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| WorkerError::Spawn(format!("{}: {}", settings.program.display(), e)))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Spawn("worker stdout was not captured".into()))?;
        let (tx, replies) = unbounded();
        let reader = thread::Builder::new()
            .name("vad-worker-reader".into())
            .spawn(move || read_replies(stdout, tx))
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;

        Ok(WorkerSession {
            settings,
            child,
            stdin,
            replies,
            reader: Some(reader),
            pending: VecDeque::new(),
            running: true,
            listening: false,
            last_error: None,
        })
    }

    /// The child is alive and has not reported a critical fault
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// `STARTED` was acknowledged and no `STOPPED` since
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn last_error(&self) -> Option<&WorkerError> {
        self.last_error.as_ref()
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    fn fail(&mut self, err: WorkerError) -> WorkerError {
        if matches!(err, WorkerError::Critical { .. } | WorkerError::Pipe(_)) {
            self.running = false;
            self.listening = false;
        }
        error!("{}", err);
        self.last_error = Some(err.clone());
        err
    }

    fn critical(&mut self, event: CriticalEvent) -> WorkerError {
        self.fail(WorkerError::Critical {
            msg: event.msg,
            traceback: event.traceback,
        })
    }

    fn request(&mut self, kind: WorkerMessageType) -> Result<(), WorkerError> {
        if !self.running {
            return Err(WorkerError::NotRunning);
        }
        let line = WorkerMessage::new(kind).encode_line()?;
        let stdin = self.stdin.as_mut().ok_or(WorkerError::NotRunning)?;
        let written = stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.flush());
        match written {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(WorkerError::Pipe(format!(
                "cannot send {}: {}",
                kind.as_str(),
                e
            )))),
        }
    }

    /// Buffer an asynchronous event that arrived during an acknowledgement wait.
    /// `Ok(false)` means the message was not an event.
    fn absorb(&mut self, message: &WorkerMessage) -> Result<bool, WorkerError> {
        match message.to_event() {
            Ok(Some(WorkerEvent::Critical(event))) => Err(self.critical(event)),
            Ok(Some(event)) => {
                self.pending.push_back(event);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                warn!("Dropping malformed worker event: {}", e);
                Ok(true)
            }
        }
    }

    /// Ask the worker to begin listening and wait for `STARTED`
    ///
    /// # Errors
    ///
    /// `AckTimeout` when no reply, or a reply other than `STARTED`, arrives within
    /// `start_ack_timeout`; `Critical` when the worker reports a fault instead.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        self.request(WorkerMessageType::Start)?;
        let waited = self.settings.start_ack_timeout;
        let deadline = Instant::now() + waited;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let reply = match self.replies.recv_timeout(remaining) {
                Ok(reply) => reply,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(self.fail(WorkerError::AckTimeout {
                        expected: "STARTED",
                        waited,
                        detail: "no reply".into(),
                    }))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(self.fail(WorkerError::Pipe("worker closed its output".into())))
                }
            };

            if reply.kind == WorkerMessageType::Started {
                info!("Voice worker listening");
                self.listening = true;
                return Ok(());
            }
            if !self.absorb(&reply)? {
                return Err(self.fail(WorkerError::AckTimeout {
                    expected: "STARTED",
                    waited,
                    detail: format!("unexpected {} reply", reply.kind.as_str()),
                }));
            }
        }
    }

    /// Ask the worker to stop listening and wait for `STOPPED`
    ///
    /// Polls `stop_ack_attempts` windows of `stop_ack_poll` each. Other replies
    /// are skipped and events are buffered for [`poll_events`](Self::poll_events).
    pub fn stop(&mut self) -> Result<(), WorkerError> {
        self.request(WorkerMessageType::Stop)?;
        let poll = self.settings.stop_ack_poll;
        let attempts = self.settings.stop_ack_attempts;

        for attempt in 1..=attempts {
            let window_end = Instant::now() + poll;
            loop {
                let remaining = window_end.saturating_duration_since(Instant::now());
                match self.replies.recv_timeout(remaining) {
                    Ok(reply) if reply.kind == WorkerMessageType::Stopped => {
                        info!("Voice worker stopped");
                        self.listening = false;
                        return Ok(());
                    }
                    Ok(reply) => {
                        if !self.absorb(&reply)? {
                            debug!(
                                "Skipping {} while waiting for STOPPED",
                                reply.kind.as_str()
                            );
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        debug!("No STOPPED yet (attempt {}/{})", attempt, attempts);
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(
                            self.fail(WorkerError::Pipe("worker closed its output".into()))
                        )
                    }
                }
            }
        }

        Err(self.fail(WorkerError::AckTimeout {
            expected: "STOPPED",
            waited: poll * attempts,
            detail: format!("{attempts} attempts exhausted"),
        }))
    }

    /// Events received since the last call, without blocking
    ///
    /// A `Critical` event is returned like any other and also marks the worker
    /// failed; [`last_error`](Self::last_error) then carries it.
    pub fn poll_events(&mut self) -> Vec<WorkerEvent> {
        let mut events: Vec<WorkerEvent> = self.pending.drain(..).collect();
        loop {
            match self.replies.try_recv() {
                Ok(message) => match message.to_event() {
                    Ok(Some(WorkerEvent::Critical(event))) => {
                        self.critical(event.clone());
                        events.push(WorkerEvent::Critical(event));
                    }
                    Ok(Some(event)) => events.push(event),
                    Ok(None) => debug!("Stray {} from worker", message.kind.as_str()),
                    Err(e) => warn!("Dropping malformed worker event: {}", e),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.running {
                        self.fail(WorkerError::Pipe("worker exited".into()));
                    }
                    break;
                }
            }
        }
        events
    }

    /// Start listening and return a guard that stops on drop
    pub fn gate(&mut self) -> Result<VoiceGate<'_>, WorkerError> {
        self.start()?;
        Ok(VoiceGate {
            session: self,
            finished: false,
        })
    }

    /// Close the pipe and reap the child, killing it after `join_timeout`
    pub fn quit(&mut self) {
        if self.stdin.take().is_none() && self.reader.is_none() {
            return;
        }
        self.running = false;
        self.listening = false;

        let deadline = Instant::now() + self.settings.join_timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    info!("Voice worker exited with {}", status);
                    break;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                Ok(None) => {
                    warn!(
                        "Voice worker did not exit within {:?}, killing it",
                        self.settings.join_timeout
                    );
                    if let Err(e) = self.child.kill() {
                        error!("Failed to kill voice worker: {}", e);
                    }
                    let _ = self.child.wait();
                    break;
                }
                Err(e) => {
                    error!("Failed to wait for voice worker: {}", e);
                    break;
                }
            }
        }

        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                error!("Worker reader thread panicked");
            }
        }
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        self.quit();
    }
}

/// Scoped listening period; stops the worker when dropped
///
/// Use [`finish`](VoiceGate::finish) to see whether the stop was acknowledged.
pub struct VoiceGate<'a> {
    session: &'a mut WorkerSession,
    finished: bool,
}

impl VoiceGate<'_> {
    pub fn finish(mut self) -> Result<(), WorkerError> {
        self.finished = true;
        self.session.stop()
    }
}

impl Deref for VoiceGate<'_> {
    type Target = WorkerSession;

    fn deref(&self) -> &WorkerSession {
        self.session
    }
}

impl DerefMut for VoiceGate<'_> {
    fn deref_mut(&mut self) -> &mut WorkerSession {
        self.session
    }
}

impl Drop for VoiceGate<'_> {
    fn drop(&mut self) {
        if self.finished || !self.session.is_running() {
            return;
        }
        if let Err(e) = self.session.stop() {
            error!("Voice gate could not stop the worker: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = VoiceConfig {
            worker_path: Some(PathBuf::from("/opt/vad")),
            pcm_file: Some(PathBuf::from("/data/session.pcm")),
            stop_ack_attempts: 4,
            ..VoiceConfig::default()
        };
        let settings = WorkerSettings::from_config(&config).unwrap();

        assert_eq!(settings.program, PathBuf::from("/opt/vad"));
        assert_eq!(settings.stop_ack_attempts, 4);
        assert_eq!(settings.start_ack_timeout, Duration::from_millis(100));
        let args = settings.args.join(" ");
        assert!(args.contains("--sample-rate 32000"));
        assert!(args.contains("--consecutive-frames 3"));
        assert!(args.contains("--threshold-dbfs=-35"));
        assert!(args.ends_with("--pcm-file /data/session.pcm"));
    }

    #[test]
    fn test_default_worker_path_uses_binary_name() {
        let path = resolve_worker_path(None).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(WORKER_BINARY));
    }

    #[test]
    fn test_spawn_missing_program() {
        let result = WorkerSession::spawn(WorkerSettings::new("/no/such/worker-binary"));
        assert!(matches!(result, Err(WorkerError::Spawn(_))));
    }
}
