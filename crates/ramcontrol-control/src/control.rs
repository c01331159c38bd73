// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! The session controller
//!
//! [`Control`] is driven by its owner: call [`Control::update`] once per tick
//! of the experiment loop. Only the three handshake waits block, and they keep
//! pumping the link while they wait.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use ramcontrol_config::{NetworkConfig, RamConfig};
use ramcontrol_io::{
    ChannelTransport, MathPayload, MemorySocket, Message, MessageSocket, MessageType,
    OutboundSender, TransportSettings,
};
use ramcontrol_observability::{EVENTS_TARGET, VOICE_TIMES_TARGET};
use ramcontrol_voice::{WorkerEvent, WorkerSession, WorkerSettings};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::error::{ControlError, ControlResult};
use crate::handlers::{HandlerContext, HandlerRegistry, HandlerResult};
use crate::heartbeat::HeartbeatMonitor;
use crate::state::{Connection, ControlState, SessionInfo, ShutdownReason, Tick};

/// State name used when forwarding vocalization onsets/offsets
pub const VOCALIZATION_STATE: &str = "VOCALIZATION";

#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub heartbeat_interval: Duration,
    /// Host silence after which the link is declared dead
    pub connection_timeout: Duration,
    pub transport: TransportSettings,
    /// Pause between pumps while draining on shutdown
    pub idle_sleep: Duration,
    pub shutdown_drain_attempts: u32,
}

impl Default for ControlSettings {
    fn default() -> Self {
        ControlSettings {
            heartbeat_interval: Duration::from_millis(1000),
            connection_timeout: Duration::from_secs(10),
            transport: TransportSettings::default(),
            idle_sleep: Duration::from_millis(5),
            shutdown_drain_attempts: 20,
        }
    }
}

impl ControlSettings {
    pub fn from_config(network: &NetworkConfig) -> Self {
        ControlSettings {
            heartbeat_interval: network.heartbeat_interval(),
            connection_timeout: network.connection_timeout(),
            transport: TransportSettings {
                outbound_capacity: network.outbound_queue_capacity,
                inbound_poll: Duration::from_millis(network.inbound_poll_ms),
                max_inbound_per_pump: network.max_inbound_per_pump,
                linger_ms: network.linger_ms,
            },
            idle_sleep: Duration::from_millis(network.idle_sleep_ms),
            ..ControlSettings::default()
        }
    }
}

/// Task-machine end of the host link
///
/// Owns the transport, the connection flags, the handler registry, the
/// heartbeat monitor and (optionally) the voice worker. Create one per process
/// and hand `&mut Control` to whatever needs it.
pub struct Control {
    settings: ControlSettings,
    clock: Arc<dyn Clock>,
    transport: ChannelTransport,
    outbound: OutboundSender,
    state: ControlState,
    connection: Connection,
    session: Option<SessionInfo>,
    registry: HandlerRegistry,
    heartbeat: HeartbeatMonitor,
    voice: Option<WorkerSession>,
    exit_requested: bool,
    shutdown_reason: Option<ShutdownReason>,
    shutdown_tx: Sender<ShutdownReason>,
    shutdown_rx: Receiver<ShutdownReason>,
}

impl Control {
    pub fn new(settings: ControlSettings) -> Self {
        let transport = ChannelTransport::new(settings.transport.clone());
        let outbound = transport.sender();
        let heartbeat = HeartbeatMonitor::new(settings.heartbeat_interval, settings.connection_timeout);
        let (shutdown_tx, shutdown_rx) = unbounded();
        Control {
            settings,
            clock: Arc::new(MonotonicClock::new()),
            transport,
            outbound,
            state: ControlState::Unconfigured,
            connection: Connection::default(),
            session: None,
            registry: HandlerRegistry::new(),
            heartbeat,
            voice: None,
            exit_requested: false,
            shutdown_reason: None,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Build from configuration: bind the host address (or a discarding socket
    /// in no-host mode) and spawn the voice worker when enabled
    ///
    /// # Errors
    ///
    /// `Network` when the address cannot be bound; `Worker` when the voice
    /// worker cannot be launched
    pub fn from_config(config: &RamConfig) -> ControlResult<Self> {
        let mut control = Control::new(ControlSettings::from_config(&config.network));

        if config.session.no_host {
            warn!("***** PROCEEDING WITHOUT CONNECTING TO HOST PC *****");
            control.attach(Box::new(MemorySocket::sink()))?;
        } else {
            control.bind(&config.network.address)?;
        }

        if config.session.voice_server {
            let settings = WorkerSettings::from_config(&config.voice)?;
            control.attach_voice(WorkerSession::spawn(settings)?);
        }
        Ok(control)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn bind(&mut self, address: &str) -> ControlResult<()> {
        if let Err(e) = self.transport.bind(address) {
            error!("Failed to bind control channel on {}: {}", address, e);
            return Err(e.into());
        }
        info!("Control channel bound on {}", address);
        Ok(())
    }

    pub fn attach(&mut self, socket: Box<dyn MessageSocket>) -> ControlResult<()> {
        self.transport.attach(socket)?;
        Ok(())
    }

    pub fn attach_voice(&mut self, worker: WorkerSession) {
        self.voice = Some(worker);
    }

    pub fn voice(&self) -> Option<&WorkerSession> {
        self.voice.as_ref()
    }

    pub fn voice_mut(&mut self) -> Option<&mut WorkerSession> {
        self.voice.as_mut()
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    pub fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    pub fn endpoint(&self) -> Option<String> {
        self.transport.endpoint()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.connected
    }

    pub fn shutdown_reason(&self) -> Option<&ShutdownReason> {
        self.shutdown_reason.as_ref()
    }

    /// Messages queued but not yet transmitted
    pub fn pending_outbound(&self) -> usize {
        self.transport.pending_outbound()
    }

    /// Record the session identity sent during the handshake
    ///
    /// # Errors
    ///
    /// `InvalidState` once a connection has been initiated
    pub fn configure(
        &mut self,
        experiment: &str,
        version: &str,
        session_number: u32,
        subject: &str,
    ) -> ControlResult<()> {
        self.ensure_configurable("configure")?;
        let mut info = SessionInfo::new(experiment, version, session_number, subject);
        if let Some(previous) = self.session.take() {
            info.allowed_states = previous.allowed_states;
        }
        info!(
            "Configured {} v{} session {} for subject {}",
            info.experiment, info.version, info.session_number, info.subject
        );
        self.session = Some(info);
        self.connection.configured = true;
        self.state = ControlState::Configured;
        Ok(())
    }

    /// State names announced to the host with `DEFINE` during the handshake
    pub fn set_allowed_states<I, S>(&mut self, states: I) -> ControlResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_configurable("set_allowed_states")?;
        let session = self.session.as_mut().ok_or(ControlError::NotConfigured)?;
        session.allowed_states = states.into_iter().map(Into::into).collect();
        Ok(())
    }

    fn ensure_configurable(&self, operation: &'static str) -> ControlResult<()> {
        match self.state {
            ControlState::Unconfigured | ControlState::Configured => Ok(()),
            state => Err(ControlError::InvalidState { operation, state }),
        }
    }

    fn ensure_open(&self) -> ControlResult<()> {
        match &self.shutdown_reason {
            Some(reason) => Err(ControlError::SessionEnded(reason.clone())),
            None => Ok(()),
        }
    }

    fn ensure_connected(&self) -> ControlResult<()> {
        self.ensure_open()?;
        if self.session.is_none() {
            return Err(ControlError::NotConfigured);
        }
        if !self.connection.connected {
            return Err(ControlError::NotConnected);
        }
        Ok(())
    }

    /// Pump the link until the host sends `CONNECTED`, then send the session
    /// identity and start the heartbeat
    ///
    /// `poll` runs once per `interval` while waiting.
    ///
    /// # Errors
    ///
    /// `NotConfigured` before [`configure`](Self::configure);
    /// `SessionEnded` if the session closes while waiting
    pub fn initiate_connection<F>(&mut self, mut poll: F, interval: Duration) -> ControlResult<()>
    where
        F: FnMut(ControlState),
    {
        self.ensure_open()?;
        if self.session.is_none() {
            return Err(ControlError::NotConfigured);
        }
        if self.connection.connected {
            return Ok(());
        }
        if self.state != ControlState::Configured {
            return Err(ControlError::InvalidState {
                operation: "initiate_connection",
                state: self.state,
            });
        }

        info!(
            "Waiting for host connection on {}",
            self.endpoint().unwrap_or_else(|| "<unbound>".to_string())
        );
        self.state = ControlState::Connecting;
        self.wait_until(&mut poll, interval, |c| c.connected)?;

        self.send_experiment_info()?;
        self.heartbeat.start(self.clock.now_ms());
        self.state = ControlState::Connected;
        self.transport.pump_outbound();
        info!("Connected to host");
        Ok(())
    }

    /// Ask the host to run the clock alignment exchange and wait for `SYNCED`
    ///
    /// Each `SYNC` from the host is echoed immediately by the built-in handler.
    /// No timeout is applied here.
    pub fn align_clocks<F>(&mut self, mut poll: F, interval: Duration) -> ControlResult<()>
    where
        F: FnMut(ControlState),
    {
        self.ensure_connected()?;
        info!("Aligning clocks with host");
        self.connection.synced = false;
        self.state = ControlState::Syncing;
        self.enqueue(Message::align_clock().at(self.clock.now_ms()));
        self.wait_until(&mut poll, interval, |c| c.synced)?;
        self.state = ControlState::Synced;
        Ok(())
    }

    /// Send `READY` and wait for the host's `START`
    pub fn wait_for_start_message<F>(&mut self, mut poll: F, interval: Duration) -> ControlResult<()>
    where
        F: FnMut(ControlState),
    {
        self.ensure_connected()?;
        info!("Waiting for START from host");
        self.state = ControlState::AwaitingStart;
        self.enqueue(Message::ready().at(self.clock.now_ms()));
        self.wait_until(&mut poll, interval, |c| c.started)?;
        self.state = ControlState::Running;
        info!("Host started the session");
        Ok(())
    }

    fn wait_until(
        &mut self,
        poll: &mut dyn FnMut(ControlState),
        interval: Duration,
        done: fn(&Connection) -> bool,
    ) -> ControlResult<()> {
        // A tick that completes the wait and also closes the session is an error
        loop {
            self.update();
            self.ensure_open()?;
            if done(&self.connection) {
                return Ok(());
            }
            poll(self.state);
            self.clock.sleep(interval);
        }
    }

    /// One reactor tick: inbound dispatch, heartbeat, voice events, outbound pump
    pub fn update(&mut self) -> Tick {
        if let Some(reason) = &self.shutdown_reason {
            return Tick::Closed(reason.clone());
        }

        for message in self.transport.pump_inbound() {
            if self.exit_requested {
                debug!("Ignoring {} received after EXIT", message.kind());
                continue;
            }
            self.dispatch(&message);
        }
        if self.exit_requested {
            self.shutdown_with(ShutdownReason::HostExit);
            return Tick::Closed(ShutdownReason::HostExit);
        }

        let now = self.clock.now_ms();
        if self.heartbeat.emission_due(now) {
            self.enqueue(Message::heartbeat(self.heartbeat.interval_ms()).at(now));
        }
        if let Some(silent_ms) = self.heartbeat.check(now) {
            error!(
                "No heartbeat from host for {} ms (timeout {:?}), link lost",
                silent_ms, self.settings.connection_timeout
            );
            self.connection.connected = false;
            self.shutdown_with(ShutdownReason::LinkLost { silent_ms });
            return Tick::LinkLost;
        }

        self.poll_voice();
        self.transport.pump_outbound();
        Tick::Open
    }

    /// Route one inbound message to its application handler, or the built-in
    /// reaction for its kind. Unknown kinds are logged and dropped.
    pub fn dispatch(&mut self, message: &Message) {
        let now = self.clock.now_ms();
        let context = HandlerContext::new(&self.outbound, &self.connection, now);
        if self.registry.invoke(message, &context) {
            return;
        }

        match message.message_type() {
            Some(MessageType::Connected) => {
                if !self.connection.connected {
                    info!("Host connected");
                }
                self.connection.connected = true;
                self.enqueue(Message::connected().at(now));
            }
            Some(MessageType::Heartbeat) => {
                self.connection.last_heartbeat_received_at = Some(now);
                self.heartbeat.record_heartbeat(now);
            }
            Some(MessageType::Sync) => self.echo_sync(message, now),
            Some(MessageType::Synced) => {
                info!("Clock alignment complete");
                self.connection.synced = true;
            }
            Some(MessageType::Start) => self.connection.started = true,
            Some(MessageType::Exit) => {
                warn!("Host requested EXIT");
                self.exit_requested = true;
            }
            Some(MessageType::Id) => info!("Host ID: {}", message.to_json_string()),
            _ => error!(
                "Unknown message type {} received: {}",
                message.kind(),
                message.to_json_string()
            ),
        }
    }

    fn echo_sync(&mut self, message: &Message, now: f64) {
        let Some(sequence) = message.sequence_number() else {
            error!("SYNC without a sequence number: {}", message.to_json_string());
            return;
        };
        self.enqueue(Message::sync(sequence).at(now));
        // Round-trip time matters here; do not wait for the end of the tick
        self.transport.pump_outbound();
    }

    fn poll_voice(&mut self) {
        let events = match self.voice.as_mut() {
            Some(worker) if worker.is_running() => worker.poll_events(),
            _ => return,
        };
        for event in events {
            match event {
                WorkerEvent::Vocalization(v) => {
                    info!(
                        target: EVENTS_TARGET,
                        speaking = v.speaking,
                        timestamp = v.timestamp,
                        "VOCALIZATION"
                    );
                    self.enqueue(Message::state(VOCALIZATION_STATE, v.speaking).at(v.timestamp));
                }
                WorkerEvent::Timestamp(t) => {
                    info!(target: VOICE_TIMES_TARGET, timestamp = t.timestamp, "TIMESTAMP");
                }
                WorkerEvent::Critical(c) => {
                    error!("Voice worker failed: {}\n{}", c.msg, c.traceback);
                }
            }
        }
    }

    fn enqueue(&self, message: Message) -> bool {
        self.transport.enqueue_outbound(message).is_ok()
    }

    /// Queue a message for the host
    ///
    /// Host-only kinds (`SYNCED`, `START`, `ID`) and tags outside the
    /// vocabulary are logged and refused. Returns whether it was queued.
    pub fn send(&self, message: Message) -> bool {
        if !message.message_type().is_some_and(|t| t.is_outbound()) {
            error!(
                "Refusing to send {}: not a valid outbound message",
                message.kind()
            );
            return false;
        }
        if self.state.is_terminal() {
            warn!("Session closed, dropping {}", message.kind());
            return false;
        }
        self.enqueue(message)
    }

    pub fn send_state(&self, name: &str, value: impl Into<Value>) -> bool {
        self.send(Message::state(name, value).at(self.clock.now_ms()))
    }

    pub fn send_trial(&self, trial: i64) -> bool {
        self.send(Message::trial(trial).at(self.clock.now_ms()))
    }

    pub fn send_word(&self, word: &str, serialpos: u32) -> bool {
        self.send(Message::word(word, serialpos).at(self.clock.now_ms()))
    }

    pub fn send_math(&self, payload: &MathPayload) -> bool {
        self.send(Message::math(payload).at(self.clock.now_ms()))
    }

    /// Queue `EXPNAME`, `VERSION`, `SESSION`, `SUBJECTID` and, when states
    /// were set, `DEFINE`
    pub fn send_experiment_info(&self) -> ControlResult<()> {
        let session = self.session.as_ref().ok_or(ControlError::NotConfigured)?;
        let now = self.clock.now_ms();
        let mut messages = vec![
            Message::exp_name(&session.experiment),
            Message::version(&session.version),
            Message::session(session.session_number, &session.experiment),
            Message::subject_id(&session.subject),
        ];
        if !session.allowed_states.is_empty() {
            messages.push(Message::define(&session.allowed_states));
        }
        for message in messages {
            self.send(message.at(now));
        }
        Ok(())
    }

    /// Add an application handler for `tag`, replacing any earlier one and the
    /// built-in reaction. Returns `true` when a handler was replaced.
    pub fn register_handler<F>(&mut self, tag: impl Into<String>, handler: F) -> bool
    where
        F: FnMut(&Message, &HandlerContext<'_>) -> HandlerResult + Send + 'static,
    {
        self.registry.register(tag, handler)
    }

    /// Producer handle for other threads. It bypasses the outbound-kind check.
    pub fn outbound(&self) -> OutboundSender {
        self.outbound.clone()
    }

    /// Receives the shutdown reason once, when the session closes
    pub fn shutdown_events(&self) -> Receiver<ShutdownReason> {
        self.shutdown_rx.clone()
    }

    /// Run `region` with the voice worker listening
    ///
    /// The worker is stopped afterwards even if `region` panics. Without a
    /// voice worker the region simply runs.
    ///
    /// # Errors
    ///
    /// `Worker` when `START` or `STOP` is not acknowledged
    pub fn with_voice_gate<R>(&mut self, region: impl FnOnce(&mut Control) -> R) -> ControlResult<R> {
        match self.voice.as_mut() {
            Some(worker) => worker.start()?,
            None => {
                debug!("No voice worker, running region ungated");
                return Ok(region(self));
            }
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| region(&mut *self)));
        let stopped = match self.voice.as_mut() {
            Some(worker) if worker.is_running() => worker.stop(),
            _ => Ok(()),
        };

        match outcome {
            Ok(value) => {
                stopped?;
                Ok(value)
            }
            Err(panic) => {
                if let Err(e) = stopped {
                    error!("Voice worker not stopped after failed region: {}", e);
                }
                resume_unwind(panic)
            }
        }
    }

    /// Close the session: send `EXIT`, stop the heartbeat and the voice worker,
    /// drain and close the transport. Later calls do nothing.
    pub fn shutdown(&mut self) {
        self.shutdown_with(ShutdownReason::Requested);
    }

    pub fn shutdown_with(&mut self, reason: ShutdownReason) {
        if self.state.is_terminal() {
            return;
        }
        info!("Shutting down: {}", reason);

        self.heartbeat.stop();
        if let Some(worker) = self.voice.as_mut() {
            if worker.is_listening() {
                if let Err(e) = worker.stop() {
                    warn!("Voice worker did not acknowledge STOP: {}", e);
                }
            }
            worker.quit();
        }

        if self.transport.is_bound() {
            // Make room for EXIT behind any backlog
            self.transport.pump_outbound();
            if !self.enqueue(Message::exit().at(self.clock.now_ms())) {
                error!("EXIT could not be queued, host will not see it");
            }
            for _ in 0..self.settings.shutdown_drain_attempts {
                self.transport.pump_outbound();
                if self.transport.pending_outbound() == 0 {
                    break;
                }
                self.clock.sleep(self.settings.idle_sleep);
            }
        }
        self.transport.close();

        self.connection.connected = false;
        self.state = ControlState::Shutdown;
        self.shutdown_reason = Some(reason.clone());
        let _ = self.shutdown_tx.send(reason);
    }
}

impl Drop for Control {
    fn drop(&mut self) {
        self.shutdown();
    }
}
