// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Stand-in for the recording host
//!
//! Connects to the task machine, announces itself with `CONNECTED`, answers
//! heartbeats, runs the clock alignment exchange on `ALIGNCLOCK`, answers
//! `READY` with `START` and stops on `EXIT`. Used by tests and by the
//! `ramcontrol-mock-host` binary.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ramcontrol_io::{
    decode, encode, timestamp_ms, Message, MessageSocket, MessageType, RamNetworkError,
    ZmqPairSocket,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MockHostSettings {
    /// `SYNC` round trips per alignment
    pub sync_rounds: u32,
    pub answer_ready: bool,
    pub echo_heartbeats: bool,
    /// Longest wait for the first frame of a step
    pub poll: Duration,
}

impl Default for MockHostSettings {
    fn default() -> Self {
        MockHostSettings {
            sync_rounds: 10,
            answer_ready: true,
            echo_heartbeats: true,
            poll: Duration::from_millis(5),
        }
    }
}

/// What the host saw during a run
#[derive(Debug, Clone)]
pub struct MockHostReport {
    pub received: Vec<Message>,
    /// Task clock minus host clock, one entry per round trip, in milliseconds
    pub clock_offsets: Vec<f64>,
    pub exited: bool,
}

impl MockHostReport {
    pub fn kinds(&self) -> Vec<&str> {
        self.received.iter().map(Message::kind).collect()
    }
}

pub struct MockHost {
    socket: Box<dyn MessageSocket>,
    settings: MockHostSettings,
    received: Vec<Message>,
    sync_sent_at: HashMap<i64, f64>,
    clock_offsets: Vec<f64>,
    acknowledged: bool,
    exited: bool,
}

impl MockHost {
    pub fn new(socket: Box<dyn MessageSocket>, settings: MockHostSettings) -> Self {
        MockHost {
            socket,
            settings,
            received: Vec::new(),
            sync_sent_at: HashMap::new(),
            clock_offsets: Vec::new(),
            acknowledged: false,
            exited: false,
        }
    }

    /// Connect to a task machine bound at `address`
    pub fn connect(address: &str, settings: MockHostSettings) -> Result<Self, RamNetworkError> {
        let socket = ZmqPairSocket::connect(address, 0)?;
        Ok(MockHost::new(Box::new(socket), settings))
    }

    pub fn send(&mut self, message: &Message) -> Result<(), RamNetworkError> {
        let frame = encode(message)?;
        self.socket.send_frame(&frame)?;
        debug!("Host sent {}", message.to_json_string());
        Ok(())
    }

    /// Send `CONNECTED`
    pub fn announce(&mut self) -> Result<(), RamNetworkError> {
        self.send(&Message::connected())
    }

    pub fn received(&self) -> &[Message] {
        &self.received
    }

    pub fn clock_offsets(&self) -> &[f64] {
        &self.clock_offsets
    }

    /// The task acknowledged `CONNECTED`
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    /// Receive and react to whatever arrives, waiting at most `poll` for the
    /// first frame. Returns how many messages were handled.
    pub fn step(&mut self) -> Result<usize, RamNetworkError> {
        let mut wait = self.settings.poll;
        let mut handled = 0;
        while let Some(frame) = self.socket.recv_frame(wait)? {
            wait = Duration::ZERO;
            match decode(&frame) {
                Ok(message) => {
                    self.react(&message)?;
                    self.received.push(message);
                    handled += 1;
                }
                Err(e) => warn!("Host could not decode frame: {}", e),
            }
        }
        Ok(handled)
    }

    fn react(&mut self, message: &Message) -> Result<(), RamNetworkError> {
        match message.message_type() {
            Some(MessageType::Connected) => {
                info!("Task acknowledged connection");
                self.acknowledged = true;
            }
            Some(MessageType::Heartbeat) if self.settings.echo_heartbeats => {
                let interval = message.data().and_then(|v| v.as_u64()).unwrap_or(1000);
                self.send(&Message::heartbeat(interval))?;
            }
            Some(MessageType::AlignClock) => {
                info!("Starting clock alignment ({} rounds)", self.settings.sync_rounds);
                self.sync_sent_at.clear();
                self.next_sync(0)?;
            }
            Some(MessageType::Sync) => {
                let Some(sequence) = message.sequence_number() else {
                    warn!("SYNC echo without sequence number");
                    return Ok(());
                };
                if let Some(sent_at) = self.sync_sent_at.remove(&sequence) {
                    let midpoint = (sent_at + timestamp_ms()) / 2.0;
                    self.clock_offsets.push(message.time() - midpoint);
                }
                self.next_sync(sequence + 1)?;
            }
            Some(MessageType::Ready) if self.settings.answer_ready => {
                info!("Task ready, sending START");
                self.send(&Message::start())?;
            }
            Some(MessageType::Exit) => {
                info!("Task sent EXIT");
                self.exited = true;
            }
            _ => {}
        }
        Ok(())
    }

    fn next_sync(&mut self, sequence: i64) -> Result<(), RamNetworkError> {
        if sequence >= i64::from(self.settings.sync_rounds) {
            if !self.clock_offsets.is_empty() {
                let mean = self.clock_offsets.iter().sum::<f64>() / self.clock_offsets.len() as f64;
                info!("Clock offset {:.3} ms over {} rounds", mean, self.clock_offsets.len());
            }
            return self.send(&Message::synced());
        }
        self.sync_sent_at.insert(sequence, timestamp_ms());
        let sync = MessageType::Sync.build(None, None).with_extra("num", sequence);
        self.send(&sync)
    }

    /// Announce, then step until the task sends `EXIT` or `limit` passes
    pub fn run(&mut self, limit: Duration) -> Result<MockHostReport, RamNetworkError> {
        self.announce()?;
        let began = Instant::now();
        while !self.exited && began.elapsed() < limit {
            self.step()?;
        }
        if !self.exited {
            warn!("Task did not exit within {:?}", limit);
        }
        Ok(self.report())
    }

    pub fn report(&self) -> MockHostReport {
        MockHostReport {
            received: self.received.clone(),
            clock_offsets: self.clock_offsets.clone(),
            exited: self.exited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ramcontrol_io::MemorySocket;

    fn task_send(task: &mut MemorySocket, message: &Message) {
        task.send_frame(&encode(message).unwrap()).unwrap();
    }

    fn task_recv(task: &mut MemorySocket) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(frame) = task.recv_frame(Duration::ZERO).unwrap() {
            out.push(decode(&frame).unwrap());
        }
        out
    }

    #[test]
    fn test_clock_alignment_exchange() {
        let (mut task, host) = MemorySocket::pair();
        let mut mock = MockHost::new(
            Box::new(host),
            MockHostSettings {
                sync_rounds: 2,
                ..MockHostSettings::default()
            },
        );

        task_send(&mut task, &Message::align_clock());
        mock.step().unwrap();
        let first = task_recv(&mut task);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind(), "SYNC");
        assert_eq!(first[0].extra("num"), Some(&serde_json::json!(0)));

        task_send(&mut task, &Message::sync(0));
        mock.step().unwrap();
        assert_eq!(task_recv(&mut task)[0].sequence_number(), Some(1));

        task_send(&mut task, &Message::sync(1));
        mock.step().unwrap();
        assert_eq!(task_recv(&mut task)[0].kind(), "SYNCED");
        assert_eq!(mock.clock_offsets().len(), 2);
    }

    #[test]
    fn test_ready_heartbeat_exit() {
        let (mut task, host) = MemorySocket::pair();
        let mut mock = MockHost::new(Box::new(host), MockHostSettings::default());

        task_send(&mut task, &Message::connected());
        task_send(&mut task, &Message::heartbeat(250));
        task_send(&mut task, &Message::ready());
        task_send(&mut task, &Message::exit());
        assert_eq!(mock.step().unwrap(), 4);

        let replies = task_recv(&mut task);
        let kinds: Vec<&str> = replies.iter().map(Message::kind).collect();
        assert_eq!(kinds, vec!["HEARTBEAT", "START"]);
        assert_eq!(replies[0].data(), Some(&serde_json::json!(250)));
        assert!(mock.is_acknowledged());
        assert!(mock.has_exited());
        assert_eq!(
            mock.report().kinds(),
            vec!["CONNECTED", "HEARTBEAT", "READY", "EXIT"]
        );
    }
}
