// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Channel transport: one framed link to the host plus the outbound queue
//!
//! Every operation here is non-blocking apart from the bounded inbound wait,
//! and none of the pumps ever return an error. Problems with individual
//! messages are logged and the message is skipped.

use std::time::Duration;

use ramcontrol_observability::NETWORK_TARGET;
use tracing::{debug, error, info, warn};

use crate::error::RamNetworkError;
use crate::message::{decode, encode, Message};
use crate::queue::{OutboundQueue, OutboundSender, DEFAULT_OUTBOUND_CAPACITY};
use crate::socket::{MessageSocket, ZmqPairSocket};

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub outbound_capacity: usize,
    /// Longest wait for the first inbound frame of a pump
    pub inbound_poll: Duration,
    pub max_inbound_per_pump: usize,
    pub linger_ms: i32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            inbound_poll: Duration::from_millis(1),
            max_inbound_per_pump: 64,
            linger_ms: 250,
        }
    }
}

fn log_wire(direction: &'static str, message: &Message) {
    info!(target: NETWORK_TARGET, direction, "{}", message.to_json_string());
}

pub struct ChannelTransport {
    settings: TransportSettings,
    socket: Option<Box<dyn MessageSocket>>,
    queue: OutboundQueue,
    /// Head of the queue that the socket refused last pump
    pending: Option<(Message, Vec<u8>)>,
}

impl ChannelTransport {
    pub fn new(settings: TransportSettings) -> Self {
        let queue = OutboundQueue::new(settings.outbound_capacity);
        ChannelTransport {
            settings,
            socket: None,
            queue,
            pending: None,
        }
    }

    /// Bind a ZMQ PAIR endpoint
    ///
    /// # Errors
    ///
    /// `AlreadyBound` if called twice without `close`; `CannotBind` or
    /// `InvalidSocketProperties` if the address is unusable
    pub fn bind(&mut self, address: &str) -> Result<(), RamNetworkError> {
        if let Some(socket) = &self.socket {
            return Err(RamNetworkError::AlreadyBound(socket.endpoint()));
        }
        let socket = ZmqPairSocket::bind(address, self.settings.linger_ms)?;
        self.socket = Some(Box::new(socket));
        Ok(())
    }

    /// Use an already-open socket (memory pairs, no-host sink)
    pub fn attach(&mut self, socket: Box<dyn MessageSocket>) -> Result<(), RamNetworkError> {
        if let Some(existing) = &self.socket {
            return Err(RamNetworkError::AlreadyBound(existing.endpoint()));
        }
        debug!("Attached socket {}", socket.endpoint());
        self.socket = Some(socket);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.socket.is_some()
    }

    pub fn endpoint(&self) -> Option<String> {
        self.socket.as_ref().map(|s| s.endpoint())
    }

    /// Producer handle for other threads
    pub fn sender(&self) -> OutboundSender {
        self.queue.sender()
    }

    /// Append to the outbound queue without blocking
    ///
    /// # Errors
    ///
    /// `QueueFull` when at capacity; the message is dropped and logged
    pub fn enqueue_outbound(&self, message: Message) -> Result<(), RamNetworkError> {
        self.queue.enqueue(message)
    }

    /// Messages not yet handed to the socket
    pub fn pending_outbound(&self) -> usize {
        self.queue.len() + usize::from(self.pending.is_some())
    }

    /// Transmit queued messages in FIFO order until the socket would block
    ///
    /// Returns how many were sent.
    pub fn pump_outbound(&mut self) -> usize {
        let Some(socket) = self.socket.as_mut() else {
            return 0;
        };

        // Producers on other threads may keep adding; one queue's worth per pump.
        let budget = self.queue.capacity() + 1;
        let mut sent = 0;

        for _ in 0..budget {
            let (message, frame) = match self.pending.take() {
                Some(held) => held,
                None => {
                    let Some(message) = self.queue.pop() else {
                        break;
                    };
                    match encode(&message) {
                        Ok(frame) => (message, frame),
                        Err(e) => {
                            error!("Dropping unencodable {} message: {}", message.kind(), e);
                            continue;
                        }
                    }
                }
            };

            match socket.send_frame(&frame) {
                Ok(()) => {
                    log_wire("out", &message);
                    sent += 1;
                }
                Err(RamNetworkError::WouldBlock) => {
                    debug!("Socket busy, holding {} for next pump", message.kind());
                    self.pending = Some((message, frame));
                    break;
                }
                Err(e) => {
                    error!("Failed to send {} message: {}", message.kind(), e);
                }
            }
        }

        sent
    }

    /// Collect whatever has arrived, waiting at most `inbound_poll` for the first frame
    pub fn pump_inbound(&mut self) -> Vec<Message> {
        let Some(socket) = self.socket.as_mut() else {
            return Vec::new();
        };

        let mut messages = Vec::new();
        let mut wait = self.settings.inbound_poll;

        for _ in 0..self.settings.max_inbound_per_pump {
            match socket.recv_frame(wait) {
                Ok(Some(frame)) => match decode(&frame) {
                    Ok(message) => {
                        log_wire("in", &message);
                        messages.push(message);
                    }
                    Err(e) => {
                        warn!(
                            "Skipping undecodable frame ({}): {}",
                            e,
                            String::from_utf8_lossy(&frame)
                        );
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Receive failed: {}", e);
                    break;
                }
            }
            wait = Duration::ZERO;
        }

        messages
    }

    /// Release the endpoint and discard anything unsent. Safe to call repeatedly.
    pub fn close(&mut self) {
        let Some(mut socket) = self.socket.take() else {
            return;
        };

        let mut dropped = usize::from(self.pending.take().is_some());
        while self.queue.pop().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!("Closing with {} unsent message(s)", dropped);
        }

        socket.close();
        info!("Control channel {} closed", socket.endpoint());
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        ChannelTransport::new(TransportSettings::default())
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::MemorySocket;

    fn trials(frames: Vec<Vec<u8>>) -> Vec<i64> {
        frames
            .iter()
            .map(|f| decode(f).unwrap().data().unwrap()["trial"].as_i64().unwrap())
            .collect()
    }

    fn drain(host: &mut MemorySocket) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| host.recv_frame(Duration::ZERO).unwrap()).collect()
    }

    #[test]
    fn test_pump_outbound_preserves_order() {
        let (task, mut host) = MemorySocket::pair();
        let mut transport = ChannelTransport::default();
        transport.attach(Box::new(task)).unwrap();

        transport.enqueue_outbound(Message::trial(1)).unwrap();
        transport.enqueue_outbound(Message::trial(2)).unwrap();
        assert_eq!(transport.pump_outbound(), 2);
        transport.enqueue_outbound(Message::trial(3)).unwrap();
        assert_eq!(transport.pump_outbound(), 1);

        assert_eq!(trials(drain(&mut host)), vec![1, 2, 3]);
    }

    #[test]
    fn test_would_block_holds_message_at_head() {
        let (task, mut host) = MemorySocket::bounded_pair(1);
        let mut transport = ChannelTransport::default();
        transport.attach(Box::new(task)).unwrap();

        for trial in 1..=3 {
            transport.enqueue_outbound(Message::trial(trial)).unwrap();
        }

        assert_eq!(transport.pump_outbound(), 1);
        assert_eq!(transport.pending_outbound(), 2);
        let mut received = drain(&mut host);

        assert_eq!(transport.pump_outbound(), 1);
        received.extend(drain(&mut host));
        assert_eq!(transport.pump_outbound(), 1);
        received.extend(drain(&mut host));

        assert_eq!(trials(received), vec![1, 2, 3]);
        assert_eq!(transport.pending_outbound(), 0);
    }

    #[test]
    fn test_send_failure_skips_message() {
        let (task, host) = MemorySocket::pair();
        drop(host);
        let mut transport = ChannelTransport::default();
        transport.attach(Box::new(task)).unwrap();

        transport.enqueue_outbound(Message::trial(1)).unwrap();
        transport.enqueue_outbound(Message::trial(2)).unwrap();
        assert_eq!(transport.pump_outbound(), 0);
        assert_eq!(transport.pending_outbound(), 0);
    }

    #[test]
    fn test_pump_inbound_skips_garbage() {
        let (task, mut host) = MemorySocket::pair();
        let mut transport = ChannelTransport::default();
        transport.attach(Box::new(task)).unwrap();

        host.send_frame(b"not json").unwrap();
        host.send_frame(br#"{"data": 1}"#).unwrap();
        host.send_frame(br#"{"type": "HEARTBEAT", "time": 1.0, "data": 1000}"#).unwrap();
        host.send_frame(br#"{"type": "BOGUS"}"#).unwrap();

        let messages = transport.pump_inbound();
        let kinds: Vec<&str> = messages.iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["HEARTBEAT", "BOGUS"]);
        assert!(transport.pump_inbound().is_empty());
    }

    #[test]
    fn test_pump_inbound_respects_per_pump_limit() {
        let (task, mut host) = MemorySocket::pair();
        let mut transport = ChannelTransport::new(TransportSettings {
            max_inbound_per_pump: 2,
            ..TransportSettings::default()
        });
        transport.attach(Box::new(task)).unwrap();

        for _ in 0..3 {
            host.send_frame(br#"{"type": "HEARTBEAT"}"#).unwrap();
        }
        assert_eq!(transport.pump_inbound().len(), 2);
        assert_eq!(transport.pump_inbound().len(), 1);
    }

    #[test]
    fn test_bind_state_rules() {
        let mut transport = ChannelTransport::default();
        assert_eq!(transport.pump_outbound(), 0);
        assert!(transport.pump_inbound().is_empty());

        transport.attach(Box::new(MemorySocket::sink())).unwrap();
        assert!(matches!(
            transport.attach(Box::new(MemorySocket::sink())),
            Err(RamNetworkError::AlreadyBound(_))
        ));

        transport.enqueue_outbound(Message::ready()).unwrap();
        transport.close();
        transport.close();
        assert!(!transport.is_bound());
        assert_eq!(transport.pending_outbound(), 0);

        transport.attach(Box::new(MemorySocket::sink())).unwrap();
        assert!(transport.is_bound());
    }

    #[test]
    fn test_queue_full_is_reported() {
        let mut transport = ChannelTransport::new(TransportSettings {
            outbound_capacity: 1,
            ..TransportSettings::default()
        });
        transport.attach(Box::new(MemorySocket::sink())).unwrap();

        transport.enqueue_outbound(Message::ready()).unwrap();
        assert!(matches!(
            transport.enqueue_outbound(Message::exit()),
            Err(RamNetworkError::QueueFull { .. })
        ));
        assert_eq!(transport.pump_outbound(), 1);
    }
}
