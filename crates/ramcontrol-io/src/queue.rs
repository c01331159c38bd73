// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Bounded outbound queue
//!
//! Many producers, one consumer (the transport pump). When full, the newest
//! message is dropped and an error is logged; the producer is never blocked.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use tracing::error;

use crate::error::RamNetworkError;
use crate::message::Message;

pub const DEFAULT_OUTBOUND_CAPACITY: usize = 32;

/// Producer handle. Cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct OutboundSender {
    tx: Sender<Message>,
    capacity: usize,
}

impl OutboundSender {
    /// Append without blocking
    ///
    /// # Errors
    ///
    /// `QueueFull` when at capacity; the message is dropped
    pub fn enqueue(&self, message: Message) -> Result<(), RamNetworkError> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Disconnected(message)) => {
                error!("Transport gone, dropping {}", message.kind());
                Err(RamNetworkError::Closed)
            }
            Err(TrySendError::Full(message)) => {
                error!(
                    "Outbound queue full ({} messages), dropping {}",
                    self.capacity,
                    message.kind()
                );
                Err(RamNetworkError::QueueFull {
                    capacity: self.capacity,
                    kind: message.kind().to_string(),
                })
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for OutboundSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundSender")
            .field("queued", &self.tx.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

pub struct OutboundQueue {
    sender: OutboundSender,
    rx: Receiver<Message>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = channel::bounded(capacity);
        OutboundQueue {
            sender: OutboundSender { tx, capacity },
            rx,
        }
    }

    pub fn sender(&self) -> OutboundSender {
        self.sender.clone()
    }

    pub fn enqueue(&self, message: Message) -> Result<(), RamNetworkError> {
        self.sender.enqueue(message)
    }

    /// Next message in FIFO order, if any
    pub fn pop(&self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.sender.capacity
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        OutboundQueue::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}
