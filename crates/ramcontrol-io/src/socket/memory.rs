// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! In-process socket pair over crossbeam channels

use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};

use super::MessageSocket;
use crate::error::RamNetworkError;

/// One end of an in-memory link
///
/// Used for protocol tests and for running without a host. A bounded pair
/// reports `WouldBlock` once the peer has `capacity` unread frames.
pub struct MemorySocket {
    name: &'static str,
    tx: Option<Sender<Vec<u8>>>,
    rx: Option<Receiver<Vec<u8>>>,
    discard: bool,
}

impl MemorySocket {
    /// Connected pair: (task end, host end)
    pub fn pair() -> (MemorySocket, MemorySocket) {
        Self::from_channels(channel::unbounded(), channel::unbounded())
    }

    pub fn bounded_pair(capacity: usize) -> (MemorySocket, MemorySocket) {
        Self::from_channels(channel::bounded(capacity), channel::bounded(capacity))
    }

    /// A socket with no peer: sends succeed and vanish, nothing is ever received
    pub fn sink() -> MemorySocket {
        MemorySocket {
            name: "memory://sink",
            tx: None,
            rx: None,
            discard: true,
        }
    }

    fn from_channels(
        (to_host, from_task): (Sender<Vec<u8>>, Receiver<Vec<u8>>),
        (to_task, from_host): (Sender<Vec<u8>>, Receiver<Vec<u8>>),
    ) -> (MemorySocket, MemorySocket) {
        let task = MemorySocket {
            name: "memory://task",
            tx: Some(to_host),
            rx: Some(from_host),
            discard: false,
        };
        let host = MemorySocket {
            name: "memory://host",
            tx: Some(to_task),
            rx: Some(from_task),
            discard: false,
        };
        (task, host)
    }
}

impl MessageSocket for MemorySocket {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), RamNetworkError> {
        if self.discard {
            return Ok(());
        }
        let tx = self.tx.as_ref().ok_or(RamNetworkError::Closed)?;
        match tx.try_send(frame.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RamNetworkError::WouldBlock),
            Err(TrySendError::Disconnected(_)) => {
                Err(RamNetworkError::SendFailed("peer closed".to_string()))
            }
        }
    }

    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, RamNetworkError> {
        if self.discard {
            return Ok(None);
        }
        let rx = self.rx.as_ref().ok_or(RamNetworkError::Closed)?;
        match rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn close(&mut self) {
        self.tx = None;
        self.rx = None;
        self.discard = false;
    }

    fn endpoint(&self) -> String {
        self.name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_delivers_both_ways() {
        let (mut task, mut host) = MemorySocket::pair();
        task.send_frame(b"up").unwrap();
        host.send_frame(b"down").unwrap();

        assert_eq!(host.recv_frame(Duration::ZERO).unwrap(), Some(b"up".to_vec()));
        assert_eq!(task.recv_frame(Duration::ZERO).unwrap(), Some(b"down".to_vec()));
        assert_eq!(task.recv_frame(Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn test_bounded_pair_would_block() {
        let (mut task, _host) = MemorySocket::bounded_pair(1);
        task.send_frame(b"1").unwrap();
        assert_eq!(task.send_frame(b"2"), Err(RamNetworkError::WouldBlock));
    }

    #[test]
    fn test_closed_peer() {
        let (mut task, mut host) = MemorySocket::pair();
        host.close();
        assert!(matches!(task.send_frame(b"x"), Err(RamNetworkError::SendFailed(_))));
        assert_eq!(task.recv_frame(Duration::ZERO).unwrap(), None);

        task.close();
        assert_eq!(task.send_frame(b"x"), Err(RamNetworkError::Closed));
    }

    #[test]
    fn test_sink() {
        let mut sink = MemorySocket::sink();
        sink.send_frame(b"anything").unwrap();
        assert_eq!(sink.recv_frame(Duration::from_millis(1)).unwrap(), None);
    }
}
