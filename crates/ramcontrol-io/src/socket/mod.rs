// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Frame-level sockets under the channel transport
//!
//! A socket moves opaque frames between exactly two peers. Sends never block:
//! a full or unconnected socket reports [`RamNetworkError::WouldBlock`].

mod memory;
mod pair;

use std::time::Duration;

use crate::error::RamNetworkError;

pub use self::memory::MemorySocket;
pub use self::pair::{ZmqPairSocket, ZmqUrl};

pub trait MessageSocket: Send {
    /// Queue one frame without blocking
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), RamNetworkError>;

    /// Wait up to `timeout` for one frame. `Ok(None)` when nothing arrived.
    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, RamNetworkError>;

    /// Release the endpoint. Safe to call more than once.
    fn close(&mut self);

    /// Human-readable endpoint for logs
    fn endpoint(&self) -> String;
}
