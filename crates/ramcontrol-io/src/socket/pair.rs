// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! ZMQ PAIR socket
//!
//! Uses the `zmq` C bindings, which give true non-blocking sends via
//! `zmq::DONTWAIT`. The task machine binds; the host connects.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zmq::{Context, Socket};

use super::MessageSocket;
use crate::error::RamNetworkError;

/// Validated ZMQ endpoint (`tcp://host:port`, `ipc://path`, `inproc://name`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZmqUrl {
    url: String,
}

impl ZmqUrl {
    /// # Errors
    ///
    /// `InvalidSocketProperties` for an unknown scheme or a TCP address without a port
    pub fn new(url: &str) -> Result<Self, RamNetworkError> {
        const VALID_PREFIXES: [&str; 3] = ["tcp://", "ipc://", "inproc://"];

        if !VALID_PREFIXES.iter().any(|prefix| url.starts_with(prefix)) {
            return Err(RamNetworkError::InvalidSocketProperties(format!(
                "Invalid ZMQ URL '{}': must start with one of {:?}",
                url, VALID_PREFIXES
            )));
        }

        if let Some(addr_part) = url.strip_prefix("tcp://") {
            let Some((host, port)) = addr_part.rsplit_once(':') else {
                return Err(RamNetworkError::InvalidSocketProperties(format!(
                    "Invalid ZMQ TCP URL '{}': missing port (expected host:port)",
                    url
                )));
            };
            if host.is_empty() || port.parse::<u16>().is_err() {
                return Err(RamNetworkError::InvalidSocketProperties(format!(
                    "Invalid ZMQ TCP URL '{}': expected host:port",
                    url
                )));
            }
        }

        Ok(ZmqUrl {
            url: url.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for ZmqUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// One end of a ZMQ PAIR link
pub struct ZmqPairSocket {
    url: ZmqUrl,
    #[allow(dead_code)] // Context must be kept alive for socket lifetime
    context: Context,
    socket: Option<Socket>,
}

impl ZmqPairSocket {
    fn open(url: &str, linger_ms: i32) -> Result<(ZmqUrl, Context, Socket), RamNetworkError> {
        let url = ZmqUrl::new(url)?;
        let context = Context::new();
        let socket = context
            .socket(zmq::PAIR)
            .map_err(|e| RamNetworkError::InvalidSocketProperties(e.to_string()))?;
        socket
            .set_linger(linger_ms)
            .map_err(|e| RamNetworkError::InvalidSocketProperties(e.to_string()))?;
        Ok((url, context, socket))
    }

    /// Bind the task-machine end
    ///
    /// # Errors
    ///
    /// `CannotBind` if the address is in use or unusable
    pub fn bind(url: &str, linger_ms: i32) -> Result<Self, RamNetworkError> {
        let (url, context, socket) = Self::open(url, linger_ms)?;
        socket
            .bind(url.as_str())
            .map_err(|e| RamNetworkError::CannotBind(format!("{}: {}", url, e)))?;
        info!("Control channel bound on {}", url);
        Ok(ZmqPairSocket {
            url,
            context,
            socket: Some(socket),
        })
    }

    /// Connect the host end (used by the mock host)
    pub fn connect(url: &str, linger_ms: i32) -> Result<Self, RamNetworkError> {
        let (url, context, socket) = Self::open(url, linger_ms)?;
        socket
            .connect(url.as_str())
            .map_err(|e| RamNetworkError::CannotConnect(format!("{}: {}", url, e)))?;
        debug!("Connected PAIR socket to {}", url);
        Ok(ZmqPairSocket {
            url,
            context,
            socket: Some(socket),
        })
    }

    fn socket(&self) -> Result<&Socket, RamNetworkError> {
        self.socket.as_ref().ok_or(RamNetworkError::Closed)
    }
}

impl MessageSocket for ZmqPairSocket {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), RamNetworkError> {
        match self.socket()?.send(frame, zmq::DONTWAIT) {
            Ok(()) => Ok(()),
            Err(zmq::Error::EAGAIN) => Err(RamNetworkError::WouldBlock),
            Err(e) => Err(RamNetworkError::SendFailed(e.to_string())),
        }
    }

    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, RamNetworkError> {
        let socket = self.socket()?;

        let mut poll_items = [socket.as_poll_item(zmq::POLLIN)];
        zmq::poll(&mut poll_items, timeout.as_millis() as i64)
            .map_err(|e| RamNetworkError::ReceiveFailed(e.to_string()))?;
        if !poll_items[0].is_readable() {
            return Ok(None);
        }

        match socket.recv_bytes(zmq::DONTWAIT) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(RamNetworkError::ReceiveFailed(e.to_string())),
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("Closed PAIR socket {}", self.url);
        }
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}
