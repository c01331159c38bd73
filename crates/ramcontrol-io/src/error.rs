// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Failures of the pure message codec
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// Bytes are not a JSON object with a string `type`
    #[error("CodecError: Unable to decode message: {0}")]
    Decode(String),

    #[error("CodecError: Unable to encode message: {0}")]
    Encode(String),

    /// Tag outside the fixed vocabulary
    #[error("CodecError: Unknown message type '{0}'")]
    UnknownMessageType(String),
}

/// Errors of the channel transport and its sockets
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RamNetworkError {
    #[error("RamNetworkError: Unable to bind: {0}")]
    CannotBind(String),

    #[error("RamNetworkError: Unable to connect: {0}")]
    CannotConnect(String),

    #[error("RamNetworkError: Transport is already bound to {0}")]
    AlreadyBound(String),

    #[error("RamNetworkError: Transport is not bound")]
    NotBound,

    #[error("RamNetworkError: Failed to send data: {0}")]
    SendFailed(String),

    /// The socket would have blocked; retry on the next pump
    #[error("RamNetworkError: Send would block")]
    WouldBlock,

    #[error("RamNetworkError: Failed to receive data: {0}")]
    ReceiveFailed(String),

    /// Outbound queue at capacity; the message was dropped
    #[error("RamNetworkError: Outbound queue full (capacity {capacity}), dropped {kind}")]
    QueueFull { capacity: usize, kind: String },

    #[error("RamNetworkError: Invalid socket properties: {0}")]
    InvalidSocketProperties(String),

    #[error("RamNetworkError: Socket closed")]
    Closed,
}

impl From<CodecError> for RamNetworkError {
    fn from(err: CodecError) -> Self {
        RamNetworkError::SendFailed(err.to_string())
    }
}
