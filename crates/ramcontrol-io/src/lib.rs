// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! # ramcontrol-io
//!
//! The wire layer of the host link:
//! - [`message`]: the JSON message envelope, its fixed vocabulary and the codec
//! - [`socket`]: frame sockets (ZMQ PAIR, in-memory pairs)
//! - [`transport`]: [`ChannelTransport`], the bound socket plus its bounded outbound queue
//!
//! ```rust,no_run
//! use ramcontrol_io::{ChannelTransport, Message, TransportSettings};
//!
//! let mut transport = ChannelTransport::new(TransportSettings::default());
//! transport.bind("tcp://*:8889").expect("bind");
//! transport.enqueue_outbound(Message::ready()).expect("queue");
//! transport.pump_outbound();
//! for message in transport.pump_inbound() {
//!     println!("{}", message.kind());
//! }
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod message;
pub mod payload;
pub mod queue;
pub mod socket;
pub mod transport;

pub use error::{CodecError, RamNetworkError};
pub use message::{decode, encode, timestamp_ms, type_of, Message, MessageType, PayloadShape};
pub use payload::{MathPayload, SessionPayload, StatePayload, TrialPayload, WordPayload};
pub use queue::{OutboundQueue, OutboundSender, DEFAULT_OUTBOUND_CAPACITY};
pub use socket::{MemorySocket, MessageSocket, ZmqPairSocket, ZmqUrl};
pub use transport::{ChannelTransport, TransportSettings};
