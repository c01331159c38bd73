// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Application message handlers
//!
//! The protocol's own reactions (`CONNECTED`, `SYNC`, `HEARTBEAT`, ...) are
//! built into [`Control`](crate::Control). This registry holds handlers the
//! application adds, keyed by wire tag. A registered handler replaces the
//! built-in reaction for its tag.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use ramcontrol_io::{Message, OutboundSender};
use tracing::{debug, error, warn};

use crate::state::Connection;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

/// What a handler may see and do while it runs
pub struct HandlerContext<'a> {
    outbound: &'a OutboundSender,
    connection: &'a Connection,
    now_ms: f64,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(outbound: &'a OutboundSender, connection: &'a Connection, now_ms: f64) -> Self {
        HandlerContext {
            outbound,
            connection,
            now_ms,
        }
    }

    /// Queue a reply. Host-only kinds and tags outside the vocabulary are refused.
    pub fn send(&self, message: Message) -> bool {
        if !message.message_type().is_some_and(|t| t.is_outbound()) {
            error!("Handler tried to send invalid outbound message {}", message.kind());
            return false;
        }
        self.outbound.enqueue(message).is_ok()
    }

    pub fn connection(&self) -> &Connection {
        self.connection
    }

    /// Control clock at dispatch, milliseconds since epoch
    pub fn now_ms(&self) -> f64 {
        self.now_ms
    }
}

pub type Handler = Box<dyn FnMut(&Message, &HandlerContext<'_>) -> HandlerResult + Send>;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when an earlier handler for `tag` was replaced
    pub fn register<F>(&mut self, tag: impl Into<String>, handler: F) -> bool
    where
        F: FnMut(&Message, &HandlerContext<'_>) -> HandlerResult + Send + 'static,
    {
        let tag = tag.into();
        debug!("Adding handler for {}", tag);
        let replaced = self.handlers.insert(tag.clone(), Box::new(handler)).is_some();
        if replaced {
            warn!("Handler for {} replaced", tag);
        }
        replaced
    }

    pub fn remove(&mut self, tag: &str) -> bool {
        self.handlers.remove(tag).is_some()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler for `message`, if any. Errors and panics are logged with
    /// the message and contained. Returns `false` when no handler is registered.
    pub fn invoke(&mut self, message: &Message, context: &HandlerContext<'_>) -> bool {
        let Some(handler) = self.handlers.get_mut(message.kind()) else {
            return false;
        };
        match catch_unwind(AssertUnwindSafe(|| handler(message, context))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(
                "Error handling message {}: {}",
                message.to_json_string(),
                e
            ),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    "Handler panicked on message {}: {}",
                    message.to_json_string(),
                    reason
                );
            }
        }
        true
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&String> = self.handlers.keys().collect();
        tags.sort();
        f.debug_struct("HandlerRegistry").field("tags", &tags).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ramcontrol_io::{MessageType, OutboundQueue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_last_registration_wins() {
        let mut registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        assert!(!registry.register("STATE", |_: &Message, _: &HandlerContext<'_>| Ok(())));
        let counter = Arc::clone(&hits);
        assert!(registry.register("STATE", move |_: &Message, _: &HandlerContext<'_>| {
            counter.fetch_add(10, Ordering::SeqCst);
            Ok(())
        }));
        assert_eq!(registry.len(), 1);

        let queue = OutboundQueue::new(4);
        let sender = queue.sender();
        let connection = Connection::default();
        let ctx = HandlerContext::new(&sender, &connection, 0.0);
        assert!(registry.invoke(&Message::state("X", true), &ctx));
        assert!(!registry.invoke(&Message::trial(1), &ctx));
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_failures_are_contained() {
        let mut registry = HandlerRegistry::new();
        registry.register("TRIAL", |_: &Message, _: &HandlerContext<'_>| {
            Err("bad trial".into())
        });
        registry.register("WORD", |_: &Message, _: &HandlerContext<'_>| -> HandlerResult {
            panic!("handler bug")
        });

        let queue = OutboundQueue::new(4);
        let sender = queue.sender();
        let connection = Connection::default();
        let ctx = HandlerContext::new(&sender, &connection, 0.0);
        assert!(registry.invoke(&Message::trial(1), &ctx));
        assert!(registry.invoke(&Message::word("CAT", 0), &ctx));
    }

    #[test]
    fn test_context_refuses_host_only_kinds() {
        let queue = OutboundQueue::new(4);
        let sender = queue.sender();
        let connection = Connection::default();
        let ctx = HandlerContext::new(&sender, &connection, 12.5);

        assert!(!ctx.send(Message::start()));
        assert!(!ctx.send(Message::raw("BOGUS", None, None)));
        assert!(ctx.send(Message::new(MessageType::Ready)));
        assert_eq!(queue.len(), 1);
        assert_eq!(ctx.now_ms(), 12.5);
    }
}
