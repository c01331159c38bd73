// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! Wire message and codec
//!
//! One JSON object per socket frame:
//!
//! ```text
//! {"time": <float ms>, "type": "<TAG>", "data": <any|omitted>, "aux": <any|omitted>}
//! ```
//!
//! Decoding accepts any string tag. Whether a tag means anything is the
//! dispatcher's business; [`type_of`] is the strict lookup.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CodecError;
use crate::payload::{MathPayload, SessionPayload, StatePayload, TrialPayload, WordPayload};

/// Milliseconds since the Unix epoch, with sub-millisecond resolution
pub fn timestamp_ms() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1000.0
}

/// The fixed message vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Connected,
    Heartbeat,
    ExpName,
    Version,
    Session,
    SubjectId,
    AlignClock,
    Sync,
    Synced,
    Define,
    Exit,
    Start,
    Ready,
    Id,
    State,
    Trial,
    Word,
    Math,
}

/// What a tag carries in `data` (or `aux`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// No payload
    Empty,
    /// `data` = heartbeat interval in milliseconds
    IntervalMs,
    /// `data` = string
    Text,
    /// `data` = [`SessionPayload`]
    Session,
    /// `aux` = sequence number
    Sequence,
    /// `data` = list of state names
    StateNames,
    /// `data` = [`StatePayload`]
    State,
    /// `data` = [`TrialPayload`]
    Trial,
    /// `data` = [`WordPayload`]
    Word,
    /// `data` = [`MathPayload`]
    Math,
    /// Host-defined, passed through untouched
    Opaque,
}

impl MessageType {
    pub const ALL: [MessageType; 18] = [
        MessageType::Connected,
        MessageType::Heartbeat,
        MessageType::ExpName,
        MessageType::Version,
        MessageType::Session,
        MessageType::SubjectId,
        MessageType::AlignClock,
        MessageType::Sync,
        MessageType::Synced,
        MessageType::Define,
        MessageType::Exit,
        MessageType::Start,
        MessageType::Ready,
        MessageType::Id,
        MessageType::State,
        MessageType::Trial,
        MessageType::Word,
        MessageType::Math,
    ];

    /// Wire tag
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Connected => "CONNECTED",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::ExpName => "EXPNAME",
            MessageType::Version => "VERSION",
            MessageType::Session => "SESSION",
            MessageType::SubjectId => "SUBJECTID",
            MessageType::AlignClock => "ALIGNCLOCK",
            MessageType::Sync => "SYNC",
            MessageType::Synced => "SYNCED",
            MessageType::Define => "DEFINE",
            MessageType::Exit => "EXIT",
            MessageType::Start => "START",
            MessageType::Ready => "READY",
            MessageType::Id => "ID",
            MessageType::State => "STATE",
            MessageType::Trial => "TRIAL",
            MessageType::Word => "WORD",
            MessageType::Math => "MATH",
        }
    }

    pub fn parse(tag: &str) -> Option<MessageType> {
        MessageType::ALL.into_iter().find(|t| t.as_str() == tag)
    }

    /// Whether the task machine may send this kind. `SYNCED`, `START` and `ID`
    /// only ever come from the host.
    pub fn is_outbound(self) -> bool {
        !matches!(self, MessageType::Synced | MessageType::Start | MessageType::Id)
    }

    pub fn payload_shape(self) -> PayloadShape {
        match self {
            MessageType::Connected
            | MessageType::AlignClock
            | MessageType::Synced
            | MessageType::Exit
            | MessageType::Start
            | MessageType::Ready => PayloadShape::Empty,
            MessageType::Heartbeat => PayloadShape::IntervalMs,
            MessageType::ExpName | MessageType::Version | MessageType::SubjectId => {
                PayloadShape::Text
            }
            MessageType::Session => PayloadShape::Session,
            MessageType::Sync => PayloadShape::Sequence,
            MessageType::Define => PayloadShape::StateNames,
            MessageType::State => PayloadShape::State,
            MessageType::Trial => PayloadShape::Trial,
            MessageType::Word => PayloadShape::Word,
            MessageType::Math => PayloadShape::Math,
            MessageType::Id => PayloadShape::Opaque,
        }
    }

    /// Construct a message of this kind, stamped now
    pub fn build(self, data: Option<Value>, aux: Option<Value>) -> Message {
        Message::raw(self.as_str(), data, aux)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        type_of(s)
    }
}

/// Look up a known tag
///
/// # Errors
///
/// `CodecError::UnknownMessageType` for tags outside the vocabulary
pub fn type_of(tag: &str) -> Result<MessageType, CodecError> {
    MessageType::parse(tag).ok_or_else(|| CodecError::UnknownMessageType(tag.to_string()))
}

/// A single framed message. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "timestamp_ms")]
    time: f64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aux: Option<Value>,
    /// Top-level keys outside the envelope, kept so they survive a re-encode
    #[serde(flatten)]
    extra: Map<String, Value>,
}

fn present(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}

impl Message {
    /// A message with an arbitrary tag, stamped now. JSON `null` counts as absent.
    pub fn raw(kind: impl Into<String>, data: Option<Value>, aux: Option<Value>) -> Self {
        Message {
            time: timestamp_ms(),
            kind: kind.into(),
            data: present(data),
            aux: present(aux),
            extra: Map::new(),
        }
    }

    pub fn new(kind: MessageType) -> Self {
        kind.build(None, None)
    }

    /// Replace the timestamp (milliseconds since epoch). Non-finite values are ignored.
    pub fn at(mut self, time_ms: f64) -> Self {
        if time_ms.is_finite() {
            self.time = time_ms;
        }
        self
    }

    /// Add a top-level key outside the envelope. Envelope keys are ignored.
    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !matches!(key, "time" | "type" | "data" | "aux") {
            self.extra.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// `None` for tags outside the vocabulary
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.kind)
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn aux(&self) -> Option<&Value> {
        self.aux.as_ref()
    }

    /// A preserved top-level key that is not part of the envelope
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Deserialize `data` into a payload type
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        let data = self.data.clone().unwrap_or(Value::Null);
        serde_json::from_value(data)
            .map_err(|e| CodecError::Decode(format!("{} payload: {}", self.kind, e)))
    }

    /// Sequence number of a clock-sync exchange: top-level `num`, else `aux`, else `data`
    pub fn sequence_number(&self) -> Option<i64> {
        [self.extra.get("num"), self.aux.as_ref(), self.data.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
    }

    /// Compact JSON, for logs
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"type\":\"{}\"}}", self.kind))
    }

    pub fn connected() -> Self {
        Message::new(MessageType::Connected)
    }

    pub fn heartbeat(interval_ms: u64) -> Self {
        MessageType::Heartbeat.build(Some(Value::from(interval_ms)), None)
    }

    pub fn exp_name(experiment: &str) -> Self {
        MessageType::ExpName.build(Some(Value::from(experiment)), None)
    }

    pub fn version(version: &str) -> Self {
        MessageType::Version.build(Some(Value::from(version)), None)
    }

    pub fn session(session_number: u32, experiment: &str) -> Self {
        let payload = SessionPayload {
            session_number,
            session_type: experiment.to_string(),
        };
        MessageType::Session.build(serde_json::to_value(payload).ok(), None)
    }

    pub fn subject_id(subject: &str) -> Self {
        MessageType::SubjectId.build(Some(Value::from(subject)), None)
    }

    pub fn align_clock() -> Self {
        Message::new(MessageType::AlignClock)
    }

    /// Clock-sync echo: carries the sequence number in `aux`, our clock in `time`
    pub fn sync(sequence: i64) -> Self {
        MessageType::Sync.build(None, Some(Value::from(sequence)))
    }

    pub fn synced() -> Self {
        Message::new(MessageType::Synced)
    }

    pub fn define(states: &[String]) -> Self {
        MessageType::Define.build(Some(Value::from(states.to_vec())), None)
    }

    pub fn exit() -> Self {
        Message::new(MessageType::Exit)
    }

    pub fn start() -> Self {
        Message::new(MessageType::Start)
    }

    pub fn ready() -> Self {
        Message::new(MessageType::Ready)
    }

    pub fn state(name: &str, value: impl Into<Value>) -> Self {
        let payload = StatePayload {
            name: name.to_string(),
            value: value.into(),
        };
        MessageType::State.build(serde_json::to_value(payload).ok(), None)
    }

    pub fn trial(trial: i64) -> Self {
        MessageType::Trial.build(serde_json::to_value(TrialPayload { trial }).ok(), None)
    }

    pub fn word(word: &str, serialpos: u32) -> Self {
        let payload = WordPayload {
            word: word.to_string(),
            serialpos,
        };
        MessageType::Word.build(serde_json::to_value(payload).ok(), None)
    }

    pub fn math(payload: &MathPayload) -> Self {
        MessageType::Math.build(serde_json::to_value(payload).ok(), None)
    }
}

/// Canonical JSON bytes for one frame
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(message).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Parse one frame
///
/// # Errors
///
/// `CodecError::Decode` on malformed JSON, a non-object, or a missing/non-string `type`
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(message: &Message) -> Message {
        decode(&encode(message).unwrap()).unwrap()
    }

    #[test]
    fn test_constructed_messages_round_trip() {
        let messages = vec![
            Message::connected(),
            Message::heartbeat(1000),
            Message::exp_name("FR5"),
            Message::session(3, "FR5"),
            Message::sync(17),
            Message::define(&["ENCODING".to_string(), "RETRIEVAL".to_string()]),
            Message::state("VOCALIZATION", true),
            Message::word("CAT", 4),
            Message::math(&MathPayload {
                problem: "3 + 4 + 1 = ".to_string(),
                response: "8".to_string(),
                correct: true,
                response_time_ms: 2350,
            }),
            Message::raw("BOGUS", Some(json!({"nested": [1.5, -2, "x"]})), Some(json!(0.1))),
            Message::ready().at(1_700_000_000_123.456),
        ];
        for message in messages {
            assert_eq!(round_trip(&message), message);
        }
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let bytes = encode(&Message::exit().at(12.5)).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["type"], "EXIT");
        assert_eq!(object["time"], 12.5);
    }

    #[test]
    fn test_null_payload_counts_as_absent() {
        let message = MessageType::Ready.build(Some(Value::Null), None);
        assert!(message.data().is_none());
        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode(b"{not json"), Err(CodecError::Decode(_))));
        assert!(matches!(decode(br#"{"data": 1}"#), Err(CodecError::Decode(_))));
        assert!(matches!(decode(br#"[1, 2]"#), Err(CodecError::Decode(_))));
        assert!(matches!(decode(br#"{"type": 5}"#), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_unknown_type_decodes() {
        let message = decode(br#"{"type": "BOGUS"}"#).unwrap();
        assert_eq!(message.kind(), "BOGUS");
        assert!(message.message_type().is_none());
        assert!(matches!(type_of("BOGUS"), Err(CodecError::UnknownMessageType(t)) if t == "BOGUS"));
    }

    #[test]
    fn test_missing_time_defaults_to_now() {
        let before = timestamp_ms();
        let message = decode(br#"{"type": "HEARTBEAT", "data": 1000}"#).unwrap();
        assert!(message.time() >= before);
        assert!(message.time() <= timestamp_ms());
    }

    #[test]
    fn test_extra_keys_are_preserved() {
        let message = decode(br#"{"type": "SYNC", "time": 5.0, "num": 9}"#).unwrap();
        assert_eq!(message.extra("num"), Some(&json!(9)));
        assert_eq!(message.sequence_number(), Some(9));

        let text = message.to_json_string();
        assert!(text.contains("\"num\":9"));

        let host_sync = MessageType::Sync
            .build(None, None)
            .with_extra("num", 3)
            .with_extra("type", "X");
        assert_eq!(host_sync.kind(), "SYNC");
        assert_eq!(host_sync.sequence_number(), Some(3));
    }

    #[test]
    fn test_sequence_number_fallbacks() {
        assert_eq!(Message::sync(4).sequence_number(), Some(4));
        let in_data = MessageType::Sync.build(Some(json!("12")), None);
        assert_eq!(in_data.sequence_number(), Some(12));
        assert_eq!(Message::new(MessageType::Sync).sequence_number(), None);
    }

    #[test]
    fn test_outbound_kinds() {
        let host_only: Vec<_> = MessageType::ALL
            .into_iter()
            .filter(|t| !t.is_outbound())
            .collect();
        assert_eq!(
            host_only,
            vec![MessageType::Synced, MessageType::Start, MessageType::Id]
        );
    }

    #[test]
    fn test_tags_are_unique_and_parse_back() {
        for kind in MessageType::ALL {
            assert_eq!(type_of(kind.as_str()).unwrap(), kind);
            assert_eq!(kind.as_str().parse::<MessageType>().unwrap(), kind);
        }
    }

    #[test]
    fn test_typed_payloads() {
        let session: SessionPayload = Message::session(0, "FR5").data_as().unwrap();
        assert_eq!(session.session_number, 0);
        assert_eq!(session.session_type, "FR5");

        let state: StatePayload = Message::state("ENCODING", false).data_as().unwrap();
        assert_eq!(state.value, json!(false));
        assert!(Message::exit().data_as::<TrialPayload>().is_err());
    }
}
