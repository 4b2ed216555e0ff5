//! Message link between the Recorder and the Monitor
//!
//! A `Link` carries flat key/value payloads ("user info" dictionaries) between
//! the two endpoints. Delivery is asynchronous, at-least-once and unordered;
//! handlers may be invoked on any thread. The link never interprets payloads:
//! `LinkMessage::from_payload` and `LinkMessage::to_payload` are the codec.
//!
//! Wire format: exactly one kind key whose value is the payload string, plus
//! optional `messageId` and `sentAt` metadata.
//!
//! ```text
//! {"heartRate": "112", "messageId": "…", "sentAt": "2024-01-15T10:00:00Z"}
//! ```

mod memory;
mod outbox;

pub use memory::MemoryLink;
pub use outbox::OutboxLink;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SyncError;
use crate::types::NO_READING;

/// Raw payload as it travels over the link
pub type Payload = serde_json::Map<String, Value>;

/// Callback receiving delivered payloads
pub type PayloadHandler = Arc<dyn Fn(Payload) + Send + Sync>;

/// Callback fired once the link finishes activating
pub type ActivationHandler = Arc<dyn Fn() + Send + Sync>;

/// Metadata key carrying the message id
pub const MESSAGE_ID_KEY: &str = "messageId";

/// Metadata key carrying the instant the message refers to
pub const SENT_AT_KEY: &str = "sentAt";

/// Kind of message exchanged between endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Monitor asks the Recorder to start a workout
    StartWorkout,
    /// Monitor asks the Recorder to stop the workout
    StopWorkout,
    /// Recorder relays the latest heart rate
    HeartRateUpdate,
    /// Recorder reports that its workout stopped
    StoppedFromRemote,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::StartWorkout,
        MessageKind::StopWorkout,
        MessageKind::HeartRateUpdate,
        MessageKind::StoppedFromRemote,
    ];

    /// Wire key for this kind
    pub fn key(&self) -> &'static str {
        match self {
            MessageKind::StartWorkout => "startWorkout",
            MessageKind::StopWorkout => "stopWorkout",
            MessageKind::HeartRateUpdate => "heartRate",
            MessageKind::StoppedFromRemote => "stopButtonTappedFromWatch",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }
}

/// A decoded link message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkMessage {
    pub kind: MessageKind,
    /// Opaque payload string; for heart-rate updates, the rounded bpm
    pub payload: String,
    /// Unique id used to drop redelivered copies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Instant the message refers to. For heart-rate updates this is the
    /// sample time, otherwise the time the message was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl LinkMessage {
    /// New message with a fresh id, stamped now
    pub fn new(kind: MessageKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            id: Some(Uuid::new_v4()),
            sent_at: Some(Utc::now()),
        }
    }

    pub fn start_workout() -> Self {
        Self::new(MessageKind::StartWorkout, "Start workout.")
    }

    pub fn stop_workout() -> Self {
        Self::new(MessageKind::StopWorkout, "Stop workout.")
    }

    pub fn heart_rate(bpm: i64) -> Self {
        Self::new(MessageKind::HeartRateUpdate, bpm.to_string())
    }

    pub fn stopped_from_remote() -> Self {
        Self::new(MessageKind::StoppedFromRemote, NO_READING)
    }

    pub fn with_sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at = Some(sent_at);
        self
    }

    /// Drop delivery metadata, as an older peer would send it
    pub fn without_metadata(mut self) -> Self {
        self.id = None;
        self.sent_at = None;
        self
    }

    /// Heart rate carried by a `HeartRateUpdate`
    pub fn heart_rate_bpm(&self) -> Option<u32> {
        match self.kind {
            MessageKind::HeartRateUpdate => self.payload.trim().parse().ok(),
            _ => None,
        }
    }

    /// Encode to the wire dictionary
    pub fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert(
            self.kind.key().to_string(),
            Value::String(self.payload.clone()),
        );
        if let Some(id) = self.id {
            payload.insert(MESSAGE_ID_KEY.to_string(), Value::String(id.to_string()));
        }
        if let Some(sent_at) = self.sent_at {
            payload.insert(
                SENT_AT_KEY.to_string(),
                Value::String(sent_at.to_rfc3339()),
            );
        }
        payload
    }

    /// Decode a wire dictionary. Unknown keys are ignored.
    pub fn from_payload(payload: &Payload) -> Result<Self, SyncError> {
        let mut found = payload
            .iter()
            .filter_map(|(key, value)| MessageKind::from_key(key).map(|kind| (kind, value)));

        let (kind, value) = found.next().ok_or_else(|| {
            SyncError::MalformedMessage("payload has no message key".to_string())
        })?;
        if found.next().is_some() {
            return Err(SyncError::MalformedMessage(
                "payload has more than one message key".to_string(),
            ));
        }

        let text = value.as_str().ok_or_else(|| {
            SyncError::MalformedMessage(format!("value of '{}' is not a string", kind.key()))
        })?;

        let message = LinkMessage {
            kind,
            payload: text.to_string(),
            id: parse_message_id(payload)?,
            sent_at: parse_sent_at(payload)?,
        };

        if kind == MessageKind::HeartRateUpdate && message.heart_rate_bpm().is_none() {
            return Err(SyncError::MalformedMessage(format!(
                "heart rate '{}' is not a whole number of beats per minute",
                text
            )));
        }

        Ok(message)
    }

    /// Decode a JSON object string
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        let payload: Payload = serde_json::from_str(json)?;
        Self::from_payload(&payload)
    }
}

fn metadata_str<'a>(payload: &'a Payload, key: &str) -> Result<Option<&'a str>, SyncError> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(SyncError::MalformedMessage(format!(
            "'{}' is not a string",
            key
        ))),
    }
}

fn parse_message_id(payload: &Payload) -> Result<Option<Uuid>, SyncError> {
    metadata_str(payload, MESSAGE_ID_KEY)?
        .map(|s| {
            Uuid::parse_str(s).map_err(|e| {
                SyncError::MalformedMessage(format!("invalid {}: {}", MESSAGE_ID_KEY, e))
            })
        })
        .transpose()
}

fn parse_sent_at(payload: &Payload) -> Result<Option<DateTime<Utc>>, SyncError> {
    metadata_str(payload, SENT_AT_KEY)?
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    SyncError::MalformedMessage(format!("invalid {}: {}", SENT_AT_KEY, e))
                })
        })
        .transpose()
}

/// Bidirectional message channel between endpoints
pub trait Link: Send + Sync {
    /// Whether the channel finished activating
    fn is_activated(&self) -> bool;

    /// Hand a raw payload to the transport
    fn transfer(&self, payload: Payload) -> Result<(), SyncError>;

    /// Register a handler invoked once per delivered payload
    fn on_receive(&self, handler: PayloadHandler);

    /// Register a handler fired on activation; fires immediately when the
    /// link is already active
    fn on_activated(&self, handler: ActivationHandler);

    /// Encode and send a message
    fn send(&self, message: &LinkMessage) -> Result<(), SyncError> {
        if !self.is_activated() {
            return Err(SyncError::LinkUnavailable(
                "link has not finished activating".to_string(),
            ));
        }
        self.transfer(message.to_payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_wire_keys() {
        assert_eq!(MessageKind::StartWorkout.key(), "startWorkout");
        assert_eq!(MessageKind::StopWorkout.key(), "stopWorkout");
        assert_eq!(MessageKind::HeartRateUpdate.key(), "heartRate");
        assert_eq!(
            MessageKind::StoppedFromRemote.key(),
            "stopButtonTappedFromWatch"
        );
        assert_eq!(MessageKind::from_key("unknown"), None);
    }

    #[test]
    fn test_encode_heart_rate() {
        let sent_at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let message = LinkMessage::heart_rate(112).with_sent_at(sent_at);
        let encoded = message.to_payload();

        assert_eq!(encoded["heartRate"], json!("112"));
        assert_eq!(encoded[SENT_AT_KEY], json!("2024-01-15T10:00:00+00:00"));
        assert!(encoded.contains_key(MESSAGE_ID_KEY));

        let decoded = LinkMessage::from_payload(&encoded).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.heart_rate_bpm(), Some(112));
    }

    #[test]
    fn test_decode_legacy_payload_without_metadata() {
        let decoded =
            LinkMessage::from_payload(&payload(json!({"stopButtonTappedFromWatch": "---"})))
                .unwrap();
        assert_eq!(decoded.kind, MessageKind::StoppedFromRemote);
        assert_eq!(decoded.payload, "---");
        assert_eq!(decoded.id, None);
        assert_eq!(decoded.sent_at, None);
    }

    #[test]
    fn test_decode_ignores_unknown_keys() {
        let decoded = LinkMessage::from_json(r#"{"startWorkout": "Start workout.", "extra": 1}"#)
            .unwrap();
        assert_eq!(decoded.kind, MessageKind::StartWorkout);
    }

    #[test]
    fn test_malformed_payloads() {
        let cases = [
            json!({}),
            json!({"other": "x"}),
            json!({"startWorkout": "a", "stopWorkout": "b"}),
            json!({"heartRate": 80}),
            json!({"heartRate": "fast"}),
            json!({"heartRate": "-5"}),
            json!({"stopWorkout": "x", "messageId": "not-a-uuid"}),
            json!({"stopWorkout": "x", "sentAt": "yesterday"}),
            json!({"stopWorkout": "x", "sentAt": 12}),
        ];

        for case in cases {
            let result = LinkMessage::from_payload(&payload(case.clone()));
            assert!(
                matches!(result, Err(SyncError::MalformedMessage(_))),
                "expected malformed: {}",
                case
            );
        }
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(matches!(
            LinkMessage::from_json("[1, 2]"),
            Err(SyncError::JsonError(_))
        ));
    }
}
