//! Shared envelope model and JSON codec for the ReelRoom realtime transport.
//!
//! This crate owns the wire representation used by the session-layer client
//! and any server implementing the contract. Every message on the socket is
//! an [`Envelope`]: clients send request envelopes, the server answers with
//! done/error envelopes correlated via `parent_id`, and unsolicited pushes
//! arrive as request-status envelopes with no parent.
//!
//! Payloads stay flexible (`serde_json::Value`) at the envelope level; the
//! typed views live in [`event`].

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod event;
pub mod model;

pub use event::{ClientEvent, ClientRequest, ServerEvent};
pub use model::{
    Comment, Cursor, JobStatus, Participant, Presence, ProcessingUpdate, ProjectUpdate,
    SharedProject, UpdateKind,
};

/// Envelope data key for error messages on `Error`-status replies.
pub const ENVELOPE_MESSAGE: &str = "message";

/// Error returned when an envelope cannot be read off the wire.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The text payload was not a valid JSON envelope.
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] serde_json::Error),
    /// The envelope carried an event name this protocol does not define.
    #[error("unknown event name: {0}")]
    UnknownEvent(String),
    /// The event name was known but the payload did not match its shape.
    #[error("malformed payload for `{event}`: {source}")]
    Payload {
        event: String,
        source: serde_json::Error,
    },
}

/// Lifecycle position of an envelope in a request/response exchange.
///
/// Every exchange is `request → done` or `request → error`. Server pushes
/// reuse `Request` (they are requests the client never answers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Done,
    Error,
}

impl Status {
    /// Terminal statuses end a request/response exchange.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Error)
    }
}

/// The universal message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub from: Option<String>,
    /// Event name, e.g. `"join_project"` or `"comment_added"`.
    pub event: String,
    pub status: Status,
    pub data: Value,
}

/// Current time as milliseconds since Unix epoch.
fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Envelope {
    /// Create a request envelope. Entry point for every client operation.
    pub fn request(event: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            project_id: None,
            from: None,
            event: event.into(),
            status: Status::Request,
            data,
        }
    }

    /// Create an unsolicited push. Same shape as a request, kept separate
    /// so server/mock code reads as intended.
    pub fn push(event: impl Into<String>, data: Value) -> Self {
        Self::request(event, data)
    }

    /// Create a done reply carrying the operation result. Terminal.
    #[must_use]
    pub fn done(&self, data: Value) -> Self {
        self.reply(Status::Done, data)
    }

    /// Create an error reply from a human-readable message. Terminal.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        self.reply(
            Status::Error,
            serde_json::json!({ ENVELOPE_MESSAGE: message.into() }),
        )
    }

    /// Build a reply envelope. Inherits `parent_id`, `project_id`, and `event`.
    fn reply(&self, status: Status, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            project_id: self.project_id.clone(),
            from: None,
            event: self.event.clone(),
            status,
            data,
        }
    }

    #[must_use]
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.data {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// The error message carried by an `Error`-status envelope, if present.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.data.get(ENVELOPE_MESSAGE).and_then(Value::as_str)
    }
}

/// Encode an envelope as a JSON text frame.
///
/// # Errors
///
/// Returns [`WireError::Decode`] if serialization fails (only possible with
/// non-string map keys, which [`Envelope`] never produces).
pub fn encode_envelope(envelope: &Envelope) -> Result<String, WireError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode a JSON text frame into an envelope.
///
/// # Errors
///
/// Returns [`WireError::Decode`] for malformed JSON or missing fields.
pub fn decode_envelope(text: &str) -> Result<Envelope, WireError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
