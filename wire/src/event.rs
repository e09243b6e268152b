//! Typed views over envelope payloads.
//!
//! DESIGN
//! ======
//! Event names on the wire are strings, but nothing outside this module
//! touches them: inbound pushes parse into the closed [`ServerEvent`] enum
//! and outbound traffic is built from [`ClientRequest`] / [`ClientEvent`].
//! An event-name typo or payload drift is a compile error or a
//! [`WireError`], never a silently dropped message.

use serde::Deserialize;
use serde_json::Value;

use crate::model::{Comment, Participant, ProcessingUpdate, ProjectUpdate};
use crate::{Envelope, WireError};

// =============================================================================
// SERVER EVENTS (inbound pushes)
// =============================================================================

/// An unsolicited server push, parsed from an inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A participant joined the session.
    UserJoined(Participant),
    /// A participant left the session.
    UserLeft { user_id: String },
    /// A participant moved their cursor.
    CursorMoved { user_id: String, x: f64, y: f64 },
    /// A comment was created (the originator receives this too).
    CommentAdded(Comment),
    /// A comment was edited or resolved; carries the full replacement.
    CommentUpdated(Comment),
    /// A comment was deleted.
    CommentDeleted { comment_id: String },
    /// An accepted project mutation; increments the session version.
    ProjectUpdated(ProjectUpdate),
    /// The advisory project lock was taken.
    ProjectLocked { user_id: String, username: String },
    /// The advisory project lock was released.
    ProjectUnlocked,
    /// Progress for a subscribed processing job.
    Processing(ProcessingUpdate),
    /// A viral score became available for a project.
    ViralScore {
        project_id: String,
        viral_score: f32,
    },
    /// Server-side error not tied to any pending request.
    Error { message: String },
}

#[derive(Deserialize)]
struct UserLeftPayload {
    user_id: String,
}

#[derive(Deserialize)]
struct CursorMovedPayload {
    user_id: String,
    x: f64,
    y: f64,
}

#[derive(Deserialize)]
struct CommentDeletedPayload {
    comment_id: String,
}

#[derive(Deserialize)]
struct ProjectLockedPayload {
    user_id: String,
    username: String,
}

#[derive(Deserialize)]
struct ViralScorePayload {
    project_id: String,
    viral_score: f32,
}

#[derive(Deserialize)]
struct ErrorPayload {
    message: String,
}

fn payload<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, WireError> {
    serde_json::from_value(envelope.data.clone()).map_err(|source| WireError::Payload {
        event: envelope.event.clone(),
        source,
    })
}

impl ServerEvent {
    /// Parse a push envelope into a typed event.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnknownEvent`] for names outside the protocol and
    /// [`WireError::Payload`] when the payload does not match the shape the
    /// name implies.
    pub fn parse(envelope: &Envelope) -> Result<Self, WireError> {
        match envelope.event.as_str() {
            "user_joined" => Ok(Self::UserJoined(payload(envelope)?)),
            "user_left" => {
                let p: UserLeftPayload = payload(envelope)?;
                Ok(Self::UserLeft { user_id: p.user_id })
            }
            "user_cursor_move" => {
                let p: CursorMovedPayload = payload(envelope)?;
                Ok(Self::CursorMoved { user_id: p.user_id, x: p.x, y: p.y })
            }
            "comment_added" => Ok(Self::CommentAdded(payload(envelope)?)),
            "comment_updated" => Ok(Self::CommentUpdated(payload(envelope)?)),
            "comment_deleted" => {
                let p: CommentDeletedPayload = payload(envelope)?;
                Ok(Self::CommentDeleted { comment_id: p.comment_id })
            }
            "project_updated" => Ok(Self::ProjectUpdated(payload(envelope)?)),
            "project_locked" => {
                let p: ProjectLockedPayload = payload(envelope)?;
                Ok(Self::ProjectLocked { user_id: p.user_id, username: p.username })
            }
            "project_unlocked" => Ok(Self::ProjectUnlocked),
            "processing_update" => Ok(Self::Processing(payload(envelope)?)),
            "viral_score_update" => {
                let p: ViralScorePayload = payload(envelope)?;
                Ok(Self::ViralScore { project_id: p.project_id, viral_score: p.viral_score })
            }
            "error" => {
                let p: ErrorPayload = payload(envelope)?;
                Ok(Self::Error { message: p.message })
            }
            other => Err(WireError::UnknownEvent(other.to_owned())),
        }
    }

    /// Wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserJoined(_) => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::CursorMoved { .. } => "user_cursor_move",
            Self::CommentAdded(_) => "comment_added",
            Self::CommentUpdated(_) => "comment_updated",
            Self::CommentDeleted { .. } => "comment_deleted",
            Self::ProjectUpdated(_) => "project_updated",
            Self::ProjectLocked { .. } => "project_locked",
            Self::ProjectUnlocked => "project_unlocked",
            Self::Processing(_) => "processing_update",
            Self::ViralScore { .. } => "viral_score_update",
            Self::Error { .. } => "error",
        }
    }
}

// =============================================================================
// CLIENT REQUESTS (outbound, acknowledged)
// =============================================================================

/// A client operation that expects a terminal done/error reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    JoinProject {
        project_id: String,
    },
    AddComment {
        project_id: String,
        content: String,
        video_timestamp: Option<f64>,
    },
    UpdateComment {
        project_id: String,
        comment_id: String,
        content: String,
    },
    DeleteComment {
        project_id: String,
        comment_id: String,
    },
    ResolveComment {
        project_id: String,
        comment_id: String,
    },
    LockProject {
        project_id: String,
    },
    UnlockProject {
        project_id: String,
    },
    SubscribeProcessing {
        project_id: String,
    },
    UnsubscribeProcessing {
        project_id: String,
    },
    /// Round-trip latency probe; the reply echoes `ts`.
    Ping {
        ts: i64,
    },
}

impl ClientRequest {
    /// Wire name of this request.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinProject { .. } => "join_project",
            Self::AddComment { .. } => "add_comment",
            Self::UpdateComment { .. } => "update_comment",
            Self::DeleteComment { .. } => "delete_comment",
            Self::ResolveComment { .. } => "resolve_comment",
            Self::LockProject { .. } => "lock_project",
            Self::UnlockProject { .. } => "unlock_project",
            Self::SubscribeProcessing { .. } => "subscribe_processing",
            Self::UnsubscribeProcessing { .. } => "unsubscribe_processing",
            Self::Ping { .. } => "ping",
        }
    }

    /// Project this request targets, when it targets one.
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::JoinProject { project_id }
            | Self::AddComment { project_id, .. }
            | Self::UpdateComment { project_id, .. }
            | Self::DeleteComment { project_id, .. }
            | Self::ResolveComment { project_id, .. }
            | Self::LockProject { project_id }
            | Self::UnlockProject { project_id }
            | Self::SubscribeProcessing { project_id }
            | Self::UnsubscribeProcessing { project_id } => Some(project_id),
            Self::Ping { .. } => None,
        }
    }

    /// Build the request envelope for this operation.
    #[must_use]
    pub fn into_envelope(self) -> Envelope {
        let envelope = Envelope::request(self.name(), self.payload());
        match self.project_id() {
            Some(project_id) => envelope.with_project_id(project_id),
            None => envelope,
        }
    }

    fn payload(&self) -> Value {
        match self {
            Self::JoinProject { project_id }
            | Self::LockProject { project_id }
            | Self::UnlockProject { project_id }
            | Self::SubscribeProcessing { project_id }
            | Self::UnsubscribeProcessing { project_id } => {
                serde_json::json!({ "project_id": project_id })
            }
            Self::AddComment { project_id, content, video_timestamp } => serde_json::json!({
                "project_id": project_id,
                "content": content,
                "video_timestamp": video_timestamp,
            }),
            Self::UpdateComment { project_id, comment_id, content } => serde_json::json!({
                "project_id": project_id,
                "comment_id": comment_id,
                "content": content,
            }),
            Self::DeleteComment { project_id, comment_id }
            | Self::ResolveComment { project_id, comment_id } => serde_json::json!({
                "project_id": project_id,
                "comment_id": comment_id,
            }),
            Self::Ping { ts } => serde_json::json!({ "ts": ts }),
        }
    }
}

// =============================================================================
// CLIENT EVENTS (outbound, fire-and-forget)
// =============================================================================

/// A client emission that expects no reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Post-open handshake; associates the connection with an identity.
    Authenticate {
        token: String,
        user_id: String,
        username: String,
    },
    /// Ephemeral cursor broadcast. Callers throttle if needed.
    CursorMove { project_id: String, x: f64, y: f64 },
    /// Best-effort leave notification on session teardown.
    LeaveProject { project_id: String },
}

impl ClientEvent {
    /// Wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::CursorMove { .. } => "cursor_move",
            Self::LeaveProject { .. } => "leave_project",
        }
    }

    /// Build the envelope for this emission.
    #[must_use]
    pub fn into_envelope(self) -> Envelope {
        match self {
            Self::Authenticate { token, user_id, username } => Envelope::request(
                "authenticate",
                serde_json::json!({
                    "token": token,
                    "user_id": &user_id,
                    "username": username,
                }),
            )
            .with_from(user_id),
            Self::CursorMove { project_id, x, y } => Envelope::request(
                "cursor_move",
                serde_json::json!({ "project_id": &project_id, "x": x, "y": y }),
            )
            .with_project_id(project_id),
            Self::LeaveProject { project_id } => Envelope::request(
                "leave_project",
                serde_json::json!({ "project_id": &project_id }),
            )
            .with_project_id(project_id),
        }
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
