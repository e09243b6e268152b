//! Shared data model for collaboration sessions and processing jobs.
//!
//! These types mirror the server's payload shapes so serde round-trips stay
//! lossless and the session store can apply push events schema-driven.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Presence state of a participant within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

/// Last known cursor position of a participant, in video-canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub x: f64,
    pub y: f64,
}

/// A user connected to and present within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Unique user identifier.
    pub id: String,
    /// Display name.
    pub username: String,
    /// Avatar image URL, if available.
    #[serde(default)]
    pub avatar: Option<String>,
    pub status: Presence,
    /// Last known cursor position, if the participant has moved it.
    #[serde(default)]
    pub cursor: Option<Cursor>,
    /// Milliseconds since Unix epoch of the participant's last action.
    #[serde(default)]
    pub last_activity: i64,
}

/// A comment anchored to the shared project, optionally at a video timestamp.
///
/// Replies form a flat one-level list; reply comments never carry replies of
/// their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    /// Creation time in milliseconds since Unix epoch.
    pub ts: i64,
    /// Anchor position in the video, in seconds, if anchored.
    #[serde(default)]
    pub video_timestamp: Option<f64>,
    pub resolved: bool,
    #[serde(default)]
    pub replies: Vec<Comment>,
}

/// Category of an entry in the project update log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    ScriptChange,
    EditApplied,
    CommentAdded,
    VersionCreated,
}

/// One entry of the append-only project update log. Used for audit and
/// replay display only; never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    pub id: String,
    pub kind: UpdateKind,
    /// User whose action produced this update.
    pub user_id: String,
    /// Opaque operation-specific payload.
    pub data: Value,
    /// Milliseconds since Unix epoch.
    pub ts: i64,
}

/// The collaboratively-edited entity: the local mirror of a joined project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedProject {
    pub id: String,
    pub name: String,
    /// User id of the project owner.
    pub owner: String,
    #[serde(default)]
    pub collaborators: Vec<Participant>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub updates: Vec<ProjectUpdate>,
    /// Monotonically increasing counter, incremented on every accepted update.
    pub version: u64,
    /// Advisory whole-project lock. When `true`, `locked_by` is always set.
    pub locked: bool,
    #[serde(default)]
    pub locked_by: Option<String>,
}

/// Lifecycle status of a long-running video processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal jobs receive no further updates.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Progress snapshot for a processing job, delivered by push or poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingUpdate {
    pub project_id: String,
    pub status: JobStatus,
    /// Completion percentage, 0–100.
    pub progress: u8,
    /// Human-readable pipeline stage, e.g. `"transcoding"`.
    #[serde(default)]
    pub stage: Option<String>,
    /// Predicted viral score, available once analysis has run.
    #[serde(default)]
    pub viral_score: Option<f32>,
    /// Failure description when `status` is `failed`.
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Uploading.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn shared_project_serde_defaults() {
        let json = serde_json::json!({
            "id": "p1",
            "name": "Launch teaser",
            "owner": "u1",
            "version": 3,
            "locked": false
        });
        let project: SharedProject = serde_json::from_value(json).expect("deserialize");
        assert_eq!(project.version, 3);
        assert!(project.collaborators.is_empty());
        assert!(project.comments.is_empty());
        assert!(project.updates.is_empty());
        assert!(project.locked_by.is_none());
    }

    #[test]
    fn comment_round_trip_keeps_anchor() {
        let comment = Comment {
            id: "c1".into(),
            user_id: "u1".into(),
            username: "alice".into(),
            content: "tighten this cut".into(),
            ts: 42,
            video_timestamp: Some(12.5),
            resolved: false,
            replies: Vec::new(),
        };
        let json = serde_json::to_string(&comment).expect("serialize");
        let restored: Comment = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, comment);
    }
}
