//! Collaboration session store — the local mirror of one joined project.
//!
//! DESIGN
//! ======
//! Imperative operations (join, comment CRUD, lock) round-trip through
//! [`Connection::request`]; the mirror itself mutates only in the push-event
//! handler, identically for the originator and for peers. A successful
//! `add_comment` therefore resolves before the matching `comment_added`
//! push lands: the mirror can lag an acknowledged request by one broadcast.
//! Subscribers observe mutations via [`SessionEvent`] when they are applied.
//!
//! The mirror survives a dropped connection unchanged (stale until a fresh
//! join); `SessionEvent::ConnectionLost` / `Reconnected` tell consumers to
//! refresh. Events missed while disconnected are lost — re-joining is the
//! only resynchronization path.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wire::{ClientEvent, ClientRequest, Comment, ServerEvent, SharedProject};

use crate::config::Credentials;
use crate::connection::{Connection, Notice};
use crate::error::SessionError;

/// Change notification emitted to session subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A push event was applied to the local mirror.
    Applied(ServerEvent),
    /// The connection dropped; the mirror is kept but stale.
    ConnectionLost { reason: String },
    /// The connection came back. The mirror is stale until re-joined.
    Reconnected,
    /// Transient server-side error, not fatal to the session.
    Error { message: String },
}

/// Join lifecycle of the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unjoined,
    Joining,
    Joined,
}

struct SessionState {
    phase: Phase,
    project: Option<SharedProject>,
}

/// Owns the local mirror of one joined collaboration session.
///
/// Exactly one project may be joined at a time; joining another replaces
/// the mirror wholesale. Constructed by the application root and shared by
/// reference — no implicit singletons.
pub struct SessionStore {
    connection: Connection,
    credentials: Credentials,
    state: Arc<Mutex<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    watcher: JoinHandle<()>,
}

impl SessionStore {
    /// Create a store bound to `connection` and spawn its push-event watcher.
    #[must_use]
    pub fn new(connection: Connection, credentials: Credentials) -> Self {
        let state = Arc::new(Mutex::new(SessionState {
            phase: Phase::Unjoined,
            project: None,
        }));
        let (events, _) = broadcast::channel(64);
        let watcher = tokio::spawn(watch_pushes(
            connection.subscribe(),
            Arc::clone(&state),
            events.clone(),
        ));

        Self { connection, credentials, state, events, watcher }
    }

    /// Subscribe to mirror change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the current mirror, if a project is joined.
    #[must_use]
    pub fn project(&self) -> Option<SharedProject> {
        self.lock_state().project.clone()
    }

    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.lock_state().phase == Phase::Joined
    }

    /// Join a project, connecting first if needed.
    ///
    /// On success the mirror is replaced wholesale with the server snapshot
    /// (participants and comments included). On failure any prior mirror is
    /// left untouched.
    ///
    /// # Errors
    ///
    /// [`SessionError::Connect`] if the implicit connect fails;
    /// [`SessionError::Request`] with the server's message if the join is
    /// rejected; [`SessionError::Snapshot`] if the acknowledgment carries no
    /// usable project.
    pub async fn join_project(&self, project_id: &str) -> Result<SharedProject, SessionError> {
        if !self.connection.is_connected() {
            self.connection.connect(self.credentials.clone()).await?;
        }

        {
            let mut state = self.lock_state();
            state.phase = Phase::Joining;
        }

        let result = self
            .connection
            .request(ClientRequest::JoinProject { project_id: project_id.to_owned() })
            .await;

        let mut state = self.lock_state();
        let fallback = prior_phase(&state);
        match result {
            Ok(value) => match serde_json::from_value::<SharedProject>(value) {
                Ok(project) => {
                    state.phase = Phase::Joined;
                    state.project = Some(project.clone());
                    Ok(project)
                }
                Err(error) => {
                    state.phase = fallback;
                    Err(SessionError::Snapshot(error))
                }
            },
            Err(error) => {
                state.phase = fallback;
                Err(error.into())
            }
        }
    }

    /// Leave the current session: best-effort leave notification (no ack
    /// awaited) and unconditional mirror clear. No-op when unjoined.
    pub fn leave_project(&self) {
        let project = {
            let mut state = self.lock_state();
            state.phase = Phase::Unjoined;
            state.project.take()
        };
        if let Some(project) = project {
            self.connection.send(ClientEvent::LeaveProject { project_id: project.id });
        }
    }

    /// Fire-and-forget cursor broadcast. This layer does not throttle;
    /// callers rate-limit as needed. Logged and dropped when unjoined.
    pub fn send_cursor_position(&self, x: f64, y: f64) {
        let Some(project_id) = self.joined_project_id() else {
            warn!("cursor position dropped: no active session");
            return;
        };
        self.connection.send(ClientEvent::CursorMove { project_id, x, y });
    }

    /// Request comment creation. The mirror gains the comment only when the
    /// `comment_added` push arrives (no optimistic insert).
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] / [`SessionError::NoActiveSession`]
    /// without any network send; [`SessionError::Request`] with the server's
    /// message on rejection.
    pub async fn add_comment(
        &self,
        content: impl Into<String>,
        video_timestamp: Option<f64>,
    ) -> Result<(), SessionError> {
        let project_id = self.require_session()?;
        self.connection
            .request(ClientRequest::AddComment {
                project_id,
                content: content.into(),
                video_timestamp,
            })
            .await?;
        Ok(())
    }

    /// Request a comment edit; applied locally via `comment_updated`.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::add_comment`].
    pub async fn update_comment(
        &self,
        comment_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), SessionError> {
        let project_id = self.require_session()?;
        self.connection
            .request(ClientRequest::UpdateComment {
                project_id,
                comment_id: comment_id.into(),
                content: content.into(),
            })
            .await?;
        Ok(())
    }

    /// Request comment deletion; applied locally via `comment_deleted`.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::add_comment`].
    pub async fn delete_comment(&self, comment_id: impl Into<String>) -> Result<(), SessionError> {
        let project_id = self.require_session()?;
        self.connection
            .request(ClientRequest::DeleteComment {
                project_id,
                comment_id: comment_id.into(),
            })
            .await?;
        Ok(())
    }

    /// Request marking a comment resolved; applied via `comment_updated`.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::add_comment`].
    pub async fn resolve_comment(&self, comment_id: impl Into<String>) -> Result<(), SessionError> {
        let project_id = self.require_session()?;
        self.connection
            .request(ClientRequest::ResolveComment {
                project_id,
                comment_id: comment_id.into(),
            })
            .await?;
        Ok(())
    }

    /// Request the advisory project lock. The `project_locked` push is the
    /// source of truth applied to the mirror, for the requester too.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::add_comment`].
    pub async fn lock_project(&self) -> Result<(), SessionError> {
        let project_id = self.require_session()?;
        self.connection
            .request(ClientRequest::LockProject { project_id })
            .await?;
        Ok(())
    }

    /// Release the advisory project lock; applied via `project_unlocked`.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::add_comment`].
    pub async fn unlock_project(&self) -> Result<(), SessionError> {
        let project_id = self.require_session()?;
        self.connection
            .request(ClientRequest::UnlockProject { project_id })
            .await?;
        Ok(())
    }

    fn require_session(&self) -> Result<String, SessionError> {
        if !self.connection.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.joined_project_id().ok_or(SessionError::NoActiveSession)
    }

    fn joined_project_id(&self) -> Option<String> {
        let state = self.lock_state();
        if state.phase != Phase::Joined {
            return None;
        }
        state.project.as_ref().map(|project| project.id.clone())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

fn prior_phase(state: &SessionState) -> Phase {
    if state.project.is_some() { Phase::Joined } else { Phase::Unjoined }
}

// =============================================================================
// PUSH APPLICATION
// =============================================================================

async fn watch_pushes(
    mut notices: broadcast::Receiver<Notice>,
    state: Arc<Mutex<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
) {
    loop {
        let notice = match notices.recv().await {
            Ok(notice) => notice,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "session watcher lagged behind connection notices");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        let event = match notice {
            Notice::Push(ServerEvent::Error { message }) => SessionEvent::Error { message },
            Notice::Push(event) => {
                {
                    let mut guard = state
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    if let Some(project) = guard.project.as_mut() {
                        apply(project, &event);
                    }
                }
                SessionEvent::Applied(event)
            }
            Notice::Disconnected { reason } => SessionEvent::ConnectionLost { reason },
            Notice::ReconnectExhausted { attempts } => SessionEvent::ConnectionLost {
                reason: format!("reconnect attempts exhausted after {attempts} tries"),
            },
            Notice::Reconnected => SessionEvent::Reconnected,
            Notice::Connected => continue,
        };
        let _ = events.send(event);
    }
}

/// Apply one push event to the project mirror. Used for the originator's
/// own acknowledged operations and for peer actions alike.
pub(crate) fn apply(project: &mut SharedProject, event: &ServerEvent) {
    match event {
        // Upsert by id: delivery is not guaranteed at-most-once, so a repeat
        // join must not duplicate the participant.
        ServerEvent::UserJoined(participant) => {
            match project
                .collaborators
                .iter_mut()
                .find(|existing| existing.id == participant.id)
            {
                Some(existing) => *existing = participant.clone(),
                None => project.collaborators.push(participant.clone()),
            }
        }
        ServerEvent::UserLeft { user_id } => {
            project.collaborators.retain(|participant| participant.id != *user_id);
        }
        ServerEvent::CursorMoved { user_id, x, y } => {
            if let Some(participant) = project
                .collaborators
                .iter_mut()
                .find(|participant| participant.id == *user_id)
            {
                participant.cursor = Some(wire::Cursor { x: *x, y: *y });
            } else {
                debug!(%user_id, "cursor move for unknown participant");
            }
        }
        ServerEvent::CommentAdded(comment) => project.comments.push(comment.clone()),
        ServerEvent::CommentUpdated(comment) => {
            if let Some(existing) = find_comment(&mut project.comments, &comment.id) {
                *existing = comment.clone();
            }
        }
        ServerEvent::CommentDeleted { comment_id } => {
            project.comments.retain(|comment| comment.id != *comment_id);
        }
        ServerEvent::ProjectUpdated(update) => {
            project.updates.push(update.clone());
            project.version += 1;
        }
        // Lock flag and holder change together, in one state write.
        ServerEvent::ProjectLocked { username, .. } => {
            project.locked = true;
            project.locked_by = Some(username.clone());
        }
        ServerEvent::ProjectUnlocked => {
            project.locked = false;
            project.locked_by = None;
        }
        // Processing traffic belongs to the job watcher, errors to the
        // session-event mapping above.
        ServerEvent::Processing(_) | ServerEvent::ViralScore { .. } | ServerEvent::Error { .. } => {}
    }
}

fn find_comment<'a>(comments: &'a mut [Comment], id: &str) -> Option<&'a mut Comment> {
    comments.iter_mut().find(|comment| comment.id == id)
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
