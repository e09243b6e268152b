//! Processing-job status watchers.
//!
//! Two delivery paths cover the same job lifecycle:
//!
//! - **Push** ([`ProcessingWatcher`]): subscribe over the realtime
//!   connection and receive `processing_update` / `viral_score_update`
//!   pushes as they happen.
//! - **Poll** ([`poll_status`]): hit an HTTP status endpoint on a fixed
//!   interval, for callers without a live socket.
//!
//! Both paths normalize the stream the same way: progress never goes
//! backwards within a stage, and a terminal status (completed/failed)
//! freezes the watcher — later updates are discarded.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wire::{ClientRequest, ProcessingUpdate, ServerEvent};

use crate::connection::{Connection, Notice};
use crate::error::{PollError, RequestError};

// =============================================================================
// PUSH WATCHER
// =============================================================================

/// Live subscription to push-delivered processing updates for one project.
pub struct ProcessingWatcher {
    connection: Connection,
    project_id: String,
    updates: watch::Receiver<Option<ProcessingUpdate>>,
    task: JoinHandle<()>,
}

impl ProcessingWatcher {
    /// Subscribe to processing updates for `project_id`.
    ///
    /// # Errors
    ///
    /// Fails with [`RequestError`] if the subscribe request is rejected or
    /// the connection is down.
    pub async fn subscribe(
        connection: Connection,
        project_id: impl Into<String>,
    ) -> Result<Self, RequestError> {
        let project_id = project_id.into();
        connection
            .request(ClientRequest::SubscribeProcessing { project_id: project_id.clone() })
            .await?;

        let (tx, updates) = watch::channel(None);
        let task = tokio::spawn(watch_pushes(
            connection.subscribe(),
            project_id.clone(),
            tx,
        ));

        Ok(Self { connection, project_id, updates, task })
    }

    /// Most recent normalized update, if any has arrived.
    #[must_use]
    pub fn latest(&self) -> Option<ProcessingUpdate> {
        self.updates.borrow().clone()
    }

    /// Watch receiver over the normalized update stream.
    #[must_use]
    pub fn updates(&self) -> watch::Receiver<Option<ProcessingUpdate>> {
        self.updates.clone()
    }

    /// Stop watching: best-effort unsubscribe, then tear the task down.
    pub async fn stop(self) {
        self.task.abort();
        if self.connection.is_connected() {
            if let Err(error) = self
                .connection
                .request(ClientRequest::UnsubscribeProcessing {
                    project_id: self.project_id.clone(),
                })
                .await
            {
                debug!(%error, "processing unsubscribe failed");
            }
        }
    }
}

impl Drop for ProcessingWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn watch_pushes(
    mut notices: broadcast::Receiver<Notice>,
    project_id: String,
    tx: watch::Sender<Option<ProcessingUpdate>>,
) {
    let mut current: Option<ProcessingUpdate> = None;
    loop {
        let notice = match notices.recv().await {
            Ok(notice) => notice,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "processing watcher lagged behind pushes");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        match notice {
            Notice::Push(ServerEvent::Processing(update)) if update.project_id == project_id => {
                if merge_update(&mut current, update) {
                    if tx.send(current.clone()).is_err() {
                        return;
                    }
                }
            }
            Notice::Push(ServerEvent::ViralScore { project_id: id, viral_score })
                if id == project_id =>
            {
                if let Some(update) = current.as_mut() {
                    update.viral_score = Some(viral_score);
                    if tx.send(current.clone()).is_err() {
                        return;
                    }
                }
            }
            _ => {}
        }
    }
}

/// Fold `incoming` into the tracked state. Returns whether anything changed.
///
/// A terminal state is final; within an unchanged status, progress only
/// moves forward (out-of-order delivery must not make the bar jump back).
pub(crate) fn merge_update(
    current: &mut Option<ProcessingUpdate>,
    mut incoming: ProcessingUpdate,
) -> bool {
    match current {
        None => {
            *current = Some(incoming);
            true
        }
        Some(tracked) => {
            if tracked.status.is_terminal() {
                debug!(project_id = %tracked.project_id, "discarding update after terminal status");
                return false;
            }
            if incoming.status == tracked.status && incoming.progress < tracked.progress {
                incoming.progress = tracked.progress;
            }
            if incoming.viral_score.is_none() {
                incoming.viral_score = tracked.viral_score;
            }
            *tracked = incoming;
            true
        }
    }
}

// =============================================================================
// POLL WATCHER
// =============================================================================

/// Source of point-in-time processing status. The HTTP implementation is
/// [`HttpStatusSource`]; tests substitute their own.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, project_id: &str) -> Result<ProcessingUpdate, PollError>;
}

/// Fetches status from `GET {base_url}/api/projects/{id}/status`.
pub struct HttpStatusSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusSource {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch_status(&self, project_id: &str) -> Result<ProcessingUpdate, PollError> {
        let url = format!(
            "{}/api/projects/{project_id}/status",
            self.base_url.trim_end_matches('/'),
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(PollError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

/// Poll `source` for `project_id` on a fixed interval.
///
/// The returned channel yields each normalized update; the loop stops after
/// a terminal status, on the first fetch error (delivered before stopping),
/// or once the receiver is dropped.
pub fn poll_status<S>(
    source: S,
    project_id: impl Into<String>,
    interval: Duration,
) -> mpsc::UnboundedReceiver<Result<ProcessingUpdate, PollError>>
where
    S: StatusSource + 'static,
{
    let project_id = project_id.into();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut current: Option<ProcessingUpdate> = None;

        loop {
            ticker.tick().await;
            match source.fetch_status(&project_id).await {
                Ok(update) => {
                    let terminal = update.status.is_terminal();
                    if merge_update(&mut current, update) {
                        if let Some(update) = current.clone() {
                            if tx.send(Ok(update)).is_err() {
                                return;
                            }
                        }
                    }
                    if terminal {
                        return;
                    }
                }
                Err(error) => {
                    warn!(%project_id, %error, "status poll failed");
                    let _ = tx.send(Err(error));
                    return;
                }
            }
        }
    });

    rx
}

#[cfg(test)]
#[path = "processing_test.rs"]
mod tests;
