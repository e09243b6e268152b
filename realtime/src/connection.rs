//! WebSocket connection manager.
//!
//! ARCHITECTURE
//! ============
//! A [`Connection`] is a cheap cloneable handle around shared state. Calling
//! `connect` dials the server, runs the `authenticate` handshake, and spawns
//! a driver task that owns the socket. The driver pumps outbound envelopes
//! from an mpsc channel into the sink and routes inbound envelopes:
//! terminal replies resolve entries in the pending-request table (keyed by
//! envelope id, matched via `parent_id`), pushes are parsed into typed
//! [`ServerEvent`]s and broadcast to subscribers as [`Notice`]s.
//!
//! LIFECYCLE
//! =========
//! 1. `connect` → dial + authenticate within `connect_timeout`
//! 2. driver select loop: outbound channel ↔ socket
//! 3. abnormal close → fail pending, notify, reconnect up to the cap with
//!    full re-authentication per attempt
//! 4. cap exhausted → `ReconnectExhausted` once, driver exits; only a fresh
//!    `connect` resumes
//! 5. explicit `disconnect` → abort driver, fail pending, no reconnect

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use uuid::Uuid;
use wire::{ClientEvent, ClientRequest, Envelope, ServerEvent, Status};

use crate::config::{ClientConfig, Credentials};
use crate::error::{ConnectError, RequestError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = HashMap<Uuid, oneshot::Sender<Result<Value, RequestError>>>;

/// Transport-level state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Notification broadcast to connection subscribers.
///
/// This is the typed replacement for string-keyed `on`/`off` registration:
/// subscribers hold a [`broadcast::Receiver`] and deregister by dropping it.
#[derive(Debug, Clone)]
pub enum Notice {
    /// An unsolicited server push.
    Push(ServerEvent),
    /// The handshake completed after an explicit `connect` call.
    Connected,
    /// The link dropped abnormally; automatic reconnection may follow.
    /// Events that occur while disconnected are lost.
    Disconnected { reason: String },
    /// Automatic reconnection succeeded. Joined state is stale; consumers
    /// should refresh by re-joining.
    Reconnected,
    /// All automatic reconnect attempts failed. Emitted exactly once per
    /// outage; a fresh `connect` call is required to resume.
    ReconnectExhausted { attempts: u32 },
}

/// Point-in-time connection summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub url: String,
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
}

/// What a `connect` call should do, decided under the state lock. The
/// lock is released before any of these are acted on.
enum ConnectPlan {
    AlreadyConnected,
    WaitForOther,
    Dial { epoch: u64 },
}

struct ConnState {
    status: ConnectionStatus,
    reconnect_attempts: u32,
    credentials: Option<Credentials>,
    outbound: Option<mpsc::UnboundedSender<Envelope>>,
    pending: Pending,
    driver: Option<JoinHandle<()>>,
    /// Bumped on every install/teardown so a stale driver cannot clobber
    /// state owned by a newer connection.
    epoch: u64,
}

struct Shared {
    config: ClientConfig,
    state: Mutex<ConnState>,
    notices: broadcast::Sender<Notice>,
}

/// Handle to a single logical realtime connection.
///
/// At most one live socket exists per handle; `connect` is idempotent while
/// connected. Clones share the same underlying connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(ConnState {
                    status: ConnectionStatus::Disconnected,
                    reconnect_attempts: 0,
                    credentials: None,
                    outbound: None,
                    pending: Pending::new(),
                    driver: None,
                    epoch: 0,
                }),
                notices,
            }),
        }
    }

    /// Dial the server and run the `authenticate` handshake.
    ///
    /// Idempotent while connected. On success the reconnect counter resets
    /// to zero and a driver task takes ownership of the socket.
    ///
    /// # Errors
    ///
    /// Rejects with [`ConnectError`] if the transport errors before opening
    /// or the handshake does not complete within `connect_timeout`.
    /// [`ConnectError::Closed`] means a `disconnect` call raced the
    /// handshake and won.
    pub async fn connect(&self, credentials: Credentials) -> Result<(), ConnectError> {
        let plan = {
            let mut state = self.lock_state();
            match state.status {
                ConnectionStatus::Connected => ConnectPlan::AlreadyConnected,
                // Another caller is mid-handshake; wait for it instead of
                // dialing a second socket.
                ConnectionStatus::Connecting => ConnectPlan::WaitForOther,
                ConnectionStatus::Disconnected => {
                    state.status = ConnectionStatus::Connecting;
                    state.credentials = Some(credentials.clone());
                    ConnectPlan::Dial { epoch: state.epoch }
                }
            }
        };

        let epoch = match plan {
            ConnectPlan::AlreadyConnected => return Ok(()),
            ConnectPlan::WaitForOther => return self.await_other_connect().await,
            ConnectPlan::Dial { epoch } => epoch,
        };

        match open_socket(&self.shared.config, &credentials).await {
            Ok(stream) => {
                // A disconnect() issued during the handshake bumps the
                // epoch; it wins, and the fresh socket is dropped.
                if !self.install(stream, epoch) {
                    return Err(ConnectError::Closed);
                }
                let _ = self.shared.notices.send(Notice::Connected);
                info!(url = %self.shared.config.url, "realtime connected");
                Ok(())
            }
            Err(error) => {
                let mut state = self.lock_state();
                if state.epoch == epoch && state.status == ConnectionStatus::Connecting {
                    state.status = ConnectionStatus::Disconnected;
                }
                Err(error)
            }
        }
    }

    /// Tear down the connection unconditionally.
    ///
    /// Safe to call when already disconnected. Every pending request is
    /// rejected with [`RequestError::Disconnected`]; no automatic
    /// reconnection follows an explicit disconnect.
    pub fn disconnect(&self) {
        let (driver, pending) = {
            let mut state = self.lock_state();
            state.epoch += 1;
            state.status = ConnectionStatus::Disconnected;
            state.reconnect_attempts = 0;
            state.outbound = None;
            state.credentials = None;
            let driver = state.driver.take();
            let pending = std::mem::take(&mut state.pending);
            (driver, pending)
        };

        if let Some(handle) = driver {
            handle.abort();
        }
        fail_pending(pending);
        info!("realtime disconnected");
    }

    /// Fire-and-forget emission. No-ops with a warning when not connected;
    /// never queues.
    pub fn send(&self, event: ClientEvent) {
        let state = self.lock_state();
        let connected = state.status == ConnectionStatus::Connected;
        match (&state.outbound, connected) {
            (Some(outbound), true) => {
                let _ = outbound.send(event.into_envelope());
            }
            _ => warn!(event = event.name(), "cannot send: not connected"),
        }
    }

    /// Emit a request and await its terminal done/error reply.
    ///
    /// # Errors
    ///
    /// [`RequestError::NotConnected`] without any network send when the
    /// socket is down; [`RequestError::Server`] when the server replies with
    /// an error; [`RequestError::Timeout`] after `request_timeout`;
    /// [`RequestError::Disconnected`] if the link drops while pending.
    pub async fn request(&self, request: ClientRequest) -> Result<Value, RequestError> {
        self.request_with_timeout(request, self.shared.config.request_timeout)
            .await
    }

    /// Round-trip latency probe over the request/ack path (5s deadline).
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Connection::request`].
    pub async fn ping(&self) -> Result<Duration, RequestError> {
        let started = tokio::time::Instant::now();
        self.request_with_timeout(
            ClientRequest::Ping { ts: now_ms() },
            Duration::from_secs(5),
        )
        .await?;
        Ok(started.elapsed())
    }

    /// Subscribe to pushes and lifecycle notices. Multiple subscribers are
    /// supported; drop the receiver to deregister.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.lock_state().status
    }

    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock_state().reconnect_attempts
    }

    #[must_use]
    pub fn info(&self) -> ConnectionInfo {
        let state = self.lock_state();
        ConnectionInfo {
            url: self.shared.config.url.clone(),
            status: state.status,
            reconnect_attempts: state.reconnect_attempts,
        }
    }

    /// Poll until connected or `deadline` elapses. Returns whether the
    /// connection came up.
    pub async fn wait_until_connected(&self, deadline: Duration) -> bool {
        let poll = async {
            loop {
                if self.is_connected() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        timeout(deadline, poll).await.is_ok()
    }

    async fn await_other_connect(&self) -> Result<(), ConnectError> {
        if self
            .wait_until_connected(self.shared.config.connect_timeout)
            .await
        {
            Ok(())
        } else {
            Err(ConnectError::Timeout)
        }
    }

    async fn request_with_timeout(
        &self,
        request: ClientRequest,
        deadline: Duration,
    ) -> Result<Value, RequestError> {
        let envelope = request.into_envelope();
        let id = envelope.id;
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.lock_state();
            if state.status != ConnectionStatus::Connected {
                return Err(RequestError::NotConnected);
            }
            let Some(outbound) = state.outbound.clone() else {
                return Err(RequestError::NotConnected);
            };
            state.pending.insert(id, tx);
            if outbound.send(envelope).is_err() {
                state.pending.remove(&id);
                return Err(RequestError::NotConnected);
            }
        }

        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without a reply: the link went down.
            Ok(Err(_)) => Err(RequestError::Disconnected),
            Err(_) => {
                self.lock_state().pending.remove(&id);
                Err(RequestError::Timeout)
            }
        }
    }

    /// Hand a freshly-opened socket to a new driver task. Returns `false`
    /// without installing when the epoch moved since the dial began, which
    /// means a `disconnect()` raced the handshake.
    fn install(&self, stream: WsStream, expected_epoch: u64) -> bool {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::clone(&self.shared);

        let mut state = self.lock_state();
        if state.epoch != expected_epoch {
            return false;
        }
        state.epoch += 1;
        let epoch = state.epoch;
        state.status = ConnectionStatus::Connected;
        state.reconnect_attempts = 0;
        state.outbound = Some(outbound_tx);
        state.driver = Some(tokio::spawn(drive(shared, stream, outbound_rx, epoch)));
        true
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConnState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.info();
        f.debug_struct("Connection")
            .field("url", &info.url)
            .field("status", &info.status)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Dial the endpoint and send the `authenticate` envelope, bounded by the
/// configured handshake window.
async fn open_socket(
    config: &ClientConfig,
    credentials: &Credentials,
) -> Result<WsStream, ConnectError> {
    if !config.url.starts_with("ws://") && !config.url.starts_with("wss://") {
        return Err(ConnectError::InvalidUrl(config.url.clone()));
    }

    let handshake = async {
        let (mut stream, _response) = connect_async(&config.url)
            .await
            .map_err(|error| ConnectError::Transport(Box::new(error)))?;

        let auth = ClientEvent::Authenticate {
            token: credentials.token.clone(),
            user_id: credentials.user_id.clone(),
            username: credentials.username.clone(),
        }
        .into_envelope();
        let text = wire::encode_envelope(&auth).map_err(|_| ConnectError::Closed)?;
        stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| ConnectError::Transport(Box::new(error)))?;

        Ok(stream)
    };

    timeout(config.connect_timeout, handshake)
        .await
        .map_err(|_| ConnectError::Timeout)?
}

// =============================================================================
// DRIVER
// =============================================================================

enum CloseReason {
    /// Outbound channel dropped: the handle tore the connection down.
    Shutdown,
    /// The socket closed or errored underneath us.
    Abnormal(String),
}

async fn drive(
    shared: Arc<Shared>,
    mut stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    epoch: u64,
) {
    loop {
        let reason = match run_socket(&shared, &mut stream, &mut outbound).await {
            CloseReason::Shutdown => return,
            CloseReason::Abnormal(reason) => reason,
        };

        warn!(%reason, "realtime connection lost");
        let credentials = {
            let mut state = lock_shared(&shared);
            if state.epoch != epoch {
                return;
            }
            state.status = ConnectionStatus::Disconnected;
            let pending = std::mem::take(&mut state.pending);
            let credentials = state.credentials.clone();
            drop(state);
            fail_pending(pending);
            credentials
        };
        let _ = shared.notices.send(Notice::Disconnected { reason });
        let Some(credentials) = credentials else {
            return;
        };

        match reconnect(&shared, &credentials, epoch).await {
            Some(new_stream) => stream = new_stream,
            None => return,
        }
    }
}

/// Pump the socket until it closes. Inbound replies resolve pending
/// requests; pushes are broadcast to subscribers.
async fn run_socket(
    shared: &Arc<Shared>,
    stream: &mut WsStream,
    outbound: &mut mpsc::UnboundedReceiver<Envelope>,
) -> CloseReason {
    loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                let Some(envelope) = outgoing else {
                    return CloseReason::Shutdown;
                };
                let Ok(text) = wire::encode_envelope(&envelope) else {
                    continue;
                };
                if let Err(error) = stream.send(Message::Text(text.into())).await {
                    return CloseReason::Abnormal(error.to_string());
                }
            }
            incoming = stream.next() => {
                match incoming {
                    None => return CloseReason::Abnormal("stream ended".to_owned()),
                    Some(Err(error)) => return CloseReason::Abnormal(error.to_string()),
                    Some(Ok(Message::Text(text))) => route_inbound(shared, text.as_str()),
                    Some(Ok(Message::Close(_))) => {
                        return CloseReason::Abnormal("server closed the connection".to_owned());
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn route_inbound(shared: &Arc<Shared>, text: &str) {
    let envelope = match wire::decode_envelope(text) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(%error, "dropping undecodable inbound frame");
            return;
        }
    };

    if let Some(parent_id) = envelope.parent_id {
        resolve_reply(shared, parent_id, &envelope);
        return;
    }

    match ServerEvent::parse(&envelope) {
        Ok(event) => {
            let _ = shared.notices.send(Notice::Push(event));
        }
        Err(error) => warn!(event = %envelope.event, %error, "dropping unrecognized push"),
    }
}

fn resolve_reply(shared: &Arc<Shared>, parent_id: Uuid, envelope: &Envelope) {
    if !envelope.status.is_terminal() {
        debug!(event = %envelope.event, "ignoring non-terminal reply");
        return;
    }

    let waiter = lock_shared(shared).pending.remove(&parent_id);
    let Some(waiter) = waiter else {
        // Timed out or torn down before the reply arrived.
        debug!(event = %envelope.event, "reply for unknown request");
        return;
    };

    let result = if envelope.status == Status::Done {
        Ok(envelope.data.clone())
    } else {
        Err(RequestError::Server {
            event: envelope.event.clone(),
            message: envelope
                .error_message()
                .unwrap_or("unknown server error")
                .to_owned(),
        })
    };
    let _ = waiter.send(result);
}

/// Bounded reconnect loop: fixed delay, full re-authentication per attempt.
/// Returns the new socket, or `None` once the cap is exhausted (after
/// emitting `ReconnectExhausted` exactly once).
async fn reconnect(
    shared: &Arc<Shared>,
    credentials: &Credentials,
    epoch: u64,
) -> Option<WsStream> {
    let max_attempts = shared.config.reconnect_max_attempts;

    for attempt in 1..=max_attempts {
        tokio::time::sleep(shared.config.reconnect_delay).await;
        {
            let mut state = lock_shared(shared);
            if state.epoch != epoch {
                return None;
            }
            state.reconnect_attempts = attempt;
        }
        info!(attempt, max_attempts, "attempting reconnect");

        match open_socket(&shared.config, credentials).await {
            Ok(stream) => {
                let mut state = lock_shared(shared);
                if state.epoch != epoch {
                    return None;
                }
                state.status = ConnectionStatus::Connected;
                state.reconnect_attempts = 0;
                drop(state);
                let _ = shared.notices.send(Notice::Reconnected);
                info!("reconnected");
                return Some(stream);
            }
            Err(error) => warn!(attempt, %error, "reconnect attempt failed"),
        }
    }

    let mut state = lock_shared(shared);
    if state.epoch != epoch {
        return None;
    }
    state.outbound = None;
    state.driver = None;
    drop(state);
    let _ = shared.notices.send(Notice::ReconnectExhausted { attempts: max_attempts });
    warn!(max_attempts, "reconnect attempts exhausted; explicit connect required");
    None
}

fn fail_pending(pending: Pending) {
    for (_, waiter) in pending {
        let _ = waiter.send(Err(RequestError::Disconnected));
    }
}

fn lock_shared(shared: &Arc<Shared>) -> std::sync::MutexGuard<'_, ConnState> {
    shared
        .state
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn now_ms() -> i64 {
    let Ok(dur) = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
