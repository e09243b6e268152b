//! Error taxonomy for the session layer.
//!
//! Errors carry human-readable text rather than structured codes; consumers
//! display the message as-is. Connection-lifecycle failures are retried up
//! to the reconnect cap before surfacing; per-operation failures are never
//! retried automatically.

/// The dial + authenticate handshake failed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),
    #[error("websocket connect failed: {0}")]
    Transport(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("timed out waiting for connection handshake")]
    Timeout,
    #[error("connection closed during handshake")]
    Closed,
}

/// A request/ack operation failed.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Attempted while disconnected; nothing was sent.
    #[error("not connected to realtime server")]
    NotConnected,
    /// The connection dropped while the request was pending.
    #[error("disconnected before a reply arrived")]
    Disconnected,
    /// No terminal reply arrived within the request timeout.
    #[error("timed out waiting for server acknowledgment")]
    Timeout,
    /// The server acknowledged with an explicit failure.
    #[error("server rejected {event}: {message}")]
    Server { event: String, message: String },
    #[error("reply decode failed: {0}")]
    Codec(#[from] wire::WireError),
}

/// A session-store operation failed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Attempted while disconnected; nothing was sent.
    #[error("not connected to collaboration server")]
    NotConnected,
    /// Attempted without a joined project; nothing was sent.
    #[error("no active collaboration session")]
    NoActiveSession,
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Request(#[from] RequestError),
    /// The join acknowledgment did not contain a usable project snapshot.
    #[error("invalid project snapshot: {0}")]
    Snapshot(#[source] serde_json::Error),
}

/// Fetching a processing job status over HTTP failed.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("status request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("status endpoint returned HTTP {0}")]
    Status(u16),
}
