//! Client configuration and identity.

use std::time::Duration;

/// Identity presented during the post-open `authenticate` handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub username: String,
    /// Opaque auth token; validated server-side.
    pub token: String,
}

impl Credentials {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self { user_id: user_id.into(), username: username.into(), token: token.into() }
    }
}

/// Tunables for one [`Connection`](crate::Connection).
///
/// Constructed once by the application root and handed to the connection;
/// there are no process-wide defaults read from the environment here.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, `ws://` or `wss://`.
    pub url: String,
    /// Deadline for the dial + authenticate handshake.
    pub connect_timeout: Duration,
    /// Client-side deadline for request/ack operations.
    pub request_timeout: Duration,
    /// Automatic reconnect attempts after an abnormal close.
    pub reconnect_max_attempts: u32,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Interval for the poll-based processing status watcher.
    pub poll_interval: Duration,
}

impl ClientConfig {
    /// Defaults for the primary realtime service (30s handshake window).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
            reconnect_max_attempts: 5,
            reconnect_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Defaults for collaboration sessions, which fail fast on handshake
    /// (10s window instead of 30s).
    pub fn session(url: impl Into<String>) -> Self {
        Self::new(url).with_connect_timeout(Duration::from_secs(10))
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect_policy(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.reconnect_max_attempts = max_attempts;
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
