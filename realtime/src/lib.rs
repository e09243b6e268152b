//! Client-side realtime session layer for ReelRoom.
//!
//! ARCHITECTURE
//! ============
//! Three cooperating pieces, wired together by the application root:
//!
//! - [`Connection`] — the WebSocket lifecycle: dial + authenticate,
//!   request/ack correlation, typed push dispatch, bounded automatic
//!   reconnection.
//! - [`SessionStore`] — the local mirror of one joined shared project
//!   (participants, comments, update log, advisory lock). The mirror
//!   mutates only in response to server pushes.
//! - [`ProcessingWatcher`] / [`poll_status`] — job status watchers over
//!   the push path and a polling HTTP fallback.
//!
//! Nothing here is a singleton: every piece takes its collaborators as
//! constructor arguments, so tests and multi-account tooling can run
//! several independent stacks in one process.

pub mod config;
pub mod connection;
pub mod error;
pub mod processing;
pub mod session;

pub use config::{ClientConfig, Credentials};
pub use connection::{Connection, ConnectionInfo, ConnectionStatus, Notice};
pub use error::{ConnectError, PollError, RequestError, SessionError};
pub use processing::{HttpStatusSource, ProcessingWatcher, StatusSource, poll_status};
pub use session::{SessionEvent, SessionStore};
