//! Error types for push client operations

use std::fmt;

use thiserror::Error;

use pushline_core::ProtocolError;

/// Result type alias for push client operations
pub type Result<T> = std::result::Result<T, PushClientError>;

/// Flavor of a terminal server-side stream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// `ERROR` line: the server refused or aborted the session.
    Refused,
    /// `SYNC ERROR` line: the server lost synchronization with the session.
    ///
    /// The protocol expects a new session plus re-subscription of every
    /// active table at this point; that recovery is an extension point and
    /// is not performed automatically (see DESIGN.md).
    OutOfSync,
    /// `END` line: the session was closed by the peer.
    ClosedByPeer,
}

impl fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerErrorKind::Refused => f.write_str("server error"),
            ServerErrorKind::OutOfSync => f.write_str("session out of sync"),
            ServerErrorKind::ClosedByPeer => f.write_str("connection closed by the server"),
        }
    }
}

/// Errors that can occur during push client operations
#[derive(Debug, Error)]
pub enum PushClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The server answered a connect or bind with something other than the
    /// success marker; `lines` carries the full refusal as received
    #[error("Handshake refused by server: {}", lines.join(" / "))]
    Handshake {
        /// Every line the server sent back, first line included
        lines: Vec<String>,
    },

    /// The stream connection ended without a terminal protocol message
    #[error("Stream connection lost unexpectedly")]
    StreamTerminated,

    /// The server terminated the session with an explicit stream message
    #[error("{kind}: {detail}")]
    Server {
        /// Which terminal message was received
        kind: ServerErrorKind,
        /// Remainder of the terminal line, may be empty
        detail: String,
    },

    /// Transport failure while sending a control request
    #[error("Control request failed: {0}")]
    ControlRequest(#[source] reqwest::Error),

    /// Control endpoint answered with a non-success HTTP status
    #[error("Control endpoint returned HTTP {0}")]
    ControlStatus(u16),

    /// Operation on a subscription key that is not registered
    #[error("No subscription registered under key {0}")]
    UnknownSubscription(u64),

    /// Data line referencing a table key that is not registered
    #[error("Data line for unregistered table {0}")]
    UnknownTable(u64),

    /// Operation requires an established session
    #[error("No active session")]
    NoSession,

    /// Malformed wire message
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
