//! Error types for ringkv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Network Errors ===
    /// The peer could not be reached. This is the only failure signal the
    /// heartbeat monitors act on.
    #[error("Communication with {peer} failed: {reason}")]
    CommunicationFailure { peer: String, reason: String },

    // === Protocol Errors ===
    #[error("Protocol inconsistency: {0}")]
    ProtocolInconsistency(String),

    #[error("Invalid bootstrap entry {line:?}: {reason}")]
    InvalidBootstrapEntry { line: String, reason: String },

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Console Errors ===
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn communication(peer: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::CommunicationFailure {
            peer: peer.into(),
            reason: reason.to_string(),
        }
    }

    /// Is the remote peer unreachable?
    pub fn is_communication_failure(&self) -> bool {
        matches!(self, Error::CommunicationFailure { .. })
    }

    /// Does this error leave the prior state intact (logged and aborted)?
    pub fn is_protocol_inconsistency(&self) -> bool {
        matches!(
            self,
            Error::ProtocolInconsistency(_) | Error::InvalidBootstrapEntry { .. }
        )
    }

    /// Convert to HTTP status code for RPC responses
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            // the relaying node itself is up
            Error::CommunicationFailure { .. } => StatusCode::BAD_GATEWAY,
            Error::ProtocolInconsistency(_) => StatusCode::CONFLICT,
            Error::InvalidBootstrapEntry { .. }
            | Error::InvalidConfig(_)
            | Error::InvalidCommand(_)
            | Error::Json(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Rebuild an error reported by a remote node.
    ///
    /// Faults the remote hit while talking to a third node are surfaced as
    /// protocol inconsistencies: the remote itself answered, so it is alive.
    pub fn from_remote(status: axum::http::StatusCode, message: String) -> Self {
        use axum::http::StatusCode;
        match status {
            StatusCode::CONFLICT | StatusCode::BAD_GATEWAY => {
                Error::ProtocolInconsistency(message)
            }
            StatusCode::BAD_REQUEST => Error::InvalidCommand(message),
            _ => Error::Internal(message),
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}
