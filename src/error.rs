//! Error types shared by the transport, the session controller and the journal.

use reqwest::StatusCode;
use thiserror::Error;

use crate::models::{SessionId, SessionStatus};

/// Failures below the protocol level: the request never produced a usable,
/// well-formed response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("service unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("unauthorized: credential rejected by the service")]
    Unauthorized,

    #[error("malformed response (HTTP {status}): {reason}")]
    Decode { status: StatusCode, reason: String },

    #[error("failed to write download: {0}")]
    Sink(#[from] std::io::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e)
        } else if e.is_decode() {
            Self::Decode {
                status: e.status().unwrap_or(StatusCode::OK),
                reason: e.to_string(),
            }
        } else {
            Self::Unreachable(e)
        }
    }
}

/// Errors surfaced by every public operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad local input. Never reaches the network.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Well-formed non-2xx response; `message` is the server's, verbatim.
    #[error("rejected by service (HTTP {status}): {message}")]
    RemoteRejection { status: StatusCode, message: String },

    /// The response decoded but broke an invariant the client relies on.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The session state machine does not allow the operation right now.
    #[error("cannot {operation} session {session} while it is {status}")]
    InvalidState {
        session: SessionId,
        operation: &'static str,
        status: SessionStatus,
    },

    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.into())
    }
}

impl Error {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Server message for remote rejections.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::RemoteRejection { message, .. } => Some(message),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
