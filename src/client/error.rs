use std::time::Duration;

use thiserror::Error;

use crate::core::{CoreError, CryptoError, ErrorKind, ServerAddr, Status};
use crate::error::{Effect, Transience};
use crate::proto::WireError;

/// Errors surfaced by the client runtime and log handles.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    #[error(transparent)]
    Status(#[from] Status),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: ServerAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("handle is {state}, cannot {op}")]
    InvalidState {
        state: &'static str,
        op: &'static str,
    },
    #[error("log opened {mode} cannot {op}")]
    ModeDenied {
        mode: &'static str,
        op: &'static str,
    },
    #[error("unexpected reply to {op}: {reply}")]
    UnexpectedReply { op: &'static str, reply: String },
    #[error("client is shut down")]
    Shutdown,
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
    #[error("failed to spawn {what}: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Status(status) => status.kind,
            ClientError::Core(e) => e.kind(),
            ClientError::Crypto(e) => e.kind(),
            ClientError::Wire(e) => e.kind(),
            ClientError::Connect { .. } => ErrorKind::Unavailable,
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::InvalidState { .. } => ErrorKind::Internal,
            ClientError::ModeDenied { .. } => ErrorKind::PermissionDenied,
            ClientError::UnexpectedReply { .. } => ErrorKind::Protocol,
            ClientError::Shutdown => ErrorKind::Unavailable,
            ClientError::LockPoisoned(_) | ClientError::Spawn { .. } => ErrorKind::Internal,
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            // Unavailable, but no retry can outlive the runtime.
            ClientError::Shutdown => Transience::Permanent,
            _ => self.kind().transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            ClientError::Connect { .. }
            | ClientError::Core(_)
            | ClientError::ModeDenied { .. }
            | ClientError::InvalidState { .. } => Effect::None,
            ClientError::Status(status) => match status.kind {
                ErrorKind::Unavailable | ErrorKind::Timeout | ErrorKind::Internal => {
                    Effect::Unknown
                }
                _ => Effect::None,
            },
            _ => Effect::Unknown,
        }
    }

    /// Status form, for events and wire replies.
    pub fn to_status(&self) -> Status {
        match self {
            ClientError::Status(status) => status.clone(),
            other => Status::new(other.kind(), other.to_string()),
        }
    }
}
