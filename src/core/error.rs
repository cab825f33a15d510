//! Core capability errors and the structured status carried on the wire.
//!
//! `ErrorKind` is the closed taxonomy every layer reports in. `Status` is the
//! value form of a failure: it travels in NAK replies, in ERROR events, and out
//! of synchronous calls.

use std::fmt;

use thiserror::Error;

use crate::error::{Effect, Transience};

/// Failure kinds shared by client, server and wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Named log or record does not exist.
    NotFound,
    /// Signature or authorization failure.
    PermissionDenied,
    /// Transient network or server failure.
    Unavailable,
    /// Append would violate recno monotonicity.
    SequenceConflict,
    /// Requested recno outside the log's bounds.
    OutOfRange,
    /// Blocking wait exceeded its deadline.
    Timeout,
    /// Malformed external name.
    BadNameSyntax,
    /// A received record failed verification.
    SignatureInvalid,
    /// Malformed or unexpected wire traffic.
    Protocol,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::SequenceConflict => "sequence_conflict",
            ErrorKind::OutOfRange => "out_of_range",
            ErrorKind::Timeout => "timeout",
            ErrorKind::BadNameSyntax => "bad_name_syntax",
            ErrorKind::SignatureInvalid => "signature_invalid",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "not_found" => Some(ErrorKind::NotFound),
            "permission_denied" => Some(ErrorKind::PermissionDenied),
            "unavailable" => Some(ErrorKind::Unavailable),
            "sequence_conflict" => Some(ErrorKind::SequenceConflict),
            "out_of_range" => Some(ErrorKind::OutOfRange),
            "timeout" => Some(ErrorKind::Timeout),
            "bad_name_syntax" => Some(ErrorKind::BadNameSyntax),
            "signature_invalid" => Some(ErrorKind::SignatureInvalid),
            "protocol" => Some(ErrorKind::Protocol),
            "internal" => Some(ErrorKind::Internal),
            _ => None,
        }
    }

    /// Only `Unavailable` is worth a backoff retry.
    pub fn transience(self) -> Transience {
        match self {
            ErrorKind::Unavailable => Transience::Retryable,
            ErrorKind::Timeout | ErrorKind::Internal => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure status.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct Status {
    pub kind: ErrorKind,
    pub message: String,
}

impl Status {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn transience(&self) -> Transience {
        self.kind.transience()
    }
}

/// Invalid external name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("name `{raw}` is invalid: {reason}")]
pub struct InvalidName {
    pub raw: String,
    pub reason: String,
}

/// Invalid recno or range argument.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("recno {recno} out of range 1..={highest}")]
pub struct RecnoOutOfRange {
    pub recno: u64,
    pub highest: u64,
}

/// Canonical error enum for core capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidName(#[from] InvalidName),
    #[error(transparent)]
    RecnoOutOfRange(#[from] RecnoOutOfRange),
    #[error("metadata entry {id} is invalid: {reason}")]
    InvalidMetadata { id: String, reason: String },
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidName(_) => ErrorKind::BadNameSyntax,
            CoreError::RecnoOutOfRange(_) => ErrorKind::OutOfRange,
            CoreError::InvalidMetadata { .. } => ErrorKind::Protocol,
        }
    }

    pub fn transience(&self) -> Transience {
        // Core errors are pure input failures.
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

impl From<&CoreError> for Status {
    fn from(err: &CoreError) -> Self {
        Status::new(err.kind(), err.to_string())
    }
}
