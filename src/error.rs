use thiserror::Error;

use crate::apps::AppError;
use crate::client::ClientError;
use crate::config::ConfigError;
use crate::core::{CoreError, CryptoError, ErrorKind};
use crate::server::ServerError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What we know about side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred (locally or remotely).
    Some,
    /// We don't know if side effects occurred.
    Unknown,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Some => "some",
            Effect::Unknown => "unknown",
        }
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over the capability errors; each keeps its own taxonomy.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    App(#[from] AppError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Core(e) => e.kind(),
            Error::Crypto(e) => e.kind(),
            Error::Client(e) => e.kind(),
            Error::Server(e) => e.kind(),
            Error::Config(e) => e.kind(),
            Error::App(e) => e.kind(),
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            Error::Core(e) => e.transience(),
            Error::Crypto(e) => e.transience(),
            Error::Client(e) => e.transience(),
            Error::Server(e) => e.transience(),
            Error::Config(e) => e.transience(),
            Error::App(e) => e.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::Core(e) => e.effect(),
            Error::Crypto(_) => Effect::None,
            Error::Client(e) => e.effect(),
            Error::Server(e) => e.effect(),
            Error::Config(e) => e.effect(),
            Error::App(e) => e.effect(),
        }
    }
}
