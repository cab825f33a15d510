//! Tools built on the client: thin drivers over open/read/append/subscribe.
//!
//! Every tool reports failures as an [`AppError`] tagged with the phase
//! that failed, which picks the process exit code.

pub mod append;
pub mod clone;
pub mod create;
pub mod delete;
pub mod mirror;
pub mod name;
pub mod read;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::client::{ClientError, GdpClient};
use crate::core::{ErrorKind, InternalName, SigningKeyPair, Status};
use crate::error::{Effect, Transience};

pub use append::{AppendReport, append_payloads};
pub use clone::clone_log;
pub use create::{CreateRequest, Created, create_log};
pub use delete::delete_log;
pub use mirror::{MirrorOptions, MirrorReport, mirror};
pub use name::{NameInfo, inspect_name};
pub use read::{ReadRange, SubscriptionEnd, follow, read_range};

/// Where a tool was when it failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Usage,
    Init,
    Open,
    Create,
    Operation,
    Delete,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Usage => "usage",
            Phase::Init => "init",
            Phase::Open => "open",
            Phase::Create => "create",
            Phase::Operation => "operation",
            Phase::Delete => "delete",
        }
    }

    /// sysexits-style code for this phase.
    pub fn exit_code(self) -> i32 {
        match self {
            Phase::Usage => 64,
            Phase::Open => 66,
            Phase::Init => 69,
            Phase::Operation => 70,
            Phase::Create => 73,
            Phase::Delete => 77,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("{phase} failed: {status}")]
pub struct AppError {
    pub phase: Phase,
    pub status: Status,
}

impl AppError {
    pub fn new(phase: Phase, status: Status) -> Self {
        Self { phase, status }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(Phase::Usage, Status::new(ErrorKind::BadNameSyntax, message))
    }

    pub fn kind(&self) -> ErrorKind {
        self.status.kind
    }

    pub fn transience(&self) -> Transience {
        self.status.transience()
    }

    pub fn effect(&self) -> Effect {
        match self.phase {
            Phase::Operation | Phase::Create | Phase::Delete => Effect::Unknown,
            Phase::Usage | Phase::Init | Phase::Open => Effect::None,
        }
    }

    /// Permission failures exit 77 whatever the phase.
    pub fn exit_code(&self) -> i32 {
        if self.status.kind == ErrorKind::PermissionDenied {
            return 77;
        }
        self.phase.exit_code()
    }
}

/// Attach a phase to a client result.
pub trait PhaseExt<T> {
    fn phase(self, phase: Phase) -> Result<T, AppError>;
}

impl<T> PhaseExt<T> for Result<T, ClientError> {
    fn phase(self, phase: Phase) -> Result<T, AppError> {
        self.map_err(|err| AppError::new(phase, err.to_status()))
    }
}

/// Resolve a printable or human name. Malformed input is a usage error;
/// directory trouble is an init error.
pub fn resolve_name(client: &GdpClient, raw: &str) -> Result<InternalName, AppError> {
    client.parse_external(raw).map_err(|err| {
        let phase = match err.kind() {
            ErrorKind::BadNameSyntax => Phase::Usage,
            _ => Phase::Init,
        };
        AppError::new(phase, err.to_status())
    })
}

pub fn load_signer(path: &Path) -> Result<Arc<SigningKeyPair>, AppError> {
    SigningKeyPair::load(path)
        .map(Arc::new)
        .map_err(|err| AppError::new(Phase::Init, ClientError::from(err).to_status()))
}
