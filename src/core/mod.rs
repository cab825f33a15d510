//! Core domain types for the GDP.
//!
//! Module hierarchy follows type dependency order:
//! - error: ErrorKind, Status, CoreError
//! - name: InternalName and name parsing
//! - crypto: signing keys and verification
//! - datum: records, digests, chain hashes
//! - metadata: log metadata entries
//! - limits: wire/decode limits

pub mod crypto;
pub mod datum;
pub mod error;
pub mod limits;
pub mod metadata;
pub mod name;

pub use crypto::{CryptoError, PublicKey, SIGNATURE_LEN, SigningKeyPair};
pub use datum::{Datum, RecordHash, Timestamp};
pub use error::{CoreError, ErrorKind, InvalidName, RecnoOutOfRange, Status};
pub use limits::{Limits, LimitsOverride};
pub use metadata::{LogMetadata, MetadataId};
pub use name::{InternalName, PRINTABLE_NAME_LEN, human_candidates, parse_name};

/// How a handle may use its log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpenMode {
    ReadOnly,
    AppendOnly,
    ReadAppend,
}

impl OpenMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OpenMode::ReadOnly => "ro",
            OpenMode::AppendOnly => "ao",
            OpenMode::ReadAppend => "ra",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ro" => Some(OpenMode::ReadOnly),
            "ao" => Some(OpenMode::AppendOnly),
            "ra" => Some(OpenMode::ReadAppend),
            _ => None,
        }
    }

    pub fn can_read(self) -> bool {
        !matches!(self, OpenMode::AppendOnly)
    }

    pub fn can_append(self) -> bool {
        !matches!(self, OpenMode::ReadOnly)
    }
}

/// Server-side view of a log's head.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct LogInfo {
    pub highest_recno: u64,
    pub last_hash: Option<RecordHash>,
}

/// A server address, `host:port`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddr(String);

impl ServerAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<std::net::SocketAddr> for ServerAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self(addr.to_string())
    }
}
