//! Records (datums), their signing digest and chain hash.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use sha2::{Digest, Sha256};

use super::crypto::{CryptoError, PublicKey, SIGNATURE_LEN, SigningKeyPair};

const DIGEST_TAG: &[u8] = b"gdp-datum-v1";

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordHash(pub [u8; 32]);

impl RecordHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Some(Self(bytes.try_into().ok()?))
    }
}

impl fmt::Debug for RecordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordHash({})", hex::encode(self.0))
    }
}

/// Commit timestamp as seconds + nanoseconds since the epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
            nanos: since.subsec_nanos(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}

/// One log record.
///
/// `recno` is 0 until the server assigns it, except for chained appends and
/// forwarded records, which name their position up front.
#[derive(Clone, PartialEq, Eq)]
pub struct Datum {
    pub recno: u64,
    pub ts: Timestamp,
    pub payload: Bytes,
    pub prevhash: Option<RecordHash>,
    pub signature: Option<Bytes>,
}

impl Datum {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            recno: 0,
            ts: Timestamp::now(),
            payload: payload.into(),
            prevhash: None,
            signature: None,
        }
    }

    /// Pin the record behind `prevhash` at `recno`.
    pub fn chained(mut self, recno: u64, prevhash: RecordHash) -> Self {
        self.recno = recno;
        self.prevhash = Some(prevhash);
        self
    }

    pub fn is_chained(&self) -> bool {
        self.prevhash.is_some()
    }

    /// The bytes that get signed.
    ///
    /// Recno is only bound when chained; otherwise the server picks it.
    pub fn signing_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(DIGEST_TAG);
        hasher.update(self.ts.secs.to_be_bytes());
        hasher.update(self.ts.nanos.to_be_bytes());
        match &self.prevhash {
            Some(prev) => {
                hasher.update([1u8]);
                hasher.update(self.recno.to_be_bytes());
                hasher.update(prev.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(Sha256::digest(&self.payload));
        hasher.finalize().into()
    }

    /// Hash a committed record; the next chained record names it.
    pub fn record_hash(&self) -> RecordHash {
        let mut hasher = Sha256::new();
        hasher.update(self.recno.to_be_bytes());
        hasher.update(self.signing_digest());
        if let Some(sig) = &self.signature {
            hasher.update(sig);
        }
        RecordHash(hasher.finalize().into())
    }

    pub fn sign(&mut self, key: &SigningKeyPair) {
        let sig = key.sign(&self.signing_digest());
        self.signature = Some(Bytes::copy_from_slice(&sig));
    }

    pub fn verify(&self, key: &PublicKey) -> Result<(), CryptoError> {
        let Some(sig) = &self.signature else {
            return Err(CryptoError::SignatureInvalid);
        };
        if sig.len() != SIGNATURE_LEN {
            return Err(CryptoError::SignatureInvalid);
        }
        key.verify(&self.signing_digest(), sig)
    }
}

impl fmt::Debug for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datum")
            .field("recno", &self.recno)
            .field("ts", &self.ts)
            .field("payload_len", &self.payload.len())
            .field("prevhash", &self.prevhash)
            .field("signed", &self.signature.is_some())
            .finish()
    }
}
