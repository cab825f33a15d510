//! Log metadata: tagged `(id, bytes)` entries fixed at creation.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use super::crypto::{CryptoError, PublicKey};
use super::datum::Timestamp;
use super::error::CoreError;
use super::name::InternalName;

/// Four-character metadata tag packed into a u32.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetadataId(pub u32);

impl MetadataId {
    pub const XID: MetadataId = MetadataId(0x0058_4944);
    pub const OWNER_PUBKEY: MetadataId = MetadataId(0x4F50_5542);
    pub const WRITER_PUBKEY: MetadataId = MetadataId(0x5750_5542);
    pub const CTIME: MetadataId = MetadataId(0x0043_544D);
    pub const EXPIRE: MetadataId = MetadataId(0x0058_544D);
    pub const CREATOR: MetadataId = MetadataId(0x0043_4944);
    pub const SYNTAX: MetadataId = MetadataId(0x0053_594E);
    pub const LOCATION: MetadataId = MetadataId(0x004C_4F43);
    pub const NONCE: MetadataId = MetadataId(0x006E_6F6E);

    pub fn label(self) -> String {
        let text: String = self
            .0
            .to_be_bytes()
            .iter()
            .filter(|b| **b != 0)
            .map(|b| if b.is_ascii_graphic() { *b as char } else { '?' })
            .collect();
        if text.is_empty() {
            format!("{:#010x}", self.0)
        } else {
            text
        }
    }
}

impl fmt::Debug for MetadataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetadataId({})", self.label())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogMetadata {
    entries: BTreeMap<MetadataId, Bytes>,
}

impl LogMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for a fresh log: external id, creation time, creator and
    /// an optional writer key.
    pub fn for_new_log(
        xid: Option<&str>,
        creator: &str,
        writer: Option<&PublicKey>,
    ) -> Self {
        let mut md = Self::new();
        if let Some(xid) = xid {
            md.insert(MetadataId::XID, Bytes::copy_from_slice(xid.as_bytes()));
        }
        md.insert(
            MetadataId::CREATOR,
            Bytes::copy_from_slice(creator.as_bytes()),
        );
        let now = Timestamp::now();
        md.insert(
            MetadataId::CTIME,
            Bytes::copy_from_slice(now.to_string().as_bytes()),
        );
        if let Some(key) = writer {
            md.insert(MetadataId::WRITER_PUBKEY, Bytes::from(key.to_metadata_bytes()));
        }
        let nonce: u64 = rand::random();
        md.insert(MetadataId::NONCE, Bytes::copy_from_slice(&nonce.to_be_bytes()));
        md
    }

    pub fn insert(&mut self, id: MetadataId, value: Bytes) -> Option<Bytes> {
        self.entries.insert(id, value)
    }

    pub fn get(&self, id: MetadataId) -> Option<&Bytes> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetadataId, &Bytes)> {
        self.entries.iter().map(|(id, value)| (*id, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn xid(&self) -> Option<&str> {
        self.text(MetadataId::XID)
    }

    pub fn creator(&self) -> Option<&str> {
        self.text(MetadataId::CREATOR)
    }

    /// Writer key, if the log restricts writers.
    pub fn writer_key(&self) -> Result<Option<PublicKey>, CryptoError> {
        self.get(MetadataId::WRITER_PUBKEY)
            .map(|raw| PublicKey::from_metadata_bytes(raw))
            .transpose()
    }

    /// Stable byte encoding: count, then `id ‖ len ‖ value` in id order.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for (id, value) in &self.entries {
            out.extend_from_slice(&id.0.to_be_bytes());
            out.extend_from_slice(&(value.len() as u32).to_be_bytes());
            out.extend_from_slice(value);
        }
        out
    }

    /// Name of a log created without an explicit name.
    pub fn derive_name(&self) -> InternalName {
        let digest = Sha256::digest(self.canonical_bytes());
        let mut buf = [0u8; 32];
        buf.copy_from_slice(&digest);
        InternalName::from_bytes(buf)
    }

    fn text(&self, id: MetadataId) -> Option<&str> {
        self.get(id).and_then(|raw| std::str::from_utf8(raw).ok())
    }

    pub fn require_text(&self, id: MetadataId) -> Result<&str, CoreError> {
        let raw = self.get(id).ok_or_else(|| CoreError::InvalidMetadata {
            id: id.label(),
            reason: "missing".into(),
        })?;
        std::str::from_utf8(raw).map_err(|e| CoreError::InvalidMetadata {
            id: id.label(),
            reason: e.to_string(),
        })
    }
}
