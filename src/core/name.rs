//! Internal names: the 256-bit routing key for logs and servers.
//!
//! Two external spellings exist:
//! - printable: exactly 43 chars of URL-safe base64 without padding
//! - human: an arbitrary dotted string, hashed with SHA-256

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use super::error::{CoreError, InvalidName};

pub const NAME_LEN: usize = 32;
pub const PRINTABLE_NAME_LEN: usize = 43;
pub const MAX_HUMAN_NAME_LEN: usize = 1024;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternalName([u8; NAME_LEN]);

impl InternalName {
    pub const ZERO: InternalName = InternalName([0u8; NAME_LEN]);

    pub fn from_bytes(bytes: [u8; NAME_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; NAME_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; NAME_LEN] {
        &self.0
    }

    /// The all-zero name is reserved.
    pub fn is_valid(&self) -> bool {
        self.0 != [0u8; NAME_LEN]
    }

    /// Strict parse of the printable form.
    pub fn parse_printable(raw: &str) -> Result<Self, CoreError> {
        if raw.len() != PRINTABLE_NAME_LEN {
            return Err(invalid(
                raw,
                format!(
                    "expected {PRINTABLE_NAME_LEN} characters, got {}",
                    raw.len()
                ),
            ));
        }
        if let Some(bad) = raw
            .bytes()
            .find(|b| !(b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_'))
        {
            return Err(invalid(
                raw,
                format!("character {:?} is not url-safe base64", bad as char),
            ));
        }
        let decoded = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|e| invalid(raw, e.to_string()))?;
        Self::from_slice(&decoded)
            .ok_or_else(|| invalid(raw, format!("decoded to {} bytes", decoded.len())))
    }

    /// Hash a human name. No prefixing happens here.
    pub fn from_human(human: &str) -> Result<Self, CoreError> {
        validate_human(human)?;
        let digest = Sha256::digest(human.as_bytes());
        let mut buf = [0u8; NAME_LEN];
        buf.copy_from_slice(&digest);
        Ok(Self(buf))
    }

    pub fn printable(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// `parse_name`: printable form only, pure and deterministic.
pub fn parse_name(external: &str) -> Result<InternalName, CoreError> {
    InternalName::parse_printable(external)
}

/// Candidate human spellings in lookup order.
///
/// A dotted name is tried as given first. An undotted name is tried under
/// the root (when set) and then bare.
pub fn human_candidates(human: &str, root: Option<&str>) -> Vec<String> {
    let mut out = Vec::with_capacity(2);
    if human.contains('.') {
        out.push(human.to_string());
        return out;
    }
    if let Some(root) = root.map(str::trim).filter(|r| !r.is_empty()) {
        out.push(format!("{}.{human}", root.trim_end_matches('.')));
    }
    out.push(human.to_string());
    out
}

fn validate_human(human: &str) -> Result<(), CoreError> {
    if human.is_empty() {
        return Err(invalid(human, "empty".to_string()));
    }
    if human.len() > MAX_HUMAN_NAME_LEN {
        return Err(invalid(
            human,
            format!("longer than {MAX_HUMAN_NAME_LEN} bytes"),
        ));
    }
    if human.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(invalid(
            human,
            "contains whitespace or control characters".to_string(),
        ));
    }
    Ok(())
}

fn invalid(raw: &str, reason: String) -> CoreError {
    InvalidName {
        raw: raw.to_string(),
        reason,
    }
    .into()
}

impl fmt::Display for InternalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.printable())
    }
}

impl fmt::Debug for InternalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InternalName({})", self.printable())
    }
}
