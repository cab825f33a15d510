//! Detached signatures over record digests.
//!
//! Ed25519 is the only algorithm; public keys travel with a one-byte
//! algorithm tag so logs created elsewhere fail with `UnknownAlgorithm`
//! rather than a confusing verify error.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use thiserror::Error;

use crate::core::ErrorKind;
use crate::error::Transience;

pub const SIGNATURE_LEN: usize = 64;
pub const ALG_ED25519: u8 = 1;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("unknown signature algorithm {0}")]
    UnknownAlgorithm(u8),
    #[error("key error: {0}")]
    KeyError(String),
    #[error("key io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::SignatureInvalid => ErrorKind::SignatureInvalid,
            CryptoError::UnknownAlgorithm(_) | CryptoError::KeyError(_) => {
                ErrorKind::PermissionDenied
            }
            CryptoError::Io(_) => ErrorKind::Internal,
        }
    }

    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }
}

/// Public half, as stored in log metadata.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_metadata_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let Some((&alg, rest)) = bytes.split_first() else {
            return Err(CryptoError::KeyError("empty public key".into()));
        };
        if alg != ALG_ED25519 {
            return Err(CryptoError::UnknownAlgorithm(alg));
        }
        let raw: [u8; 32] = rest.try_into().map_err(|_| {
            CryptoError::KeyError(format!("expected 32 key bytes, got {}", rest.len()))
        })?;
        let key = VerifyingKey::from_bytes(&raw).map_err(|e| CryptoError::KeyError(e.to_string()))?;
        Ok(Self(key))
    }

    pub fn to_metadata_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(33);
        out.push(ALG_ED25519);
        out.extend_from_slice(self.0.as_bytes());
        out
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let raw: [u8; SIGNATURE_LEN] = signature
            .try_into()
            .map_err(|_| CryptoError::SignatureInvalid)?;
        let signature = Signature::from_bytes(&raw);
        self.0
            .verify(message, &signature)
            .map_err(|_| CryptoError::SignatureInvalid)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0.as_bytes()))
    }
}

/// Signing key held by a writer.
#[derive(Clone)]
pub struct SigningKeyPair {
    signing_key: SigningKey,
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        Self::from_secret(secret)
    }

    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&secret),
        }
    }

    /// Key files hold the hex-encoded 32-byte secret.
    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let raw = fs::read_to_string(path)?;
        let bytes = hex::decode(raw.trim()).map_err(|e| CryptoError::KeyError(e.to_string()))?;
        let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::KeyError(format!("expected 32 secret bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_secret(secret))
    }

    pub fn save(&self, path: &Path) -> Result<(), CryptoError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        writeln!(file, "{}", hex::encode(self.signing_key.as_bytes()))?;
        Ok(())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn public_key_metadata_roundtrip() {
        let key = SigningKeyPair::generate();
        let bytes = key.public_key().to_metadata_bytes();
        assert_eq!(bytes[0], ALG_ED25519);
        assert_eq!(PublicKey::from_metadata_bytes(&bytes).unwrap(), key.public_key());
    }

    #[test]
    fn unknown_algorithm_is_reported() {
        let mut bytes = SigningKeyPair::generate().public_key().to_metadata_bytes();
        bytes[0] = 9;
        let err = PublicKey::from_metadata_bytes(&bytes).unwrap_err();
        assert!(matches!(err, CryptoError::UnknownAlgorithm(9)));
    }

    #[test]
    fn key_file_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("keys").join("writer.key");
        let key = SigningKeyPair::generate();
        key.save(&path).unwrap();
        let loaded = SigningKeyPair::load(&path).unwrap();
        assert_eq!(loaded.public_key(), key.public_key());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let signer = SigningKeyPair::generate();
        let other = SigningKeyPair::generate();
        let sig = signer.sign(b"payload");
        assert!(matches!(
            other.public_key().verify(b"payload", &sig),
            Err(CryptoError::SignatureInvalid)
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn sign_verify_and_byte_flip(
            payload in proptest::collection::vec(any::<u8>(), 1..256),
            flip in 0usize..SIGNATURE_LEN,
            mask in 1u8..=255,
        ) {
            let key = SigningKeyPair::generate();
            let mut sig = key.sign(&payload);
            prop_assert!(key.public_key().verify(&payload, &sig).is_ok());
            sig[flip] ^= mask;
            prop_assert!(key.public_key().verify(&payload, &sig).is_err());
        }
    }
}
