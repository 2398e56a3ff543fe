//! Hybrid vault: RSA-OAEP-wrapped session keys.
//!
//! Each container is sealed under a fresh 32-byte AEAD session key which is
//! then wrapped under a configured RSA-OAEP(SHA-256) public key. The wrapped
//! key is prepended to the standard symmetric container:
//!
//! ```text
//! [magic        : 4 bytes, "SEVH"]
//! [wrapped_len  : 4 bytes LE u32]
//! [wrapped_key  : wrapped_len bytes, RSA-OAEP ciphertext]
//! [container    : standard symmetric container, sealed with the session key]
//! ```
//!
//! Encrypt-only deployments hold just the public key; decryption requires
//! the private key. The hash-embedded payload and the integrity laws are
//! unchanged from the symmetric vault.

use std::fs;
use std::path::Path;

use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroize;

use super::{open_with_key, seal_with_key, DecryptedPayload, EvidenceSealer, VaultError};

pub const HYBRID_MAGIC: &[u8; 4] = b"SEVH";

/// True when the bytes carry the hybrid container prefix.
pub fn is_hybrid(container: &[u8]) -> bool {
    container.starts_with(HYBRID_MAGIC)
}

pub struct HybridVault {
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
}

impl HybridVault {
    pub fn new(public: RsaPublicKey, private: Option<RsaPrivateKey>) -> Self {
        Self { public, private }
    }

    /// Load from PEM files. The private key path is optional; without it the
    /// vault can seal but not open.
    pub fn from_pem_files(
        public_key_path: &Path,
        private_key_path: Option<&Path>,
    ) -> Result<Self, VaultError> {
        let public_pem =
            fs::read_to_string(public_key_path).map_err(|e| VaultError::KeyMissing {
                path: public_key_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let public = RsaPublicKey::from_public_key_pem(&public_pem).map_err(|e| {
            VaultError::KeyMissing {
                path: public_key_path.to_path_buf(),
                reason: format!("invalid RSA public key: {}", e),
            }
        })?;

        let private = match private_key_path {
            Some(path) => {
                let pem = fs::read_to_string(path).map_err(|e| VaultError::KeyMissing {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
                let key =
                    RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| VaultError::KeyMissing {
                        path: path.to_path_buf(),
                        reason: format!("invalid RSA private key: {}", e),
                    })?;
                Some(key)
            }
            None => None,
        };

        Ok(Self { public, private })
    }
}

impl EvidenceSealer for HybridVault {
    fn encrypt(&self, payload: &[u8], meta_json: &str) -> Result<Vec<u8>, VaultError> {
        let mut session_key = [0u8; 32];
        OsRng.fill_bytes(&mut session_key);

        let wrapped = self
            .public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &session_key)
            .map_err(|_| VaultError::TamperedCiphertext)?;
        let container = seal_with_key(&session_key, payload, meta_json);
        session_key.zeroize();
        let container = container?;

        let mut out = Vec::with_capacity(4 + 4 + wrapped.len() + container.len());
        out.extend_from_slice(HYBRID_MAGIC);
        out.extend_from_slice(&(wrapped.len() as u32).to_le_bytes());
        out.extend_from_slice(&wrapped);
        out.extend_from_slice(&container);
        Ok(out)
    }

    fn decrypt(&self, container: &[u8]) -> Result<DecryptedPayload, VaultError> {
        let private = self.private.as_ref().ok_or_else(|| VaultError::KeyMissing {
            path: "<rsa private key>".into(),
            reason: "hybrid decrypt requires the RSA private key".to_string(),
        })?;

        if container.len() < 8 || !is_hybrid(container) {
            return Err(VaultError::MalformedPayload("hybrid magic absent"));
        }
        let wrapped_len = u32::from_le_bytes(container[4..8].try_into().unwrap()) as usize;
        let body_start = 8usize
            .checked_add(wrapped_len)
            .ok_or(VaultError::MalformedPayload("wrapped key length overflow"))?;
        if container.len() < body_start {
            return Err(VaultError::MalformedPayload("wrapped key truncated"));
        }
        let wrapped = &container[8..body_start];

        let unwrapped = private
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| VaultError::TamperedCiphertext)?;
        if unwrapped.len() != 32 {
            return Err(VaultError::MalformedPayload("session key length mismatch"));
        }
        let mut session_key = [0u8; 32];
        session_key.copy_from_slice(&unwrapped);

        let result = open_with_key(&session_key, &container[body_start..]);
        session_key.zeroize();
        result
    }
}
