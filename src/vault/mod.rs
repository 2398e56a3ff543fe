//! Evidence vault: authenticated encryption of evidence payloads.
//!
//! The vault owns a 32-byte symmetric key and seals payloads into the
//! on-disk container format:
//!
//! ```text
//! [nonce       : 12 bytes]
//! [timestamp   : 8 bytes LE f64, seconds since epoch]
//! [meta_len    : 4 bytes LE u32]
//! [meta_json   : meta_len bytes, UTF-8]
//! [ciphertext  : rest of file; ends with the 16-byte AEAD tag]
//! ```
//!
//! The plaintext fed to AES-256-GCM is `hex(sha256(payload)) || "::" ||
//! payload`. The GCM tag alone detects ciphertext tampering; the embedded
//! hash stays meaningful if the key leaks and an adversary re-encrypts
//! modified content, and doubles as a stable fingerprint for external
//! chain-of-custody logs.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

pub mod hybrid;

pub use hybrid::HybridVault;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
const HEADER_LEN: usize = NONCE_LEN + 8 + 4;
const HASH_HEX_LEN: usize = 64;
const HASH_SEPARATOR: &[u8; 2] = b"::";

/// Vault failure taxonomy. Every decrypt failure terminates the decrypt
/// path; partial output is never produced.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("vault key unavailable at {path}: {reason}")]
    KeyMissing { path: PathBuf, reason: String },
    #[error("ciphertext authentication failed")]
    TamperedCiphertext,
    #[error("malformed evidence container: {0}")]
    MalformedPayload(&'static str),
    #[error("embedded payload hash does not match payload")]
    IntegrityMismatch,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decrypted payload plus the fingerprint that was sealed alongside it.
#[derive(Clone, Debug)]
pub struct DecryptedPayload {
    pub payload: Vec<u8>,
    pub fingerprint: String,
}

/// Sealing capability used by the evidence flush path. `Vault` is the
/// symmetric implementation; [`HybridVault`] wraps a per-file session key
/// under RSA-OAEP behind the same contract.
pub trait EvidenceSealer: Send + Sync {
    fn encrypt(&self, payload: &[u8], meta_json: &str) -> Result<Vec<u8>, VaultError>;
    fn decrypt(&self, container: &[u8]) -> Result<DecryptedPayload, VaultError>;
}

pub struct Vault {
    key: [u8; 32],
}

impl Vault {
    /// Load the key from `key_path`, or generate and persist one on first
    /// use. The key file is created with owner-only permissions and is
    /// re-tightened if found looser.
    pub fn open(key_path: &Path) -> Result<Self, VaultError> {
        let key = load_or_create_key(key_path)?;
        Ok(Self { key })
    }

    /// Construct from raw key bytes. Used by tests and by deployments that
    /// manage key material externally.
    pub fn from_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn decrypt_file(&self, path: &Path) -> Result<DecryptedPayload, VaultError> {
        let container = read_file(path)?;
        self.decrypt(&container)
    }
}

impl EvidenceSealer for Vault {
    fn encrypt(&self, payload: &[u8], meta_json: &str) -> Result<Vec<u8>, VaultError> {
        seal_with_key(&self.key, payload, meta_json)
    }

    fn decrypt(&self, container: &[u8]) -> Result<DecryptedPayload, VaultError> {
        open_with_key(&self.key, container)
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Header fields of a container, readable without the key.
#[derive(Clone, Debug)]
pub struct ContainerHeader {
    pub timestamp: f64,
    pub meta_json: String,
}

/// Parse the cleartext header of a container. Does not authenticate
/// anything; listing surfaces only.
pub fn peek_header(container: &[u8]) -> Result<ContainerHeader, VaultError> {
    let (_, timestamp, meta, _) = split_container(container)?;
    Ok(ContainerHeader {
        timestamp,
        meta_json: meta.to_string(),
    })
}

pub(crate) fn seal_with_key(
    key: &[u8; 32],
    payload: &[u8],
    meta_json: &str,
) -> Result<Vec<u8>, VaultError> {
    let digest = Sha256::digest(payload);
    let hash_hex = hex::encode(digest);

    let mut plaintext = Vec::with_capacity(HASH_HEX_LEN + 2 + payload.len());
    plaintext.extend_from_slice(hash_hex.as_bytes());
    plaintext.extend_from_slice(HASH_SEPARATOR);
    plaintext.extend_from_slice(payload);

    // Fresh nonce per encryption from the OS CSPRNG. Reuse under the same
    // key is catastrophic for GCM.
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt_in_place(Nonce::from_slice(&nonce), b"", &mut plaintext)
        .map_err(|_| VaultError::TamperedCiphertext)?;
    let ciphertext = plaintext;

    let meta_bytes = meta_json.as_bytes();
    let mut out = Vec::with_capacity(HEADER_LEN + meta_bytes.len() + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&crate::now_epoch_s().to_le_bytes());
    out.extend_from_slice(&(meta_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(meta_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub(crate) fn open_with_key(
    key: &[u8; 32],
    container: &[u8],
) -> Result<DecryptedPayload, VaultError> {
    let (nonce, _timestamp, _meta, ciphertext) = split_container(container)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place(Nonce::from_slice(nonce), b"", &mut buffer)
        .map_err(|_| VaultError::TamperedCiphertext)?;

    // Everything before the first "::" is the stored hash, everything after
    // is the payload.
    let sep = buffer
        .windows(HASH_SEPARATOR.len())
        .position(|w| w == HASH_SEPARATOR)
        .ok_or(VaultError::MalformedPayload("hash separator absent"))?;
    let stored = std::str::from_utf8(&buffer[..sep])
        .map_err(|_| VaultError::MalformedPayload("stored hash is not UTF-8"))?
        .to_string();
    let payload = buffer[sep + HASH_SEPARATOR.len()..].to_vec();

    let computed = hex::encode(Sha256::digest(&payload));
    if computed != stored {
        return Err(VaultError::IntegrityMismatch);
    }

    Ok(DecryptedPayload {
        payload,
        fingerprint: stored,
    })
}

fn split_container(container: &[u8]) -> Result<(&[u8], f64, &str, &[u8]), VaultError> {
    if container.len() < HEADER_LEN {
        return Err(VaultError::MalformedPayload("container header truncated"));
    }
    let nonce = &container[..NONCE_LEN];
    let mut ts_bytes = [0u8; 8];
    ts_bytes.copy_from_slice(&container[NONCE_LEN..NONCE_LEN + 8]);
    let timestamp = f64::from_le_bytes(ts_bytes);
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&container[NONCE_LEN + 8..HEADER_LEN]);
    let meta_len = u32::from_le_bytes(len_bytes) as usize;

    let meta_end = HEADER_LEN
        .checked_add(meta_len)
        .ok_or(VaultError::MalformedPayload("meta length overflow"))?;
    if container.len() < meta_end {
        return Err(VaultError::MalformedPayload("container meta truncated"));
    }
    let meta = std::str::from_utf8(&container[HEADER_LEN..meta_end])
        .map_err(|_| VaultError::MalformedPayload("meta is not UTF-8"))?;
    let ciphertext = &container[meta_end..];
    if ciphertext.len() < TAG_LEN {
        return Err(VaultError::MalformedPayload("ciphertext truncated"));
    }
    Ok((nonce, timestamp, meta, ciphertext))
}

fn load_or_create_key(key_path: &Path) -> Result<[u8; 32], VaultError> {
    #[cfg(unix)]
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    if key_path.exists() {
        let bytes = read_file(key_path)?;
        if bytes.len() != 32 {
            return Err(VaultError::KeyMissing {
                path: key_path.to_path_buf(),
                reason: format!("expected 32 key bytes, got {}", bytes.len()),
            });
        }
        #[cfg(unix)]
        {
            let mode = fs::metadata(key_path)?.permissions().mode() & 0o777;
            if mode != 0o600 {
                fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))?;
            }
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(key)
    } else {
        if let Some(parent) = key_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options.open(key_path).map_err(|e| VaultError::KeyMissing {
            path: key_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        file.write_all(&key)?;
        file.sync_all()?;
        Ok(key)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, VaultError> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}
