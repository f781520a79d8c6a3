//! Authenticated encryption with AES-256-GCM or ChaCha20-Poly1305
//!
//! Blob format: `{algorithm}:{nonce_hex}:{auth_tag_hex}:{ciphertext_hex}`
//! - algorithm: `aes` or `chacha20`
//! - nonce: 12 bytes (96 bits), fresh per encryption
//! - auth tag: 16 bytes (128 bits)
//! - ciphertext: variable length
//!
//! The format is persisted by every backend. Changing it requires a schema
//! version bump.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;

use super::{MasterKey, SecretString};
use crate::error::{Result, VaultError};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Authentication failures never say whether the key or the data was wrong.
const AUTH_FAILED: &str = "authentication failed (wrong key or corrupted data)";

/// Supported AEAD algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// AES-256 in GCM mode
    Aes,
    /// ChaCha20-Poly1305
    ChaCha20,
}

impl Algorithm {
    /// Tag written at the front of every blob
    pub fn tag(&self) -> &'static str {
        match self {
            Algorithm::Aes => "aes",
            Algorithm::ChaCha20 => "chacha20",
        }
    }

    /// Name used in configuration and key records
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Aes => "AES",
            Algorithm::ChaCha20 => "ChaCha20",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AES" | "AES-256-GCM" | "AES256GCM" => Ok(Algorithm::Aes),
            "CHACHA20" | "CHACHA20-POLY1305" | "CHACHA20POLY1305" => Ok(Algorithm::ChaCha20),
            _ => Err(VaultError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Encrypted payload with its algorithm, nonce and auth tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherBlob {
    pub algorithm: Algorithm,
    pub nonce: [u8; NONCE_LEN],
    pub auth_tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl fmt::Display for CipherBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.algorithm.tag(),
            hex::encode(self.nonce),
            hex::encode(self.auth_tag),
            hex::encode(&self.ciphertext)
        )
    }
}

impl CipherBlob {
    /// Parse from the format: `{algorithm}:{nonce_hex}:{auth_tag_hex}:{ciphertext_hex}`
    pub fn from_string(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 {
            return Err(VaultError::Decryption(
                "Invalid blob format: expected algorithm:nonce:tag:ciphertext".to_string(),
            ));
        }

        let algorithm = match parts[0] {
            "aes" => Algorithm::Aes,
            "chacha20" => Algorithm::ChaCha20,
            other => {
                return Err(VaultError::Decryption(format!(
                    "Unknown algorithm tag: {}",
                    other
                )))
            }
        };

        let nonce_bytes = hex::decode(parts[1])
            .map_err(|e| VaultError::Decryption(format!("Invalid nonce hex: {}", e)))?;
        let auth_tag_bytes = hex::decode(parts[2])
            .map_err(|e| VaultError::Decryption(format!("Invalid auth tag hex: {}", e)))?;
        let ciphertext = hex::decode(parts[3])
            .map_err(|e| VaultError::Decryption(format!("Invalid ciphertext hex: {}", e)))?;

        let nonce: [u8; NONCE_LEN] = nonce_bytes.as_slice().try_into().map_err(|_| {
            VaultError::Decryption(format!(
                "Invalid nonce length: expected {}, got {}",
                NONCE_LEN,
                nonce_bytes.len()
            ))
        })?;
        let auth_tag: [u8; TAG_LEN] = auth_tag_bytes.as_slice().try_into().map_err(|_| {
            VaultError::Decryption(format!(
                "Invalid auth tag length: expected {}, got {}",
                TAG_LEN,
                auth_tag_bytes.len()
            ))
        })?;

        Ok(Self {
            algorithm,
            nonce,
            auth_tag,
            ciphertext,
        })
    }
}

/// A key bound to an algorithm
pub struct Cipher {
    algorithm: Algorithm,
    key: MasterKey,
}

impl Cipher {
    pub fn new(algorithm: Algorithm, key: MasterKey) -> Self {
        Self { algorithm, key }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub(crate) fn key(&self) -> &MasterKey {
        &self.key
    }

    /// Encrypt plaintext under a freshly generated nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<CipherBlob> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        // Both AEADs append the auth tag to the ciphertext
        let sealed = match self.algorithm {
            Algorithm::Aes => Aes256Gcm::new_from_slice(self.key.as_bytes())
                .map_err(|e| VaultError::Encryption(e.to_string()))?
                .encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext),
            Algorithm::ChaCha20 => ChaCha20Poly1305::new_from_slice(self.key.as_bytes())
                .map_err(|e| VaultError::Encryption(e.to_string()))?
                .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), plaintext),
        }
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

        if sealed.len() < TAG_LEN {
            return Err(VaultError::Encryption("Ciphertext too short".to_string()));
        }

        let tag_start = sealed.len() - TAG_LEN;
        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(&sealed[tag_start..]);

        Ok(CipherBlob {
            algorithm: self.algorithm,
            nonce,
            auth_tag,
            ciphertext: sealed[..tag_start].to_vec(),
        })
    }

    /// Decrypt and authenticate a blob
    pub fn decrypt(&self, blob: &CipherBlob) -> Result<Vec<u8>> {
        if blob.algorithm != self.algorithm {
            return Err(VaultError::Decryption(AUTH_FAILED.to_string()));
        }

        let mut sealed = blob.ciphertext.clone();
        sealed.extend_from_slice(&blob.auth_tag);

        let opened = match self.algorithm {
            Algorithm::Aes => Aes256Gcm::new_from_slice(self.key.as_bytes())
                .map_err(|e| VaultError::Decryption(e.to_string()))?
                .decrypt(aes_gcm::Nonce::from_slice(&blob.nonce), sealed.as_slice()),
            Algorithm::ChaCha20 => ChaCha20Poly1305::new_from_slice(self.key.as_bytes())
                .map_err(|e| VaultError::Decryption(e.to_string()))?
                .decrypt(chacha20poly1305::Nonce::from_slice(&blob.nonce), sealed.as_slice()),
        };

        opened.map_err(|_| VaultError::Decryption(AUTH_FAILED.to_string()))
    }

    /// Encrypt a string and return the serialized blob
    pub fn encrypt_string(&self, plaintext: &str) -> Result<String> {
        Ok(self.encrypt(plaintext.as_bytes())?.to_string())
    }

    /// Decrypt a serialized blob into a string
    pub fn decrypt_string(&self, blob: &str) -> Result<SecretString> {
        let blob = CipherBlob::from_string(blob)?;
        let plaintext = self.decrypt(&blob)?;
        String::from_utf8(plaintext)
            .map(SecretString::new)
            .map_err(|e| VaultError::Decryption(format!("Invalid UTF-8: {}", e)))
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
