//! Cryptographic primitives for secret storage
//!
//! This module provides:
//! - AES-256-GCM and ChaCha20-Poly1305 authenticated encryption
//! - Argon2id key derivation from passphrases
//! - Secure memory handling with zeroize

mod cipher;
mod key_derivation;
mod secure_memory;

pub use cipher::{Algorithm, Cipher, CipherBlob};
pub use key_derivation::{derive_key, generate_salt, KeyDerivationParams};
pub use secure_memory::{MasterKey, SecretString};
