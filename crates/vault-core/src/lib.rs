//! # vault-core
//!
//! Core of pwvault, a local store of encrypted secrets:
//! - AES-256-GCM and ChaCha20-Poly1305 encryption under an Argon2id-wrapped key
//! - A passphrase session with an inactivity timeout
//! - Nodes (username, password, url, notes) labelled with tags
//! - SQLite, JSON file and in-memory storage behind one driver trait
//! - Migration between backends and schema versions

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod migration;
pub mod node;
pub mod storage;
mod vault;

pub use config::Config;
pub use crypto::{Algorithm, Cipher, CipherBlob, KeyDerivationParams, MasterKey, SecretString};
pub use engine::{
    CryptoEngine, EngineConfig, EngineState, EnvPassphrase, KeyRecord, PassphraseSource,
    StaticPassphrase,
};
pub use error::{Result, VaultError};
pub use migration::{migrate, MigrationReport};
pub use node::{Node, NodeId, NodeRecord, Tag};
pub use storage::{BackendKind, ConnectionParams, StorageDriver};
pub use vault::{FieldPolicy, Vault};
