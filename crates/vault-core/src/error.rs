//! Error types for vault-core

use thiserror::Error;

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported encryption algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Unknown storage backend: {0}")]
    UnknownBackend(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("No passphrase source registered - cannot obtain the master passphrase")]
    NoCallback,

    #[error("Store is not initialized - create a key record first")]
    NotInitialized,

    #[error("Store is already initialized")]
    AlreadyInitialized,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VaultError {
    /// Errors the caller may recover from by re-prompting or retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VaultError::Decryption(_) | VaultError::Crypto(_) | VaultError::Connection(_)
        )
    }

    /// Errors raised by the storage layer
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            VaultError::Connection(_) | VaultError::NotFound(_) | VaultError::Integrity(_)
        )
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                ErrorCode::ConstraintViolation => VaultError::Integrity(err.to_string()),
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::PermissionDenied => VaultError::Connection(err.to_string()),
                _ => VaultError::Integrity(err.to_string()),
            },
            rusqlite::Error::QueryReturnedNoRows => VaultError::NotFound(err.to_string()),
            _ => VaultError::Integrity(err.to_string()),
        }
    }
}
