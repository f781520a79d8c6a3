//! The authenticated crypto session
//!
//! One engine per open store. It caches the data key while authenticated and
//! drops it when the inactivity timeout is detected or the engine is locked.
//! There is no background timer: the timeout is checked on every
//! encrypt/decrypt call.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use super::key_record::KeyRecord;
use super::passphrase::PassphraseSource;
use crate::config::{Config, SECTION_ENCRYPTION, SECTION_GLOBAL};
use crate::crypto::{Algorithm, Cipher, KeyDerivationParams, MasterKey, SecretString};
use crate::error::{Result, VaultError};

const PASSPHRASE_PROMPT: &str = "Master passphrase: ";
const NEW_PASSPHRASE_PROMPT: &str = "New master passphrase: ";

/// Default inactivity timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: i64 = 600;

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No key record loaded - the store has not been initialized
    Uninitialized,
    /// Key record loaded, no key cached
    Unauthenticated,
    /// Data key cached and usable
    Authenticated,
}

/// Settings the engine is constructed from
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Algorithm for newly initialized stores
    pub algorithm: Algorithm,
    /// Inactivity timeout in seconds, zero or negative disables it
    pub timeout_secs: i64,
    /// KDF parameters for newly sealed key records
    pub kdf_params: KeyDerivationParams,
}

impl EngineConfig {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            kdf_params: KeyDerivationParams::default(),
        }
    }

    pub fn with_timeout(mut self, secs: i64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_kdf_params(mut self, params: KeyDerivationParams) -> Self {
        self.kdf_params = params;
        self
    }

    /// Resolve from `Encryption.algorithm`, `Global.cls_timeout` and the
    /// optional `Encryption.kdf_*` settings
    pub fn from_config(config: &Config) -> Result<Self> {
        let algorithm: Algorithm = config.require(SECTION_ENCRYPTION, "algorithm")?.parse()?;
        let timeout_secs = config
            .get_parsed::<i64>(SECTION_GLOBAL, "cls_timeout")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let kdf_params = KeyDerivationParams::from_config(config)?;

        Ok(Self {
            algorithm,
            timeout_secs,
            kdf_params,
        })
    }
}

/// A sealed key record the engine has not adopted yet
///
/// Dropping it leaves the engine as it was. A new store's data key is wiped
/// along with it.
pub struct PendingKey {
    record: KeyRecord,
    /// Data key of a new store; `None` for a passphrase change
    cipher: Option<Cipher>,
}

impl PendingKey {
    /// The record to persist before committing
    pub fn record(&self) -> &KeyRecord {
        &self.record
    }
}

impl std::fmt::Debug for PendingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingKey")
            .field("algorithm", &self.record.algorithm)
            .field("new_store", &self.cipher.is_some())
            .finish()
    }
}

/// Passphrase-authenticated encryption session
pub struct CryptoEngine {
    config: EngineConfig,
    record: Option<KeyRecord>,
    /// Present iff authenticated and not timed out
    cipher: Option<Cipher>,
    last_activity: Option<DateTime<Utc>>,
    source: Option<Box<dyn PassphraseSource>>,
}

impl CryptoEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            record: None,
            cipher: None,
            last_activity: None,
            source: None,
        }
    }

    /// Build an engine from configuration
    ///
    /// Fails with `Configuration` if no algorithm is configured and with
    /// `UnsupportedAlgorithm` if it names an unknown one.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(EngineConfig::from_config(config)?))
    }

    pub fn with_passphrase_source(mut self, source: Box<dyn PassphraseSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn set_passphrase_source(&mut self, source: Box<dyn PassphraseSource>) {
        self.source = Some(source);
    }

    pub fn clear_passphrase_source(&mut self) {
        self.source = None;
    }

    pub fn state(&self) -> EngineState {
        match (&self.record, &self.cipher) {
            (None, _) => EngineState::Uninitialized,
            (Some(_), None) => EngineState::Unauthenticated,
            (Some(_), Some(_)) => EngineState::Authenticated,
        }
    }

    /// Authenticated and not timed out
    pub fn is_authenticated(&mut self) -> bool {
        !self.is_timed_out() && self.cipher.is_some()
    }

    /// Whether key material is currently held in memory
    pub fn has_key(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn key_record(&self) -> Option<&KeyRecord> {
        self.record.as_ref()
    }

    pub fn timeout(&self) -> i64 {
        self.config.timeout_secs
    }

    pub fn set_timeout(&mut self, secs: i64) {
        self.config.timeout_secs = secs;
    }

    /// Algorithm of the loaded store, or the configured one for new stores
    pub fn algorithm(&self) -> Algorithm {
        self.record
            .as_ref()
            .and_then(|r| r.algorithm().ok())
            .unwrap_or(self.config.algorithm)
    }

    /// Load the key record of an existing store
    ///
    /// Any cached key is discarded.
    pub fn load_key_record(&mut self, record: KeyRecord) -> Result<()> {
        record.algorithm()?;
        self.wipe();
        self.record = Some(record);
        debug!("Key record loaded");
        Ok(())
    }

    /// Seal the key record for a new store without adopting it
    ///
    /// The engine is unchanged until the returned key is passed to
    /// [`commit`](Self::commit), so a caller that fails to persist the record
    /// can simply drop it.
    pub fn prepare_initialize(&self, passphrase: &str, protect_metadata: bool) -> Result<PendingKey> {
        if self.record.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }

        let cipher = Cipher::new(self.config.algorithm, MasterKey::generate());
        let mut record = KeyRecord::seal(&cipher, passphrase, &self.config.kdf_params)?;
        record.protect_metadata = protect_metadata;

        Ok(PendingKey {
            record,
            cipher: Some(cipher),
        })
    }

    /// Create the key record for a new store and authenticate with it
    ///
    /// The returned record must be persisted by the caller.
    pub fn initialize(&mut self, passphrase: &str) -> Result<KeyRecord> {
        let pending = self.prepare_initialize(passphrase, true)?;
        let record = pending.record.clone();
        self.commit(pending);
        Ok(record)
    }

    /// Try a passphrase against the loaded key record
    ///
    /// Returns `Ok(false)` for a wrong passphrase and leaves the engine
    /// unauthenticated. Re-authenticating replaces the cached key.
    pub fn authenticate(&mut self, passphrase: &str) -> Result<bool> {
        let record = self.record.as_ref().ok_or(VaultError::NotInitialized)?;

        match record.unseal(passphrase)? {
            Some(cipher) => {
                self.cipher = Some(cipher);
                self.touch();
                info!("Session authenticated");
                Ok(true)
            }
            None => {
                self.wipe();
                warn!("Authentication failed - wrong passphrase");
                Ok(false)
            }
        }
    }

    /// Encrypt a string into a blob
    pub fn encrypt(&mut self, plaintext: &str) -> Result<String> {
        let blob = self.active_cipher()?.encrypt_string(plaintext)?;
        self.touch();
        Ok(blob)
    }

    /// Decrypt a blob into a string
    pub fn decrypt(&mut self, blob: &str) -> Result<SecretString> {
        let plaintext = self.active_cipher()?.decrypt_string(blob)?;
        self.touch();
        Ok(plaintext)
    }

    /// Rewrap the data key under a new passphrase from `source` without
    /// adopting the new record
    ///
    /// The current record stays in force until [`commit`](Self::commit).
    pub fn prepare_passphrase_change(
        &mut self,
        source: &dyn PassphraseSource,
    ) -> Result<PendingKey> {
        self.active_cipher()?;

        let new_passphrase = source.get_secret(NEW_PASSPHRASE_PROMPT)?;
        let cipher = self.cipher.as_ref().ok_or_else(|| {
            VaultError::Crypto("key discarded while changing passphrase".to_string())
        })?;
        let mut record = KeyRecord::seal(cipher, new_passphrase.expose(), &self.config.kdf_params)?;
        if let Some(current) = &self.record {
            record.protect_metadata = current.protect_metadata;
        }
        self.touch();

        Ok(PendingKey {
            record,
            cipher: None,
        })
    }

    /// Rewrap the data key under a new passphrase from `source`
    ///
    /// Node blobs stay valid. The returned record replaces the stored one and
    /// must be persisted by the caller.
    pub fn change_passphrase(&mut self, source: &dyn PassphraseSource) -> Result<KeyRecord> {
        let pending = self.prepare_passphrase_change(source)?;
        let record = pending.record.clone();
        self.commit(pending);
        Ok(record)
    }

    /// Adopt a prepared key record once it has been stored
    pub fn commit(&mut self, pending: PendingKey) {
        let PendingKey { record, cipher } = pending;
        self.record = Some(record);
        match cipher {
            Some(cipher) => {
                self.cipher = Some(cipher);
                self.touch();
                info!(algorithm = %self.config.algorithm, "Initialized new key record");
            }
            None => info!("Master passphrase changed"),
        }
    }

    /// Check the inactivity timeout, discarding the key once it has passed
    pub fn is_timed_out(&mut self) -> bool {
        if self.config.timeout_secs <= 0 {
            return false;
        }
        let Some(last) = self.last_activity else {
            return false;
        };

        let deadline = TimeDelta::try_seconds(self.config.timeout_secs)
            .and_then(|timeout| last.checked_add_signed(timeout));
        let expired = match deadline {
            Some(deadline) => Utc::now() > deadline,
            None => false,
        };

        if expired && self.cipher.take().is_some() {
            warn!(
                timeout_secs = self.config.timeout_secs,
                "Session timed out - key discarded"
            );
        }
        expired
    }

    /// Discard the cached key
    pub fn lock(&mut self) {
        self.wipe();
        info!("Session locked");
    }

    /// Cached cipher, re-prompting through the passphrase source when the
    /// key is missing or has timed out
    fn active_cipher(&mut self) -> Result<&Cipher> {
        self.is_timed_out();

        if self.cipher.is_none() {
            self.reacquire_key()?;
        }

        self.cipher
            .as_ref()
            .ok_or_else(|| VaultError::Crypto("no key available".to_string()))
    }

    fn reacquire_key(&mut self) -> Result<()> {
        if self.record.is_none() {
            return Err(VaultError::NotInitialized);
        }
        let source = self.source.as_ref().ok_or(VaultError::NoCallback)?;

        debug!("No key cached - asking passphrase source");
        let passphrase = source.get_secret(PASSPHRASE_PROMPT)?;

        if self.authenticate(passphrase.expose())? {
            Ok(())
        } else {
            Err(VaultError::Crypto("wrong passphrase".to_string()))
        }
    }

    fn touch(&mut self) {
        self.last_activity = Some(Utc::now());
    }

    fn wipe(&mut self) {
        // Dropping the cipher zeroizes the key
        self.cipher = None;
        self.last_activity = None;
    }

    #[cfg(test)]
    pub(crate) fn rewind_activity(&mut self, secs: i64) {
        if let Some(last) = self.last_activity {
            self.last_activity = Some(last - TimeDelta::seconds(secs));
        }
    }
}

impl std::fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("state", &self.state())
            .field("algorithm", &self.algorithm())
            .field("timeout_secs", &self.config.timeout_secs)
            .field("has_passphrase_source", &self.source.is_some())
            .finish()
    }
}
