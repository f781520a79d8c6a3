//! Passphrase acquisition capability supplied by the front end

use crate::crypto::SecretString;
use crate::error::{Result, VaultError};

/// Environment variable read by [`EnvPassphrase`]
pub const PASSPHRASE_ENV_VAR: &str = "PWVAULT_PASSPHRASE";

/// Source the engine asks when it needs a passphrase and has no key cached
pub trait PassphraseSource: Send + Sync {
    /// Ask for a secret value (the master passphrase)
    fn get_secret(&self, prompt: &str) -> Result<SecretString>;

    /// Ask for a plain line of input
    fn get_input(&self, prompt: &str) -> Result<String>;
}

/// Always answers with the same passphrase
///
/// For headless use and tests.
pub struct StaticPassphrase {
    secret: SecretString,
}

impl StaticPassphrase {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: SecretString::from(secret),
        }
    }
}

impl PassphraseSource for StaticPassphrase {
    fn get_secret(&self, _prompt: &str) -> Result<SecretString> {
        Ok(self.secret.clone())
    }

    fn get_input(&self, prompt: &str) -> Result<String> {
        Err(VaultError::InvalidInput(format!(
            "no interactive input available for {:?}",
            prompt
        )))
    }
}

/// Reads the passphrase from an environment variable
pub struct EnvPassphrase {
    var: String,
}

impl EnvPassphrase {
    pub fn new(var: &str) -> Self {
        Self {
            var: var.to_string(),
        }
    }
}

impl Default for EnvPassphrase {
    fn default() -> Self {
        Self::new(PASSPHRASE_ENV_VAR)
    }
}

impl PassphraseSource for EnvPassphrase {
    fn get_secret(&self, _prompt: &str) -> Result<SecretString> {
        match std::env::var(&self.var) {
            Ok(value) if !value.is_empty() => Ok(SecretString::new(value)),
            _ => Err(VaultError::NoCallback),
        }
    }

    fn get_input(&self, prompt: &str) -> Result<String> {
        Err(VaultError::InvalidInput(format!(
            "no interactive input available for {:?}",
            prompt
        )))
    }
}
