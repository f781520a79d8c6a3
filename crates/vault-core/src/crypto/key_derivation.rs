//! Argon2id wrapping keys derived from the master passphrase

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::secure_memory::{MasterKey, KEY_LEN};
use crate::config::{Config, SECTION_ENCRYPTION};
use crate::error::{Result, VaultError};

/// Random salt bytes per key record
pub const SALT_LEN: usize = 16;

/// Argon2id cost parameters
///
/// Stored inside the key record so a store stays unlockable after the
/// configured defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDerivationParams {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Iterations
    pub time_cost: u32,
    /// Lanes
    pub parallelism: u32,
}

impl Default for KeyDerivationParams {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KeyDerivationParams {
    /// Defaults overridden by `Encryption.kdf_memory_kib`,
    /// `Encryption.kdf_iterations` and `Encryption.kdf_parallelism`
    pub fn from_config(config: &Config) -> Result<Self> {
        let defaults = Self::default();
        let params = Self {
            memory_cost: config
                .get_parsed(SECTION_ENCRYPTION, "kdf_memory_kib")?
                .unwrap_or(defaults.memory_cost),
            time_cost: config
                .get_parsed(SECTION_ENCRYPTION, "kdf_iterations")?
                .unwrap_or(defaults.time_cost),
            parallelism: config
                .get_parsed(SECTION_ENCRYPTION, "kdf_parallelism")?
                .unwrap_or(defaults.parallelism),
        };

        params
            .argon2_params()
            .map_err(|e| VaultError::Configuration(format!("invalid KDF settings: {}", e)))?;
        Ok(params)
    }

    fn argon2_params(&self) -> std::result::Result<Params, argon2::Error> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LEN),
        )
    }
}

/// Hex-encoded random salt for a new key record
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    hex::encode(salt)
}

/// Derive a wrapping key from `passphrase` and a hex salt
///
/// An empty passphrase is refused rather than hashed.
pub fn derive_key(passphrase: &str, salt: &str, params: &KeyDerivationParams) -> Result<MasterKey> {
    if passphrase.is_empty() {
        return Err(VaultError::KeyDerivation(
            "passphrase must not be empty".to_string(),
        ));
    }

    let salt = hex::decode(salt)
        .map_err(|e| VaultError::KeyDerivation(format!("Invalid salt: {}", e)))?;
    let argon2_params = params
        .argon2_params()
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

    let mut output = Zeroizing::new([0u8; KEY_LEN]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params)
        .hash_password_into(passphrase.as_bytes(), &salt, &mut *output)
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

    Ok(MasterKey::new(*output))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KeyDerivationParams {
        KeyDerivationParams {
            memory_cost: 8192,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_generate_salt() {
        let salt = generate_salt();
        assert_eq!(salt.len(), SALT_LEN * 2);
        assert_ne!(salt, generate_salt());
    }

    #[test]
    fn test_derive_key_depends_on_every_input() {
        let salt = generate_salt();
        let key = derive_key("verysecretkey", &salt, &fast()).unwrap();

        let again = derive_key("verysecretkey", &salt, &fast()).unwrap();
        assert_eq!(key.as_bytes(), again.as_bytes());

        let other_passphrase = derive_key("verysecretkey2", &salt, &fast()).unwrap();
        assert_ne!(key.as_bytes(), other_passphrase.as_bytes());

        let other_salt = derive_key("verysecretkey", &generate_salt(), &fast()).unwrap();
        assert_ne!(key.as_bytes(), other_salt.as_bytes());

        let slower = KeyDerivationParams {
            time_cost: 2,
            ..fast()
        };
        let other_cost = derive_key("verysecretkey", &salt, &slower).unwrap();
        assert_ne!(key.as_bytes(), other_cost.as_bytes());
    }

    #[test]
    fn test_rejected_inputs() {
        let salt = generate_salt();
        assert!(matches!(
            derive_key("", &salt, &fast()),
            Err(VaultError::KeyDerivation(_))
        ));
        assert!(matches!(
            derive_key("secret", "not hex!", &fast()),
            Err(VaultError::KeyDerivation(_))
        ));
        // Argon2 wants at least 8 salt bytes
        assert!(matches!(
            derive_key("secret", "abcd", &fast()),
            Err(VaultError::KeyDerivation(_))
        ));

        let broken = KeyDerivationParams {
            memory_cost: 1,
            time_cost: 0,
            parallelism: 0,
        };
        assert!(matches!(
            derive_key("secret", &salt, &broken),
            Err(VaultError::KeyDerivation(_))
        ));
    }

    #[test]
    fn test_params_from_config() {
        let mut config = Config::empty();
        assert_eq!(
            KeyDerivationParams::from_config(&config).unwrap(),
            KeyDerivationParams::default()
        );

        config.set_value(SECTION_ENCRYPTION, "kdf_memory_kib", "8192");
        config.set_value(SECTION_ENCRYPTION, "kdf_iterations", "1");
        config.set_value(SECTION_ENCRYPTION, "kdf_parallelism", "1");
        assert_eq!(KeyDerivationParams::from_config(&config).unwrap(), fast());

        config.set_value(SECTION_ENCRYPTION, "kdf_iterations", "0");
        assert!(matches!(
            KeyDerivationParams::from_config(&config),
            Err(VaultError::Configuration(_))
        ));
    }
}
