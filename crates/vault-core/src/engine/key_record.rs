//! Persisted key material of a store

use serde::{Deserialize, Serialize};

use crate::crypto::{
    derive_key, generate_salt, Algorithm, Cipher, CipherBlob, KeyDerivationParams, MasterKey,
};
use crate::error::{Result, VaultError};

/// Fixed plaintext encrypted under the data key at store creation
pub const VERIFICATION_PLAINTEXT: &str = "pwvault-verification";

/// Everything needed to turn a passphrase back into the data key
///
/// The random data key that encrypts node fields is wrapped by a key derived
/// from the passphrase. Changing the passphrase rewraps the data key and
/// leaves every node blob untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Algorithm name, as accepted by `Algorithm::from_str`
    pub algorithm: String,
    /// Argon2id salt for the wrapping key
    pub kdf_salt: String,
    pub kdf_params: KeyDerivationParams,
    /// Data key encrypted under the passphrase-derived key
    pub wrapped_key: String,
    /// `VERIFICATION_PLAINTEXT` encrypted under the data key
    pub verification: String,
    /// Whether node metadata (username, url, notes) is stored encrypted
    ///
    /// Fixed when the store is created. Readers decrypt metadata only when
    /// this is set, whatever the stored text looks like.
    #[serde(default = "metadata_protected_by_default")]
    pub protect_metadata: bool,
}

fn metadata_protected_by_default() -> bool {
    true
}

impl KeyRecord {
    pub fn algorithm(&self) -> Result<Algorithm> {
        self.algorithm.parse()
    }

    /// Wrap the data key held by `data_cipher` under `passphrase`
    ///
    /// Salt and nonces are fresh on every call.
    pub(crate) fn seal(
        data_cipher: &Cipher,
        passphrase: &str,
        params: &KeyDerivationParams,
    ) -> Result<Self> {
        let algorithm = data_cipher.algorithm();
        let kdf_salt = generate_salt();
        let wrapping_key = derive_key(passphrase, &kdf_salt, params)?;
        let wrapper = Cipher::new(algorithm, wrapping_key);

        let wrapped_key = wrapper.encrypt(data_cipher.key().as_bytes())?.to_string();
        let verification = data_cipher.encrypt_string(VERIFICATION_PLAINTEXT)?;

        Ok(Self {
            algorithm: algorithm.name().to_string(),
            kdf_salt,
            kdf_params: *params,
            wrapped_key,
            verification,
            protect_metadata: true,
        })
    }

    /// Recover the data key, or `None` if the passphrase is wrong
    pub(crate) fn unseal(&self, passphrase: &str) -> Result<Option<Cipher>> {
        let algorithm = self.algorithm()?;
        let wrapping_key = derive_key(passphrase, &self.kdf_salt, &self.kdf_params)?;
        let wrapper = Cipher::new(algorithm, wrapping_key);

        let wrapped = CipherBlob::from_string(&self.wrapped_key)?;
        let key_bytes = match wrapper.decrypt(&wrapped) {
            Ok(bytes) => zeroize::Zeroizing::new(bytes),
            Err(VaultError::Decryption(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let data_key = MasterKey::from_slice(&key_bytes)
            .ok_or_else(|| VaultError::Crypto("wrapped key has the wrong length".to_string()))?;
        let cipher = Cipher::new(algorithm, data_key);

        match cipher.decrypt_string(&self.verification) {
            Ok(token) if token.expose() == VERIFICATION_PLAINTEXT => Ok(Some(cipher)),
            Ok(_) | Err(VaultError::Decryption(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
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
    fn test_seal_unseal() {
        let data = Cipher::new(Algorithm::Aes, MasterKey::generate());
        let record = KeyRecord::seal(&data, "verysecretkey", &fast()).unwrap();

        let recovered = record.unseal("verysecretkey").unwrap().unwrap();
        assert_eq!(recovered.key().as_bytes(), data.key().as_bytes());

        assert!(record.unseal("wrong").unwrap().is_none());
    }

    #[test]
    fn test_reseal_changes_record_not_key() {
        let data = Cipher::new(Algorithm::ChaCha20, MasterKey::generate());
        let first = KeyRecord::seal(&data, "same", &fast()).unwrap();
        let second = KeyRecord::seal(&data, "same", &fast()).unwrap();

        assert_ne!(first.kdf_salt, second.kdf_salt);
        assert_ne!(first.wrapped_key, second.wrapped_key);
        assert_ne!(first.verification, second.verification);

        let a = first.unseal("same").unwrap().unwrap();
        let b = second.unseal("same").unwrap().unwrap();
        assert_eq!(a.key().as_bytes(), b.key().as_bytes());
    }

    #[test]
    fn test_record_without_metadata_flag_defaults_to_protected() {
        let data = Cipher::new(Algorithm::Aes, MasterKey::generate());
        let mut record = KeyRecord::seal(&data, "pw", &fast()).unwrap();
        record.protect_metadata = false;

        let mut json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["protect_metadata"], serde_json::json!(false));
        json.as_object_mut().unwrap().remove("protect_metadata");

        let parsed: KeyRecord = serde_json::from_value(json).unwrap();
        assert!(parsed.protect_metadata);
    }

    #[test]
    fn test_unknown_algorithm_in_record() {
        let data = Cipher::new(Algorithm::Aes, MasterKey::generate());
        let mut record = KeyRecord::seal(&data, "pw", &fast()).unwrap();
        record.algorithm = "Twofish".to_string();
        assert!(matches!(
            record.unseal("pw"),
            Err(VaultError::UnsupportedAlgorithm(_))
        ));
    }
}
