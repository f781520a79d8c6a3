//! Passphrase session that gates every encrypt/decrypt

mod key_record;
mod passphrase;
mod session;

pub use key_record::{KeyRecord, VERIFICATION_PLAINTEXT};
pub use passphrase::{EnvPassphrase, PassphraseSource, StaticPassphrase, PASSPHRASE_ENV_VAR};
pub use session::{CryptoEngine, EngineConfig, EngineState, PendingKey, DEFAULT_TIMEOUT_SECS};
