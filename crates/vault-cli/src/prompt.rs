//! Terminal passphrase prompts

use std::io::{self, BufRead, Write};

use vault_core::engine::PASSPHRASE_ENV_VAR;
use vault_core::{EnvPassphrase, PassphraseSource, Result, SecretString, VaultError};

/// Prompts on the controlling terminal without echo
#[derive(Debug, Default, Clone, Copy)]
pub struct TtyPassphrase {
    /// Ask twice and insist both answers match
    confirm: bool,
}

impl TtyPassphrase {
    pub fn new() -> Self {
        Self { confirm: false }
    }

    /// Prompt for a new passphrase, asking for it twice
    pub fn confirming() -> Self {
        Self { confirm: true }
    }
}

impl PassphraseSource for TtyPassphrase {
    fn get_secret(&self, prompt: &str) -> Result<SecretString> {
        let first = SecretString::new(rpassword::prompt_password(prompt)?);
        if first.is_empty() {
            return Err(VaultError::InvalidInput("passphrase must not be empty".to_string()));
        }

        if self.confirm {
            let second = SecretString::new(rpassword::prompt_password("Repeat passphrase: ")?);
            if first != second {
                return Err(VaultError::InvalidInput("passphrases do not match".to_string()));
            }
        }
        Ok(first)
    }

    fn get_input(&self, prompt: &str) -> Result<String> {
        let mut stderr = io::stderr();
        write!(stderr, "{}", prompt)?;
        stderr.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Passphrase from `PWVAULT_PASSPHRASE` when set, otherwise the terminal
pub fn default_source() -> Box<dyn PassphraseSource> {
    match std::env::var(PASSPHRASE_ENV_VAR) {
        Ok(value) if !value.is_empty() => Box::new(EnvPassphrase::default()),
        _ => Box::new(TtyPassphrase::new()),
    }
}
