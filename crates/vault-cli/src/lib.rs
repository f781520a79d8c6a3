//! # vault-cli
//!
//! Store maintenance commands for pwvault: `init`, `migrate`, `tags` and
//! `passwd`. Passphrases come from the terminal or from `PWVAULT_PASSPHRASE`.

pub mod commands;
pub mod prompt;

pub use commands::{run, Cli, Command};
pub use prompt::{default_source, TtyPassphrase};
