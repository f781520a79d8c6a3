//! pwvault - maintenance CLI for the local encrypted secret store
//!
//! Logs go to stderr so command output stays pipeable. `RUST_LOG` replaces
//! the default WARN level.

use clap::Parser;

use vault_cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(vault_cli::commands::log_filter(
            std::env::var(tracing_subscriber::EnvFilter::DEFAULT_ENV)
                .ok()
                .as_deref(),
        ))
        .init();

    vault_cli::run(cli).await
}
