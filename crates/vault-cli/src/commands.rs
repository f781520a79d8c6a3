//! Command line definition and the store maintenance commands

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vault_core::config::SECTION_DATABASE;
use vault_core::storage::{create_kind, CURRENT_SCHEMA_VERSION};
use vault_core::{
    migrate, Config, ConnectionParams, MigrationReport, PassphraseSource, StaticPassphrase, Tag,
    Vault,
};

use crate::prompt::{default_source, TtyPassphrase};

/// Environment variable holding the new passphrase for `passwd`
pub const NEW_PASSPHRASE_ENV_VAR: &str = "PWVAULT_NEW_PASSPHRASE";

const NEW_PASSPHRASE_PROMPT: &str = "New master passphrase: ";

/// Log filter from `RUST_LOG` style directives, WARN and above when unset
pub fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

/// pwvault - local encrypted secret store
#[derive(Parser, Debug)]
#[command(name = "pwvault")]
#[command(version)]
#[command(about = "pwvault - local encrypted secret store maintenance")]
pub struct Cli {
    /// Configuration file (defaults to the per-user config location)
    #[arg(long, global = true, env = "PWVAULT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Store URI such as sqlite:///path/to/store.db, overrides the config
    #[arg(long, global = true)]
    pub dburi: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create the key record of a new, empty store
    Init,

    /// Copy every node of one store into another
    Migrate {
        /// Source store URI
        #[arg(long)]
        from: String,

        /// Schema version of the source store
        #[arg(long, default_value_t = CURRENT_SCHEMA_VERSION)]
        from_version: u32,

        /// Destination store URI
        #[arg(long)]
        to: String,

        /// Schema version of the destination store
        #[arg(long, default_value_t = CURRENT_SCHEMA_VERSION)]
        to_version: u32,
    },

    /// List tags in use, or those found together with all given tags
    Tags {
        /// Only nodes carrying every one of these tags
        filter: Vec<String>,
    },

    /// Change the master passphrase
    Passwd,
}

/// Resolve the configuration: file over defaults, then environment, then flags
pub fn load_config(path: Option<&Path>, dburi: Option<&str>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };
    let mut config = Config::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.apply_env_overrides();

    if let Some(uri) = dburi {
        config.set_value(SECTION_DATABASE, "dburi", uri);
    }

    let has_location = config.get_value(SECTION_DATABASE, "dburi").is_some()
        || config.get_value(SECTION_DATABASE, "filename").is_some();
    if !has_location {
        let defaults = Config::with_default_paths()?;
        if let Some(filename) = defaults.get_value(SECTION_DATABASE, "filename") {
            config.set_value(SECTION_DATABASE, "filename", filename);
        }
    }

    Ok(config)
}

/// Initialize the store described by `config` with a passphrase from `source`
pub async fn init_store(config: &Config, source: &dyn PassphraseSource) -> anyhow::Result<()> {
    let mut vault = Vault::open_from_config(config, None)
        .await
        .context("Failed to open store")?;
    if vault.is_initialized() {
        bail!("Store is already initialized");
    }

    let passphrase = source.get_secret(NEW_PASSPHRASE_PROMPT)?;
    vault.initialize(passphrase.expose()).await?;
    vault.close().await?;
    Ok(())
}

/// Tags of the configured store, optionally filtered
pub async fn list_tags(config: &Config, filter: &[String]) -> anyhow::Result<Vec<Tag>> {
    let filter = Tag::parse_many(filter)?;
    let mut vault = Vault::open_from_config(config, None)
        .await
        .context("Failed to open store")?;

    let tags = if filter.is_empty() {
        vault.list_tags(None).await?
    } else {
        vault.list_tags(Some(&filter)).await?
    };
    vault.close().await?;
    Ok(tags)
}

/// Copy the store at `from` into the store at `to`
pub async fn migrate_stores(
    from: &str,
    from_version: u32,
    to: &str,
    to_version: u32,
) -> anyhow::Result<MigrationReport> {
    let (source_kind, source_params) = ConnectionParams::from_uri(from)?;
    let (dest_kind, dest_params) = ConnectionParams::from_uri(to)?;

    let source = create_kind(source_kind, from_version, &source_params)
        .await
        .with_context(|| format!("Failed to open source store {}", from))?;
    let dest = create_kind(dest_kind, to_version, &dest_params)
        .await
        .with_context(|| format!("Failed to open destination store {}", to))?;

    let report = migrate(source.as_ref(), dest.as_ref()).await?;

    source.close().await?;
    dest.close().await?;
    Ok(report)
}

/// Rewrap the store key under a new passphrase
///
/// `current` is asked for the existing passphrase, `new` for the replacement.
pub async fn change_passphrase(
    config: &Config,
    current: Box<dyn PassphraseSource>,
    new: &dyn PassphraseSource,
) -> anyhow::Result<()> {
    let mut vault = Vault::open_from_config(config, Some(current))
        .await
        .context("Failed to open store")?;
    if !vault.is_initialized() {
        bail!("Store is not initialized - run `pwvault init` first");
    }

    vault
        .change_passphrase(new)
        .await
        .context("Failed to change passphrase")?;
    vault.close().await?;
    Ok(())
}

fn new_passphrase_source() -> Box<dyn PassphraseSource> {
    match std::env::var(NEW_PASSPHRASE_ENV_VAR) {
        Ok(value) if !value.is_empty() => Box::new(StaticPassphrase::new(&value)),
        _ => Box::new(TtyPassphrase::confirming()),
    }
}

/// Execute a parsed command line
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Init => {
            let config = load_config(cli.config.as_deref(), cli.dburi.as_deref())?;
            init_store(&config, new_passphrase_source().as_ref()).await?;
            println!("Store initialized");
        }
        Command::Migrate {
            from,
            from_version,
            to,
            to_version,
        } => {
            let report = migrate_stores(from, *from_version, to, *to_version).await?;
            println!(
                "Migrated {}, skipped {}, failed {}",
                report.migrated.len(),
                report.skipped.len(),
                report.failed.len()
            );
            for (id, reason) in &report.failed {
                eprintln!("  node {}: {}", id, reason);
            }
            if !report.is_complete() {
                bail!("Migration incomplete");
            }
        }
        Command::Tags { filter } => {
            let config = load_config(cli.config.as_deref(), cli.dburi.as_deref())?;
            for tag in list_tags(&config, filter).await? {
                println!("{}", tag);
            }
        }
        Command::Passwd => {
            let config = load_config(cli.config.as_deref(), cli.dburi.as_deref())?;
            change_passphrase(&config, default_source(), new_passphrase_source().as_ref())
                .await?;
            info!("Master passphrase changed");
            println!("Passphrase changed");
        }
    }
    Ok(())
}
