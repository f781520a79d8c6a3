//! Backend selection by identifier, URI or configuration

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, warn};
use url::Url;

use super::json_file::JsonFileDriver;
use super::memory::MemoryDriver;
use super::sqlite::SqliteDriver;
use super::traits::{StorageDriver, CURRENT_SCHEMA_VERSION};
use crate::config::{Config, SECTION_DATABASE};
use crate::error::{Result, VaultError};

/// Every backend identifier this crate knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Sqlite,
    Json,
    Memory,
    PostgreSql,
    MySql,
    MongoDb,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        BackendKind::Sqlite,
        BackendKind::Json,
        BackendKind::Memory,
        BackendKind::PostgreSql,
        BackendKind::MySql,
        BackendKind::MongoDb,
    ];

    /// Canonical identifier
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Json => "json",
            BackendKind::Memory => "memory",
            BackendKind::PostgreSql => "postgresql",
            BackendKind::MySql => "mysql",
            BackendKind::MongoDb => "mongodb",
        }
    }

    /// Whether this build ships a driver for the backend
    pub fn is_available(&self) -> bool {
        matches!(
            self,
            BackendKind::Sqlite | BackendKind::Json | BackendKind::Memory
        )
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(BackendKind::Sqlite),
            "json" | "file" => Ok(BackendKind::Json),
            "memory" => Ok(BackendKind::Memory),
            "postgresql" | "postgres" => Ok(BackendKind::PostgreSql),
            "mysql" => Ok(BackendKind::MySql),
            "mongodb" | "mongo" => Ok(BackendKind::MongoDb),
            _ => Err(VaultError::UnknownBackend(s.to_string())),
        }
    }
}

/// Where a backend keeps its data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Store file for file-backed drivers
    pub filename: Option<PathBuf>,
    /// URI the params were parsed from, if any
    pub dburi: Option<String>,
}

impl ConnectionParams {
    pub fn with_filename(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: Some(filename.into()),
            dburi: None,
        }
    }

    /// Parse `sqlite:///path`, `json:///path` or `memory://`
    ///
    /// The path is taken verbatim from the URI, without percent-decoding.
    pub fn from_uri(uri: &str) -> Result<(BackendKind, Self)> {
        let url = Url::parse(uri)
            .map_err(|e| VaultError::Configuration(format!("invalid dburi {:?}: {}", uri, e)))?;
        let kind: BackendKind = url.scheme().parse()?;

        let mut params = Self {
            filename: None,
            dburi: Some(uri.to_string()),
        };

        if matches!(kind, BackendKind::Sqlite | BackendKind::Json) {
            let host = url.host_str().unwrap_or("");
            if !(host.is_empty() || host == "localhost") {
                return Err(VaultError::Configuration(format!(
                    "dburi {:?} must name an absolute path, as in {}:///path/to/store",
                    uri, kind
                )));
            }
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(VaultError::Configuration(format!(
                    "dburi {:?} has no file path",
                    uri
                )));
            }
            params.filename = Some(PathBuf::from(path));
        }

        Ok((kind, params))
    }

    fn require_filename(&self, kind: BackendKind) -> Result<PathBuf> {
        self.filename.clone().ok_or_else(|| {
            VaultError::Configuration(format!("{} backend needs a filename", kind))
        })
    }
}

/// Build and open a driver for a backend identifier
///
/// Identifiers are case-insensitive and accept the usual aliases.
pub async fn create(
    backend_type: &str,
    schema_version: u32,
    params: &ConnectionParams,
) -> Result<Box<dyn StorageDriver>> {
    let kind: BackendKind = backend_type.parse()?;
    create_kind(kind, schema_version, params).await
}

/// Build and open a driver for an already resolved backend
pub async fn create_kind(
    kind: BackendKind,
    schema_version: u32,
    params: &ConnectionParams,
) -> Result<Box<dyn StorageDriver>> {
    let driver: Box<dyn StorageDriver> = match kind {
        BackendKind::Sqlite => Box::new(SqliteDriver::with_schema_version(
            params.require_filename(kind)?,
            schema_version,
        )?),
        BackendKind::Json => Box::new(JsonFileDriver::with_schema_version(
            params.require_filename(kind)?,
            schema_version,
        )?),
        BackendKind::Memory => {
            if schema_version != CURRENT_SCHEMA_VERSION {
                return Err(VaultError::Configuration(format!(
                    "memory backend only supports schema version {}",
                    CURRENT_SCHEMA_VERSION
                )));
            }
            Box::new(MemoryDriver::new())
        }
        BackendKind::PostgreSql | BackendKind::MySql | BackendKind::MongoDb => {
            return Err(VaultError::UnknownBackend(format!(
                "{} is not available in this build",
                kind
            )));
        }
    };

    if let Err(e) = driver.open().await {
        warn!(backend = %kind, error = %e, "Failed to open storage backend");
        return Err(match e {
            VaultError::Configuration(_) | VaultError::Connection(_) => e,
            other => VaultError::Connection(other.to_string()),
        });
    }

    debug!(backend = %kind, version = schema_version, "Storage backend ready");
    Ok(driver)
}

/// Build and open the driver described by the `Database` section
///
/// `Database.dburi` wins over `Database.type` plus `Database.filename`.
pub async fn create_from_config(config: &Config) -> Result<Box<dyn StorageDriver>> {
    let schema_version = config
        .get_parsed::<u32>(SECTION_DATABASE, "schema_version")?
        .unwrap_or(CURRENT_SCHEMA_VERSION);

    if let Some(uri) = config.get_value(SECTION_DATABASE, "dburi") {
        let (kind, params) = ConnectionParams::from_uri(uri)?;
        return create_kind(kind, schema_version, &params).await;
    }

    let backend = config.require(SECTION_DATABASE, "type")?;
    let params = ConnectionParams {
        filename: config
            .get_value(SECTION_DATABASE, "filename")
            .map(PathBuf::from),
        dburi: None,
    };
    create(backend, schema_version, &params).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identifiers_and_aliases() {
        assert_eq!("SQLite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("sqlite3".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("file".parse::<BackendKind>().unwrap(), BackendKind::Json);
        assert_eq!("Postgres".parse::<BackendKind>().unwrap(), BackendKind::PostgreSql);
        assert_eq!("mongo".parse::<BackendKind>().unwrap(), BackendKind::MongoDb);
        assert!(matches!(
            "oracle".parse::<BackendKind>(),
            Err(VaultError::UnknownBackend(_))
        ));

        for kind in BackendKind::ALL {
            assert_eq!(kind.name().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_from_uri() {
        let (kind, params) = ConnectionParams::from_uri("sqlite:///var/lib/pw/store.db").unwrap();
        assert_eq!(kind, BackendKind::Sqlite);
        assert_eq!(params.filename, Some(PathBuf::from("/var/lib/pw/store.db")));

        let (kind, params) = ConnectionParams::from_uri("memory://").unwrap();
        assert_eq!(kind, BackendKind::Memory);
        assert!(params.filename.is_none());

        assert!(matches!(
            ConnectionParams::from_uri("json://"),
            Err(VaultError::Configuration(_))
        ));
        assert!(matches!(
            ConnectionParams::from_uri("not a uri"),
            Err(VaultError::Configuration(_))
        ));
        assert!(matches!(
            ConnectionParams::from_uri("redis://localhost/0"),
            Err(VaultError::UnknownBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_create_opens_driver() {
        let dir = TempDir::new().unwrap();
        let params = ConnectionParams::with_filename(dir.path().join("store.db"));

        let driver = create("sqlite", 2, &params).await.unwrap();
        assert!(driver.is_open());
        assert_eq!(driver.backend_name(), "SQLite Store");

        let memory = create("memory", 2, &ConnectionParams::default()).await.unwrap();
        assert!(memory.is_open());
    }

    #[tokio::test]
    async fn test_create_rejects() {
        let empty = ConnectionParams::default();

        assert!(matches!(
            create("postgresql", 2, &empty).await,
            Err(VaultError::UnknownBackend(msg)) if msg.contains("not available")
        ));
        assert!(matches!(
            create("nosuch", 2, &empty).await,
            Err(VaultError::UnknownBackend(_))
        ));
        assert!(matches!(
            create("sqlite", 2, &empty).await,
            Err(VaultError::Configuration(_))
        ));
        assert!(matches!(
            create("sqlite", 1, &ConnectionParams::with_filename("x.db")).await,
            Err(VaultError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_open_failure_is_connection_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ broken").unwrap();

        let result = create("json", 2, &ConnectionParams::with_filename(path)).await;
        assert!(matches!(result, Err(VaultError::Connection(_))));
    }

    #[tokio::test]
    async fn test_create_from_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.json");

        let mut config = Config::empty();
        config.set_value(SECTION_DATABASE, "type", "file");
        config.set_value(SECTION_DATABASE, "filename", &path.to_string_lossy());
        config.set_value(SECTION_DATABASE, "schema_version", "1");

        let driver = create_from_config(&config).await.unwrap();
        assert_eq!(driver.current_schema_version().await.unwrap(), 1);
        assert!(path.exists());

        let mut config = Config::empty();
        config.set_value(SECTION_DATABASE, "type", "json");
        config.set_value(SECTION_DATABASE, "dburi", "memory://");
        let driver = create_from_config(&config).await.unwrap();
        assert_eq!(driver.backend_name(), "Memory Store");

        assert!(matches!(
            create_from_config(&Config::empty()).await,
            Err(VaultError::Configuration(_))
        ));
    }
}
