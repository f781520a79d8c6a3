//! Sectioned key-value configuration
//!
//! Stored as pretty JSON: `{ "Section": { "key": "value" } }`. Values are
//! kept as strings and parsed by the component that consumes them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use directories::ProjectDirs;
use tracing::debug;

use crate::error::{Result, VaultError};

pub const SECTION_GLOBAL: &str = "Global";
pub const SECTION_DATABASE: &str = "Database";
pub const SECTION_ENCRYPTION: &str = "Encryption";

/// Prefix of environment variables that override file values
pub const ENV_PREFIX: &str = "PWVAULT_";

type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    sections: Sections,
    path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let mut config = Self::empty();
        config.set_value(SECTION_GLOBAL, "cls_timeout", "600");
        config.set_value(SECTION_ENCRYPTION, "algorithm", "AES");
        config.set_value(SECTION_ENCRYPTION, "protect_metadata", "true");
        config.set_value(SECTION_DATABASE, "type", "sqlite");
        config
    }
}

impl Config {
    /// Configuration with no values at all, not even defaults
    pub fn empty() -> Self {
        Self {
            sections: Sections::new(),
            path: None,
        }
    }

    /// Defaults plus a database file in the user's data directory
    pub fn with_default_paths() -> Result<Self> {
        let dirs = project_dirs()?;
        let mut config = Self::default();
        let db_file = dirs.data_dir().join("pwvault.db");
        config.set_value(SECTION_DATABASE, "filename", &db_file.to_string_lossy());
        config.path = Some(dirs.config_dir().join("config.json"));
        Ok(config)
    }

    /// Default location of the configuration file
    pub fn default_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.json"))
    }

    /// Load from a file, layering its values over the defaults
    ///
    /// A missing file is not an error: the defaults are returned and `save`
    /// will create the file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        config.path = Some(path.to_path_buf());

        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)?;
        let file: Sections = serde_json::from_str(&contents)
            .map_err(|e| VaultError::Configuration(format!("{}: {}", path.display(), e)))?;

        for (section, values) in file {
            for (key, value) in values {
                config.set_value(&section, &key, &value);
            }
        }

        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save to the file this config was loaded from
    pub async fn save(&self) -> Result<()> {
        let path = self.path.as_ref().ok_or_else(|| {
            VaultError::Configuration("config has no file path to save to".to_string())
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(&self.sections)?;

        // Write atomically using temp file
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, path).await?;

        debug!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_path(&mut self, path: PathBuf) {
        self.path = Some(path);
    }

    pub fn get_value(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|values| values.get(key))
            .map(String::as_str)
    }

    pub fn set_value(&mut self, section: &str, key: &str, value: &str) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn remove_value(&mut self, section: &str, key: &str) -> Option<String> {
        self.sections.get_mut(section)?.remove(key)
    }

    /// Get a value that must be present
    pub fn require(&self, section: &str, key: &str) -> Result<&str> {
        self.get_value(section, key).ok_or_else(|| {
            VaultError::Configuration(format!("missing required setting {}.{}", section, key))
        })
    }

    /// Parse an optional value, failing if it is present but malformed
    pub fn get_parsed<T: FromStr>(&self, section: &str, key: &str) -> Result<Option<T>> {
        match self.get_value(section, key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                VaultError::Configuration(format!(
                    "invalid value {:?} for {}.{}",
                    raw, section, key
                ))
            }),
        }
    }

    /// Parse a boolean setting (`true/false`, `yes/no`, `on/off`, `1/0`)
    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>> {
        match self.get_value(section, key) {
            None => Ok(None),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Some(true)),
                "false" | "no" | "off" | "0" => Ok(Some(false)),
                _ => Err(VaultError::Configuration(format!(
                    "invalid boolean {:?} for {}.{}",
                    raw, section, key
                ))),
            },
        }
    }

    /// Apply `PWVAULT_<SECTION>_<KEY>` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `PWVAULT_<SECTION>_<KEY>` overrides from the given pairs
    ///
    /// The section matches an existing section case-insensitively. Keys are
    /// lowercased.
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let Some((section, key)) = rest.split_once('_') else {
                continue;
            };
            if section.is_empty() || key.is_empty() {
                continue;
            }

            let section = self.canonical_section(section);
            let key = key.to_ascii_lowercase();
            debug!("Config override from environment: {}.{}", section, key);
            self.set_value(&section, &key, &value);
        }
    }

    fn canonical_section(&self, raw: &str) -> String {
        let known = [SECTION_GLOBAL, SECTION_DATABASE, SECTION_ENCRYPTION];
        known
            .into_iter()
            .map(str::to_string)
            .chain(self.sections.keys().cloned())
            .find(|s| s.eq_ignore_ascii_case(raw))
            .unwrap_or_else(|| {
                let lower = raw.to_ascii_lowercase();
                let mut chars = lower.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => lower,
                }
            })
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("org", "pwvault", "pwvault").ok_or_else(|| {
        VaultError::Configuration("Could not determine the user's data directory".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.get_value("Global", "cls_timeout"), Some("600"));
        assert_eq!(config.get_value("Encryption", "algorithm"), Some("AES"));
        assert_eq!(config.get_value("Database", "filename"), None);
    }

    #[test]
    fn test_require_names_missing_key() {
        let config = Config::empty();
        let err = config.require("Encryption", "algorithm").unwrap_err();
        assert!(matches!(err, VaultError::Configuration(_)));
        assert!(err.to_string().contains("Encryption.algorithm"));
    }

    #[test]
    fn test_get_parsed() {
        let mut config = Config::empty();
        config.set_value("Global", "cls_timeout", "-1");
        assert_eq!(config.get_parsed::<i64>("Global", "cls_timeout").unwrap(), Some(-1));

        config.set_value("Global", "cls_timeout", "soon");
        assert!(config.get_parsed::<i64>("Global", "cls_timeout").is_err());

        assert_eq!(config.get_parsed::<i64>("Global", "missing").unwrap(), None);
    }

    #[test]
    fn test_get_bool() {
        let mut config = Config::empty();
        config.set_value("Encryption", "protect_metadata", "no");
        assert_eq!(config.get_bool("Encryption", "protect_metadata").unwrap(), Some(false));
        config.set_value("Encryption", "protect_metadata", "maybe");
        assert!(config.get_bool("Encryption", "protect_metadata").is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(vec![
            ("PWVAULT_GLOBAL_CLS_TIMEOUT".to_string(), "5".to_string()),
            ("PWVAULT_ENCRYPTION_ALGORITHM".to_string(), "ChaCha20".to_string()),
            ("PWVAULT_READLINE_HISTORY".to_string(), "off".to_string()),
            ("PWVAULT_BROKEN".to_string(), "x".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]);

        assert_eq!(config.get_value("Global", "cls_timeout"), Some("5"));
        assert_eq!(config.get_value("Encryption", "algorithm"), Some("ChaCha20"));
        assert_eq!(config.get_value("Readline", "history"), Some("off"));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        {
            let mut config = Config::load(&path).unwrap();
            config.set_value("Database", "filename", "/tmp/store.db");
            config.set_value("Global", "cls_timeout", "30");
            config.save().await.unwrap();
        }

        let config = Config::load(&path).unwrap();
        assert_eq!(config.get_value("Database", "filename"), Some("/tmp/store.db"));
        assert_eq!(config.get_value("Global", "cls_timeout"), Some("30"));
        // Defaults still present for keys the file did not mention
        assert_eq!(config.get_value("Encryption", "algorithm"), Some("AES"));
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(Config::load(&path), Err(VaultError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_save_without_path_fails() {
        let config = Config::default();
        assert!(config.save().await.is_err());
    }
}
