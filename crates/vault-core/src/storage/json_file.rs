//! JSON file storage backend
//!
//! The whole store lives in a single JSON document that is rewritten
//! atomically after every mutation. Node fields arrive already encrypted,
//! so the file only ever holds cipher blobs and tags.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::table::NodeTable;
use super::traits::{StorageDriver, CURRENT_SCHEMA_VERSION};
use crate::engine::KeyRecord;
use crate::error::{Result, VaultError};
use crate::node::{NodeId, NodeRecord, Tag};

/// Schema versions this backend can read and write
pub const SUPPORTED_VERSIONS: [u32; 2] = [1, 2];

/// Only used to find out which shape to parse
#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

/// File format for schema version 2
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    next_id: i64,
    #[serde(default)]
    key_record: Option<KeyRecord>,
    #[serde(default)]
    nodes: Vec<NodeRecord>,
}

/// File format for schema version 1
#[derive(Debug, Serialize, Deserialize)]
struct LegacyStoreFile {
    version: u32,
    next_id: i64,
    #[serde(default)]
    key_record: Option<KeyRecord>,
    #[serde(default)]
    nodes: Vec<LegacyNode>,
}

/// Version 1 node: tags in one space-separated string, no timestamps
#[derive(Debug, Serialize, Deserialize)]
struct LegacyNode {
    id: NodeId,
    username: String,
    password: String,
    url: String,
    notes: String,
    #[serde(default)]
    tags: String,
}

impl From<&NodeRecord> for LegacyNode {
    fn from(node: &NodeRecord) -> Self {
        let tags: Vec<&str> = node.tags.iter().map(Tag::as_str).collect();
        Self {
            id: node.id.unwrap_or(NodeId(0)),
            username: node.username.clone(),
            password: node.password.clone(),
            url: node.url.clone(),
            notes: node.notes.clone(),
            tags: tags.join(" "),
        }
    }
}

impl TryFrom<LegacyNode> for NodeRecord {
    type Error = VaultError;

    fn try_from(node: LegacyNode) -> Result<Self> {
        Ok(NodeRecord {
            id: Some(node.id),
            username: node.username,
            password: node.password,
            url: node.url,
            notes: node.notes,
            tags: Tag::parse_many(node.tags.split_whitespace())?,
            created_at: None,
            modified_at: None,
        })
    }
}

/// Parse a store document, insisting on the expected schema version
fn decode(contents: &str, expected: u32, path: &Path) -> Result<NodeTable> {
    let header: VersionHeader = serde_json::from_str(contents)?;
    if header.version != expected {
        return Err(VaultError::Configuration(format!(
            "{} has schema version {}, expected {}; use migrate",
            path.display(),
            header.version,
            expected
        )));
    }

    match header.version {
        1 => {
            let file: LegacyStoreFile = serde_json::from_str(contents)?;
            let nodes = file
                .nodes
                .into_iter()
                .map(NodeRecord::try_from)
                .collect::<Result<Vec<_>>>()?;
            NodeTable::from_parts(1, nodes, file.next_id, file.key_record)
        }
        _ => {
            let file: StoreFile = serde_json::from_str(contents)?;
            NodeTable::from_parts(file.version, file.nodes, file.next_id, file.key_record)
        }
    }
}

fn encode(table: &NodeTable, version: u32) -> Result<String> {
    let contents = if version == 1 {
        serde_json::to_string_pretty(&LegacyStoreFile {
            version,
            next_id: table.next_id,
            key_record: table.key_record.clone(),
            nodes: table.nodes.values().map(LegacyNode::from).collect(),
        })?
    } else {
        serde_json::to_string_pretty(&StoreFile {
            version,
            next_id: table.next_id,
            key_record: table.key_record.clone(),
            nodes: table.nodes.values().cloned().collect(),
        })?
    };
    Ok(contents)
}

/// Storage backend keeping the store in one JSON file
pub struct JsonFileDriver {
    path: PathBuf,
    schema_version: u32,
    /// Loaded store, `None` while closed
    table: Mutex<Option<NodeTable>>,
    open: AtomicBool,
}

impl JsonFileDriver {
    /// Create a driver for `path` at the current schema version
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema_version: CURRENT_SCHEMA_VERSION,
            table: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    /// Create a driver reading and writing an explicit schema version
    pub fn with_schema_version(path: impl Into<PathBuf>, schema_version: u32) -> Result<Self> {
        if !SUPPORTED_VERSIONS.contains(&schema_version) {
            return Err(VaultError::Configuration(format!(
                "json store does not support schema version {}",
                schema_version
            )));
        }
        let mut driver = Self::new(path);
        driver.schema_version = schema_version;
        Ok(driver)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn closed() -> VaultError {
        VaultError::Connection("json store is closed".to_string())
    }

    async fn write_file(&self, table: &NodeTable) -> Result<()> {
        let contents = encode(table, self.schema_version)?;

        // Write atomically using a temp file
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!(path = %self.path.display(), nodes = table.nodes.len(), "Saved json store");
        Ok(())
    }

    async fn read<T>(&self, f: impl FnOnce(&NodeTable) -> Result<T> + Send) -> Result<T> {
        let guard = self.table.lock().await;
        let table = guard.as_ref().ok_or_else(Self::closed)?;
        f(table)
    }

    /// Apply `f` to a staged copy and keep it only once it is on disk
    async fn mutate<T: Send>(
        &self,
        f: impl FnOnce(&mut NodeTable) -> Result<T> + Send,
    ) -> Result<T> {
        let mut guard = self.table.lock().await;
        let table = guard.as_mut().ok_or_else(Self::closed)?;

        let mut staged = table.clone();
        let out = f(&mut staged)?;
        self.write_file(&staged).await?;
        *table = staged;
        Ok(out)
    }
}

#[async_trait]
impl StorageDriver for JsonFileDriver {
    async fn open(&self) -> Result<()> {
        let mut guard = self.table.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let table = if tokio::fs::try_exists(&self.path).await? {
            let contents = tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| VaultError::Connection(format!("{}: {}", self.path.display(), e)))?;
            decode(&contents, self.schema_version, &self.path)?
        } else {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let table = NodeTable::new(self.schema_version);
            self.write_file(&table)
                .await
                .map_err(|e| VaultError::Connection(format!("{}: {}", self.path.display(), e)))?;
            debug!(path = %self.path.display(), "Created json store");
            table
        };

        info!(
            path = %self.path.display(),
            version = self.schema_version,
            nodes = table.nodes.len(),
            "Opened json store"
        );
        *guard = Some(table);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.table.lock().await;
        if guard.take().is_some() {
            debug!(path = %self.path.display(), "Closed json store");
        }
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn add_nodes(&self, nodes: &[NodeRecord]) -> Result<Vec<NodeId>> {
        self.mutate(|table| Ok(table.add(nodes))).await
    }

    async fn restore_nodes(&self, nodes: &[NodeRecord]) -> Result<()> {
        self.mutate(|table| table.restore(nodes)).await
    }

    async fn get_nodes(
        &self,
        ids: &[NodeId],
        filter_by_tags: Option<&[Tag]>,
    ) -> Result<Vec<NodeRecord>> {
        self.read(|table| table.get(ids, filter_by_tags)).await
    }

    async fn list_nodes(&self, filter_by_tags: Option<&[Tag]>) -> Result<Vec<NodeId>> {
        self.read(|table| Ok(table.list(filter_by_tags))).await
    }

    async fn edit_node(&self, id: NodeId, node: &NodeRecord) -> Result<()> {
        self.mutate(|table| table.edit(id, node)).await
    }

    async fn remove_nodes(&self, ids: &[NodeId]) -> Result<()> {
        self.mutate(|table| table.remove(ids)).await
    }

    async fn list_tags(&self, filter: Option<&[Tag]>) -> Result<Vec<Tag>> {
        self.read(|table| Ok(table.tags(filter))).await
    }

    async fn load_key_record(&self) -> Result<Option<KeyRecord>> {
        self.read(|table| Ok(table.key_record.clone())).await
    }

    async fn save_key_record(&self, record: &KeyRecord) -> Result<()> {
        self.mutate(|table| {
            table.key_record = Some(record.clone());
            Ok(())
        })
        .await
    }

    async fn current_schema_version(&self) -> Result<u32> {
        self.read(|_| Ok(self.schema_version)).await
    }

    fn backend_name(&self) -> &'static str {
        "JSON File Store"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(user: &str, tags: &[&str]) -> NodeRecord {
        NodeRecord {
            id: None,
            username: user.to_string(),
            password: format!("aes:{}:00:00", hex::encode(user)),
            url: "example.org".to_string(),
            notes: String::new(),
            tags: Tag::parse_many(tags).unwrap(),
            created_at: None,
            modified_at: None,
        }
    }

    async fn open_store(dir: &TempDir, version: u32) -> JsonFileDriver {
        let driver =
            JsonFileDriver::with_schema_version(dir.path().join("store.json"), version).unwrap();
        driver.open().await.unwrap();
        driver
    }

    #[tokio::test]
    async fn test_open_creates_file() {
        let dir = TempDir::new().unwrap();
        let driver = JsonFileDriver::new(dir.path().join("nested").join("store.json"));
        driver.open().await.unwrap();

        assert!(driver.path().exists());
        assert!(driver.is_open());
        assert_eq!(driver.current_schema_version().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_persistence() {
        let dir = TempDir::new().unwrap();

        let ids = {
            let driver = open_store(&dir, 2).await;
            let ids = driver
                .add_nodes(&[record("tester", &["testing1", "testing2"])])
                .await
                .unwrap();
            driver.close().await.unwrap();
            ids
        };

        let driver = open_store(&dir, 2).await;
        let nodes = driver.get_nodes(&ids, None).await.unwrap();
        assert_eq!(nodes[0].username, "tester");
        assert!(nodes[0].created_at.is_some());
        assert_eq!(
            driver.list_tags(None).await.unwrap(),
            Tag::parse_many(["testing1", "testing2"]).unwrap()
        );

        // Ids keep counting from where the previous session stopped
        let next = driver.add_nodes(&[record("other", &[])]).await.unwrap();
        assert_eq!(next[0], NodeId(ids[0].0 + 1));
    }

    #[tokio::test]
    async fn test_legacy_layout_on_disk() {
        let dir = TempDir::new().unwrap();
        let driver = open_store(&dir, 1).await;
        driver
            .add_nodes(&[record("tester", &["web", "mail"])])
            .await
            .unwrap();

        let raw = std::fs::read_to_string(driver.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["nodes"][0]["tags"], "web mail");
        assert!(value["nodes"][0].get("created_at").is_none());

        let nodes = driver.get_nodes(&[NodeId(1)], None).await.unwrap();
        assert_eq!(nodes[0].tags, Tag::parse_many(["web", "mail"]).unwrap());
        assert!(nodes[0].created_at.is_none());
    }

    #[tokio::test]
    async fn test_version_mismatch_requires_migrate() {
        let dir = TempDir::new().unwrap();
        open_store(&dir, 1).await.close().await.unwrap();

        let driver = JsonFileDriver::new(dir.path().join("store.json"));
        match driver.open().await {
            Err(VaultError::Configuration(msg)) => assert!(msg.contains("migrate")),
            other => panic!("expected configuration error, got {:?}", other),
        }
        assert!(!driver.is_open());
    }

    #[tokio::test]
    async fn test_unsupported_version() {
        assert!(matches!(
            JsonFileDriver::with_schema_version("store.json", 3),
            Err(VaultError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_remove_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let driver = open_store(&dir, 2).await;
        let ids = driver.add_nodes(&[record("a", &["x"])]).await.unwrap();
        let before = std::fs::read_to_string(driver.path()).unwrap();

        let result = driver.remove_nodes(&[ids[0], NodeId(99)]).await;
        assert!(matches!(result, Err(VaultError::NotFound(_))));
        assert_eq!(std::fs::read_to_string(driver.path()).unwrap(), before);
        assert_eq!(driver.list_nodes(None).await.unwrap(), ids);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let dir = TempDir::new().unwrap();
        let driver = open_store(&dir, 2).await;
        driver.close().await.unwrap();
        driver.close().await.unwrap();

        assert!(matches!(
            driver.add_nodes(&[record("a", &[])]).await,
            Err(VaultError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();

        let driver = JsonFileDriver::new(path);
        assert!(matches!(
            driver.open().await,
            Err(VaultError::Serialization(_))
        ));
    }
}
