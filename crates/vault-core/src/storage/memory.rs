//! Volatile in-process storage backend

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::table::NodeTable;
use super::traits::{StorageDriver, CURRENT_SCHEMA_VERSION};
use crate::engine::KeyRecord;
use crate::error::{Result, VaultError};
use crate::node::{NodeId, NodeRecord, Tag};

/// Keeps everything in memory. Contents survive `close`/`open` but not drop.
pub struct MemoryDriver {
    table: Mutex<NodeTable>,
    open: AtomicBool,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(NodeTable::new(CURRENT_SCHEMA_VERSION)),
            open: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VaultError::Connection("memory store is closed".to_string()))
        }
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        debug!("Opened memory store");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn add_nodes(&self, nodes: &[NodeRecord]) -> Result<Vec<NodeId>> {
        self.ensure_open()?;
        Ok(self.table.lock().await.add(nodes))
    }

    async fn restore_nodes(&self, nodes: &[NodeRecord]) -> Result<()> {
        self.ensure_open()?;
        self.table.lock().await.restore(nodes)
    }

    async fn get_nodes(
        &self,
        ids: &[NodeId],
        filter_by_tags: Option<&[Tag]>,
    ) -> Result<Vec<NodeRecord>> {
        self.ensure_open()?;
        self.table.lock().await.get(ids, filter_by_tags)
    }

    async fn list_nodes(&self, filter_by_tags: Option<&[Tag]>) -> Result<Vec<NodeId>> {
        self.ensure_open()?;
        Ok(self.table.lock().await.list(filter_by_tags))
    }

    async fn edit_node(&self, id: NodeId, node: &NodeRecord) -> Result<()> {
        self.ensure_open()?;
        self.table.lock().await.edit(id, node)
    }

    async fn remove_nodes(&self, ids: &[NodeId]) -> Result<()> {
        self.ensure_open()?;
        self.table.lock().await.remove(ids)
    }

    async fn list_tags(&self, filter: Option<&[Tag]>) -> Result<Vec<Tag>> {
        self.ensure_open()?;
        Ok(self.table.lock().await.tags(filter))
    }

    async fn load_key_record(&self) -> Result<Option<KeyRecord>> {
        self.ensure_open()?;
        Ok(self.table.lock().await.key_record.clone())
    }

    async fn save_key_record(&self, record: &KeyRecord) -> Result<()> {
        self.ensure_open()?;
        self.table.lock().await.key_record = Some(record.clone());
        Ok(())
    }

    async fn current_schema_version(&self) -> Result<u32> {
        self.ensure_open()?;
        Ok(CURRENT_SCHEMA_VERSION)
    }

    fn backend_name(&self) -> &'static str {
        "Memory Store"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, tags: &[&str]) -> NodeRecord {
        NodeRecord {
            id: None,
            username: user.to_string(),
            password: format!("aes:00:00:{}", hex::encode(user)),
            url: "example.org".to_string(),
            notes: String::new(),
            tags: Tag::parse_many(tags).unwrap(),
            created_at: None,
            modified_at: None,
        }
    }

    async fn open_driver() -> MemoryDriver {
        let driver = MemoryDriver::new();
        driver.open().await.unwrap();
        driver
    }

    #[tokio::test]
    async fn test_closed_driver_rejects_calls() {
        let driver = MemoryDriver::new();
        assert!(matches!(
            driver.list_nodes(None).await,
            Err(VaultError::Connection(_))
        ));

        driver.open().await.unwrap();
        driver.close().await.unwrap();
        driver.close().await.unwrap();
        assert!(!driver.is_open());
    }

    #[tokio::test]
    async fn test_add_get_stamps_times() {
        let driver = open_driver().await;
        let ids = driver.add_nodes(&[record("tester", &["a"])]).await.unwrap();

        let nodes = driver.get_nodes(&ids, None).await.unwrap();
        assert_eq!(nodes[0].id, Some(ids[0]));
        assert!(nodes[0].created_at.is_some());
        assert_eq!(nodes[0].created_at, nodes[0].modified_at);
    }

    #[tokio::test]
    async fn test_shared_tag_survives_node_removal() {
        let driver = open_driver().await;
        let ids = driver
            .add_nodes(&[record("a", &["shared", "only-a"]), record("b", &["shared"])])
            .await
            .unwrap();

        driver.remove_nodes(&ids[..1]).await.unwrap();

        let tags = driver.list_tags(None).await.unwrap();
        assert_eq!(tags, Tag::parse_many(["shared"]).unwrap());
    }

    #[tokio::test]
    async fn test_key_record_roundtrip() {
        let driver = open_driver().await;
        assert!(driver.load_key_record().await.unwrap().is_none());

        let record = KeyRecord {
            algorithm: "AES".into(),
            kdf_salt: "salt".into(),
            kdf_params: Default::default(),
            wrapped_key: "w".into(),
            verification: "v".into(),
            protect_metadata: true,
        };
        driver.save_key_record(&record).await.unwrap();
        assert_eq!(driver.load_key_record().await.unwrap(), Some(record));
    }
}
