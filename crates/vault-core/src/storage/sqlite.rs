//! SQLite storage backend
//!
//! Normalized layout: nodes, a tag table with unique values and a join table
//! carrying tag order. Every write runs inside a transaction, on the
//! connection thread of `tokio_rusqlite`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::traits::{StorageDriver, CURRENT_SCHEMA_VERSION};
use crate::engine::KeyRecord;
use crate::error::{Result, VaultError};
use crate::node::{dedup_tags, NodeId, NodeRecord, Tag};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version     INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS nodes (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        username    TEXT NOT NULL,
        password    TEXT NOT NULL,
        url         TEXT NOT NULL,
        notes       TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        modified_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tags (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        value       TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS node_tags (
        node_id     INTEGER NOT NULL,
        tag_id      INTEGER NOT NULL,
        position    INTEGER NOT NULL,
        PRIMARY KEY (node_id, tag_id),
        FOREIGN KEY(node_id) REFERENCES nodes(id) ON DELETE CASCADE,
        FOREIGN KEY(tag_id) REFERENCES tags(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_node_tags_tag
        ON node_tags(tag_id);

    CREATE TABLE IF NOT EXISTS crypto_key (
        id          INTEGER PRIMARY KEY CHECK (id = 1),
        record      TEXT NOT NULL
    );
";

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| VaultError::Integrity(format!("bad timestamp {:?}: {}", value, e)))
}

/// Subquery selecting the ids of nodes that carry every tag in `values`
///
/// Binds one parameter per tag, starting at `?1`.
fn matching_nodes_sql(values: &[String]) -> String {
    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "SELECT nt.node_id FROM node_tags nt JOIN tags t ON t.id = nt.tag_id
         WHERE t.value IN ({}) GROUP BY nt.node_id HAVING COUNT(DISTINCT t.value) = {}",
        placeholders.join(", "),
        values.len()
    )
}

/// Distinct filter tags, or `None` when there is nothing to filter on
fn normalize_filter(filter: Option<&[Tag]>) -> Option<Vec<String>> {
    let tags = dedup_tags(filter?.iter().cloned());
    if tags.is_empty() {
        None
    } else {
        Some(tags.into_iter().map(String::from).collect())
    }
}

fn node_tags(conn: &Connection, id: NodeId) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare(
        "SELECT t.value FROM node_tags nt JOIN tags t ON t.id = nt.tag_id
         WHERE nt.node_id = ?1 ORDER BY nt.position",
    )?;
    let values = stmt
        .query_map(params![id.0], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    values.iter().map(|value| Tag::new(value)).collect()
}

fn read_node(conn: &Connection, id: NodeId) -> Result<Option<NodeRecord>> {
    let row = conn
        .query_row(
            "SELECT username, password, url, notes, created_at, modified_at
             FROM nodes WHERE id = ?1",
            params![id.0],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((username, password, url, notes, created_at, modified_at)) = row else {
        return Ok(None);
    };

    Ok(Some(NodeRecord {
        id: Some(id),
        username,
        password,
        url,
        notes,
        tags: node_tags(conn, id)?,
        created_at: Some(parse_time(&created_at)?),
        modified_at: Some(parse_time(&modified_at)?),
    }))
}

fn insert_tags(tx: &Transaction<'_>, id: NodeId, tags: &[Tag]) -> Result<()> {
    for (position, tag) in dedup_tags(tags.iter().cloned()).iter().enumerate() {
        tx.execute(
            "INSERT OR IGNORE INTO tags (value) VALUES (?1)",
            params![tag.as_str()],
        )?;
        let tag_id: i64 = tx.query_row(
            "SELECT id FROM tags WHERE value = ?1",
            params![tag.as_str()],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO node_tags (node_id, tag_id, position) VALUES (?1, ?2, ?3)",
            params![id.0, tag_id, position as i64],
        )?;
    }
    Ok(())
}

fn remove_orphan_tags(tx: &Transaction<'_>) -> Result<()> {
    let removed = tx.execute(
        "DELETE FROM tags WHERE id NOT IN (SELECT tag_id FROM node_tags)",
        [],
    )?;
    if removed > 0 {
        debug!(removed, "Removed orphaned tags");
    }
    Ok(())
}

fn insert_node(tx: &Transaction<'_>, id: Option<NodeId>, node: &NodeRecord) -> Result<NodeId> {
    let now = Utc::now();
    let created_at = node.created_at.unwrap_or(now).to_rfc3339();
    let modified_at = node.modified_at.unwrap_or(now).to_rfc3339();

    tx.execute(
        "INSERT INTO nodes (id, username, password, url, notes, created_at, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id.map(|id| id.0),
            node.username,
            node.password,
            node.url,
            node.notes,
            created_at,
            modified_at,
        ],
    )?;
    let id = NodeId(tx.last_insert_rowid());
    insert_tags(tx, id, &node.tags)?;
    Ok(id)
}

/// Run `f` on the connection's background thread
///
/// Domain errors travel back inside the closure's result. Only failures of
/// the connection thread itself surface as a `tokio_rusqlite` error.
async fn run<T, F>(conn: &tokio_rusqlite::Connection, f: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    conn.call(move |conn| -> std::result::Result<Result<T>, rusqlite::Error> { Ok(f(conn)) })
        .await
        .map_err(map_tr_err)?
}

fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> VaultError {
    VaultError::Connection(format!("sqlite connection: {}", e))
}

/// Storage backend on a local SQLite database file
///
/// All statements run on the single background thread owned by the
/// `tokio_rusqlite` connection, never on the async runtime.
pub struct SqliteDriver {
    path: PathBuf,
    conn: Mutex<Option<tokio_rusqlite::Connection>>,
    open: AtomicBool,
}

impl SqliteDriver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    /// Create a driver, rejecting any schema version but the current one
    pub fn with_schema_version(path: impl Into<PathBuf>, schema_version: u32) -> Result<Self> {
        if schema_version != CURRENT_SCHEMA_VERSION {
            return Err(VaultError::Configuration(format!(
                "sqlite store only supports schema version {}, got {}; use migrate",
                CURRENT_SCHEMA_VERSION, schema_version
            )));
        }
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn closed() -> VaultError {
        VaultError::Connection("sqlite store is closed".to_string())
    }

    /// Run `f` against the open connection
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.lock().await.clone().ok_or_else(Self::closed)?;
        run(&conn, f).await
    }

    /// Create the schema on a fresh file, or check the version of an existing one
    fn prepare(conn: &mut Connection, path: &Path) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        if table_exists(conn, "schema_version")? {
            let version: Option<i64> = conn
                .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                    row.get(0)
                })
                .optional()?;
            return match version {
                Some(v) if v == i64::from(CURRENT_SCHEMA_VERSION) => Ok(()),
                Some(v) => Err(VaultError::Configuration(format!(
                    "{} has schema version {}, expected {}; use migrate",
                    path.display(),
                    v,
                    CURRENT_SCHEMA_VERSION
                ))),
                None => Err(VaultError::Integrity(format!(
                    "{} has no recorded schema version",
                    path.display()
                ))),
            };
        }

        if table_exists(conn, "nodes")? {
            return Err(VaultError::Configuration(format!(
                "{} uses an unversioned layout; use migrate",
                path.display()
            )));
        }

        let tx = conn.transaction()?;
        tx.execute_batch(SCHEMA)?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![CURRENT_SCHEMA_VERSION],
        )?;
        tx.commit()?;
        debug!(path = %path.display(), "Created sqlite schema");
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for SqliteDriver {
    async fn open(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = tokio_rusqlite::Connection::open(&self.path)
            .await
            .map_err(|e| VaultError::Connection(format!("{}: {}", self.path.display(), e)))?;
        let path = self.path.clone();
        // A connection that fails preparation is dropped, which stops its thread
        run(&conn, move |conn| Self::prepare(conn, &path)).await?;

        info!(path = %self.path.display(), "Opened sqlite store");
        *guard = Some(conn);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        self.open.store(false, Ordering::SeqCst);
        if let Some(conn) = guard.take() {
            conn.close().await.map_err(map_tr_err)?;
            debug!(path = %self.path.display(), "Closed sqlite store");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn add_nodes(&self, nodes: &[NodeRecord]) -> Result<Vec<NodeId>> {
        let nodes = nodes.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let ids = nodes
                .iter()
                .map(|node| insert_node(&tx, None, node))
                .collect::<Result<Vec<_>>>()?;
            tx.commit()?;
            debug!(count = ids.len(), "Added nodes");
            Ok(ids)
        })
        .await
    }

    async fn restore_nodes(&self, nodes: &[NodeRecord]) -> Result<()> {
        let nodes = nodes.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for node in &nodes {
                let id = node.id.ok_or_else(|| {
                    VaultError::InvalidInput("restored node has no id".to_string())
                })?;
                let taken = tx
                    .query_row("SELECT 1 FROM nodes WHERE id = ?1", params![id.0], |_| Ok(()))
                    .optional()?
                    .is_some();
                if taken {
                    return Err(VaultError::Integrity(format!("node id {} already exists", id)));
                }
                insert_node(&tx, Some(id), node)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_nodes(
        &self,
        ids: &[NodeId],
        filter_by_tags: Option<&[Tag]>,
    ) -> Result<Vec<NodeRecord>> {
        let ids = ids.to_vec();
        let filter = filter_by_tags.map(<[Tag]>::to_vec);
        self.with_conn(move |conn| {
            let mut found = Vec::with_capacity(ids.len());
            for id in ids {
                let node = read_node(conn, id)?
                    .ok_or_else(|| VaultError::NotFound(format!("node {}", id)))?;
                if filter.as_deref().map_or(true, |tags| node.has_all_tags(tags)) {
                    found.push(node);
                }
            }
            Ok(found)
        })
        .await
    }

    async fn list_nodes(&self, filter_by_tags: Option<&[Tag]>) -> Result<Vec<NodeId>> {
        let filter = normalize_filter(filter_by_tags);
        self.with_conn(move |conn| {
            let ids = match filter {
                None => {
                    let mut stmt = conn.prepare("SELECT id FROM nodes ORDER BY id")?;
                    let ids = stmt
                        .query_map([], |row| row.get::<_, i64>(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    ids
                }
                Some(values) => {
                    let sql = format!(
                        "{} ORDER BY nt.node_id",
                        matching_nodes_sql(&values)
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let ids = stmt
                        .query_map(params_from_iter(values.iter()), |row| row.get::<_, i64>(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    ids
                }
            };
            Ok(ids.into_iter().map(NodeId).collect())
        })
        .await
    }

    async fn edit_node(&self, id: NodeId, node: &NodeRecord) -> Result<()> {
        let node = node.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE nodes SET username = ?1, password = ?2, url = ?3, notes = ?4,
                 modified_at = ?5 WHERE id = ?6",
                params![
                    node.username,
                    node.password,
                    node.url,
                    node.notes,
                    Utc::now().to_rfc3339(),
                    id.0,
                ],
            )?;
            if changed == 0 {
                return Err(VaultError::NotFound(format!("node {}", id)));
            }

            tx.execute("DELETE FROM node_tags WHERE node_id = ?1", params![id.0])?;
            insert_tags(&tx, id, &node.tags)?;
            remove_orphan_tags(&tx)?;
            tx.commit()?;
            debug!(node_id = %id, "Edited node");
            Ok(())
        })
        .await
    }

    async fn remove_nodes(&self, ids: &[NodeId]) -> Result<()> {
        // A repeated id names the same node, not a second one
        let ids: Vec<NodeId> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for id in &ids {
                let removed = tx.execute("DELETE FROM nodes WHERE id = ?1", params![id.0])?;
                if removed == 0 {
                    // Dropping the transaction rolls back earlier deletes
                    return Err(VaultError::NotFound(format!("node {}", id)));
                }
            }
            remove_orphan_tags(&tx)?;
            tx.commit()?;
            debug!(count = ids.len(), "Removed nodes");
            Ok(())
        })
        .await
    }

    async fn list_tags(&self, filter: Option<&[Tag]>) -> Result<Vec<Tag>> {
        let filter = normalize_filter(filter);
        self.with_conn(move |conn| {
            let values = match filter {
                None => {
                    let mut stmt = conn.prepare("SELECT value FROM tags ORDER BY value")?;
                    let values = stmt
                        .query_map([], |row| row.get::<_, String>(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    values
                }
                Some(filter) => {
                    let sql = format!(
                        "SELECT DISTINCT t.value FROM node_tags nt JOIN tags t ON t.id = nt.tag_id
                         WHERE nt.node_id IN ({}) ORDER BY t.value",
                        matching_nodes_sql(&filter)
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let values = stmt
                        .query_map(params_from_iter(filter.iter()), |row| row.get::<_, String>(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    values
                }
            };
            values.iter().map(|value| Tag::new(value)).collect()
        })
        .await
    }

    async fn load_key_record(&self) -> Result<Option<KeyRecord>> {
        self.with_conn(|conn| {
            let record: Option<String> = conn
                .query_row("SELECT record FROM crypto_key WHERE id = 1", [], |row| {
                    row.get(0)
                })
                .optional()?;
            match record {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn save_key_record(&self, record: &KeyRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO crypto_key (id, record) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET record = excluded.record",
                params![json],
            )?;
            tx.commit()?;
            debug!("Saved key record");
            Ok(())
        })
        .await
    }

    async fn current_schema_version(&self) -> Result<u32> {
        self.with_conn(|conn| {
            let version: i64 =
                conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                    row.get(0)
                })?;
            u32::try_from(version)
                .map_err(|_| VaultError::Integrity(format!("bad schema version {}", version)))
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "SQLite Store"
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
            notes: "some notes".to_string(),
            tags: Tag::parse_many(tags).unwrap(),
            created_at: None,
            modified_at: None,
        }
    }

    fn tags(values: &[&str]) -> Vec<Tag> {
        Tag::parse_many(values).unwrap()
    }

    async fn open_store(dir: &TempDir) -> SqliteDriver {
        let driver = SqliteDriver::new(dir.path().join("store.db"));
        driver.open().await.unwrap();
        driver
    }

    #[tokio::test]
    async fn test_add_and_get_in_requested_order() {
        let dir = TempDir::new().unwrap();
        let driver = open_store(&dir).await;

        let ids = driver
            .add_nodes(&[record("a", &["testing1", "testing2"]), record("b", &[])])
            .await
            .unwrap();
        assert_eq!(ids, vec![NodeId(1), NodeId(2)]);

        let nodes = driver.get_nodes(&[ids[1], ids[0]], None).await.unwrap();
        assert_eq!(nodes[0].username, "b");
        assert_eq!(nodes[1].username, "a");
        assert_eq!(nodes[1].tags, tags(&["testing1", "testing2"]));
        assert!(nodes[1].created_at.is_some());
    }

    #[tokio::test]
    async fn test_get_missing_node() {
        let dir = TempDir::new().unwrap();
        let driver = open_store(&dir).await;
        assert!(matches!(
            driver.get_nodes(&[NodeId(42)], None).await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tag_filters() {
        let dir = TempDir::new().unwrap();
        let driver = open_store(&dir).await;
        let ids = driver
            .add_nodes(&[
                record("a", &["web", "mail"]),
                record("b", &["web"]),
                record("c", &["bank"]),
            ])
            .await
            .unwrap();

        let web = tags(&["web"]);
        assert_eq!(driver.list_nodes(Some(&web)).await.unwrap(), ids[..2].to_vec());

        let both = tags(&["mail", "web"]);
        assert_eq!(driver.list_nodes(Some(&both)).await.unwrap(), vec![ids[0]]);
        assert_eq!(driver.get_nodes(&ids, Some(&both)).await.unwrap().len(), 1);

        assert_eq!(
            driver.list_tags(None).await.unwrap(),
            tags(&["bank", "mail", "web"])
        );
        assert_eq!(
            driver.list_tags(Some(&web)).await.unwrap(),
            tags(&["mail", "web"])
        );
        assert!(driver
            .list_tags(Some(&tags(&["missing"])))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_edit_replaces_tags_and_cleans_orphans() {
        let dir = TempDir::new().unwrap();
        let driver = open_store(&dir).await;
        let ids = driver.add_nodes(&[record("a", &["old"])]).await.unwrap();
        let before = driver.get_nodes(&ids, None).await.unwrap().remove(0);

        let mut edited = record("renamed", &["new"]);
        edited.created_at = None;
        driver.edit_node(ids[0], &edited).await.unwrap();

        let after = driver.get_nodes(&ids, None).await.unwrap().remove(0);
        assert_eq!(after.username, "renamed");
        assert_eq!(after.created_at, before.created_at);
        assert!(after.modified_at >= before.modified_at);
        assert_eq!(driver.list_tags(None).await.unwrap(), tags(&["new"]));

        assert!(matches!(
            driver.edit_node(NodeId(99), &edited).await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_is_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let driver = open_store(&dir).await;
        let ids = driver
            .add_nodes(&[record("a", &["shared"]), record("b", &["shared", "solo"])])
            .await
            .unwrap();

        assert!(matches!(
            driver.remove_nodes(&[ids[0], NodeId(99)]).await,
            Err(VaultError::NotFound(_))
        ));
        assert_eq!(driver.list_nodes(None).await.unwrap(), ids);

        driver.remove_nodes(&ids[1..]).await.unwrap();
        assert_eq!(driver.list_tags(None).await.unwrap(), tags(&["shared"]));
    }

    #[tokio::test]
    async fn test_remove_repeated_id() {
        let dir = TempDir::new().unwrap();
        let driver = open_store(&dir).await;
        let ids = driver
            .add_nodes(&[record("a", &["x"]), record("b", &[])])
            .await
            .unwrap();

        driver.remove_nodes(&[ids[0], ids[0]]).await.unwrap();
        assert_eq!(driver.list_nodes(None).await.unwrap(), vec![ids[1]]);
        assert!(driver.list_tags(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_keeps_ids() {
        let dir = TempDir::new().unwrap();
        let driver = open_store(&dir).await;

        let mut node = record("a", &["x"]);
        node.id = Some(NodeId(10));
        driver.restore_nodes(&[node.clone()]).await.unwrap();
        assert_eq!(driver.list_nodes(None).await.unwrap(), vec![NodeId(10)]);

        assert!(matches!(
            driver.restore_nodes(&[node]).await,
            Err(VaultError::Integrity(_))
        ));

        let next = driver.add_nodes(&[record("b", &[])]).await.unwrap();
        assert_eq!(next, vec![NodeId(11)]);

        assert!(matches!(
            driver.restore_nodes(&[record("c", &[])]).await,
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_key_record_upsert_and_persistence() {
        let dir = TempDir::new().unwrap();
        let mut record = KeyRecord {
            algorithm: "AES".into(),
            kdf_salt: "salt".into(),
            kdf_params: Default::default(),
            wrapped_key: "w1".into(),
            verification: "v1".into(),
            protect_metadata: true,
        };

        {
            let driver = open_store(&dir).await;
            assert!(driver.load_key_record().await.unwrap().is_none());
            driver.save_key_record(&record).await.unwrap();
            record.wrapped_key = "w2".into();
            driver.save_key_record(&record).await.unwrap();
            driver.close().await.unwrap();
        }

        let driver = open_store(&dir).await;
        assert_eq!(driver.load_key_record().await.unwrap(), Some(record));
        assert_eq!(driver.current_schema_version().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_other_schema_version_requires_migrate() {
        assert!(matches!(
            SqliteDriver::with_schema_version("store.db", 1),
            Err(VaultError::Configuration(_))
        ));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");
        {
            let driver = SqliteDriver::new(&path);
            driver.open().await.unwrap();
            driver.close().await.unwrap();
        }
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("UPDATE schema_version SET version = 1", [])
                .unwrap();
        }

        let driver = SqliteDriver::new(&path);
        match driver.open().await {
            Err(VaultError::Configuration(msg)) => assert!(msg.contains("migrate")),
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_store() {
        let dir = TempDir::new().unwrap();
        let driver = open_store(&dir).await;
        driver.close().await.unwrap();
        driver.close().await.unwrap();
        assert!(!driver.is_open());
        assert!(matches!(
            driver.list_nodes(None).await,
            Err(VaultError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_not_a_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();

        let driver = SqliteDriver::new(path);
        assert!(matches!(
            driver.open().await,
            Err(VaultError::Connection(_))
        ));
    }
}
