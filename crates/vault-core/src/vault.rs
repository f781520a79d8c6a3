//! Main vault orchestration
//!
//! A [`Vault`] pairs one crypto engine with one storage driver. It encrypts
//! nodes on the way into storage and decrypts them on the way out; neither
//! side knows about the other.

use tracing::{debug, info};

use crate::config::{Config, SECTION_ENCRYPTION};
use crate::engine::{CryptoEngine, EngineState, PassphraseSource};
use crate::error::{Result, VaultError};
use crate::node::{Node, NodeId, NodeRecord, Tag};
use crate::storage::{create_from_config, StorageDriver};

/// Which node fields are encrypted besides the password
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPolicy {
    /// Encrypt username, url and notes too
    pub protect_metadata: bool,
}

impl Default for FieldPolicy {
    fn default() -> Self {
        Self {
            protect_metadata: true,
        }
    }
}

impl FieldPolicy {
    /// Read `Encryption.protect_metadata`, defaulting to on
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            protect_metadata: config
                .get_bool(SECTION_ENCRYPTION, "protect_metadata")?
                .unwrap_or(true),
        })
    }
}

/// An open store together with its crypto session
pub struct Vault {
    engine: CryptoEngine,
    driver: Box<dyn StorageDriver>,
    policy: FieldPolicy,
}

impl Vault {
    /// Combine an engine with an already opened driver
    pub fn new(engine: CryptoEngine, driver: Box<dyn StorageDriver>, policy: FieldPolicy) -> Self {
        Self {
            engine,
            driver,
            policy,
        }
    }

    /// Open the store described by `config` and load its key record
    pub async fn open_from_config(
        config: &Config,
        source: Option<Box<dyn PassphraseSource>>,
    ) -> Result<Self> {
        let mut engine = CryptoEngine::from_config(config)?;
        if let Some(source) = source {
            engine.set_passphrase_source(source);
        }
        let policy = FieldPolicy::from_config(config)?;
        let driver = create_from_config(config).await?;

        let mut vault = Self::new(engine, driver, policy);
        vault.reload_key_record().await?;
        info!(backend = vault.driver.backend_name(), state = ?vault.state(), "Vault opened");
        Ok(vault)
    }

    /// Load the key record from storage into the engine
    ///
    /// Returns whether the store has one.
    pub async fn reload_key_record(&mut self) -> Result<bool> {
        match self.driver.load_key_record().await? {
            Some(record) => {
                self.engine.load_key_record(record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.key_record().is_some()
    }

    /// Field policy in force: the store's own once it has a key record,
    /// otherwise the one new stores will be created with
    pub fn policy(&self) -> FieldPolicy {
        FieldPolicy {
            protect_metadata: self.metadata_protected(),
        }
    }

    fn metadata_protected(&self) -> bool {
        self.engine
            .key_record()
            .map_or(self.policy.protect_metadata, |record| record.protect_metadata)
    }

    /// Create the key record of a new store and leave the vault unlocked
    pub async fn initialize(&mut self, passphrase: &str) -> Result<()> {
        if self.is_initialized() || self.driver.load_key_record().await?.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }

        // The engine adopts the key only once the store holds its record
        let pending = self
            .engine
            .prepare_initialize(passphrase, self.policy.protect_metadata)?;
        self.driver.save_key_record(pending.record()).await?;
        self.engine.commit(pending);

        info!(backend = self.driver.backend_name(), "Vault initialized");
        Ok(())
    }

    /// Authenticate with a passphrase. A wrong passphrase returns `false`.
    pub fn unlock(&mut self, passphrase: &str) -> Result<bool> {
        self.engine.authenticate(passphrase)
    }

    pub fn lock(&mut self) {
        self.engine.lock();
    }

    /// Rewrap the data key under a new passphrase and persist the new record
    pub async fn change_passphrase(&mut self, source: &dyn PassphraseSource) -> Result<()> {
        let pending = self.engine.prepare_passphrase_change(source)?;
        self.driver.save_key_record(pending.record()).await?;
        self.engine.commit(pending);
        Ok(())
    }

    /// Lock the session and close the driver
    pub async fn close(&mut self) -> Result<()> {
        self.engine.lock();
        self.driver.close().await?;
        info!("Vault closed");
        Ok(())
    }

    pub async fn add_node(&mut self, node: &Node) -> Result<NodeId> {
        let ids = self.add_nodes(std::slice::from_ref(node)).await?;
        ids.first()
            .copied()
            .ok_or_else(|| VaultError::Integrity("storage assigned no id".to_string()))
    }

    pub async fn add_nodes(&mut self, nodes: &[Node]) -> Result<Vec<NodeId>> {
        let records = nodes
            .iter()
            .map(|node| self.seal(node))
            .collect::<Result<Vec<_>>>()?;
        let ids = self.driver.add_nodes(&records).await?;
        debug!(count = ids.len(), "Stored nodes");
        Ok(ids)
    }

    pub async fn get_node(&mut self, id: NodeId) -> Result<Node> {
        let mut nodes = self.get_nodes(&[id], None).await?;
        if nodes.is_empty() {
            return Err(VaultError::NotFound(format!("node {}", id)));
        }
        Ok(nodes.remove(0))
    }

    pub async fn get_nodes(
        &mut self,
        ids: &[NodeId],
        filter_by_tags: Option<&[Tag]>,
    ) -> Result<Vec<Node>> {
        let records = self.driver.get_nodes(ids, filter_by_tags).await?;
        records.into_iter().map(|record| self.unseal(record)).collect()
    }

    pub async fn list_nodes(&self, filter_by_tags: Option<&[Tag]>) -> Result<Vec<NodeId>> {
        self.driver.list_nodes(filter_by_tags).await
    }

    pub async fn list_tags(&self, filter: Option<&[Tag]>) -> Result<Vec<Tag>> {
        self.driver.list_tags(filter).await
    }

    pub async fn edit_node(&mut self, id: NodeId, node: &Node) -> Result<()> {
        let record = self.seal(node)?;
        self.driver.edit_node(id, &record).await?;
        debug!(node_id = %id, "Updated node");
        Ok(())
    }

    pub async fn remove_nodes(&self, ids: &[NodeId]) -> Result<()> {
        self.driver.remove_nodes(ids).await
    }

    pub fn engine(&self) -> &CryptoEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CryptoEngine {
        &mut self.engine
    }

    pub fn driver(&self) -> &dyn StorageDriver {
        self.driver.as_ref()
    }

    fn seal_field(&mut self, value: &str) -> Result<String> {
        if self.metadata_protected() {
            self.engine.encrypt(value)
        } else {
            Ok(value.to_string())
        }
    }

    fn unseal_field(&mut self, value: String) -> Result<String> {
        if self.metadata_protected() {
            Ok(self.engine.decrypt(&value)?.into_inner())
        } else {
            Ok(value)
        }
    }

    fn seal(&mut self, node: &Node) -> Result<NodeRecord> {
        Ok(NodeRecord {
            id: node.id(),
            username: self.seal_field(&node.username)?,
            password: self.engine.encrypt(node.password.expose())?,
            url: self.seal_field(&node.url)?,
            notes: self.seal_field(&node.notes)?,
            tags: node.tags().to_vec(),
            created_at: node.created_at,
            modified_at: node.modified_at,
        })
    }

    fn unseal(&mut self, record: NodeRecord) -> Result<Node> {
        let password = self.engine.decrypt(&record.password)?;
        let username = self.unseal_field(record.username)?;
        let url = self.unseal_field(record.url)?;
        let notes = self.unseal_field(record.notes)?;

        let mut node = Node::new(&username, "", &url)
            .with_notes(&notes)
            .with_tags(record.tags);
        node.password = password;
        node.created_at = record.created_at;
        node.modified_at = record.modified_at;

        Ok(match record.id {
            Some(id) => node.with_id(id),
            None => node,
        })
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("engine", &self.engine)
            .field("backend", &self.driver.backend_name())
            .field("policy", &self.policy)
            .finish()
    }
}
