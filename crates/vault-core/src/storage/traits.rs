//! Storage driver trait definitions

use async_trait::async_trait;

use crate::engine::KeyRecord;
use crate::error::Result;
use crate::node::{NodeId, NodeRecord, Tag};

/// Schema version written by this build
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Uniform contract every storage backend implements
///
/// Drivers only ever see already-encrypted records: they store the strings
/// of a [`NodeRecord`] verbatim and never call the crypto engine.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Open the underlying store, creating it if it does not exist yet
    async fn open(&self) -> Result<()>;

    /// Release the underlying connection. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Insert new nodes and return their freshly assigned ids
    ///
    /// Incoming ids are ignored.
    async fn add_nodes(&self, nodes: &[NodeRecord]) -> Result<Vec<NodeId>>;

    /// Insert nodes under the ids they carry
    ///
    /// Fails with `Integrity` if an id is already taken.
    async fn restore_nodes(&self, nodes: &[NodeRecord]) -> Result<()>;

    /// Fetch nodes in the order of `ids`
    ///
    /// Fails with `NotFound` if any id is absent. With a tag filter only the
    /// nodes carrying every filter tag are returned.
    async fn get_nodes(
        &self,
        ids: &[NodeId],
        filter_by_tags: Option<&[Tag]>,
    ) -> Result<Vec<NodeRecord>>;

    /// Ids of all nodes, ascending, optionally filtered by tags
    async fn list_nodes(&self, filter_by_tags: Option<&[Tag]>) -> Result<Vec<NodeId>>;

    /// Replace the content and tags of an existing node
    async fn edit_node(&self, id: NodeId, node: &NodeRecord) -> Result<()>;

    /// Remove nodes. Nothing is removed if any id is absent.
    async fn remove_nodes(&self, ids: &[NodeId]) -> Result<()>;

    /// Tags in use, sorted by value
    ///
    /// With a filter: the tags found on nodes that carry every filter tag.
    async fn list_tags(&self, filter: Option<&[Tag]>) -> Result<Vec<Tag>>;

    async fn load_key_record(&self) -> Result<Option<KeyRecord>>;

    async fn save_key_record(&self, record: &KeyRecord) -> Result<()>;

    async fn current_schema_version(&self) -> Result<u32>;

    /// Get a human-readable name for this storage backend
    fn backend_name(&self) -> &'static str;

    /// Whether `restore_nodes` keeps incoming ids stable
    fn preserves_ids(&self) -> bool {
        true
    }
}
