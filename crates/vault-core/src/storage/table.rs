//! In-memory node table shared by the memory and JSON file backends
//!
//! Tags are derived from the nodes that carry them, so a tag disappears
//! exactly when its last node stops referencing it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;

use crate::engine::KeyRecord;
use crate::error::{Result, VaultError};
use crate::node::{dedup_tags, has_all_tags, NodeId, NodeRecord, Tag};

#[derive(Debug, Clone)]
pub(crate) struct NodeTable {
    pub(crate) nodes: BTreeMap<NodeId, NodeRecord>,
    pub(crate) next_id: i64,
    pub(crate) key_record: Option<KeyRecord>,
    /// Schema version 1 has no timestamps
    stamp_times: bool,
}

impl NodeTable {
    pub(crate) fn new(schema_version: u32) -> Self {
        Self {
            nodes: BTreeMap::new(),
            next_id: 1,
            key_record: None,
            stamp_times: schema_version >= 2,
        }
    }

    pub(crate) fn from_parts(
        schema_version: u32,
        nodes: impl IntoIterator<Item = NodeRecord>,
        next_id: i64,
        key_record: Option<KeyRecord>,
    ) -> Result<Self> {
        let mut table = Self::new(schema_version);
        table.key_record = key_record;
        for node in nodes {
            let id = node.id.ok_or_else(|| {
                VaultError::Integrity("stored node is missing its id".to_string())
            })?;
            if table.nodes.insert(id, node).is_some() {
                return Err(VaultError::Integrity(format!("duplicate node id {}", id)));
            }
        }
        let max_id = table.nodes.keys().next_back().map_or(0, |id| id.0);
        table.next_id = next_id.max(max_id + 1);
        Ok(table)
    }

    fn normalize(&self, node: &NodeRecord, id: NodeId) -> NodeRecord {
        let mut node = node.clone();
        node.id = Some(id);
        node.tags = dedup_tags(node.tags);
        if self.stamp_times {
            let now = Utc::now();
            node.created_at.get_or_insert(now);
            node.modified_at.get_or_insert(now);
        } else {
            node.created_at = None;
            node.modified_at = None;
        }
        node
    }

    pub(crate) fn add(&mut self, nodes: &[NodeRecord]) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(nodes.len());
        for node in nodes {
            let id = NodeId(self.next_id);
            self.next_id += 1;
            let stored = self.normalize(node, id);
            self.nodes.insert(id, stored);
            ids.push(id);
        }
        ids
    }

    pub(crate) fn restore(&mut self, nodes: &[NodeRecord]) -> Result<()> {
        // Validate everything first so a bad batch changes nothing
        let mut batch = BTreeSet::new();
        for node in nodes {
            let id = node.id.ok_or_else(|| {
                VaultError::InvalidInput("restored node has no id".to_string())
            })?;
            if self.nodes.contains_key(&id) || !batch.insert(id) {
                return Err(VaultError::Integrity(format!("node id {} already exists", id)));
            }
        }

        for node in nodes {
            if let Some(id) = node.id {
                let stored = self.normalize(node, id);
                self.nodes.insert(id, stored);
                self.next_id = self.next_id.max(id.0 + 1);
            }
        }
        Ok(())
    }

    pub(crate) fn get(&self, ids: &[NodeId], filter: Option<&[Tag]>) -> Result<Vec<NodeRecord>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            let node = self
                .nodes
                .get(id)
                .ok_or_else(|| VaultError::NotFound(format!("node {}", id)))?;
            if filter.map_or(true, |tags| node.has_all_tags(tags)) {
                found.push(node.clone());
            }
        }
        Ok(found)
    }

    pub(crate) fn list(&self, filter: Option<&[Tag]>) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| filter.map_or(true, |tags| has_all_tags(&node.tags, tags)))
            .filter_map(NodeRecord::id)
            .collect()
    }

    pub(crate) fn edit(&mut self, id: NodeId, node: &NodeRecord) -> Result<()> {
        let stamp_times = self.stamp_times;
        let existing = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| VaultError::NotFound(format!("node {}", id)))?;

        existing.username = node.username.clone();
        existing.password = node.password.clone();
        existing.url = node.url.clone();
        existing.notes = node.notes.clone();
        existing.tags = dedup_tags(node.tags.iter().cloned());
        if stamp_times {
            existing.modified_at = Some(Utc::now());
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, ids: &[NodeId]) -> Result<()> {
        if let Some(missing) = ids.iter().find(|id| !self.nodes.contains_key(id)) {
            return Err(VaultError::NotFound(format!("node {}", missing)));
        }
        for id in ids {
            self.nodes.remove(id);
        }
        Ok(())
    }

    pub(crate) fn tags(&self, filter: Option<&[Tag]>) -> Vec<Tag> {
        self.nodes
            .values()
            .filter(|node| filter.map_or(true, |tags| has_all_tags(&node.tags, tags)))
            .flat_map(|node| node.tags.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, tags: &[&str]) -> NodeRecord {
        NodeRecord {
            id: None,
            username: user.to_string(),
            password: "aes:00:00:00".to_string(),
            url: String::new(),
            notes: String::new(),
            tags: Tag::parse_many(tags).unwrap(),
            created_at: None,
            modified_at: None,
        }
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut table = NodeTable::new(2);
        let ids = table.add(&[record("a", &[]), record("b", &[])]);
        table.remove(&ids[1..]).unwrap();
        let next = table.add(&[record("c", &[])]);
        assert_eq!(next, vec![NodeId(3)]);
    }

    #[test]
    fn test_from_parts_repairs_next_id() {
        let mut stored = record("a", &[]);
        stored.id = Some(NodeId(7));
        let table = NodeTable::from_parts(2, vec![stored], 1, None).unwrap();
        assert_eq!(table.next_id, 8);
    }

    #[test]
    fn test_version_one_has_no_timestamps() {
        let mut table = NodeTable::new(1);
        let ids = table.add(&[record("a", &[])]);
        let node = &table.get(&ids, None).unwrap()[0];
        assert!(node.created_at.is_none());
    }

    #[test]
    fn test_restore_batch_is_all_or_nothing() {
        let mut table = NodeTable::new(2);
        table.add(&[record("a", &[])]);

        let mut fresh = record("b", &[]);
        fresh.id = Some(NodeId(5));
        let mut clash = record("c", &[]);
        clash.id = Some(NodeId(1));

        assert!(matches!(
            table.restore(&[fresh, clash]),
            Err(VaultError::Integrity(_))
        ));
        assert_eq!(table.nodes.len(), 1);
    }
}
