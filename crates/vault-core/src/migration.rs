//! Copying a store into another backend or schema version
//!
//! Migration copies the key record and the encrypted node records verbatim.
//! Nothing is decrypted, so no passphrase is needed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{Result, VaultError};
use crate::node::{dedup_tags, NodeId, NodeRecord};
use crate::storage::StorageDriver;

/// What a migration run did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Source ids written to the destination
    pub migrated: Vec<NodeId>,
    /// Source ids already present in the destination with the same content
    pub skipped: Vec<NodeId>,
    /// Source ids that could not be migrated, with the reason
    pub failed: Vec<(NodeId, String)>,
    /// Source id to destination id for every migrated or skipped node
    pub id_map: BTreeMap<NodeId, NodeId>,
    /// Whether the key record was written to the destination
    pub key_record_copied: bool,
}

impl MigrationReport {
    /// True when no node failed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Bring a record from schema `from` up to schema `to`
///
/// Version 2 adds timestamps, which are stamped with `now` when missing.
/// Blobs are never touched.
pub fn upgrade_record(mut node: NodeRecord, from: u32, to: u32, now: DateTime<Utc>) -> NodeRecord {
    if from < 2 && to >= 2 {
        node.created_at.get_or_insert(now);
        node.modified_at.get_or_insert(now);
    }
    node.tags = dedup_tags(node.tags);
    node
}

/// Copy every node of `source` into `dest`
///
/// Safe to re-run: nodes already present with the same content are skipped.
/// Per-node failures are collected in the report and the run continues.
pub async fn migrate(source: &dyn StorageDriver, dest: &dyn StorageDriver) -> Result<MigrationReport> {
    let source_version = source.current_schema_version().await?;
    let dest_version = dest.current_schema_version().await?;
    if source_version > dest_version {
        return Err(VaultError::Configuration(format!(
            "cannot migrate schema version {} down to {}",
            source_version, dest_version
        )));
    }

    info!(
        from = source.backend_name(),
        to = dest.backend_name(),
        source_version,
        dest_version,
        "Starting migration"
    );

    let mut report = MigrationReport::default();

    match (source.load_key_record().await?, dest.load_key_record().await?) {
        (Some(record), None) => {
            dest.save_key_record(&record).await?;
            report.key_record_copied = true;
            debug!("Copied key record");
        }
        (Some(record), Some(existing)) if record != existing => {
            return Err(VaultError::Integrity(
                "destination is encrypted under a different key record".to_string(),
            ));
        }
        (None, _) => warn!("Source store has no key record"),
        _ => {}
    }

    // Only needed when the destination renumbers nodes
    let mut dest_nodes = if dest.preserves_ids() {
        Vec::new()
    } else {
        let ids = dest.list_nodes(None).await?;
        dest.get_nodes(&ids, None).await?
    };

    let now = Utc::now();
    for id in source.list_nodes(None).await? {
        let node = match source.get_nodes(&[id], None).await {
            Ok(mut nodes) if !nodes.is_empty() => nodes.remove(0),
            Ok(_) => {
                report.failed.push((id, "node vanished from source".to_string()));
                continue;
            }
            Err(e) => {
                warn!(node_id = %id, error = %e, "Failed to read node");
                report.failed.push((id, e.to_string()));
                continue;
            }
        };
        let node = if source_version < dest_version {
            upgrade_record(node, source_version, dest_version, now)
        } else {
            node
        };

        let outcome = if dest.preserves_ids() {
            copy_keeping_id(dest, id, node).await
        } else {
            copy_renumbered(dest, &mut dest_nodes, node).await
        };

        match outcome {
            Ok(Copied::Written(new_id)) => {
                report.migrated.push(id);
                report.id_map.insert(id, new_id);
            }
            Ok(Copied::AlreadyPresent(new_id)) => {
                report.skipped.push(id);
                report.id_map.insert(id, new_id);
            }
            Err(e) => {
                warn!(node_id = %id, error = %e, "Failed to migrate node");
                report.failed.push((id, e.to_string()));
            }
        }
    }

    info!(
        migrated = report.migrated.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Migration finished"
    );
    Ok(report)
}

enum Copied {
    Written(NodeId),
    AlreadyPresent(NodeId),
}

async fn copy_keeping_id(dest: &dyn StorageDriver, id: NodeId, node: NodeRecord) -> Result<Copied> {
    match dest.get_nodes(&[id], None).await {
        Ok(existing) => match existing.first() {
            Some(existing) if existing.same_content(&node) => Ok(Copied::AlreadyPresent(id)),
            _ => Err(VaultError::Integrity(format!(
                "destination already holds a different node {}",
                id
            ))),
        },
        Err(VaultError::NotFound(_)) => {
            dest.restore_nodes(std::slice::from_ref(&node)).await?;
            Ok(Copied::Written(id))
        }
        Err(e) => Err(e),
    }
}

async fn copy_renumbered(
    dest: &dyn StorageDriver,
    dest_nodes: &mut Vec<NodeRecord>,
    node: NodeRecord,
) -> Result<Copied> {
    if let Some(existing) = dest_nodes.iter().find(|n| n.same_content(&node)) {
        if let Some(existing_id) = existing.id {
            return Ok(Copied::AlreadyPresent(existing_id));
        }
    }

    let ids = dest.add_nodes(std::slice::from_ref(&node)).await?;
    let new_id = ids
        .first()
        .copied()
        .ok_or_else(|| VaultError::Integrity("destination assigned no id".to_string()))?;

    let mut stored = node;
    stored.id = Some(new_id);
    dest_nodes.push(stored);
    Ok(Copied::Written(new_id))
}
