//! Subtree re-encryption.
//!
//! When a node gains or loses the lock tag, or moves across a boundary, the
//! server still holds its descendants in the old form. A [`SubtreeJob`] is
//! a snapshot of the affected nodes taken at the moment of the transition;
//! it is later turned into edit operations that rewrite every name and
//! description in the target form, grouped into one batch per owning
//! document.
//!
//! The walk stops at nested boundaries: a directly locked descendant is
//! rewritten itself (its content sits inside the outer boundary) but its own
//! children are already encrypted under it and are left alone.
//!
//! Shared documents mounted below the walked node are entered through their
//! share root, and their nodes land in that share's batch. The main-tree
//! alias of a mounted root is skipped: it shows the root's content and is
//! not stored on its own.

use std::collections::{BTreeMap, HashSet};

use serde_json::Map;
use tracing::debug;

use crate::encrypter::FieldCipher;
use crate::protocol::{Edit, EditData, EditUndoData, Operation, PushPollData};
use crate::session::SessionFields;
use crate::store::{NodeId, NodeStore};
use crate::transform::Direction;

/// Options for a direct re-encryption request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReencryptFlags {
    /// Skip the job entirely; used while replaying server state.
    pub no_network: bool,
}

/// One node's content as it stood when the job was planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEdit {
    pub id: NodeId,
    pub share_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreeJob {
    pub root: NodeId,
    pub root_name: Option<String>,
    pub target: Direction,
    pub include_root: bool,
    pub edits: Vec<PlannedEdit>,
}

impl SubtreeJob {
    /// Snapshot the subtree below `root` (and `root` itself when
    /// `include_root`). The store holds plaintext, so the snapshot does too.
    pub fn plan(store: &NodeStore, root: &str, target: Direction, include_root: bool) -> Self {
        let root_node = store.get(root);
        let mut job = Self {
            root: root.to_string(),
            root_name: root_node.and_then(|node| node.name.clone()),
            target,
            include_root,
            edits: Vec::new(),
        };
        let Some(root_node) = root_node else {
            return job;
        };

        let snapshot = |id: &str| {
            let node = store.get(id);
            PlannedEdit {
                id: id.to_string(),
                share_id: store.owning_share(id),
                name: node.and_then(|n| n.name.clone()),
                description: node.and_then(|n| n.description.clone()),
            }
        };

        if include_root {
            job.edits.push(snapshot(root));
            if root_node.locked() {
                return job;
            }
        }

        let mut seen = HashSet::from([root.to_string()]);
        let mut pending = vec![root.to_string()];
        while let Some(parent) = pending.pop() {
            for child in store.children(&parent).into_iter().rev() {
                if !seen.insert(child.clone()) {
                    continue;
                }
                let Some(node) = store.get(&child) else {
                    continue;
                };
                if store.is_mount_alias(&child) {
                    continue;
                }
                job.edits.push(snapshot(&child));
                if !node.locked() {
                    pending.push(child);
                }
            }
        }

        debug!(root = %job.root, nodes = job.edits.len(), ?target, "subtree planned");
        job
    }

    /// Turning a subtree back to plaintext publishes it, so the user has to
    /// agree first.
    pub fn needs_confirmation(&self) -> bool {
        self.target == Direction::Decrypt && !self.edits.is_empty()
    }

    pub fn prompt(&self) -> String {
        let name = self.root_name.as_deref().unwrap_or(&self.root);
        format!(
            "{} item(s) under \"{}\" will be stored on the server as plaintext. Continue?",
            self.edits.len(),
            name
        )
    }

    /// Build the edit operations, one batch per owning document, each
    /// stamped with that document's latest transaction id.
    pub async fn into_batches(self, cipher: &dyn FieldCipher, session: &SessionFields) -> Vec<PushPollData> {
        let mut buckets: BTreeMap<Option<String>, Vec<Operation>> = BTreeMap::new();

        for edit in self.edits {
            if edit.name.is_none() && edit.description.is_none() {
                continue;
            }
            let name = target_form(cipher, self.target, edit.name).await;
            let description = target_form(cipher, self.target, edit.description).await;

            let data = EditData {
                projectid: edit.id,
                name: name.clone(),
                description: description.clone(),
                extra: Map::new(),
            };
            let undo = EditUndoData {
                previous_name: name,
                previous_description: description,
                extra: Map::new(),
            };
            buckets
                .entry(edit.share_id)
                .or_default()
                .push(Operation::Edit(Edit::new(data, Some(undo))));
        }

        buckets
            .into_iter()
            .map(|(share_id, operations)| PushPollData {
                most_recent_operation_transaction_id: session
                    .transaction_id(share_id.as_deref())
                    .map(str::to_owned),
                operations: Some(operations),
                share_id,
                extra: Map::new(),
            })
            .collect()
    }
}

async fn target_form(cipher: &dyn FieldCipher, target: Direction, text: Option<String>) -> Option<String> {
    match (target, text) {
        (Direction::Encrypt, Some(text)) if !text.is_empty() => Some(cipher.encrypt(&text).await),
        (_, text) => text,
    }
}
