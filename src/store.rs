//! Local shadow of the outline tree's encryption-relevant metadata.
//!
//! The store records, per node id, the decrypted name and description, the
//! parent edge, and share metadata. `locked` is derived from the name on
//! every update and can never be set directly. Lookups that climb parent
//! pointers are bounded iterative walks that stop at missing parents,
//! cycles, and a configurable depth cap.
//!
//! A share root is the top of another document. When the main tree shows it
//! through an alias node, the root records the alias id as `local_id` and
//! takes the alias's parent as its own: that pair is the mount link. Lock
//! state flows through the mount link; property lookups and share ownership
//! stop at the share root.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::warn;

/// Server-assigned node identifier.
pub type NodeId = String;

/// One tracked node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Node {
    pub name: Option<String>,
    pub description: Option<String>,
    pub parent: Option<NodeId>,
    locked: bool,
    pub share_id: Option<String>,
    pub local_id: Option<NodeId>,
}

impl Node {
    /// Whether this node's own name carries the boundary tag.
    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn is_share_root(&self) -> bool {
        self.share_id.is_some()
    }

    /// A share root shown in the main tree through an alias node.
    pub fn is_mounted(&self) -> bool {
        self.is_share_root() && self.local_id.is_some()
    }
}

/// A single field change in a [`NodePatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    /// Leave the stored value untouched.
    #[default]
    Keep,
    Set(T),
    /// Delete the stored value.
    Clear,
}

impl<T> Patch<T> {
    fn apply(self, slot: &mut Option<T>) {
        match self {
            Self::Keep => {}
            Self::Set(value) => *slot = Some(value),
            Self::Clear => *slot = None,
        }
    }

    fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }
}

impl<T> From<Option<T>> for Patch<T> {
    /// `Some` sets, `None` keeps.
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Keep, Self::Set)
    }
}

/// Partial node properties merged by [`NodeStore::update`].
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub name: Patch<String>,
    pub description: Patch<String>,
    pub parent: Patch<NodeId>,
    pub share_id: Patch<String>,
    pub local_id: Patch<NodeId>,
}

impl NodePatch {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Patch::Set(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Patch::Set(description.into());
        self
    }

    pub fn parent(mut self, parent: Option<NodeId>) -> Self {
        self.parent = parent.map_or(Patch::Clear, Patch::Set);
        self
    }

    pub fn share_id(mut self, share_id: impl Into<String>) -> Self {
        self.share_id = Patch::Set(share_id.into());
        self
    }

    pub fn local_id(mut self, local_id: impl Into<NodeId>) -> Self {
        self.local_id = Patch::Set(local_id.into());
        self
    }
}

/// A property addressable through [`NodeStore::get_property`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Name,
    Description,
    Parent,
    Locked,
    ShareId,
    LocalId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    Text(String),
    Flag(bool),
}

impl Node {
    fn property(&self, property: Property) -> Option<PropValue> {
        let text = |v: &Option<String>| v.clone().map(PropValue::Text);
        match property {
            Property::Name => text(&self.name),
            Property::Description => text(&self.description),
            Property::Parent => text(&self.parent),
            Property::Locked => Some(PropValue::Flag(self.locked)),
            Property::ShareId => text(&self.share_id),
            Property::LocalId => text(&self.local_id),
        }
    }
}

/// id → [`Node`] map with boundary-aware lookups.
#[derive(Debug, Clone)]
pub struct NodeStore {
    nodes: BTreeMap<NodeId, Node>,
    lock_tag: String,
    max_depth: usize,
}

impl NodeStore {
    pub fn new(lock_tag: impl Into<String>, max_depth: usize) -> Self {
        Self {
            nodes: BTreeMap::new(),
            lock_tag: lock_tag.into(),
            max_depth,
        }
    }

    pub fn lock_tag(&self) -> &str {
        &self.lock_tag
    }

    /// Whether `text` carries the boundary tag.
    pub fn is_tagged(&self, text: &str) -> bool {
        text.contains(&self.lock_tag)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Merge `patch` into the node, creating it if needed.
    ///
    /// A share root keeps its parent unless `enforce_parent_override` is set:
    /// ordinary sync traffic must not silently reparent an imported subtree.
    /// Empty ids are ignored. Returns whether anything was recorded.
    pub fn update(&mut self, id: &str, mut patch: NodePatch, enforce_parent_override: bool) -> bool {
        if id.is_empty() {
            return false;
        }
        let tag = &self.lock_tag;
        let node = self.nodes.entry(id.to_string()).or_default();
        if node.is_share_root() && !enforce_parent_override && !patch.parent.is_keep() {
            patch.parent = Patch::Keep;
        }

        patch.name.apply(&mut node.name);
        patch.description.apply(&mut node.description);
        patch.parent.apply(&mut node.parent);
        patch.share_id.apply(&mut node.share_id);
        patch.local_id.apply(&mut node.local_id);
        node.locked = node.name.as_deref().is_some_and(|name| name.contains(tag.as_str()));
        true
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Read a property, optionally climbing to ancestors while the value is
    /// absent or one of `ignored`. Climbing stops at share roots.
    pub fn get_property(
        &self,
        id: &str,
        property: Property,
        recursive: bool,
        ignored: &[PropValue],
    ) -> Option<PropValue> {
        let mut fallback = None;
        for (_, node) in self.ancestors(id, false) {
            match node.property(property) {
                Some(value) if !ignored.contains(&value) => return Some(value),
                // An ignored value is still the answer if nothing better is found.
                found => fallback = fallback.or(found),
            }
            if !recursive {
                break;
            }
        }
        fallback
    }

    /// `direct` reads only the node's own tag. Otherwise the node is locked
    /// when it or any ancestor is tagged, following mount links out of
    /// shared documents.
    pub fn is_locked(&self, id: &str, direct: bool) -> bool {
        if direct {
            return self.get(id).is_some_and(Node::locked);
        }
        self.ancestors(id, true).any(|(_, node)| node.locked())
    }

    /// Whether the node's content belongs inside an encryption boundary,
    /// i.e. its parent is effectively locked. An unmounted share root has no
    /// parent that counts.
    pub fn is_parent_locked(&self, id: &str) -> bool {
        match self.get(id) {
            Some(node) if node.is_share_root() && !node.is_mounted() => false,
            Some(node) => node
                .parent
                .as_deref()
                .is_some_and(|parent| self.is_locked(parent, false)),
            None => false,
        }
    }

    /// The share root shown through alias node `alias`, if any.
    pub fn mounted_share_root(&self, alias: &str) -> Option<&NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.is_share_root() && node.local_id.as_deref() == Some(alias))
            .map(|(id, _)| id)
    }

    pub fn is_mount_alias(&self, id: &str) -> bool {
        self.mounted_share_root(id).is_some()
    }

    /// Share id owning `id`: the nearest share root at or above it.
    /// `None` means the primary document.
    pub fn owning_share(&self, id: &str) -> Option<String> {
        match self.get_property(id, Property::ShareId, true, &[]) {
            Some(PropValue::Text(share_id)) => Some(share_id),
            _ => None,
        }
    }

    pub fn find_share_root(&self, share_id: &str) -> Option<&NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.share_id.as_deref() == Some(share_id))
            .map(|(id, _)| id)
    }

    pub fn children(&self, id: &str) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.parent.as_deref() == Some(id))
            .map(|(child, _)| child.clone())
            .collect()
    }

    pub fn has_child(&self, id: &str) -> bool {
        self.nodes
            .values()
            .any(|node| node.parent.as_deref() == Some(id))
    }

    /// Remove the node. Children are left in place; a later operation
    /// reparents or deletes them.
    pub fn delete(&mut self, id: &str) -> Option<Node> {
        self.nodes.remove(id)
    }

    /// Walk from `id` up through its parents. The walk yields `id` first,
    /// ends after a share root unless `cross_shares` and the root is
    /// mounted, and ends early on a missing parent, a cycle, or the depth cap.
    pub fn ancestors(&self, id: &str, cross_shares: bool) -> Ancestors<'_> {
        Ancestors {
            store: self,
            next: Some(id.to_string()),
            seen: HashSet::new(),
            cross_shares,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Pretty JSON of every tracked node, for host-side debugging.
    pub fn dump(&self) -> String {
        serde_json::to_string_pretty(&self.nodes).unwrap_or_default()
    }
}

pub struct Ancestors<'a> {
    store: &'a NodeStore,
    next: Option<NodeId>,
    seen: HashSet<NodeId>,
    cross_shares: bool,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        if self.seen.len() >= self.store.max_depth {
            warn!(id = %id, "parent walk hit depth cap");
            return None;
        }
        if !self.seen.insert(id.clone()) {
            warn!(id = %id, "parent cycle detected");
            return None;
        }
        let node = self.store.nodes.get(&id)?;
        let continues = if node.is_share_root() {
            self.cross_shares && node.is_mounted()
        } else {
            true
        };
        if continues {
            self.next = node.parent.clone();
        }
        Some((id, node))
    }
}
