//! Per-operation transforms.
//!
//! Every operation passing through the pipeline does three things, in an
//! order that depends on the direction:
//!
//! 1. record what it says about the tree in the [`NodeStore`],
//! 2. detect encryption-boundary transitions and plan subtree jobs for them,
//! 3. encrypt (outbound) or decrypt (inbound) its name/description fields.
//!
//! Outbound, the store is updated with plaintext first and a field is
//! encrypted only when its node's parent is effectively locked. Inbound,
//! every marker-prefixed field is decrypted first and the store then records
//! the plaintext.

use tracing::{debug, info, warn};

use crate::encrypter::FieldCipher;
use crate::protocol::{
    parent_from_wire, BulkCreate, BulkMove, Edit, Operation, ProjectTree, PushPollData,
};
use crate::reencrypt::SubtreeJob;
use crate::store::{NodeId, NodePatch, NodeStore};

/// Which way field content flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Outbound: plaintext in locked subtrees becomes ciphertext.
    Encrypt,
    /// Inbound or re-display: every ciphertext field becomes plaintext.
    Decrypt,
}

pub struct TransformContext<'a> {
    pub store: &'a mut NodeStore,
    pub cipher: &'a dyn FieldCipher,
    pub direction: Direction,
    /// With `false`, boundary transitions are only logged; no subtree job is
    /// planned. Used when reconciling server echoes.
    pub network: bool,
}

impl TransformContext<'_> {
    async fn encrypt_field(&self, slot: &mut Option<String>) {
        if let Some(text) = slot.as_mut().filter(|t| !t.is_empty()) {
            *text = self.cipher.encrypt(text).await;
        }
    }

    async fn decrypt_field(&self, slot: &mut Option<String>) {
        if let Some(text) = slot.as_mut().filter(|t| !t.is_empty()) {
            *text = self.cipher.decrypt(text).await;
        }
    }

    fn encrypting(&self) -> bool {
        self.direction == Direction::Encrypt
    }

    fn decrypting(&self) -> bool {
        self.direction == Direction::Decrypt
    }
}

/// Transform every operation of a batch. Returns the subtree jobs the
/// batch's boundary transitions require, in operation order.
pub async fn transform_batch(ctx: &mut TransformContext<'_>, batch: &mut PushPollData) -> Vec<SubtreeJob> {
    let mut jobs = Vec::new();
    for op in batch.operations.iter_mut().flatten() {
        jobs.extend(transform_operation(ctx, op).await);
    }
    jobs
}

pub async fn transform_operation(ctx: &mut TransformContext<'_>, op: &mut Operation) -> Vec<SubtreeJob> {
    match op {
        Operation::BulkCreate(body) => {
            bulk_create(ctx, body).await;
            Vec::new()
        }
        Operation::Edit(body) => edit(ctx, body).await.into_iter().collect(),
        Operation::BulkMove(body) => bulk_move(ctx, body),
        Operation::Delete(body) => {
            ctx.store.delete(&body.data.projectid);
            Vec::new()
        }
        Operation::Unknown(_) => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// edit
// ---------------------------------------------------------------------------

async fn edit(ctx: &mut TransformContext<'_>, body: &mut Edit) -> Option<SubtreeJob> {
    let id = body.data.projectid.clone();

    if ctx.decrypting() {
        ctx.decrypt_field(&mut body.data.name).await;
        ctx.decrypt_field(&mut body.data.description).await;
        if let Some(undo) = body.undo_data.as_mut() {
            ctx.decrypt_field(&mut undo.previous_name).await;
            ctx.decrypt_field(&mut undo.previous_description).await;
        }
    }

    let job = match body.data.name.as_deref() {
        Some(name) => boundary_transition(ctx, &id, name),
        None => None,
    };

    let patch = NodePatch {
        name: body.data.name.clone().into(),
        description: body.data.description.clone().into(),
        ..NodePatch::default()
    };
    ctx.store.update(&id, patch, false);

    if ctx.encrypting() && ctx.store.is_parent_locked(&id) {
        ctx.encrypt_field(&mut body.data.name).await;
        ctx.encrypt_field(&mut body.data.description).await;
        if let Some(undo) = body.undo_data.as_mut() {
            ctx.encrypt_field(&mut undo.previous_name).await;
            ctx.encrypt_field(&mut undo.previous_description).await;
        }
    }

    job
}

/// Compare the node's state before this edit with the incoming name.
/// Must run before the store records the new name.
fn boundary_transition(ctx: &TransformContext<'_>, id: &str, new_name: &str) -> Option<SubtreeJob> {
    let store = &*ctx.store;
    let tagged = store.is_tagged(new_name);
    if !store.has_child(id) {
        return None;
    }

    let target = if tagged && !store.is_locked(id, false) {
        info!(id = %id, "boundary tag added");
        Direction::Encrypt
    } else if !tagged && store.is_locked(id, true) && !store.is_parent_locked(id) {
        info!(id = %id, "boundary tag removed");
        Direction::Decrypt
    } else {
        return None;
    };

    if !ctx.network {
        debug!(id = %id, "transition observed without network; no subtree job");
        return None;
    }
    Some(SubtreeJob::plan(store, id, target, false))
}

// ---------------------------------------------------------------------------
// bulk_create
// ---------------------------------------------------------------------------

/// A flattened view of one created node: where it sits in the payload
/// and which parent it hangs from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDescriptor {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    path: Vec<usize>,
}

/// Depth-first pre-order flattening, so every parent precedes its children.
pub fn flatten_trees(trees: &[ProjectTree], parent: Option<NodeId>) -> Vec<CreateDescriptor> {
    fn walk(
        trees: &[ProjectTree],
        parent: &Option<NodeId>,
        prefix: &[usize],
        out: &mut Vec<CreateDescriptor>,
    ) {
        for (index, tree) in trees.iter().enumerate() {
            let mut path = prefix.to_vec();
            path.push(index);
            out.push(CreateDescriptor {
                id: tree.id.clone(),
                parent: parent.clone(),
                path: path.clone(),
            });
            if let Some(children) = &tree.ch {
                walk(children, &Some(tree.id.clone()), &path, out);
            }
        }
    }

    let mut out = Vec::new();
    walk(trees, &parent, &[], &mut out);
    out
}

fn tree_at_mut<'t>(trees: &'t mut [ProjectTree], path: &[usize]) -> Option<&'t mut ProjectTree> {
    let (first, rest) = path.split_first()?;
    let mut node = trees.get_mut(*first)?;
    for index in rest {
        node = node.ch.as_mut()?.get_mut(*index)?;
    }
    Some(node)
}

async fn bulk_create(ctx: &mut TransformContext<'_>, body: &mut BulkCreate) {
    let parent = parent_from_wire(&body.data.parentid);
    let mut trees: Vec<ProjectTree> = match serde_json::from_str(&body.data.project_trees) {
        Ok(trees) => trees,
        Err(e) => {
            warn!(error = %e, "bulk_create project_trees unreadable; passing through");
            return;
        }
    };

    for descriptor in flatten_trees(&trees, parent) {
        let Some(tree) = tree_at_mut(&mut trees, &descriptor.path) else {
            continue;
        };

        if ctx.decrypting() {
            ctx.decrypt_field(&mut tree.nm).await;
            ctx.decrypt_field(&mut tree.no).await;
        }

        let patch = NodePatch {
            name: tree.nm.clone().into(),
            description: tree.no.clone().into(),
            ..NodePatch::default()
        }
        .parent(descriptor.parent.clone());
        ctx.store.update(&descriptor.id, patch, false);

        if ctx.encrypting() && ctx.store.is_parent_locked(&descriptor.id) {
            ctx.encrypt_field(&mut tree.nm).await;
            ctx.encrypt_field(&mut tree.no).await;
        }
    }

    match serde_json::to_string(&trees) {
        Ok(encoded) => body.data.project_trees = encoded,
        Err(e) => warn!(error = %e, "failed to re-encode project_trees"),
    }
}

// ---------------------------------------------------------------------------
// bulk_move
// ---------------------------------------------------------------------------

fn bulk_move(ctx: &mut TransformContext<'_>, body: &BulkMove) -> Vec<SubtreeJob> {
    let new_parent = parent_from_wire(&body.data.parentid);
    let ids: Vec<NodeId> = match serde_json::from_str(&body.data.projectids_json) {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "bulk_move projectids_json unreadable; passing through");
            return Vec::new();
        }
    };

    let mut jobs = Vec::new();
    for id in ids {
        let store = &*ctx.store;
        // Moving an alias moves the mount of the shared document behind it.
        // A share root cannot be moved within its own document.
        let mounted = store.mounted_share_root(&id).cloned();
        let movable = mounted.is_some() || store.get(&id).is_some_and(|node| !node.is_share_root());
        let subject = mounted.as_deref().unwrap_or(&id);
        let before = store.is_parent_locked(subject);
        let after = new_parent
            .as_deref()
            .is_some_and(|parent| store.is_locked(parent, false));

        if movable && before != after {
            let target = if after {
                Direction::Encrypt
            } else {
                Direction::Decrypt
            };
            info!(id = %subject, ?target, "node moved across a boundary");
            if ctx.network {
                jobs.push(SubtreeJob::plan(store, subject, target, true));
            }
        }

        ctx.store
            .update(&id, NodePatch::default().parent(new_parent.clone()), false);
        if let Some(root) = mounted {
            ctx.store
                .update(&root, NodePatch::default().parent(new_parent.clone()), true);
        }
    }
    jobs
}
