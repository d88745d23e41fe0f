//! Typed shapes of the sync protocol.
//!
//! Every struct keeps unknown keys in a flattened `extra` map so that a
//! decode/encode cycle hands the server (or the web client) back everything
//! it sent. Operations are a closed sum over the four kinds the encryption
//! layer understands, plus [`Operation::Unknown`] which carries anything else
//! through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::NodeId;

/// Wire spelling of "no parent" in `parentid` fields.
pub const NO_PARENT: &str = "None";

/// Map a wire `parentid` to an optional node id.
pub fn parent_from_wire(parentid: &str) -> Option<NodeId> {
    if parentid.is_empty() || parentid == NO_PARENT {
        None
    } else {
        Some(parentid.to_string())
    }
}

// ---------------------------------------------------------------------------
// Outbound: push_poll_data
// ---------------------------------------------------------------------------

/// One batch inside the `push_poll_data` form field. Batches for shared
/// documents carry their `share_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushPollData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub most_recent_operation_transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<Operation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The common envelope of every operation: `data`, optional `undo_data`,
/// and whatever else the server attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationBody<D, U = Value> {
    pub data: D,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo_data: Option<U>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<D, U> OperationBody<D, U> {
    pub fn new(data: D, undo_data: Option<U>) -> Self {
        Self {
            data,
            undo_data,
            extra: Map::new(),
        }
    }
}

pub type Edit = OperationBody<EditData, EditUndoData>;
pub type BulkCreate = OperationBody<BulkCreateData>;
pub type BulkMove = OperationBody<BulkMoveData>;
pub type Delete = OperationBody<DeleteData>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditData {
    pub projectid: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditUndoData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkCreateData {
    #[serde(default = "no_parent")]
    pub parentid: String,
    /// JSON-encoded `Vec<ProjectTree>`.
    pub project_trees: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkMoveData {
    /// JSON-encoded `Vec<NodeId>`.
    pub projectids_json: String,
    #[serde(default = "no_parent")]
    pub parentid: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteData {
    pub projectid: NodeId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn no_parent() -> String {
    NO_PARENT.to_string()
}

/// A created subtree as embedded in `bulk_create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectTree {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ch: Option<Vec<ProjectTree>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A mutation operation, dispatched on its `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Operation {
    BulkCreate(BulkCreate),
    Edit(Edit),
    BulkMove(BulkMove),
    Delete(Delete),
    /// Missing or unrecognized `type`, or a known type whose payload does
    /// not have the expected shape. Passed through as-is.
    Unknown(Value),
}

impl Operation {
    pub const BULK_CREATE: &'static str = "bulk_create";
    pub const EDIT: &'static str = "edit";
    pub const BULK_MOVE: &'static str = "bulk_move";
    pub const DELETE: &'static str = "delete";

    pub fn kind(&self) -> Option<&'static str> {
        match self {
            Self::BulkCreate(_) => Some(Self::BULK_CREATE),
            Self::Edit(_) => Some(Self::EDIT),
            Self::BulkMove(_) => Some(Self::BULK_MOVE),
            Self::Delete(_) => Some(Self::DELETE),
            Self::Unknown(_) => None,
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(mut value: Value) -> Result<T, Value> {
        if let Some(map) = value.as_object_mut() {
            map.remove("type");
        }
        serde_json::from_value(value.clone()).map_err(|_| value)
    }
}

impl From<Value> for Operation {
    fn from(value: Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
        let restore = |mut rejected: Value, kind: &str| {
            if let Some(map) = rejected.as_object_mut() {
                map.insert("type".into(), Value::String(kind.to_string()));
            }
            Operation::Unknown(rejected)
        };
        match kind.as_deref() {
            Some(k @ Self::BULK_CREATE) => Self::parse(value)
                .map(Self::BulkCreate)
                .unwrap_or_else(|v| restore(v, k)),
            Some(k @ Self::EDIT) => Self::parse(value)
                .map(Self::Edit)
                .unwrap_or_else(|v| restore(v, k)),
            Some(k @ Self::BULK_MOVE) => Self::parse(value)
                .map(Self::BulkMove)
                .unwrap_or_else(|v| restore(v, k)),
            Some(k @ Self::DELETE) => Self::parse(value)
                .map(Self::Delete)
                .unwrap_or_else(|v| restore(v, k)),
            _ => Self::Unknown(value),
        }
    }
}

impl From<Operation> for Value {
    fn from(op: Operation) -> Self {
        let kind = op.kind();
        let value = match op {
            Operation::BulkCreate(body) => serde_json::to_value(body),
            Operation::Edit(body) => serde_json::to_value(body),
            Operation::BulkMove(body) => serde_json::to_value(body),
            Operation::Delete(body) => serde_json::to_value(body),
            Operation::Unknown(value) => return value,
        };
        // Plain data structs with string keys always serialize.
        let mut value = value.unwrap_or(Value::Null);
        if let (Some(map), Some(kind)) = (value.as_object_mut(), kind) {
            map.insert("type".into(), Value::String(kind.to_string()));
        }
        value
    }
}

// ---------------------------------------------------------------------------
// Inbound: push_and_poll response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushPollResponse {
    #[serde(default)]
    pub results: Vec<PushPollResult>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushPollResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_most_recent_operation_transaction_id: Option<String>,
    /// JSON-encoded [`PushPollData`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_run_operation_transaction_json: Option<String>,
    /// Each entry is a JSON-encoded [`PushPollData`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent_remote_operation_transactions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Inbound: tree snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeDataResponse {
    #[serde(default)]
    pub items: Vec<TreeEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Items arrive either individually or grouped one level deep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeEntry {
    Group(Vec<TreeItem>),
    Item(TreeItem),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeItem {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no: Option<String>,
    #[serde(default)]
    pub prnt: Option<NodeId>,
    /// Share id when this item is the main-tree projection of a share root.
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Inbound: initialization data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializationData {
    #[serde(default)]
    pub project_tree_data: ProjectTreeData,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTreeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_project_tree_info: Option<MainTreeInfo>,
    #[serde(default)]
    pub auxiliary_project_tree_infos: Vec<AuxiliaryTreeInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainTreeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_most_recent_operation_transaction_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxiliaryTreeInfo {
    pub share_id: String,
    pub root_project: RootProject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_most_recent_operation_transaction_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootProject {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatches_on_type() {
        let op: Operation = serde_json::from_value(json!({
            "type": "edit",
            "data": {"projectid": "a", "name": "x"},
            "undo_data": {"previous_name": "y"},
            "client_timestamp": 42
        }))
        .unwrap();
        let Operation::Edit(edit) = &op else {
            panic!("expected edit, got {op:?}");
        };
        assert_eq!(edit.data.projectid, "a");
        assert_eq!(edit.data.name.as_deref(), Some("x"));
        assert_eq!(
            edit.undo_data.as_ref().unwrap().previous_name.as_deref(),
            Some("y")
        );
        assert_eq!(edit.extra["client_timestamp"], 42);
    }

    #[test]
    fn test_unknown_and_malformed_pass_through() {
        let inputs = [
            json!({"type": "complete", "data": {"projectid": "a"}}),
            json!({"data": {"projectid": "a"}}),
            json!({"type": "edit", "data": {"no_projectid": true}}),
            json!("not even an object"),
        ];
        for input in inputs {
            let op = Operation::from(input.clone());
            assert!(matches!(op, Operation::Unknown(_)), "{input}");
            assert_eq!(Value::from(op), input);
        }
    }

    #[test]
    fn test_known_ops_keep_type_and_extras() {
        let input = json!({
            "type": "bulk_move",
            "data": {"projectids_json": "[\"a\",\"b\"]", "parentid": "None", "priority": 3},
            "undo_data": {"previous_parentid": "p"}
        });
        let op = Operation::from(input.clone());
        assert_eq!(op.kind(), Some("bulk_move"));
        assert_eq!(Value::from(op), input);
    }

    #[test]
    fn test_tree_entries_accept_items_and_groups() {
        let response: TreeDataResponse = serde_json::from_value(json!({
            "items": [
                {"id": "a", "nm": "A", "prnt": null},
                [{"id": "b", "prnt": "a", "as": "share-1"}]
            ],
            "most_recent_operation_transaction_id": "77"
        }))
        .unwrap();
        assert!(matches!(response.items[0], TreeEntry::Item(_)));
        let TreeEntry::Group(group) = &response.items[1] else {
            panic!("expected group");
        };
        assert_eq!(group[0].alias.as_deref(), Some("share-1"));
        assert_eq!(response.extra["most_recent_operation_transaction_id"], "77");
    }

    #[test]
    fn test_initialization_data_uses_camel_case() {
        let data: InitializationData = serde_json::from_value(json!({
            "projectTreeData": {
                "mainProjectTreeInfo": {"initialMostRecentOperationTransactionId": "10"},
                "auxiliaryProjectTreeInfos": [
                    {"shareId": "s1", "rootProject": {"id": "r", "nm": "Team"}}
                ]
            }
        }))
        .unwrap();
        let aux = &data.project_tree_data.auxiliary_project_tree_infos[0];
        assert_eq!(aux.share_id, "s1");
        assert_eq!(aux.root_project.id, "r");
    }

    #[test]
    fn test_parent_wire_spelling() {
        assert_eq!(parent_from_wire("None"), None);
        assert_eq!(parent_from_wire(""), None);
        assert_eq!(parent_from_wire("abc").as_deref(), Some("abc"));
    }
}
