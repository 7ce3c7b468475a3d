//! Domain models for the category tree.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::categorization::{Categorization, CategorizationKey};
use crate::errors::{Error, TreeError};

use super::path_codec::MaterializedPath;
use super::{ItemId, NodeId};

/// A persisted node of the category tree.
///
/// `parent_id` is the structural source of truth; `path` and `level` are
/// caches that only the mutator rewrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub sort_order: i32,
    pub path: String,
    pub level: i32,
    pub is_active: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl CategoryNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn materialized_path(&self) -> Result<MaterializedPath, TreeError> {
        MaterializedPath::parse(&self.path)
    }

    pub fn code_key(&self) -> String {
        normalize_code(&self.code)
    }
}

/// Codes are compared trimmed and case-insensitively.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase()
}

/// Data for creating a new node. The store assigns id, path, level and
/// sort order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategoryNode {
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub is_active: bool,
}

impl Default for NewCategoryNode {
    fn default() -> Self {
        Self {
            parent_id: None,
            name: String::new(),
            code: String::new(),
            description: None,
            color: None,
            icon: None,
            is_active: true,
        }
    }
}

impl NewCategoryNode {
    pub fn new(parent_id: Option<NodeId>, name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            parent_id,
            name: name.into(),
            code: code.into(),
            ..Default::default()
        }
    }
}

/// Attribute update. Structural fields (parent, path, level, sort order) are
/// deliberately absent: only move/reorder may change them.
///
/// An empty string for `description`, `color` or `icon` clears the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNodePatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub is_active: Option<bool>,
}

impl CategoryNodePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.code.is_none()
            && self.description.is_none()
            && self.color.is_none()
            && self.icon.is_none()
            && self.is_active.is_none()
    }
}

/// New structural coordinates for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePlacement {
    pub node_id: NodeId,
    pub parent_id: Option<NodeId>,
    pub path: String,
    pub level: i32,
    pub sort_order: i32,
}

/// Every write a structural mutation performs, applied by the store as one
/// transaction.
///
/// Stores apply the parts in this order: categorization removals,
/// categorization upserts, placements, soft deletes, restores, hard deletes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeChangeSet {
    pub placements: Vec<NodePlacement>,
    pub soft_deleted: Vec<NodeId>,
    pub restored: Vec<NodeId>,
    pub hard_deleted: Vec<NodeId>,
    pub removed_categorizations: Vec<CategorizationKey>,
    pub upserted_categorizations: Vec<Categorization>,
}

impl TreeChangeSet {
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
            && self.soft_deleted.is_empty()
            && self.restored.is_empty()
            && self.hard_deleted.is_empty()
            && self.removed_categorizations.is_empty()
            && self.upserted_categorizations.is_empty()
    }
}

/// Where a planned node attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedParent {
    /// An existing node, or the root level.
    Existing(Option<NodeId>),
    /// An earlier entry of the same plan, by index.
    Planned(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedNode {
    pub parent: PlannedParent,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub is_active: bool,
    pub sort_order: i32,
}

/// A secondary categorization to create against a planned node.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCategorization {
    pub node_index: usize,
    pub item_id: ItemId,
    pub weight: Option<f64>,
    pub confidence: Option<f64>,
    pub assigned_by: Option<String>,
    pub note: Option<String>,
}

/// Nodes to insert atomically, parents listed before their children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtreeInsertPlan {
    pub nodes: Vec<PlannedNode>,
    pub categorizations: Vec<PlannedCategorization>,
}

/// Policy governing what happens to a deleted node's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChildHandlingStrategy {
    /// Children take the deleted node's place under its parent.
    ReassignToParent,
    /// The whole subtree is deleted.
    DeleteWithParent,
    /// Children become top-level roots.
    ReassignToRoot,
    /// Fail with `HasChildren` when active children exist.
    PreventDeletion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveNodeRequest {
    pub node_id: NodeId,
    pub new_parent_id: Option<NodeId>,
    /// 0-based position among the new siblings; appended when absent.
    pub new_sort_order: Option<i32>,
    pub max_affected_nodes: Option<usize>,
}

impl MoveNodeRequest {
    pub fn new(node_id: NodeId, new_parent_id: Option<NodeId>) -> Self {
        Self {
            node_id,
            new_parent_id,
            new_sort_order: None,
            max_affected_nodes: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResult {
    pub success: bool,
    pub node_id: NodeId,
    /// The moved node plus all of its descendants.
    pub affected_nodes: usize,
    pub old_path: String,
    pub new_path: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyNodeRequest {
    pub node_id: NodeId,
    pub new_parent_id: Option<NodeId>,
    pub include_children: bool,
    pub include_items: bool,
    pub max_affected_nodes: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyResult {
    pub success: bool,
    pub new_root_id: NodeId,
    pub nodes_copied: usize,
    pub items_copied: usize,
    /// Source node id to the id of its copy.
    pub id_mapping: BTreeMap<NodeId, NodeId>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub success: bool,
    pub nodes_deleted: usize,
    pub children_reassigned: usize,
    pub items_reassigned: usize,
    pub items_removed: usize,
    pub hard_deleted: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub success: bool,
    pub nodes_restored: usize,
    pub warnings: Vec<String>,
}

/// A node with its active children, for nested display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNodeView {
    #[serde(flatten)]
    pub node: CategoryNode,
    pub children: Vec<TreeNodeView>,
}

/// A node plus the values derived on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetails {
    #[serde(flatten)]
    pub node: CategoryNode,
    pub child_count: usize,
    pub descendant_item_count: usize,
}

/// Non-`Result` view of an operation's outcome for transport layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub success: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl OperationOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_code: None,
            error_message: None,
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            error_code: Some(err.code().to_string()),
            error_message: Some(err.to_string()),
        }
    }

    pub fn from_result<T>(result: &Result<T, Error>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self::from_error(e),
        }
    }
}
