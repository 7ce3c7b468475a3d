//! Portable tree documents for export and import.
//!
//! Exports carry codes, never numeric ids, so a document can be imported into
//! any store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TreeError, ValidationError};

use super::mutator::sorted_by_position;
use super::{normalize_code, CategoryNode, NodeId};

pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// A nested node without identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplate {
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Depth relative to the export root.
    #[serde(default)]
    pub level: i32,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub children: Vec<NodeTemplate>,
}

fn default_active() -> bool {
    true
}

impl NodeTemplate {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: None,
            color: None,
            icon: None,
            level: 0,
            sort_order: 0,
            is_active: true,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<NodeTemplate>) -> Self {
        self.children = children;
        self
    }

    /// Nodes in this template, itself included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(NodeTemplate::node_count).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeExport {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    /// Code of the exported subtree root; absent for whole-tree exports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root_code: Option<String>,
    pub roots: Vec<NodeTemplate>,
}

impl TreeExport {
    pub fn new(roots: Vec<NodeTemplate>) -> Self {
        Self {
            format_version: EXPORT_FORMAT_VERSION,
            exported_at: Utc::now(),
            source_root_code: None,
            roots,
        }
    }

    pub fn node_count(&self) -> usize {
        self.roots.iter().map(NodeTemplate::node_count).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let export: TreeExport = serde_json::from_str(json)?;
        if export.format_version > EXPORT_FORMAT_VERSION {
            return Err(ValidationError::InvalidInput(format!(
                "Unsupported export format version {}",
                export.format_version
            ))
            .into());
        }
        Ok(export)
    }
}

/// Resolution when an imported code already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollisionPolicy {
    /// Keep the existing node and import the template's children under it.
    #[default]
    Skip,
    /// Create the node with a fresh suffixed code.
    Rename,
    /// Overwrite the existing node's attributes and import children under it.
    Update,
    /// Refuse the whole import before any write.
    Fail,
}

/// Shared flag checked between imported nodes.
#[derive(Debug, Clone, Default)]
pub struct ImportCancellation {
    flag: Arc<AtomicBool>,
}

impl ImportCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub const DEFAULT_RENAME_SUFFIX: &str = "-imported";

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub collision_policy: CollisionPolicy,
    pub rename_suffix: String,
    pub cancellation: Option<ImportCancellation>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            collision_policy: CollisionPolicy::default(),
            rename_suffix: DEFAULT_RENAME_SUFFIX.to_string(),
            cancellation: None,
        }
    }
}

impl ImportOptions {
    pub fn with_policy(collision_policy: CollisionPolicy) -> Self {
        Self {
            collision_policy,
            ..Default::default()
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(ImportCancellation::is_cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamedCode {
    pub original: String,
    pub assigned: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub created: usize,
    pub skipped: usize,
    pub updated: usize,
    pub renamed: Vec<RenamedCode>,
    pub aborted: bool,
    /// Template code to the id of the node that now represents it.
    pub code_mapping: BTreeMap<String, NodeId>,
    pub warnings: Vec<String>,
    /// Set when a write failed after earlier nodes were already created.
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Builds the nested export of `roots` from live rows. `rows` must contain
/// every descendant to include; rows outside the roots' subtrees are ignored.
pub(crate) fn build_templates(roots: &[&CategoryNode], rows: &[CategoryNode]) -> Vec<NodeTemplate> {
    let mut children: HashMap<NodeId, Vec<&CategoryNode>> = HashMap::new();
    for row in rows.iter().filter(|r| !r.is_deleted) {
        if let Some(parent_id) = row.parent_id {
            children.entry(parent_id).or_default().push(row);
        }
    }

    let mut visited = HashSet::new();
    sorted_by_position(roots.iter().copied())
        .into_iter()
        .enumerate()
        .filter_map(|(position, root)| {
            to_template(root, position as i32, 0, &children, &mut visited)
        })
        .collect()
}

fn to_template(
    node: &CategoryNode,
    sort_order: i32,
    level: i32,
    children: &HashMap<NodeId, Vec<&CategoryNode>>,
    visited: &mut HashSet<NodeId>,
) -> Option<NodeTemplate> {
    if !visited.insert(node.id) {
        return None;
    }
    let kids = children
        .get(&node.id)
        .map(|kids| sorted_by_position(kids.iter().copied()))
        .unwrap_or_default();

    Some(NodeTemplate {
        code: node.code.clone(),
        name: node.name.clone(),
        description: node.description.clone(),
        color: node.color.clone(),
        icon: node.icon.clone(),
        level,
        sort_order,
        is_active: node.is_active,
        children: kids
            .into_iter()
            .enumerate()
            .filter_map(|(position, child)| {
                to_template(child, position as i32, level + 1, children, visited)
            })
            .collect(),
    })
}

/// Checks names and codes are present. With `reject_duplicates`, also fails on
/// a code repeated inside the document.
pub(crate) fn validate_templates(roots: &[NodeTemplate], reject_duplicates: bool) -> Result<()> {
    let mut seen = HashSet::new();
    let mut stack: Vec<&NodeTemplate> = roots.iter().collect();
    while let Some(template) = stack.pop() {
        if template.name.trim().is_empty() {
            return Err(ValidationError::MissingField(format!(
                "name (template code '{}')",
                template.code
            ))
            .into());
        }
        if template.code.trim().is_empty() {
            return Err(ValidationError::MissingField(format!(
                "code (template '{}')",
                template.name
            ))
            .into());
        }
        if !seen.insert(normalize_code(&template.code)) && reject_duplicates {
            return Err(TreeError::DuplicateCode(template.code.clone()).into());
        }
        stack.extend(template.children.iter());
    }
    Ok(())
}

/// Templates in creation order: preorder, siblings by their sort order.
pub(crate) fn ordered_children(templates: &[NodeTemplate]) -> Vec<&NodeTemplate> {
    let mut ordered: Vec<&NodeTemplate> = templates.iter().collect();
    ordered.sort_by_key(|t| t.sort_order);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::level_of;

    fn node(id: NodeId, parent: Option<NodeId>, path: &str, sort_order: i32) -> CategoryNode {
        let now = Utc::now().naive_utc();
        CategoryNode {
            id,
            parent_id: parent,
            name: format!("Node {}", id),
            code: format!("N{}", id),
            description: None,
            color: None,
            icon: None,
            sort_order,
            path: path.to_string(),
            level: level_of(path).unwrap(),
            is_active: true,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_build_templates_nests_by_position() {
        let mut gone = node(5, Some(2), "-1-2-5-", 2);
        gone.is_deleted = true;
        let rows = vec![
            node(2, Some(1), "-1-2-", 0),
            node(3, Some(2), "-1-2-3-", 1),
            node(4, Some(2), "-1-2-4-", 0),
            gone,
        ];

        let templates = build_templates(&[&rows[0]], &rows);
        assert_eq!(templates.len(), 1);
        let root = &templates[0];
        assert_eq!((root.code.as_str(), root.level), ("N2", 0));
        let codes: Vec<&str> = root.children.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["N4", "N3"]);
        assert_eq!(root.children[1].level, 1);
        assert_eq!(root.children[1].sort_order, 1);
    }

    #[test]
    fn test_json_round_trip_and_version_guard() {
        let export = TreeExport::new(vec![NodeTemplate::new("A", "Alpha")
            .with_children(vec![NodeTemplate::new("B", "Beta")])]);
        let parsed = TreeExport::from_json(&export.to_json().unwrap()).unwrap();
        assert_eq!(parsed, export);
        assert_eq!(parsed.node_count(), 2);

        let mut future = export.clone();
        future.format_version = EXPORT_FORMAT_VERSION + 1;
        assert!(TreeExport::from_json(&future.to_json().unwrap()).is_err());
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{"formatVersion":1,"exportedAt":"2024-01-01T00:00:00Z",
            "roots":[{"code":"A","name":"Alpha"}]}"#;
        let parsed = TreeExport::from_json(json).unwrap();
        assert!(parsed.roots[0].is_active);
        assert!(parsed.roots[0].children.is_empty());
    }

    #[test]
    fn test_validate_templates() {
        let dup = vec![NodeTemplate::new("A", "Alpha").with_children(vec![NodeTemplate::new("a", "Again")])];
        assert!(validate_templates(&dup, false).is_ok());
        let err = validate_templates(&dup, true).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_CODE");

        let unnamed = vec![NodeTemplate::new("A", " ")];
        assert_eq!(validate_templates(&unnamed, false).unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_cancellation_is_shared() {
        let options = ImportOptions {
            cancellation: Some(ImportCancellation::new()),
            ..Default::default()
        };
        let handle = options.cancellation.clone().unwrap();
        assert!(!options.is_cancelled());
        handle.cancel();
        assert!(options.is_cancelled());
    }
}
