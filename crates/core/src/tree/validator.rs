//! Read-only integrity analysis of the tree.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::TreeConfig;

use super::path_codec::{compute_path, parse_path};
use super::{normalize_code, CategoryNode, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationIssueKind {
    Orphan,
    CircularReference,
    PathInconsistency,
    MalformedPath,
    DuplicateCode,
    SiblingOrderConflict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub kind: ValidationIssueKind,
    pub node_id: Option<NodeId>,
    pub message: String,
}

impl ValidationIssue {
    fn new(kind: ValidationIssueKind, node_id: Option<NodeId>, message: String) -> Self {
        Self {
            kind,
            node_id,
            message,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeValidationResult {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub orphaned_count: usize,
    pub invalid_path_count: usize,
    pub circular_reference_count: usize,
    pub duplicate_code_count: usize,
    pub sibling_conflict_count: usize,
    /// Live nodes deeper than `max_depth`. Reported, but not an integrity issue.
    pub excessive_depth_count: usize,
    pub warnings: Vec<String>,
}

impl TreeValidationResult {
    pub fn issues_of(&self, kind: ValidationIssueKind) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairResult {
    pub success: bool,
    pub paths_repaired: usize,
    pub orphans_reattached: usize,
    pub sibling_groups_resequenced: usize,
    pub cycles_unrepaired: usize,
    pub warnings: Vec<String>,
}

/// Outcome of walking a node's parent links upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Chain {
    /// Ids from a root down to the node.
    Rooted(Vec<NodeId>),
    /// Ids from the topmost reachable node (whose parent does not exist) down
    /// to the node.
    Detached(Vec<NodeId>),
    /// The walk revisited a node.
    Circular,
}

/// Walks `parents` from `start`. Terminates on every input: each step either
/// reaches a new id of the finite map or reports a cycle.
pub(crate) fn walk_to_root(start: NodeId, parents: &HashMap<NodeId, Option<NodeId>>) -> Chain {
    let mut ids = vec![start];
    let mut seen = HashSet::from([start]);
    let mut current = start;

    loop {
        match parents.get(&current) {
            Some(Some(parent)) => {
                if !parents.contains_key(parent) {
                    ids.reverse();
                    return Chain::Detached(ids);
                }
                if !seen.insert(*parent) {
                    return Chain::Circular;
                }
                ids.push(*parent);
                current = *parent;
            }
            _ => {
                ids.reverse();
                return Chain::Rooted(ids);
            }
        }
    }
}

/// Renders ids, root first, as a materialized path.
pub(crate) fn path_from_ids(ids: &[NodeId]) -> String {
    ids.iter().fold(None::<String>, |path, id| {
        Some(compute_path(path.as_deref(), *id))
    })
    .unwrap_or_default()
}

/// Diagnostic checks over a full snapshot of the node table. Never mutates.
pub struct TreeValidator {
    max_depth: i32,
}

impl TreeValidator {
    pub fn new(config: &TreeConfig) -> Self {
        Self {
            max_depth: config.max_depth,
        }
    }

    pub fn validate(&self, nodes: &[CategoryNode]) -> TreeValidationResult {
        let by_id: HashMap<NodeId, &CategoryNode> = nodes.iter().map(|n| (n.id, n)).collect();
        let parents: HashMap<NodeId, Option<NodeId>> =
            nodes.iter().map(|n| (n.id, n.parent_id)).collect();
        let mut result = TreeValidationResult::default();

        for node in nodes {
            if let Some(parent_id) = node.parent_id {
                let message = match by_id.get(&parent_id) {
                    None => Some(format!("Parent {} of node {} does not exist", parent_id, node.id)),
                    Some(parent) if parent.is_deleted && !node.is_deleted => Some(format!(
                        "Parent {} of active node {} is deleted",
                        parent_id, node.id
                    )),
                    _ => None,
                };
                if let Some(message) = message {
                    result.orphaned_count += 1;
                    result.issues.push(ValidationIssue::new(
                        ValidationIssueKind::Orphan,
                        Some(node.id),
                        message,
                    ));
                }
            }

            match walk_to_root(node.id, &parents) {
                Chain::Circular => {
                    result.circular_reference_count += 1;
                    result.issues.push(ValidationIssue::new(
                        ValidationIssueKind::CircularReference,
                        Some(node.id),
                        format!("Ancestor walk from node {} revisits a node", node.id),
                    ));
                }
                Chain::Rooted(ids) => {
                    let depth = ids.len() as i32 - 1;
                    if depth > self.max_depth && !node.is_deleted {
                        result.excessive_depth_count += 1;
                    }
                    self.check_path(node, &ids, &mut result);
                }
                Chain::Detached(_) => {}
            }
        }

        if result.excessive_depth_count > 0 {
            result.warnings.push(format!(
                "{} nodes sit deeper than the configured maximum depth of {}",
                result.excessive_depth_count, self.max_depth
            ));
        }

        self.check_duplicate_codes(nodes, &mut result);
        self.check_sibling_orders(nodes, &mut result);

        result.is_valid = result.issues.is_empty();
        result
    }

    fn check_path(&self, node: &CategoryNode, chain: &[NodeId], result: &mut TreeValidationResult) {
        if let Err(e) = parse_path(&node.path) {
            result.invalid_path_count += 1;
            result.issues.push(ValidationIssue::new(
                ValidationIssueKind::MalformedPath,
                Some(node.id),
                e.to_string(),
            ));
            return;
        }

        let expected = path_from_ids(chain);
        let expected_level = chain.len() as i32 - 1;
        if node.path != expected || node.level != expected_level {
            result.invalid_path_count += 1;
            result.issues.push(ValidationIssue::new(
                ValidationIssueKind::PathInconsistency,
                Some(node.id),
                format!(
                    "Node {} stores path '{}' at level {}, expected '{}' at level {}",
                    node.id, node.path, node.level, expected, expected_level
                ),
            ));
        }
    }

    fn check_duplicate_codes(&self, nodes: &[CategoryNode], result: &mut TreeValidationResult) {
        let mut by_code: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for node in nodes {
            by_code.entry(normalize_code(&node.code)).or_default().push(node.id);
        }

        for (code, ids) in by_code.into_iter().filter(|(_, ids)| ids.len() > 1) {
            result.duplicate_code_count += 1;
            result.issues.push(ValidationIssue::new(
                ValidationIssueKind::DuplicateCode,
                ids.first().copied(),
                format!("Code '{}' is shared by nodes {:?}", code, ids),
            ));
        }
    }

    fn check_sibling_orders(&self, nodes: &[CategoryNode], result: &mut TreeValidationResult) {
        let mut groups: BTreeMap<(Option<NodeId>, i32), Vec<NodeId>> = BTreeMap::new();
        for node in nodes.iter().filter(|n| !n.is_deleted) {
            groups
                .entry((node.parent_id, node.sort_order))
                .or_default()
                .push(node.id);
        }

        for ((parent, order), ids) in groups.into_iter().filter(|(_, ids)| ids.len() > 1) {
            result.sibling_conflict_count += 1;
            let parent = parent.map_or_else(|| "root level".to_string(), |p| format!("node {}", p));
            result.issues.push(ValidationIssue::new(
                ValidationIssueKind::SiblingOrderConflict,
                ids.first().copied(),
                format!("Nodes {:?} share sort order {} under {}", ids, order, parent),
            ));
        }
    }
}
