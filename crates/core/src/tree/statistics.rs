//! Tree-wide and per-node counts.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::categorization::Categorization;

use super::{CategoryNode, ItemId, NodeId};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeStatistics {
    pub total_nodes: usize,
    /// Deepest level among live nodes; roots are level 0.
    pub max_depth: i32,
    pub root_count: usize,
    pub leaf_count: usize,
    /// Live parent-child edges over live nodes, leaves included.
    pub avg_children_per_node: f64,
    pub inactive_nodes: usize,
    pub deleted_nodes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatistics {
    pub node_id: NodeId,
    pub depth: i32,
    pub child_count: usize,
    pub descendant_count: usize,
    pub direct_item_count: usize,
    pub descendant_item_count: usize,
}

pub(crate) fn tree_statistics(nodes: &[CategoryNode]) -> TreeStatistics {
    let live: Vec<&CategoryNode> = nodes.iter().filter(|n| !n.is_deleted).collect();

    let mut child_counts: HashMap<NodeId, usize> = HashMap::new();
    for node in &live {
        if let Some(parent_id) = node.parent_id {
            *child_counts.entry(parent_id).or_default() += 1;
        }
    }

    let edges: usize = child_counts.values().sum();

    TreeStatistics {
        total_nodes: live.len(),
        max_depth: live.iter().map(|n| n.level).max().unwrap_or(0),
        root_count: live.iter().filter(|n| n.is_root()).count(),
        leaf_count: live
            .iter()
            .filter(|n| !child_counts.contains_key(&n.id))
            .count(),
        avg_children_per_node: if live.is_empty() {
            0.0
        } else {
            edges as f64 / live.len() as f64
        },
        inactive_nodes: live.iter().filter(|n| !n.is_active).count(),
        deleted_nodes: nodes.len() - live.len(),
    }
}

/// `subtree` holds the node's rows (itself included); `records` the
/// categorizations pointing at any of them.
pub(crate) fn node_statistics(
    node: &CategoryNode,
    subtree: &[CategoryNode],
    records: &[Categorization],
) -> NodeStatistics {
    let live: HashSet<NodeId> = subtree
        .iter()
        .filter(|n| !n.is_deleted)
        .map(|n| n.id)
        .collect();

    let direct: HashSet<ItemId> = records
        .iter()
        .filter(|c| c.node_id == node.id)
        .map(|c| c.item_id)
        .collect();
    let all: HashSet<ItemId> = records
        .iter()
        .filter(|c| live.contains(&c.node_id))
        .map(|c| c.item_id)
        .collect();

    NodeStatistics {
        node_id: node.id,
        depth: node.level,
        child_count: subtree
            .iter()
            .filter(|n| n.parent_id == Some(node.id) && !n.is_deleted)
            .count(),
        descendant_count: live.iter().filter(|id| **id != node.id).count(),
        direct_item_count: direct.len(),
        descendant_item_count: all.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::level_of;
    use chrono::Utc;

    fn node(id: NodeId, parent: Option<NodeId>, path: &str) -> CategoryNode {
        let now = Utc::now().naive_utc();
        CategoryNode {
            id,
            parent_id: parent,
            name: format!("Node {}", id),
            code: format!("N{}", id),
            description: None,
            color: None,
            icon: None,
            sort_order: 0,
            path: path.to_string(),
            level: level_of(path).unwrap(),
            is_active: true,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn record(item_id: ItemId, node_id: NodeId) -> Categorization {
        Categorization {
            item_id,
            node_id,
            is_primary: false,
            weight: None,
            confidence: None,
            assigned_by: None,
            assigned_at: Utc::now().naive_utc(),
            note: None,
        }
    }

    fn sample() -> Vec<CategoryNode> {
        let mut inactive = node(4, Some(1), "-1-4-");
        inactive.is_active = false;
        let mut deleted = node(5, Some(2), "-1-2-5-");
        deleted.is_deleted = true;
        vec![
            node(1, None, "-1-"),
            node(2, Some(1), "-1-2-"),
            node(3, Some(2), "-1-2-3-"),
            inactive,
            deleted,
            node(6, None, "-6-"),
        ]
    }

    #[test]
    fn test_tree_statistics() {
        let stats = tree_statistics(&sample());
        assert_eq!(stats.total_nodes, 5);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(stats.root_count, 2);
        assert_eq!(stats.leaf_count, 3);
        // Three edges over five live nodes.
        assert!((stats.avg_children_per_node - 0.6).abs() < f64::EPSILON);
        assert_eq!(stats.inactive_nodes, 1);
        assert_eq!(stats.deleted_nodes, 1);
    }

    #[test]
    fn test_empty_tree_statistics() {
        assert_eq!(tree_statistics(&[]), TreeStatistics::default());
    }

    #[test]
    fn test_node_statistics_counts_distinct_items() {
        let nodes = sample();
        let subtree: Vec<CategoryNode> = nodes[..5].to_vec();
        let records = vec![record(1, 1), record(1, 3), record(2, 3), record(3, 4)];

        let stats = node_statistics(&nodes[0], &subtree, &records);
        assert_eq!(stats.child_count, 2);
        assert_eq!(stats.descendant_count, 3);
        assert_eq!(stats.direct_item_count, 1);
        assert_eq!(stats.descendant_item_count, 3);
    }
}
