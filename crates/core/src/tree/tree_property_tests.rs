//! Property-based tests for structural mutations.
//!
//! Random sequences of create/move/delete/reorder run against the in-memory
//! store; whatever succeeds or fails, the tree must stay structurally sound.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use crate::config::TreeConfig;

use super::test_support::InMemoryTreeStore;
use super::*;

// ============================================================================
// Generators
// ============================================================================

/// Node references are indices into the live node list at the time the
/// operation runs, so every generated sequence is applicable.
#[derive(Debug, Clone)]
enum TreeOp {
    Create { parent: Option<usize> },
    Move { node: usize, parent: Option<usize>, position: Option<i32> },
    Delete { node: usize, strategy: ChildHandlingStrategy },
    Reorder { parent: Option<usize>, rotate: usize },
}

fn arb_strategy() -> impl Strategy<Value = ChildHandlingStrategy> {
    prop_oneof![
        Just(ChildHandlingStrategy::ReassignToParent),
        Just(ChildHandlingStrategy::DeleteWithParent),
        Just(ChildHandlingStrategy::ReassignToRoot),
        Just(ChildHandlingStrategy::PreventDeletion),
    ]
}

fn arb_op() -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        4 => proptest::option::of(0usize..64).prop_map(|parent| TreeOp::Create { parent }),
        3 => (0usize..64, proptest::option::of(0usize..64), proptest::option::of(0i32..6))
            .prop_map(|(node, parent, position)| TreeOp::Move { node, parent, position }),
        1 => (0usize..64, arb_strategy())
            .prop_map(|(node, strategy)| TreeOp::Delete { node, strategy }),
        1 => (proptest::option::of(0usize..64), 0usize..8)
            .prop_map(|(parent, rotate)| TreeOp::Reorder { parent, rotate }),
    ]
}

// ============================================================================
// Harness
// ============================================================================

fn service(store: &Arc<InMemoryTreeStore>) -> TreeService {
    TreeService::new(
        store.clone(),
        store.clone(),
        TreeConfig::default(),
        Arc::new(TreeCoordinator::new()),
    )
}

fn pick(live: &[CategoryNode], index: usize) -> Option<NodeId> {
    if live.is_empty() {
        None
    } else {
        Some(live[index % live.len()].id)
    }
}

fn live_nodes(store: &InMemoryTreeStore) -> Vec<CategoryNode> {
    store
        .get_all_nodes()
        .unwrap()
        .into_iter()
        .filter(|n| !n.is_deleted)
        .collect()
}

/// Runs `ops`, ignoring rejected operations. Returns the number of nodes ever
/// created.
async fn run(service: &TreeService, store: &InMemoryTreeStore, ops: &[TreeOp]) -> usize {
    let mut created = 0;
    for op in ops {
        let live = live_nodes(store);
        match op {
            TreeOp::Create { parent } => {
                let parent_id = parent.and_then(|p| pick(&live, p));
                let code = format!("N{}", created);
                if service
                    .create_node(NewCategoryNode::new(parent_id, code.clone(), code))
                    .await
                    .is_ok()
                {
                    created += 1;
                }
            }
            TreeOp::Move { node, parent, position } => {
                let Some(node_id) = pick(&live, *node) else { continue };
                let request = MoveNodeRequest {
                    new_sort_order: *position,
                    ..MoveNodeRequest::new(node_id, parent.and_then(|p| pick(&live, p)))
                };
                let _ = service.move_node(request).await;
            }
            TreeOp::Delete { node, strategy } => {
                let Some(node_id) = pick(&live, *node) else { continue };
                let _ = service.delete_node(node_id, *strategy).await;
            }
            TreeOp::Reorder { parent, rotate } => {
                let parent_id = parent.and_then(|p| pick(&live, p));
                let Ok(children) = store.get_children(parent_id) else { continue };
                let mut ids: Vec<NodeId> = children.iter().map(|n| n.id).collect();
                if !ids.is_empty() {
                    let by = rotate % ids.len();
                    ids.rotate_left(by);
                }
                let _ = service.reorder_children(parent_id, ids).await;
            }
        }
    }
    created
}

fn assert_sound(store: &InMemoryTreeStore) {
    let all = store.get_all_nodes().unwrap();
    let result = TreeValidator::new(&TreeConfig::default()).validate(&all);
    assert!(result.is_valid, "issues: {:?}", result.issues);

    let by_id: HashMap<NodeId, &CategoryNode> = all.iter().map(|n| (n.id, n)).collect();
    let mut groups: HashMap<Option<NodeId>, Vec<i32>> = HashMap::new();
    for node in all.iter().filter(|n| !n.is_deleted) {
        let parent_path = node.parent_id.map(|p| {
            let parent = by_id[&p];
            assert!(!parent.is_deleted, "node {} has a deleted parent", node.id);
            parent.path.as_str()
        });
        assert_eq!(node.path, compute_path(parent_path, node.id));
        assert_eq!(node.level, level_of(&node.path).unwrap());
        groups.entry(node.parent_id).or_default().push(node.sort_order);
    }
    for (parent, mut orders) in groups {
        orders.sort_unstable();
        let dense: Vec<i32> = (0..orders.len() as i32).collect();
        assert_eq!(orders, dense, "sibling orders under {:?}", parent);
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any sequence of operations leaves paths, levels and sibling orders
    /// consistent with parent links.
    #[test]
    fn prop_operations_preserve_structure(ops in proptest::collection::vec(arb_op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let store = Arc::new(InMemoryTreeStore::new());
        let service = service(&store);

        runtime.block_on(run(&service, &store, &ops));
        assert_sound(&store);
    }

    /// Soft deletion never loses rows: live plus deleted equals created.
    #[test]
    fn prop_soft_delete_keeps_rows(ops in proptest::collection::vec(arb_op(), 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let store = Arc::new(InMemoryTreeStore::new());
        let service = service(&store);

        let created = runtime.block_on(run(&service, &store, &ops));
        prop_assert_eq!(store.get_all_nodes().unwrap().len(), created);
    }

    /// A failed move leaves every row untouched.
    #[test]
    fn prop_rejected_move_is_atomic(
        ops in proptest::collection::vec(arb_op(), 1..25),
        node in 0usize..64,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let store = Arc::new(InMemoryTreeStore::new());
        let service = service(&store);
        runtime.block_on(run(&service, &store, &ops));

        let live = live_nodes(&store);
        if let Some(node_id) = pick(&live, node) {
            let subtree = store.get_subtree(&store.node(node_id).path).unwrap();
            let deepest = subtree.iter().filter(|n| !n.is_deleted).max_by_key(|n| n.level);
            if let Some(target) = deepest {
                let before = store.get_all_nodes().unwrap();
                let outcome = runtime.block_on(
                    service.move_node(MoveNodeRequest::new(node_id, Some(target.id))),
                );
                let err = outcome.unwrap_err();
                prop_assert_eq!(err.code(), "CYCLE_DETECTED");
                prop_assert_eq!(store.get_all_nodes().unwrap(), before);
            }
        }
    }
}
