//! End-to-end tests of the tree services on a real SQLite file.

use std::sync::Arc;

use tempfile::{tempdir, TempDir};

use qtree_core::categorization::{
    CategorizationRepositoryTrait, CategorizationService, CategorizationServiceTrait,
    NewCategorization,
};
use qtree_core::config::{PrimaryConflictPolicy, TreeConfig};
use qtree_core::tree::{
    CategoryNodePatch, ChildHandlingStrategy, CopyNodeRequest, ImportOptions, MoveNodeRequest,
    NewCategoryNode, NodeId, NodeRepositoryTrait, SearchQuery, TreeCoordinator, TreeExport,
    TreeService, TreeServiceTrait,
};

use crate::db::{create_pool, init, run_migrations, spawn_writer};
use crate::{CategorizationRepository, NodeRepository};

struct Harness {
    nodes: Arc<NodeRepository>,
    categorizations: Arc<CategorizationRepository>,
    service: TreeService,
    items: CategorizationService,
    _dir: TempDir,
}

fn harness() -> Harness {
    let dir = tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db").to_string_lossy().to_string();
    init(&db_path).expect("Failed to init database");
    let pool = create_pool(&db_path).expect("Failed to create pool");
    run_migrations(&pool).expect("Failed to run migrations");
    let writer = spawn_writer((*pool).clone());

    let nodes = Arc::new(NodeRepository::new(Arc::clone(&pool), writer.clone()));
    let categorizations = Arc::new(CategorizationRepository::new(pool, writer));
    let coordinator = Arc::new(TreeCoordinator::new());
    let config = TreeConfig::default();

    Harness {
        service: TreeService::new(
            nodes.clone(),
            categorizations.clone(),
            config.clone(),
            coordinator.clone(),
        ),
        items: CategorizationService::new(
            nodes.clone(),
            categorizations.clone(),
            config,
            coordinator,
        ),
        nodes,
        categorizations,
        _dir: dir,
    }
}

impl Harness {
    async fn add(&self, parent: Option<NodeId>, code: &str) -> NodeId {
        self.service
            .create_node(NewCategoryNode::new(parent, code, code))
            .await
            .unwrap()
            .id
    }

    async fn assert_valid(&self) {
        let report = self.service.validate_tree().await.unwrap();
        assert!(report.is_valid, "issues: {:?}", report.issues);
    }
}

#[tokio::test]
async fn test_create_assigns_path_and_rejects_duplicate_codes() {
    let h = harness();
    let root = h.add(None, "ROOT").await;
    let child = h.add(Some(root), "MATH").await;
    let second = h.add(Some(root), "PHYS").await;

    let node = h.service.get_node(child).unwrap();
    assert_eq!(node.path, format!("-{}-{}-", root, child));
    assert_eq!(node.level, 1);
    assert_eq!(h.service.get_node(second).unwrap().sort_order, 1);

    let err = h
        .service
        .create_node(NewCategoryNode::new(None, "Again", "math"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_CODE");

    let err = h
        .service
        .create_node(NewCategoryNode::new(Some(9999), "Lost", "LOST"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PARENT_NOT_FOUND");
}

#[tokio::test]
async fn test_update_clears_optional_fields() {
    let h = harness();
    let id = h
        .service
        .create_node(NewCategoryNode {
            description: Some("Numbers".to_string()),
            ..NewCategoryNode::new(None, "Math", "MATH")
        })
        .await
        .unwrap()
        .id;

    let updated = h
        .service
        .update_node(
            id,
            CategoryNodePatch {
                description: Some(String::new()),
                code: Some("MATHS".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.description.is_none());
    assert_eq!(updated.code, "MATHS");
    assert!(h.nodes.find_by_code("maths").unwrap().is_some());
}

#[tokio::test]
async fn test_move_rewrites_subtree_paths() {
    let h = harness();
    let root = h.add(None, "ROOT").await;
    let math = h.add(Some(root), "MATH").await;
    let algebra = h.add(Some(math), "ALG").await;
    let linear = h.add(Some(algebra), "LIN").await;

    let result = h
        .service
        .move_node(MoveNodeRequest::new(algebra, Some(root)))
        .await
        .unwrap();
    assert_eq!(result.affected_nodes, 2);
    assert_eq!(
        h.service.get_node(linear).unwrap().path,
        format!("-{}-{}-{}-", root, algebra, linear)
    );
    assert_eq!(h.service.get_node(linear).unwrap().level, 2);

    let err = h
        .service
        .move_node(MoveNodeRequest::new(root, Some(linear)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CYCLE_DETECTED");
    h.assert_valid().await;
}

#[tokio::test]
async fn test_delete_merges_categorizations_into_parent() {
    let h = harness();
    let root = h.add(None, "ROOT").await;
    let math = h.add(Some(root), "MATH").await;
    let algebra = h.add(Some(math), "ALG").await;
    let linear = h.add(Some(algebra), "LIN").await;

    h.items
        .assign_item_to_category(NewCategorization::new(7, algebra, true))
        .await
        .unwrap();
    h.items
        .assign_item_to_category(NewCategorization::new(8, algebra, false))
        .await
        .unwrap();

    let result = h
        .service
        .delete_node(algebra, ChildHandlingStrategy::ReassignToParent)
        .await
        .unwrap();
    assert_eq!(result.children_reassigned, 1);
    assert_eq!(result.items_reassigned, 2);

    let primary = h.items.get_primary_categorization(7).unwrap().unwrap();
    assert_eq!(primary.node_id, math);
    let linear_node = h.service.get_node(linear).unwrap();
    assert_eq!(linear_node.parent_id, Some(math));
    assert_eq!(linear_node.path, format!("-{}-{}-{}-", root, math, linear));
    h.assert_valid().await;
}

#[tokio::test]
async fn test_purge_hard_deletes_rows() {
    let h = harness();
    let root = h.add(None, "ROOT").await;
    let math = h.add(Some(root), "MATH").await;
    let algebra = h.add(Some(math), "ALG").await;
    h.items
        .assign_item_to_category(NewCategorization::new(1, math, false))
        .await
        .unwrap();

    h.service
        .delete_node(math, ChildHandlingStrategy::DeleteWithParent)
        .await
        .unwrap();
    // Soft-deleted rows still hold their codes.
    assert!(h.nodes.find_by_code("ALG").unwrap().is_some());

    assert_eq!(h.service.purge_deleted().await.unwrap(), 2);
    assert!(h.nodes.get_node(algebra).unwrap().is_none());
    let records = h.categorizations.get_item_categorizations(1).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].node_id, root);
    h.add(Some(root), "ALG").await;
    h.assert_valid().await;
}

#[tokio::test]
async fn test_primary_conflict_policies() {
    let h = harness();
    let a = h.add(None, "A").await;
    let b = h.add(None, "B").await;

    h.categorizations
        .upsert_categorization(NewCategorization::new(5, a, true), PrimaryConflictPolicy::Demote)
        .await
        .unwrap();
    let err = h
        .categorizations
        .upsert_categorization(NewCategorization::new(5, b, true), PrimaryConflictPolicy::Reject)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ITEM_ALREADY_PRIMARY");

    h.categorizations
        .upsert_categorization(NewCategorization::new(5, b, true), PrimaryConflictPolicy::Demote)
        .await
        .unwrap();
    let records = h.categorizations.get_item_categorizations(5).unwrap();
    assert_eq!(records.len(), 2);
    assert!(!records[0].is_primary);
    assert!(records[1].is_primary);
}

#[tokio::test]
async fn test_copy_and_search() {
    let h = harness();
    let root = h.add(None, "ROOT").await;
    let math = h.add(Some(root), "MATH").await;
    h.add(Some(math), "ALGEBRA").await;

    let copy = h
        .service
        .copy_node(CopyNodeRequest {
            node_id: math,
            new_parent_id: None,
            include_children: true,
            include_items: false,
            max_affected_nodes: None,
        })
        .await
        .unwrap();
    assert_eq!(copy.nodes_copied, 2);

    let hits = h.service.search(SearchQuery::new("algebra")).await.unwrap();
    assert_eq!(hits.len(), 2);
    // The copy keeps the name and sits one level higher, so it ranks first.
    assert_eq!(hits[0].node.code, "ALGEBRA-copy");
    assert_eq!(hits[0].breadcrumb.len(), 2);
    assert_eq!(hits[1].node.code, "ALGEBRA");
    assert_eq!(hits[1].breadcrumb.len(), 3);
    h.assert_valid().await;
}

#[tokio::test]
async fn test_export_import_between_databases() {
    let source = harness();
    let root = source.add(None, "ROOT").await;
    let math = source.add(Some(root), "MATH").await;
    source.add(Some(math), "ALG").await;
    source.add(Some(math), "GEO").await;

    let json = source.service.export_subtree(None).await.unwrap().to_json().unwrap();

    let target = harness();
    let result = target
        .service
        .import_tree(TreeExport::from_json(&json).unwrap(), None, ImportOptions::default())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.created, 4);

    let stats = target.service.get_statistics().await.unwrap();
    assert_eq!(stats.total_nodes, 4);
    assert_eq!(stats.max_depth, 2);
    let geo = target.nodes.find_by_code("GEO").unwrap().unwrap();
    assert_eq!(geo.sort_order, 1);
    target.assert_valid().await;
}
