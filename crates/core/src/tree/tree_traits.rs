//! Traits for the node store and the tree service.

use async_trait::async_trait;

use crate::errors::Result;

use super::{
    CategoryNode, CategoryNodePatch, ChildHandlingStrategy, CopyNodeRequest, CopyResult,
    DeleteResult, ImportOptions, ImportResult, MoveNodeRequest, MoveResult, NewCategoryNode,
    NodeDetails, NodeId, NodeStatistics, RepairResult, RestoreResult, SearchQuery, SearchResult,
    SubtreeInsertPlan, TreeChangeSet, TreeExport, TreeNodeView, TreeStatistics,
    TreeValidationResult,
};

/// Repository trait for node persistence.
///
/// Reads that return sibling lists exclude soft-deleted rows and are ordered
/// by `sort_order`. Subtree reads return every row, deleted or not.
#[async_trait]
pub trait NodeRepositoryTrait: Send + Sync {
    fn get_node(&self, id: NodeId) -> Result<Option<CategoryNode>>;
    fn get_nodes(&self, ids: &[NodeId]) -> Result<Vec<CategoryNode>>;
    /// Active children of `parent_id`, or active roots when `None`.
    fn get_children(&self, parent_id: Option<NodeId>) -> Result<Vec<CategoryNode>>;
    /// Every row whose path starts with `path`, ordered by level then sort order.
    fn get_subtree(&self, path: &str) -> Result<Vec<CategoryNode>>;
    fn get_all_nodes(&self) -> Result<Vec<CategoryNode>>;
    /// Lookup by normalized code, deleted rows included.
    fn find_by_code(&self, code: &str) -> Result<Option<CategoryNode>>;
    /// Normalized codes starting with the normalized `prefix`.
    fn find_codes_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Inserts a node under an active parent, computing its path, level and
    /// an appended sort order in the same transaction.
    async fn create_node(&self, node: NewCategoryNode) -> Result<CategoryNode>;
    async fn update_node(&self, id: NodeId, patch: CategoryNodePatch) -> Result<CategoryNode>;
    /// Inserts a planned subtree atomically and returns the new ids in plan order.
    async fn insert_subtree(&self, plan: SubtreeInsertPlan) -> Result<Vec<NodeId>>;
    /// Applies a change set as a single transaction; returns rows touched.
    async fn apply_changes(&self, changes: TreeChangeSet) -> Result<usize>;
}

/// Service trait for tree operations.
#[async_trait]
pub trait TreeServiceTrait: Send + Sync {
    // Node store
    fn get_node(&self, id: NodeId) -> Result<CategoryNode>;
    fn get_roots(&self) -> Result<Vec<CategoryNode>>;
    fn get_children(&self, id: NodeId) -> Result<Vec<CategoryNode>>;
    fn get_descendants(&self, id: NodeId) -> Result<Vec<CategoryNode>>;
    async fn get_ancestors(&self, id: NodeId) -> Result<Vec<CategoryNode>>;
    async fn get_tree(&self) -> Result<Vec<TreeNodeView>>;
    async fn get_node_details(&self, id: NodeId) -> Result<NodeDetails>;
    async fn create_node(&self, node: NewCategoryNode) -> Result<CategoryNode>;
    async fn update_node(&self, id: NodeId, patch: CategoryNodePatch) -> Result<CategoryNode>;
    async fn soft_delete_node(&self, id: NodeId) -> Result<DeleteResult>;
    async fn restore_node(&self, id: NodeId) -> Result<RestoreResult>;
    async fn hard_delete_node(&self, id: NodeId) -> Result<DeleteResult>;
    async fn purge_deleted(&self) -> Result<usize>;

    // Mutator
    async fn move_node(&self, request: MoveNodeRequest) -> Result<MoveResult>;
    async fn copy_node(&self, request: CopyNodeRequest) -> Result<CopyResult>;
    async fn delete_node(&self, id: NodeId, strategy: ChildHandlingStrategy)
        -> Result<DeleteResult>;
    async fn reorder_children(
        &self,
        parent_id: Option<NodeId>,
        ordered_child_ids: Vec<NodeId>,
    ) -> Result<bool>;

    // Validation
    async fn validate_tree(&self) -> Result<TreeValidationResult>;
    async fn repair_tree(&self) -> Result<RepairResult>;

    // Search
    async fn search(&self, query: SearchQuery) -> Result<Vec<SearchResult>>;

    // Import/Export
    async fn export_subtree(&self, id: Option<NodeId>) -> Result<TreeExport>;
    async fn import_tree(
        &self,
        template: TreeExport,
        target_parent_id: Option<NodeId>,
        options: ImportOptions,
    ) -> Result<ImportResult>;

    // Statistics
    async fn get_statistics(&self) -> Result<TreeStatistics>;
    async fn get_node_statistics(&self, id: NodeId) -> Result<NodeStatistics>;
}
