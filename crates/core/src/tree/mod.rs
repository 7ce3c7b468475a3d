//! Tree module - the category tree engine.
//!
//! ```text
//! TreeService ──► mutator (move/copy/delete/reorder/restore/repair plans)
//!      │      ──► validator / search / transfer / statistics
//!      │      ──► locking (SubtreeLocks, CommitGate)
//!      ▼
//! NodeRepositoryTrait + CategorizationRepositoryTrait (storage crates)
//! ```
//!
//! Planning is pure: every structural operation reads what it needs, builds a
//! `TreeChangeSet` and hands it to the store, which applies it atomically.

mod locking;
mod mutator;
mod path_codec;
mod search;
mod statistics;
mod transfer;
mod tree_model;
mod tree_service;
mod tree_traits;
mod validator;

#[cfg(test)]
pub(crate) mod test_support;


#[cfg(test)]
mod tree_property_tests;

/// Stable, never reused node identifier.
pub type NodeId = i64;

/// Identifier of a categorized item (e.g. a question-bank entry).
pub type ItemId = i64;

pub use locking::{CommitGate, LockScope, SubtreeGuard, SubtreeLocks, TreeCoordinator};
pub use path_codec::{
    compute_path, is_strict_descendant, level_of, parse_path, rebase_path, MaterializedPath,
    PATH_DELIMITER,
};
pub use search::{BreadcrumbEntry, MatchField, SearchQuery, SearchResult};
pub use statistics::{NodeStatistics, TreeStatistics};
pub use transfer::{
    CollisionPolicy, ImportCancellation, ImportOptions, ImportResult, NodeTemplate, RenamedCode,
    TreeExport, EXPORT_FORMAT_VERSION,
};
pub use tree_model::{
    normalize_code, CategoryNode, CategoryNodePatch, ChildHandlingStrategy, CopyNodeRequest,
    CopyResult, DeleteResult, MoveNodeRequest, MoveResult, NewCategoryNode, NodeDetails,
    NodePlacement, OperationOutcome, PlannedCategorization, PlannedNode, PlannedParent,
    RestoreResult, SubtreeInsertPlan, TreeChangeSet, TreeNodeView,
};
pub use tree_service::TreeService;
pub use tree_traits::{NodeRepositoryTrait, TreeServiceTrait};
pub use validator::{
    RepairResult, TreeValidationResult, TreeValidator, ValidationIssue, ValidationIssueKind,
};
