//! Traits for categorization repository and service.

use async_trait::async_trait;

use crate::config::PrimaryConflictPolicy;
use crate::errors::Result;
use crate::tree::{ItemId, NodeId};

use super::{Categorization, CategorizationKey, NewCategorization};

/// Repository trait for categorization persistence.
#[async_trait]
pub trait CategorizationRepositoryTrait: Send + Sync {
    fn get_item_categorizations(&self, item_id: ItemId) -> Result<Vec<Categorization>>;
    fn get_node_categorizations(&self, node_ids: &[NodeId]) -> Result<Vec<Categorization>>;

    /// Inserts or updates the `(item, node)` record. When it is primary, any
    /// other primary record of the item is demoted or the call fails with
    /// `ItemAlreadyPrimary`, per `policy`, inside the same transaction.
    async fn upsert_categorization(
        &self,
        categorization: NewCategorization,
        policy: PrimaryConflictPolicy,
    ) -> Result<Categorization>;
    async fn delete_categorization(&self, key: CategorizationKey) -> Result<usize>;
}

/// Service trait for categorization business logic.
#[async_trait]
pub trait CategorizationServiceTrait: Send + Sync {
    async fn assign_item_to_category(&self, categorization: NewCategorization) -> Result<bool>;
    async fn remove_item_from_category(&self, item_id: ItemId, node_id: NodeId) -> Result<bool>;
    fn get_item_categorizations(&self, item_id: ItemId) -> Result<Vec<Categorization>>;
    fn get_primary_categorization(&self, item_id: ItemId) -> Result<Option<Categorization>>;
    async fn get_node_items(
        &self,
        node_id: NodeId,
        include_descendants: bool,
    ) -> Result<Vec<Categorization>>;
}
