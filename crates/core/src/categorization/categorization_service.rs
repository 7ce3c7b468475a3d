//! Categorization service implementation.

use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;

use crate::config::TreeConfig;
use crate::errors::TreeError;
use crate::tree::{CategoryNode, ItemId, LockScope, NodeId, NodeRepositoryTrait, TreeCoordinator};
use crate::Result;

use super::{
    Categorization, CategorizationKey, CategorizationRepositoryTrait, CategorizationServiceTrait,
    NewCategorization,
};

pub struct CategorizationService {
    nodes: Arc<dyn NodeRepositoryTrait>,
    repository: Arc<dyn CategorizationRepositoryTrait>,
    config: TreeConfig,
    coordinator: Arc<TreeCoordinator>,
}

impl CategorizationService {
    pub fn new(
        nodes: Arc<dyn NodeRepositoryTrait>,
        repository: Arc<dyn CategorizationRepositoryTrait>,
        config: TreeConfig,
        coordinator: Arc<TreeCoordinator>,
    ) -> Self {
        Self {
            nodes,
            repository,
            config,
            coordinator,
        }
    }

    fn live_node(&self, node_id: NodeId) -> Result<CategoryNode> {
        match self.nodes.get_node(node_id)? {
            Some(node) if !node.is_deleted => Ok(node),
            _ => Err(TreeError::NodeNotFound(node_id).into()),
        }
    }
}

#[async_trait]
impl CategorizationServiceTrait for CategorizationService {
    async fn assign_item_to_category(&self, categorization: NewCategorization) -> Result<bool> {
        categorization.validate()?;
        let node = self.live_node(categorization.node_id)?;

        // A concurrent delete of the node would otherwise reconcile records
        // before this one lands.
        let _guard = self
            .coordinator
            .locks
            .acquire(vec![LockScope::for_node(&node)])
            .await;
        self.live_node(node.id)?;

        let item_id = categorization.item_id;
        let is_primary = categorization.is_primary;
        let _commit = self.coordinator.gate.commit().await;
        self.repository
            .upsert_categorization(categorization, self.config.primary_conflict_policy)
            .await?;

        info!(
            "Assigned item {} to node {} (primary: {})",
            item_id, node.id, is_primary
        );
        Ok(true)
    }

    async fn remove_item_from_category(&self, item_id: ItemId, node_id: NodeId) -> Result<bool> {
        let _commit = self.coordinator.gate.commit().await;
        let removed = self
            .repository
            .delete_categorization(CategorizationKey { item_id, node_id })
            .await?;
        debug!(
            "Removed {} categorization(s) of item {} at node {}",
            removed, item_id, node_id
        );
        Ok(removed > 0)
    }

    fn get_item_categorizations(&self, item_id: ItemId) -> Result<Vec<Categorization>> {
        self.repository.get_item_categorizations(item_id)
    }

    fn get_primary_categorization(&self, item_id: ItemId) -> Result<Option<Categorization>> {
        Ok(self
            .repository
            .get_item_categorizations(item_id)?
            .into_iter()
            .find(|c| c.is_primary))
    }

    async fn get_node_items(
        &self,
        node_id: NodeId,
        include_descendants: bool,
    ) -> Result<Vec<Categorization>> {
        let _read = self.coordinator.gate.read().await;
        let node = self.live_node(node_id)?;

        let node_ids: Vec<NodeId> = if include_descendants {
            self.nodes
                .get_subtree(&node.path)?
                .into_iter()
                .filter(|n| !n.is_deleted)
                .map(|n| n.id)
                .collect()
        } else {
            vec![node.id]
        };

        self.repository.get_node_categorizations(&node_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrimaryConflictPolicy;
    use crate::tree::test_support::InMemoryTreeStore;
    use crate::tree::NewCategoryNode;

    async fn setup(policy: PrimaryConflictPolicy) -> (Arc<InMemoryTreeStore>, CategorizationService) {
        let store = Arc::new(InMemoryTreeStore::new());
        let config = TreeConfig {
            primary_conflict_policy: policy,
            ..TreeConfig::default()
        };
        let service = CategorizationService::new(
            store.clone(),
            store.clone(),
            config,
            Arc::new(TreeCoordinator::new()),
        );
        (store, service)
    }

    async fn node(store: &InMemoryTreeStore, parent: Option<NodeId>, code: &str) -> NodeId {
        store
            .create_node(NewCategoryNode::new(parent, code.to_uppercase(), code))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_primary_is_demoted_on_reassignment() {
        let (store, service) = setup(PrimaryConflictPolicy::Demote).await;
        let a = node(&store, None, "a").await;
        let b = node(&store, None, "b").await;

        assert!(service
            .assign_item_to_category(NewCategorization::new(7, a, true))
            .await
            .unwrap());
        assert!(service
            .assign_item_to_category(NewCategorization::new(7, b, true))
            .await
            .unwrap());

        let records = service.get_item_categorizations(7).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.iter().filter(|c| c.is_primary).count(), 1);
        let primary = service.get_primary_categorization(7).unwrap().unwrap();
        assert_eq!(primary.node_id, b);
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_second_primary() {
        let (store, service) = setup(PrimaryConflictPolicy::Reject).await;
        let a = node(&store, None, "a").await;
        let b = node(&store, None, "b").await;

        service
            .assign_item_to_category(NewCategorization::new(7, a, true))
            .await
            .unwrap();
        let err = service
            .assign_item_to_category(NewCategorization::new(7, b, true))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ITEM_ALREADY_PRIMARY");
        assert_eq!(service.get_item_categorizations(7).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_assign_to_missing_node_fails() {
        let (_store, service) = setup(PrimaryConflictPolicy::Demote).await;
        let err = service
            .assign_item_to_category(NewCategorization::new(1, 99, false))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NODE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_remove_and_node_items() {
        let (store, service) = setup(PrimaryConflictPolicy::Demote).await;
        let root = node(&store, None, "root").await;
        let child = node(&store, Some(root), "child").await;

        service
            .assign_item_to_category(NewCategorization::new(1, root, true))
            .await
            .unwrap();
        service
            .assign_item_to_category(NewCategorization::new(2, child, true))
            .await
            .unwrap();

        assert_eq!(service.get_node_items(root, false).await.unwrap().len(), 1);
        assert_eq!(service.get_node_items(root, true).await.unwrap().len(), 2);

        assert!(service.remove_item_from_category(2, child).await.unwrap());
        assert!(!service.remove_item_from_category(2, child).await.unwrap());
        assert_eq!(service.get_node_items(root, true).await.unwrap().len(), 1);
    }
}
