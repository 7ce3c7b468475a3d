//! Tree service implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};

use crate::categorization::CategorizationRepositoryTrait;
use crate::config::TreeConfig;
use crate::errors::{Error, TreeError, ValidationError};
use crate::Result;

use super::mutator::{self, CopyInput, DeleteInput, MoveInput};
use super::search::{breadcrumb, rank};
use super::statistics::{node_statistics, tree_statistics};
use super::transfer::{build_templates, ordered_children, validate_templates};
use super::{
    CategoryNode, CategoryNodePatch, ChildHandlingStrategy, CollisionPolicy, CopyNodeRequest,
    CopyResult, DeleteResult, ImportOptions, ImportResult, LockScope, MoveNodeRequest,
    MoveResult, NewCategoryNode, NodeDetails, NodeId, NodeRepositoryTrait, NodeStatistics,
    NodeTemplate, RenamedCode, RepairResult, RestoreResult, SearchQuery, SearchResult,
    SubtreeGuard, TreeChangeSet, TreeCoordinator, TreeExport, TreeNodeView, TreeServiceTrait,
    TreeStatistics, TreeValidationResult, TreeValidator,
};

/// Attempts at claiming locks before a node that keeps moving is reported as
/// a concurrent modification.
const LOCK_ATTEMPTS: usize = 3;

pub struct TreeService {
    nodes: Arc<dyn NodeRepositoryTrait>,
    categorizations: Arc<dyn CategorizationRepositoryTrait>,
    config: TreeConfig,
    coordinator: Arc<TreeCoordinator>,
}

impl TreeService {
    pub fn new(
        nodes: Arc<dyn NodeRepositoryTrait>,
        categorizations: Arc<dyn CategorizationRepositoryTrait>,
        config: TreeConfig,
        coordinator: Arc<TreeCoordinator>,
    ) -> Self {
        Self {
            nodes,
            categorizations,
            config,
            coordinator,
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    fn find_node(&self, id: NodeId) -> Result<CategoryNode> {
        self.nodes
            .get_node(id)?
            .ok_or_else(|| TreeError::NodeNotFound(id).into())
    }

    fn live_node(&self, id: NodeId) -> Result<CategoryNode> {
        match self.nodes.get_node(id)? {
            Some(node) if !node.is_deleted => Ok(node),
            _ => Err(TreeError::NodeNotFound(id).into()),
        }
    }

    fn live_parent(&self, parent_id: Option<NodeId>) -> Result<Option<CategoryNode>> {
        match parent_id {
            None => Ok(None),
            Some(id) => match self.nodes.get_node(id)? {
                Some(parent) if !parent.is_deleted => Ok(Some(parent)),
                _ => Err(TreeError::ParentNotFound(id).into()),
            },
        }
    }

    /// The node's parent if it still exists and is live.
    fn surviving_parent(&self, node: &CategoryNode) -> Result<Option<CategoryNode>> {
        Ok(match node.parent_id {
            Some(id) => self.nodes.get_node(id)?.filter(|p| !p.is_deleted),
            None => None,
        })
    }

    fn parent_scope(&self, node: &CategoryNode) -> Result<LockScope> {
        Ok(LockScope::for_parent(self.surviving_parent(node)?.as_ref()))
    }

    /// Claims the scopes `scopes` derives from fresh reads. When the scopes
    /// differ once they are held, something moved while we waited: release
    /// and retry.
    async fn lock<F>(&self, id: NodeId, scopes: F) -> Result<SubtreeGuard>
    where
        F: Fn() -> Result<Vec<LockScope>> + Send + Sync,
    {
        for attempt in 1..=LOCK_ATTEMPTS {
            let wanted = scopes()?;
            let guard = self.coordinator.locks.acquire(wanted.clone()).await;
            if scopes()? == wanted {
                return Ok(guard);
            }
            drop(guard);
            debug!(
                "Node {} moved while waiting for locks (attempt {}/{})",
                id, attempt, LOCK_ATTEMPTS
            );
        }
        Err(TreeError::ConcurrentModification(id).into())
    }

    async fn apply(&self, changes: TreeChangeSet) -> Result<usize> {
        if changes.is_empty() {
            return Ok(0);
        }
        let _commit = self.coordinator.gate.commit().await;
        self.nodes.apply_changes(changes).await.map_err(|e| {
            error!("Failed to apply tree changes: {}", e);
            e
        })
    }

    fn validate_new_node(node: &NewCategoryNode) -> Result<()> {
        if node.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name".to_string()).into());
        }
        if node.code.trim().is_empty() {
            return Err(ValidationError::MissingField("code".to_string()).into());
        }
        Ok(())
    }

    /// Deletes `id` assuming the caller holds locks covering its parent.
    async fn delete_locked(
        &self,
        id: NodeId,
        strategy: ChildHandlingStrategy,
        hard: bool,
    ) -> Result<DeleteResult> {
        let node = if hard {
            self.find_node(id)?
        } else {
            self.live_node(id)?
        };
        let subtree = self.nodes.get_subtree(&node.path)?;
        let parent = self.surviving_parent(&node)?;
        let siblings = self.nodes.get_children(node.parent_id)?;
        let roots = if node.parent_id.is_some() {
            self.nodes.get_children(None)?
        } else {
            siblings.clone()
        };
        let subtree_ids: Vec<NodeId> = subtree.iter().map(|n| n.id).collect();
        let records = self.categorizations.get_node_categorizations(&subtree_ids)?;
        let parent_records = match &parent {
            Some(p) => self.categorizations.get_node_categorizations(&[p.id])?,
            None => Vec::new(),
        };

        let plan = mutator::plan_delete(DeleteInput {
            node: &node,
            subtree: &subtree,
            parent: parent.as_ref(),
            siblings: &siblings,
            roots: &roots,
            records: &records,
            parent_records: &parent_records,
            strategy,
            hard,
            policy: self.config.delete_categorization_policy,
            cap: self.config.max_affected_nodes,
        })?;
        debug!(
            "Delete plan for node {}: {} placements, {} removed records",
            id,
            plan.changes.placements.len(),
            plan.changes.removed_categorizations.len()
        );

        self.apply(plan.changes).await?;
        for warning in &plan.warnings {
            warn!("Delete of node {}: {}", id, warning);
        }
        info!(
            "Deleted node {} ({:?}, hard: {}): {} nodes, {} children reassigned",
            id, strategy, hard, plan.nodes_deleted, plan.children_reassigned
        );

        Ok(DeleteResult {
            success: true,
            nodes_deleted: plan.nodes_deleted,
            children_reassigned: plan.children_reassigned,
            items_reassigned: plan.items_reassigned,
            items_removed: plan.items_removed,
            hard_deleted: hard,
            warnings: plan.warnings,
        })
    }

    async fn delete_with_locks(
        &self,
        id: NodeId,
        strategy: ChildHandlingStrategy,
        hard: bool,
    ) -> Result<DeleteResult> {
        let _guard = self
            .lock(id, || {
                let node = self.find_node(id)?;
                let mut scopes = vec![self.parent_scope(&node)?];
                if strategy == ChildHandlingStrategy::ReassignToRoot {
                    scopes.push(LockScope::Tree);
                }
                Ok(scopes)
            })
            .await?;
        self.delete_locked(id, strategy, hard).await
    }

    /// Creates one imported node; the caller holds the tree lock.
    async fn create_locked(&self, node: NewCategoryNode) -> Result<CategoryNode> {
        let _commit = self.coordinator.gate.commit().await;
        self.nodes.create_node(node).await
    }

    async fn import_locked(
        &self,
        export: &TreeExport,
        target: Option<&CategoryNode>,
        options: &ImportOptions,
        result: &mut ImportResult,
    ) -> Result<()> {
        let base_level = target.map(|t| t.level + 1).unwrap_or(0);
        let mut stack: Vec<(&NodeTemplate, Option<NodeId>, i32)> = ordered_children(&export.roots)
            .into_iter()
            .rev()
            .map(|t| (t, target.map(|p| p.id), base_level))
            .collect();

        while let Some((template, parent_id, level)) = stack.pop() {
            if options.is_cancelled() {
                result.aborted = true;
                result.warnings.push(format!(
                    "Import cancelled after {} created nodes",
                    result.created
                ));
                break;
            }

            let existing = self.nodes.find_by_code(&template.code)?;
            let node_id = match existing {
                Some(existing)
                    if existing.is_deleted
                        && options.collision_policy != CollisionPolicy::Rename =>
                {
                    result.skipped += template.node_count();
                    result.warnings.push(format!(
                        "Code '{}' belongs to a deleted node; its subtree was skipped",
                        template.code
                    ));
                    continue;
                }
                Some(existing) => match options.collision_policy {
                    CollisionPolicy::Skip => {
                        result.skipped += 1;
                        existing.id
                    }
                    CollisionPolicy::Update => {
                        let patch = CategoryNodePatch {
                            name: Some(template.name.clone()),
                            code: None,
                            description: Some(template.description.clone().unwrap_or_default()),
                            color: Some(template.color.clone().unwrap_or_default()),
                            icon: Some(template.icon.clone().unwrap_or_default()),
                            is_active: Some(template.is_active),
                        };
                        let _commit = self.coordinator.gate.commit().await;
                        self.nodes.update_node(existing.id, patch).await?;
                        result.updated += 1;
                        existing.id
                    }
                    CollisionPolicy::Rename => {
                        let stem = format!("{}{}", template.code.trim(), options.rename_suffix);
                        let mut taken: HashSet<String> =
                            self.nodes.find_codes_with_prefix(&stem)?.into_iter().collect();
                        let code = mutator::unique_code(
                            &template.code,
                            &options.rename_suffix,
                            &mut taken,
                        );
                        let created = self
                            .create_locked(new_node_from_template(template, parent_id, &code))
                            .await?;
                        result.created += 1;
                        result.renamed.push(RenamedCode {
                            original: template.code.clone(),
                            assigned: code,
                        });
                        created.id
                    }
                    CollisionPolicy::Fail => {
                        return Err(TreeError::DuplicateCode(template.code.clone()).into());
                    }
                },
                None => {
                    let created = self
                        .create_locked(new_node_from_template(
                            template,
                            parent_id,
                            &template.code,
                        ))
                        .await?;
                    result.created += 1;
                    created.id
                }
            };

            if level > self.config.max_depth {
                result.warnings.push(format!(
                    "Node '{}' was imported at depth {}, beyond the configured maximum of {}",
                    template.code, level, self.config.max_depth
                ));
            }
            result.code_mapping.insert(template.code.clone(), node_id);
            for child in ordered_children(&template.children).into_iter().rev() {
                stack.push((child, Some(node_id), level + 1));
            }
        }
        Ok(())
    }
}

fn new_node_from_template(
    template: &NodeTemplate,
    parent_id: Option<NodeId>,
    code: &str,
) -> NewCategoryNode {
    NewCategoryNode {
        parent_id,
        name: template.name.clone(),
        code: code.to_string(),
        description: template.description.clone(),
        color: template.color.clone(),
        icon: template.icon.clone(),
        is_active: template.is_active,
    }
}

fn nest(node: CategoryNode, children: &mut HashMap<NodeId, Vec<CategoryNode>>) -> TreeNodeView {
    let kids = children.remove(&node.id).unwrap_or_default();
    TreeNodeView {
        node,
        children: kids.into_iter().map(|k| nest(k, children)).collect(),
    }
}

#[async_trait]
impl TreeServiceTrait for TreeService {
    fn get_node(&self, id: NodeId) -> Result<CategoryNode> {
        self.find_node(id)
    }

    fn get_roots(&self) -> Result<Vec<CategoryNode>> {
        self.nodes.get_children(None)
    }

    fn get_children(&self, id: NodeId) -> Result<Vec<CategoryNode>> {
        self.live_node(id)?;
        self.nodes.get_children(Some(id))
    }

    fn get_descendants(&self, id: NodeId) -> Result<Vec<CategoryNode>> {
        let node = self.live_node(id)?;
        Ok(self
            .nodes
            .get_subtree(&node.path)?
            .into_iter()
            .filter(|n| n.id != node.id && !n.is_deleted)
            .collect())
    }

    async fn get_ancestors(&self, id: NodeId) -> Result<Vec<CategoryNode>> {
        let _read = self.coordinator.gate.read().await;
        let node = self.find_node(id)?;
        let path = node.materialized_path()?;
        let mut by_id: HashMap<NodeId, CategoryNode> = self
            .nodes
            .get_nodes(path.ancestor_ids())?
            .into_iter()
            .map(|n| (n.id, n))
            .collect();
        Ok(path
            .ancestor_ids()
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect())
    }

    async fn get_tree(&self) -> Result<Vec<TreeNodeView>> {
        let _read = self.coordinator.gate.read().await;
        let mut roots = Vec::new();
        let mut children: HashMap<NodeId, Vec<CategoryNode>> = HashMap::new();
        for node in self.nodes.get_all_nodes()?.into_iter().filter(|n| !n.is_deleted) {
            match node.parent_id {
                Some(parent_id) => children.entry(parent_id).or_default().push(node),
                None => roots.push(node),
            }
        }
        for group in children.values_mut() {
            group.sort_by_key(|n| (n.sort_order, n.id));
        }
        roots.sort_by_key(|n| (n.sort_order, n.id));

        Ok(roots
            .into_iter()
            .map(|root| nest(root, &mut children))
            .collect())
    }

    async fn get_node_details(&self, id: NodeId) -> Result<NodeDetails> {
        let _read = self.coordinator.gate.read().await;
        let node = self.find_node(id)?;
        let subtree = self.nodes.get_subtree(&node.path)?;
        let live_ids: Vec<NodeId> = subtree
            .iter()
            .filter(|n| !n.is_deleted)
            .map(|n| n.id)
            .collect();
        let records = self.categorizations.get_node_categorizations(&live_ids)?;
        let stats = node_statistics(&node, &subtree, &records);

        Ok(NodeDetails {
            node,
            child_count: stats.child_count,
            descendant_item_count: stats.descendant_item_count,
        })
    }

    async fn create_node(&self, node: NewCategoryNode) -> Result<CategoryNode> {
        Self::validate_new_node(&node)?;
        let parent_id = node.parent_id;
        let _guard = self
            .lock(parent_id.unwrap_or_default(), || {
                Ok(vec![LockScope::for_parent(
                    self.live_parent(parent_id)?.as_ref(),
                )])
            })
            .await?;

        let _commit = self.coordinator.gate.commit().await;
        let created = self.nodes.create_node(node).await?;
        if created.level > self.config.max_depth {
            warn!(
                "Node {} was created at depth {}, beyond the configured maximum of {}",
                created.id, created.level, self.config.max_depth
            );
        }
        info!(
            "Created node {} '{}' at {}",
            created.id, created.code, created.path
        );
        Ok(created)
    }

    async fn update_node(&self, id: NodeId, patch: CategoryNodePatch) -> Result<CategoryNode> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ValidationError::MissingField("name".to_string()).into());
        }
        if patch.code.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(ValidationError::MissingField("code".to_string()).into());
        }
        if patch.is_empty() {
            return self.find_node(id);
        }

        let _guard = self
            .lock(id, || Ok(vec![LockScope::for_node(&self.find_node(id)?)]))
            .await?;
        let _commit = self.coordinator.gate.commit().await;
        let updated = self.nodes.update_node(id, patch).await?;
        debug!("Updated attributes of node {}", id);
        Ok(updated)
    }

    async fn soft_delete_node(&self, id: NodeId) -> Result<DeleteResult> {
        self.delete_with_locks(id, ChildHandlingStrategy::PreventDeletion, false)
            .await
    }

    async fn restore_node(&self, id: NodeId) -> Result<RestoreResult> {
        let _guard = self
            .lock(id, || {
                let node = self.find_node(id)?;
                Ok(vec![LockScope::for_parent(
                    self.live_parent(node.parent_id)?.as_ref(),
                )])
            })
            .await?;

        let node = self.find_node(id)?;
        if !node.is_deleted {
            return Ok(RestoreResult {
                success: true,
                nodes_restored: 0,
                warnings: vec![format!("Node {} is not deleted", id)],
            });
        }
        let parent = self.live_parent(node.parent_id)?;
        let subtree = self.nodes.get_subtree(&node.path)?;
        let siblings = self.nodes.get_children(node.parent_id)?;

        let plan = mutator::plan_restore(&node, &subtree, parent.as_ref(), &siblings)?;
        self.apply(plan.changes).await?;
        info!("Restored node {} with {} rows", id, plan.restored);

        Ok(RestoreResult {
            success: true,
            nodes_restored: plan.restored,
            warnings: Vec::new(),
        })
    }

    async fn hard_delete_node(&self, id: NodeId) -> Result<DeleteResult> {
        self.delete_with_locks(id, ChildHandlingStrategy::DeleteWithParent, true)
            .await
    }

    async fn purge_deleted(&self) -> Result<usize> {
        let _guard = self.coordinator.locks.acquire(vec![LockScope::Tree]).await;

        let nodes = self.nodes.get_all_nodes()?;
        let deleted: HashMap<NodeId, bool> = nodes.iter().map(|n| (n.id, n.is_deleted)).collect();
        let purge_roots: Vec<NodeId> = nodes
            .iter()
            .filter(|n| n.is_deleted)
            .filter(|n| {
                n.parent_id
                    .map_or(true, |p| !deleted.get(&p).copied().unwrap_or(false))
            })
            .map(|n| n.id)
            .collect();

        let mut purged = 0;
        for id in purge_roots {
            // Live rows left under a deleted node move up instead of vanishing.
            let result = self
                .delete_locked(id, ChildHandlingStrategy::ReassignToParent, true)
                .await?;
            purged += result.nodes_deleted;
        }
        info!("Purged {} soft-deleted nodes", purged);
        Ok(purged)
    }

    async fn move_node(&self, request: MoveNodeRequest) -> Result<MoveResult> {
        let id = request.node_id;
        let _guard = self
            .lock(id, || {
                let node = self.live_node(id)?;
                let destination = self.live_parent(request.new_parent_id)?;
                Ok(vec![
                    self.parent_scope(&node)?,
                    LockScope::for_parent(destination.as_ref()),
                ])
            })
            .await?;

        let node = self.live_node(id)?;
        let new_parent = self.live_parent(request.new_parent_id)?;
        let subtree = self.nodes.get_subtree(&node.path)?;
        let old_siblings = self.nodes.get_children(node.parent_id)?;
        let new_siblings = self.nodes.get_children(request.new_parent_id)?;

        let plan = mutator::plan_move(MoveInput {
            node: &node,
            subtree: &subtree,
            new_parent: new_parent.as_ref(),
            old_siblings: &old_siblings,
            new_siblings: &new_siblings,
            new_sort_order: request.new_sort_order,
            cap: request
                .max_affected_nodes
                .unwrap_or(self.config.max_affected_nodes),
            max_depth: self.config.max_depth,
        })?;

        self.apply(plan.changes).await?;
        for warning in &plan.warnings {
            warn!("Move of node {}: {}", id, warning);
        }
        info!(
            "Moved node {} from {} to {} ({} nodes affected)",
            id, node.path, plan.new_path, plan.affected
        );

        Ok(MoveResult {
            success: true,
            node_id: id,
            affected_nodes: plan.affected,
            old_path: node.path,
            new_path: plan.new_path,
            warnings: plan.warnings,
        })
    }

    async fn copy_node(&self, request: CopyNodeRequest) -> Result<CopyResult> {
        let id = request.node_id;
        let _guard = self
            .lock(id, || {
                let node = self.live_node(id)?;
                let destination = self.live_parent(request.new_parent_id)?;
                Ok(vec![
                    LockScope::for_node(&node),
                    LockScope::for_parent(destination.as_ref()),
                ])
            })
            .await?;

        let source = self.live_node(id)?;
        let new_parent = self.live_parent(request.new_parent_id)?;
        let subtree: Vec<CategoryNode> = if request.include_children {
            self.nodes
                .get_subtree(&source.path)?
                .into_iter()
                .filter(|n| !n.is_deleted)
                .collect()
        } else {
            vec![source.clone()]
        };
        let destination_sibling_count = self.nodes.get_children(request.new_parent_id)?.len();

        let suffix = self.config.copy_code_suffix.as_str();
        let mut taken_codes = HashSet::new();
        for node in &subtree {
            let stem = format!("{}{}", node.code.trim(), suffix);
            taken_codes.extend(self.nodes.find_codes_with_prefix(&stem)?);
        }
        let records = if request.include_items {
            let ids: Vec<NodeId> = subtree.iter().map(|n| n.id).collect();
            self.categorizations.get_node_categorizations(&ids)?
        } else {
            Vec::new()
        };

        let plan = mutator::plan_copy(CopyInput {
            source: &source,
            subtree: &subtree,
            include_children: request.include_children,
            records: &records,
            new_parent: new_parent.as_ref(),
            destination_sibling_count,
            taken_codes,
            code_suffix: suffix,
            cap: request
                .max_affected_nodes
                .unwrap_or(self.config.max_affected_nodes),
            max_depth: self.config.max_depth,
        })?;

        let items_copied = plan.plan.categorizations.len();
        let new_ids = {
            let _commit = self.coordinator.gate.commit().await;
            self.nodes.insert_subtree(plan.plan).await?
        };
        let new_root_id = new_ids
            .first()
            .copied()
            .ok_or_else(|| Error::Unexpected("copy inserted no nodes".to_string()))?;
        let id_mapping = plan.source_ids.iter().copied().zip(new_ids).collect();

        for warning in &plan.warnings {
            warn!("Copy of node {}: {}", id, warning);
        }
        info!(
            "Copied node {} as {} ({} nodes, {} items)",
            id,
            new_root_id,
            plan.source_ids.len(),
            items_copied
        );

        Ok(CopyResult {
            success: true,
            new_root_id,
            nodes_copied: plan.source_ids.len(),
            items_copied,
            id_mapping,
            warnings: plan.warnings,
        })
    }

    async fn delete_node(
        &self,
        id: NodeId,
        strategy: ChildHandlingStrategy,
    ) -> Result<DeleteResult> {
        self.delete_with_locks(id, strategy, false).await
    }

    async fn reorder_children(
        &self,
        parent_id: Option<NodeId>,
        ordered_child_ids: Vec<NodeId>,
    ) -> Result<bool> {
        let _guard = self
            .lock(parent_id.unwrap_or_default(), || {
                Ok(vec![LockScope::for_parent(
                    self.live_parent(parent_id)?.as_ref(),
                )])
            })
            .await?;

        let children = self.nodes.get_children(parent_id)?;
        let label = parent_id.map_or_else(|| "root level".to_string(), |p| format!("node {}", p));
        let changes = mutator::plan_reorder(&label, &children, &ordered_child_ids)?;
        let touched = self.apply(changes).await?;
        debug!("Reordered children of {} ({} rows changed)", label, touched);
        Ok(true)
    }

    async fn validate_tree(&self) -> Result<TreeValidationResult> {
        let _read = self.coordinator.gate.read().await;
        let nodes = self.nodes.get_all_nodes()?;
        let result = TreeValidator::new(&self.config).validate(&nodes);
        if !result.is_valid {
            warn!("Tree validation found {} issues", result.issues.len());
        }
        for warning in &result.warnings {
            warn!("Tree validation: {}", warning);
        }
        Ok(result)
    }

    async fn repair_tree(&self) -> Result<RepairResult> {
        let _guard = self.coordinator.locks.acquire(vec![LockScope::Tree]).await;
        let nodes = self.nodes.get_all_nodes()?;
        let plan = mutator::plan_repair(&nodes);
        self.apply(plan.changes).await?;

        let mut warnings = Vec::new();
        if plan.cycles_unrepaired > 0 {
            warnings.push(format!(
                "{} nodes are part of a cycle and were left unrepaired",
                plan.cycles_unrepaired
            ));
        }
        info!(
            "Repaired tree: {} paths, {} orphans, {} sibling groups",
            plan.paths_repaired, plan.orphans_reattached, plan.groups_resequenced
        );

        Ok(RepairResult {
            success: plan.cycles_unrepaired == 0,
            paths_repaired: plan.paths_repaired,
            orphans_reattached: plan.orphans_reattached,
            sibling_groups_resequenced: plan.groups_resequenced,
            cycles_unrepaired: plan.cycles_unrepaired,
            warnings,
        })
    }

    async fn search(&self, query: SearchQuery) -> Result<Vec<SearchResult>> {
        if query.term.trim().is_empty() {
            return Err(ValidationError::MissingField("term".to_string()).into());
        }
        let _read = self.coordinator.gate.read().await;

        let candidates = match query.scope_node_id {
            Some(scope) => {
                let scope = self.live_node(scope)?;
                self.nodes.get_subtree(&scope.path)?
            }
            None => self.nodes.get_all_nodes()?,
        };
        let limit = query.max_results.unwrap_or(self.config.search_default_limit);
        let hits = rank(candidates, &query, limit);

        let mut ancestor_ids: Vec<NodeId> = hits
            .iter()
            .filter_map(|(node, _, _)| node.materialized_path().ok())
            .flat_map(|path| path.ancestor_ids().to_vec())
            .collect();
        ancestor_ids.sort_unstable();
        ancestor_ids.dedup();
        let ancestors: HashMap<NodeId, CategoryNode> = self
            .nodes
            .get_nodes(&ancestor_ids)?
            .into_iter()
            .map(|n| (n.id, n))
            .collect();

        Ok(hits
            .into_iter()
            .map(|(node, score, match_field)| SearchResult {
                breadcrumb: breadcrumb(&node, &ancestors),
                node,
                score,
                match_field,
            })
            .collect())
    }

    async fn export_subtree(&self, id: Option<NodeId>) -> Result<TreeExport> {
        let _read = self.coordinator.gate.read().await;
        let export = match id {
            Some(id) => {
                let root = self.live_node(id)?;
                let rows = self.nodes.get_subtree(&root.path)?;
                let mut export = TreeExport::new(build_templates(&[&root], &rows));
                export.source_root_code = Some(root.code.clone());
                export
            }
            None => {
                let rows = self.nodes.get_all_nodes()?;
                let roots: Vec<&CategoryNode> =
                    rows.iter().filter(|n| n.is_root() && !n.is_deleted).collect();
                TreeExport::new(build_templates(&roots, &rows))
            }
        };
        debug!("Exported {} nodes", export.node_count());
        Ok(export)
    }

    async fn import_tree(
        &self,
        template: TreeExport,
        target_parent_id: Option<NodeId>,
        options: ImportOptions,
    ) -> Result<ImportResult> {
        let fail_on_collision = options.collision_policy == CollisionPolicy::Fail;
        validate_templates(&template.roots, fail_on_collision)?;

        // Skip and Update may continue under nodes anywhere in the tree.
        let _guard = self.coordinator.locks.acquire(vec![LockScope::Tree]).await;
        let target = self.live_parent(target_parent_id)?;

        if fail_on_collision {
            let mut stack: Vec<&NodeTemplate> = template.roots.iter().collect();
            while let Some(t) = stack.pop() {
                if self.nodes.find_by_code(&t.code)?.is_some() {
                    return Err(TreeError::DuplicateCode(t.code.clone()).into());
                }
                stack.extend(t.children.iter());
            }
        }

        let mut result = ImportResult::default();
        if let Err(e) = self
            .import_locked(&template, target.as_ref(), &options, &mut result)
            .await
        {
            if result.created == 0 && result.updated == 0 {
                return Err(e);
            }
            error!("Import stopped after {} nodes: {}", result.created, e);
            result.error_code = Some(e.code().to_string());
            result.error_message = Some(e.to_string());
        }

        result.success = !result.aborted && result.error_code.is_none();
        for warning in &result.warnings {
            warn!("Import: {}", warning);
        }
        info!(
            "Imported tree: {} created, {} skipped, {} updated, {} renamed",
            result.created,
            result.skipped,
            result.updated,
            result.renamed.len()
        );
        Ok(result)
    }

    async fn get_statistics(&self) -> Result<TreeStatistics> {
        let _read = self.coordinator.gate.read().await;
        Ok(tree_statistics(&self.nodes.get_all_nodes()?))
    }

    async fn get_node_statistics(&self, id: NodeId) -> Result<NodeStatistics> {
        let _read = self.coordinator.gate.read().await;
        let node = self.live_node(id)?;
        let subtree = self.nodes.get_subtree(&node.path)?;
        let live_ids: Vec<NodeId> = subtree
            .iter()
            .filter(|n| !n.is_deleted)
            .map(|n| n.id)
            .collect();
        let records = self.categorizations.get_node_categorizations(&live_ids)?;
        Ok(node_statistics(&node, &subtree, &records))
    }
}
