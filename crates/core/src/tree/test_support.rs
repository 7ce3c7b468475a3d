//! In-memory store used by service tests. Mirrors the SQLite constraints:
//! case-insensitive code uniqueness, one primary record per item, and
//! all-or-nothing change sets.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::categorization::{
    Categorization, CategorizationKey, CategorizationRepositoryTrait, NewCategorization,
};
use crate::config::PrimaryConflictPolicy;
use crate::errors::{Result, TreeError};

use super::{
    compute_path, level_of, normalize_code, CategoryNode, CategoryNodePatch, ItemId,
    NewCategoryNode, NodeId, NodeRepositoryTrait, PlannedParent, SubtreeInsertPlan,
    TreeChangeSet,
};

#[derive(Default, Clone)]
struct StoreState {
    nodes: BTreeMap<NodeId, CategoryNode>,
    categorizations: BTreeMap<CategorizationKey, Categorization>,
    last_id: NodeId,
}

impl StoreState {
    fn live(&self, id: NodeId) -> Option<&CategoryNode> {
        self.nodes.get(&id).filter(|n| !n.is_deleted)
    }

    fn code_taken(&self, code: &str, except: Option<NodeId>) -> bool {
        let key = normalize_code(code);
        self.nodes
            .values()
            .any(|n| Some(n.id) != except && n.code_key() == key)
    }

    fn next_sort_order(&self, parent_id: Option<NodeId>) -> i32 {
        self.nodes
            .values()
            .filter(|n| n.parent_id == parent_id && !n.is_deleted)
            .map(|n| n.sort_order + 1)
            .max()
            .unwrap_or(0)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        &mut self,
        parent_id: Option<NodeId>,
        name: &str,
        code: &str,
        description: Option<String>,
        color: Option<String>,
        icon: Option<String>,
        is_active: bool,
        sort_order: i32,
    ) -> Result<CategoryNode> {
        let parent_path = match parent_id {
            Some(p) => Some(
                self.live(p)
                    .ok_or(TreeError::ParentNotFound(p))?
                    .path
                    .clone(),
            ),
            None => None,
        };
        if self.code_taken(code, None) {
            return Err(TreeError::DuplicateCode(code.to_string()).into());
        }

        self.last_id += 1;
        let id = self.last_id;
        let path = compute_path(parent_path.as_deref(), id);
        let now = Utc::now().naive_utc();
        let node = CategoryNode {
            id,
            parent_id,
            name: name.to_string(),
            code: code.trim().to_string(),
            description,
            color,
            icon,
            sort_order,
            level: level_of(&path)?,
            path,
            is_active,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.nodes.insert(id, node.clone());
        Ok(node)
    }

    fn upsert(&mut self, record: Categorization) -> Result<()> {
        if record.is_primary {
            if let Some(other) = self
                .categorizations
                .values()
                .find(|c| c.item_id == record.item_id && c.is_primary && c.node_id != record.node_id)
            {
                return Err(TreeError::ItemAlreadyPrimary {
                    item_id: record.item_id,
                    node_id: other.node_id,
                }
                .into());
            }
        }
        self.categorizations.insert(record.key(), record);
        Ok(())
    }

    fn apply(&mut self, changes: TreeChangeSet) -> Result<usize> {
        let now = Utc::now().naive_utc();
        let mut touched = 0;

        for key in &changes.removed_categorizations {
            touched += usize::from(self.categorizations.remove(key).is_some());
        }
        for record in changes.upserted_categorizations {
            self.upsert(record)?;
            touched += 1;
        }
        for placement in changes.placements {
            let node = self
                .nodes
                .get_mut(&placement.node_id)
                .ok_or(TreeError::NodeNotFound(placement.node_id))?;
            node.parent_id = placement.parent_id;
            node.path = placement.path;
            node.level = placement.level;
            node.sort_order = placement.sort_order;
            node.updated_at = now;
            touched += 1;
        }
        for id in &changes.soft_deleted {
            if let Some(node) = self.nodes.get_mut(id) {
                node.is_deleted = true;
                node.deleted_at = Some(now);
                touched += 1;
            }
        }
        for id in &changes.restored {
            if let Some(node) = self.nodes.get_mut(id) {
                node.is_deleted = false;
                node.deleted_at = None;
                touched += 1;
            }
        }
        let hard: HashSet<NodeId> = changes.hard_deleted.iter().copied().collect();
        self.categorizations.retain(|k, _| !hard.contains(&k.node_id));
        for id in &hard {
            touched += usize::from(self.nodes.remove(id).is_some());
        }
        Ok(touched)
    }
}

#[derive(Default)]
pub(crate) struct InMemoryTreeStore {
    state: RwLock<StoreState>,
}

impl InMemoryTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a stored row verbatim, bypassing every rule.
    pub fn overwrite(&self, node: CategoryNode) {
        let mut state = self.state.write().unwrap();
        state.last_id = state.last_id.max(node.id);
        state.nodes.insert(node.id, node);
    }

    pub fn node(&self, id: NodeId) -> CategoryNode {
        self.state.read().unwrap().nodes[&id].clone()
    }

    pub fn all_categorizations(&self) -> Vec<Categorization> {
        self.state
            .read()
            .unwrap()
            .categorizations
            .values()
            .cloned()
            .collect()
    }

    /// Runs `f` against a copy of the state and commits only on success.
    fn transaction<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let mut state = self.state.write().unwrap();
        let mut draft = state.clone();
        let out = f(&mut draft)?;
        *state = draft;
        Ok(out)
    }
}

fn by_position(mut nodes: Vec<CategoryNode>) -> Vec<CategoryNode> {
    nodes.sort_by_key(|n| (n.level, n.sort_order, n.id));
    nodes
}

#[async_trait]
impl NodeRepositoryTrait for InMemoryTreeStore {
    fn get_node(&self, id: NodeId) -> Result<Option<CategoryNode>> {
        Ok(self.state.read().unwrap().nodes.get(&id).cloned())
    }

    fn get_nodes(&self, ids: &[NodeId]) -> Result<Vec<CategoryNode>> {
        let state = self.state.read().unwrap();
        Ok(ids.iter().filter_map(|id| state.nodes.get(id).cloned()).collect())
    }

    fn get_children(&self, parent_id: Option<NodeId>) -> Result<Vec<CategoryNode>> {
        let state = self.state.read().unwrap();
        Ok(by_position(
            state
                .nodes
                .values()
                .filter(|n| n.parent_id == parent_id && !n.is_deleted)
                .cloned()
                .collect(),
        ))
    }

    fn get_subtree(&self, path: &str) -> Result<Vec<CategoryNode>> {
        let state = self.state.read().unwrap();
        Ok(by_position(
            state
                .nodes
                .values()
                .filter(|n| n.path.starts_with(path))
                .cloned()
                .collect(),
        ))
    }

    fn get_all_nodes(&self) -> Result<Vec<CategoryNode>> {
        Ok(self.state.read().unwrap().nodes.values().cloned().collect())
    }

    fn find_by_code(&self, code: &str) -> Result<Option<CategoryNode>> {
        let key = normalize_code(code);
        Ok(self
            .state
            .read()
            .unwrap()
            .nodes
            .values()
            .find(|n| n.code_key() == key)
            .cloned())
    }

    fn find_codes_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = normalize_code(prefix);
        Ok(self
            .state
            .read()
            .unwrap()
            .nodes
            .values()
            .map(|n| n.code_key())
            .filter(|k| k.starts_with(&prefix))
            .collect())
    }

    async fn create_node(&self, node: NewCategoryNode) -> Result<CategoryNode> {
        self.transaction(|state| {
            let sort_order = state.next_sort_order(node.parent_id);
            state.insert(
                node.parent_id,
                &node.name,
                &node.code,
                node.description.clone(),
                node.color.clone(),
                node.icon.clone(),
                node.is_active,
                sort_order,
            )
        })
    }

    async fn update_node(&self, id: NodeId, patch: CategoryNodePatch) -> Result<CategoryNode> {
        self.transaction(|state| {
            if let Some(code) = &patch.code {
                if state.code_taken(code, Some(id)) {
                    return Err(TreeError::DuplicateCode(code.clone()).into());
                }
            }
            let node = state
                .nodes
                .get_mut(&id)
                .ok_or(TreeError::NodeNotFound(id))?;
            let clear = |v: String| if v.is_empty() { None } else { Some(v) };
            if let Some(name) = patch.name {
                node.name = name;
            }
            if let Some(code) = patch.code {
                node.code = code.trim().to_string();
            }
            if let Some(description) = patch.description {
                node.description = clear(description);
            }
            if let Some(color) = patch.color {
                node.color = clear(color);
            }
            if let Some(icon) = patch.icon {
                node.icon = clear(icon);
            }
            if let Some(is_active) = patch.is_active {
                node.is_active = is_active;
            }
            node.updated_at = Utc::now().naive_utc();
            Ok(node.clone())
        })
    }

    async fn insert_subtree(&self, plan: SubtreeInsertPlan) -> Result<Vec<NodeId>> {
        self.transaction(|state| {
            let mut ids: Vec<NodeId> = Vec::with_capacity(plan.nodes.len());
            for planned in &plan.nodes {
                let parent_id = match planned.parent {
                    PlannedParent::Existing(parent) => parent,
                    PlannedParent::Planned(index) => Some(ids[index]),
                };
                let node = state.insert(
                    parent_id,
                    &planned.name,
                    &planned.code,
                    planned.description.clone(),
                    planned.color.clone(),
                    planned.icon.clone(),
                    planned.is_active,
                    planned.sort_order,
                )?;
                ids.push(node.id);
            }
            let now = Utc::now().naive_utc();
            for planned in &plan.categorizations {
                state.upsert(Categorization {
                    item_id: planned.item_id,
                    node_id: ids[planned.node_index],
                    is_primary: false,
                    weight: planned.weight,
                    confidence: planned.confidence,
                    assigned_by: planned.assigned_by.clone(),
                    assigned_at: now,
                    note: planned.note.clone(),
                })?;
            }
            Ok(ids)
        })
    }

    async fn apply_changes(&self, changes: TreeChangeSet) -> Result<usize> {
        self.transaction(|state| state.apply(changes))
    }
}

#[async_trait]
impl CategorizationRepositoryTrait for InMemoryTreeStore {
    fn get_item_categorizations(&self, item_id: ItemId) -> Result<Vec<Categorization>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .categorizations
            .values()
            .filter(|c| c.item_id == item_id)
            .cloned()
            .collect())
    }

    fn get_node_categorizations(&self, node_ids: &[NodeId]) -> Result<Vec<Categorization>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .categorizations
            .values()
            .filter(|c| node_ids.contains(&c.node_id))
            .cloned()
            .collect())
    }

    async fn upsert_categorization(
        &self,
        categorization: NewCategorization,
        policy: PrimaryConflictPolicy,
    ) -> Result<Categorization> {
        self.transaction(|state| {
            if state.live(categorization.node_id).is_none() {
                return Err(TreeError::NodeNotFound(categorization.node_id).into());
            }
            if categorization.is_primary && policy == PrimaryConflictPolicy::Demote {
                for other in state.categorizations.values_mut() {
                    if other.item_id == categorization.item_id
                        && other.node_id != categorization.node_id
                    {
                        other.is_primary = false;
                    }
                }
            }
            let record = Categorization {
                item_id: categorization.item_id,
                node_id: categorization.node_id,
                is_primary: categorization.is_primary,
                weight: categorization.weight,
                confidence: categorization.confidence,
                assigned_by: categorization.assigned_by.clone(),
                assigned_at: Utc::now().naive_utc(),
                note: categorization.note.clone(),
            };
            state.upsert(record.clone())?;
            Ok(record)
        })
    }

    async fn delete_categorization(&self, key: CategorizationKey) -> Result<usize> {
        self.transaction(|state| Ok(usize::from(state.categorizations.remove(&key).is_some())))
    }
}
