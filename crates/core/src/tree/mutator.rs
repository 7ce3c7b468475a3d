//! Pure planning for structural mutations.
//!
//! Each `plan_*` function takes the rows an operation touches, checks every
//! structural rule, and returns the writes as a `TreeChangeSet` (or a
//! `SubtreeInsertPlan` for copies). Nothing here performs I/O, so a rejected
//! operation never reaches the store.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::categorization::{Categorization, CategorizationKey};
use crate::config::DeleteCategorizationPolicy;
use crate::errors::TreeError;

use super::path_codec::{compute_path, level_of, rebase_path, MaterializedPath};
use super::validator::{path_from_ids, walk_to_root, Chain};
use super::{
    normalize_code, CategoryNode, ChildHandlingStrategy, ItemId, NodeId, NodePlacement,
    PlannedCategorization, PlannedNode, PlannedParent, SubtreeInsertPlan, TreeChangeSet,
};

/// Siblings in display order: sort order, then id.
pub(crate) fn sorted_by_position<'a, I>(nodes: I) -> Vec<&'a CategoryNode>
where
    I: IntoIterator<Item = &'a CategoryNode>,
{
    let mut sorted: Vec<&CategoryNode> = nodes.into_iter().collect();
    sorted.sort_by_key(|n| (n.sort_order, n.id));
    sorted
}

fn clamp_position(position: i32, len: usize) -> usize {
    (position.max(0) as usize).min(len)
}

pub(crate) fn check_cap(affected: usize, cap: usize) -> Result<(), TreeError> {
    if affected > cap {
        return Err(TreeError::SubtreeTooLarge { affected, cap });
    }
    Ok(())
}

fn depth_warning(deepest: i32, max_depth: i32) -> Option<String> {
    (deepest > max_depth).then(|| {
        format!(
            "Subtree now reaches depth {}, beyond the configured maximum of {}",
            deepest, max_depth
        )
    })
}

/// Accumulates structural coordinates and emits only the rows that changed.
struct PlacementSet<'a> {
    entries: BTreeMap<NodeId, (&'a CategoryNode, NodePlacement)>,
}

impl<'a> PlacementSet<'a> {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    fn entry(&mut self, node: &'a CategoryNode) -> &mut NodePlacement {
        &mut self
            .entries
            .entry(node.id)
            .or_insert_with(|| {
                (
                    node,
                    NodePlacement {
                        node_id: node.id,
                        parent_id: node.parent_id,
                        path: node.path.clone(),
                        level: node.level,
                        sort_order: node.sort_order,
                    },
                )
            })
            .1
    }

    fn relocate(
        &mut self,
        node: &'a CategoryNode,
        parent_id: Option<NodeId>,
        path: String,
    ) -> Result<i32, TreeError> {
        let level = level_of(&path)?;
        let placement = self.entry(node);
        placement.parent_id = parent_id;
        placement.path = path;
        placement.level = level;
        Ok(level)
    }

    /// Rewrites every row under `root` (root included) onto `new_root_path`.
    /// Returns the deepest resulting level among live rows.
    fn rebase_subtree(
        &mut self,
        rows: &'a [CategoryNode],
        root: &CategoryNode,
        new_parent_id: Option<NodeId>,
        new_root_path: &str,
    ) -> Result<i32, TreeError> {
        let mut deepest = 0;
        for row in rows.iter().filter(|r| r.path.starts_with(&root.path)) {
            let path = rebase_path(&row.path, &root.path, new_root_path)?;
            let parent_id = if row.id == root.id {
                new_parent_id
            } else {
                row.parent_id
            };
            let level = self.relocate(row, parent_id, path)?;
            if !row.is_deleted {
                deepest = deepest.max(level);
            }
        }
        Ok(deepest)
    }

    fn resequence(&mut self, ordered: &[&'a CategoryNode]) {
        for (position, node) in ordered.iter().enumerate() {
            self.entry(node).sort_order = position as i32;
        }
    }

    fn into_placements(self) -> Vec<NodePlacement> {
        self.entries
            .into_values()
            .filter(|(node, p)| {
                node.parent_id != p.parent_id
                    || node.path != p.path
                    || node.level != p.level
                    || node.sort_order != p.sort_order
            })
            .map(|(_, p)| p)
            .collect()
    }
}

// --- Move --------------------------------------------------------------------

pub(crate) struct MoveInput<'a> {
    pub node: &'a CategoryNode,
    /// Every row under the node's path, the node included.
    pub subtree: &'a [CategoryNode],
    pub new_parent: Option<&'a CategoryNode>,
    /// Live children of the node's current parent.
    pub old_siblings: &'a [CategoryNode],
    /// Live children of the destination parent.
    pub new_siblings: &'a [CategoryNode],
    pub new_sort_order: Option<i32>,
    pub cap: usize,
    pub max_depth: i32,
}

#[derive(Debug)]
pub(crate) struct MovePlan {
    pub changes: TreeChangeSet,
    pub new_path: String,
    pub affected: usize,
    pub warnings: Vec<String>,
}

/// Rejects a destination that is the node itself or one of its descendants.
pub(crate) fn check_no_cycle(
    node: &CategoryNode,
    new_parent: Option<&CategoryNode>,
) -> Result<(), TreeError> {
    if let Some(parent) = new_parent {
        if parent.id == node.id || MaterializedPath::parse(&parent.path)?.contains(node.id) {
            return Err(TreeError::CycleDetected {
                node_id: node.id,
                new_parent_id: parent.id,
            });
        }
    }
    Ok(())
}

pub(crate) fn plan_move(input: MoveInput<'_>) -> Result<MovePlan, TreeError> {
    let MoveInput {
        node,
        subtree,
        new_parent,
        old_siblings,
        new_siblings,
        new_sort_order,
        cap,
        max_depth,
    } = input;

    check_no_cycle(node, new_parent)?;
    check_cap(subtree.len(), cap)?;

    let new_parent_id = new_parent.map(|p| p.id);
    let new_path = compute_path(new_parent.map(|p| p.path.as_str()), node.id);

    let mut set = PlacementSet::new();
    let deepest = set.rebase_subtree(subtree, node, new_parent_id, &new_path)?;

    let moved = subtree.iter().find(|r| r.id == node.id).unwrap_or(node);
    let old_order = sorted_by_position(old_siblings);
    let mut remaining: Vec<&CategoryNode> =
        old_order.iter().copied().filter(|n| n.id != node.id).collect();

    if node.parent_id == new_parent_id {
        let current = old_order
            .iter()
            .position(|n| n.id == node.id)
            .unwrap_or(remaining.len());
        let index = new_sort_order
            .map(|p| clamp_position(p, remaining.len()))
            .unwrap_or(current.min(remaining.len()));
        remaining.insert(index, moved);
        set.resequence(&remaining);
    } else {
        set.resequence(&remaining);
        let mut destination: Vec<&CategoryNode> = sorted_by_position(new_siblings)
            .into_iter()
            .filter(|n| n.id != node.id)
            .collect();
        let index = new_sort_order
            .map(|p| clamp_position(p, destination.len()))
            .unwrap_or(destination.len());
        destination.insert(index, moved);
        set.resequence(&destination);
    }

    Ok(MovePlan {
        changes: TreeChangeSet {
            placements: set.into_placements(),
            ..Default::default()
        },
        new_path,
        affected: subtree.len(),
        warnings: depth_warning(deepest, max_depth).into_iter().collect(),
    })
}

// --- Reorder -----------------------------------------------------------------

pub(crate) fn plan_reorder(
    parent_label: &str,
    children: &[CategoryNode],
    ordered_ids: &[NodeId],
) -> Result<TreeChangeSet, TreeError> {
    let mismatch = |reason: String| TreeError::ReorderSetMismatch {
        parent: parent_label.to_string(),
        reason,
    };

    let by_id: HashMap<NodeId, &CategoryNode> = children.iter().map(|c| (c.id, c)).collect();
    let mut seen = HashSet::with_capacity(ordered_ids.len());
    for id in ordered_ids {
        if !seen.insert(*id) {
            return Err(mismatch(format!("node {} listed more than once", id)));
        }
        if !by_id.contains_key(id) {
            return Err(mismatch(format!("node {} is not a current child", id)));
        }
    }
    if let Some(missing) = sorted_by_position(children)
        .into_iter()
        .find(|c| !seen.contains(&c.id))
    {
        return Err(mismatch(format!("node {} is missing", missing.id)));
    }

    let ordered: Vec<&CategoryNode> = ordered_ids
        .iter()
        .filter_map(|id| by_id.get(id).copied())
        .collect();
    let mut set = PlacementSet::new();
    set.resequence(&ordered);

    Ok(TreeChangeSet {
        placements: set.into_placements(),
        ..Default::default()
    })
}

// --- Delete ------------------------------------------------------------------

pub(crate) struct DeleteInput<'a> {
    pub node: &'a CategoryNode,
    /// Every row under the node's path, the node included.
    pub subtree: &'a [CategoryNode],
    /// The node's parent when it exists and is live.
    pub parent: Option<&'a CategoryNode>,
    /// Live children of the node's parent (live roots for a root node).
    pub siblings: &'a [CategoryNode],
    /// Live roots.
    pub roots: &'a [CategoryNode],
    /// Categorizations pointing at any subtree row.
    pub records: &'a [Categorization],
    /// Categorizations already pointing at `parent`.
    pub parent_records: &'a [Categorization],
    pub strategy: ChildHandlingStrategy,
    pub hard: bool,
    pub policy: DeleteCategorizationPolicy,
    pub cap: usize,
}

#[derive(Debug, Default)]
pub(crate) struct DeletePlan {
    pub changes: TreeChangeSet,
    pub nodes_deleted: usize,
    pub children_reassigned: usize,
    pub items_reassigned: usize,
    pub items_removed: usize,
    pub warnings: Vec<String>,
}

pub(crate) fn plan_delete(input: DeleteInput<'_>) -> Result<DeletePlan, TreeError> {
    let node = input.node;
    let children = sorted_by_position(
        input
            .subtree
            .iter()
            .filter(|r| r.parent_id == Some(node.id) && !r.is_deleted),
    );

    let reassigning = matches!(
        input.strategy,
        ChildHandlingStrategy::ReassignToParent | ChildHandlingStrategy::ReassignToRoot
    );
    if input.strategy == ChildHandlingStrategy::PreventDeletion && !children.is_empty() {
        return Err(TreeError::HasChildren {
            node_id: node.id,
            child_count: children.len(),
        });
    }

    // Rows that survive: live children and everything below them.
    let carried: HashSet<NodeId> = if reassigning {
        input
            .subtree
            .iter()
            .filter(|r| children.iter().any(|c| r.path.starts_with(&c.path)))
            .map(|r| r.id)
            .collect()
    } else {
        HashSet::new()
    };
    let removed: Vec<&CategoryNode> = input
        .subtree
        .iter()
        .filter(|r| !carried.contains(&r.id))
        .collect();

    check_cap(removed.len() + carried.len(), input.cap)?;

    let mut plan = DeletePlan::default();
    let mut set = PlacementSet::new();
    let siblings = sorted_by_position(input.siblings);
    let slot = siblings.iter().position(|n| n.id == node.id);
    let mut remaining: Vec<&CategoryNode> =
        siblings.iter().copied().filter(|n| n.id != node.id).collect();

    let in_place = input.strategy == ChildHandlingStrategy::ReassignToParent
        && (input.parent.is_some() || node.is_root());

    if reassigning && !children.is_empty() {
        let new_parent = if in_place { input.parent } else { None };
        for child in &children {
            let path = compute_path(new_parent.map(|p| p.path.as_str()), child.id);
            set.rebase_subtree(input.subtree, child, new_parent.map(|p| p.id), &path)?;
        }

        if in_place {
            let index = slot.unwrap_or(remaining.len());
            let tail = remaining.split_off(index);
            remaining.extend(children.iter().copied());
            remaining.extend(tail);
            set.resequence(&remaining);
        } else {
            if input.strategy == ChildHandlingStrategy::ReassignToParent {
                plan.warnings.push(format!(
                    "Node {} has no live parent; its children were moved to the root level",
                    node.id
                ));
            }
            if !node.is_root() {
                set.resequence(&remaining);
            }
            let mut roots: Vec<&CategoryNode> = sorted_by_position(input.roots)
                .into_iter()
                .filter(|n| n.id != node.id)
                .collect();
            roots.extend(children.iter().copied());
            set.resequence(&roots);
        }
        plan.children_reassigned = children.len();
    } else {
        set.resequence(&remaining);
    }

    let removed_ids: HashSet<NodeId> = removed.iter().map(|r| r.id).collect();
    if input.hard {
        plan.changes.hard_deleted = removed.iter().map(|r| r.id).collect();
        plan.nodes_deleted = removed.len();
    } else {
        plan.changes.soft_deleted = removed
            .iter()
            .filter(|r| !r.is_deleted)
            .map(|r| r.id)
            .collect();
        plan.nodes_deleted = plan.changes.soft_deleted.len();
    }

    let reconciled = reconcile_categorizations(
        input
            .records
            .iter()
            .filter(|c| removed_ids.contains(&c.node_id)),
        input.parent,
        input.parent_records,
        input.policy,
    );
    plan.items_reassigned = reconciled.items_reassigned;
    plan.items_removed = reconciled.items_removed;
    if reconciled.lost_primary > 0 {
        plan.warnings.push(format!(
            "{} items lost primary categorization and require reassignment",
            reconciled.lost_primary
        ));
    }
    plan.changes.removed_categorizations = reconciled.removed;
    plan.changes.upserted_categorizations = reconciled.upserted;
    plan.changes.placements = set.into_placements();

    Ok(plan)
}

#[derive(Debug, Default)]
struct Reconciled {
    removed: Vec<CategorizationKey>,
    upserted: Vec<Categorization>,
    items_reassigned: usize,
    items_removed: usize,
    lost_primary: usize,
}

/// Moves records off deleted nodes onto the surviving parent, merging per item
/// (a primary record stays primary), or drops them.
fn reconcile_categorizations<'a, I>(
    records: I,
    target: Option<&CategoryNode>,
    target_records: &[Categorization],
    policy: DeleteCategorizationPolicy,
) -> Reconciled
where
    I: Iterator<Item = &'a Categorization>,
{
    let mut by_item: BTreeMap<ItemId, Vec<&Categorization>> = BTreeMap::new();
    for record in records {
        by_item.entry(record.item_id).or_default().push(record);
    }

    let target = match policy {
        DeleteCategorizationPolicy::ReassignToParent => target,
        DeleteCategorizationPolicy::Remove => None,
    };

    let mut out = Reconciled::default();
    for (item_id, group) in by_item {
        out.removed.extend(group.iter().map(|c| c.key()));
        let primary = group.iter().any(|c| c.is_primary);

        let Some(target) = target else {
            out.items_removed += 1;
            if primary {
                out.lost_primary += 1;
            }
            continue;
        };

        out.items_reassigned += 1;
        match target_records.iter().find(|c| c.item_id == item_id) {
            Some(existing) => {
                if primary && !existing.is_primary {
                    out.upserted.push(Categorization {
                        is_primary: true,
                        ..existing.clone()
                    });
                }
            }
            None => {
                let base = group
                    .iter()
                    .find(|c| c.is_primary)
                    .copied()
                    .unwrap_or(group[0]);
                out.upserted.push(Categorization {
                    node_id: target.id,
                    is_primary: primary,
                    ..base.clone()
                });
            }
        }
    }
    out
}

// --- Restore -----------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct RestorePlan {
    pub changes: TreeChangeSet,
    pub restored: usize,
}

/// Revives a soft-deleted node with its soft-deleted descendants and appends it
/// to the live children of `parent`.
pub(crate) fn plan_restore(
    node: &CategoryNode,
    subtree: &[CategoryNode],
    parent: Option<&CategoryNode>,
    siblings: &[CategoryNode],
) -> Result<RestorePlan, TreeError> {
    let mut set = PlacementSet::new();
    let new_path = compute_path(parent.map(|p| p.path.as_str()), node.id);
    set.rebase_subtree(subtree, node, parent.map(|p| p.id), &new_path)?;

    let restored_node = subtree.iter().find(|r| r.id == node.id).unwrap_or(node);
    let mut order: Vec<&CategoryNode> = sorted_by_position(siblings)
        .into_iter()
        .filter(|n| n.id != node.id)
        .collect();
    order.push(restored_node);
    set.resequence(&order);

    let mut groups: BTreeMap<NodeId, Vec<&CategoryNode>> = BTreeMap::new();
    for row in subtree.iter().filter(|r| r.id != node.id) {
        if let Some(parent_id) = row.parent_id {
            groups.entry(parent_id).or_default().push(row);
        }
    }
    for group in groups.into_values() {
        set.resequence(&sorted_by_position(group));
    }

    let restored: Vec<NodeId> = subtree
        .iter()
        .filter(|r| r.is_deleted)
        .map(|r| r.id)
        .collect();

    Ok(RestorePlan {
        restored: restored.len(),
        changes: TreeChangeSet {
            placements: set.into_placements(),
            restored,
            ..Default::default()
        },
    })
}

// --- Copy --------------------------------------------------------------------

pub(crate) struct CopyInput<'a> {
    pub source: &'a CategoryNode,
    /// Live rows under the source, the source included.
    pub subtree: &'a [CategoryNode],
    pub include_children: bool,
    /// Categorizations to duplicate; empty when items are not copied.
    pub records: &'a [Categorization],
    pub new_parent: Option<&'a CategoryNode>,
    pub destination_sibling_count: usize,
    /// Normalized codes already in use.
    pub taken_codes: HashSet<String>,
    pub code_suffix: &'a str,
    pub cap: usize,
    pub max_depth: i32,
}

#[derive(Debug)]
pub(crate) struct CopyPlan {
    pub plan: SubtreeInsertPlan,
    /// Source id of each planned node, in plan order.
    pub source_ids: Vec<NodeId>,
    pub warnings: Vec<String>,
}

/// Returns `base` + `suffix`, then `-2`, `-3`, ... until the code is free, and
/// marks the result as taken.
pub(crate) fn unique_code(base: &str, suffix: &str, taken: &mut HashSet<String>) -> String {
    let stem = format!("{}{}", base.trim(), suffix);
    let mut candidate = stem.clone();
    let mut attempt = 2;
    while taken.contains(&normalize_code(&candidate)) {
        candidate = format!("{}-{}", stem, attempt);
        attempt += 1;
    }
    taken.insert(normalize_code(&candidate));
    candidate
}

/// Plans a depth-first, preorder copy with children visited by position, so
/// the id mapping is reproducible.
pub(crate) fn plan_copy(input: CopyInput<'_>) -> Result<CopyPlan, TreeError> {
    let CopyInput {
        source,
        subtree,
        include_children,
        records,
        new_parent,
        destination_sibling_count,
        mut taken_codes,
        code_suffix,
        cap,
        max_depth,
    } = input;

    let mut children: HashMap<NodeId, Vec<&CategoryNode>> = HashMap::new();
    if include_children {
        for row in subtree.iter().filter(|r| !r.is_deleted && r.id != source.id) {
            if let Some(parent_id) = row.parent_id {
                children.entry(parent_id).or_default().push(row);
            }
        }
        for group in children.values_mut() {
            group.sort_by_key(|n| (n.sort_order, n.id));
        }
    }

    let base_level = new_parent.map(|p| p.level + 1).unwrap_or(0);
    let mut plan = SubtreeInsertPlan::default();
    let mut source_ids = Vec::new();
    let mut deepest = base_level;
    let mut visited = HashSet::new();

    // (node, parent in plan, position, level)
    let mut stack = vec![(
        source,
        PlannedParent::Existing(new_parent.map(|p| p.id)),
        destination_sibling_count as i32,
        base_level,
    )];
    while let Some((node, parent, sort_order, level)) = stack.pop() {
        if !visited.insert(node.id) {
            continue;
        }
        let index = plan.nodes.len();
        plan.nodes.push(PlannedNode {
            parent,
            name: node.name.clone(),
            code: unique_code(&node.code, code_suffix, &mut taken_codes),
            description: node.description.clone(),
            color: node.color.clone(),
            icon: node.icon.clone(),
            is_active: node.is_active,
            sort_order,
        });
        source_ids.push(node.id);
        deepest = deepest.max(level);

        if let Some(kids) = children.get(&node.id) {
            for (position, child) in kids.iter().enumerate().rev() {
                stack.push((*child, PlannedParent::Planned(index), position as i32, level + 1));
            }
        }
    }

    check_cap(plan.nodes.len(), cap)?;

    let index_of: HashMap<NodeId, usize> = source_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();
    let mut primaries = 0;
    for record in records {
        if let Some(&node_index) = index_of.get(&record.node_id) {
            if record.is_primary {
                primaries += 1;
            }
            plan.categorizations.push(PlannedCategorization {
                node_index,
                item_id: record.item_id,
                weight: record.weight,
                confidence: record.confidence,
                assigned_by: record.assigned_by.clone(),
                note: record.note.clone(),
            });
        }
    }

    let mut warnings: Vec<String> = depth_warning(deepest, max_depth).into_iter().collect();
    if primaries > 0 {
        warnings.push(format!(
            "{} primary categorizations were copied as secondary",
            primaries
        ));
    }

    Ok(CopyPlan {
        plan,
        source_ids,
        warnings,
    })
}

// --- Repair ------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct RepairPlan {
    pub changes: TreeChangeSet,
    pub paths_repaired: usize,
    pub orphans_reattached: usize,
    pub groups_resequenced: usize,
    pub cycles_unrepaired: usize,
}

/// Re-derives structure from parent links: orphans become roots, paths and
/// levels are recomputed, and sibling groups whose orders are not `0..n` are
/// resequenced. Nodes caught in a cycle are left untouched.
pub(crate) fn plan_repair(nodes: &[CategoryNode]) -> RepairPlan {
    let by_id: HashMap<NodeId, &CategoryNode> = nodes.iter().map(|n| (n.id, n)).collect();

    let parents: HashMap<NodeId, Option<NodeId>> = nodes
        .iter()
        .map(|n| {
            let parent = n.parent_id.filter(|p| match by_id.get(p) {
                None => false,
                Some(parent) => n.is_deleted || !parent.is_deleted,
            });
            (n.id, parent)
        })
        .collect();

    let mut plan = RepairPlan::default();
    let mut set = PlacementSet::new();
    let mut cyclic = HashSet::new();

    for node in nodes {
        let chain = match walk_to_root(node.id, &parents) {
            Chain::Rooted(ids) | Chain::Detached(ids) => ids,
            Chain::Circular => {
                cyclic.insert(node.id);
                continue;
            }
        };
        let parent_id = parents.get(&node.id).copied().flatten();
        let path = path_from_ids(&chain);

        if parent_id != node.parent_id && parent_id.is_none() {
            plan.orphans_reattached += 1;
        }
        if path != node.path || (chain.len() as i32 - 1) != node.level {
            plan.paths_repaired += 1;
        }
        let placement = set.entry(node);
        placement.parent_id = parent_id;
        placement.level = chain.len() as i32 - 1;
        placement.path = path;
    }
    plan.cycles_unrepaired = cyclic.len();

    let mut groups: BTreeMap<Option<NodeId>, Vec<&CategoryNode>> = BTreeMap::new();
    for node in nodes
        .iter()
        .filter(|n| !n.is_deleted && !cyclic.contains(&n.id))
    {
        let parent = parents.get(&node.id).copied().flatten();
        groups.entry(parent).or_default().push(node);
    }
    for group in groups.into_values() {
        let ordered = sorted_by_position(group);
        let dense = ordered
            .iter()
            .enumerate()
            .all(|(i, n)| n.sort_order == i as i32);
        if !dense {
            plan.groups_resequenced += 1;
            set.resequence(&ordered);
        }
    }

    plan.changes.placements = set.into_placements();
    plan
}
