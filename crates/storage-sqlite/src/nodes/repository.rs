//! Repository implementation for category nodes.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::SqliteConnection;

use qtree_core::errors::TreeError;
use qtree_core::tree::{
    compute_path, level_of, normalize_code, CategoryNode, CategoryNodePatch, NewCategoryNode,
    NodeId, NodeRepositoryTrait, PlannedParent, SubtreeInsertPlan, TreeChangeSet,
};
use qtree_core::Result;

use super::model::{CategoryNodeChangesetDB, CategoryNodeDB, NewCategoryNodeDB};
use crate::categorizations::{upsert_record, CategorizationDB};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{category_nodes, item_categorizations};

/// SQLite caps bound parameters per statement.
const ID_CHUNK: usize = 500;

/// `LIKE` pattern matching everything that starts with `prefix`.
pub(crate) fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn find_row(conn: &mut SqliteConnection, id: NodeId) -> Result<Option<CategoryNodeDB>> {
    Ok(category_nodes::table
        .find(id)
        .first::<CategoryNodeDB>(conn)
        .optional()
        .map_err(StorageError::from)?)
}

/// Path of a live parent, or `ParentNotFound`.
fn live_parent_path(conn: &mut SqliteConnection, parent_id: NodeId) -> Result<String> {
    match find_row(conn, parent_id)? {
        Some(parent) if !parent.is_deleted => Ok(parent.path),
        _ => Err(TreeError::ParentNotFound(parent_id).into()),
    }
}

fn code_taken(conn: &mut SqliteConnection, code: &str, except: Option<NodeId>) -> Result<bool> {
    let mut query = category_nodes::table
        .select(category_nodes::id)
        .filter(category_nodes::code_key.eq(normalize_code(code)))
        .into_boxed();
    if let Some(id) = except {
        query = query.filter(category_nodes::id.ne(id));
    }
    let hit = query
        .first::<NodeId>(conn)
        .optional()
        .map_err(StorageError::from)?;
    Ok(hit.is_some())
}

fn next_sort_order(conn: &mut SqliteConnection, parent_id: Option<NodeId>) -> Result<i32> {
    let mut query = category_nodes::table
        .select(max(category_nodes::sort_order))
        .filter(category_nodes::is_deleted.eq(false))
        .into_boxed();
    query = match parent_id {
        Some(p) => query.filter(category_nodes::parent_id.eq(p)),
        None => query.filter(category_nodes::parent_id.is_null()),
    };
    let current: Option<i32> = query.first(conn).map_err(StorageError::from)?;
    Ok(current.map_or(0, |m| m + 1))
}

/// Inserts `row` and stamps the path and level derived from its new id.
fn insert_row(
    conn: &mut SqliteConnection,
    row: NewCategoryNodeDB,
    parent_path: Option<&str>,
) -> Result<CategoryNodeDB> {
    if code_taken(conn, &row.code, None)? {
        return Err(TreeError::DuplicateCode(row.code).into());
    }
    let inserted = diesel::insert_into(category_nodes::table)
        .values(&row)
        .returning(CategoryNodeDB::as_returning())
        .get_result(conn)
        .map_err(StorageError::from)?;

    let path = compute_path(parent_path, inserted.id);
    let level = level_of(&path)?;
    Ok(diesel::update(category_nodes::table.find(inserted.id))
        .set((
            category_nodes::path.eq(&path),
            category_nodes::level.eq(level),
        ))
        .returning(CategoryNodeDB::as_returning())
        .get_result(conn)
        .map_err(StorageError::from)?)
}

fn apply_change_set(conn: &mut SqliteConnection, changes: TreeChangeSet) -> Result<usize> {
    let now = chrono::Utc::now().naive_utc();
    let mut touched = 0;

    for key in &changes.removed_categorizations {
        touched += diesel::delete(item_categorizations::table.find((key.item_id, key.node_id)))
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    for record in changes.upserted_categorizations {
        touched += upsert_record(conn, &CategorizationDB::from(record))?;
    }

    for placement in changes.placements {
        let updated = diesel::update(category_nodes::table.find(placement.node_id))
            .set((
                category_nodes::parent_id.eq(placement.parent_id),
                category_nodes::path.eq(placement.path),
                category_nodes::level.eq(placement.level),
                category_nodes::sort_order.eq(placement.sort_order),
                category_nodes::updated_at.eq(now),
            ))
            .execute(conn)
            .map_err(StorageError::from)?;
        if updated == 0 {
            return Err(TreeError::NodeNotFound(placement.node_id).into());
        }
        touched += updated;
    }

    for chunk in changes.soft_deleted.chunks(ID_CHUNK) {
        touched += diesel::update(category_nodes::table.filter(category_nodes::id.eq_any(chunk)))
            .set((
                category_nodes::is_deleted.eq(true),
                category_nodes::deleted_at.eq(Some(now)),
                category_nodes::updated_at.eq(now),
            ))
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    for chunk in changes.restored.chunks(ID_CHUNK) {
        touched += diesel::update(category_nodes::table.filter(category_nodes::id.eq_any(chunk)))
            .set((
                category_nodes::is_deleted.eq(false),
                category_nodes::deleted_at.eq(None::<chrono::NaiveDateTime>),
                category_nodes::updated_at.eq(now),
            ))
            .execute(conn)
            .map_err(StorageError::from)?;
    }

    for chunk in changes.hard_deleted.chunks(ID_CHUNK) {
        diesel::delete(
            item_categorizations::table.filter(item_categorizations::node_id.eq_any(chunk)),
        )
        .execute(conn)
        .map_err(StorageError::from)?;
        touched += diesel::delete(category_nodes::table.filter(category_nodes::id.eq_any(chunk)))
            .execute(conn)
            .map_err(StorageError::from)?;
    }

    Ok(touched)
}

pub struct NodeRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl NodeRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    fn load(
        &self,
        query: category_nodes::BoxedQuery<'_, diesel::sqlite::Sqlite>,
    ) -> Result<Vec<CategoryNode>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = query
            .load::<CategoryNodeDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(CategoryNode::from).collect())
    }
}

#[async_trait]
impl NodeRepositoryTrait for NodeRepository {
    fn get_node(&self, id: NodeId) -> Result<Option<CategoryNode>> {
        let mut conn = get_connection(&self.pool)?;
        Ok(find_row(&mut conn, id)?.map(CategoryNode::from))
    }

    fn get_nodes(&self, ids: &[NodeId]) -> Result<Vec<CategoryNode>> {
        let mut nodes = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            nodes.extend(self.load(
                category_nodes::table
                    .filter(category_nodes::id.eq_any(chunk))
                    .into_boxed(),
            )?);
        }
        Ok(nodes)
    }

    fn get_children(&self, parent_id: Option<NodeId>) -> Result<Vec<CategoryNode>> {
        let mut query = category_nodes::table
            .filter(category_nodes::is_deleted.eq(false))
            .order((category_nodes::sort_order.asc(), category_nodes::id.asc()))
            .into_boxed();
        query = match parent_id {
            Some(p) => query.filter(category_nodes::parent_id.eq(p)),
            None => query.filter(category_nodes::parent_id.is_null()),
        };
        self.load(query)
    }

    fn get_subtree(&self, path: &str) -> Result<Vec<CategoryNode>> {
        self.load(
            category_nodes::table
                .filter(category_nodes::path.like(like_prefix(path)).escape('\\'))
                .order((
                    category_nodes::level.asc(),
                    category_nodes::sort_order.asc(),
                    category_nodes::id.asc(),
                ))
                .into_boxed(),
        )
    }

    fn get_all_nodes(&self) -> Result<Vec<CategoryNode>> {
        self.load(
            category_nodes::table
                .order((
                    category_nodes::level.asc(),
                    category_nodes::sort_order.asc(),
                    category_nodes::id.asc(),
                ))
                .into_boxed(),
        )
    }

    fn find_by_code(&self, code: &str) -> Result<Option<CategoryNode>> {
        let mut conn = get_connection(&self.pool)?;
        let row = category_nodes::table
            .filter(category_nodes::code_key.eq(normalize_code(code)))
            .first::<CategoryNodeDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row.map(CategoryNode::from))
    }

    fn find_codes_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;
        Ok(category_nodes::table
            .select(category_nodes::code_key)
            .filter(
                category_nodes::code_key
                    .like(like_prefix(&normalize_code(prefix)))
                    .escape('\\'),
            )
            .load::<String>(&mut conn)
            .map_err(StorageError::from)?)
    }

    async fn create_node(&self, node: NewCategoryNode) -> Result<CategoryNode> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<CategoryNode> {
                let parent_path = match node.parent_id {
                    Some(p) => Some(live_parent_path(conn, p)?),
                    None => None,
                };
                let sort_order = next_sort_order(conn, node.parent_id)?;
                let row = NewCategoryNodeDB::new(
                    node.parent_id,
                    node.name,
                    &node.code,
                    node.description,
                    node.color,
                    node.icon,
                    node.is_active,
                    sort_order,
                );
                Ok(insert_row(conn, row, parent_path.as_deref())?.into())
            })
            .await
    }

    async fn update_node(&self, id: NodeId, patch: CategoryNodePatch) -> Result<CategoryNode> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<CategoryNode> {
                if find_row(conn, id)?.is_none() {
                    return Err(TreeError::NodeNotFound(id).into());
                }
                if let Some(code) = &patch.code {
                    if code_taken(conn, code, Some(id))? {
                        return Err(TreeError::DuplicateCode(code.clone()).into());
                    }
                }
                let changes = CategoryNodeChangesetDB::from(patch);
                let updated = diesel::update(category_nodes::table.find(id))
                    .set(&changes)
                    .returning(CategoryNodeDB::as_returning())
                    .get_result(conn)
                    .map_err(StorageError::from)?;
                Ok(updated.into())
            })
            .await
    }

    async fn insert_subtree(&self, plan: SubtreeInsertPlan) -> Result<Vec<NodeId>> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Vec<NodeId>> {
                let mut inserted: Vec<(NodeId, String)> = Vec::with_capacity(plan.nodes.len());
                for planned in plan.nodes {
                    let (parent_id, parent_path) = match planned.parent {
                        PlannedParent::Existing(None) => (None, None),
                        PlannedParent::Existing(Some(p)) => (Some(p), Some(live_parent_path(conn, p)?)),
                        PlannedParent::Planned(index) => {
                            let (id, path) = inserted.get(index).cloned().ok_or_else(|| {
                                qtree_core::Error::Unexpected(format!(
                                    "planned parent {} is not inserted yet",
                                    index
                                ))
                            })?;
                            (Some(id), Some(path))
                        }
                    };
                    let row = NewCategoryNodeDB::new(
                        parent_id,
                        planned.name,
                        &planned.code,
                        planned.description,
                        planned.color,
                        planned.icon,
                        planned.is_active,
                        planned.sort_order,
                    );
                    let node = insert_row(conn, row, parent_path.as_deref())?;
                    inserted.push((node.id, node.path));
                }

                let now = chrono::Utc::now().naive_utc();
                for planned in plan.categorizations {
                    let node_id = inserted
                        .get(planned.node_index)
                        .map(|(id, _)| *id)
                        .ok_or_else(|| {
                            qtree_core::Error::Unexpected(format!(
                                "categorization targets unknown planned node {}",
                                planned.node_index
                            ))
                        })?;
                    upsert_record(
                        conn,
                        &CategorizationDB {
                            item_id: planned.item_id,
                            node_id,
                            is_primary: false,
                            weight: planned.weight,
                            confidence: planned.confidence,
                            assigned_by: planned.assigned_by,
                            assigned_at: now,
                            note: planned.note,
                        },
                    )?;
                }
                Ok(inserted.into_iter().map(|(id, _)| id).collect())
            })
            .await
    }

    async fn apply_changes(&self, changes: TreeChangeSet) -> Result<usize> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                apply_change_set(conn, changes)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("-1-2-"), "-1-2-%");
        assert_eq!(like_prefix("a_b%"), "a\\_b\\%%");
    }
}
