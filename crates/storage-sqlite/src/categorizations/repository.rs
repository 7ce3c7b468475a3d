//! Repository implementation for item categorizations.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::SqliteConnection;

use qtree_core::categorization::{
    Categorization, CategorizationKey, CategorizationRepositoryTrait, NewCategorization,
};
use qtree_core::config::PrimaryConflictPolicy;
use qtree_core::errors::TreeError;
use qtree_core::tree::{ItemId, NodeId};
use qtree_core::Result;

use super::model::CategorizationDB;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{category_nodes, item_categorizations};

const ID_CHUNK: usize = 500;

/// Inserts the record or overwrites the existing `(item, node)` row.
pub(crate) fn upsert_record(conn: &mut SqliteConnection, record: &CategorizationDB) -> Result<usize> {
    Ok(diesel::insert_into(item_categorizations::table)
        .values(record)
        .on_conflict((item_categorizations::item_id, item_categorizations::node_id))
        .do_update()
        .set(record)
        .execute(conn)
        .map_err(StorageError::from)?)
}

pub struct CategorizationRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl CategorizationRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl CategorizationRepositoryTrait for CategorizationRepository {
    fn get_item_categorizations(&self, item_id: ItemId) -> Result<Vec<Categorization>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = item_categorizations::table
            .filter(item_categorizations::item_id.eq(item_id))
            .order(item_categorizations::node_id.asc())
            .load::<CategorizationDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(Categorization::from).collect())
    }

    fn get_node_categorizations(&self, node_ids: &[NodeId]) -> Result<Vec<Categorization>> {
        let mut conn = get_connection(&self.pool)?;
        let mut records = Vec::new();
        for chunk in node_ids.chunks(ID_CHUNK) {
            let rows = item_categorizations::table
                .filter(item_categorizations::node_id.eq_any(chunk))
                .order((
                    item_categorizations::item_id.asc(),
                    item_categorizations::node_id.asc(),
                ))
                .load::<CategorizationDB>(&mut conn)
                .map_err(StorageError::from)?;
            records.extend(rows.into_iter().map(Categorization::from));
        }
        Ok(records)
    }

    async fn upsert_categorization(
        &self,
        categorization: NewCategorization,
        policy: PrimaryConflictPolicy,
    ) -> Result<Categorization> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Categorization> {
                let node_live = category_nodes::table
                    .find(categorization.node_id)
                    .select(category_nodes::is_deleted)
                    .first::<bool>(conn)
                    .optional()
                    .map_err(StorageError::from)?
                    .is_some_and(|deleted| !deleted);
                if !node_live {
                    return Err(TreeError::NodeNotFound(categorization.node_id).into());
                }

                if categorization.is_primary {
                    let others = item_categorizations::table
                        .filter(item_categorizations::item_id.eq(categorization.item_id))
                        .filter(item_categorizations::node_id.ne(categorization.node_id))
                        .filter(item_categorizations::is_primary.eq(true));
                    match policy {
                        PrimaryConflictPolicy::Demote => {
                            diesel::update(others)
                                .set(item_categorizations::is_primary.eq(false))
                                .execute(conn)
                                .map_err(StorageError::from)?;
                        }
                        PrimaryConflictPolicy::Reject => {
                            let existing = others
                                .select(item_categorizations::node_id)
                                .first::<NodeId>(conn)
                                .optional()
                                .map_err(StorageError::from)?;
                            if let Some(node_id) = existing {
                                return Err(TreeError::ItemAlreadyPrimary {
                                    item_id: categorization.item_id,
                                    node_id,
                                }
                                .into());
                            }
                        }
                    }
                }

                let record = CategorizationDB::from(categorization);
                upsert_record(conn, &record)?;
                Ok(record.into())
            })
            .await
    }

    async fn delete_categorization(&self, key: CategorizationKey) -> Result<usize> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                Ok(diesel::delete(
                    item_categorizations::table.find((key.item_id, key.node_id)),
                )
                .execute(conn)
                .map_err(StorageError::from)?)
            })
            .await
    }
}
