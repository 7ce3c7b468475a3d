//! Database model for item categorizations.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use qtree_core::categorization::{Categorization, NewCategorization};

#[derive(
    Insertable,
    Queryable,
    Identifiable,
    AsChangeset,
    Selectable,
    PartialEq,
    Serialize,
    Deserialize,
    Debug,
    Clone,
)]
#[diesel(table_name = crate::schema::item_categorizations)]
#[diesel(primary_key(item_id, node_id))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct CategorizationDB {
    pub item_id: i64,
    pub node_id: i64,
    pub is_primary: bool,
    pub weight: Option<f64>,
    pub confidence: Option<f64>,
    pub assigned_by: Option<String>,
    pub assigned_at: NaiveDateTime,
    pub note: Option<String>,
}

impl From<CategorizationDB> for Categorization {
    fn from(db: CategorizationDB) -> Self {
        Self {
            item_id: db.item_id,
            node_id: db.node_id,
            is_primary: db.is_primary,
            weight: db.weight,
            confidence: db.confidence,
            assigned_by: db.assigned_by,
            assigned_at: db.assigned_at,
            note: db.note,
        }
    }
}

impl From<Categorization> for CategorizationDB {
    fn from(domain: Categorization) -> Self {
        Self {
            item_id: domain.item_id,
            node_id: domain.node_id,
            is_primary: domain.is_primary,
            weight: domain.weight,
            confidence: domain.confidence,
            assigned_by: domain.assigned_by,
            assigned_at: domain.assigned_at,
            note: domain.note,
        }
    }
}

impl From<NewCategorization> for CategorizationDB {
    fn from(domain: NewCategorization) -> Self {
        Self {
            item_id: domain.item_id,
            node_id: domain.node_id,
            is_primary: domain.is_primary,
            weight: domain.weight,
            confidence: domain.confidence,
            assigned_by: domain.assigned_by,
            assigned_at: chrono::Utc::now().naive_utc(),
            note: domain.note,
        }
    }
}
