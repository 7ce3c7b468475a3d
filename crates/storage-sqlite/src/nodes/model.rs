//! Database models for category nodes.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use qtree_core::tree::{normalize_code, CategoryNode, CategoryNodePatch, NodeId};

/// Database model for category nodes
#[derive(Queryable, Identifiable, Selectable, PartialEq, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::category_nodes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct CategoryNodeDB {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub code: String,
    pub code_key: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub sort_order: i32,
    pub path: String,
    pub level: i32,
    pub is_active: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Database model for inserting a node. `path` and `level` are filled in
/// once the id is known.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::category_nodes)]
pub struct NewCategoryNodeDB {
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub code: String,
    pub code_key: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub sort_order: i32,
    pub path: String,
    pub level: i32,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NewCategoryNodeDB {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent_id: Option<NodeId>,
        name: String,
        code: &str,
        description: Option<String>,
        color: Option<String>,
        icon: Option<String>,
        is_active: bool,
        sort_order: i32,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            parent_id,
            name,
            code: code.trim().to_string(),
            code_key: normalize_code(code),
            description,
            color,
            icon,
            sort_order,
            path: String::new(),
            level: 0,
            is_active,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Attribute changes. `None` skips a column; `Some(None)` clears it.
#[derive(AsChangeset, Debug, Clone, Default)]
#[diesel(table_name = crate::schema::category_nodes)]
pub struct CategoryNodeChangesetDB {
    pub name: Option<String>,
    pub code: Option<String>,
    pub code_key: Option<String>,
    pub description: Option<Option<String>>,
    pub color: Option<Option<String>>,
    pub icon: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub updated_at: Option<NaiveDateTime>,
}

fn clearable(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl From<CategoryNodePatch> for CategoryNodeChangesetDB {
    fn from(patch: CategoryNodePatch) -> Self {
        Self {
            name: patch.name,
            code_key: patch.code.as_deref().map(normalize_code),
            code: patch.code.map(|c| c.trim().to_string()),
            description: patch.description.map(clearable),
            color: patch.color.map(clearable),
            icon: patch.icon.map(clearable),
            is_active: patch.is_active,
            updated_at: Some(chrono::Utc::now().naive_utc()),
        }
    }
}

impl From<CategoryNodeDB> for CategoryNode {
    fn from(db: CategoryNodeDB) -> Self {
        Self {
            id: db.id,
            parent_id: db.parent_id,
            name: db.name,
            code: db.code,
            description: db.description,
            color: db.color,
            icon: db.icon,
            sort_order: db.sort_order,
            path: db.path,
            level: db.level,
            is_active: db.is_active,
            is_deleted: db.is_deleted,
            deleted_at: db.deleted_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}
