//! Domain models for item categorizations.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ValidationError};
use crate::tree::{ItemId, NodeId};

/// Assignment of an item to a tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Categorization {
    pub item_id: ItemId,
    pub node_id: NodeId,
    pub is_primary: bool,
    pub weight: Option<f64>,     // 0.0 - 1.0
    pub confidence: Option<f64>, // 0.0 - 1.0
    pub assigned_by: Option<String>,
    pub assigned_at: NaiveDateTime,
    pub note: Option<String>,
}

impl Categorization {
    pub fn key(&self) -> CategorizationKey {
        CategorizationKey {
            item_id: self.item_id,
            node_id: self.node_id,
        }
    }
}

/// Primary key of a categorization record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizationKey {
    pub item_id: ItemId,
    pub node_id: NodeId,
}

/// Data for tagging an item into a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategorization {
    pub item_id: ItemId,
    pub node_id: NodeId,
    pub is_primary: bool,
    pub weight: Option<f64>,
    pub confidence: Option<f64>,
    pub assigned_by: Option<String>,
    pub note: Option<String>,
}

impl NewCategorization {
    pub fn new(item_id: ItemId, node_id: NodeId, is_primary: bool) -> Self {
        Self {
            item_id,
            node_id,
            is_primary,
            weight: None,
            confidence: None,
            assigned_by: None,
            note: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_unit_range("weight", self.weight)?;
        check_unit_range("confidence", self.confidence)?;
        Ok(())
    }
}

fn check_unit_range(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) || v.is_nan() => Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0.0,
            max: 1.0,
            value: v,
        }
        .into()),
        _ => Ok(()),
    }
}
