//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

pub const DEFAULT_MAX_DEPTH: i32 = 10;
pub const DEFAULT_MAX_AFFECTED_NODES: usize = 5_000;
pub const DEFAULT_COPY_CODE_SUFFIX: &str = "-copy";
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// What happens to categorizations that point at a node being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeleteCategorizationPolicy {
    /// Move the records to the deleted node's surviving parent. Items whose
    /// node has no surviving parent fall back to removal.
    #[default]
    ReassignToParent,
    /// Drop the records.
    Remove,
}

/// How a new primary categorization treats an existing one for the same item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimaryConflictPolicy {
    /// Demote the previous primary record to secondary.
    #[default]
    Demote,
    /// Refuse the assignment with `ItemAlreadyPrimary`.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeConfig {
    /// Depth beyond which create, move, copy and import report warnings and
    /// the validator lists the deep nodes. Never a hard limit.
    pub max_depth: i32,
    /// Cap on nodes touched by a single move/copy/delete when the caller
    /// does not supply one.
    pub max_affected_nodes: usize,
    pub delete_categorization_policy: DeleteCategorizationPolicy,
    pub primary_conflict_policy: PrimaryConflictPolicy,
    pub copy_code_suffix: String,
    pub search_default_limit: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_affected_nodes: DEFAULT_MAX_AFFECTED_NODES,
            delete_categorization_policy: DeleteCategorizationPolicy::default(),
            primary_conflict_policy: PrimaryConflictPolicy::default(),
            copy_code_suffix: DEFAULT_COPY_CODE_SUFFIX.to_string(),
            search_default_limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl TreeConfig {
    /// Defaults overlaid with `QTREE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("QTREE_MAX_DEPTH") {
            config.max_depth = raw
                .trim()
                .parse::<i32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| invalid("QTREE_MAX_DEPTH", &raw))?;
        }

        if let Some(raw) = lookup("QTREE_MAX_AFFECTED") {
            config.max_affected_nodes = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| invalid("QTREE_MAX_AFFECTED", &raw))?;
        }

        if let Some(raw) = lookup("QTREE_DELETE_CATEGORIZATIONS") {
            config.delete_categorization_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "reassign" | "reassign_to_parent" => DeleteCategorizationPolicy::ReassignToParent,
                "remove" => DeleteCategorizationPolicy::Remove,
                _ => return Err(invalid("QTREE_DELETE_CATEGORIZATIONS", &raw)),
            };
        }

        if let Some(raw) = lookup("QTREE_PRIMARY_CONFLICT") {
            config.primary_conflict_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "demote" => PrimaryConflictPolicy::Demote,
                "reject" => PrimaryConflictPolicy::Reject,
                _ => return Err(invalid("QTREE_PRIMARY_CONFLICT", &raw)),
            };
        }

        Ok(config)
    }
}

fn invalid(key: &str, raw: &str) -> Error {
    Error::InvalidConfigValue(format!("{}='{}'", key, raw))
}
