//! Materialized path encoding.
//!
//! A path lists every ancestor id followed by the node's own id, wrapped in
//! delimiters: `-1-2-3-`. Both the mutator and the validator derive paths
//! through these functions so the two never disagree.

use std::fmt;

use crate::errors::TreeError;

use super::NodeId;

pub const PATH_DELIMITER: char = '-';

/// Appends `id` to `parent_path`, or starts a new root path.
pub fn compute_path(parent_path: Option<&str>, id: NodeId) -> String {
    match parent_path {
        Some(parent) => format!("{}{}{}", parent, id, PATH_DELIMITER),
        None => format!("{}{}{}", PATH_DELIMITER, id, PATH_DELIMITER),
    }
}

/// Splits a path into its ordered ids, root first. Segments must be canonical
/// decimal: ASCII digits, no sign, no leading zero. Any accepted path renders
/// back to the same text, which prefix matching relies on.
pub fn parse_path(path: &str) -> Result<Vec<NodeId>, TreeError> {
    let inner = path
        .strip_prefix(PATH_DELIMITER)
        .and_then(|p| p.strip_suffix(PATH_DELIMITER))
        .ok_or_else(|| TreeError::malformed_path(path, "must start and end with '-'"))?;

    if inner.is_empty() {
        return Err(TreeError::malformed_path(path, "no segments"));
    }

    inner
        .split(PATH_DELIMITER)
        .map(|segment| {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(TreeError::malformed_path(
                    path,
                    format!("segment '{}' is not an integer", segment),
                ));
            }
            if segment.starts_with('0') {
                return Err(TreeError::malformed_path(
                    path,
                    format!("segment '{}' is not a canonical positive id", segment),
                ));
            }
            segment.parse::<NodeId>().map_err(|_| {
                TreeError::malformed_path(path, format!("segment '{}' is out of range", segment))
            })
        })
        .collect()
}

/// Depth of the node the path ends at; roots are level 0.
pub fn level_of(path: &str) -> Result<i32, TreeError> {
    Ok(parse_path(path)?.len() as i32 - 1)
}

/// Replaces `old_prefix` with `new_prefix` at the start of `path`.
pub fn rebase_path(path: &str, old_prefix: &str, new_prefix: &str) -> Result<String, TreeError> {
    let rest = path.strip_prefix(old_prefix).ok_or_else(|| {
        TreeError::malformed_path(path, format!("not inside subtree '{}'", old_prefix))
    })?;
    Ok(format!("{}{}", new_prefix, rest))
}

/// Parsed form of a materialized path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaterializedPath {
    ids: Vec<NodeId>,
}

impl MaterializedPath {
    pub fn parse(path: &str) -> Result<Self, TreeError> {
        Ok(Self {
            ids: parse_path(path)?,
        })
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    /// Ancestor ids, root first, excluding the node itself.
    pub fn ancestor_ids(&self) -> &[NodeId] {
        &self.ids[..self.ids.len() - 1]
    }

    pub fn node_id(&self) -> NodeId {
        self.ids[self.ids.len() - 1]
    }

    pub fn parent_id(&self) -> Option<NodeId> {
        self.ancestor_ids().last().copied()
    }

    pub fn level(&self) -> i32 {
        self.ids.len() as i32 - 1
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.ids.contains(&id)
    }

    /// True when some id appears more than once.
    pub fn has_repeated_ids(&self) -> bool {
        let mut seen = std::collections::HashSet::with_capacity(self.ids.len());
        self.ids.iter().any(|id| !seen.insert(*id))
    }
}

impl fmt::Display for MaterializedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", PATH_DELIMITER)?;
        for id in &self.ids {
            write!(f, "{}{}", id, PATH_DELIMITER)?;
        }
        Ok(())
    }
}

/// True when `candidate` lies strictly inside the subtree rooted at `ancestor`.
pub fn is_strict_descendant(candidate: &str, ancestor: &str) -> bool {
    candidate.len() > ancestor.len() && candidate.starts_with(ancestor)
}
