//! Relevance-ranked search over node name, code and description.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{CategoryNode, NodeId};

const SCORE_EXACT_NAME: u32 = 100;
const SCORE_EXACT_CODE: u32 = 90;
const SCORE_NAME_PREFIX: u32 = 80;
const SCORE_CODE_PREFIX: u32 = 70;
const SCORE_NAME_SUBSTRING: u32 = 60;
const SCORE_CODE_SUBSTRING: u32 = 50;
const SCORE_DESCRIPTION: u32 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub term: String,
    /// Restrict results to this node's subtree, the node included.
    pub scope_node_id: Option<NodeId>,
    #[serde(default)]
    pub include_inactive: bool,
    #[serde(default = "default_true")]
    pub match_code: bool,
    #[serde(default = "default_true")]
    pub match_description: bool,
    pub max_results: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl SearchQuery {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            scope_node_id: None,
            include_inactive: false,
            match_code: true,
            match_description: true,
            max_results: None,
        }
    }

    pub fn within(mut self, scope_node_id: NodeId) -> Self {
        self.scope_node_id = Some(scope_node_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchField {
    Name,
    Code,
    Description,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreadcrumbEntry {
    pub id: NodeId,
    pub name: String,
    pub code: String,
}

impl From<&CategoryNode> for BreadcrumbEntry {
    fn from(node: &CategoryNode) -> Self {
        Self {
            id: node.id,
            name: node.name.clone(),
            code: node.code.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub node: CategoryNode,
    pub score: u32,
    pub match_field: MatchField,
    /// Root first, ending with the hit itself.
    pub breadcrumb: Vec<BreadcrumbEntry>,
}

/// Scores one node against a lower-cased term; `None` when nothing matches.
fn score(node: &CategoryNode, term: &str, query: &SearchQuery) -> Option<(u32, MatchField)> {
    let name = node.name.to_lowercase();
    let code = node.code.to_lowercase();

    let candidates = [
        (name == term, SCORE_EXACT_NAME, MatchField::Name, true),
        (code == term, SCORE_EXACT_CODE, MatchField::Code, query.match_code),
        (name.starts_with(term), SCORE_NAME_PREFIX, MatchField::Name, true),
        (code.starts_with(term), SCORE_CODE_PREFIX, MatchField::Code, query.match_code),
        (name.contains(term), SCORE_NAME_SUBSTRING, MatchField::Name, true),
        (code.contains(term), SCORE_CODE_SUBSTRING, MatchField::Code, query.match_code),
    ];
    if let Some((_, score, field, _)) = candidates
        .iter()
        .find(|(hit, _, _, enabled)| *enabled && *hit)
    {
        return Some((*score, *field));
    }

    let description_hit = query.match_description
        && node
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(term));
    description_hit.then_some((SCORE_DESCRIPTION, MatchField::Description))
}

/// Filters and ranks `candidates`: score descending, then shallower nodes,
/// then sort order and name.
pub(crate) fn rank(
    candidates: Vec<CategoryNode>,
    query: &SearchQuery,
    limit: usize,
) -> Vec<(CategoryNode, u32, MatchField)> {
    let term = query.term.trim().to_lowercase();
    let mut hits: Vec<(CategoryNode, u32, MatchField)> = candidates
        .into_iter()
        .filter(|n| !n.is_deleted && (query.include_inactive || n.is_active))
        .filter_map(|n| score(&n, &term, query).map(|(s, f)| (n, s, f)))
        .collect();

    hits.sort_by(|(a, sa, _), (b, sb, _)| {
        sb.cmp(sa)
            .then(a.level.cmp(&b.level))
            .then(a.sort_order.cmp(&b.sort_order))
            .then_with(|| a.name.cmp(&b.name))
            .then(a.id.cmp(&b.id))
    });
    hits.truncate(limit);
    hits
}

/// Resolves the root-first chain for a hit from its path, using `ancestors`
/// for every id above it. Ids missing from `ancestors` are skipped.
pub(crate) fn breadcrumb(
    node: &CategoryNode,
    ancestors: &HashMap<NodeId, CategoryNode>,
) -> Vec<BreadcrumbEntry> {
    let mut trail: Vec<BreadcrumbEntry> = node
        .materialized_path()
        .map(|p| {
            p.ancestor_ids()
                .iter()
                .filter_map(|id| ancestors.get(id).map(BreadcrumbEntry::from))
                .collect()
        })
        .unwrap_or_default();
    trail.push(BreadcrumbEntry::from(node));
    trail
}
