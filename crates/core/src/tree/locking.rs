//! Subtree-scoped write locks and the commit gate.
//!
//! Two mutations may run concurrently only when the subtrees they touch are
//! disjoint (neither path is a prefix of the other). Readers that need several
//! queries to agree hold a `CommitGate` read permit; change sets are applied
//! under its write permit.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Notify, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::CategoryNode;

/// A region of the tree a mutation claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockScope {
    /// The whole tree, including the root sibling list.
    Tree,
    /// The subtree under the given materialized path.
    Subtree(String),
}

impl LockScope {
    /// Scope covering a node's children list: the parent's subtree, or the
    /// whole tree for root-level operations.
    pub fn for_parent(parent: Option<&CategoryNode>) -> Self {
        match parent {
            Some(node) => LockScope::Subtree(node.path.clone()),
            None => LockScope::Tree,
        }
    }

    pub fn for_node(node: &CategoryNode) -> Self {
        LockScope::Subtree(node.path.clone())
    }

    pub fn overlaps(&self, other: &LockScope) -> bool {
        match (self, other) {
            (LockScope::Tree, _) | (_, LockScope::Tree) => true,
            (LockScope::Subtree(a), LockScope::Subtree(b)) => {
                a.starts_with(b.as_str()) || b.starts_with(a.as_str())
            }
        }
    }
}

#[derive(Default)]
struct LockTable {
    held: Vec<(u64, LockScope)>,
    next_ticket: u64,
}

#[derive(Default)]
struct LocksInner {
    table: Mutex<LockTable>,
    released: Notify,
}

/// Advisory lock manager keyed by path scopes.
#[derive(Clone, Default)]
pub struct SubtreeLocks {
    inner: Arc<LocksInner>,
}

impl SubtreeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until none of `scopes` overlaps a held scope, then claims them all.
    pub async fn acquire(&self, scopes: Vec<LockScope>) -> SubtreeGuard {
        loop {
            let notified = self.inner.released.notified();
            let mut notified = std::pin::pin!(notified);
            // Register before checking so a release between the check and the
            // await still wakes us.
            notified.as_mut().enable();

            if let Some(ticket) = self.try_claim(&scopes) {
                return SubtreeGuard {
                    inner: Arc::clone(&self.inner),
                    ticket,
                };
            }
            notified.await;
        }
    }

    fn try_claim(&self, scopes: &[LockScope]) -> Option<u64> {
        let mut table = self
            .inner
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let blocked = table
            .held
            .iter()
            .any(|(_, held)| scopes.iter().any(|s| s.overlaps(held)));
        if blocked {
            return None;
        }

        table.next_ticket += 1;
        let ticket = table.next_ticket;
        for scope in scopes {
            table.held.push((ticket, scope.clone()));
        }
        Some(ticket)
    }

    /// Number of scopes currently held.
    pub fn held_count(&self) -> usize {
        self.inner
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .held
            .len()
    }
}

/// Releases its scopes on drop.
pub struct SubtreeGuard {
    inner: Arc<LocksInner>,
    ticket: u64,
}

impl Drop for SubtreeGuard {
    fn drop(&mut self) {
        {
            let mut table = self
                .inner
                .table
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            table.held.retain(|(ticket, _)| *ticket != self.ticket);
        }
        self.inner.released.notify_waiters();
    }
}

/// Serializes commits against multi-query reads.
#[derive(Default)]
pub struct CommitGate {
    lock: RwLock<()>,
}

impl CommitGate {
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    pub async fn commit(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }
}

/// Locks and gate shared by every service operating on the same store.
#[derive(Default)]
pub struct TreeCoordinator {
    pub locks: SubtreeLocks,
    pub gate: CommitGate,
}

impl TreeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}
