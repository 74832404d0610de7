use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::store::{ItemRecord, ItemStatus, MetadataStore, Mutation, StoreError};

/// A record kind that can be merged against a fresh remote view of its
/// scope by id.
pub trait Reconcilable {
    fn record_id(&self) -> &str;

    /// Equality over the fields the remote is authoritative for.
    fn same_remote_state(&self, updated: &Self) -> bool;

    fn put(&self) -> Mutation;

    fn delete(&self) -> Mutation;
}

impl Reconcilable for ItemRecord {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn same_remote_state(&self, updated: &Self) -> bool {
        same_remote_state(self, updated)
    }

    fn put(&self) -> Mutation {
        Mutation::PutItem(self.clone())
    }

    fn delete(&self) -> Mutation {
        Mutation::DeleteItem {
            account: self.account.clone(),
            id: self.id.clone(),
        }
    }
}

/// Local-only fields (status, local bookkeeping) never take part, so they
/// can not trigger a remote-driven overwrite.
pub fn same_remote_state(existing: &ItemRecord, updated: &ItemRecord) -> bool {
    existing.etag == updated.etag
        && existing.permissions == updated.permissions
        && existing.size == updated.size
        && existing.favorite == updated.favorite
        && existing.encrypted == updated.encrypted
        && existing.lock == updated.lock
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Existing records whose remote state changed.
    pub changed: usize,
    /// Updated records without an existing match, written unconditionally.
    pub unmatched: usize,
    pub unchanged: usize,
    pub removed: usize,
    /// Existing records absent from the listing but kept because their
    /// entry was listed and rejected.
    pub retained: usize,
}

impl ReconcileSummary {
    pub fn is_noop(&self) -> bool {
        self.changed == 0 && self.unmatched == 0 && self.removed == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub mutations: Vec<Mutation>,
    pub summary: ReconcileSummary,
}

/// Insert/update/delete-by-absence over one scope. Writes come first in the
/// order of `updated`, then deletes in the order of `existing`.
pub fn plan_changes<T: Reconcilable>(existing: &[T], updated: &[T]) -> ReconcilePlan {
    plan_changes_retaining(existing, updated, &HashSet::new())
}

/// Like [`plan_changes`], but ids in `retained` are never deleted by
/// absence.
pub fn plan_changes_retaining<T: Reconcilable>(
    existing: &[T],
    updated: &[T],
    retained: &HashSet<String>,
) -> ReconcilePlan {
    let by_id: HashMap<&str, &T> = existing.iter().map(|e| (e.record_id(), e)).collect();
    let seen: HashSet<&str> = updated.iter().map(|u| u.record_id()).collect();

    let mut plan = ReconcilePlan::default();
    for record in updated {
        match by_id.get(record.record_id()) {
            Some(current) if current.same_remote_state(record) => plan.summary.unchanged += 1,
            Some(_) => {
                plan.mutations.push(record.put());
                plan.summary.changed += 1;
            }
            None => {
                plan.mutations.push(record.put());
                plan.summary.unmatched += 1;
            }
        }
    }
    for current in existing {
        if seen.contains(current.record_id()) {
            continue;
        }
        if retained.contains(current.record_id()) {
            plan.summary.retained += 1;
        } else {
            plan.mutations.push(current.delete());
            plan.summary.removed += 1;
        }
    }
    plan
}

/// Brings the items of `(account, server_path)` in line with `updated`.
///
/// Only `Normal` records take part on the existing side. Records owned by a
/// transfer are neither matched nor deleted here, and the store refuses to
/// overwrite them, so they stay untouched until their status reverts.
/// Callers must serialize passes over the same scope.
pub async fn reconcile_items(
    store: &MetadataStore,
    account: &str,
    server_path: &str,
    updated: &[ItemRecord],
) -> Result<ReconcileSummary, StoreError> {
    reconcile_items_retaining(store, account, server_path, updated, &HashSet::new()).await
}

/// [`reconcile_items`] that leaves the records named in `retained` in place
/// even when `updated` does not carry them.
pub async fn reconcile_items_retaining(
    store: &MetadataStore,
    account: &str,
    server_path: &str,
    updated: &[ItemRecord],
    retained: &HashSet<String>,
) -> Result<ReconcileSummary, StoreError> {
    let existing = store
        .query(account, server_path, Some(ItemStatus::Normal))
        .await?;
    let plan = plan_changes_retaining(&existing, updated, retained);
    store.transact(&plan.mutations).await?;

    debug!(
        account,
        server_path,
        changed = plan.summary.changed,
        unmatched = plan.summary.unmatched,
        unchanged = plan.summary.unchanged,
        removed = plan.summary.removed,
        retained = plan.summary.retained,
        "items reconciled"
    );
    Ok(plan.summary)
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
