use std::collections::HashSet;

use tracing::debug;

use super::reconcile::{Reconcilable, ReconcileSummary, plan_changes_retaining};
use crate::store::{
    DirectoryRecord, ItemRecord, MetadataStore, Mutation, StoreError, join_remote_path,
};

impl Reconcilable for DirectoryRecord {
    fn record_id(&self) -> &str {
        &self.id
    }

    /// The etag is left out: it only moves with the directory's own listing.
    fn same_remote_state(&self, updated: &Self) -> bool {
        self.file_id == updated.file_id
            && self.parent_path == updated.parent_path
            && self.path == updated.path
            && self.encrypted == updated.encrypted
            && self.favorite == updated.favorite
            && self.permissions == updated.permissions
    }

    fn put(&self) -> Mutation {
        Mutation::PutDirectoryAttributes(self.clone())
    }

    fn delete(&self) -> Mutation {
        Mutation::DeleteDirectory {
            account: self.account.clone(),
            id: self.id.clone(),
        }
    }
}

/// Path a directory item's children carry as their `server_path`.
pub fn directory_path_for(item: &ItemRecord) -> String {
    join_remote_path(&item.server_path, &item.name)
}

/// Overlays `source` onto `base`. The etag moves only with `record_etag`,
/// which only the caller that just reconciled the directory's children
/// may assert.
pub fn apply_directory_item(
    base: Option<DirectoryRecord>,
    source: &ItemRecord,
    record_etag: bool,
) -> DirectoryRecord {
    let mut directory = base.unwrap_or_default();
    directory.id = source.id.clone();
    directory.file_id = source.file_id.clone();
    directory.parent_path = source.server_path.clone();
    directory.path = directory_path_for(source);
    directory.account = source.account.clone();
    directory.encrypted = source.encrypted;
    directory.favorite = source.favorite;
    directory.permissions = source.permissions.clone();
    if record_etag {
        directory.etag = source.etag.clone();
    }
    directory
}

pub async fn derive_directory(
    store: &MetadataStore,
    source: &ItemRecord,
    record_etag: bool,
) -> Result<DirectoryRecord, StoreError> {
    let base = store.get_directory(&source.account, &source.id).await?;
    Ok(apply_directory_item(base, source, record_etag))
}

/// Same merge as item reconciliation, over the directories below
/// `parent_path`. Directories carry no transfer state, so nothing is
/// gated on status here.
pub async fn reconcile_directories(
    store: &MetadataStore,
    account: &str,
    parent_path: &str,
    updated: &[DirectoryRecord],
) -> Result<ReconcileSummary, StoreError> {
    reconcile_directories_retaining(store, account, parent_path, updated, &HashSet::new()).await
}

pub async fn reconcile_directories_retaining(
    store: &MetadataStore,
    account: &str,
    parent_path: &str,
    updated: &[DirectoryRecord],
    retained: &HashSet<String>,
) -> Result<ReconcileSummary, StoreError> {
    let existing = store.query_directories(account, parent_path).await?;
    let plan = plan_changes_retaining(&existing, updated, retained);
    store.transact(&plan.mutations).await?;

    debug!(
        account,
        parent_path,
        changed = plan.summary.changed,
        unmatched = plan.summary.unmatched,
        removed = plan.summary.removed,
        "directories reconciled"
    );
    Ok(plan.summary)
}
