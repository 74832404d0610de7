use std::collections::HashSet;
use std::sync::Arc;

use cloudmirror_core::RemoteListingEntry;
use thiserror::Error;
use tracing::{debug, warn};

use super::adapter::{Adapted, SkipReason, adapt};
use super::directories::{derive_directory, reconcile_directories_retaining};
use super::partition::ListingPartitioner;
use super::reconcile::{ReconcileSummary, reconcile_items_retaining, same_remote_state};
use super::scope::ScopeLocks;
use crate::store::{MetadataStore, Mutation, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("listing for {server_path} has no usable entries")]
    EmptyListing { server_path: String },
    #[error("listing for {server_path} starts with a rejected entry: {reason}")]
    RejectedDirectoryEntry {
        server_path: String,
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingOutcome {
    pub own_id: String,
    pub adapted: usize,
    pub skipped: usize,
    pub items: ReconcileSummary,
    pub directories: ReconcileSummary,
}

/// Applies directory listings to the metadata store, one scope at a time.
pub struct MirrorEngine {
    store: Arc<MetadataStore>,
    scopes: ScopeLocks,
}

impl MirrorEngine {
    pub fn new(store: Arc<MetadataStore>) -> Self {
        Self {
            store,
            scopes: ScopeLocks::new(),
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Reconciles one listing response for the directory at `server_path`.
    ///
    /// The directory's own etag is recorded last, only after its items and
    /// child directories were written, so a failure anywhere leaves the old
    /// etag in place and the next pass retries the whole scope. Children the
    /// adapter rejects keep their stored records.
    pub async fn apply_listing(
        &self,
        account: &str,
        server_path: &str,
        entries: &[RemoteListingEntry],
    ) -> Result<ListingOutcome, EngineError> {
        let scope = normalize_scope(server_path);
        let server_path = scope.as_str();
        let _scope = self.scopes.lock(account, server_path).await;

        let mut outcome = ListingOutcome::default();
        let mut partitioner = ListingPartitioner::new();
        let mut retained = HashSet::new();
        for (index, entry) in entries.iter().enumerate() {
            let mut record = match adapt(entry, account) {
                Adapted::Record(record) => record,
                Adapted::Skip(reason) if index == 0 => {
                    return Err(EngineError::RejectedDirectoryEntry {
                        server_path: server_path.to_string(),
                        reason,
                    });
                }
                Adapted::Skip(reason) => {
                    warn!(account, server_path, %reason, "skipping listing entry");
                    if let Some(id) = reason.id() {
                        retained.insert(id.to_string());
                    }
                    outcome.skipped += 1;
                    continue;
                }
            };
            if index > 0 {
                if normalize_scope(&record.server_path) != server_path {
                    warn!(
                        account,
                        server_path,
                        id = %record.id,
                        entry_path = %record.server_path,
                        "skipping child listed outside its directory"
                    );
                    outcome.skipped += 1;
                    continue;
                }
                record.server_path = scope.clone();
            }
            outcome.adapted += 1;
            partitioner.push(record);
        }
        let listing = partitioner
            .finish()
            .ok_or_else(|| EngineError::EmptyListing {
                server_path: server_path.to_string(),
            })?;
        outcome.own_id = listing.own.id.clone();

        outcome.items = reconcile_items_retaining(
            &self.store,
            account,
            server_path,
            &listing.children,
            &retained,
        )
        .await?;

        let mut child_directories = Vec::with_capacity(listing.child_directories.len());
        for item in &listing.child_directories {
            child_directories.push(derive_directory(&self.store, item, false).await?);
        }
        outcome.directories = reconcile_directories_retaining(
            &self.store,
            account,
            server_path,
            &child_directories,
            &retained,
        )
        .await?;

        let mut own = Vec::with_capacity(2);
        let stored_own = self.store.get(account, &listing.own.id).await?;
        if !stored_own.is_some_and(|stored| same_remote_state(&stored, &listing.own)) {
            own.push(Mutation::PutItem(listing.own.clone()));
        }
        if listing.own.is_directory {
            let current = self.store.get_directory(account, &listing.own.id).await?;
            let derived = derive_directory(&self.store, &listing.own, true).await?;
            if current.as_ref() != Some(&derived) {
                own.push(Mutation::PutDirectory(derived));
            }
        }
        self.store.transact(&own).await?;

        debug!(
            account,
            server_path,
            adapted = outcome.adapted,
            skipped = outcome.skipped,
            "listing applied"
        );
        Ok(outcome)
    }
}

/// Collection paths compare without a trailing `/`; the root stays `/`.
fn normalize_scope(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
