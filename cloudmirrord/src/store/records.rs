use cloudmirror_core::ListingClassification;
use serde::{Deserialize, Serialize};

use super::StoreError;

/// Local transfer state of an item. Written by the transfer subsystem,
/// only ever read by reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    #[default]
    Normal,
    WaitingUpload,
    Uploading,
    WaitingDownload,
    Downloading,
    Error,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Normal => "normal",
            ItemStatus::WaitingUpload => "waiting_upload",
            ItemStatus::Uploading => "uploading",
            ItemStatus::WaitingDownload => "waiting_download",
            ItemStatus::Downloading => "downloading",
            ItemStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "normal" => Ok(ItemStatus::Normal),
            "waiting_upload" => Ok(ItemStatus::WaitingUpload),
            "uploading" => Ok(ItemStatus::Uploading),
            "waiting_download" => Ok(ItemStatus::WaitingDownload),
            "downloading" => Ok(ItemStatus::Downloading),
            "error" => Ok(ItemStatus::Error),
            other => Err(StoreError::InvalidColumn {
                column: "status",
                value: other.to_string(),
            }),
        }
    }

    /// The one predicate deciding whether a listing may overwrite or delete
    /// a stored record. Anything but `Normal` belongs to the transfer
    /// subsystem until it reverts to `Normal`.
    pub fn is_eligible_for_remote_overwrite(&self) -> bool {
        matches!(self, ItemStatus::Normal)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemLock {
    pub owner: String,
    pub owner_display_name: String,
    pub owner_type: i32,
    pub editor: Option<String>,
    /// Unix seconds.
    pub time: Option<i64>,
    pub timeout: Option<i64>,
}

/// One file or directory as known locally. Values handed out by the store
/// are detached copies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemRecord {
    pub id: String,
    pub account: String,
    /// Collection path of the parent on the remote.
    pub server_path: String,
    pub name: String,
    pub display_name: String,
    pub is_directory: bool,
    pub etag: String,
    pub file_id: String,
    pub status: ItemStatus,
    pub size: i64,
    pub permissions: String,
    pub favorite: bool,
    pub encrypted: bool,
    pub has_preview: bool,
    pub checksums: Vec<String>,
    pub content_type: String,
    pub classification: ListingClassification,
    pub lock: Option<ItemLock>,
    pub created: i64,
    pub modified: i64,
    pub uploaded: i64,
    pub owner_id: String,
    pub owner_display_name: String,
    pub share_permissions: Vec<String>,
    pub share_types: Vec<i32>,
    pub quota_used_bytes: i64,
    pub quota_available_bytes: i64,
    pub note: String,
    pub rich_workspace: Option<String>,
}

impl ItemRecord {
    /// Remote path of the item itself.
    pub fn full_path(&self) -> String {
        join_remote_path(&self.server_path, &self.name)
    }
}

/// One node of the directory hierarchy. Always derived from the directory's
/// `ItemRecord`; `path` is never set on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub id: String,
    pub account: String,
    pub file_id: String,
    pub parent_path: String,
    pub path: String,
    /// Advances only once the directory's children have been reconciled.
    pub etag: String,
    pub encrypted: bool,
    pub favorite: bool,
    pub permissions: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalFileRecord {
    pub id: String,
    pub account: String,
    pub local_path: String,
    pub etag: String,
    pub exclude: bool,
    pub offline: bool,
    pub last_opened: Option<i64>,
}

pub(crate) fn join_remote_path(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}
