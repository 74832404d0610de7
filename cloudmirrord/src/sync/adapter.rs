use cloudmirror_core::{ListingClassification, RemoteListingEntry, RemoteLock};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::store::{ItemLock, ItemRecord, ItemStatus};

const MARKDOWN_TYPES: [&str; 2] = ["text/markdown", "text/x-markdown"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("entry has no id")]
    MissingId,
    #[error("entry {id} has no name")]
    MissingName { id: String },
    #[error("entry {id} has an invalid {field} timestamp: {value}")]
    InvalidTimestamp {
        id: String,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Adapted {
    Record(ItemRecord),
    Skip(SkipReason),
}

impl SkipReason {
    /// Id of the rejected entry, when it had a usable one.
    pub fn id(&self) -> Option<&str> {
        match self {
            SkipReason::MissingId => None,
            SkipReason::MissingName { id } | SkipReason::InvalidTimestamp { id, .. } => Some(id),
        }
    }
}

/// Maps one listing entry onto the local item shape. Pure: no I/O, same
/// input gives the same record.
pub fn adapt(entry: &RemoteListingEntry, account: &str) -> Adapted {
    match try_adapt(entry, account) {
        Ok(record) => Adapted::Record(record),
        Err(reason) => Adapted::Skip(reason),
    }
}

fn try_adapt(entry: &RemoteListingEntry, account: &str) -> Result<ItemRecord, SkipReason> {
    let id = entry
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(SkipReason::MissingId)?
        .to_string();
    let name = entry
        .name
        .clone()
        .ok_or_else(|| SkipReason::MissingName { id: id.clone() })?;

    let modified = parse_timestamp(&id, "date", entry.date.as_deref())?.unwrap_or(0);
    let created =
        parse_timestamp(&id, "creation_date", entry.creation_date.as_deref())?.unwrap_or(modified);
    let uploaded =
        parse_timestamp(&id, "upload_date", entry.upload_date.as_deref())?.unwrap_or(modified);
    let lock = entry
        .lock
        .as_ref()
        .map(|lock| adapt_lock(&id, lock))
        .transpose()?;

    let display_name = entry
        .display_name
        .clone()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| name.clone());

    Ok(ItemRecord {
        account: account.to_string(),
        server_path: entry.server_path.clone(),
        display_name,
        is_directory: entry.directory,
        etag: entry.etag.clone(),
        file_id: entry.file_id.clone(),
        status: ItemStatus::Normal,
        size: entry.size,
        permissions: entry.permissions.clone(),
        favorite: entry.favorite,
        encrypted: entry.encrypted,
        has_preview: entry.has_preview,
        checksums: entry.checksums.to_vec(),
        content_type: entry.content_type.clone(),
        classification: classify(&entry.content_type, entry.classification),
        lock,
        created,
        modified,
        uploaded,
        owner_id: entry.owner_id.clone(),
        owner_display_name: entry.owner_display_name.clone(),
        share_permissions: entry.share_permissions.to_vec(),
        share_types: entry.share_types.to_vec(),
        quota_used_bytes: entry.quota_used_bytes,
        quota_available_bytes: entry.quota_available_bytes,
        note: entry.note.clone(),
        rich_workspace: entry.rich_workspace.clone(),
        id,
        name,
    })
}

/// Server-side sniffers report markdown as unknown; treat it as a document.
fn classify(content_type: &str, reported: ListingClassification) -> ListingClassification {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    let is_markdown = MARKDOWN_TYPES
        .iter()
        .any(|candidate| mime.eq_ignore_ascii_case(candidate));
    if is_markdown && reported == ListingClassification::Unknown {
        ListingClassification::Document
    } else {
        reported
    }
}

fn adapt_lock(id: &str, lock: &RemoteLock) -> Result<ItemLock, SkipReason> {
    Ok(ItemLock {
        owner: lock.owner.clone(),
        owner_display_name: lock.owner_display_name.clone(),
        owner_type: lock.owner_type,
        editor: lock.editor.clone(),
        time: parse_timestamp(id, "lock.time", lock.time.as_deref())?,
        timeout: lock.timeout,
    })
}

fn parse_timestamp(
    id: &str,
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<i64>, SkipReason> {
    let Some(value) = value else {
        return Ok(None);
    };
    OffsetDateTime::parse(value, &Rfc3339)
        .map(|dt| Some(dt.unix_timestamp()))
        .map_err(|_| SkipReason::InvalidTimestamp {
            id: id.to_string(),
            field,
            value: value.to_string(),
        })
}
