mod events;
mod records;
mod schema;

use std::{fs, path::Path, path::PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::warn;

pub use events::{EventKind, RecordKind, StoreEvent};
pub use records::{DirectoryRecord, ItemLock, ItemRecord, ItemStatus, LocalFileRecord};
pub use schema::SCHEMA_VERSION;

pub(crate) use records::join_remote_path;

const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metadata store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),
    #[error("transaction failed and was rolled back: {0}")]
    TransactionFailed(#[source] sqlx::Error),
    #[error("schema version mismatch: found {found}, expected {expected}")]
    SchemaVersionMismatch { found: i64, expected: i64 },
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("invalid value in column {column}: {value}")]
    InvalidColumn { column: &'static str, value: String },
    #[error("column encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// One write inside a [`MetadataStore::transact`] batch.
///
/// Item writes are remote-driven: they never land on a row whose status is
/// not eligible for remote overwrite. Status changes go through
/// [`MetadataStore::set_status`] instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    PutItem(ItemRecord),
    DeleteItem { account: String, id: String },
    /// Full upsert, etag included.
    PutDirectory(DirectoryRecord),
    /// Upsert that keeps the etag already stored for the row; the given etag
    /// is used only when the row is new.
    PutDirectoryAttributes(DirectoryRecord),
    DeleteDirectory { account: String, id: String },
}

const ITEM_COLUMNS: &str = "account, id, server_path, name, display_name, is_directory, etag, file_id, status, size, permissions, favorite, encrypted, has_preview, checksums, content_type, classification, lock, created, modified, uploaded, owner_id, owner_display_name, share_permissions, share_types, quota_used_bytes, quota_available_bytes, note, rich_workspace";

const UPSERT_ITEM: &str = "
    INSERT INTO items (
        account, id, server_path, name, display_name, is_directory, etag, file_id,
        status, size, permissions, favorite, encrypted, has_preview, checksums,
        content_type, classification, lock, created, modified, uploaded, owner_id,
        owner_display_name, share_permissions, share_types, quota_used_bytes,
        quota_available_bytes, note, rich_workspace
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)
    ON CONFLICT(account, id) DO UPDATE SET
        server_path = excluded.server_path,
        name = excluded.name,
        display_name = excluded.display_name,
        is_directory = excluded.is_directory,
        etag = excluded.etag,
        file_id = excluded.file_id,
        status = excluded.status,
        size = excluded.size,
        permissions = excluded.permissions,
        favorite = excluded.favorite,
        encrypted = excluded.encrypted,
        has_preview = excluded.has_preview,
        checksums = excluded.checksums,
        content_type = excluded.content_type,
        classification = excluded.classification,
        lock = excluded.lock,
        created = excluded.created,
        modified = excluded.modified,
        uploaded = excluded.uploaded,
        owner_id = excluded.owner_id,
        owner_display_name = excluded.owner_display_name,
        share_permissions = excluded.share_permissions,
        share_types = excluded.share_types,
        quota_used_bytes = excluded.quota_used_bytes,
        quota_available_bytes = excluded.quota_available_bytes,
        note = excluded.note,
        rich_workspace = excluded.rich_workspace
";

const DIRECTORY_COLUMNS: &str =
    "account, id, file_id, parent_path, path, etag, encrypted, favorite, permissions";

/// Account-scoped metadata mirror. Every read returns owned values; the
/// store keeps the only canonical copy of a record.
///
/// Writes from this process are serialized on `write_gate`; reads never
/// wait on it.
pub struct MetadataStore {
    pool: SqlitePool,
    events: broadcast::Sender<StoreEvent>,
    write_gate: Mutex<()>,
}

impl MetadataStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pool,
            events,
            write_gate: Mutex::new(()),
        }
    }

    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(StoreError::Unavailable)?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with(path, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn open_with(path: &Path, max_connections: u32) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(StoreError::Unavailable)?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        schema::ensure_schema(&self.pool).await
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub async fn get(&self, account: &str, id: &str) -> Result<Option<ItemRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE account = ?1 AND id = ?2"
        ))
        .bind(account)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    /// Items of one scope ordered by name. `status` narrows the result to a
    /// single status when given.
    pub async fn query(
        &self,
        account: &str,
        server_path: &str,
        status: Option<ItemStatus>,
    ) -> Result<Vec<ItemRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS}
             FROM items
             WHERE account = ?1 AND server_path = ?2 AND (?3 IS NULL OR status = ?3)
             ORDER BY name ASC"
        ))
        .bind(account)
        .bind(server_path)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    pub async fn get_directory(
        &self,
        account: &str,
        id: &str,
    ) -> Result<Option<DirectoryRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {DIRECTORY_COLUMNS} FROM directories WHERE account = ?1 AND id = ?2"
        ))
        .bind(account)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(directory_from_row).transpose()
    }

    pub async fn get_directory_by_path(
        &self,
        account: &str,
        path: &str,
    ) -> Result<Option<DirectoryRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {DIRECTORY_COLUMNS} FROM directories WHERE account = ?1 AND path = ?2 ORDER BY id ASC LIMIT 1"
        ))
        .bind(account)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(directory_from_row).transpose()
    }

    pub async fn query_directories(
        &self,
        account: &str,
        parent_path: &str,
    ) -> Result<Vec<DirectoryRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {DIRECTORY_COLUMNS}
             FROM directories
             WHERE account = ?1 AND parent_path = ?2
             ORDER BY path ASC"
        ))
        .bind(account)
        .bind(parent_path)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(directory_from_row).collect()
    }

    /// Applies every mutation in one transaction. On any failure nothing is
    /// committed and no event is published.
    pub async fn transact(&self, mutations: &[Mutation]) -> Result<(), StoreError> {
        if mutations.is_empty() {
            return Ok(());
        }

        let _writer = self.write_gate.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(StoreError::TransactionFailed)?;
        let events = match apply_mutations(&mut tx, mutations).await {
            Ok(events) => events,
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("metadata store rollback failed: {rollback}");
                }
                return Err(err);
            }
        };
        tx.commit().await.map_err(StoreError::TransactionFailed)?;

        self.publish(events);
        Ok(())
    }

    /// Status transitions owned by the transfer subsystem. Returns whether
    /// the item exists.
    pub async fn set_status(
        &self,
        account: &str,
        id: &str,
        status: ItemStatus,
    ) -> Result<bool, StoreError> {
        let _writer = self.write_gate.lock().await;
        let row = sqlx::query(
            "UPDATE items SET status = ?1 WHERE account = ?2 AND id = ?3
             RETURNING server_path, name, etag",
        )
        .bind(status.as_str())
        .bind(account)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(false);
        };
        let server_path: String = row.try_get("server_path")?;
        let name: String = row.try_get("name")?;
        self.publish([StoreEvent {
            kind: EventKind::Updated,
            record: RecordKind::Item,
            account: account.to_string(),
            id: id.to_string(),
            path: join_remote_path(&server_path, &name),
            etag: row.try_get("etag")?,
        }]);
        Ok(true)
    }

    /// Drops every record of an account, e.g. when the account is removed.
    pub async fn delete_account(&self, account: &str) -> Result<(), StoreError> {
        let _writer = self.write_gate.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(StoreError::TransactionFailed)?;
        let items = sqlx::query(
            "DELETE FROM items WHERE account = ?1 RETURNING id, server_path, name, etag",
        )
        .bind(account)
        .fetch_all(&mut *tx)
        .await
        .map_err(StoreError::TransactionFailed)?;
        let directories =
            sqlx::query("DELETE FROM directories WHERE account = ?1 RETURNING id, path, etag")
                .bind(account)
                .fetch_all(&mut *tx)
                .await
                .map_err(StoreError::TransactionFailed)?;
        sqlx::query("DELETE FROM local_files WHERE account = ?1")
            .bind(account)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::TransactionFailed)?;
        tx.commit().await.map_err(StoreError::TransactionFailed)?;

        let mut events = Vec::with_capacity(items.len() + directories.len());
        for row in &items {
            let server_path: String = row.try_get("server_path")?;
            let name: String = row.try_get("name")?;
            events.push(StoreEvent {
                kind: EventKind::Deleted,
                record: RecordKind::Item,
                account: account.to_string(),
                id: row.try_get("id")?,
                path: join_remote_path(&server_path, &name),
                etag: row.try_get("etag")?,
            });
        }
        for row in &directories {
            events.push(StoreEvent {
                kind: EventKind::Deleted,
                record: RecordKind::Directory,
                account: account.to_string(),
                id: row.try_get("id")?,
                path: row.try_get("path")?,
                etag: row.try_get("etag")?,
            });
        }
        self.publish(events);
        Ok(())
    }

    pub async fn get_local_file(
        &self,
        account: &str,
        id: &str,
    ) -> Result<Option<LocalFileRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT account, id, local_path, etag, exclude, offline, last_opened
             FROM local_files WHERE account = ?1 AND id = ?2",
        )
        .bind(account)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(LocalFileRecord {
            id: row.try_get("id")?,
            account: row.try_get("account")?,
            local_path: row.try_get("local_path")?,
            etag: row.try_get("etag")?,
            exclude: row.try_get("exclude")?,
            offline: row.try_get("offline")?,
            last_opened: row.try_get("last_opened")?,
        }))
    }

    pub async fn put_local_file(&self, record: &LocalFileRecord) -> Result<(), StoreError> {
        let _writer = self.write_gate.lock().await;
        sqlx::query(
            "INSERT INTO local_files (account, id, local_path, etag, exclude, offline, last_opened)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(account, id) DO UPDATE SET
                local_path = excluded.local_path,
                etag = excluded.etag,
                exclude = excluded.exclude,
                offline = excluded.offline,
                last_opened = excluded.last_opened",
        )
        .bind(&record.account)
        .bind(&record.id)
        .bind(&record.local_path)
        .bind(&record.etag)
        .bind(record.exclude)
        .bind(record.offline)
        .bind(record.last_opened)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_local_file(&self, account: &str, id: &str) -> Result<(), StoreError> {
        let _writer = self.write_gate.lock().await;
        sqlx::query("DELETE FROM local_files WHERE account = ?1 AND id = ?2")
            .bind(account)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn publish(&self, events: impl IntoIterator<Item = StoreEvent>) {
        for event in events {
            // No subscriber is not an error.
            let _ = self.events.send(event);
        }
    }
}

async fn apply_mutations(
    conn: &mut SqliteConnection,
    mutations: &[Mutation],
) -> Result<Vec<StoreEvent>, StoreError> {
    let mut events = Vec::with_capacity(mutations.len());
    for mutation in mutations {
        let event = match mutation {
            Mutation::PutItem(item) => put_item(conn, item).await?,
            Mutation::DeleteItem { account, id } => delete_item(conn, account, id).await?,
            Mutation::PutDirectory(directory) => put_directory(conn, directory, true).await?,
            Mutation::PutDirectoryAttributes(directory) => {
                put_directory(conn, directory, false).await?
            }
            Mutation::DeleteDirectory { account, id } => {
                delete_directory(conn, account, id).await?
            }
        };
        events.extend(event);
    }
    Ok(events)
}

async fn put_item(
    conn: &mut SqliteConnection,
    item: &ItemRecord,
) -> Result<Option<StoreEvent>, StoreError> {
    let current: Option<String> =
        sqlx::query_scalar("SELECT status FROM items WHERE account = ?1 AND id = ?2")
            .bind(&item.account)
            .bind(&item.id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(StoreError::TransactionFailed)?;
    if let Some(status) = current.as_deref()
        && !ItemStatus::parse(status)?.is_eligible_for_remote_overwrite()
    {
        return Ok(None);
    }

    let lock = item.lock.as_ref().map(serde_json::to_string).transpose()?;
    sqlx::query(UPSERT_ITEM)
        .bind(&item.account)
        .bind(&item.id)
        .bind(&item.server_path)
        .bind(&item.name)
        .bind(&item.display_name)
        .bind(item.is_directory)
        .bind(&item.etag)
        .bind(&item.file_id)
        .bind(item.status.as_str())
        .bind(item.size)
        .bind(&item.permissions)
        .bind(item.favorite)
        .bind(item.encrypted)
        .bind(item.has_preview)
        .bind(serde_json::to_string(&item.checksums)?)
        .bind(&item.content_type)
        .bind(item.classification.as_str())
        .bind(lock)
        .bind(item.created)
        .bind(item.modified)
        .bind(item.uploaded)
        .bind(&item.owner_id)
        .bind(&item.owner_display_name)
        .bind(serde_json::to_string(&item.share_permissions)?)
        .bind(serde_json::to_string(&item.share_types)?)
        .bind(item.quota_used_bytes)
        .bind(item.quota_available_bytes)
        .bind(&item.note)
        .bind(&item.rich_workspace)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::TransactionFailed)?;

    Ok(Some(StoreEvent {
        kind: if current.is_some() {
            EventKind::Updated
        } else {
            EventKind::Created
        },
        record: RecordKind::Item,
        account: item.account.clone(),
        id: item.id.clone(),
        path: item.full_path(),
        etag: item.etag.clone(),
    }))
}

async fn delete_item(
    conn: &mut SqliteConnection,
    account: &str,
    id: &str,
) -> Result<Option<StoreEvent>, StoreError> {
    let row = sqlx::query(
        "DELETE FROM items WHERE account = ?1 AND id = ?2 AND status = ?3
         RETURNING server_path, name, etag",
    )
    .bind(account)
    .bind(id)
    .bind(ItemStatus::Normal.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(StoreError::TransactionFailed)?;

    let Some(row) = row else {
        return Ok(None);
    };
    let server_path: String = row.try_get("server_path")?;
    let name: String = row.try_get("name")?;
    Ok(Some(StoreEvent {
        kind: EventKind::Deleted,
        record: RecordKind::Item,
        account: account.to_string(),
        id: id.to_string(),
        path: join_remote_path(&server_path, &name),
        etag: row.try_get("etag")?,
    }))
}

async fn put_directory(
    conn: &mut SqliteConnection,
    directory: &DirectoryRecord,
    overwrite_etag: bool,
) -> Result<Option<StoreEvent>, StoreError> {
    let existed: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM directories WHERE account = ?1 AND id = ?2")
            .bind(&directory.account)
            .bind(&directory.id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(StoreError::TransactionFailed)?;

    let etag_update = if overwrite_etag {
        "excluded.etag"
    } else {
        "directories.etag"
    };
    let etag: String = sqlx::query_scalar(&format!(
        "INSERT INTO directories (account, id, file_id, parent_path, path, etag, encrypted, favorite, permissions)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(account, id) DO UPDATE SET
            file_id = excluded.file_id,
            parent_path = excluded.parent_path,
            path = excluded.path,
            etag = {etag_update},
            encrypted = excluded.encrypted,
            favorite = excluded.favorite,
            permissions = excluded.permissions
         RETURNING etag"
    ))
    .bind(&directory.account)
    .bind(&directory.id)
    .bind(&directory.file_id)
    .bind(&directory.parent_path)
    .bind(&directory.path)
    .bind(&directory.etag)
    .bind(directory.encrypted)
    .bind(directory.favorite)
    .bind(&directory.permissions)
    .fetch_one(&mut *conn)
    .await
    .map_err(StoreError::TransactionFailed)?;

    Ok(Some(StoreEvent {
        kind: if existed.is_some() {
            EventKind::Updated
        } else {
            EventKind::Created
        },
        record: RecordKind::Directory,
        account: directory.account.clone(),
        id: directory.id.clone(),
        path: directory.path.clone(),
        etag,
    }))
}

async fn delete_directory(
    conn: &mut SqliteConnection,
    account: &str,
    id: &str,
) -> Result<Option<StoreEvent>, StoreError> {
    let row = sqlx::query(
        "DELETE FROM directories WHERE account = ?1 AND id = ?2 RETURNING path, etag",
    )
    .bind(account)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(StoreError::TransactionFailed)?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(StoreEvent {
        kind: EventKind::Deleted,
        record: RecordKind::Directory,
        account: account.to_string(),
        id: id.to_string(),
        path: row.try_get("path")?,
        etag: row.try_get("etag")?,
    }))
}

fn item_from_row(row: &SqliteRow) -> Result<ItemRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let classification: String = row.try_get("classification")?;
    let checksums: String = row.try_get("checksums")?;
    let share_permissions: String = row.try_get("share_permissions")?;
    let share_types: String = row.try_get("share_types")?;
    let lock: Option<String> = row.try_get("lock")?;

    Ok(ItemRecord {
        id: row.try_get("id")?,
        account: row.try_get("account")?,
        server_path: row.try_get("server_path")?,
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        is_directory: row.try_get("is_directory")?,
        etag: row.try_get("etag")?,
        file_id: row.try_get("file_id")?,
        status: ItemStatus::parse(&status)?,
        size: row.try_get("size")?,
        permissions: row.try_get("permissions")?,
        favorite: row.try_get("favorite")?,
        encrypted: row.try_get("encrypted")?,
        has_preview: row.try_get("has_preview")?,
        checksums: serde_json::from_str(&checksums)?,
        content_type: row.try_get("content_type")?,
        classification: classification
            .parse()
            .map_err(|_| StoreError::InvalidColumn {
                column: "classification",
                value: classification.clone(),
            })?,
        lock: lock.as_deref().map(serde_json::from_str).transpose()?,
        created: row.try_get("created")?,
        modified: row.try_get("modified")?,
        uploaded: row.try_get("uploaded")?,
        owner_id: row.try_get("owner_id")?,
        owner_display_name: row.try_get("owner_display_name")?,
        share_permissions: serde_json::from_str(&share_permissions)?,
        share_types: serde_json::from_str(&share_types)?,
        quota_used_bytes: row.try_get("quota_used_bytes")?,
        quota_available_bytes: row.try_get("quota_available_bytes")?,
        note: row.try_get("note")?,
        rich_workspace: row.try_get("rich_workspace")?,
    })
}

fn directory_from_row(row: &SqliteRow) -> Result<DirectoryRecord, StoreError> {
    Ok(DirectoryRecord {
        id: row.try_get("id")?,
        account: row.try_get("account")?,
        file_id: row.try_get("file_id")?,
        parent_path: row.try_get("parent_path")?,
        path: row.try_get("path")?,
        etag: row.try_get("etag")?,
        encrypted: row.try_get("encrypted")?,
        favorite: row.try_get("favorite")?,
        permissions: row.try_get("permissions")?,
    })
}

pub fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("cloudmirror");
    path.push("metadata.db");
    Ok(path)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
