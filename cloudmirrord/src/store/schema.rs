use sqlx::SqlitePool;

use super::StoreError;

pub const SCHEMA_VERSION: i64 = 1;

const TABLES: [&str; 3] = ["items", "directories", "local_files"];

const STATEMENTS: &[&str] = &[
    "CREATE TABLE items (
        account TEXT NOT NULL,
        id TEXT NOT NULL,
        server_path TEXT NOT NULL,
        name TEXT NOT NULL,
        display_name TEXT NOT NULL,
        is_directory INTEGER NOT NULL,
        etag TEXT NOT NULL,
        file_id TEXT NOT NULL,
        status TEXT NOT NULL,
        size INTEGER NOT NULL,
        permissions TEXT NOT NULL,
        favorite INTEGER NOT NULL,
        encrypted INTEGER NOT NULL,
        has_preview INTEGER NOT NULL,
        checksums TEXT NOT NULL,
        content_type TEXT NOT NULL,
        classification TEXT NOT NULL,
        lock TEXT,
        created INTEGER NOT NULL,
        modified INTEGER NOT NULL,
        uploaded INTEGER NOT NULL,
        owner_id TEXT NOT NULL,
        owner_display_name TEXT NOT NULL,
        share_permissions TEXT NOT NULL,
        share_types TEXT NOT NULL,
        quota_used_bytes INTEGER NOT NULL,
        quota_available_bytes INTEGER NOT NULL,
        note TEXT NOT NULL,
        rich_workspace TEXT,
        PRIMARY KEY (account, id)
    )",
    "CREATE INDEX idx_items_scope ON items(account, server_path, name)",
    "CREATE TABLE directories (
        account TEXT NOT NULL,
        id TEXT NOT NULL,
        file_id TEXT NOT NULL,
        parent_path TEXT NOT NULL,
        path TEXT NOT NULL,
        etag TEXT NOT NULL,
        encrypted INTEGER NOT NULL,
        favorite INTEGER NOT NULL,
        permissions TEXT NOT NULL,
        PRIMARY KEY (account, id)
    )",
    "CREATE INDEX idx_directories_parent ON directories(account, parent_path, path)",
    "CREATE INDEX idx_directories_path ON directories(account, path)",
    "CREATE TABLE local_files (
        account TEXT NOT NULL,
        id TEXT NOT NULL,
        local_path TEXT NOT NULL,
        etag TEXT NOT NULL,
        exclude INTEGER NOT NULL,
        offline INTEGER NOT NULL,
        last_opened INTEGER,
        PRIMARY KEY (account, id)
    )",
];

/// Creates the schema on a fresh database and refuses anything else that
/// does not carry `SCHEMA_VERSION`. There is no migration path.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    let found: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .map_err(StoreError::Unavailable)?;

    if found == SCHEMA_VERSION {
        return Ok(());
    }
    if found != 0 || has_foreign_tables(pool).await? {
        return Err(StoreError::SchemaVersionMismatch {
            found,
            expected: SCHEMA_VERSION,
        });
    }

    let mut tx = pool.begin().await.map_err(StoreError::Unavailable)?;
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Unavailable)?;
    }
    sqlx::query(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
        .execute(&mut *tx)
        .await
        .map_err(StoreError::Unavailable)?;
    tx.commit().await.map_err(StoreError::Unavailable)?;
    Ok(())
}

async fn has_foreign_tables(pool: &SqlitePool) -> Result<bool, StoreError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN (?1, ?2, ?3)",
    )
    .bind(TABLES[0])
    .bind(TABLES[1])
    .bind(TABLES[2])
    .fetch_one(pool)
    .await
    .map_err(StoreError::Unavailable)?;
    Ok(count > 0)
}
