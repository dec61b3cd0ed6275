use std::fs;
use std::path::Path;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Etag marker that forces the next sync to re-list a directory instead of
/// trusting what the journal remembers about it.
pub const INVALID_ETAG: &str = "_invalid_";

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid item type: {0}")]
    InvalidItemType(String),
}

/// The part of the journal selective sync needs: after the excluded set
/// changes, cached state under the changed paths must not be trusted.
#[async_trait]
pub trait SyncJournal: Send + Sync {
    async fn avoid_read_from_db_on_next_sync(&self, path: &str) -> Result<(), JournalError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    File,
    Dir,
}

impl ItemType {
    fn as_str(&self) -> &'static str {
        match self {
            ItemType::File => "file",
            ItemType::Dir => "dir",
        }
    }

    fn parse(value: &str) -> Result<Self, JournalError> {
        match value {
            "file" => Ok(ItemType::File),
            "dir" => Ok(ItemType::Dir),
            other => Err(JournalError::InvalidItemType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    pub path: String,
    pub item_type: ItemType,
    pub etag: String,
    pub size: i64,
}

impl MetadataRecord {
    pub fn is_trusted(&self) -> bool {
        self.etag != INVALID_ETAG
    }
}

#[derive(Debug, Clone)]
pub struct SyncJournalDb {
    pool: SqlitePool,
}

impl SyncJournalDb {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(db_path: &Path) -> Result<Self, JournalError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let journal = Self { pool };
        journal.init().await?;
        Ok(journal)
    }

    pub async fn init(&self) -> Result<(), JournalError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn upsert_metadata(&self, record: &MetadataRecord) -> Result<(), JournalError> {
        sqlx::query(
            "INSERT INTO metadata (path, item_type, etag, size) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                item_type = excluded.item_type,
                etag = excluded.etag,
                size = excluded.size",
        )
        .bind(normalize(&record.path))
        .bind(record.item_type.as_str())
        .bind(&record.etag)
        .bind(record.size)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_metadata(&self, path: &str) -> Result<Option<MetadataRecord>, JournalError> {
        let row = sqlx::query("SELECT path, item_type, etag, size FROM metadata WHERE path = ?1")
            .bind(normalize(path))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(MetadataRecord {
                path: row.get("path"),
                item_type: ItemType::parse(row.get::<String, _>("item_type").as_str())?,
                etag: row.get("etag"),
                size: row.get("size"),
            })
        })
        .transpose()
    }

    /// Invalidates the directory at `path` and every ancestor directory, so
    /// the next sync rediscovers whatever was just moved in or out of the
    /// excluded set. An empty or `/` path invalidates every directory.
    pub async fn invalidate_directory_chain(&self, path: &str) -> Result<u64, JournalError> {
        let path = normalize(path);
        let result = if path.is_empty() {
            sqlx::query("UPDATE metadata SET etag = ?1 WHERE item_type = 'dir'")
                .bind(INVALID_ETAG)
                .execute(&self.pool)
                .await?
        } else {
            sqlx::query(
                "UPDATE metadata SET etag = ?1
                 WHERE item_type = 'dir'
                   AND (path = ?2 OR path = '' OR substr(?2, 1, length(path) + 1) = path || '/')",
            )
            .bind(INVALID_ETAG)
            .bind(path)
            .execute(&self.pool)
            .await?
        };
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SyncJournal for SyncJournalDb {
    async fn avoid_read_from_db_on_next_sync(&self, path: &str) -> Result<(), JournalError> {
        self.invalidate_directory_chain(path).await?;
        Ok(())
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
