//! SQLite side of the store: which documents live in which table, and the
//! persisted row-id counter of every table.
//!
//! The catalog owns a single connection so that `BEGIN IMMEDIATE` … `COMMIT`
//! brackets everything the vector store does inside one write.

#[cfg(test)]
mod tests;

use std::ops::Range;
use std::path::Path;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, FromRow};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{RagError, Result};

/// One document's footprint in one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub table_name: String,
    pub chunk_count: u64,
    pub first_row_id: u64,
    pub last_row_id: u64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: String,
    table_name: String,
    chunk_count: i64,
    first_row_id: i64,
    last_row_id: i64,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl DocumentRow {
    fn into_record(self) -> Option<DocumentRecord> {
        let id = match Uuid::parse_str(&self.id) {
            Ok(id) => id,
            Err(e) => {
                warn!("Skipping catalog row with malformed id {:?}: {}", self.id, e);
                return None;
            }
        };
        Some(DocumentRecord {
            id,
            table_name: self.table_name,
            chunk_count: u64::try_from(self.chunk_count).unwrap_or_default(),
            first_row_id: u64::try_from(self.first_row_id).unwrap_or_default(),
            last_row_id: u64::try_from(self.last_row_id).unwrap_or_default(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn db_error(action: &str) -> impl FnOnce(sqlx::Error) -> RagError + '_ {
    move |e| RagError::Database(format!("Failed to {action}: {e}"))
}

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| RagError::Database(format!("row id {value} exceeds SQLite integer range")))
}

#[derive(Debug)]
pub struct Catalog {
    connection: SqliteConnection,
}

impl Catalog {
    /// Open (or create) the catalog; `None` keeps it in memory
    #[inline]
    pub async fn open(path: Option<&Path>) -> Result<Self> {
        let options = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
            }
            None => "sqlite::memory:"
                .parse::<SqliteConnectOptions>()
                .map_err(db_error("configure in-memory catalog"))?,
        };

        let connection = options
            .connect()
            .await
            .map_err(db_error("open catalog database"))?;
        let mut catalog = Self { connection };
        catalog.run_migrations().await?;
        Ok(catalog)
    }

    async fn run_migrations(&mut self) -> Result<()> {
        info!("Running catalog migrations");
        sqlx::migrate!("src/database/catalog/migrations")
            .run(&mut self.connection)
            .await
            .map_err(|e| RagError::Database(format!("Failed to run catalog migrations: {e}")))?;
        debug!("Catalog migrations completed successfully");
        Ok(())
    }

    /// Take the database write lock up front
    #[inline]
    pub async fn begin(&mut self) -> Result<()> {
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut self.connection)
            .await
            .map_err(db_error("begin transaction"))?;
        Ok(())
    }

    #[inline]
    pub async fn commit(&mut self) -> Result<()> {
        sqlx::query("COMMIT")
            .execute(&mut self.connection)
            .await
            .map_err(db_error("commit transaction"))?;
        Ok(())
    }

    /// Best effort; a failed rollback is logged, the caller reports the original error
    #[inline]
    pub async fn rollback(&mut self) {
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut self.connection).await {
            warn!("Failed to roll back catalog transaction: {}", e);
        }
    }

    /// Persisted next row id for `table`, if the table has ever handed one out
    #[inline]
    pub async fn next_row_id(&mut self, table: &str) -> Result<Option<u64>> {
        let next: Option<i64> =
            sqlx::query_scalar("SELECT next_row_id FROM row_counters WHERE table_name = ?")
                .bind(table)
                .fetch_optional(&mut self.connection)
                .await
                .map_err(db_error("read row counter"))?;
        Ok(next.and_then(|n| u64::try_from(n).ok()))
    }

    #[inline]
    pub async fn set_next_row_id(&mut self, table: &str, next: u64) -> Result<()> {
        sqlx::query(
            "INSERT INTO row_counters (table_name, next_row_id) VALUES (?, ?)
             ON CONFLICT(table_name) DO UPDATE SET next_row_id = excluded.next_row_id",
        )
        .bind(table)
        .bind(to_sql_int(next)?)
        .execute(&mut self.connection)
        .await
        .map_err(db_error("update row counter"))?;
        Ok(())
    }

    /// Add a block of rows to a document's footprint, creating it if needed
    #[inline]
    pub async fn record_document(&mut self, id: Uuid, table: &str, rows: Range<u64>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let now = Utc::now().naive_utc();
        let count = rows.end - rows.start;

        sqlx::query(
            "INSERT INTO documents
                 (id, table_name, chunk_count, first_row_id, last_row_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id, table_name) DO UPDATE SET
                 chunk_count = chunk_count + excluded.chunk_count,
                 first_row_id = MIN(first_row_id, excluded.first_row_id),
                 last_row_id = MAX(last_row_id, excluded.last_row_id),
                 updated_at = excluded.updated_at",
        )
        .bind(id.to_string())
        .bind(table)
        .bind(to_sql_int(count)?)
        .bind(to_sql_int(rows.start)?)
        .bind(to_sql_int(rows.end - 1)?)
        .bind(now)
        .bind(now)
        .execute(&mut self.connection)
        .await
        .map_err(db_error("record document"))?;
        Ok(())
    }

    #[inline]
    pub async fn documents(&mut self, table: &str) -> Result<Vec<DocumentRecord>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT id, table_name, chunk_count, first_row_id, last_row_id, created_at, updated_at
             FROM documents WHERE table_name = ? ORDER BY created_at, id",
        )
        .bind(table)
        .fetch_all(&mut self.connection)
        .await
        .map_err(db_error("list documents"))?;

        Ok(rows.into_iter().filter_map(DocumentRow::into_record).collect())
    }

    /// Returns whether the document was known
    #[inline]
    pub async fn remove_document(&mut self, id: Uuid, table: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ? AND table_name = ?")
            .bind(id.to_string())
            .bind(table)
            .execute(&mut self.connection)
            .await
            .map_err(db_error("remove document"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Forget a table's documents and its row counter
    #[inline]
    pub async fn remove_table(&mut self, table: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE table_name = ?")
            .bind(table)
            .execute(&mut self.connection)
            .await
            .map_err(db_error("remove table documents"))?;
        sqlx::query("DELETE FROM row_counters WHERE table_name = ?")
            .bind(table)
            .execute(&mut self.connection)
            .await
            .map_err(db_error("remove row counter"))?;
        Ok(())
    }

    #[inline]
    pub async fn remove_all(&mut self) -> Result<()> {
        sqlx::query("DELETE FROM documents")
            .execute(&mut self.connection)
            .await
            .map_err(db_error("clear documents"))?;
        sqlx::query("DELETE FROM row_counters")
            .execute(&mut self.connection)
            .await
            .map_err(db_error("clear row counters"))?;
        Ok(())
    }
}
