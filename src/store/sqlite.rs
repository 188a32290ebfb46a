//! SQLite-backed [`VectorStore`].
//!
//! One table per index. Vectors are stored as little-endian `f32` BLOBs
//! next to the chunk text and its location.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::db;
use crate::models::VectorRow;

use super::{check_dims, vec_to_blob, VectorStore};

pub struct SqliteVectorStore {
    pool: SqlitePool,
    table: String,
    dims: usize,
}

impl SqliteVectorStore {
    /// Open the table `table` in the database at `path`, creating both if
    /// they do not exist yet.
    ///
    /// `table` must be a plain SQL identifier; config validation enforces
    /// this before the name reaches a query.
    pub async fn open_or_create(path: &Path, table: &str, dims: usize) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("failed to open vector store at {}", path.display()))?;

        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&pool)
        .await?;

        if exists {
            debug!(table, "opened existing table");
        } else {
            sqlx::query(&format!(
                r#"
                CREATE TABLE {table} (
                    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    chunk_id TEXT NOT NULL,
                    vector BLOB NOT NULL,
                    dims INTEGER NOT NULL,
                    text TEXT NOT NULL,
                    file TEXT NOT NULL,
                    language TEXT NOT NULL,
                    start_line INTEGER NOT NULL,
                    end_line INTEGER NOT NULL,
                    content_hash TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )
                "#
            ))
            .execute(&pool)
            .await
            .with_context(|| format!("failed to create table '{}'", table))?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_file ON {table}(file)"
            ))
            .execute(&pool)
            .await?;

            info!(table, dims, "created vector table");
        }

        Ok(Self {
            pool,
            table: table.to_string(),
            dims,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn append(&self, row: &VectorRow) -> Result<()> {
        check_dims(self.dims, row)?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (chunk_id, vector, dims, text, file, language, start_line, end_line, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            self.table
        ))
        .bind(&row.chunk_id)
        .bind(vec_to_blob(&row.vector))
        .bind(row.vector.len() as i64)
        .bind(&row.text)
        .bind(&row.file)
        .bind(&row.language)
        .bind(row.start_line as i64)
        .bind(row.end_line as i64)
        .bind(&row.content_hash)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_rows(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
