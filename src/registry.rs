//! Durable per-project state: the file registry and the conversation log.
//!
//! The registry is a SQLite database (`.openbook/registry.sqlite`) accessed
//! through `sqlx`. The engine's public surface is synchronous, so the
//! [`Registry`] owns a current-thread Tokio runtime and drives every query
//! to completion with `block_on`. It must therefore not be used from inside
//! another async runtime.
//!
//! # Tables
//!
//! | Table | Key | Columns |
//! |-------|-----|---------|
//! | `file_registry` | `filename` | `file_hash`, `last_modified` (REAL, epoch secs), `indexed_at` (INTEGER) |
//! | `chat_history` | `id` (autoincrement) | `role`, `content`, `timestamp` (INTEGER) |

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

use crate::error::{EngineError, Result};
use crate::models::{ChatMessage, FileState, Role};
use crate::{db, migrate};

/// Copies the conversation log out of an attached pre-Openbook database.
/// That schema stored `CURRENT_TIMESTAMP` text, converted here to epoch
/// seconds.
const LEGACY_HISTORY_IMPORT: &str = r#"
    INSERT INTO chat_history (role, content, timestamp)
    SELECT role,
           COALESCE(content, ''),
           CASE WHEN typeof(timestamp) = 'text'
                THEN COALESCE(CAST(strftime('%s', timestamp) AS INTEGER), 0)
                ELSE COALESCE(CAST(timestamp AS INTEGER), 0)
           END
    FROM legacy.chat_history
    WHERE role IN ('system', 'user', 'assistant')
    ORDER BY id ASC
"#;

pub struct Registry {
    runtime: Runtime,
    pool: SqlitePool,
    path: PathBuf,
}

impl Registry {
    /// Opens the registry at `path`, creating and migrating it as needed.
    pub fn open(path: &Path) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let pool = runtime.block_on(async {
            let pool = db::connect(path).await?;
            migrate::run_migrations(&pool).await?;
            Ok::<_, EngineError>(pool)
        })?;

        tracing::debug!(path = %path.display(), "registry opened");

        Ok(Self {
            runtime,
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_file_state(&self, filename: &str) -> Result<Option<FileState>> {
        let row = self.runtime.block_on(
            sqlx::query(
                "SELECT filename, file_hash, last_modified, indexed_at \
                 FROM file_registry WHERE filename = ?",
            )
                .bind(filename)
                .fetch_optional(&self.pool),
        )?;

        row.map(|r| file_state_from_row(&r)).transpose()
    }

    /// Inserts or overwrites the entry for `filename` and stamps `indexed_at`.
    pub fn upsert_file_state(&self, filename: &str, content_hash: &str, mtime: f64) -> Result<()> {
        let now = Utc::now().timestamp();
        self.runtime.block_on(
            sqlx::query(
                r#"
                INSERT INTO file_registry (filename, file_hash, last_modified, indexed_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(filename) DO UPDATE SET
                    file_hash = excluded.file_hash,
                    last_modified = excluded.last_modified,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(filename)
            .bind(content_hash)
            .bind(mtime)
            .bind(now)
            .execute(&self.pool),
        )?;
        Ok(())
    }

    /// Records a new mtime for a file whose content is unchanged.
    pub fn update_mtime(&self, filename: &str, mtime: f64) -> Result<()> {
        self.runtime.block_on(
            sqlx::query("UPDATE file_registry SET last_modified = ? WHERE filename = ?")
                .bind(mtime)
                .bind(filename)
                .execute(&self.pool),
        )?;
        Ok(())
    }

    pub fn list_file_states(&self) -> Result<Vec<FileState>> {
        let rows = self.runtime.block_on(
            sqlx::query(
                "SELECT filename, file_hash, last_modified, indexed_at \
                 FROM file_registry ORDER BY filename ASC",
            )
            .fetch_all(&self.pool),
        )?;

        rows.iter().map(file_state_from_row).collect()
    }

    /// Forgets every tracked file. Used before a full rebuild.
    pub fn clear_file_states(&self) -> Result<u64> {
        let result = self
            .runtime
            .block_on(sqlx::query("DELETE FROM file_registry").execute(&self.pool))?;
        Ok(result.rows_affected())
    }

    /// Appends a turn to the conversation log and returns its id.
    pub fn append_message(&self, role: Role, content: &str) -> Result<i64> {
        let now = Utc::now().timestamp();
        let result = self.runtime.block_on(
            sqlx::query("INSERT INTO chat_history (role, content, timestamp) VALUES (?, ?, ?)")
                .bind(role.as_str())
                .bind(content)
                .bind(now)
                .execute(&self.pool),
        )?;
        Ok(result.last_insert_rowid())
    }

    /// Full conversation log in insertion order.
    pub fn read_history(&self) -> Result<Vec<ChatMessage>> {
        let rows = self.runtime.block_on(
            sqlx::query("SELECT id, role, content, timestamp FROM chat_history ORDER BY id ASC")
                .fetch_all(&self.pool),
        )?;

        rows.iter()
            .map(|row| {
                let role: String = row.try_get("role")?;
                let role = role
                    .parse::<Role>()
                    .map_err(|e| EngineError::Registry(sqlx::Error::Decode(e.into())))?;
                let ts: Option<i64> = row.try_get("timestamp")?;
                Ok(ChatMessage {
                    id: row.try_get("id")?,
                    role,
                    content: row.try_get("content")?,
                    timestamp: ts
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Imports the conversation log of a project database written by the
    /// earlier desktop app (`project_dependency/project_data.db`). Rows with
    /// an unknown role are skipped. Returns the number of messages imported.
    ///
    /// File state is not imported: those hashes were MD5 and the vectors
    /// lived in a different index format, so the files are re-synced.
    pub fn import_history(&self, legacy_db: &Path) -> Result<u64> {
        let legacy = legacy_db.to_string_lossy().to_string();
        self.runtime.block_on(async {
            let mut conn = self.pool.acquire().await?;
            sqlx::query("ATTACH DATABASE ? AS legacy")
                .bind(&legacy)
                .execute(&mut *conn)
                .await?;
            let imported = sqlx::query(LEGACY_HISTORY_IMPORT)
                .execute(&mut *conn)
                .await;
            sqlx::query("DETACH DATABASE legacy")
                .execute(&mut *conn)
                .await?;
            Ok::<_, EngineError>(imported?.rows_affected())
        })
    }

    pub fn message_count(&self) -> Result<i64> {
        let count: i64 = self.runtime.block_on(
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_history").fetch_one(&self.pool),
        )?;
        Ok(count)
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.runtime.block_on(self.pool.close());
    }
}

fn file_state_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<FileState> {
    Ok(FileState {
        filename: row.try_get("filename")?,
        content_hash: row.try_get("file_hash")?,
        last_modified: row.try_get("last_modified")?,
        indexed_at: row.try_get("indexed_at")?,
    })
}
