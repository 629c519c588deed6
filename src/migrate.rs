use sqlx::SqlitePool;

use crate::error::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create file registry table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_registry (
            filename TEXT PRIMARY KEY,
            file_hash TEXT NOT NULL,
            last_modified REAL,
            indexed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create chat history table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
