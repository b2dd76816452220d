//! Schema migrations.
//!
//! Migrations are plain SQL applied in order through rusqlite on a blocking
//! task. Applied versions are recorded in `schema_migrations`.

use rusqlite::{params, Connection};
use tracing::info;

use super::pool::DbError;
use super::util::{sqlite_path, to_diesel_error};

/// Ordered (version, SQL) pairs.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_analysis_jobs",
        r#"
        CREATE TABLE IF NOT EXISTS analysis_jobs (
            id TEXT PRIMARY KEY,
            identity TEXT NOT NULL,
            total_stages INTEGER NOT NULL,
            processed_stages INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_analysis_jobs_identity ON analysis_jobs(identity);

        CREATE TABLE IF NOT EXISTS analysis_stage_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL REFERENCES analysis_jobs(id) ON DELETE CASCADE,
            stage_index INTEGER NOT NULL,
            item_count INTEGER NOT NULL,
            status TEXT NOT NULL,
            payload TEXT,
            error TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(job_id, stage_index)
        );
        "#,
    ),
    (
        "0002_dispatch_queue_snapshot",
        r#"
        CREATE TABLE IF NOT EXISTS dispatch_queue_snapshot (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            identity TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            enqueued_at TEXT NOT NULL,
            saved_at TEXT NOT NULL
        );
        "#,
    ),
];

/// Apply pending migrations to an open connection. Returns the versions applied.
pub fn apply(conn: &Connection) -> rusqlite::Result<Vec<&'static str>> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let mut applied = Vec::new();
    for (version, sql) in MIGRATIONS {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
            params![version],
            |row| row.get(0),
        )?;
        if exists {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, chrono::Utc::now().to_rfc3339()],
        )?;
        applied.push(*version);
    }
    Ok(applied)
}

/// Run pending migrations for a database URL on a blocking task.
pub async fn run_migrations(database_url: &str) -> Result<(), DbError> {
    let path = sqlite_path(database_url).to_string();

    tokio::task::spawn_blocking(move || {
        let conn = Connection::open(&path).map_err(to_diesel_error)?;
        let applied = apply(&conn).map_err(to_diesel_error)?;

        for version in &applied {
            info!("Applied migration: {}", version);
        }
        if applied.is_empty() {
            info!("No pending migrations");
        }
        Ok(())
    })
    .await
    .map_err(to_diesel_error)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let first = apply(&conn).unwrap();
        assert_eq!(first.len(), MIGRATIONS.len());
        assert!(apply(&conn).unwrap().is_empty());

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
                 AND name IN ('analysis_jobs', 'analysis_stage_results', 'dispatch_queue_snapshot')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
