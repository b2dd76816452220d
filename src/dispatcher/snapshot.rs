//! Queue snapshots taken at shutdown.
//!
//! Queued and in-flight items are written to `dispatch_queue_snapshot` so a
//! later process can pick them up again. A snapshot is consumed by the first
//! restore, fresh or not.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::item::{WorkItem, WorkKind};
use super::DispatchError;
use crate::repository::migrations::run_migrations;
use crate::repository::util::{parse_datetime, sqlite_path};

/// One persisted work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotItem {
    pub id: String,
    pub kind: WorkKind,
    pub identity: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl From<&WorkItem> for SnapshotItem {
    fn from(item: &WorkItem) -> Self {
        Self {
            id: item.id.clone(),
            kind: item.kind,
            identity: item.identity.clone(),
            payload: item.payload.clone(),
            attempts: item.attempts,
            enqueued_at: item.enqueued_at,
        }
    }
}

/// SQLite-backed snapshot store.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    path: String,
}

impl QueueSnapshot {
    /// Open the snapshot table, applying migrations first.
    pub async fn open(database_url: &str) -> Result<Self, DispatchError> {
        run_migrations(database_url).await?;
        Ok(Self {
            path: sqlite_path(database_url).to_string(),
        })
    }

    /// Replace any existing snapshot with `items`.
    pub async fn save(&self, items: Vec<SnapshotItem>) -> Result<usize, DispatchError> {
        let path = self.path.clone();
        let saved_at = Utc::now().to_rfc3339();
        let rows = items
            .iter()
            .map(|item| Ok((item, serde_json::to_string(&item.payload)?)))
            .collect::<Result<Vec<_>, serde_json::Error>>()?
            .into_iter()
            .map(|(item, payload)| {
                (
                    item.id.clone(),
                    item.kind.as_str(),
                    item.identity.clone(),
                    payload,
                    item.attempts,
                    item.enqueued_at.to_rfc3339(),
                )
            })
            .collect::<Vec<_>>();

        blocking(move || {
            let mut conn = Connection::open(&path)?;
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM dispatch_queue_snapshot", [])?;
            for (id, kind, identity, payload, attempts, enqueued_at) in &rows {
                tx.execute(
                    "INSERT INTO dispatch_queue_snapshot
                        (id, kind, identity, payload, attempts, enqueued_at, saved_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![id, kind, identity, payload, attempts, enqueued_at, saved_at],
                )?;
            }
            tx.commit()?;
            Ok(rows.len())
        })
        .await
    }

    /// Take the stored snapshot if it is younger than `ttl`.
    ///
    /// Stale snapshots are discarded and yield an empty list.
    pub async fn restore(&self, ttl: Duration) -> Result<Vec<SnapshotItem>, DispatchError> {
        let path = self.path.clone();
        let rows = blocking(move || {
            let mut conn = Connection::open(&path)?;
            let tx = conn.transaction()?;
            let rows = {
                let mut stmt = tx.prepare(
                    "SELECT id, kind, identity, payload, attempts, enqueued_at, saved_at
                     FROM dispatch_queue_snapshot ORDER BY rowid ASC",
                )?;
                let mapped = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })?;
                mapped.collect::<rusqlite::Result<Vec<_>>>()?
            };
            tx.execute("DELETE FROM dispatch_queue_snapshot", [])?;
            tx.commit()?;
            Ok(rows)
        })
        .await?;

        let Some(saved_at) = rows.iter().map(|r| parse_datetime(&r.6)).min() else {
            return Ok(Vec::new());
        };
        let age = (Utc::now() - saved_at).to_std().unwrap_or(Duration::ZERO);
        if age >= ttl {
            warn!(
                "Discarding queue snapshot of {} item(s) saved {}s ago",
                rows.len(),
                age.as_secs()
            );
            return Ok(Vec::new());
        }

        let mut items = Vec::with_capacity(rows.len());
        for (id, kind, identity, payload, attempts, enqueued_at, _) in rows {
            let Some(kind) = WorkKind::from_str(&kind) else {
                warn!("Skipping snapshot item {} with unknown kind {}", id, kind);
                continue;
            };
            items.push(SnapshotItem {
                id,
                kind,
                identity,
                payload: serde_json::from_str(&payload)?,
                attempts,
                enqueued_at: parse_datetime(&enqueued_at),
            });
        }
        info!("Restored {} queued item(s)", items.len());
        Ok(items)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, DispatchError>
where
    T: Send + 'static,
    F: FnOnce() -> rusqlite::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DispatchError::Worker(e.to_string()))?
        .map_err(DispatchError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn item(id: &str) -> SnapshotItem {
        SnapshotItem {
            id: id.to_string(),
            kind: WorkKind::Analysis,
            identity: "ada".to_string(),
            payload: serde_json::json!({ "strict": true }),
            attempts: 1,
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_restore_consumes_fresh_snapshot() {
        let dir = tempdir().unwrap();
        let url = dir.path().join("queue.db").display().to_string();
        let snapshot = QueueSnapshot::open(&url).await.unwrap();

        assert_eq!(snapshot.save(vec![item("a"), item("b")]).await.unwrap(), 2);
        let restored = snapshot.restore(Duration::from_secs(300)).await.unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].payload["strict"], true);

        assert!(snapshot
            .restore(Duration::from_secs(300))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_discarded() {
        let dir = tempdir().unwrap();
        let url = dir.path().join("queue.db").display().to_string();
        let snapshot = QueueSnapshot::open(&url).await.unwrap();

        snapshot.save(vec![item("a")]).await.unwrap();
        assert!(snapshot.restore(Duration::ZERO).await.unwrap().is_empty());
        // Discarding also clears it.
        assert!(snapshot
            .restore(Duration::from_secs(300))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_save_replaces_previous_snapshot() {
        let dir = tempdir().unwrap();
        let url = dir.path().join("queue.db").display().to_string();
        let snapshot = QueueSnapshot::open(&url).await.unwrap();

        snapshot.save(vec![item("a"), item("b")]).await.unwrap();
        snapshot.save(vec![item("c")]).await.unwrap();
        let restored = snapshot.restore(Duration::from_secs(300)).await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].id, "c");
    }
}
