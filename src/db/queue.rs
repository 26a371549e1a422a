//! Queue Protocol: atomic claim, completion, error, stuck-reset.
//!
//! `claim_next` is the one operation in this module that must serialize
//! correctly across concurrent worker processes. It is implemented as a
//! single statement built on `FOR UPDATE SKIP LOCKED`, the same row-level
//! locking primitive used for the dequeue step in
//! `other_examples/...codetriever...worker.rs.rs`, adapted here from a
//! two-level chunk queue down to the single claim/complete/fail model this
//! service needs.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Database;

#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    pub photo_id: String,
    pub priority: i32,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub done: i64,
    pub error: i64,
}

impl Database {
    /// Atomically selects the highest-priority, oldest pending row, skipping
    /// rows locked by a concurrent claimer, and transitions it to
    /// `processing`. Returns `Ok(None)` when the queue is empty.
    ///
    /// If the referenced photo no longer exists or isn't `ready`, the work
    /// item is silently marked `done` and `Ok(None)` is returned, so the
    /// caller simply advances — this is not treated as an error.
    pub fn claim_next(&self) -> Result<Option<WorkItem>> {
        let mut conn = self.conn()?;
        let mut txn = conn.transaction().context("begin claim_next transaction")?;

        let row = txn
            .query_opt(
                r#"
                SELECT q.photo_id, q.priority, q.attempts, q.created_at, p.status
                FROM ai_queue q
                LEFT JOIN photos p ON p.id = q.photo_id
                WHERE q.status = 'pending'
                ORDER BY q.priority DESC, q.created_at ASC
                LIMIT 1
                FOR UPDATE OF q SKIP LOCKED
                "#,
                &[],
            )
            .context("select next pending queue row")?;

        let Some(row) = row else {
            txn.commit().context("commit empty claim_next")?;
            return Ok(None);
        };

        let photo_id: String = row.get(0);
        let priority: i32 = row.get(1);
        let attempts: i32 = row.get(2);
        let created_at: DateTime<Utc> = row.get(3);
        let photo_status: Option<String> = row.get(4);

        // No matching `photos` row (photo deleted) or present-but-not-`ready`:
        // silently complete the queue entry rather than surface it to the worker.
        if photo_status.as_deref() != Some("ready") {
            txn.execute(
                "UPDATE ai_queue SET status = 'done', completed_at = NOW() WHERE photo_id = $1",
                &[&photo_id],
            )
            .context("auto-complete queue row for non-ready photo")?;
            txn.commit().context("commit auto-complete")?;
            return Ok(None);
        }

        let updated = txn
            .query_one(
                r#"
                UPDATE ai_queue
                SET status = 'processing', started_at = NOW(), attempts = attempts + 1
                WHERE photo_id = $1
                RETURNING priority, attempts, created_at, started_at
                "#,
                &[&photo_id],
            )
            .context("claim queue row")?;

        txn.commit().context("commit claim_next")?;

        Ok(Some(WorkItem {
            photo_id,
            priority: updated.get(0),
            attempts: updated.get(1),
            created_at,
            started_at: updated.get(3),
        }))
    }

    pub fn complete(&self, photo_id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        conn.execute(
            "UPDATE ai_queue SET status = 'done', completed_at = NOW() WHERE photo_id = $1",
            &[&photo_id],
        )
        .context("complete queue row")?;
        Ok(())
    }

    /// Bounces the item back to `pending` unless it has exhausted
    /// `max_retries`, in which case it lands in `error`. `last_error` is
    /// always recorded.
    pub fn fail(&self, photo_id: &str, error_text: &str, max_retries: u32) -> Result<()> {
        let mut conn = self.conn()?;
        let attempts: i32 = conn
            .query_one(
                "SELECT attempts FROM ai_queue WHERE photo_id = $1",
                &[&photo_id],
            )
            .context("read attempts for fail()")?
            .get(0);

        if attempts as u32 >= max_retries {
            conn.execute(
                "UPDATE ai_queue SET status = 'error', last_error = $2 WHERE photo_id = $1",
                &[&photo_id, &error_text],
            )
            .context("mark queue row error")?;
        } else {
            conn.execute(
                r#"
                UPDATE ai_queue
                SET status = 'pending', started_at = NULL, last_error = $2
                WHERE photo_id = $1
                "#,
                &[&photo_id, &error_text],
            )
            .context("requeue queue row")?;
        }
        Ok(())
    }

    /// Returns every row stuck in `processing` (started before the watchdog
    /// threshold) back to `pending`. Called once at worker startup.
    pub fn reset_stuck(&self, timeout_secs: i64) -> Result<u64> {
        let mut conn = self.conn()?;
        let rows = conn
            .execute(
                r#"
                UPDATE ai_queue
                SET status = 'pending', started_at = NULL
                WHERE status = 'processing'
                  AND started_at < NOW() - ($1 || ' seconds')::interval
                "#,
                &[&timeout_secs.to_string()],
            )
            .context("reset stuck queue rows")?;
        Ok(rows)
    }

    pub fn queue_stats(&self) -> Result<QueueStats> {
        let mut conn = self.conn()?;
        let rows = conn
            .query(
                "SELECT status, COUNT(*) FROM ai_queue GROUP BY status",
                &[],
            )
            .context("queue stats")?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get(0);
            let count: i64 = row.get(1);
            match status.as_str() {
                "pending" => stats.pending = count,
                "processing" => stats.processing = count,
                "done" => stats.done = count,
                "error" => stats.error = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    pub fn pending_count(&self) -> Result<i64> {
        let mut conn = self.conn()?;
        let row = conn
            .query_one(
                "SELECT COUNT(*) FROM ai_queue WHERE status = 'pending'",
                &[],
            )
            .context("pending count")?;
        Ok(row.get(0))
    }
}
