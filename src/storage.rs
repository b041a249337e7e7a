use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::bucket::{CompletedBucket, ZoneCount};
use crate::now_s;

/// Destination for completed buckets.
///
/// Called at most once per completed period. Delivery is best effort: the
/// caller logs a failure and moves on, it never retries.
pub trait EventSink {
    fn flush(&mut self, bucket: &CompletedBucket) -> Result<()>;
}

/// A bucket row read back from the database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBucket {
    pub id: i64,
    pub period_start: i64,
    pub period_size_s: u32,
    pub period_label: String,
    pub count: u64,
    pub zone_counts: Vec<ZoneCount>,
    pub flushed_at: i64,
}

pub struct SqliteEventSink {
    conn: Connection,
}

impl SqliteEventSink {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut sink = Self { conn };
        sink.ensure_schema()?;
        Ok(sink)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS bucket_counts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              period_start INTEGER NOT NULL,
              period_size_s INTEGER NOT NULL,
              period_label TEXT NOT NULL,
              count INTEGER NOT NULL,
              zone_counts_json TEXT NOT NULL,
              flushed_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_bucket_counts_start ON bucket_counts(period_start);
            "#,
        )?;
        Ok(())
    }

    /// Most recent buckets first.
    pub fn read_recent(&self, limit: usize) -> Result<Vec<StoredBucket>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, period_start, period_size_s, period_label, count, zone_counts_json, flushed_at
            FROM bucket_counts
            ORDER BY period_start DESC, id DESC
            LIMIT ?1
            "#,
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let count: i64 = row.get(4)?;
            let zone_counts_json: String = row.get(5)?;
            out.push(StoredBucket {
                id: row.get(0)?,
                period_start: row.get(1)?,
                period_size_s: row.get(2)?,
                period_label: row.get(3)?,
                count: u64::try_from(count).map_err(|_| anyhow!("corrupt bucket row: negative count"))?,
                zone_counts: serde_json::from_str(&zone_counts_json)?,
                flushed_at: row.get(6)?,
            });
        }
        Ok(out)
    }

    /// Delete buckets whose period started before `now - retention`.
    /// Returns the number of rows removed.
    pub fn enforce_retention(&mut self, retention: Duration) -> Result<usize> {
        self.enforce_retention_at(now_s()?, retention)
    }

    pub fn enforce_retention_at(&mut self, now: u64, retention: Duration) -> Result<usize> {
        let cutoff = now.saturating_sub(retention.as_secs());
        let cutoff = i64::try_from(cutoff).map_err(|_| anyhow!("retention cutoff exceeds i64 range"))?;
        let removed = self.conn.execute(
            "DELETE FROM bucket_counts WHERE period_start < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }
}

impl EventSink for SqliteEventSink {
    fn flush(&mut self, bucket: &CompletedBucket) -> Result<()> {
        let period_start = i64::try_from(bucket.bucket.start_epoch_s)
            .map_err(|_| anyhow!("time bucket start exceeds i64 range"))?;
        let count = i64::try_from(bucket.count).map_err(|_| anyhow!("bucket count exceeds i64 range"))?;
        let zone_counts_json = serde_json::to_string(&bucket.zone_counts)?;
        let flushed_at = now_s()? as i64;

        self.conn.execute(
            r#"
            INSERT INTO bucket_counts(period_start, period_size_s, period_label, count, zone_counts_json, flushed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                period_start,
                bucket.bucket.size_s,
                bucket.label,
                count,
                zone_counts_json,
                flushed_at
            ],
        )?;
        Ok(())
    }
}

/// Keeps flushed buckets in memory. Used by the demo and tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventSink {
    flushed: Vec<CompletedBucket>,
    fail: bool,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flushed(&self) -> &[CompletedBucket] {
        &self.flushed
    }

    /// Make subsequent flushes fail (or succeed again).
    pub fn set_fail(&mut self, fail: bool) {
        self.fail = fail;
    }
}

impl EventSink for InMemoryEventSink {
    fn flush(&mut self, bucket: &CompletedBucket) -> Result<()> {
        if self.fail {
            return Err(anyhow!("in-memory sink set to fail ({})", bucket.label));
        }
        self.flushed.push(bucket.clone());
        Ok(())
    }
}
