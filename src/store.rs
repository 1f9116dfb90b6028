//! Record sinks. The engine only depends on the `JobStore` trait; the
//! persistence format belongs to the store.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::models::{JobId, JobRecord};

/// External record sink the engine writes extracted jobs to.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist one record. `Rejected` is recoverable and retried by the
    /// engine up to the normal budget.
    async fn write(&self, record: &JobRecord) -> Result<(), StoreError>;

    async fn exists(&self, job_id: &str) -> Result<bool, StoreError>;

    /// All known job ids, used to seed the dedup set across runs.
    async fn known_ids(&self) -> Result<Vec<JobId>, StoreError>;
}

/// SQLite-backed store. One table, keyed by the site-native job id.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(sql_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                job_id        TEXT PRIMARY KEY,
                title         TEXT NOT NULL,
                company       TEXT NOT NULL,
                location      TEXT NOT NULL,
                posted_at     TEXT,
                description   TEXT,
                source_url    TEXT NOT NULL,
                first_seen_at TEXT NOT NULL
            );",
        )
        .map_err(sql_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Export all stored records as CSV. Returns the number of rows written.
    pub async fn export_csv(&self, path: &Path) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT job_id, title, company, location, posted_at, description,
                        source_url, first_seen_at
                 FROM jobs ORDER BY first_seen_at",
            )
            .map_err(sql_err)?;

        let mut out = String::from(
            "job_id,title,company,location,posted_at,description,source_url,first_seen_at\n",
        );
        let mut rows = stmt.query([]).map_err(sql_err)?;
        let mut count = 0;
        while let Some(row) = rows.next().map_err(sql_err)? {
            let fields: Vec<String> = (0..8)
                .map(|i| row.get::<_, Option<String>>(i).map(|v| v.unwrap_or_default()))
                .collect::<Result<_, _>>()
                .map_err(sql_err)?;
            let line: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
            out.push_str(&line.join(","));
            out.push('\n');
            count += 1;
        }

        std::fs::write(path, out).map_err(|e| StoreError::Rejected(e.to_string()))?;
        debug!("Exported {} records to {}", count, path.display());
        Ok(count)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn write(&self, record: &JobRecord) -> Result<(), StoreError> {
        if record.job_id.is_empty() {
            return Err(StoreError::Rejected("empty job_id".to_string()));
        }
        if record.title.is_empty() {
            return Err(StoreError::Rejected("empty title".to_string()));
        }

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO jobs
                (job_id, title, company, location, posted_at, description,
                 source_url, first_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(job_id) DO UPDATE SET
                title = excluded.title,
                company = excluded.company,
                location = excluded.location,
                posted_at = excluded.posted_at,
                description = excluded.description,
                source_url = excluded.source_url",
            rusqlite::params![
                record.job_id,
                record.title,
                record.company,
                record.location,
                record.posted_at.map(|t| t.to_rfc3339()),
                record.description,
                record.source_url,
                record.first_seen_at.to_rfc3339(),
            ],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    async fn exists(&self, job_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE job_id = ?1",
                [job_id],
                |row| row.get(0),
            )
            .map_err(sql_err)?;
        Ok(count > 0)
    }

    async fn known_ids(&self) -> Result<Vec<JobId>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT job_id FROM jobs").map_err(sql_err)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        Ok(ids)
    }
}

/// In-memory store, used by tests and dry runs without a database path.
/// Optionally rejects configured job ids to exercise the retry path.
#[derive(Default)]
pub struct MemoryJobStore {
    records: Mutex<HashMap<JobId, JobRecord>>,
    /// Remaining rejections per job id.
    reject_remaining: Mutex<HashMap<JobId, u32>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write for the given ids.
    pub fn rejecting(ids: Vec<JobId>) -> Self {
        Self::with_rejections(ids, u32::MAX)
    }

    /// Reject the first write for the given ids, then accept.
    pub fn rejecting_once(ids: Vec<JobId>) -> Self {
        Self::with_rejections(ids, 1)
    }

    fn with_rejections(ids: Vec<JobId>, times: u32) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            reject_remaining: Mutex::new(ids.into_iter().map(|id| (id, times)).collect()),
        }
    }

    pub async fn records(&self) -> Vec<JobRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn write(&self, record: &JobRecord) -> Result<(), StoreError> {
        {
            let mut remaining = self.reject_remaining.lock().await;
            if let Some(left) = remaining.get_mut(&record.job_id) {
                if *left > 0 {
                    *left = left.saturating_sub(1);
                    return Err(StoreError::Rejected(format!(
                        "configured rejection for {}",
                        record.job_id
                    )));
                }
            }
        }
        self.records
            .lock()
            .await
            .insert(record.job_id.clone(), record.clone());
        Ok(())
    }

    async fn exists(&self, job_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.lock().await.contains_key(job_id))
    }

    async fn known_ids(&self) -> Result<Vec<JobId>, StoreError> {
        Ok(self.records.lock().await.keys().cloned().collect())
    }
}

fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::Rejected(e.to_string())
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
