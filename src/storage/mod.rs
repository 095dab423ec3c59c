//! SQLite result store -- append-only run log, latest-status view, metric
//! tables.
//!
//! The store is shared between the orchestrator process and the benchmark
//! pods, which append their own outcome rows out-of-band. WAL mode plus a
//! busy timeout lets those writers serialize without lost updates while
//! readers see a consistent snapshot.

pub mod schema;

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use thiserror::Error;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("result must be one of: pass, fail, incomplete (got '{0}')")]
    InvalidResult(String),

    #[error("cannot parse timestamp '{0}': expected epoch seconds or ISO-8601 UTC")]
    InvalidTimestamp(String),
}

/// Outcome of one validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunResult {
    Pass,
    Fail,
    Incomplete,
}

impl RunResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunResult::Pass => "pass",
            RunResult::Fail => "fail",
            RunResult::Incomplete => "incomplete",
        }
    }
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunResult {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass" => Ok(RunResult::Pass),
            "fail" => Ok(RunResult::Fail),
            "incomplete" => Ok(RunResult::Incomplete),
            other => Err(StorageError::InvalidResult(other.to_string())),
        }
    }
}

/// One row of the append-only run log.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunRecord {
    pub node: String,
    pub test: String,
    pub timestamp: i64,
    pub result: RunResult,
}

/// One row of the derived latest-status view.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LatestStatus {
    pub node: String,
    pub test: String,
    pub latest_timestamp: i64,
    pub result: RunResult,
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(dir) = std::path::Path::new(path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create DB directory {}", dir.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Append one run outcome to the history log.
pub fn insert_run(pool: &Pool, node: &str, test: &str, timestamp: i64, result: RunResult) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO runs(node, test, timestamp, result) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![node, test, timestamp, result.as_str()],
    )
    .context("Failed to insert run")?;
    Ok(())
}

/// Latest outcome per (node, test), ordered by node then test.
pub fn query_latest_status(pool: &Pool, node_filter: Option<&str>) -> Result<Vec<LatestStatus>> {
    let conn = pool.get()?;

    let mut query =
        String::from("SELECT node, test, latest_timestamp, result FROM latest_status");
    let mut params: Vec<&dyn rusqlite::ToSql> = Vec::new();
    if let Some(node) = node_filter.as_ref() {
        query.push_str(" WHERE node = ?1");
        params.push(node);
    }
    query.push_str(" ORDER BY node, test");

    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params.as_slice(), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut out = Vec::new();
    for r in rows {
        let (node, test, latest_timestamp, result) = r?;
        out.push(LatestStatus {
            node,
            test,
            latest_timestamp,
            result: result.parse()?,
        });
    }
    Ok(out)
}

/// Most recent `limit` run records, newest first.
pub fn query_history(pool: &Pool, limit: u32) -> Result<Vec<RunRecord>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT node, test, timestamp, result FROM runs ORDER BY timestamp DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut out = Vec::new();
    for r in rows {
        let (node, test, timestamp, result) = r?;
        out.push(RunRecord {
            node,
            test,
            timestamp,
            result: result.parse()?,
        });
    }
    Ok(out)
}

/// Max latest-status timestamp per node across all test types.
///
/// A node missing from the map has never been tested. This feeds the
/// staleness queue, which cares about the most recent activity of any kind.
pub fn latest_by_node(pool: &Pool) -> Result<HashMap<String, i64>> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT node, MAX(latest_timestamp) FROM latest_status GROUP BY node")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut map = HashMap::new();
    for r in rows {
        let (node, ts) = r?;
        map.insert(node, ts);
    }
    Ok(map)
}

/// True if any run for (node, test) was recorded at or after `since`.
///
/// The lifecycle engine uses this to avoid duplicating an outcome the
/// benchmark pod already appended for the same job.
pub fn has_run_since(pool: &Pool, node: &str, test: &str, since: i64) -> Result<bool> {
    let conn = pool.get()?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM runs WHERE node = ?1 AND test = ?2 AND timestamp >= ?3",
        rusqlite::params![node, test, since],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Upsert one NCCL bandwidth sample keyed by (node, timestamp).
pub fn record_nccl_sample(pool: &Pool, node: &str, timestamp: i64, busbw_gbps: f64) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT OR REPLACE INTO nccl_bandwidth(node, timestamp, busbw_gbps) VALUES (?1, ?2, ?3)",
        rusqlite::params![node, timestamp, busbw_gbps],
    )?;
    Ok(())
}

/// Upsert one storage throughput sample keyed by (node, timestamp).
pub fn record_storage_sample(
    pool: &Pool,
    node: &str,
    timestamp: i64,
    read_mbps: f64,
    write_mbps: f64,
) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT OR REPLACE INTO storage_throughput(node, timestamp, read_mbps, write_mbps)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![node, timestamp, read_mbps, write_mbps],
    )?;
    Ok(())
}

/// Parse an operator-supplied timestamp: integer epoch seconds or ISO-8601.
///
/// Naive datetimes are treated as UTC.
pub fn parse_timestamp(input: &str) -> Result<i64, StorageError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(StorageError::InvalidTimestamp(input.to_string()));
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        return s
            .parse::<i64>()
            .map_err(|_| StorageError::InvalidTimestamp(input.to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }

    // Naive ISO-8601 like "2025-12-29T17:20:00"
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive).timestamp());
    }

    Err(StorageError::InvalidTimestamp(input.to_string()))
}

/// Render epoch seconds as ISO-8601 UTC with a trailing Z.
pub fn epoch_to_iso(epoch: i64) -> String {
    match Utc.timestamp_opt(epoch, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        _ => epoch.to_string(),
    }
}
