//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
///
/// Safe to call repeatedly; every statement is `IF NOT EXISTS`. The
/// `latest_status` view derives the most recent run per (node, test) from the
/// append-only `runs` table. When two rows share the maximum timestamp for a
/// key, the one with the highest rowid (most recent insertion) wins.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS runs (
            node      TEXT NOT NULL,
            test      TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            result    TEXT NOT NULL CHECK (result IN ('pass','fail','incomplete'))
        );

        CREATE INDEX IF NOT EXISTS idx_runs_node_test_ts
        ON runs(node, test, timestamp);

        CREATE VIEW IF NOT EXISTS latest_status AS
        SELECT r.node, r.test, r.timestamp AS latest_timestamp, r.result
        FROM runs r
        JOIN (
            SELECT node, test, MAX(timestamp) AS max_ts
            FROM runs
            GROUP BY node, test
        ) x
        ON r.node = x.node AND r.test = x.test AND r.timestamp = x.max_ts
        WHERE r.rowid = (
            SELECT MAX(r2.rowid) FROM runs r2
            WHERE r2.node = r.node AND r2.test = r.test AND r2.timestamp = x.max_ts
        );

        CREATE TABLE IF NOT EXISTS nccl_bandwidth (
            node       TEXT NOT NULL,
            timestamp  INTEGER NOT NULL,
            busbw_gbps REAL NOT NULL,
            PRIMARY KEY (node, timestamp)
        );

        CREATE TABLE IF NOT EXISTS storage_throughput (
            node       TEXT NOT NULL,
            timestamp  INTEGER NOT NULL,
            read_mbps  REAL NOT NULL,
            write_mbps REAL NOT NULL,
            PRIMARY KEY (node, timestamp)
        );",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM latest_status", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM nccl_bandwidth", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_runs_result_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let err = conn.execute(
            "INSERT INTO runs(node, test, timestamp, result) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params!["n1", "t1", 100, "maybe"],
        );
        assert!(err.is_err());
    }
}
