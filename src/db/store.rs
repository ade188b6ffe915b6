//! SQLite time-series store for probe results.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use super::models::*;

/// Fixed-width timestamp format; lexicographic order matches time order.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Default cap for history queries.
pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

const MAX_IDLE_READERS: usize = 4;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RESULT_COLUMNS: &str =
    "target_name, target_url, status_code, response_time_ms, is_up, error_message, checked_at";

const STATUS_SQL: &str = "
    WITH latest AS (
        SELECT target_name, MAX(checked_at) AS checked_at
        FROM check_results
        GROUP BY target_name
    ),
    recent AS (
        SELECT target_name,
               COUNT(*) AS checks,
               SUM(is_up) AS up_checks,
               AVG(response_time_ms) AS avg_ms
        FROM check_results
        WHERE checked_at >= ?1
        GROUP BY target_name
    )
    SELECT r.target_name, r.target_url, r.status_code, r.response_time_ms, r.is_up,
           r.error_message, r.checked_at,
           COALESCE(w.checks, 0), COALESCE(w.up_checks, 0), w.avg_ms
    FROM check_results r
    JOIN latest l ON l.target_name = r.target_name AND l.checked_at = r.checked_at
    LEFT JOIN recent w ON w.target_name = r.target_name
    WHERE r.id = (
        SELECT MAX(x.id) FROM check_results x
        WHERE x.target_name = r.target_name AND x.checked_at = l.checked_at
    )
    AND (?2 IS NULL OR r.target_name = ?2)
    ORDER BY r.target_name";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("database lock poisoned")]
    LockPoisoned,
}

/// Append-only store of probe results.
///
/// Writes go through a single writer connection guarded by a mutex. Reads
/// check out a separate connection, so under WAL they never wait for a write.
pub struct Store {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
}

impl Store {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!("Store: journal mode is {} instead of WAL", mode);
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self {
            path,
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
        };
        store.init()?;
        Ok(store)
    }

    /// Create the schema. Safe to call any number of times.
    pub fn init(&self) -> Result<(), DbError> {
        let conn = self.writer.lock().map_err(|_| DbError::LockPoisoned)?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    /// Append one probe result.
    pub fn insert(&self, result: &ProbeResult) -> Result<(), DbError> {
        let conn = self.writer.lock().map_err(|_| DbError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO check_results (target_name, target_url, status_code,
                 response_time_ms, is_up, error_message, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                result.target_name,
                result.target_url,
                result.status_code.map(i64::from),
                i64::try_from(result.response_time_ms).unwrap_or(i64::MAX),
                result.is_up,
                result.error_message,
                format_db_time(result.checked_at),
            ],
        )?;
        Ok(())
    }

    /// Latest status and 24h statistics for every target with any stored row.
    pub fn latest_status_all(&self) -> Result<Vec<TargetStatus>, DbError> {
        let cutoff = format_db_time(Utc::now() - ChronoDuration::hours(24));
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(STATUS_SQL)?;
            let rows = stmt
                .query_map(params![cutoff, None::<String>], status_from_row)?
                .collect::<SqlResult<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Latest status and 24h statistics for one target.
    pub fn latest_status_by_name(&self, name: &str) -> Result<Option<TargetStatus>, DbError> {
        let cutoff = format_db_time(Utc::now() - ChronoDuration::hours(24));
        self.with_reader(|conn| {
            let status = conn
                .query_row(STATUS_SQL, params![cutoff, name], status_from_row)
                .optional()?;
            Ok(status)
        })
    }

    /// Results for a target at or after `since`, newest first.
    pub fn history(
        &self,
        name: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ProbeResult>, DbError> {
        let sql = format!(
            "SELECT {} FROM check_results
             WHERE target_name = ?1 AND checked_at >= ?2
             ORDER BY checked_at DESC, id DESC LIMIT ?3",
            RESULT_COLUMNS
        );
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let results = stmt
                .query_map(params![name, format_db_time(since), limit], result_from_row)?
                .collect::<SqlResult<Vec<_>>>()?;
            Ok(results)
        })
    }

    /// Delete results older than `retention_days`. Returns the number deleted.
    pub fn prune(&self, retention_days: u32) -> Result<usize, DbError> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(retention_days));
        let conn = self.writer.lock().map_err(|_| DbError::LockPoisoned)?;
        let deleted = conn.execute(
            "DELETE FROM check_results WHERE checked_at < ?1",
            params![format_db_time(cutoff)],
        )?;
        Ok(deleted)
    }

    /// Delete every stored result.
    pub fn delete_all(&self) -> Result<usize, DbError> {
        let conn = self.writer.lock().map_err(|_| DbError::LockPoisoned)?;
        Ok(conn.execute("DELETE FROM check_results", [])?)
    }

    /// Row count and on-disk size.
    pub fn stats(&self) -> Result<StoreStats, DbError> {
        self.with_reader(|conn| {
            let row_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM check_results", [], |r| r.get(0))?;
            let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
            let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
            Ok(StoreStats {
                row_count,
                size_bytes: page_count * page_size,
            })
        })
    }

    /// Run a read against a pooled reader connection.
    fn with_reader<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let idle = {
            let mut readers = self.readers.lock().map_err(|_| DbError::LockPoisoned)?;
            readers.pop()
        };
        let conn = match idle {
            Some(conn) => conn,
            None => {
                let conn = Connection::open(&self.path)?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                conn
            }
        };

        let result = f(&conn);

        if let Ok(mut readers) = self.readers.lock() {
            if readers.len() < MAX_IDLE_READERS {
                readers.push(conn);
            }
        }
        result
    }
}

fn result_from_row(row: &Row<'_>) -> SqlResult<ProbeResult> {
    let status_code: Option<i64> = row.get(2)?;
    let response_time_ms: i64 = row.get(3)?;
    let time_str: String = row.get(6)?;
    let checked_at = parse_db_time(&time_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("invalid checked_at: {}", time_str).into(),
        )
    })?;
    Ok(ProbeResult {
        target_name: row.get(0)?,
        target_url: row.get(1)?,
        status_code: status_code.and_then(|c| u16::try_from(c).ok()),
        response_time_ms: u64::try_from(response_time_ms).unwrap_or(0),
        is_up: row.get(4)?,
        error_message: row.get(5)?,
        checked_at,
    })
}

fn status_from_row(row: &Row<'_>) -> SqlResult<TargetStatus> {
    let latest = result_from_row(row)?;
    let checks: i64 = row.get(7)?;
    let up_checks: i64 = row.get(8)?;
    let avg_ms: Option<f64> = row.get(9)?;

    let uptime_24h = if checks > 0 {
        Some(up_checks as f64 * 100.0 / checks as f64)
    } else {
        None
    };

    Ok(TargetStatus {
        latest,
        checks_24h: u64::try_from(checks).unwrap_or(0),
        uptime_24h,
        avg_response_time_ms_24h: avg_ms,
    })
}

fn format_db_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
