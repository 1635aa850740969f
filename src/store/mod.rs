// src/store/mod.rs

//! The shared execution store.
//!
//! A single SQLite file holds three tables: the append-only execution log,
//! the scheduling queue, and the work leases. Several daemon processes may
//! open the same file; WAL mode plus a busy timeout covers concurrent
//! access, and every mutation is a single statement guarded by a unique
//! index or a lease. Timestamps are UTC milliseconds since epoch.
//!
//! Every query passes through a tracker that feeds the SQL metrics with a
//! count, a latency observation, and the terminal status.

pub mod lease;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use metrics::{counter, histogram};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::exec::RunResult;
use crate::hostinfo::HostInfo;
use crate::telemetry::{
    EXECUTION_DATA_BYTES, SQL_QUERIES, SQL_QUERIES_FINISHED, SQL_QUERY_LATENCY,
};

pub use lease::Lease;

/// Batch size for [`Store::get_childless_executions`]. A full batch tells
/// the caller to come straight back for the rest.
const CHILDLESS_LIMIT: usize = 100;

/// Busy timeout applied when the secrets file does not override it.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS program_executions (
    execution_id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_path TEXT NOT NULL,
    executor_host TEXT NOT NULL,
    executor_pid INTEGER NOT NULL,
    started_utcmillis INTEGER NOT NULL,
    stopped_utcmillis INTEGER NOT NULL,
    success INTEGER NOT NULL,
    stdout TEXT NOT NULL,
    stderr TEXT NOT NULL,
    parent_execution_id INTEGER,
    root_execution_id INTEGER
);

CREATE INDEX IF NOT EXISTS idx_executions_path
    ON program_executions(node_path, execution_id);
CREATE INDEX IF NOT EXISTS idx_executions_parent
    ON program_executions(parent_execution_id, node_path);

CREATE TABLE IF NOT EXISTS scheduling_queue (
    node_path TEXT NOT NULL UNIQUE,
    target_time_utcmillis INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS work_leases (
    lease_id INTEGER PRIMARY KEY AUTOINCREMENT,
    lease_key TEXT NOT NULL UNIQUE,
    leased_until_utcmillis INTEGER NOT NULL
);
"#;

#[derive(Debug, Error)]
#[error("sqlite: {0}")]
pub struct StoreError(#[from] rusqlite::Error);

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        is_unique_violation(&self.0)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _)
        if e.code == rusqlite::ErrorCode::ConstraintViolation)
}

fn status_label(err: &rusqlite::Error) -> &'static str {
    if is_unique_violation(err) {
        "unique_violation"
    } else if matches!(err, rusqlite::Error::QueryReturnedNoRows) {
        "no_rows"
    } else {
        "error"
    }
}

pub(crate) struct QueryTracker {
    name: &'static str,
    t0: Instant,
}

pub(crate) fn begin_tracking(name: &'static str) -> QueryTracker {
    counter!(SQL_QUERIES, "query" => name).increment(1);
    QueryTracker {
        name,
        t0: Instant::now(),
    }
}

impl QueryTracker {
    pub(crate) fn finish<T>(self, result: Result<T, rusqlite::Error>) -> Result<T, StoreError> {
        let status = match &result {
            Ok(_) => "ok",
            Err(err) => status_label(err),
        };
        counter!(SQL_QUERIES_FINISHED, "query" => self.name, "status" => status).increment(1);
        histogram!(SQL_QUERY_LATENCY, "query" => self.name, "status" => status)
            .record(self.t0.elapsed().as_secs_f64());
        result.map_err(StoreError::from)
    }
}

pub(crate) fn to_utc_millis(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(_) => 0,
    }
}

pub(crate) fn from_utc_millis(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}

/// A successful execution with no child yet at the requesting path.
#[derive(Debug, Clone)]
pub struct ChildlessExecution {
    pub id: i64,
    pub stdout: String,
}

/// Handle over the shared store. Cheap to clone; all clones share one
/// connection behind a mutex.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }

    /// Insert one execution record and return its id.
    ///
    /// A child's root pointer is the parent's root pointer when the parent
    /// has one, else the parent itself, so any record reaches its root in
    /// one hop.
    pub fn insert_execution(
        &self,
        path: &str,
        result: &RunResult,
        host: &HostInfo,
        parent: Option<i64>,
    ) -> Result<i64, StoreError> {
        let root_id = match parent {
            None => None,
            Some(parent_id) => Some(self.root_id_for_child(parent_id)?),
        };

        let conn = self.lock();
        let track = begin_tracking("insert-execution");
        let inserted: Result<i64, rusqlite::Error> = conn.query_row(
            "INSERT INTO program_executions
                 (node_path,
                  executor_host, executor_pid,
                  started_utcmillis, stopped_utcmillis,
                  success,
                  stdout, stderr,
                  parent_execution_id, root_execution_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             RETURNING execution_id",
            params![
                path,
                host.hostname,
                host.pid,
                to_utc_millis(result.started_at),
                to_utc_millis(result.stopped_at),
                result.success,
                result.stdout,
                result.stderr,
                parent,
                root_id,
            ],
            |row| row.get(0),
        );
        let execution_id = track.finish(inserted)?;

        counter!(EXECUTION_DATA_BYTES, "stream" => "stdout")
            .increment(result.stdout.len() as u64);
        counter!(EXECUTION_DATA_BYTES, "stream" => "stderr")
            .increment(result.stderr.len() as u64);

        Ok(execution_id)
    }

    fn root_id_for_child(&self, parent_id: i64) -> Result<i64, StoreError> {
        let conn = self.lock();
        let track = begin_tracking("get-root-execution-id");
        let parent_root: Result<Option<i64>, rusqlite::Error> = conn.query_row(
            "SELECT root_execution_id FROM program_executions WHERE execution_id = ?1",
            [parent_id],
            |row| row.get(0),
        );
        Ok(track.finish(parent_root)?.unwrap_or(parent_id))
    }

    /// Up to 100 successful executions at `parent_path` with no child at
    /// `child_path`, oldest first so a backlog drains before new arrivals.
    /// The second value is true when the batch hit the limit and the caller
    /// should come back without sleeping.
    ///
    /// Analysers drain every childless parent through this; triggers only
    /// ever look at the newest one, via
    /// [`Store::get_latest_execution_if_childless`].
    pub fn get_childless_executions(
        &self,
        parent_path: &str,
        child_path: &str,
    ) -> Result<(Vec<ChildlessExecution>, bool), StoreError> {
        let conn = self.lock();
        let track = begin_tracking("get-childless-executions");
        let fetched: Result<Vec<ChildlessExecution>, rusqlite::Error> = (|| {
            let mut stmt = conn.prepare(
                "SELECT p.execution_id, p.stdout
                 FROM program_executions AS p
                 WHERE p.node_path = ?1
                   AND p.success <> 0
                   AND NOT EXISTS (SELECT 1 FROM program_executions AS c
                                   WHERE c.parent_execution_id = p.execution_id
                                     AND c.node_path = ?2)
                 ORDER BY p.execution_id ASC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                params![parent_path, child_path, CHILDLESS_LIMIT as i64],
                |row| {
                    Ok(ChildlessExecution {
                        id: row.get(0)?,
                        stdout: row.get(1)?,
                    })
                },
            )?;
            rows.collect()
        })();
        let items = track.finish(fetched)?;
        let more = items.len() == CHILDLESS_LIMIT;
        Ok((items, more))
    }

    /// The single newest successful execution at `parent_path`, but only if
    /// it has no child at `child_path` yet; `None` otherwise. Once a newer
    /// execution exists, older childless ones are never returned here: a
    /// stale result must not fire a side effect.
    pub fn get_latest_execution_if_childless(
        &self,
        parent_path: &str,
        child_path: &str,
    ) -> Result<Option<ChildlessExecution>, StoreError> {
        let conn = self.lock();
        let track = begin_tracking("get-latest-execution-if-childless");
        let fetched = conn
            .query_row(
                "SELECT p.execution_id, p.stdout,
                        NOT EXISTS (SELECT 1 FROM program_executions AS c
                                    WHERE c.parent_execution_id = p.execution_id
                                      AND c.node_path = ?2) AS childless
                 FROM program_executions AS p
                 WHERE p.node_path = ?1 AND p.success <> 0
                 ORDER BY p.execution_id DESC
                 LIMIT 1",
                params![parent_path, child_path],
                |row| {
                    Ok((
                        ChildlessExecution {
                            id: row.get(0)?,
                            stdout: row.get(1)?,
                        },
                        row.get::<_, bool>(2)?,
                    ))
                },
            )
            .optional();
        match track.finish(fetched)? {
            Some((item, true)) => Ok(Some(item)),
            _ => Ok(None),
        }
    }

    /// Start time of the newest successful execution at `path`, if any.
    pub fn time_of_latest_successful_execution(
        &self,
        path: &str,
    ) -> Result<Option<SystemTime>, StoreError> {
        let conn = self.lock();
        let track = begin_tracking("time-of-latest-successful-execution");
        let fetched = conn
            .query_row(
                "SELECT started_utcmillis FROM program_executions
                 WHERE node_path = ?1 AND success <> 0
                 ORDER BY execution_id DESC
                 LIMIT 1",
                [path],
                |row| row.get::<_, i64>(0),
            )
            .optional();
        Ok(track.finish(fetched)?.map(from_utc_millis))
    }

    /// Insert a pending event for `path`. A duplicate path is a silent
    /// no-op: someone already scheduled it.
    pub fn schedule_event(&self, path: &str, t: SystemTime) -> Result<(), StoreError> {
        let conn = self.lock();
        let track = begin_tracking("schedule-event");
        let inserted = conn.execute(
            "INSERT INTO scheduling_queue (node_path, target_time_utcmillis) VALUES (?1, ?2)",
            params![path, to_utc_millis(t)],
        );
        match track.finish(inserted) {
            Ok(_) => Ok(()),
            Err(err) if err.is_unique_violation() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Remove any pending event for `path`.
    pub fn unschedule(&self, path: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        let track = begin_tracking("unschedule");
        let deleted = conn.execute("DELETE FROM scheduling_queue WHERE node_path = ?1", [path]);
        track.finish(deleted).map(|_| ())
    }

    /// Earliest pending event time for `path`, if any.
    pub fn next_scheduled_event(&self, path: &str) -> Result<Option<SystemTime>, StoreError> {
        let conn = self.lock();
        let track = begin_tracking("next-scheduled-specific-event");
        let fetched = conn
            .query_row(
                "SELECT target_time_utcmillis FROM scheduling_queue
                 WHERE node_path = ?1
                 ORDER BY target_time_utcmillis ASC
                 LIMIT 1",
                [path],
                |row| row.get::<_, i64>(0),
            )
            .optional();
        Ok(track.finish(fetched)?.map(from_utc_millis))
    }

    /// Delete every lease whose deadline is in the past.
    pub fn clean_leases(&self, now: SystemTime) -> Result<(), StoreError> {
        let conn = self.lock();
        let track = begin_tracking("clean-leases");
        let swept = conn.execute(
            "DELETE FROM work_leases WHERE leased_until_utcmillis < ?1",
            [to_utc_millis(now)],
        );
        track.finish(swept).map(|_| ())
    }
}
