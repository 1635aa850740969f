#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use vigil::exec::RunResult;
use vigil::hostinfo::HostInfo;
use vigil::store::Store;

/// A store on a temp file, plus the guard keeping the directory alive.
pub struct TestStore {
    pub store: Store,
    pub dir: TempDir,
}

impl TestStore {
    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("state.db")
    }

    /// A second handle onto the same database file, as another daemon
    /// process would hold.
    pub fn reopen(&self) -> Store {
        Store::open(&self.db_path(), Duration::from_secs(5)).expect("reopening store")
    }

    /// Raw SQL access for assertions the public API deliberately lacks.
    pub fn raw(&self) -> rusqlite::Connection {
        rusqlite::Connection::open(self.db_path()).expect("opening raw connection")
    }

    pub fn count_rows_at(&self, path: &str) -> i64 {
        self.raw()
            .query_row(
                "SELECT COUNT(*) FROM program_executions WHERE node_path = ?1",
                [path],
                |row| row.get(0),
            )
            .expect("counting rows")
    }
}

pub fn open_store() -> TestStore {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(&dir.path().join("state.db"), Duration::from_secs(5))
        .expect("opening store");
    TestStore { store, dir }
}

pub fn host() -> HostInfo {
    HostInfo::get().expect("hostinfo")
}

pub fn captured(stdout: &str) -> RunResult {
    let now = SystemTime::now();
    RunResult {
        started_at: now,
        stopped_at: now,
        success: true,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failed(stderr: &str) -> RunResult {
    let now = SystemTime::now();
    RunResult {
        started_at: now,
        stopped_at: now,
        success: false,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

pub fn close_to(a: SystemTime, b: SystemTime) -> bool {
    let diff = match a.duration_since(b) {
        Ok(d) => d,
        Err(e) => e.duration(),
    };
    diff < Duration::from_millis(5)
}
