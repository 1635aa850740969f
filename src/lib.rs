// src/lib.rs

//! `vigil` runs configured commands ("watches") on a schedule, stores every
//! run in a shared SQLite store, derives further runs ("analyses") from
//! stored output, and fires rate-limited side effects ("triggers") on fresh
//! non-empty output. Several daemon processes may share one store; they
//! coordinate only through it, via short-lived leases and unique indexes.

pub mod cli;
pub mod config;
pub mod engine;
pub mod exec;
pub mod hostinfo;
pub mod logging;
pub mod schedule;
pub mod secrets;
pub mod store;
pub mod telemetry;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::cli::CliArgs;
use crate::store::Store;

/// Contents of the `--db_secrets` file.
#[derive(Debug, Deserialize)]
pub struct DbSecrets {
    /// Filesystem path of the shared SQLite database.
    pub path: PathBuf,

    /// How long to wait on a locked database before giving up.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    store::DEFAULT_BUSY_TIMEOUT.as_millis() as u64
}

fn connect_store(secrets_path: &Path) -> Result<Store> {
    let db: DbSecrets = secrets::load(secrets_path)?;
    let store = Store::open(&db.path, Duration::from_millis(db.busy_timeout_ms))
        .with_context(|| format!("opening store at {:?}", db.path))?;
    Ok(store)
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - the metrics recorder and `/metrics` endpoint
/// - the secrets file and the shared store
/// - config loading and validation
/// - the supervisor with one worker per configured node
///
/// It only returns on failure; the process is expected to exit non-zero and
/// be restarted by outside supervision.
pub async fn run(args: CliArgs) -> Result<()> {
    let handle = telemetry::install_recorder()?;
    let listener = telemetry::bind_listener(&args.listen_host, args.port).await?;
    info!("metrics listening on http://{}/metrics", listener.local_addr()?);

    let store = connect_store(Path::new(&args.db_secrets))?;
    let cfg = config::load_and_validate(&args.config).await?;

    tokio::select! {
        res = engine::supervisor::run(store, &cfg) => res,
        res = telemetry::serve(listener, handle) => res,
    }
}
