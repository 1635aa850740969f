// src/engine/supervisor.rs

//! Wires configured nodes to running workers.
//!
//! One tokio task per node, one bounded hint channel per analyse/trigger
//! worker, keyed by the parent path it listens to. The subscriber table is
//! built once before anything is spawned and never mutated afterwards. The
//! supervisor owns the receiving end of `nodes_stored`: every stored path is
//! counted and fanned out with a non-blocking send — a full channel drops
//! the hint and the worker's poll timer recovers it.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, bail, Context, Result};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{analyse, compile, trigger, watch, Nodes};
use crate::store::Store;
use crate::telemetry::{NODE_DATA_STORED, NODE_STORED_HINTS_DROPPED, NODE_STORED_HINTS_SENT};

/// Capacity of the shared `nodes_stored` channel and of each hint channel.
const HINT_BUFFER: usize = 100;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Compile `cfg` and run every worker until one fails.
pub async fn run(store: Store, cfg: &Config) -> Result<()> {
    run_nodes(store, compile(cfg)?).await
}

/// Run the given nodes until any worker fails, then return that failure.
/// Workers are designed to run forever; the process is expected to exit and
/// be restarted by outside supervision.
pub async fn run_nodes(store: Store, nodes: Nodes) -> Result<()> {
    let (nodes_tx, mut nodes_rx) = mpsc::channel::<String>(HINT_BUFFER);
    let mut subscribers: HashMap<String, Vec<mpsc::Sender<()>>> = HashMap::new();
    let mut workers: JoinSet<Result<()>> = JoinSet::new();

    for node in nodes.watches {
        let store = store.clone();
        let tx = nodes_tx.clone();
        let path = node.path.clone();
        workers.spawn(async move {
            watch::run_watch(store, node, tx)
                .await
                .with_context(|| format!("watcher {path:?}"))
        });
    }

    for node in nodes.analysers {
        let (hint_tx, hint_rx) = mpsc::channel(HINT_BUFFER);
        subscribers
            .entry(node.parent_path.clone())
            .or_default()
            .push(hint_tx);
        let store = store.clone();
        let tx = nodes_tx.clone();
        let path = node.path.clone();
        workers.spawn(async move {
            analyse::run_analyser(store, node, hint_rx, tx)
                .await
                .with_context(|| format!("analyser {path:?}"))
        });
    }

    for node in nodes.triggers {
        let (hint_tx, hint_rx) = mpsc::channel(HINT_BUFFER);
        subscribers
            .entry(node.parent_path.clone())
            .or_default()
            .push(hint_tx);
        let store = store.clone();
        let tx = nodes_tx.clone();
        let path = node.path.clone();
        workers.spawn(async move {
            trigger::run_trigger(store, node, hint_rx, tx)
                .await
                .with_context(|| format!("trigger {path:?}"))
        });
    }

    {
        let store = store.clone();
        workers.spawn(async move { sweep_leases(store).await });
    }

    drop(nodes_tx);

    info!(workers = workers.len(), "supervisor running");

    loop {
        tokio::select! {
            stored = nodes_rx.recv() => match stored {
                Some(path) => fan_out(&subscribers, &path),
                None => bail!("all node-stored senders closed"),
            },
            joined = workers.join_next() => {
                return Err(match joined {
                    Some(Ok(Err(err))) => err,
                    Some(Ok(Ok(()))) => anyhow!("worker exited unexpectedly"),
                    Some(Err(err)) => anyhow!(err).context("worker panicked"),
                    None => anyhow!("no workers configured"),
                });
            }
        }
    }
}

fn fan_out(subscribers: &HashMap<String, Vec<mpsc::Sender<()>>>, path: &str) {
    counter!(NODE_DATA_STORED, "path" => path.to_string()).increment(1);

    let Some(listeners) = subscribers.get(path) else {
        return;
    };
    for listener in listeners {
        match listener.try_send(()) {
            Ok(()) => counter!(NODE_STORED_HINTS_SENT).increment(1),
            Err(mpsc::error::TrySendError::Full(())) => {
                // The worker's poll timer will catch it up.
                counter!(NODE_STORED_HINTS_DROPPED).increment(1);
                debug!(path, "hint channel full, dropping hint");
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                warn!(path, "hint channel closed");
            }
        }
    }
}

async fn sweep_leases(store: Store) -> Result<()> {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        store
            .clean_leases(SystemTime::now())
            .context("cleaning expired leases")?;
    }
}
