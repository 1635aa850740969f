// src/engine/watch.rs

//! The watch worker: runs one root node on its schedule.
//!
//! Per iteration: read the pending event, schedule one under a short lease
//! if there is none, wait for it, then fire under the execute lease. The
//! event row is deleted inside that lease, so two daemons sharing the store
//! cannot fire the same slot twice. A crash between delete and insert loses
//! one slot; the next scheduling pass recovers.

use std::cmp::min;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{begin_command, WatchNode, WorkerKind, LEASE_SLACK};
use crate::exec;
use crate::hostinfo::HostInfo;
use crate::schedule::wait_until;
use crate::store::Store;
use crate::telemetry::{WATCHERS_STARTED, WATCH_NEXT_RUN};

const SCHEDULE_LEASE_TTL: Duration = Duration::from_secs(1);
const RETRY_PAUSE: Duration = Duration::from_secs(1);

const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(24 * 60 * 60);

/// Doubling pause for commands that fail to run at all, so a broken command
/// does not hammer the machine. Unbounded in elapsed time; reset on the
/// first successful capture.
struct Backoff {
    delay: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            delay: BACKOFF_INITIAL,
        }
    }

    fn next(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = min(self.delay * 2, BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.delay = BACKOFF_INITIAL;
    }
}

pub async fn run_watch(
    store: Store,
    node: WatchNode,
    nodes_stored: mpsc::Sender<String>,
) -> Result<()> {
    info!(watch = %node.path, "starting watcher");
    counter!(WATCHERS_STARTED, "watch" => node.name.clone()).increment(1);

    let host = HostInfo::get()?;
    let mut backoff = Backoff::new();

    loop {
        let mut next = store.next_scheduled_event(&node.path)?;

        if next.is_none() {
            next = store
                .with_lease(
                    &format!("schedule:{}", node.path),
                    SCHEDULE_LEASE_TTL,
                    async {
                        let t = node.schedule.next_after(SystemTime::now());
                        debug!(watch = %node.path, at = ?t, "scheduling next run");
                        store.schedule_event(&node.path, t)?;
                        Ok(t)
                    },
                )
                .await?;
        }

        let Some(next) = next else {
            // Another daemon is scheduling this path right now; re-read shortly.
            tokio::time::sleep(RETRY_PAUSE).await;
            continue;
        };

        gauge!(WATCH_NEXT_RUN, "name" => node.name.clone())
            .set(crate::store::to_utc_millis(next) as f64 / 1000.0);
        debug!(watch = %node.path, at = ?next, "waiting for scheduled run");
        wait_until(next).await;

        store
            .with_lease(
                &format!("execute:{}", node.path),
                node.timeout + LEASE_SLACK,
                async {
                    store.unschedule(&node.path)?;

                    info!(watch = %node.path, "running watch command");
                    let track = begin_command(WorkerKind::Watch, &node.name);
                    let run = exec::run(&node.run, node.timeout, None).await;
                    track.finish(run.is_ok());

                    match run {
                        Ok(result) => {
                            backoff.reset();
                            store.insert_execution(&node.path, &result, &host, None)?;
                            nodes_stored
                                .send(node.path.clone())
                                .await
                                .context("notification channel closed")?;
                        }
                        Err(err) => {
                            let pause = backoff.next();
                            warn!(watch = %node.path, error = %err, pause = ?pause,
                                  "watch command failed to run, throttling");
                            tokio::time::sleep(pause).await;
                        }
                    }
                    Ok(())
                },
            )
            .await?;
    }
}
