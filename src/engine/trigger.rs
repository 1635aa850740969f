// src/engine/trigger.rs

//! The trigger worker: fires a side effect when the newest successful parent
//! output is non-empty after trimming, at most once per configured period.
//!
//! Unlike analysers, triggers never work a backlog: only the latest parent
//! execution can fire, and once a newer one exists the older ones are
//! ignored forever. The period check consults the store, so the rate bound
//! holds across every daemon sharing it.

use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::engine::{begin_command, wake, TriggerNode, WorkerKind, LEASE_SLACK, POLL_MAX, POLL_MIN};
use crate::exec;
use crate::hostinfo::HostInfo;
use crate::schedule::Schedule;
use crate::store::Store;
use crate::telemetry::TRIGGERS_STARTED;

pub async fn run_trigger(
    store: Store,
    node: TriggerNode,
    mut notify: mpsc::Receiver<()>,
    nodes_stored: mpsc::Sender<String>,
) -> Result<()> {
    info!(trigger = %node.path, "starting trigger worker");
    counter!(TRIGGERS_STARTED, "trigger" => node.path.clone()).increment(1);

    if !node.run.should_run() {
        bail!("do-not-run makes no sense for trigger {:?}", node.path);
    }

    let host = HostInfo::get()?;
    let poll = Schedule::UniformRandom {
        min: POLL_MIN,
        max: POLL_MAX,
    };

    loop {
        wake(&mut notify, &poll, WorkerKind::Trigger, &node.path).await?;

        let Some(item) = store.get_latest_execution_if_childless(&node.parent_path, &node.path)?
        else {
            continue;
        };

        let input = item.stdout.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(last) = store.time_of_latest_successful_execution(&node.path)? {
            match SystemTime::now().duration_since(last) {
                Ok(since) if since < node.period => {
                    info!(trigger = %node.path, since = ?since, period = ?node.period,
                          "skipping trigger: fired too recently");
                    continue;
                }
                Ok(_) => {}
                Err(_) => {
                    // The last firing is ahead of our clock; treat as recent.
                    info!(trigger = %node.path, "skipping trigger: last firing is ahead of local clock");
                    continue;
                }
            }
        }

        store
            .with_lease(
                &format!("trigger:{}:{}", node.path, item.id),
                node.timeout + LEASE_SLACK,
                async {
                    info!(trigger = %node.path, parent = item.id, input, "running trigger");
                    let track = begin_command(WorkerKind::Trigger, &node.path);
                    let run = exec::run(&node.run, node.timeout, Some(input)).await;
                    track.finish(run.is_ok());

                    let result = match run {
                        Ok(result) => result,
                        Err(err) => {
                            // Record the failure anyway; the latest-childless
                            // check must move past this parent.
                            warn!(trigger = %node.path, parent = item.id, error = %err,
                                  "error running trigger");
                            err.into_partial()
                        }
                    };

                    store.insert_execution(&node.path, &result, &host, Some(item.id))?;
                    nodes_stored
                        .send(node.path.clone())
                        .await
                        .context("notification channel closed")?;
                    Ok(())
                },
            )
            .await?;
    }
}
