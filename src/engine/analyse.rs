// src/engine/analyse.rs

//! The analyse worker: derives one child execution from every childless
//! parent execution, feeding the parent's stdout to the configured command.
//!
//! The lease key embeds the parent id, so at most one daemon derives a given
//! parent within a lease window; across windows the childless query keeps
//! the work idempotent — once a child row exists, the parent is never
//! returned again.

use anyhow::{bail, Context, Result};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::engine::{begin_command, wake, AnalyseNode, WorkerKind, LEASE_SLACK, POLL_MAX, POLL_MIN};
use crate::exec;
use crate::hostinfo::HostInfo;
use crate::schedule::Schedule;
use crate::store::Store;
use crate::telemetry::ANALYSERS_STARTED;

pub async fn run_analyser(
    store: Store,
    node: AnalyseNode,
    mut notify: mpsc::Receiver<()>,
    nodes_stored: mpsc::Sender<String>,
) -> Result<()> {
    info!(analyser = %node.path, "starting analyser");
    counter!(ANALYSERS_STARTED, "analyser" => node.path.clone()).increment(1);

    if !node.run.should_run() {
        bail!("do-not-run makes no sense for analyser {:?}", node.path);
    }

    let host = HostInfo::get()?;
    let poll = Schedule::UniformRandom {
        min: POLL_MIN,
        max: POLL_MAX,
    };

    let mut skip_delay = true;
    loop {
        if !skip_delay {
            wake(&mut notify, &poll, WorkerKind::Analyse, &node.path).await?;
        }

        let (items, more) = store.get_childless_executions(&node.parent_path, &node.path)?;
        skip_delay = more;

        for item in items {
            store
                .with_lease(
                    &format!("analyse:{}:{}", node.path, item.id),
                    node.timeout + LEASE_SLACK,
                    async {
                        info!(analyser = %node.path, parent = item.id, "running analysis");
                        let track = begin_command(WorkerKind::Analyse, &node.path);
                        let run = exec::run(&node.run, node.timeout, Some(&item.stdout)).await;
                        track.finish(run.is_ok());

                        let result = match run {
                            Ok(result) => result,
                            Err(err) => {
                                // Even a command that failed to run leaves a
                                // record; the childless filter must move past
                                // this parent.
                                warn!(analyser = %node.path, parent = item.id, error = %err,
                                      "error running analysis");
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
}
