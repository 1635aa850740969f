// src/engine/mod.rs

//! The per-node workers and their supervisor.
//!
//! - [`watch`] runs a root node on its schedule.
//! - [`analyse`] derives a child execution from every childless parent.
//! - [`trigger`] fires a side effect on the latest non-empty parent output.
//! - [`supervisor`] spawns one task per configured node, fans out "node
//!   stored" hints, and sweeps expired leases.

pub mod analyse;
pub mod supervisor;
pub mod trigger;
pub mod watch;

use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::{AnalysisConfig, Config};
use crate::exec::RunSpec;
use crate::schedule::{wait_until, Schedule};
use crate::telemetry::{
    ANALYSE_COMMANDS, ANALYSE_COMMANDS_FINISHED, ANALYSE_COMMAND_LATENCY,
    NODE_STORED_HINTS_RECEIVED, TRIGGER_COMMANDS, TRIGGER_COMMANDS_FINISHED,
    TRIGGER_COMMAND_LATENCY, WATCH_COMMANDS, WATCH_COMMANDS_FINISHED, WATCH_COMMAND_LATENCY,
};

pub use supervisor::{run, run_nodes};

/// Extra time a lease outlives the timeout of the work it guards.
pub(crate) const LEASE_SLACK: Duration = Duration::from_secs(1);

/// Bounds of the random poll that backs up lost notification hints.
pub(crate) const POLL_MIN: Duration = Duration::from_secs(60);
pub(crate) const POLL_MAX: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy)]
pub(crate) enum WorkerKind {
    Watch,
    Analyse,
    Trigger,
}

impl WorkerKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            WorkerKind::Watch => "watch",
            WorkerKind::Analyse => "analyse",
            WorkerKind::Trigger => "trigger",
        }
    }

    fn runs_metric(self) -> &'static str {
        match self {
            WorkerKind::Watch => WATCH_COMMANDS,
            WorkerKind::Analyse => ANALYSE_COMMANDS,
            WorkerKind::Trigger => TRIGGER_COMMANDS,
        }
    }

    fn finished_metric(self) -> &'static str {
        match self {
            WorkerKind::Watch => WATCH_COMMANDS_FINISHED,
            WorkerKind::Analyse => ANALYSE_COMMANDS_FINISHED,
            WorkerKind::Trigger => TRIGGER_COMMANDS_FINISHED,
        }
    }

    fn latency_metric(self) -> &'static str {
        match self {
            WorkerKind::Watch => WATCH_COMMAND_LATENCY,
            WorkerKind::Analyse => ANALYSE_COMMAND_LATENCY,
            WorkerKind::Trigger => TRIGGER_COMMAND_LATENCY,
        }
    }
}

pub(crate) struct CmdTracker {
    kind: WorkerKind,
    label: String,
    t0: Instant,
}

pub(crate) fn begin_command(kind: WorkerKind, label: &str) -> CmdTracker {
    counter!(kind.runs_metric(), "name" => label.to_string()).increment(1);
    CmdTracker {
        kind,
        label: label.to_string(),
        t0: Instant::now(),
    }
}

impl CmdTracker {
    pub(crate) fn finish(self, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        counter!(self.kind.finished_metric(), "name" => self.label.clone(), "status" => status)
            .increment(1);
        histogram!(self.kind.latency_metric(), "name" => self.label, "status" => status)
            .record(self.t0.elapsed().as_secs_f64());
    }
}

/// A configured watch, ready to run.
#[derive(Debug, Clone)]
pub struct WatchNode {
    pub name: String,
    pub path: String,
    pub run: RunSpec,
    pub timeout: Duration,
    pub schedule: Schedule,
}

/// A configured analysis, ready to run.
#[derive(Debug, Clone)]
pub struct AnalyseNode {
    pub parent_path: String,
    pub path: String,
    pub run: RunSpec,
    pub timeout: Duration,
}

/// A configured trigger, ready to run.
#[derive(Debug, Clone)]
pub struct TriggerNode {
    pub parent_path: String,
    pub path: String,
    pub period: Duration,
    pub run: RunSpec,
    pub timeout: Duration,
}

/// All configured nodes, flattened out of the config tree with their paths
/// assembled.
#[derive(Debug, Clone, Default)]
pub struct Nodes {
    pub watches: Vec<WatchNode>,
    pub analysers: Vec<AnalyseNode>,
    pub triggers: Vec<TriggerNode>,
}

/// Flatten a validated config into runnable nodes.
pub fn compile(cfg: &Config) -> Result<Nodes> {
    let mut nodes = Nodes::default();
    for watch in &cfg.watch {
        let path = format!("/{}", watch.name);
        nodes.watches.push(WatchNode {
            name: watch.name.clone(),
            path: path.clone(),
            run: watch.run.to_spec()?,
            timeout: watch.run.timeout()?,
            schedule: watch.schedule.to_schedule()?,
        });
        for child in &watch.analyse {
            compile_analysis(&path, child, &mut nodes)?;
        }
    }
    Ok(nodes)
}

fn compile_analysis(parent_path: &str, analysis: &AnalysisConfig, nodes: &mut Nodes) -> Result<()> {
    let path = format!("{parent_path}/{}", analysis.name);
    nodes.analysers.push(AnalyseNode {
        parent_path: parent_path.to_string(),
        path: path.clone(),
        run: analysis.run.to_spec()?,
        timeout: analysis.run.timeout()?,
    });

    for child in &analysis.analyse {
        compile_analysis(&path, child, nodes)?;
    }
    for trigger in &analysis.triggers {
        nodes.triggers.push(TriggerNode {
            parent_path: path.clone(),
            path: format!("{path}/{}", trigger.name),
            period: crate::config::validate::parse_duration(&trigger.period)?,
            run: trigger.run.to_spec()?,
            timeout: trigger.run.timeout()?,
        });
    }
    Ok(())
}

/// Block until either a "node stored" hint arrives or the backup poll timer
/// fires. Hints only cut latency; the timer alone keeps workers correct.
pub(crate) async fn wake(
    notify: &mut mpsc::Receiver<()>,
    poll: &Schedule,
    kind: WorkerKind,
    path: &str,
) -> Result<()> {
    tokio::select! {
        hint = notify.recv() => {
            anyhow::ensure!(hint.is_some(), "notification channel closed for {path}");
            counter!(NODE_STORED_HINTS_RECEIVED, "kind" => kind.as_str()).increment(1);
            debug!(node = %path, "woke up: notified");
        }
        _ = wait_until(poll.next_after(SystemTime::now())) => {
            debug!(node = %path, "woke up: poll timer");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_from_path;
    use std::io::Write;

    fn write_config(yaml: &str) -> Config {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        load_from_path(file.path()).unwrap()
    }

    #[test]
    fn compile_assembles_paths_and_parents() {
        let cfg = write_config(
            r#"
watch:
  - name: w
    run:
      shell: "echo -n hello"
    schedule:
      period: "1s"
    analyse:
      - name: a
        run:
          shell: "wc -c"
        analyse:
          - name: b
            run:
              shell: "cat"
        triggers:
          - name: t
            period: "1h"
            run:
              shell: "cat"
"#,
        );

        let nodes = compile(&cfg).unwrap();
        assert_eq!(nodes.watches.len(), 1);
        assert_eq!(nodes.watches[0].path, "/w");
        assert_eq!(nodes.watches[0].timeout, Duration::from_secs(5));

        assert_eq!(nodes.analysers.len(), 2);
        assert_eq!(nodes.analysers[0].parent_path, "/w");
        assert_eq!(nodes.analysers[0].path, "/w/a");
        assert_eq!(nodes.analysers[1].parent_path, "/w/a");
        assert_eq!(nodes.analysers[1].path, "/w/a/b");

        assert_eq!(nodes.triggers.len(), 1);
        assert_eq!(nodes.triggers[0].parent_path, "/w/a");
        assert_eq!(nodes.triggers[0].path, "/w/a/t");
        assert_eq!(nodes.triggers[0].period, Duration::from_secs(3600));
    }
}
