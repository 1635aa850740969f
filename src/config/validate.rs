// src/config/validate.rs

//! Semantic validation of a parsed [`Config`], and the conversions from raw
//! config sections to their runtime forms.
//!
//! Everything that can be wrong with a config is reported here, at load
//! time; the workers never see an invalid run spec, schedule, or duration.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::config::model::{
    AnalysisConfig, Config, RandomConfig, RunConfig, ScheduleConfig, TriggerConfig, WatchConfig,
};
use crate::exec::{self, RunSpec, DEFAULT_TIMEOUT};
use crate::schedule::Schedule;

/// Parse a duration string like `"250ms"`, `"3s"`, `"1m"`, `"2h"`.
pub(crate) fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("not a valid duration: empty string");
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .with_context(|| format!("duration {s:?} is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .with_context(|| format!("invalid duration number {num_part:?}"))?;

    match unit_part.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        unit => bail!("unsupported duration unit {unit:?}; expected ms, s, m, or h"),
    }
}

/// Node names become path components, lease-key components, and metric
/// labels, so the path and key separators are forbidden inside them.
fn check_node_name(s: &str) -> Result<()> {
    if s.is_empty() {
        bail!("missing 'name'");
    }
    if s.contains('/') {
        bail!("invalid name {s:?}: cannot contain '/'");
    }
    if s.contains(':') {
        bail!("invalid name {s:?}: cannot contain ':'");
    }
    if let Some(initial) = s.chars().next() {
        if initial.is_ascii_digit() || initial == '_' {
            bail!("invalid name {s:?}: first character cannot be {initial:?}");
        }
    }
    Ok(())
}

impl RunConfig {
    /// Resolve the oneof into a concrete [`RunSpec`].
    pub fn to_spec(&self) -> Result<RunSpec> {
        let set = [
            self.shell.is_some(),
            self.python3.is_some(),
            self.program.is_some(),
            self.do_not_run,
        ]
        .iter()
        .filter(|set| **set)
        .count();

        if set == 0 {
            bail!("empty run config: one of shell/python3/program/do-not-run is required");
        }
        if set > 1 {
            bail!("ambiguous run config: only one of shell/python3/program/do-not-run may be set");
        }

        if let Some(cmd) = &self.shell {
            Ok(RunSpec::Shell(cmd.clone()))
        } else if let Some(cmd) = &self.python3 {
            Ok(RunSpec::Python3(cmd.clone()))
        } else if let Some(program) = &self.program {
            Ok(RunSpec::Program {
                binary: program.binary.clone(),
                args: program.args.clone(),
            })
        } else {
            Ok(RunSpec::DoNotRun)
        }
    }

    pub fn timeout(&self) -> Result<Duration> {
        match &self.timeout {
            None => Ok(DEFAULT_TIMEOUT),
            Some(s) => parse_duration(s).context("in 'timeout'"),
        }
    }
}

impl ScheduleConfig {
    pub fn to_schedule(&self) -> Result<Schedule> {
        match (&self.period, &self.random) {
            (None, None) => bail!("empty schedule config: one of period/random is required"),
            (Some(_), Some(_)) => {
                bail!("ambiguous schedule config: only one of period/random may be set")
            }
            (Some(period), None) => {
                let dur = parse_duration(period).context("invalid 'period'")?;
                if dur.is_zero() {
                    bail!("invalid 'period': must be positive");
                }
                Ok(Schedule::Periodic(dur))
            }
            (None, Some(RandomConfig { min, max })) => {
                let min = parse_duration(min).context("invalid 'random.min'")?;
                let max = parse_duration(max).context("invalid 'random.max'")?;
                if max < min {
                    bail!("invalid random schedule: random.max < random.min ({max:?} < {min:?})");
                }
                Ok(Schedule::UniformRandom { min, max })
            }
        }
    }
}

/// Validate the whole config tree, then probe every configured binary with
/// `which` so a missing command is a startup error, not a runtime surprise.
pub async fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.watch.is_empty() {
        bail!("config contains no watches");
    }

    let mut specs: Vec<(String, RunSpec)> = Vec::new();
    for (i, watch) in cfg.watch.iter().enumerate() {
        check_watch(watch, &mut specs)
            .with_context(|| format!("in watch {i} ({:?})", watch.name))?;
    }

    for (path, spec) in &specs {
        probe_binary(spec)
            .await
            .with_context(|| format!("for node {path:?}"))?;
    }

    Ok(())
}

fn check_watch(watch: &WatchConfig, specs: &mut Vec<(String, RunSpec)>) -> Result<()> {
    check_node_name(&watch.name)?;

    let spec = watch.run.to_spec().context("in run section")?;
    watch.run.timeout().context("in run section")?;
    watch.schedule.to_schedule().context("in schedule section")?;

    let path = format!("/{}", watch.name);
    specs.push((path.clone(), spec));

    check_children(&path, &watch.analyse, &[], specs)
}

fn check_analysis(
    parent_path: &str,
    analysis: &AnalysisConfig,
    specs: &mut Vec<(String, RunSpec)>,
) -> Result<()> {
    check_node_name(&analysis.name)?;

    let spec = analysis.run.to_spec().context("in run section")?;
    analysis.run.timeout().context("in run section")?;

    let path = format!("{parent_path}/{}", analysis.name);
    specs.push((path.clone(), spec));

    check_children(&path, &analysis.analyse, &analysis.triggers, specs)
}

fn check_trigger(
    parent_path: &str,
    trigger: &TriggerConfig,
    specs: &mut Vec<(String, RunSpec)>,
) -> Result<()> {
    check_node_name(&trigger.name)?;

    if trigger.period.is_empty() {
        bail!("missing period");
    }
    parse_duration(&trigger.period).context("invalid 'period'")?;

    let spec = trigger.run.to_spec().context("in run section")?;
    trigger.run.timeout().context("in run section")?;

    specs.push((format!("{parent_path}/{}", trigger.name), spec));
    Ok(())
}

fn check_children(
    path: &str,
    analyses: &[AnalysisConfig],
    triggers: &[TriggerConfig],
    specs: &mut Vec<(String, RunSpec)>,
) -> Result<()> {
    let mut seen: Vec<&str> = Vec::new();

    for (i, child) in analyses.iter().enumerate() {
        if seen.contains(&child.name.as_str()) {
            bail!("child {:?} occurs twice", child.name);
        }
        check_analysis(path, child, specs)
            .with_context(|| format!("in analysis {i} ({:?})", child.name))?;
        seen.push(&child.name);
    }

    for (i, child) in triggers.iter().enumerate() {
        if seen.contains(&child.name.as_str()) {
            bail!("child {:?} occurs twice", child.name);
        }
        check_trigger(path, child, specs)
            .with_context(|| format!("in trigger {i} ({:?})", child.name))?;
        seen.push(&child.name);
    }

    Ok(())
}

async fn probe_binary(spec: &RunSpec) -> Result<()> {
    let which = RunSpec::Program {
        binary: "which".to_string(),
        args: vec![spec.program().to_string()],
    };

    let result = exec::run(&which, Duration::from_secs(1), None)
        .await
        .with_context(|| format!("probing for {:?}", spec.program()))?;

    if !result.success {
        bail!(
            "will be unable to execute command: which({:?}) found nothing",
            spec.program()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn node_names_are_restricted() {
        assert!(check_node_name("diskfree").is_ok());
        assert!(check_node_name("Disk-Free").is_ok());
        assert!(check_node_name("").is_err());
        assert!(check_node_name("a/b").is_err());
        assert!(check_node_name("a:b").is_err());
        assert!(check_node_name("0day").is_err());
        assert!(check_node_name("_hidden").is_err());
    }

    #[test]
    fn run_config_is_a_oneof() {
        let empty = RunConfig::default();
        assert!(empty.to_spec().is_err());

        let ambiguous = RunConfig {
            shell: Some("true".into()),
            do_not_run: true,
            ..Default::default()
        };
        assert!(ambiguous.to_spec().is_err());

        let shell = RunConfig {
            shell: Some("echo hi".into()),
            ..Default::default()
        };
        assert_eq!(shell.to_spec().unwrap(), RunSpec::Shell("echo hi".into()));
    }

    #[test]
    fn timeout_defaults_to_five_seconds() {
        let cfg = RunConfig {
            shell: Some("true".into()),
            ..Default::default()
        };
        assert_eq!(cfg.timeout().unwrap(), Duration::from_secs(5));

        let cfg = RunConfig {
            shell: Some("true".into()),
            timeout: Some("100ms".into()),
            ..Default::default()
        };
        assert_eq!(cfg.timeout().unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn schedule_config_is_a_oneof() {
        let empty = ScheduleConfig::default();
        assert!(empty.to_schedule().is_err());

        let periodic = ScheduleConfig {
            period: Some("30s".into()),
            ..Default::default()
        };
        assert_eq!(
            periodic.to_schedule().unwrap(),
            Schedule::Periodic(Duration::from_secs(30))
        );

        let inverted = ScheduleConfig {
            random: Some(RandomConfig {
                min: "2m".into(),
                max: "1m".into(),
            }),
            ..Default::default()
        };
        assert!(inverted.to_schedule().is_err());
    }

    #[test]
    fn zero_period_is_rejected() {
        let cfg = ScheduleConfig {
            period: Some("0s".into()),
            ..Default::default()
        };
        assert!(cfg.to_schedule().is_err());
    }
}
