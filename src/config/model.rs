// src/config/model.rs

use serde::Deserialize;

/// Top-level configuration as read from a YAML file.
///
/// ```yaml
/// watch:
///   - name: diskfree
///     run:
///       shell: "df -k --output=avail / | tail -1"
///     schedule:
///       period: "5m"
///     analyse:
///       - name: low
///         run:
///           python3: "v = int(sys.stdin.read()); print('low' if v < 1048576 else '')"
///         triggers:
///           - name: page
///             period: "1h"
///             run:
///               shell: "mail -s 'disk low' ops@example.com"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watch: Vec<WatchConfig>,
}

/// A root node: runs on a schedule, its output seeds the analyses below it.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    pub name: String,
    pub run: RunConfig,
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub analyse: Vec<AnalysisConfig>,
}

/// A derived node: runs once per parent output, with that output on stdin.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    pub name: String,
    pub run: RunConfig,
    #[serde(default)]
    pub analyse: Vec<AnalysisConfig>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

/// A side-effect node: fires on the latest non-empty parent output, at most
/// once per `period`. The primary application is sending notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    pub name: String,
    pub period: String,
    pub run: RunConfig,
}

/// How to run a command. Exactly one of `shell` / `python3` / `program` /
/// `do-not-run` must be set; this is enforced by validation, not serde.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub python3: Option<String>,
    #[serde(default)]
    pub program: Option<ProgramConfig>,
    #[serde(default, rename = "do-not-run")]
    pub do_not_run: bool,

    /// Duration string, e.g. `"5s"`. Defaults to 5 s when absent.
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramConfig {
    pub binary: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// When to run a watch. Exactly one of `period` / `random` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub random: Option<RandomConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomConfig {
    pub min: String,
    pub max: String,
}
