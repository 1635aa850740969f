// src/exec/spec.rs

//! The shapes a configured command can take.

const SHELL_NAME: &str = "/bin/bash";
const PYTHON3_NAME: &str = "python3";

/// Imports prepended to every `python3` one-liner.
const PYTHON_PRELUDE: &str = "import sys, json;";

/// A fully resolved command: program path plus argument vector.
///
/// `DoNotRun` is a placeholder node that records empty successful runs; it is
/// legal for watches but rejected at startup by analyse and trigger workers,
/// which exist to transform real output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSpec {
    /// A shell one-liner, run as `/bin/bash -c <command>`.
    Shell(String),
    /// A python one-liner, run as `python3 -c "<prelude><command>"`.
    Python3(String),
    /// A direct program invocation.
    Program { binary: String, args: Vec<String> },
    /// Run nothing of consequence (`/bin/true`).
    DoNotRun,
}

impl RunSpec {
    pub fn program(&self) -> &str {
        match self {
            RunSpec::Shell(_) => SHELL_NAME,
            RunSpec::Python3(_) => PYTHON3_NAME,
            RunSpec::Program { binary, .. } => binary,
            RunSpec::DoNotRun => "/bin/true",
        }
    }

    pub fn args(&self) -> Vec<String> {
        match self {
            RunSpec::Shell(cmd) => vec!["-c".to_string(), cmd.clone()],
            RunSpec::Python3(cmd) => {
                vec!["-c".to_string(), format!("{PYTHON_PRELUDE}{cmd}")]
            }
            RunSpec::Program { args, .. } => args.clone(),
            RunSpec::DoNotRun => Vec::new(),
        }
    }

    pub fn should_run(&self) -> bool {
        !matches!(self, RunSpec::DoNotRun)
    }
}
