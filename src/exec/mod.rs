// src/exec/mod.rs

//! Subprocess execution layer.
//!
//! - [`spec`] defines the shapes a configured command can take.
//! - [`command`] owns the runner: spawn, feed stdin, capture output, enforce
//!   the deadline, and kill the whole process group on expiry.

pub mod command;
pub mod spec;

pub use command::{run, RunError, RunResult, DEFAULT_TIMEOUT};
pub use spec::RunSpec;
