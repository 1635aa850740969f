// src/config/mod.rs

//! Configuration: YAML model, loading, and semantic validation.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    AnalysisConfig, Config, ProgramConfig, RandomConfig, RunConfig, ScheduleConfig, TriggerConfig,
    WatchConfig,
};
