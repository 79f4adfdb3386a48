//! Configuration for the tile streaming engine.
//!
//! Settings persist to disk as RON, every section falls back to defaults when
//! missing, and command-line overrides are applied on top via clap.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    BatchingConfig, CacheConfig, Config, DebugConfig, HighlightConfig, LodConfig, RaycastConfig,
    SchedulerConfig, WorkerConfig, default_config_dir,
};
pub use error::ConfigError;
