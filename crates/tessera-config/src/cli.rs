//! Command-line argument parsing for hosts embedding the engine.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Engine command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "tessera", about = "Tile-based LOD streaming engine")]
pub struct CliArgs {
    /// Number of worker threads.
    #[arg(long)]
    pub threads: Option<usize>,

    /// Device memory in gigabytes used to size the geometry cache.
    #[arg(long)]
    pub memory_gb: Option<usize>,

    /// Per-tick scheduler budget in milliseconds.
    #[arg(long)]
    pub frame_budget_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(threads) = args.threads {
            self.workers.max_threads = Some(threads);
        }
        if let Some(gb) = args.memory_gb {
            self.cache.device_memory_gb = gb;
        }
        if let Some(ms) = args.frame_budget_ms {
            self.scheduler.frame_budget_ms = ms;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs::parse_from(["tessera", "--threads", "3", "--memory-gb", "16"]);
        config.apply_cli_overrides(&args);
        assert_eq!(config.workers.max_threads, Some(3));
        assert_eq!(config.cache.device_memory_gb, 16);
        // Non-overridden fields retain defaults
        assert_eq!(config.scheduler.frame_budget_ms, 16);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }
}
