//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Worker thread pool sizing.
    pub workers: WorkerConfig,
    /// Per-model tile scheduler settings.
    pub scheduler: SchedulerConfig,
    /// LOD classification thresholds.
    pub lod: LodConfig,
    /// Generated geometry cache sizing.
    pub cache: CacheConfig,
    /// Outgoing tile update batching.
    pub batching: BatchingConfig,
    /// Picking and snapping.
    pub raycast: RaycastConfig,
    /// Highlight merge policy.
    pub highlight: HighlightConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Logical cores left free for the controlling and render threads.
    pub thread_reserve: usize,
    /// Lower bound on the worker count.
    pub min_threads: usize,
    /// Explicit worker count; overrides the core-based computation.
    pub max_threads: Option<usize>,
}

/// Tile scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Wall-clock budget of one update tick in milliseconds.
    pub frame_budget_ms: u64,
    /// Maximum samples reclassified in one tick.
    pub samples_per_tick: usize,
    /// Squared camera displacement that restarts the LOD pass.
    pub camera_move_threshold_sq: f32,
    /// Camera rotation (radians) that restarts the LOD pass.
    pub camera_angle_threshold_rad: f32,
    /// Edge length of the spatial cells used by tile bucket codes.
    pub cell_size: f32,
    /// Interval between scheduler ticks on a worker thread in milliseconds.
    pub tick_interval_ms: u64,
}

/// LOD thresholds. Screen sizes are in pixels and are multiplied by the
/// quality factor of the active view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LodConfig {
    /// Box dimension below which a sample counts as "small".
    pub small_object_size: f32,
    /// Screen size under which large objects are hidden.
    pub small_screen: f32,
    /// Screen size under which small objects are hidden and large objects are wires.
    pub medium_screen: f32,
    /// Screen size under which small objects are wires.
    pub large_screen: f32,
    /// Screen size of the thickness proxy under which geometry degrades to wires.
    pub wire_screen: f32,
}

/// Geometry cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity per gigabyte of device memory, in megabytes.
    pub base_capacity_mb: usize,
    /// Device memory in gigabytes; values under 2 are treated as 2.
    pub device_memory_gb: usize,
}

/// Outgoing tile request batching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchingConfig {
    /// A model's batch is flushed once it holds more than this many requests.
    pub flush_threshold: usize,
    /// Timer interval after which every non-empty batch is flushed, in milliseconds.
    pub flush_interval_ms: u64,
}

/// Raycast configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RaycastConfig {
    /// Wall-clock cap for candidate sorting and exact testing, in milliseconds.
    pub time_budget_ms: u64,
    /// Weight of the squared ray distance against the squared camera distance.
    pub ray_distance_multiplier: f32,
    /// Maximum distance between the ray and a snap candidate.
    pub snap_distance: f32,
    /// Rectangle queries return only items whose boxes are fully inside.
    pub rect_fully_inside: bool,
}

/// Highlight merge policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HighlightConfig {
    /// Items already highlighted keep their highlight when a new one is merged.
    pub preserve_original_material: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            thread_reserve: 2,
            min_threads: 2,
            max_threads: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_budget_ms: 16,
            samples_per_tick: 4096,
            camera_move_threshold_sq: 1.0,
            camera_angle_threshold_rad: 0.05,
            cell_size: 32.0,
            tick_interval_ms: 16,
        }
    }
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            small_object_size: 2.0,
            small_screen: 2.0,
            medium_screen: 4.0,
            large_screen: 16.0,
            wire_screen: 2.0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_capacity_mb: 100,
            device_memory_gb: 4,
        }
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 16,
            flush_interval_ms: 64,
        }
    }
}

impl Default for RaycastConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: 512,
            ray_distance_multiplier: 32.0,
            snap_distance: 0.05,
            rect_fully_inside: false,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Derived values ---

impl WorkerConfig {
    /// Number of worker threads for a machine with `logical_cores` cores.
    pub fn thread_count(&self, logical_cores: usize) -> usize {
        if let Some(n) = self.max_threads {
            return n.max(1);
        }
        logical_cores
            .saturating_sub(self.thread_reserve)
            .max(self.min_threads)
    }
}

impl SchedulerConfig {
    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(self.frame_budget_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl CacheConfig {
    /// Default cache capacity: `base_capacity_mb × max(device_memory_gb, 2)` MB.
    pub fn capacity_bytes(&self) -> usize {
        self.base_capacity_mb * 1024 * 1024 * self.device_memory_gb.max(2)
    }
}

impl BatchingConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl RaycastConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }
}

/// Default directory holding `config.ron` (`<platform config dir>/tessera`).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tessera")
}

// --- Validation / Load / Save / Reload ---

impl Config {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.cell_size <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.cell_size",
                reason: format!("must be positive, got {}", self.scheduler.cell_size),
            });
        }
        if self.scheduler.samples_per_tick == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.samples_per_tick",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.batching.flush_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "batching.flush_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.workers.min_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "workers.min_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        let config: Config = ron::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `config.ron` from `config_dir`, writing the defaults there first
    /// when it does not exist.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        if !path.exists() {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("wrote default tessera config to {}", path.display());
            return Ok(config);
        }
        let config = Self::read_file(&path)?;
        log::info!("loaded tessera config from {}", path.display());
        Ok(config)
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::Write)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::Write)?;
        Ok(())
    }

    /// Re-read the file; `Some` only when it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let fresh = Self::read_file(&config_dir.join(CONFIG_FILE))?;
        if fresh == *self {
            return Ok(None);
        }
        log::info!("tessera config changed on disk");
        Ok(Some(fresh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("flush_threshold: 16"));
        assert!(ron_str.contains("time_budget_ms: 512"));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(scheduler: (frame_budget_ms: 8))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.scheduler.frame_budget_ms, 8);
        assert_eq!(config.scheduler.samples_per_tick, 4096);
        assert_eq!(config.batching, BatchingConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    /// 100 MB per GB of device memory, never less than two gigabytes' worth.
    #[test]
    fn test_cache_capacity_floor() {
        let small = CacheConfig {
            base_capacity_mb: 100,
            device_memory_gb: 1,
        };
        assert_eq!(small.capacity_bytes(), 200 * 1024 * 1024);
        let large = CacheConfig {
            base_capacity_mb: 100,
            device_memory_gb: 8,
        };
        assert_eq!(large.capacity_bytes(), 800 * 1024 * 1024);
    }

    #[test]
    fn test_thread_count_reserves_cores() {
        let workers = WorkerConfig::default();
        assert_eq!(workers.thread_count(8), 6);
        assert_eq!(workers.thread_count(3), 2);
        assert_eq!(workers.thread_count(1), 2);

        let fixed = WorkerConfig {
            max_threads: Some(3),
            ..WorkerConfig::default()
        };
        assert_eq!(fixed.thread_count(64), 3);
    }

    #[test]
    fn test_validate_rejects_zero_cell() {
        let mut config = Config::default();
        config.scheduler.cell_size = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "scheduler.cell_size",
                ..
            })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache.device_memory_gb = 16;
        config.raycast.rect_fully_inside = true;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(loaded, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut modified = config.clone();
        modified.batching.flush_threshold = 32;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.unwrap().batching.flush_threshold, 32);
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }
}
