//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// World extent and save location.
    pub world: WorldConfig,
    /// Worker pools and rebuild throttles.
    pub pipeline: PipelineConfig,
    /// Optional subsystems.
    pub features: FeatureConfig,
    /// Network role and wire parameters.
    pub network: NetworkConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// World configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// Smallest chunk coordinate (in chunk units) that may exist, per axis.
    pub min_chunk: [i32; 3],
    /// Largest chunk coordinate (in chunk units) that may exist, per axis.
    pub max_chunk: [i32; 3],
    /// Root directory holding one subdirectory per world.
    pub save_dir: PathBuf,
    /// Name of the world subdirectory.
    pub world_name: String,
    /// Seed for terrain generation and random block updates.
    pub seed: u64,
}

/// Chunk pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// IO worker threads (0 = derive from CPU count).
    pub io_threads: usize,
    /// Compute worker threads (0 = derive from CPU count).
    pub work_threads: usize,
    /// Minimum interval between geometry rebuild requests of one chunk.
    pub geometry_throttle_ms: u64,
    /// Minimum interval between collider rebuild requests of one chunk.
    pub collider_throttle_ms: u64,
    /// Per-tick time shared by all chunks for neighbor edge synchronisation.
    pub edge_sync_budget_us: u64,
    /// Random block updates per generated chunk and tick.
    pub random_updates_per_tick: u32,
}

/// Feature toggles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureConfig {
    /// Load chunks from and save chunks to persistent storage.
    pub use_serialization: bool,
    /// Store only the modified cells instead of full snapshots.
    pub use_differential_serialization: bool,
}

/// Which side of a connection this process plays.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum NetworkRole {
    /// No networking; edits stay local.
    #[default]
    Standalone,
    /// Authoritative side; broadcasts edits to clients.
    Server,
    /// Forwards local edits to the server.
    Client,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Role of this process.
    pub role: NetworkRole,
    /// Server only: whether clients may connect and receive edits.
    pub allow_connections: bool,
    /// Transport header bytes preceding the fragment leader.
    pub header_size: usize,
    /// Largest fragment (header included) the transport accepts.
    pub max_fragment_size: usize,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for WorldConfig {
    fn default() -> Self {
        let save_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cubeworks")
            .join("worlds");
        Self {
            min_chunk: [-64, -8, -64],
            max_chunk: [64, 8, 64],
            save_dir,
            world_name: "default".to_string(),
            seed: 0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            io_threads: 0,
            work_threads: 0,
            geometry_throttle_ms: 100,
            collider_throttle_ms: 250,
            edge_sync_budget_us: 2_000,
            random_updates_per_tick: 0,
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            use_serialization: true,
            use_differential_serialization: false,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            role: NetworkRole::Standalone,
            allow_connections: false,
            header_size: 4,
            max_fragment_size: 1200,
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

impl PipelineConfig {
    /// IO pool size, falling back to a CPU-derived count.
    pub fn resolved_io_threads(&self) -> usize {
        if self.io_threads > 0 {
            self.io_threads
        } else {
            (num_cpus::get() / 4).max(1)
        }
    }

    /// Compute pool size, falling back to a CPU-derived count.
    pub fn resolved_work_threads(&self) -> usize {
        if self.work_threads > 0 {
            self.work_threads
        } else {
            num_cpus::get().saturating_sub(1).max(1)
        }
    }
}

impl WorldConfig {
    /// Directory holding this world's chunk files.
    pub fn world_dir(&self) -> PathBuf {
        self.save_dir.join(&self.world_name)
    }
}

// --- Persistence ---

/// File name of the config inside the config directory.
pub const CONFIG_FILE: &str = "config.ron";

impl Config {
    /// Reads `config.ron` from `config_dir`. A missing file is replaced by
    /// the defaults, which are written back for the next run.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        if !path.exists() {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("No config at {}, wrote defaults", path.display());
            return Ok(config);
        }

        let config = Self::read_file(&path)?;
        log::info!("Config loaded from {}", path.display());
        Ok(config)
    }

    /// Writes the config to `config_dir/config.ron`, creating the directory.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .struct_names(false);
        let text = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;
        std::fs::write(config_dir.join(CONFIG_FILE), text).map_err(ConfigError::WriteError)
    }

    /// Re-reads the file. `None` when it still matches `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let fresh = Self::read_file(&config_dir.join(CONFIG_FILE))?;
        if fresh == *self {
            return Ok(None);
        }
        log::info!("Config changed on disk");
        Ok(Some(fresh))
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = ron::from_str(&text).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects world bounds whose minimum exceeds the maximum on any axis.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let min = self.world.min_chunk;
        let max = self.world.max_chunk;
        if min.iter().zip(max.iter()).any(|(lo, hi)| lo > hi) {
            return Err(ConfigError::InvalidBounds { min, max });
        }
        Ok(())
    }
}
