//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// cubeworks command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "cubeworks", about = "Voxel chunk pipeline driver")]
pub struct CliArgs {
    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Upper bound on simulated ticks before exiting.
    #[arg(long, default_value_t = 600)]
    pub ticks: u32,

    /// World name (subdirectory of the save directory).
    #[arg(long)]
    pub world: Option<String>,

    /// World seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Disable loading and saving chunks.
    #[arg(long)]
    pub no_save: bool,

    /// IO worker threads.
    #[arg(long)]
    pub io_threads: Option<usize>,

    /// Compute worker threads.
    #[arg(long)]
    pub work_threads: Option<usize>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if let Some(ref name) = args.world {
            self.world.world_name = name.clone();
        }
        if let Some(seed) = args.seed {
            self.world.seed = seed;
        }
        if args.no_save {
            self.features.use_serialization = false;
        }
        if let Some(n) = args.io_threads {
            self.pipeline.io_threads = n;
        }
        if let Some(n) = args.work_threads {
            self.pipeline.work_threads = n;
        }
    }
}
