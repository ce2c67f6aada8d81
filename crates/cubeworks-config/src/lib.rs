//! Configuration for the cubeworks chunk pipeline.
//!
//! Settings persist to disk as RON (`config.ron`), tolerate missing and
//! unknown fields, and can be overridden from the command line via clap.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE, Config, DebugConfig, FeatureConfig, NetworkConfig, NetworkRole, PipelineConfig, WorldConfig,
};
pub use error::ConfigError;
