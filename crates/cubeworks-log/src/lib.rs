//! Structured logging for cubeworks.
//!
//! Console output with uptime, target and thread names (pool workers are named
//! `cubeworks-io-N` / `cubeworks-work-N`), plus a JSON log file in debug builds.
//! The level comes from `RUST_LOG` when set, otherwise from the config.

use std::path::{Path, PathBuf};

use cubeworks_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config name a level.
const DEFAULT_FILTER: &str = "info";

/// File name of the JSON log written in debug builds.
pub const LOG_FILE_NAME: &str = "cubeworks.log";

/// Initialize the global tracing subscriber.
///
/// # Arguments
///
/// * `log_dir` - Optional directory for the JSON log file (debug builds only)
/// * `debug_build` - Whether this is a debug build (enables file logging)
/// * `config` - Optional configuration to use for log level override
///
/// # Examples
///
/// ```no_run
/// use cubeworks_config::Config;
/// use cubeworks_log::init_logging;
///
/// let config = Config::default();
/// init_logging(Some(std::path::Path::new("./logs")), true, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let filter_str = filter_string(config);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true) // worker pools name their threads
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_file_path(log_dir))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// Create an `EnvFilter` with the default filter string.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

/// Path of the JSON log inside `log_dir`.
pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE_NAME)
}

fn filter_string(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.debug.log_level.is_empty() => config.debug.log_level.clone(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level() {
        let filter = default_env_filter();
        assert!(format!("{filter}").contains("info"));
    }

    #[test]
    fn test_config_level_wins_over_default() {
        let mut config = Config::default();
        config.debug.log_level = "debug,cubeworks_world=trace".to_string();
        assert_eq!(filter_string(Some(&config)), "debug,cubeworks_world=trace");
    }

    #[test]
    fn test_empty_config_level_falls_back() {
        let mut config = Config::default();
        config.debug.log_level.clear();
        assert_eq!(filter_string(Some(&config)), DEFAULT_FILTER);
        assert_eq!(filter_string(None), DEFAULT_FILTER);
    }

    #[test]
    fn test_env_filter_parsing() {
        let valid_filters = [
            "info",
            "debug,cubeworks_world=trace",
            "warn,cubeworks_voxel=debug",
            "error",
        ];
        for filter_str in &valid_filters {
            let result = EnvFilter::try_from(*filter_str);
            assert!(result.is_ok(), "Failed to parse filter: {}", filter_str);
        }
    }

    #[test]
    fn test_log_file_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = log_file_path(temp_dir.path());
        assert_eq!(path.file_name().unwrap(), LOG_FILE_NAME);
        assert_eq!(path.parent().unwrap(), temp_dir.path());
    }
}
