//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, MetroConfig};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/metronome/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("metronome/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("metronome.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load a single config file on top of the defaults.
pub fn load_from_file(path: &Path) -> Result<MetroConfig, ConfigError> {
    let table = load_table(path)?;
    from_table(table, Some(&path.to_path_buf()))
}

/// Merge `overlay` into `base`, key by key. Nested tables merge recursively,
/// everything else is replaced.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table into a config, filling defaults and expanding
/// paths. `origin` only labels parse errors.
pub fn from_table(table: toml::Table, origin: Option<&PathBuf>) -> Result<MetroConfig, ConfigError> {
    let mut config =
        MetroConfig::deserialize(toml::Value::Table(table)).map_err(|e| ConfigError::Parse {
            path: origin.cloned().unwrap_or_default(),
            message: e.to_string(),
        })?;

    config.infra.paths.fleet_file = expand_path(&config.infra.paths.fleet_file.to_string_lossy());
    config.infra.paths.target_file = config
        .infra
        .paths
        .target_file
        .as_ref()
        .map(|p| expand_path(&p.to_string_lossy()));

    if config.control.apply.progress_granularity == 0 || config.control.apply.progress_granularity > 100 {
        return Err(ConfigError::Invalid(format!(
            "apply.progress_granularity must be within 1..=100, got {}",
            config.control.apply.progress_granularity
        )));
    }

    Ok(config)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut MetroConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("METRONOME_FLEET_FILE") {
        config.infra.paths.fleet_file = expand_path(&v);
        sources.env_overrides.push("METRONOME_FLEET_FILE".to_string());
    }
    if let Ok(v) = env::var("METRONOME_TARGET_FILE") {
        config.infra.paths.target_file = Some(expand_path(&v));
        sources.env_overrides.push("METRONOME_TARGET_FILE".to_string());
    }

    if let Ok(v) = env::var("METRONOME_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("METRONOME_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    if let Ok(v) = env::var("METRONOME_COMMAND_LATENCY_MS") {
        if let Ok(ms) = v.parse() {
            config.control.simulation.command_latency_ms = ms;
            sources.env_overrides.push("METRONOME_COMMAND_LATENCY_MS".to_string());
        }
    }
    if let Ok(v) = env::var("METRONOME_FAILING_DEVICES") {
        config.control.simulation.failing_devices = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        sources.env_overrides.push("METRONOME_FAILING_DEVICES".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
