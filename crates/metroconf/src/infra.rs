//! Infrastructure configuration - where things live and how loud we log.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for fleet snapshots and target layouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Fleet snapshot file (JSON) the CLI reads devices from.
    /// Default: ./fleet.json
    #[serde(default = "PathsConfig::default_fleet_file")]
    pub fleet_file: PathBuf,

    /// Target domain layout (JSON) used by `plan` and `apply` when no
    /// `--target` is given.
    #[serde(default)]
    pub target_file: Option<PathBuf>,
}

impl PathsConfig {
    fn default_fleet_file() -> PathBuf {
        PathBuf::from("fleet.json")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            fleet_file: Self::default_fleet_file(),
            target_file: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or full `EnvFilter` directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Infrastructure sections grouped together.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
