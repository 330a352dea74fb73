//! Minimal configuration loading for Metronome.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): where fleet snapshots live and how
//!   much we log.
//!
//! - **Control** (`ControlConfig`): how reconciliation plans are applied and
//!   how the simulated network answers.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/metronome/config.toml` (system)
//! 2. `~/.config/metronome/config.toml` (user)
//! 3. `./metronome.toml` (local override, or the `--config` path)
//! 4. Environment variables (`METRONOME_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! fleet_file = "~/studio/fleet.json"
//! target_file = "~/studio/target.json"
//!
//! [telemetry]
//! log_level = "debug"
//!
//! [apply]
//! progress_granularity = 25
//!
//! [simulation]
//! command_latency_ms = 20
//! failing_devices = ["0x001B92FFFE000003"]
//! ```

pub mod control;
pub mod infra;
pub mod loader;

pub use control::{ApplyConfig, ControlConfig, SimulationConfig};
pub use infra::{InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete Metronome configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetroConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(flatten)]
    pub control: ControlConfig,
}

impl MetroConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, sources.files.last())?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# Metronome Configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "fleet_file = \"{}\"\n",
            self.infra.paths.fleet_file.display()
        ));
        if let Some(target) = &self.infra.paths.target_file {
            output.push_str(&format!("target_file = \"{}\"\n", target.display()));
        }

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        output.push_str("\n[apply]\n");
        output.push_str(&format!(
            "clock_domain_index = {}\n",
            self.control.apply.clock_domain_index
        ));
        output.push_str(&format!(
            "progress_granularity = {}\n",
            self.control.apply.progress_granularity
        ));

        output.push_str("\n[simulation]\n");
        output.push_str(&format!(
            "command_latency_ms = {}\n",
            self.control.simulation.command_latency_ms
        ));
        output.push_str("failing_devices = [\n");
        for device in &self.control.simulation.failing_devices {
            output.push_str(&format!("    \"{}\",\n", device));
        }
        output.push_str("]\n");

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetroConfig::default();
        assert_eq!(config.infra.paths.fleet_file, PathBuf::from("fleet.json"));
        assert_eq!(config.infra.telemetry.log_level, "info");
        assert_eq!(config.control.apply.progress_granularity, 10);
        assert!(config.control.simulation.failing_devices.is_empty());
    }

    #[test]
    fn test_to_toml_roundtrips_through_parser() {
        let mut config = MetroConfig::default();
        config.control.simulation.failing_devices = vec!["0x0000000000000003".to_string()];
        config.infra.paths.target_file = Some(PathBuf::from("target.json"));

        let text = config.to_toml();
        assert!(text.contains("[paths]"));
        assert!(text.contains("[simulation]"));

        let parsed: MetroConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.infra.paths.target_file, Some(PathBuf::from("target.json")));
        assert_eq!(parsed.control.simulation.failing_devices.len(), 1);
    }
}
