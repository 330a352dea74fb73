//! Control configuration - how plans are applied and how the simulated
//! network behaves.

use serde::{Deserialize, Serialize};

/// Plan application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    /// Clock domain addressed by clock source commands.
    /// Only single-domain devices are managed, so this is almost always 0.
    #[serde(default)]
    pub clock_domain_index: u16,

    /// Percent step between progress log lines.
    /// Default: 10
    #[serde(default = "ApplyConfig::default_progress_granularity")]
    pub progress_granularity: u8,
}

impl ApplyConfig {
    fn default_progress_granularity() -> u8 {
        10
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            clock_domain_index: 0,
            progress_granularity: Self::default_progress_granularity(),
        }
    }
}

/// Simulated network settings used by `metro apply`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SimulationConfig {
    /// Delay before each simulated command answers, in milliseconds.
    /// Zero answers inline.
    #[serde(default)]
    pub command_latency_ms: u64,

    /// Device ids (hex, e.g. "0x001B92FFFE000001") whose commands answer
    /// NotSupported.
    #[serde(default)]
    pub failing_devices: Vec<String>,
}

/// Control sections grouped together.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ControlConfig {
    #[serde(default)]
    pub apply: ApplyConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,
}
