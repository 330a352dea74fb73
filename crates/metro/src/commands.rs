//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use metroconf::{ConfigSources, MetroConfig};
use metronome::{
    build_domain_model, DeviceDirectory, DomainMapping, FleetDirectory, MediaClockManager, SimulatedNetwork,
    TargetLayout,
};

use crate::render;

/// Config plus the loaded fleet snapshot.
pub struct Session {
    pub config: MetroConfig,
    pub fleet_path: PathBuf,
    pub fleet: Arc<FleetDirectory>,
}

impl Session {
    /// Load the fleet named by `fleet_override` or by the config.
    pub fn open(config: MetroConfig, fleet_override: Option<&Path>) -> Result<Self> {
        let fleet_path = fleet_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config.infra.paths.fleet_file.clone());
        let fleet = FleetDirectory::load(&fleet_path)
            .with_context(|| format!("Failed to load fleet from {}", fleet_path.display()))?;
        tracing::debug!(fleet.path = %fleet_path.display(), fleet.devices = fleet.device_ids().len(), "Fleet loaded");
        Ok(Self {
            config,
            fleet_path,
            fleet: Arc::new(fleet),
        })
    }

    fn current_model(&self) -> DomainMapping {
        build_domain_model(&*self.fleet, self.fleet.device_ids())
    }

    fn target_path(&self, target: Option<&Path>) -> Result<PathBuf> {
        target
            .map(Path::to_path_buf)
            .or_else(|| self.config.infra.paths.target_file.clone())
            .context("No target layout given; pass --target or set paths.target_file")
    }

    fn manager(&self) -> Result<MediaClockManager> {
        let network = SimulatedNetwork::from_config(self.fleet.clone(), &self.config.control.simulation)
            .context("Invalid simulation.failing_devices")?;
        Ok(MediaClockManager::new(self.fleet.clone(), Arc::new(network)).with_apply_config(&self.config.control.apply))
    }
}

pub fn load_target(path: &Path) -> Result<DomainMapping> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let layout: TargetLayout =
        serde_json::from_str(&text).with_context(|| format!("Failed to parse target layout {}", path.display()))?;
    Ok(layout.into_mapping())
}

/// Resolved master and error per device.
pub fn masters(session: &Session) -> String {
    render::masters(&session.current_model(), &*session.fleet)
}

/// The current domain model, as text or as a target layout in JSON.
pub fn model(session: &Session, json: bool) -> Result<String> {
    let model = session.current_model();
    if json {
        let layout = TargetLayout::from_mapping(&model);
        return Ok(serde_json::to_string_pretty(&layout)? + "\n");
    }
    Ok(render::model(&model, &*session.fleet))
}

/// What `apply` would do, without doing it.
pub fn plan(session: &Session, target: Option<&Path>, json: bool) -> Result<String> {
    let target = load_target(&session.target_path(target)?)?;
    let mut manager = session.manager()?;
    let plan = manager.plan_media_clock_domain_model(&target);
    if manager.is_conflicting_with_stream_formats(&target) {
        tracing::warn!("Target rates conflict with current stream formats");
    }
    if json {
        return Ok(serde_json::to_string_pretty(&plan)? + "\n");
    }
    Ok(plan.to_string())
}

/// Run the plan against the simulated network and report the outcome.
///
/// With `write`, the resulting fleet replaces the fleet file.
pub async fn apply(session: &Session, target: Option<&Path>, write: bool) -> Result<String> {
    let target = load_target(&session.target_path(target)?)?;
    let mut manager = session.manager()?;
    if manager.is_conflicting_with_stream_formats(&target) {
        tracing::warn!("Target rates conflict with current stream formats");
    }

    let info = manager.apply_media_clock_domain_model(&target).await;
    manager.process_pending_events();

    let mut report = format!(
        "applied {} commands in {} phases, {} errors\n",
        info.commands,
        info.phases,
        info.errors.len()
    );
    report.push_str(&render::errors(&info.errors, &*session.fleet));

    if write {
        session
            .fleet
            .save(&session.fleet_path)
            .with_context(|| format!("Failed to write fleet to {}", session.fleet_path.display()))?;
        tracing::info!(fleet.path = %session.fleet_path.display(), "Fleet written");
    }
    Ok(report)
}

/// Effective configuration and where it came from.
pub fn config(config: &MetroConfig, sources: &ConfigSources) -> String {
    let mut out = String::new();
    if sources.files.is_empty() {
        out.push_str("# No config files found, using defaults\n");
    }
    for file in &sources.files {
        out.push_str(&format!("# from {}\n", file.display()));
    }
    for var in &sources.env_overrides {
        out.push_str(&format!("# env {}\n", var));
    }
    out.push('\n');
    out.push_str(&config.to_toml());
    out
}
