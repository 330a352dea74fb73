//! Media clock manager
//!
//! Keeps the last domain model in step with the directory and drives target
//! models onto the network. Directory events come in on a broadcast
//! subscription taken at construction; manager events go out on another.

use std::collections::BTreeSet;
use std::sync::Arc;

use metroconf::ApplyConfig;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::chain::Progress;
use crate::command::{CommandErrors, NetworkCommands};
use crate::directory::{DeviceDirectory, DirectoryEvent};
use crate::mapping::{build_domain_model, DomainMapping};
use crate::notifier::{changed_devices, devices_following_master};
use crate::planner::{plan_transition_in_domain, TransitionPlan};
use crate::resolver::{MasterResolution, ResolutionError};
use crate::types::{ClockDomainIndex, DeviceId, StreamIndex};

const EVENT_CAPACITY: usize = 64;

/// Outcome of one apply run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyInfo {
    pub errors: CommandErrors,
    pub phases: usize,
    pub commands: usize,
}

impl ApplyInfo {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// Devices whose primary master or resolution error changed.
    ConnectionsUpdated(Vec<DeviceId>),
    /// Devices following a master that was renamed.
    MasterNameChanged(Vec<DeviceId>),
    ApplyProgress { completed: usize, total: usize, percent: u8 },
    ApplyFinished(ApplyInfo),
}

pub struct MediaClockManager {
    directory: Arc<dyn DeviceDirectory>,
    network: Arc<dyn NetworkCommands>,
    devices: BTreeSet<DeviceId>,
    current: DomainMapping,
    clock_domain: ClockDomainIndex,
    progress_granularity: u8,
    events: broadcast::Sender<ManagerEvent>,
    subscription: broadcast::Receiver<DirectoryEvent>,
}

impl MediaClockManager {
    pub fn new(directory: Arc<dyn DeviceDirectory>, network: Arc<dyn NetworkCommands>) -> Self {
        let subscription = directory.subscribe();
        let devices: BTreeSet<DeviceId> = directory.device_ids().into_iter().collect();
        let current = build_domain_model(directory.as_ref(), devices.iter().copied());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let defaults = ApplyConfig::default();
        Self {
            directory,
            network,
            devices,
            current,
            clock_domain: defaults.clock_domain_index,
            progress_granularity: defaults.progress_granularity,
            events,
            subscription,
        }
    }

    pub fn with_apply_config(mut self, config: &ApplyConfig) -> Self {
        self.clock_domain = config.clock_domain_index;
        self.progress_granularity = config.progress_granularity.clamp(1, 100);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Last computed model.
    pub fn current(&self) -> &DomainMapping {
        &self.current
    }

    pub fn known_devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.devices.iter().copied()
    }

    /// Master of `device` from the last snapshot. Does not resolve.
    pub fn get_media_clock_master(&self, device: DeviceId) -> MasterResolution {
        if !self.current.contains(device) {
            return MasterResolution::failed(ResolutionError::UnknownEntity);
        }
        MasterResolution {
            master: self.current.primary_master(device),
            error: self.current.error_of(device),
        }
    }

    /// Rebuild the model from the directory, notify about changed devices,
    /// and return the new model.
    pub fn create_media_clock_domain_model(&mut self) -> DomainMapping {
        self.refresh();
        self.current.clone()
    }

    /// Dry run: what applying `target` would do right now.
    pub fn plan_media_clock_domain_model(&mut self, target: &DomainMapping) -> TransitionPlan {
        let current = self.create_media_clock_domain_model();
        plan_transition_in_domain(self.directory.as_ref(), &current, target, self.clock_domain)
    }

    /// Drive the network from the current topology to `target`.
    ///
    /// Failures never abort the run; they are all in the returned
    /// [`ApplyInfo`]. Progress is broadcast after every phase.
    pub async fn apply_media_clock_domain_model(&mut self, target: &DomainMapping) -> ApplyInfo {
        let plan = self.plan_media_clock_domain_model(target);
        let phases = plan.phases.len();
        let commands = plan.command_count();

        tracing::info!(plan.phases = phases, plan.commands = commands, "Applying media clock domain model");

        let events = self.events.clone();
        let granularity = self.progress_granularity.max(1);
        let mut last_bucket = 0u8;
        let on_progress = move |progress: Progress| {
            let percent = progress.percent();
            let bucket = percent / granularity;
            if bucket > last_bucket {
                last_bucket = bucket;
                tracing::info!(
                    apply.completed = progress.completed,
                    apply.total = progress.total,
                    apply.percent = percent,
                    "Apply progress"
                );
            }
            let _ = events.send(ManagerEvent::ApplyProgress {
                completed: progress.completed,
                total: progress.total,
                percent,
            });
        };

        let errors = plan
            .into_sequential(self.directory.clone(), self.network.clone())
            .start(on_progress)
            .await;

        for (device, info) in errors.iter() {
            tracing::warn!(device.id = %device, error = %info, "Apply error");
        }

        let info = ApplyInfo { errors, phases, commands };
        let _ = self.events.send(ManagerEvent::ApplyFinished(info.clone()));
        info
    }

    /// React to one directory event.
    pub fn handle_event(&mut self, event: DirectoryEvent) {
        tracing::trace!(?event, "Directory event");
        match event {
            DirectoryEvent::DeviceOnline(device) => {
                self.devices.insert(device);
                self.refresh();
            }
            DirectoryEvent::DeviceOffline(device) => {
                self.devices.remove(&device);
                self.refresh();
            }
            DirectoryEvent::ControllerOffline => {
                self.devices.clear();
                self.refresh();
            }
            DirectoryEvent::StreamInputConnectionChanged { listener } => {
                if self.follows_clock_input(listener.device, listener.stream) {
                    self.refresh();
                }
            }
            DirectoryEvent::ClockSourceChanged { .. } => {
                self.refresh();
            }
            DirectoryEvent::DeviceNameChanged { device, name } => {
                let followers = devices_following_master(&self.current, device);
                if !followers.is_empty() {
                    tracing::debug!(master.id = %device, master.name = %name, followers = followers.len(), "Master renamed");
                    let _ = self.events.send(ManagerEvent::MasterNameChanged(followers));
                }
            }
        }
    }

    /// Handle every event already queued. Returns how many were handled.
    pub fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.subscription.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    handled += 1;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Directory events lagged, resyncing");
                    self.resync();
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return handled,
            }
        }
    }

    /// Follow the directory until its event channel closes.
    pub async fn run(&mut self) {
        loop {
            match self.subscription.recv().await {
                Ok(event) => self.handle_event(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Directory events lagged, resyncing");
                    self.resync();
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("Directory subscription closed");
    }

    /// False for offline devices, devices without entity model support, and
    /// devices whose only input is the stream their clock follows.
    pub fn is_manageable(&self, device: DeviceId) -> bool {
        let Some(snapshot) = self.directory.device(device) else {
            return false;
        };
        if !snapshot.aem_supported {
            return false;
        }
        let Some(clock_input) = snapshot.active_clock_input() else {
            return true;
        };
        let groups: BTreeSet<StreamIndex> = snapshot
            .stream_inputs
            .keys()
            .filter_map(|stream| snapshot.input_group_of(*stream).into_iter().min())
            .collect();
        let clock_group = snapshot.input_group_of(clock_input).into_iter().min();
        !(groups.len() == 1 && groups.iter().next().copied() == clock_group)
    }

    /// True when a device of `model` carries a non clock-reference stream
    /// whose format rate differs from its target domain rate.
    pub fn is_conflicting_with_stream_formats(&self, model: &DomainMapping) -> bool {
        model.devices().any(|device| {
            let Some(rate) = model.primary_domain(device).and_then(|domain| domain.sampling_rate) else {
                return false;
            };
            let Some(snapshot) = self.directory.device(device) else {
                return false;
            };
            let inputs = snapshot.stream_inputs.values().map(|input| input.format);
            let outputs = snapshot.stream_outputs.values().map(|output| output.format);
            let conflict = inputs
                .chain(outputs)
                .filter(|format| !format.is_clock_reference())
                .any(|format| format.sampling_rate.is_some_and(|r| r != rate));
            if conflict {
                tracing::debug!(device.id = %device, %rate, "Stream format conflicts with domain rate");
            }
            conflict
        })
    }

    /// Whether `device` sees the same gPTP grandmasters as its clock master.
    pub fn check_gptp_in_sync(&self, device: DeviceId) -> bool {
        let Some(master) = self.current.primary_master(device) else {
            return false;
        };
        if master == device {
            return true;
        }
        match (self.directory.device(device), self.directory.device(master)) {
            (Some(member), Some(master)) => master
                .gptp_grandmasters
                .iter()
                .all(|gm| member.gptp_grandmasters.contains(gm)),
            _ => false,
        }
    }

    fn follows_clock_input(&self, device: DeviceId, stream: StreamIndex) -> bool {
        self.directory
            .device(device)
            .and_then(|snapshot| {
                let clock_input = snapshot.active_clock_input()?;
                Some(snapshot.input_group_of(clock_input).contains(&stream))
            })
            .unwrap_or(false)
    }

    fn resync(&mut self) {
        self.devices = self.directory.device_ids().into_iter().collect();
        self.refresh();
    }

    fn refresh(&mut self) -> Vec<DeviceId> {
        let next = build_domain_model(self.directory.as_ref(), self.devices.iter().copied());
        let changed = changed_devices(&self.current, &next);
        self.current = next;
        if !changed.is_empty() {
            tracing::debug!(changed = changed.len(), "Media clock connections updated");
            let _ = self.events.send(ManagerEvent::ConnectionsUpdated(changed.clone()));
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{AudioUnit, ClockDomain, ClockSource, Device, StreamInput, StreamOutput};
    use crate::directory::FleetDirectory;
    use crate::mapping::DomainMappingBuilder;
    use crate::sim::SimulatedNetwork;
    use crate::types::{ClockSourceKind, SamplingRate, StreamConnection, StreamFormat, StreamIdentification};
    use pretty_assertions::assert_eq;

    /// Internal clock, one CRF input and one CRF output, 48kHz.
    fn node(id: u64) -> Device {
        let mut device = Device::new(DeviceId(id), format!("node-{}", id));
        device.clock_domains.push(ClockDomain { clock_source_index: 0, sources: vec![0, 1] });
        device.clock_sources.insert(0, ClockSource { kind: ClockSourceKind::Internal });
        device.clock_sources.insert(1, ClockSource { kind: ClockSourceKind::InputStream { stream: Some(0) } });
        device.stream_inputs.insert(
            0,
            StreamInput { format: StreamFormat::clock_reference(48000), formats: vec![], connection: StreamConnection::NotConnected },
        );
        device.stream_outputs.insert(0, StreamOutput { format: StreamFormat::clock_reference(48000), formats: vec![] });
        device.audio_units.insert(0, AudioUnit { sampling_rate: SamplingRate(48000) });
        device
    }

    fn following(id: u64, talker: u64) -> Device {
        let mut device = node(id);
        device.clock_domains[0].clock_source_index = 1;
        if let Some(input) = device.stream_inputs.get_mut(&0) {
            input.connection = StreamConnection::Connected { talker: StreamIdentification::new(DeviceId(talker), 0) };
        }
        device
    }

    fn manager(devices: Vec<Device>) -> (Arc<FleetDirectory>, MediaClockManager) {
        let fleet = Arc::new(FleetDirectory::from_devices(devices).unwrap());
        let network = Arc::new(SimulatedNetwork::new(fleet.clone()));
        let manager = MediaClockManager::new(fleet.clone(), network);
        (fleet, manager)
    }

    fn drain(rx: &mut broadcast::Receiver<ManagerEvent>) -> Vec<ManagerEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_master_from_snapshot() {
        let (_, manager) = manager(vec![node(1), following(2, 1)]);

        assert_eq!(manager.get_media_clock_master(DeviceId(2)), MasterResolution::found(DeviceId(1)));
        assert_eq!(
            manager.get_media_clock_master(DeviceId(7)),
            MasterResolution::failed(ResolutionError::UnknownEntity)
        );
    }

    #[test]
    fn test_clock_input_change_notifies() {
        let (fleet, mut manager) = manager(vec![node(1), following(2, 1)]);
        let mut events = manager.subscribe();

        fleet.disconnect_stream(StreamIdentification::new(DeviceId(2), 0)).unwrap();
        assert_eq!(manager.process_pending_events(), 1);

        assert_eq!(drain(&mut events), vec![ManagerEvent::ConnectionsUpdated(vec![DeviceId(2)])]);
        assert_eq!(manager.get_media_clock_master(DeviceId(2)).error, Some(ResolutionError::StreamNotConnected));
    }

    #[test]
    fn test_non_clock_input_change_is_ignored() {
        // Device 2 runs on its internal clock, so its input is not a clock input
        let (fleet, mut manager) = manager(vec![node(1), node(2)]);
        let mut events = manager.subscribe();

        fleet
            .connect_stream(StreamIdentification::new(DeviceId(1), 0), StreamIdentification::new(DeviceId(2), 0))
            .unwrap();
        manager.process_pending_events();

        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn test_device_offline_and_online() {
        let (fleet, mut manager) = manager(vec![node(1), following(2, 1)]);
        let mut events = manager.subscribe();

        fleet.remove_device(DeviceId(1)).unwrap();
        manager.process_pending_events();
        assert_eq!(
            manager.get_media_clock_master(DeviceId(2)).error,
            Some(ResolutionError::AnyEntityInChainOffline)
        );
        assert_eq!(manager.get_media_clock_master(DeviceId(1)).error, Some(ResolutionError::UnknownEntity));

        fleet.insert_device(node(1)).unwrap();
        manager.process_pending_events();
        assert_eq!(manager.get_media_clock_master(DeviceId(2)).master, Some(DeviceId(1)));

        assert_eq!(
            drain(&mut events),
            vec![
                ManagerEvent::ConnectionsUpdated(vec![DeviceId(2)]),
                ManagerEvent::ConnectionsUpdated(vec![DeviceId(1), DeviceId(2)]),
            ]
        );
    }

    #[test]
    fn test_controller_offline_clears_model() {
        let (fleet, mut manager) = manager(vec![node(1), following(2, 1)]);
        fleet.clear();
        manager.process_pending_events();
        assert_eq!(manager.known_devices().count(), 0);
        assert_eq!(manager.current().devices().count(), 0);
    }

    #[test]
    fn test_master_rename_reports_domain() {
        let (fleet, mut manager) = manager(vec![node(1), following(2, 1), node(3)]);
        let mut events = manager.subscribe();

        fleet.rename_device(DeviceId(1), "house clock").unwrap();
        fleet.rename_device(DeviceId(2), "stage box").unwrap();
        manager.process_pending_events();

        // Device 2 masters nothing, so its rename is silent
        assert_eq!(
            drain(&mut events),
            vec![ManagerEvent::MasterNameChanged(vec![DeviceId(1), DeviceId(2)])]
        );
    }

    #[tokio::test]
    async fn test_apply_moves_member() {
        let (fleet, mut manager) = manager(vec![node(1), following(2, 1), node(3)]);
        let mut events = manager.subscribe();

        let target = DomainMappingBuilder::new()
            .with_domain(DeviceId(1), Some(SamplingRate(48000)))
            .with_domain(DeviceId(3), Some(SamplingRate(48000)))
            .member(DeviceId(1), DeviceId(1))
            .member(DeviceId(3), DeviceId(3))
            .member(DeviceId(2), DeviceId(3))
            .build();

        let info = manager.apply_media_clock_domain_model(&target).await;
        assert!(info.is_clean());
        assert_eq!(info.phases, 2);
        assert_eq!(info.commands, 2);

        let member = fleet.device(DeviceId(2)).unwrap();
        assert!(member.is_connected(0, StreamIdentification::new(DeviceId(3), 0)));

        manager.process_pending_events();
        assert_eq!(manager.get_media_clock_master(DeviceId(2)), MasterResolution::found(DeviceId(3)));

        let events = drain(&mut events);
        assert!(events.contains(&ManagerEvent::ApplyProgress { completed: 1, total: 2, percent: 50 }));
        assert!(events.contains(&ManagerEvent::ApplyProgress { completed: 2, total: 2, percent: 100 }));
        assert!(events.contains(&ManagerEvent::ApplyFinished(info)));
    }

    #[tokio::test]
    async fn test_apply_collects_failures() {
        let fleet = Arc::new(FleetDirectory::from_devices([node(1), following(2, 1), node(3)]).unwrap());
        let network = Arc::new(SimulatedNetwork::new(fleet.clone()).with_failing([DeviceId(2)]));
        let mut manager = MediaClockManager::new(fleet.clone(), network);

        let target = DomainMappingBuilder::new()
            .with_domain(DeviceId(3), None)
            .member(DeviceId(3), DeviceId(3))
            .member(DeviceId(2), DeviceId(3))
            .member(DeviceId(1), DeviceId(1))
            .build();

        let info = manager.apply_media_clock_domain_model(&target).await;

        // The teardown failure does not stop the connect phase
        assert_eq!(info.phases, 2);
        assert_eq!(info.errors.for_device(DeviceId(2)).len(), 2);
        assert_eq!(info.errors.for_device(DeviceId(1)).len(), 1);
    }

    #[test]
    fn test_is_manageable() {
        let mut legacy = node(4);
        legacy.aem_supported = false;
        let mut multi = following(5, 1);
        multi.stream_inputs.insert(1, StreamInput { format: StreamFormat::audio(48000), ..Default::default() });

        let (_, manager) = manager(vec![node(1), following(2, 1), legacy, multi]);

        assert!(manager.is_manageable(DeviceId(1)));
        assert!(!manager.is_manageable(DeviceId(2)));
        assert!(!manager.is_manageable(DeviceId(4)));
        assert!(manager.is_manageable(DeviceId(5)));
        assert!(!manager.is_manageable(DeviceId(9)));
    }

    #[test]
    fn test_redundant_clock_input_alone_is_not_manageable() {
        let mut device = following(2, 1);
        device.stream_inputs.insert(1, StreamInput { format: StreamFormat::clock_reference(48000), ..Default::default() });
        device.redundant_inputs.push(vec![0, 1]);

        let (_, manager) = manager(vec![node(1), device]);
        assert!(!manager.is_manageable(DeviceId(2)));
    }

    #[test]
    fn test_stream_format_conflict() {
        let mut device = node(2);
        device.stream_outputs.insert(1, StreamOutput { format: StreamFormat::audio(48000), formats: vec![] });
        let (_, manager) = manager(vec![node(1), device]);

        let at = |rate: Option<u32>| {
            DomainMappingBuilder::new()
                .with_domain(DeviceId(1), rate.map(SamplingRate))
                .member(DeviceId(1), DeviceId(1))
                .member(DeviceId(2), DeviceId(1))
                .build()
        };

        assert!(!manager.is_conflicting_with_stream_formats(&at(Some(48000))));
        assert!(manager.is_conflicting_with_stream_formats(&at(Some(96000))));
        assert!(!manager.is_conflicting_with_stream_formats(&at(None)));
    }

    #[test]
    fn test_gptp_in_sync() {
        let mut master = node(1);
        master.gptp_grandmasters = vec![DeviceId(0xAA)];
        let mut synced = following(2, 1);
        synced.gptp_grandmasters = vec![DeviceId(0xAA), DeviceId(0xBB)];
        let mut drifting = following(3, 1);
        drifting.gptp_grandmasters = vec![DeviceId(0xBB)];

        let (_, manager) = manager(vec![master, synced, drifting, node(4)]);

        assert!(manager.check_gptp_in_sync(DeviceId(1)));
        assert!(manager.check_gptp_in_sync(DeviceId(2)));
        assert!(!manager.check_gptp_in_sync(DeviceId(3)));
        assert!(!manager.check_gptp_in_sync(DeviceId(9)));
    }
}
