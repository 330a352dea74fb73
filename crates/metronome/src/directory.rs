//! Device Directory contract and the in-memory fleet implementation.
//!
//! The rest of the crate only reads devices through [`DeviceDirectory`].
//! Change events are delivered on a broadcast channel; dropping the
//! receiver is the unsubscribe.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::device::Device;
use crate::types::{
    AudioUnitIndex, ClockSourceIndex, DeviceId, SamplingRate, StreamConnection,
    StreamIdentification, StreamIndex,
};

const EVENT_CAPACITY: usize = 256;

/// Something changed in the directory that may affect clock topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    DeviceOnline(DeviceId),
    DeviceOffline(DeviceId),
    /// The controller itself went away; every device is gone.
    ControllerOffline,
    StreamInputConnectionChanged { listener: StreamIdentification },
    ClockSourceChanged { device: DeviceId },
    DeviceNameChanged { device: DeviceId, name: String },
}

/// Read access to device snapshots plus change notifications.
pub trait DeviceDirectory: Send + Sync {
    /// Snapshot of a device, `None` when it is offline or unknown.
    fn device(&self, id: DeviceId) -> Option<Arc<Device>>;

    /// Every device currently online, in id order.
    fn device_ids(&self) -> Vec<DeviceId>;

    fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent>;
}

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("failed to read or write fleet file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid fleet json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("device {0} listed twice")]
    DuplicateDevice(DeviceId),

    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("device {device} has no stream {stream}")]
    UnknownStream { device: DeviceId, stream: StreamIndex },

    #[error("device {device} has no clock source {index}")]
    UnknownClockSource {
        device: DeviceId,
        index: ClockSourceIndex,
    },

    #[error("device {device} has no audio unit {index}")]
    UnknownAudioUnit {
        device: DeviceId,
        index: AudioUnitIndex,
    },

    #[error("device {0} has no clock domain")]
    NoClockDomain(DeviceId),
}

/// On-disk fleet snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetFile {
    #[serde(default)]
    pub devices: Vec<Device>,
}

/// In-memory directory backed by a map of device snapshots.
///
/// Mutators replace the affected snapshot wholesale and emit the matching
/// [`DirectoryEvent`].
pub struct FleetDirectory {
    devices: RwLock<BTreeMap<DeviceId, Arc<Device>>>,
    events: broadcast::Sender<DirectoryEvent>,
}

impl Default for FleetDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetDirectory {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            devices: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Result<Self, FleetError> {
        let fleet = Self::new();
        for device in devices {
            fleet.insert_device(device)?;
        }
        Ok(fleet)
    }

    /// Load a fleet snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self, FleetError> {
        let contents = std::fs::read_to_string(path).map_err(|source| FleetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: FleetFile = serde_json::from_str(&contents)?;
        tracing::debug!(fleet.path = %path.display(), fleet.devices = file.devices.len(), "Loaded fleet");
        Self::from_devices(file.devices)
    }

    pub fn snapshot(&self) -> FleetFile {
        let devices = self.read().values().map(|d| Device::clone(d)).collect();
        FleetFile { devices }
    }

    pub fn save(&self, path: &Path) -> Result<(), FleetError> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, json).map_err(|source| FleetError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn insert_device(&self, device: Device) -> Result<(), FleetError> {
        let id = device.id;
        {
            let mut devices = self.write();
            if devices.contains_key(&id) {
                return Err(FleetError::DuplicateDevice(id));
            }
            devices.insert(id, Arc::new(device));
        }
        self.emit(DirectoryEvent::DeviceOnline(id));
        Ok(())
    }

    pub fn remove_device(&self, id: DeviceId) -> Result<Arc<Device>, FleetError> {
        let removed = self.write().remove(&id).ok_or(FleetError::UnknownDevice(id))?;
        self.emit(DirectoryEvent::DeviceOffline(id));
        Ok(removed)
    }

    /// Drop every device and announce that the controller went offline.
    pub fn clear(&self) {
        self.write().clear();
        self.emit(DirectoryEvent::ControllerOffline);
    }

    pub fn rename_device(&self, id: DeviceId, name: impl Into<String>) -> Result<(), FleetError> {
        let name = name.into();
        self.update(id, |device| {
            device.name = name.clone();
            Ok(())
        })?;
        self.emit(DirectoryEvent::DeviceNameChanged { device: id, name });
        Ok(())
    }

    /// Bind `listener` to `talker`. Fails when either stream does not exist.
    pub fn connect_stream(
        &self,
        talker: StreamIdentification,
        listener: StreamIdentification,
    ) -> Result<(), FleetError> {
        let talker_has_stream = self
            .device(talker.device)
            .ok_or(FleetError::UnknownDevice(talker.device))?
            .stream_outputs
            .contains_key(&talker.stream);
        if !talker_has_stream {
            return Err(FleetError::UnknownStream {
                device: talker.device,
                stream: talker.stream,
            });
        }
        self.set_connection(listener, StreamConnection::Connected { talker })
    }

    pub fn disconnect_stream(&self, listener: StreamIdentification) -> Result<(), FleetError> {
        self.set_connection(listener, StreamConnection::NotConnected)
    }

    fn set_connection(
        &self,
        listener: StreamIdentification,
        connection: StreamConnection,
    ) -> Result<(), FleetError> {
        self.update(listener.device, |device| {
            let input = device
                .stream_inputs
                .get_mut(&listener.stream)
                .ok_or(FleetError::UnknownStream {
                    device: listener.device,
                    stream: listener.stream,
                })?;
            input.connection = connection;
            Ok(())
        })?;
        self.emit(DirectoryEvent::StreamInputConnectionChanged { listener });
        Ok(())
    }

    /// Select `index` as the active source of the device's first clock domain.
    pub fn set_clock_source(&self, id: DeviceId, index: ClockSourceIndex) -> Result<(), FleetError> {
        self.update(id, |device| {
            if !device.clock_sources.contains_key(&index) {
                return Err(FleetError::UnknownClockSource { device: id, index });
            }
            let domain = device
                .clock_domains
                .first_mut()
                .ok_or(FleetError::NoClockDomain(id))?;
            domain.clock_source_index = index;
            Ok(())
        })?;
        self.emit(DirectoryEvent::ClockSourceChanged { device: id });
        Ok(())
    }

    pub fn set_sampling_rate(
        &self,
        id: DeviceId,
        unit: AudioUnitIndex,
        rate: SamplingRate,
    ) -> Result<(), FleetError> {
        self.update(id, |device| {
            let audio_unit = device
                .audio_units
                .get_mut(&unit)
                .ok_or(FleetError::UnknownAudioUnit { device: id, index: unit })?;
            audio_unit.sampling_rate = rate;
            Ok(())
        })
    }

    fn update(
        &self,
        id: DeviceId,
        apply: impl FnOnce(&mut Device) -> Result<(), FleetError>,
    ) -> Result<(), FleetError> {
        let mut devices = self.write();
        let slot = devices.get_mut(&id).ok_or(FleetError::UnknownDevice(id))?;
        let mut updated = Device::clone(slot);
        apply(&mut updated)?;
        *slot = Arc::new(updated);
        Ok(())
    }

    fn emit(&self, event: DirectoryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<DeviceId, Arc<Device>>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<DeviceId, Arc<Device>>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceDirectory for FleetDirectory {
    fn device(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.read().get(&id).cloned()
    }

    fn device_ids(&self) -> Vec<DeviceId> {
        self.read().keys().copied().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.events.subscribe()
    }
}
