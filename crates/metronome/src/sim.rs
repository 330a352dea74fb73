//! Simulated network backed by a [`FleetDirectory`].
//!
//! Commands mutate the fleet the way a real entity would and answer with the
//! status a real entity would send. Used by the CLI and by integration tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use metroconf::SimulationConfig;

use crate::command::{AemResponse, AemStatus, ControlResponse, ControlStatus, NetworkCommands};
use crate::directory::{DeviceDirectory, FleetDirectory, FleetError};
use crate::types::{
    AudioUnitIndex, ClockDomainIndex, ClockSourceIndex, DeviceId, ParseDeviceIdError, SamplingRate,
    StreamIdentification,
};

pub struct SimulatedNetwork {
    fleet: Arc<FleetDirectory>,
    latency: Option<Duration>,
    failing: HashSet<DeviceId>,
}

impl SimulatedNetwork {
    pub fn new(fleet: Arc<FleetDirectory>) -> Self {
        Self {
            fleet,
            latency: None,
            failing: HashSet::new(),
        }
    }

    /// Answer every command after `latency` instead of inline.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = (!latency.is_zero()).then_some(latency);
        self
    }

    /// Commands addressed to these devices answer NotSupported.
    pub fn with_failing(mut self, devices: impl IntoIterator<Item = DeviceId>) -> Self {
        self.failing.extend(devices);
        self
    }

    pub fn from_config(fleet: Arc<FleetDirectory>, config: &SimulationConfig) -> Result<Self, ParseDeviceIdError> {
        let failing = config
            .failing_devices
            .iter()
            .map(|id| id.parse::<DeviceId>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(fleet)
            .with_latency(Duration::from_millis(config.command_latency_ms))
            .with_failing(failing))
    }

    pub fn fleet(&self) -> &Arc<FleetDirectory> {
        &self.fleet
    }

    /// Run `apply` now or after the configured latency, then hand its status
    /// to `respond`.
    fn answer<S, F>(&self, apply: F, respond: Box<dyn FnOnce(S) + Send>)
    where
        S: Send + 'static,
        F: FnOnce() -> S + Send + 'static,
    {
        let delayed = self
            .latency
            .and_then(|latency| tokio::runtime::Handle::try_current().ok().map(|rt| (latency, rt)));
        match delayed {
            Some((latency, rt)) => {
                rt.spawn(async move {
                    tokio::time::sleep(latency).await;
                    respond(apply());
                });
            }
            None => respond(apply()),
        }
    }
}

fn control_status(result: Result<(), FleetError>) -> ControlStatus {
    match result {
        Ok(()) => ControlStatus::Success,
        Err(FleetError::UnknownDevice(_)) => ControlStatus::UnknownEntity,
        Err(FleetError::UnknownStream { .. }) => ControlStatus::TalkerNoStreamIndex,
        Err(err) => {
            tracing::debug!(error = %err, "Simulated stream command failed");
            ControlStatus::InternalError
        }
    }
}

fn aem_status(result: Result<(), FleetError>) -> AemStatus {
    match result {
        Ok(()) => AemStatus::Success,
        Err(FleetError::UnknownDevice(_)) => AemStatus::UnknownEntity,
        Err(FleetError::UnknownClockSource { .. })
        | Err(FleetError::UnknownAudioUnit { .. })
        | Err(FleetError::NoClockDomain(_)) => AemStatus::NoSuchDescriptor,
        Err(err) => {
            tracing::debug!(error = %err, "Simulated entity command failed");
            AemStatus::InternalError
        }
    }
}

impl NetworkCommands for SimulatedNetwork {
    fn connect_stream(&self, talker: StreamIdentification, listener: StreamIdentification, respond: ControlResponse) {
        tracing::debug!(%talker, %listener, "connect_stream");
        let fleet = self.fleet.clone();
        let failing = self.failing.contains(&talker.device) || self.failing.contains(&listener.device);
        self.answer(
            move || {
                if failing {
                    return ControlStatus::NotSupported;
                }
                if fleet.device(listener.device).is_none() {
                    return ControlStatus::ListenerUnknownId;
                }
                if fleet.device(talker.device).is_none() {
                    return ControlStatus::TalkerUnknownId;
                }
                control_status(fleet.connect_stream(talker, listener))
            },
            respond,
        );
    }

    fn disconnect_stream(&self, talker: StreamIdentification, listener: StreamIdentification, respond: ControlResponse) {
        tracing::debug!(%talker, %listener, "disconnect_stream");
        let fleet = self.fleet.clone();
        let failing = self.failing.contains(&talker.device) || self.failing.contains(&listener.device);
        self.answer(
            move || {
                if failing {
                    return ControlStatus::NotSupported;
                }
                let Some(device) = fleet.device(listener.device) else {
                    return ControlStatus::ListenerUnknownId;
                };
                if !device.is_connected(listener.stream, talker) {
                    return ControlStatus::NotConnected;
                }
                control_status(fleet.disconnect_stream(listener))
            },
            respond,
        );
    }

    fn set_clock_source(
        &self,
        device: DeviceId,
        clock_domain: ClockDomainIndex,
        source: ClockSourceIndex,
        respond: AemResponse,
    ) {
        tracing::debug!(device.id = %device, clock.domain = clock_domain, clock.source = source, "set_clock_source");
        let fleet = self.fleet.clone();
        let failing = self.failing.contains(&device);
        self.answer(
            move || {
                if failing {
                    return AemStatus::NotSupported;
                }
                // The fleet only models the first clock domain
                if clock_domain != 0 {
                    return AemStatus::NoSuchDescriptor;
                }
                aem_status(fleet.set_clock_source(device, source))
            },
            respond,
        );
    }

    fn set_sampling_rate(&self, device: DeviceId, audio_unit: AudioUnitIndex, rate: SamplingRate, respond: AemResponse) {
        tracing::debug!(device.id = %device, audio.unit = audio_unit, %rate, "set_sampling_rate");
        let fleet = self.fleet.clone();
        let failing = self.failing.contains(&device);
        self.answer(
            move || {
                if failing {
                    return AemStatus::NotSupported;
                }
                aem_status(fleet.set_sampling_rate(device, audio_unit, rate))
            },
            respond,
        );
    }
}
