//! Turns planned commands into executable command units.
//!
//! Every unit re-reads the directory when dispatched. Work that is already
//! done (connection present, source already active, rate already set)
//! completes synchronously without touching the network.

use std::sync::Arc;

use crate::chain::{CommandUnit, CompletionHandle};
use crate::command::{Blame, CommandExecutionError, CommandKind, ControlStatus, NetworkCommands};
use crate::directory::DeviceDirectory;
use crate::planner::PlannedCommand;
use crate::types::StreamIdentification;

pub fn command_unit(
    command: PlannedCommand,
    directory: Arc<dyn DeviceDirectory>,
    network: Arc<dyn NetworkCommands>,
) -> CommandUnit {
    match command {
        PlannedCommand::ConnectStream { talker, listener } => Box::new(move |handle| {
            let connected = directory
                .device(listener.device)
                .is_some_and(|d| d.is_connected(listener.stream, talker));
            if connected {
                return false;
            }
            network.connect_stream(
                talker,
                listener,
                Box::new(move |status| acmp_done(handle, status, talker, listener, CommandKind::ConnectStream)),
            );
            true
        }),

        PlannedCommand::DisconnectStream { talker, listener } => Box::new(move |handle| {
            let connected = directory
                .device(listener.device)
                .is_some_and(|d| d.is_connected(listener.stream, talker));
            if !connected {
                return false;
            }
            network.disconnect_stream(
                talker,
                listener,
                Box::new(move |status| acmp_done(handle, status, talker, listener, CommandKind::DisconnectStream)),
            );
            true
        }),

        PlannedCommand::SetClockSource { device, clock_domain, selection } => Box::new(move |handle| {
            let Some(snapshot) = directory.device(device) else {
                handle.add_error(device, CommandExecutionError::CommandFailure, Some(CommandKind::SetClockSource));
                return false;
            };
            let Some(source) = snapshot.find_clock_source(selection) else {
                tracing::warn!(device.id = %device, clock.selection = %selection, "No matching clock source");
                handle.add_error(device, CommandExecutionError::NotSupported, Some(CommandKind::SetClockSource));
                return false;
            };
            if snapshot.clock_selection_active(selection) {
                return false;
            }
            network.set_clock_source(
                device,
                clock_domain,
                source,
                Box::new(move |status| {
                    let error = status.to_command_error();
                    if error.is_error() {
                        tracing::warn!(device.id = %device, %error, "Set clock source failed");
                        handle.add_error(device, error, Some(CommandKind::SetClockSource));
                    }
                    handle.complete();
                }),
            );
            true
        }),

        PlannedCommand::SetSamplingRate { device, audio_unit, rate } => Box::new(move |handle| {
            let Some(snapshot) = directory.device(device) else {
                handle.add_error(device, CommandExecutionError::CommandFailure, Some(CommandKind::SetSamplingRate));
                return false;
            };
            if snapshot.audio_units.get(&audio_unit).is_some_and(|unit| unit.sampling_rate == rate) {
                return false;
            }
            network.set_sampling_rate(
                device,
                audio_unit,
                rate,
                Box::new(move |status| {
                    let error = status.to_command_error();
                    if error.is_error() {
                        tracing::warn!(device.id = %device, %error, "Set sampling rate failed");
                        handle.add_error(device, error, Some(CommandKind::SetSamplingRate));
                    }
                    handle.complete();
                }),
            );
            true
        }),

        PlannedCommand::ReportError { device, error } => Box::new(move |handle| {
            handle.add_error(device, error, None);
            false
        }),
    }
}

/// Record a stream command outcome against the end the status blames.
fn acmp_done(
    handle: CompletionHandle,
    status: ControlStatus,
    talker: StreamIdentification,
    listener: StreamIdentification,
    kind: CommandKind,
) {
    let error = status.to_command_error();
    if error.is_error() {
        tracing::warn!(talker = %talker, listener = %listener, ?status, "Stream command failed");
        match status.blame() {
            Blame::Talker => handle.add_error(talker.device, error, Some(kind)),
            Blame::Listener => handle.add_error(listener.device, error, Some(kind)),
            Blame::Both => {
                handle.add_error(talker.device, error, Some(kind));
                handle.add_error(listener.device, error, Some(kind));
            }
        }
    }
    handle.complete();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ParallelCommandSet;
    use crate::command::{AemResponse, AemStatus, ControlResponse};
    use crate::device::{ClockDomain, ClockSelection, ClockSource, Device, StreamInput, StreamOutput};
    use crate::directory::FleetDirectory;
    use crate::types::{
        AudioUnitIndex, ClockDomainIndex, ClockSourceIndex, ClockSourceKind, DeviceId, SamplingRate,
        StreamConnection, StreamFormat,
    };
    use futures::FutureExt;
    use std::sync::Mutex;

    /// Answers every command inline with a fixed status and records calls.
    struct Scripted {
        control: ControlStatus,
        aem: AemStatus,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(control: ControlStatus, aem: AemStatus) -> Arc<Self> {
            Arc::new(Self { control, aem, calls: Mutex::new(Vec::new()) })
        }
    }

    impl NetworkCommands for Scripted {
        fn connect_stream(&self, talker: StreamIdentification, listener: StreamIdentification, respond: ControlResponse) {
            self.calls.lock().unwrap().push(format!("connect {} {}", talker, listener));
            respond(self.control);
        }

        fn disconnect_stream(&self, talker: StreamIdentification, listener: StreamIdentification, respond: ControlResponse) {
            self.calls.lock().unwrap().push(format!("disconnect {} {}", talker, listener));
            respond(self.control);
        }

        fn set_clock_source(&self, device: DeviceId, _: ClockDomainIndex, source: ClockSourceIndex, respond: AemResponse) {
            self.calls.lock().unwrap().push(format!("clock {} {}", device, source));
            respond(self.aem);
        }

        fn set_sampling_rate(&self, device: DeviceId, unit: AudioUnitIndex, rate: SamplingRate, respond: AemResponse) {
            self.calls.lock().unwrap().push(format!("rate {} {} {}", device, unit, rate.0));
            respond(self.aem);
        }
    }

    fn fleet() -> Arc<FleetDirectory> {
        let mut talker = Device::new(DeviceId(1), "talker");
        talker.stream_outputs.insert(0, StreamOutput { format: StreamFormat::clock_reference(48000), formats: vec![] });

        let mut listener = Device::new(DeviceId(2), "listener");
        listener.clock_domains.push(ClockDomain { clock_source_index: 0, sources: vec![0, 1] });
        listener.clock_sources.insert(0, ClockSource { kind: ClockSourceKind::Internal });
        listener.clock_sources.insert(1, ClockSource { kind: ClockSourceKind::InputStream { stream: Some(0) } });
        listener.stream_inputs.insert(
            0,
            StreamInput {
                format: StreamFormat::clock_reference(48000),
                formats: vec![],
                connection: StreamConnection::Connected { talker: StreamIdentification::new(DeviceId(1), 0) },
            },
        );
        Arc::new(FleetDirectory::from_devices([talker, listener]).unwrap())
    }

    fn run(command: PlannedCommand, network: Arc<Scripted>) -> crate::command::CommandErrors {
        let mut set = ParallelCommandSet::new();
        set.append(command_unit(command, fleet(), network));
        set.exec().now_or_never().expect("inline network completes synchronously")
    }

    fn link() -> (StreamIdentification, StreamIdentification) {
        (StreamIdentification::new(DeviceId(1), 0), StreamIdentification::new(DeviceId(2), 0))
    }

    #[test]
    fn test_existing_connection_is_not_reconnected() {
        let network = Scripted::new(ControlStatus::Success, AemStatus::Success);
        let (talker, listener) = link();
        let errors = run(PlannedCommand::ConnectStream { talker, listener }, network.clone());
        assert!(errors.is_empty());
        assert!(network.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_disconnect_blames_listener() {
        let network = Scripted::new(ControlStatus::ListenerExclusive, AemStatus::Success);
        let (talker, listener) = link();
        let errors = run(PlannedCommand::DisconnectStream { talker, listener }, network.clone());

        assert_eq!(network.calls.lock().unwrap().len(), 1);
        assert!(errors.for_device(DeviceId(1)).is_empty());
        assert_eq!(errors.for_device(DeviceId(2))[0].command, Some(CommandKind::DisconnectStream));
    }

    #[test]
    fn test_generic_stream_failure_blames_both_ends() {
        let network = Scripted::new(ControlStatus::TimedOut, AemStatus::Success);
        let talker = StreamIdentification::new(DeviceId(1), 0);
        let listener = StreamIdentification::new(DeviceId(2), 5);
        let errors = run(PlannedCommand::ConnectStream { talker, listener }, network);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_active_clock_source_is_skipped() {
        let network = Scripted::new(ControlStatus::Success, AemStatus::Success);
        let errors = run(
            PlannedCommand::SetClockSource { device: DeviceId(2), clock_domain: 0, selection: ClockSelection::Internal },
            network.clone(),
        );
        assert!(errors.is_empty());
        assert!(network.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_clock_source_is_not_supported() {
        let network = Scripted::new(ControlStatus::Success, AemStatus::Success);
        let errors = run(
            PlannedCommand::SetClockSource { device: DeviceId(2), clock_domain: 0, selection: ClockSelection::External },
            network,
        );
        assert_eq!(errors.for_device(DeviceId(2))[0].error, CommandExecutionError::NotSupported);
    }

    #[test]
    fn test_clock_source_failure_is_mapped() {
        let network = Scripted::new(ControlStatus::Success, AemStatus::LockedByOther);
        let errors = run(
            PlannedCommand::SetClockSource {
                device: DeviceId(2),
                clock_domain: 0,
                selection: ClockSelection::ClockReferenceInput,
            },
            network.clone(),
        );
        assert_eq!(*network.calls.lock().unwrap(), vec![format!("clock {} 1", DeviceId(2))]);
        assert_eq!(errors.for_device(DeviceId(2))[0].error, CommandExecutionError::LockedByOther);
    }

    #[test]
    fn test_offline_device_fails_rate_change() {
        let network = Scripted::new(ControlStatus::Success, AemStatus::Success);
        let errors = run(
            PlannedCommand::SetSamplingRate { device: DeviceId(9), audio_unit: 0, rate: SamplingRate(96000) },
            network,
        );
        assert_eq!(errors.for_device(DeviceId(9))[0].error, CommandExecutionError::CommandFailure);
    }

    #[test]
    fn test_report_error_needs_no_network() {
        let network = Scripted::new(ControlStatus::Success, AemStatus::Success);
        let errors = run(
            PlannedCommand::ReportError { device: DeviceId(1), error: CommandExecutionError::NoMediaClockOutputAvailable },
            network.clone(),
        );
        assert_eq!(errors.len(), 1);
        assert!(network.calls.lock().unwrap().is_empty());
    }
}
