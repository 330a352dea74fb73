//! Reconciliation planning
//!
//! Diffs the current domain model against a target and produces an ordered,
//! inspectable [`TransitionPlan`]. Phases:
//!
//! 1. Rate changes, three phases per device: disconnect everything, set the
//!    rate on every audio unit, reconnect what was disconnected.
//! 2. Teardown of relationships the target no longer has.
//! 3. Clock source selection for new relationships, then the clock stream
//!    connections.
//!
//! Domain membership is compared by master id, never by index.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::chain::{ParallelCommandSet, SequentialPlan};
use crate::command::{CommandExecutionError, NetworkCommands};
use crate::device::ClockSelection;
use crate::directory::DeviceDirectory;
use crate::mapping::DomainMapping;
use crate::types::{AudioUnitIndex, ClockDomainIndex, DeviceId, SamplingRate, StreamIdentification};
use crate::units::command_unit;

/// The only clock domain a managed device has.
pub const DEFAULT_CLOCK_DOMAIN: ClockDomainIndex = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PlannedCommand {
    ConnectStream {
        talker: StreamIdentification,
        listener: StreamIdentification,
    },
    DisconnectStream {
        talker: StreamIdentification,
        listener: StreamIdentification,
    },
    SetClockSource {
        device: DeviceId,
        clock_domain: ClockDomainIndex,
        selection: ClockSelection,
    },
    SetSamplingRate {
        device: DeviceId,
        audio_unit: AudioUnitIndex,
        rate: SamplingRate,
    },
    /// Records an error without touching the network.
    ReportError {
        device: DeviceId,
        error: CommandExecutionError,
    },
}

impl fmt::Display for PlannedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannedCommand::ConnectStream { talker, listener } => {
                write!(f, "connect {} -> {}", talker, listener)
            }
            PlannedCommand::DisconnectStream { talker, listener } => {
                write!(f, "disconnect {} -> {}", talker, listener)
            }
            PlannedCommand::SetClockSource { device, clock_domain, selection } => {
                write!(f, "clock source of {} (domain {}) = {}", device, clock_domain, selection)
            }
            PlannedCommand::SetSamplingRate { device, audio_unit, rate } => {
                write!(f, "sampling rate of {} unit {} = {}", device, audio_unit, rate)
            }
            PlannedCommand::ReportError { device, error } => write!(f, "report {} on {}", error, device),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    RateDisconnect,
    RateSet,
    RateReconnect,
    Teardown,
    SourceSelection,
    Connect,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseKind::RateDisconnect => "rate: disconnect",
            PhaseKind::RateSet => "rate: set",
            PhaseKind::RateReconnect => "rate: reconnect",
            PhaseKind::Teardown => "teardown",
            PhaseKind::SourceSelection => "source selection",
            PhaseKind::Connect => "connect",
        };
        f.write_str(name)
    }
}

/// One batch of commands that may run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedPhase {
    pub kind: PhaseKind,
    /// The device a rate phase is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceId>,
    pub commands: Vec<PlannedCommand>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransitionPlan {
    pub phases: Vec<PlannedPhase>,
}

impl TransitionPlan {
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn command_count(&self) -> usize {
        self.phases.iter().map(|phase| phase.commands.len()).sum()
    }

    fn push(&mut self, kind: PhaseKind, device: Option<DeviceId>, commands: Vec<PlannedCommand>) {
        if !commands.is_empty() {
            self.phases.push(PlannedPhase { kind, device, commands });
        }
    }

    /// Compile into executable command sets, one per phase.
    pub fn into_sequential(
        self,
        directory: Arc<dyn DeviceDirectory>,
        network: Arc<dyn NetworkCommands>,
    ) -> SequentialPlan {
        let mut plan = SequentialPlan::new();
        for phase in self.phases {
            let mut set = ParallelCommandSet::new();
            for command in phase.commands {
                set.append(command_unit(command, directory.clone(), network.clone()));
            }
            plan.push(set);
        }
        plan
    }
}

impl fmt::Display for TransitionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.phases.is_empty() {
            return writeln!(f, "nothing to do");
        }
        for (number, phase) in self.phases.iter().enumerate() {
            match phase.device {
                Some(device) => writeln!(f, "{}. {} [{}]", number + 1, phase.kind, device)?,
                None => writeln!(f, "{}. {}", number + 1, phase.kind)?,
            }
            for command in &phase.commands {
                writeln!(f, "   {}", command)?;
            }
        }
        Ok(())
    }
}

/// Plan the move from `current` to `target` on the default clock domain.
pub fn plan_transition(
    directory: &dyn DeviceDirectory,
    current: &DomainMapping,
    target: &DomainMapping,
) -> TransitionPlan {
    plan_transition_in_domain(directory, current, target, DEFAULT_CLOCK_DOMAIN)
}

pub fn plan_transition_in_domain(
    directory: &dyn DeviceDirectory,
    current: &DomainMapping,
    target: &DomainMapping,
    clock_domain: ClockDomainIndex,
) -> TransitionPlan {
    let mut plan = TransitionPlan::default();

    plan_rate_changes(&mut plan, directory, current, target);

    let mut teardown = Vec::new();
    let mut selection = Vec::new();
    let mut connect = Vec::new();

    for device in target.devices() {
        let old = current.masters_of(device);
        let new = target.masters_of(device);
        if old.is_empty() && new.is_empty() {
            continue;
        }
        let set_source = |choice: ClockSelection| -> Option<PlannedCommand> {
            let snapshot = directory.device(device);
            if snapshot.is_some_and(|d| d.clock_selection_active(choice)) {
                return None;
            }
            Some(PlannedCommand::SetClockSource { device, clock_domain, selection: choice })
        };

        for removed in old.iter().filter(|master| !new.contains(*master)) {
            if *removed != device {
                teardown.extend(clock_link(directory, *removed, device, LinkAction::Disconnect));
            } else if new.len() == 1 && old.len() > 1 {
                // Cascaded master handing its domain over to its upstream
                teardown.extend(set_source(ClockSelection::ClockReferenceInput));
            }
        }

        // Cascaded master dropping its upstream link stays its own master
        if old.len() > 1 && new.len() == 1 && new[0] == device && old[0] == device {
            teardown.extend(set_source(ClockSelection::Internal));
        }

        if new.is_empty() {
            teardown.extend(set_source(ClockSelection::External));
        }

        for added in new.iter().filter(|master| !old.contains(*master)) {
            if *added != device {
                if new.len() == 1 {
                    selection.extend(set_source(ClockSelection::ClockReferenceInput));
                }
                connect.extend(clock_link(directory, *added, device, LinkAction::Connect));
            } else {
                selection.extend(set_source(ClockSelection::Internal));
            }
        }
    }

    plan.push(PhaseKind::Teardown, None, teardown);
    plan.push(PhaseKind::SourceSelection, None, selection);
    plan.push(PhaseKind::Connect, None, connect);

    tracing::debug!(plan.phases = plan.phases.len(), plan.commands = plan.command_count(), "Planned transition");
    plan
}

fn plan_rate_changes(
    plan: &mut TransitionPlan,
    directory: &dyn DeviceDirectory,
    current: &DomainMapping,
    target: &DomainMapping,
) {
    for device_id in target.devices() {
        let Some(rate) = target.primary_domain(device_id).and_then(|domain| domain.sampling_rate) else {
            continue;
        };
        let Some(device) = directory.device(device_id) else {
            continue;
        };
        if device.observed_sampling_rate() == Some(rate) {
            continue;
        }

        // Captured now, replayed after the rate change
        let mut connections = Vec::new();
        for other_id in current.devices() {
            let Some(other) = directory.device(other_id) else {
                continue;
            };
            for (stream, talker) in other.inputs_fed_by(device_id) {
                connections.push((talker, StreamIdentification::new(other_id, stream)));
            }
        }
        for (stream, talker) in device.connected_inputs() {
            connections.push((talker, StreamIdentification::new(device_id, stream)));
        }

        tracing::debug!(
            device.id = %device_id,
            rate.from = ?device.observed_sampling_rate(),
            rate.to = %rate,
            connections = connections.len(),
            "Planning rate change"
        );

        let disconnect = connections
            .iter()
            .map(|(talker, listener)| PlannedCommand::DisconnectStream { talker: *talker, listener: *listener })
            .collect();
        let set_rate = device
            .audio_units
            .keys()
            .map(|unit| PlannedCommand::SetSamplingRate { device: device_id, audio_unit: *unit, rate })
            .collect();
        let reconnect = connections
            .iter()
            .map(|(talker, listener)| PlannedCommand::ConnectStream { talker: *talker, listener: *listener })
            .collect();

        plan.push(PhaseKind::RateDisconnect, Some(device_id), disconnect);
        plan.push(PhaseKind::RateSet, Some(device_id), set_rate);
        plan.push(PhaseKind::RateReconnect, Some(device_id), reconnect);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkAction {
    Connect,
    Disconnect,
}

/// Commands for the clock stream link `master -> member`.
///
/// Redundant clock streams pair positionally; if the two ends disagree on
/// the number of streams only the primaries are linked. A missing clock
/// stream on either end is reported when connecting and ignored when
/// disconnecting.
fn clock_link(
    directory: &dyn DeviceDirectory,
    master: DeviceId,
    member: DeviceId,
    action: LinkAction,
) -> Vec<PlannedCommand> {
    let (Some(master_device), Some(member_device)) = (directory.device(master), directory.device(member)) else {
        return Vec::new();
    };
    let outputs = master_device.clock_output_streams();
    let inputs = member_device.clock_input_streams();

    if outputs.is_empty() || inputs.is_empty() {
        if action == LinkAction::Disconnect {
            return Vec::new();
        }
        let mut reports = Vec::new();
        if outputs.is_empty() {
            reports.push(PlannedCommand::ReportError {
                device: master,
                error: CommandExecutionError::NoMediaClockOutputAvailable,
            });
        }
        if inputs.is_empty() {
            reports.push(PlannedCommand::ReportError {
                device: member,
                error: CommandExecutionError::NoMediaClockInputAvailable,
            });
        }
        return reports;
    }

    let pairs: Vec<(u16, u16)> = if outputs.len() == inputs.len() {
        outputs.iter().copied().zip(inputs.iter().copied()).collect()
    } else {
        vec![(outputs[0], inputs[0])]
    };

    pairs
        .into_iter()
        .map(|(output, input)| {
            let talker = StreamIdentification::new(master, output);
            let listener = StreamIdentification::new(member, input);
            match action {
                LinkAction::Connect => PlannedCommand::ConnectStream { talker, listener },
                LinkAction::Disconnect => PlannedCommand::DisconnectStream { talker, listener },
            }
        })
        .collect()
}
