//! Network command collaborator and the command error taxonomy.
//!
//! The wire layer reports one of two status vocabularies: [`ControlStatus`]
//! for stream connection commands and [`AemStatus`] for entity model
//! commands. Both fold into [`CommandExecutionError`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{AudioUnitIndex, ClockDomainIndex, ClockSourceIndex, DeviceId, SamplingRate, StreamIdentification};

/// Outcome of one remote operation, as this crate reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum CommandExecutionError {
    #[error("no error")]
    NoError,
    #[error("locked by another controller")]
    LockedByOther,
    #[error("acquired by another controller")]
    AcquiredByOther,
    #[error("entity error")]
    EntityError,
    #[error("command failure")]
    CommandFailure,
    #[error("network issue")]
    NetworkIssue,
    #[error("timeout")]
    Timeout,
    #[error("not supported")]
    NotSupported,
    #[error("no media clock output available")]
    NoMediaClockOutputAvailable,
    #[error("no media clock input available")]
    NoMediaClockInputAvailable,
}

impl CommandExecutionError {
    pub fn is_error(&self) -> bool {
        *self != CommandExecutionError::NoError
    }
}

/// Status of a stream connection command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlStatus {
    Success,
    TimedOut,
    NetworkError,
    ProtocolError,
    TalkerMisbehaving,
    ListenerMisbehaving,
    TalkerUnknownId,
    ListenerUnknownId,
    TalkerDestMacFail,
    TalkerNoStreamIndex,
    TalkerNoBandwidth,
    TalkerExclusive,
    ListenerTalkerTimeout,
    ListenerExclusive,
    StateUnavailable,
    NotConnected,
    NoSuchConnection,
    CouldNotSendMessage,
    ControllerNotAuthorized,
    IncompatibleRequest,
    UnknownEntity,
    InternalError,
    NotSupported,
}

/// Which end of a stream connection a failure is recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blame {
    Talker,
    Listener,
    Both,
}

impl ControlStatus {
    pub fn to_command_error(self) -> CommandExecutionError {
        use ControlStatus::*;
        match self {
            Success => CommandExecutionError::NoError,
            TimedOut => CommandExecutionError::Timeout,
            NetworkError | ProtocolError => CommandExecutionError::NetworkIssue,
            TalkerMisbehaving | ListenerMisbehaving => CommandExecutionError::EntityError,
            NotSupported => CommandExecutionError::NotSupported,
            TalkerUnknownId | ListenerUnknownId | TalkerDestMacFail | TalkerNoStreamIndex
            | TalkerNoBandwidth | TalkerExclusive | ListenerTalkerTimeout | ListenerExclusive
            | StateUnavailable | NotConnected | NoSuchConnection | CouldNotSendMessage
            | ControllerNotAuthorized | IncompatibleRequest | UnknownEntity | InternalError => {
                CommandExecutionError::CommandFailure
            }
        }
    }

    pub fn blame(self) -> Blame {
        use ControlStatus::*;
        match self {
            TalkerMisbehaving | TalkerUnknownId | TalkerDestMacFail | TalkerNoBandwidth
            | TalkerNoStreamIndex | TalkerExclusive => Blame::Talker,
            ListenerMisbehaving | ListenerUnknownId | ListenerExclusive => Blame::Listener,
            _ => Blame::Both,
        }
    }
}

/// Status of an entity model command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AemStatus {
    Success,
    TimedOut,
    AcquiredByOther,
    LockedByOther,
    NetworkError,
    ProtocolError,
    EntityMisbehaving,
    NotImplemented,
    NotSupported,
    NoSuchDescriptor,
    NotAuthenticated,
    AuthenticationDisabled,
    BadArguments,
    NoResources,
    InProgress,
    StreamIsRunning,
    UnknownEntity,
    InternalError,
}

impl AemStatus {
    pub fn to_command_error(self) -> CommandExecutionError {
        use AemStatus::*;
        match self {
            Success => CommandExecutionError::NoError,
            TimedOut => CommandExecutionError::Timeout,
            AcquiredByOther => CommandExecutionError::AcquiredByOther,
            LockedByOther => CommandExecutionError::LockedByOther,
            NetworkError | ProtocolError => CommandExecutionError::NetworkIssue,
            EntityMisbehaving | NotImplemented => CommandExecutionError::EntityError,
            NotSupported => CommandExecutionError::NotSupported,
            NoSuchDescriptor | NotAuthenticated | AuthenticationDisabled | BadArguments
            | NoResources | InProgress | StreamIsRunning | UnknownEntity | InternalError => {
                CommandExecutionError::CommandFailure
            }
        }
    }
}

/// The operation an error was raised by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    ConnectStream,
    DisconnectStream,
    SetClockSource,
    SetSamplingRate,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::ConnectStream => write!(f, "connect stream"),
            CommandKind::DisconnectStream => write!(f, "disconnect stream"),
            CommandKind::SetClockSource => write!(f, "set clock source"),
            CommandKind::SetSamplingRate => write!(f, "set sampling rate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandErrorInfo {
    pub error: CommandExecutionError,
    pub command: Option<CommandKind>,
}

impl fmt::Display for CommandErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.command {
            Some(kind) => write!(f, "{} ({})", self.error, kind),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Device to errors multimap. A device may collect several errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandErrors {
    errors: BTreeMap<DeviceId, Vec<CommandErrorInfo>>,
}

impl CommandErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, device: DeviceId, error: CommandExecutionError, command: Option<CommandKind>) {
        self.errors
            .entry(device)
            .or_default()
            .push(CommandErrorInfo { error, command });
    }

    pub fn merge(&mut self, other: CommandErrors) {
        for (device, infos) in other.errors {
            self.errors.entry(device).or_default().extend(infos);
        }
    }

    /// Total number of recorded errors.
    pub fn len(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.errors.keys().copied()
    }

    pub fn for_device(&self, device: DeviceId) -> &[CommandErrorInfo] {
        self.errors.get(&device).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &CommandErrorInfo)> {
        self.errors
            .iter()
            .flat_map(|(device, infos)| infos.iter().map(move |info| (*device, info)))
    }
}

pub type ControlResponse = Box<dyn FnOnce(ControlStatus) + Send>;
pub type AemResponse = Box<dyn FnOnce(AemStatus) + Send>;

/// Issues remote commands. Every call answers exactly once through its
/// response callback, possibly before returning.
pub trait NetworkCommands: Send + Sync {
    fn connect_stream(&self, talker: StreamIdentification, listener: StreamIdentification, respond: ControlResponse);

    fn disconnect_stream(&self, talker: StreamIdentification, listener: StreamIdentification, respond: ControlResponse);

    fn set_clock_source(
        &self,
        device: DeviceId,
        clock_domain: ClockDomainIndex,
        source: ClockSourceIndex,
        respond: AemResponse,
    );

    fn set_sampling_rate(&self, device: DeviceId, audio_unit: AudioUnitIndex, rate: SamplingRate, respond: AemResponse);
}
