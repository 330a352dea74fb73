//! Clock master resolution
//!
//! Follows a device's active clock source across stream connections until a
//! device that generates its own clock is found, or the chain breaks.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::directory::DeviceDirectory;
use crate::types::{ClockSourceKind, DeviceId};

/// Why a master could not be determined.
///
/// `ExternalClockSource` is soft: the resolution still carries the id of the
/// device feeding the external clock into the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionError {
    #[error("unknown entity or descriptor")]
    UnknownEntity,
    #[error("an entity in the clock chain is offline")]
    AnyEntityInChainOffline,
    #[error("entity model not supported")]
    NotSupportedNoAem,
    #[error("multiple clock domains are not supported")]
    NotSupportedMultipleClockDomains,
    #[error("entity has no clock domain")]
    NotSupportedNoClockDomains,
    #[error("clock source type not supported")]
    NotSupportedClockSourceType,
    #[error("clock stream not connected")]
    StreamNotConnected,
    #[error("upstream clock stream not connected")]
    ParentStreamNotConnected,
    #[error("recursive clock chain")]
    Recursive,
    #[error("clocked from an external source")]
    ExternalClockSource,
}

/// Result of tracing one device's clock chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterResolution {
    pub master: Option<DeviceId>,
    pub error: Option<ResolutionError>,
}

impl MasterResolution {
    pub fn found(master: DeviceId) -> Self {
        Self {
            master: Some(master),
            error: None,
        }
    }

    pub fn external(master: DeviceId) -> Self {
        Self {
            master: Some(master),
            error: Some(ResolutionError::ExternalClockSource),
        }
    }

    pub fn failed(error: ResolutionError) -> Self {
        Self {
            master: None,
            error: Some(error),
        }
    }

    /// A master id is available (clean or external).
    pub fn has_master(&self) -> bool {
        self.master.is_some()
    }

    pub fn is_clean(&self) -> bool {
        self.master.is_some() && self.error.is_none()
    }
}

/// Trace `start`'s clock chain to its master.
///
/// With `allow_secondary`, an internally clocked `start` does not stop the
/// search: its first clock-reference input is followed instead, which finds
/// the master a cascaded master is itself listening to.
pub fn resolve_master(
    directory: &dyn DeviceDirectory,
    start: DeviceId,
    allow_secondary: bool,
) -> MasterResolution {
    let mut visited = HashSet::new();
    visited.insert(start);
    let mut current = start;

    loop {
        let Some(device) = directory.device(current) else {
            return MasterResolution::failed(ResolutionError::AnyEntityInChainOffline);
        };
        if !device.aem_supported {
            return MasterResolution::failed(ResolutionError::NotSupportedNoAem);
        }
        match device.clock_domains.len() {
            0 => return MasterResolution::failed(ResolutionError::NotSupportedNoClockDomains),
            1 => {}
            _ => return MasterResolution::failed(ResolutionError::NotSupportedMultipleClockDomains),
        }

        let Some((_, source)) = device.active_clock_source() else {
            return MasterResolution::failed(ResolutionError::UnknownEntity);
        };

        let clock_stream = match source.kind {
            ClockSourceKind::Internal if allow_secondary && current == start => {
                device.clock_input_streams().first().copied()
            }
            ClockSourceKind::Internal => return MasterResolution::found(current),
            ClockSourceKind::External => return MasterResolution::external(current),
            ClockSourceKind::InputStream { stream } => stream,
            ClockSourceKind::Expansion | ClockSourceKind::Unsupported => {
                return MasterResolution::failed(ResolutionError::NotSupportedClockSourceType);
            }
        };

        let Some(stream) = clock_stream else {
            return MasterResolution::failed(ResolutionError::UnknownEntity);
        };
        let Some(connection) = device.input_connection(stream) else {
            return MasterResolution::failed(ResolutionError::UnknownEntity);
        };
        let Some(talker) = connection.talker() else {
            let error = if visited.len() == 1 {
                ResolutionError::StreamNotConnected
            } else {
                ResolutionError::ParentStreamNotConnected
            };
            return MasterResolution::failed(error);
        };
        if !visited.insert(talker.device) {
            tracing::debug!(device.id = %start, hop.id = %talker.device, "Clock chain loops back");
            return MasterResolution::failed(ResolutionError::Recursive);
        }

        tracing::trace!(device.id = %start, hop.from = %current, hop.to = %talker.device, "Following clock stream");
        current = talker.device;
    }
}
