//! Device snapshots as the directory hands them out.
//!
//! A [`Device`] is a read-only view of one entity's current configuration:
//! clock domains and sources, stream inputs and outputs with their live
//! connection state, audio units and gPTP grandmasters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{
    AudioUnitIndex, ClockSourceIndex, ClockSourceKind, DeviceId, SamplingRate, StreamConnection,
    StreamFormat, StreamIdentification, StreamIndex,
};

/// A clock domain: the list of selectable sources and the active one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockDomain {
    pub clock_source_index: ClockSourceIndex,
    #[serde(default)]
    pub sources: Vec<ClockSourceIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSource {
    #[serde(flatten)]
    pub kind: ClockSourceKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StreamInput {
    #[serde(default)]
    pub format: StreamFormat,
    #[serde(default)]
    pub formats: Vec<StreamFormat>,
    #[serde(default)]
    pub connection: StreamConnection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StreamOutput {
    #[serde(default)]
    pub format: StreamFormat,
    #[serde(default)]
    pub formats: Vec<StreamFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioUnit {
    pub sampling_rate: SamplingRate,
}

/// The kind of clock source a command wants to select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSelection {
    Internal,
    External,
    /// An input-stream source bound to a clock-reference stream input.
    ClockReferenceInput,
}

impl std::fmt::Display for ClockSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockSelection::Internal => write!(f, "internal"),
            ClockSelection::External => write!(f, "external"),
            ClockSelection::ClockReferenceInput => write!(f, "crf-input"),
        }
    }
}

/// Snapshot of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    #[serde(default)]
    pub name: String,
    /// Whether the device exposes an entity model at all.
    #[serde(default = "Device::default_aem_supported")]
    pub aem_supported: bool,
    #[serde(default)]
    pub clock_domains: Vec<ClockDomain>,
    #[serde(default)]
    pub clock_sources: BTreeMap<ClockSourceIndex, ClockSource>,
    #[serde(default)]
    pub stream_inputs: BTreeMap<StreamIndex, StreamInput>,
    #[serde(default)]
    pub stream_outputs: BTreeMap<StreamIndex, StreamOutput>,
    /// Groups of stream inputs forming one redundant logical connection.
    #[serde(default)]
    pub redundant_inputs: Vec<Vec<StreamIndex>>,
    #[serde(default)]
    pub redundant_outputs: Vec<Vec<StreamIndex>>,
    #[serde(default)]
    pub audio_units: BTreeMap<AudioUnitIndex, AudioUnit>,
    /// gPTP grandmaster id per network interface.
    #[serde(default)]
    pub gptp_grandmasters: Vec<DeviceId>,
}

impl Device {
    fn default_aem_supported() -> bool {
        true
    }

    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            aem_supported: true,
            clock_domains: Vec::new(),
            clock_sources: BTreeMap::new(),
            stream_inputs: BTreeMap::new(),
            stream_outputs: BTreeMap::new(),
            redundant_inputs: Vec::new(),
            redundant_outputs: Vec::new(),
            audio_units: BTreeMap::new(),
            gptp_grandmasters: Vec::new(),
        }
    }

    /// The active clock source of the first clock domain.
    ///
    /// Returns `None` when there is no clock domain or the active index
    /// points at a missing descriptor.
    pub fn active_clock_source(&self) -> Option<(ClockSourceIndex, ClockSource)> {
        let domain = self.clock_domains.first()?;
        let source = self.clock_sources.get(&domain.clock_source_index)?;
        Some((domain.clock_source_index, *source))
    }

    /// Current rate of the first audio unit.
    pub fn observed_sampling_rate(&self) -> Option<SamplingRate> {
        self.audio_units.values().next().map(|unit| unit.sampling_rate)
    }

    pub fn input_connection(&self, stream: StreamIndex) -> Option<StreamConnection> {
        self.stream_inputs.get(&stream).map(|input| input.connection)
    }

    /// True when `listener_stream` is connected to exactly `talker`.
    pub fn is_connected(&self, listener_stream: StreamIndex, talker: StreamIdentification) -> bool {
        self.input_connection(listener_stream)
            .and_then(|c| c.talker())
            .is_some_and(|t| t == talker)
    }

    /// First clock-reference stream input, expanded to its redundant set.
    pub fn clock_input_streams(&self) -> Vec<StreamIndex> {
        let first = self
            .stream_inputs
            .iter()
            .find(|(_, input)| input.format.is_clock_reference())
            .map(|(index, _)| *index);
        expand_redundant(first, &self.redundant_inputs)
    }

    /// First clock-reference stream output, expanded to its redundant set.
    pub fn clock_output_streams(&self) -> Vec<StreamIndex> {
        let first = self
            .stream_outputs
            .iter()
            .find(|(_, output)| output.format.is_clock_reference())
            .map(|(index, _)| *index);
        expand_redundant(first, &self.redundant_outputs)
    }

    /// Inputs currently in the `Connected` state, with their talker.
    pub fn connected_inputs(&self) -> Vec<(StreamIndex, StreamIdentification)> {
        self.stream_inputs
            .iter()
            .filter_map(|(index, input)| match input.connection {
                StreamConnection::Connected { talker } => Some((*index, talker)),
                _ => None,
            })
            .collect()
    }

    /// Inputs of this device fed by `talker_device`, in `Connected` or
    /// `FastConnecting` state.
    pub fn inputs_fed_by(&self, talker_device: DeviceId) -> Vec<(StreamIndex, StreamIdentification)> {
        self.stream_inputs
            .iter()
            .filter_map(|(index, input)| {
                input
                    .connection
                    .talker()
                    .filter(|t| t.device == talker_device)
                    .map(|t| (*index, t))
            })
            .collect()
    }

    /// First clock source of the requested kind.
    ///
    /// `ClockReferenceInput` only matches an input-stream source bound to a
    /// stream input whose current format is clock reference.
    pub fn find_clock_source(&self, selection: ClockSelection) -> Option<ClockSourceIndex> {
        self.clock_sources
            .iter()
            .find(|(_, source)| match (selection, source.kind) {
                (ClockSelection::Internal, ClockSourceKind::Internal) => true,
                (ClockSelection::External, ClockSourceKind::External) => true,
                (ClockSelection::ClockReferenceInput, ClockSourceKind::InputStream { stream }) => stream
                    .and_then(|s| self.stream_inputs.get(&s))
                    .is_some_and(|input| input.format.is_clock_reference()),
                _ => false,
            })
            .map(|(index, _)| *index)
    }

    /// Whether the active clock source already is the requested kind.
    pub fn clock_selection_active(&self, selection: ClockSelection) -> bool {
        match (self.find_clock_source(selection), self.clock_domains.first()) {
            (Some(wanted), Some(domain)) => domain.clock_source_index == wanted,
            _ => false,
        }
    }

    /// The stream input the active clock source follows, if it follows one.
    pub fn active_clock_input(&self) -> Option<StreamIndex> {
        match self.active_clock_source()?.1.kind {
            ClockSourceKind::InputStream { stream } => stream,
            _ => None,
        }
    }

    /// The redundant input group containing `stream`, or just the stream.
    pub fn input_group_of(&self, stream: StreamIndex) -> Vec<StreamIndex> {
        expand_redundant(Some(stream), &self.redundant_inputs)
    }
}

fn expand_redundant(first: Option<StreamIndex>, groups: &[Vec<StreamIndex>]) -> Vec<StreamIndex> {
    match first {
        None => Vec::new(),
        Some(index) => groups
            .iter()
            .find(|group| group.contains(&index))
            .cloned()
            .unwrap_or_else(|| vec![index]),
    }
}
