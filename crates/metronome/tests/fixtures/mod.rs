#![allow(dead_code)]

use metronome::{
    AudioUnit, ClockDomain, ClockSource, ClockSourceKind, Device, DeviceId, FleetDirectory, MediaClockManager,
    SamplingRate, SimulatedNetwork, StreamConnection, StreamFormat, StreamIdentification, StreamInput, StreamOutput,
};
use std::sync::Arc;

pub const INTERNAL: u16 = 0;
pub const EXTERNAL: u16 = 1;
pub const CRF_IN: u16 = 2;

/// Stream 0 is the clock reference stream in both directions, stream 1
/// carries audio.
pub fn endpoint(id: u64, rate: u32) -> Device {
    let mut device = Device::new(DeviceId(id), format!("endpoint-{}", id));
    device.clock_domains.push(ClockDomain {
        clock_source_index: INTERNAL,
        sources: vec![INTERNAL, EXTERNAL, CRF_IN],
    });
    device.clock_sources.insert(INTERNAL, ClockSource { kind: ClockSourceKind::Internal });
    device.clock_sources.insert(EXTERNAL, ClockSource { kind: ClockSourceKind::External });
    device.clock_sources.insert(CRF_IN, ClockSource { kind: ClockSourceKind::InputStream { stream: Some(0) } });

    device.stream_inputs.insert(0, StreamInput { format: StreamFormat::clock_reference(rate), ..Default::default() });
    device.stream_inputs.insert(1, StreamInput { format: StreamFormat::audio(rate), ..Default::default() });
    device.stream_outputs.insert(0, StreamOutput { format: StreamFormat::clock_reference(rate), formats: vec![] });
    device.stream_outputs.insert(1, StreamOutput { format: StreamFormat::audio(rate), formats: vec![] });
    device.audio_units.insert(0, AudioUnit { sampling_rate: SamplingRate(rate) });
    device
}

/// Clock from the clock reference stream of `talker`.
pub fn follows(mut device: Device, talker: u64) -> Device {
    device.clock_domains[0].clock_source_index = CRF_IN;
    connect_clock_input(&mut device, talker);
    device
}

/// Stays on its own clock but listens to the clock stream of `talker`.
pub fn cascaded(mut device: Device, talker: u64) -> Device {
    connect_clock_input(&mut device, talker);
    device
}

pub fn external(mut device: Device) -> Device {
    device.clock_domains[0].clock_source_index = EXTERNAL;
    device
}

fn connect_clock_input(device: &mut Device, talker: u64) {
    if let Some(input) = device.stream_inputs.get_mut(&0) {
        input.connection = StreamConnection::Connected { talker: clock_stream(talker) };
    }
}

pub fn clock_stream(device: u64) -> StreamIdentification {
    StreamIdentification::new(DeviceId(device), 0)
}

pub fn audio_stream(device: u64) -> StreamIdentification {
    StreamIdentification::new(DeviceId(device), 1)
}

pub struct TestFixture {
    pub fleet: Arc<FleetDirectory>,
    pub manager: MediaClockManager,
}

impl TestFixture {
    pub fn new(devices: Vec<Device>) -> Self {
        Self::with_network(devices, |network| network)
    }

    pub fn with_network(devices: Vec<Device>, configure: impl FnOnce(SimulatedNetwork) -> SimulatedNetwork) -> Self {
        let fleet = Arc::new(FleetDirectory::from_devices(devices).expect("Failed to build fleet"));
        let network = Arc::new(configure(SimulatedNetwork::new(fleet.clone())));
        let manager = MediaClockManager::new(fleet.clone(), network);
        Self { fleet, manager }
    }

    /// A(Internal) <- B <- C, all at 48kHz.
    pub fn chain() -> Self {
        Self::new(vec![endpoint(0xA, 48000), follows(endpoint(0xB, 48000), 0xA), follows(endpoint(0xC, 48000), 0xB)])
    }
}

pub fn id(value: u64) -> DeviceId {
    DeviceId(value)
}
