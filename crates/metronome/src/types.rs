//! Identifiers and small value types shared by every module.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// EUI-64 device identifier.
///
/// Serialised as a `0x`-prefixed 16-digit hex string. Parses from hex
/// (with or without prefix) or decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u64);

impl DeviceId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for DeviceId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Error parsing a [`DeviceId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid device id: {0}")]
pub struct ParseDeviceIdError(String);

impl FromStr for DeviceId {
    type Err = ParseDeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            u64::from_str_radix(hex, 16)
        } else if trimmed.len() == 16 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            u64::from_str_radix(trimmed, 16)
        } else {
            trimmed.parse::<u64>()
        };
        parsed
            .map(DeviceId)
            .map_err(|_| ParseDeviceIdError(s.to_string()))
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DeviceIdVisitor;

        impl<'de> de::Visitor<'de> for DeviceIdVisitor {
            type Value = DeviceId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a hex string or an unsigned integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<DeviceId, E> {
                Ok(DeviceId(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<DeviceId, E> {
                u64::try_from(v)
                    .map(DeviceId)
                    .map_err(|_| E::custom(format!("negative device id: {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<DeviceId, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DeviceIdVisitor)
    }
}

pub type StreamIndex = u16;
pub type ClockSourceIndex = u16;
pub type ClockDomainIndex = u16;
pub type AudioUnitIndex = u16;

/// Media sampling rate in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SamplingRate(pub u32);

impl fmt::Display for SamplingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}kHz", self.0 / 1000)
        } else {
            write!(f, "{:.1}kHz", self.0 as f64 / 1000.0)
        }
    }
}

/// Where a clock source takes its timing from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClockSourceKind {
    Internal,
    External,
    /// Follows an inbound stream. `stream` is the stream input the source is
    /// bound to, if the descriptor names one.
    InputStream {
        #[serde(default)]
        stream: Option<StreamIndex>,
    },
    Expansion,
    Unsupported,
}

impl ClockSourceKind {
    pub fn is_input_stream(&self) -> bool {
        matches!(self, ClockSourceKind::InputStream { .. })
    }
}

/// What a stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamFormatKind {
    Audio,
    ClockReference,
    #[default]
    Unknown,
}

/// A stream format, reduced to the parts clock management looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StreamFormat {
    #[serde(default)]
    pub kind: StreamFormatKind,
    #[serde(default)]
    pub sampling_rate: Option<SamplingRate>,
}

impl StreamFormat {
    pub fn audio(rate: u32) -> Self {
        Self {
            kind: StreamFormatKind::Audio,
            sampling_rate: Some(SamplingRate(rate)),
        }
    }

    pub fn clock_reference(rate: u32) -> Self {
        Self {
            kind: StreamFormatKind::ClockReference,
            sampling_rate: Some(SamplingRate(rate)),
        }
    }

    pub fn is_clock_reference(&self) -> bool {
        self.kind == StreamFormatKind::ClockReference
    }
}

/// Identifies one stream on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamIdentification {
    pub device: DeviceId,
    pub stream: StreamIndex,
}

impl StreamIdentification {
    pub fn new(device: DeviceId, stream: StreamIndex) -> Self {
        Self { device, stream }
    }
}

impl fmt::Display for StreamIdentification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.stream)
    }
}

/// Connection state of a stream input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamConnection {
    #[default]
    NotConnected,
    Connected { talker: StreamIdentification },
    FastConnecting { talker: StreamIdentification },
}

impl StreamConnection {
    /// The talker stream this input is bound to, if any.
    pub fn talker(&self) -> Option<StreamIdentification> {
        match self {
            StreamConnection::NotConnected => None,
            StreamConnection::Connected { talker } | StreamConnection::FastConnecting { talker } => {
                Some(*talker)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, StreamConnection::Connected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display_is_padded_hex() {
        assert_eq!(DeviceId(0x1B92).to_string(), "0x0000000000001B92");
    }

    #[test]
    fn test_device_id_parses_hex_and_decimal() {
        assert_eq!("0x001B92FFFE000001".parse::<DeviceId>().unwrap(), DeviceId(0x001B92FFFE000001));
        assert_eq!("001B92FFFE000001".parse::<DeviceId>().unwrap(), DeviceId(0x001B92FFFE000001));
        assert_eq!("42".parse::<DeviceId>().unwrap(), DeviceId(42));
        assert!("0xZZ".parse::<DeviceId>().is_err());
    }

    #[test]
    fn test_device_id_json_accepts_string_or_number() {
        let from_str: DeviceId = serde_json::from_str("\"0x10\"").unwrap();
        let from_num: DeviceId = serde_json::from_str("16").unwrap();
        assert_eq!(from_str, from_num);
        assert_eq!(serde_json::to_string(&from_str).unwrap(), "\"0x0000000000000010\"");
    }

    #[test]
    fn test_clock_source_kind_json_shape() {
        let kind: ClockSourceKind =
            serde_json::from_str(r#"{"type":"input_stream","stream":2}"#).unwrap();
        assert_eq!(kind, ClockSourceKind::InputStream { stream: Some(2) });

        let internal: ClockSourceKind = serde_json::from_str(r#"{"type":"internal"}"#).unwrap();
        assert_eq!(internal, ClockSourceKind::Internal);
    }

    #[test]
    fn test_fast_connecting_has_talker_but_is_not_connected() {
        let talker = StreamIdentification::new(DeviceId(1), 0);
        let state = StreamConnection::FastConnecting { talker };
        assert_eq!(state.talker(), Some(talker));
        assert!(!state.is_connected());
    }

    #[test]
    fn test_sampling_rate_display() {
        assert_eq!(SamplingRate(48000).to_string(), "48kHz");
        assert_eq!(SamplingRate(44100).to_string(), "44.1kHz");
    }
}
