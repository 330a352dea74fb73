//! Domain model: which devices derive their clock from which master.
//!
//! A [`DomainMapping`] is an immutable snapshot, rebuilt from scratch by
//! [`build_domain_model`] whenever topology changes. Domain indices are only
//! meaningful inside one snapshot; compare masters and rates across
//! snapshots, never indices.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::directory::DeviceDirectory;
use crate::resolver::{resolve_master, ResolutionError};
use crate::types::{DeviceId, SamplingRate};

/// Opaque per-snapshot domain identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainIndex(pub u64);

impl fmt::Display for DomainIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub index: DomainIndex,
    pub master: DeviceId,
    /// `None` when members disagree or none reports a rate.
    pub sampling_rate: Option<SamplingRate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainMapping {
    /// Primary domain first, then the secondary one of a cascaded master.
    assignments: BTreeMap<DeviceId, Vec<DomainIndex>>,
    domains: BTreeMap<DomainIndex, Domain>,
    errors: BTreeMap<DeviceId, ResolutionError>,
}

impl DomainMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every device the mapping knows, assigned or not.
    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.assignments.keys().copied()
    }

    pub fn contains(&self, device: DeviceId) -> bool {
        self.assignments.contains_key(&device)
    }

    /// Domain indices of a device; empty for unknown or unassigned devices.
    pub fn domains_of(&self, device: DeviceId) -> &[DomainIndex] {
        self.assignments.get(&device).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn domain(&self, index: DomainIndex) -> Option<&Domain> {
        self.domains.get(&index)
    }

    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.domains.values()
    }

    pub fn error_of(&self, device: DeviceId) -> Option<ResolutionError> {
        self.errors.get(&device).copied()
    }

    pub fn errors(&self) -> &BTreeMap<DeviceId, ResolutionError> {
        &self.errors
    }

    /// Domain a device is primarily assigned to.
    pub fn primary_domain(&self, device: DeviceId) -> Option<&Domain> {
        self.domains_of(device).first().and_then(|index| self.domain(*index))
    }

    pub fn primary_master(&self, device: DeviceId) -> Option<DeviceId> {
        self.primary_domain(device).map(|domain| domain.master)
    }

    /// Masters of every domain a device belongs to, in assignment order.
    pub fn masters_of(&self, device: DeviceId) -> Vec<DeviceId> {
        self.domains_of(device)
            .iter()
            .filter_map(|index| self.domain(*index))
            .map(|domain| domain.master)
            .collect()
    }

    pub fn find_domain_index_by_master(&self, master: DeviceId) -> Option<DomainIndex> {
        self.domains
            .values()
            .find(|domain| domain.master == master)
            .map(|domain| domain.index)
    }

    /// Devices assigned to a domain, either as primary or secondary.
    pub fn members_of(&self, index: DomainIndex) -> Vec<DeviceId> {
        self.assignments
            .iter()
            .filter(|(_, domains)| domains.contains(&index))
            .map(|(device, _)| *device)
            .collect()
    }

    /// Same devices, same masters in the same order, same rate per master.
    /// Indices are ignored.
    pub fn same_topology(&self, other: &DomainMapping) -> bool {
        if self.assignments.len() != other.assignments.len() {
            return false;
        }
        let same_devices = self.devices().all(|device| {
            other.contains(device) && self.masters_of(device) == other.masters_of(device)
        });
        let rates = |mapping: &DomainMapping| -> BTreeMap<DeviceId, Option<SamplingRate>> {
            mapping
                .domains
                .values()
                .map(|domain| (domain.master, domain.sampling_rate))
                .collect()
        };
        same_devices && rates(self) == rates(other)
    }
}

/// Assembles a [`DomainMapping`], deduplicating domains by master id.
#[derive(Debug, Default)]
pub struct DomainMappingBuilder {
    mapping: DomainMapping,
}

impl DomainMappingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the domain led by `master`, created on first sight.
    pub fn domain_for_master(&mut self, master: DeviceId) -> DomainIndex {
        if let Some(index) = self.mapping.find_domain_index_by_master(master) {
            return index;
        }
        let index = DomainIndex(self.mapping.domains.len() as u64);
        self.mapping.domains.insert(
            index,
            Domain {
                index,
                master,
                sampling_rate: None,
            },
        );
        index
    }

    /// Declare a domain with a target rate.
    pub fn with_domain(mut self, master: DeviceId, rate: Option<SamplingRate>) -> Self {
        let index = self.domain_for_master(master);
        self.set_rate(index, rate);
        self
    }

    pub fn set_rate(&mut self, index: DomainIndex, rate: Option<SamplingRate>) {
        if let Some(domain) = self.mapping.domains.get_mut(&index) {
            domain.sampling_rate = rate;
        }
    }

    /// Make sure `device` has an entry, possibly with no domains.
    pub fn touch(&mut self, device: DeviceId) {
        self.mapping.assignments.entry(device).or_default();
    }

    /// Append `master`'s domain to `device`'s list, skipping duplicates.
    pub fn assign(&mut self, device: DeviceId, master: DeviceId) -> DomainIndex {
        let index = self.domain_for_master(master);
        let domains = self.mapping.assignments.entry(device).or_default();
        if !domains.contains(&index) {
            domains.push(index);
        }
        index
    }

    /// Builder-style shorthand for a primary (or, called twice, secondary)
    /// assignment.
    pub fn member(mut self, device: DeviceId, master: DeviceId) -> Self {
        self.assign(device, master);
        self
    }

    pub fn unassigned(mut self, device: DeviceId) -> Self {
        self.mapping.assignments.insert(device, Vec::new());
        self
    }

    pub fn record_error(&mut self, device: DeviceId, error: ResolutionError) {
        self.mapping.errors.insert(device, error);
    }

    pub fn build(self) -> DomainMapping {
        self.mapping
    }
}

/// Resolve every device and group the results into domains.
///
/// Each device gets an entry (empty on error). A device that is its own
/// master is resolved a second time in secondary mode; a clean result is
/// appended as its secondary domain. Rates are computed over all members,
/// secondary memberships included.
pub fn build_domain_model(
    directory: &dyn DeviceDirectory,
    devices: impl IntoIterator<Item = DeviceId>,
) -> DomainMapping {
    let mut builder = DomainMappingBuilder::new();

    for device in devices {
        builder.touch(device);

        let resolution = resolve_master(directory, device, false);
        if let Some(master) = resolution.master {
            builder.assign(device, master);
        }
        if let Some(error) = resolution.error {
            builder.record_error(device, error);
        }

        if resolution.master == Some(device) {
            let secondary = resolve_master(directory, device, true);
            if let (Some(upstream), None) = (secondary.master, secondary.error) {
                tracing::debug!(device.id = %device, master.id = %upstream, "Cascaded master");
                builder.assign(device, upstream);
            }
        }
    }

    let mut mapping = builder.build();
    let indices: Vec<DomainIndex> = mapping.domains.keys().copied().collect();
    for index in indices {
        let rates: BTreeSet<SamplingRate> = mapping
            .members_of(index)
            .into_iter()
            .filter_map(|member| directory.device(member)?.observed_sampling_rate())
            .collect();
        let rate = if rates.len() == 1 {
            rates.into_iter().next()
        } else {
            None
        };
        if let Some(domain) = mapping.domains.get_mut(&index) {
            domain.sampling_rate = rate;
        }
    }

    tracing::debug!(
        model.devices = mapping.assignments.len(),
        model.domains = mapping.domains.len(),
        model.errors = mapping.errors.len(),
        "Built domain model"
    );
    mapping
}

/// Serializable target layout, the form callers hand in to `plan`/`apply`.
///
/// ```json
/// {
///   "domains": [
///     { "master": "0x0000000000000001", "sampling_rate": 48000,
///       "members": ["0x0000000000000002"] }
///   ],
///   "secondary": { "0x0000000000000005": "0x0000000000000001" },
///   "unassigned": ["0x0000000000000009"]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetLayout {
    #[serde(default)]
    pub domains: Vec<DomainLayout>,
    /// Cascaded masters: device (a domain master itself) to upstream master.
    #[serde(default)]
    pub secondary: BTreeMap<DeviceId, DeviceId>,
    #[serde(default)]
    pub unassigned: Vec<DeviceId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainLayout {
    pub master: DeviceId,
    #[serde(default)]
    pub sampling_rate: Option<SamplingRate>,
    #[serde(default)]
    pub members: Vec<DeviceId>,
}

impl TargetLayout {
    /// Describe an existing mapping as a layout.
    pub fn from_mapping(mapping: &DomainMapping) -> Self {
        let mut layout = TargetLayout::default();
        for domain in mapping.domains() {
            let members = mapping
                .assignments
                .iter()
                .filter(|(device, domains)| domains.first() == Some(&domain.index) && **device != domain.master)
                .map(|(device, _)| *device)
                .collect();
            layout.domains.push(DomainLayout {
                master: domain.master,
                sampling_rate: domain.sampling_rate,
                members,
            });
        }
        for (device, domains) in &mapping.assignments {
            match domains.as_slice() {
                [] => layout.unassigned.push(*device),
                [_, secondary, ..] => {
                    if let Some(upstream) = mapping.domain(*secondary) {
                        layout.secondary.insert(*device, upstream.master);
                    }
                }
                _ => {}
            }
        }
        layout
    }

    /// Build the mapping this layout describes.
    ///
    /// Masters are primary members of their own domain; secondary entries
    /// are appended after the primary.
    pub fn into_mapping(self) -> DomainMapping {
        let mut builder = DomainMappingBuilder::new();
        for domain in &self.domains {
            let index = builder.domain_for_master(domain.master);
            builder.set_rate(index, domain.sampling_rate);
            builder.assign(domain.master, domain.master);
            for member in &domain.members {
                builder.assign(*member, domain.master);
            }
        }
        for (device, upstream) in &self.secondary {
            builder.assign(*device, *upstream);
        }
        let mut mapping = builder.build();
        for device in self.unassigned {
            mapping.assignments.insert(device, Vec::new());
        }
        mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const A: DeviceId = DeviceId(0xA);
    const B: DeviceId = DeviceId(0xB);
    const C: DeviceId = DeviceId(0xC);

    #[test]
    fn test_builder_dedupes_domains_by_master() {
        let mut builder = DomainMappingBuilder::new();
        let first = builder.assign(A, A);
        let second = builder.assign(B, A);
        assert_eq!(first, second);

        let mapping = builder.build();
        assert_eq!(mapping.domains().count(), 1);
        assert_eq!(mapping.members_of(first), vec![A, B]);
    }

    #[test]
    fn test_same_topology_ignores_indices() {
        let left = DomainMappingBuilder::new()
            .with_domain(A, Some(SamplingRate(48000)))
            .with_domain(C, None)
            .member(A, A)
            .member(B, A)
            .member(C, C)
            .build();
        let right = DomainMappingBuilder::new()
            .with_domain(C, None)
            .with_domain(A, Some(SamplingRate(48000)))
            .member(C, C)
            .member(A, A)
            .member(B, A)
            .build();

        assert_ne!(left.find_domain_index_by_master(A), right.find_domain_index_by_master(A));
        assert!(left.same_topology(&right));
    }

    #[test]
    fn test_same_topology_sees_rate_change() {
        let left = DomainMappingBuilder::new().with_domain(A, Some(SamplingRate(48000))).member(A, A).build();
        let right = DomainMappingBuilder::new().with_domain(A, Some(SamplingRate(96000))).member(A, A).build();
        assert!(!left.same_topology(&right));
    }

    #[test]
    fn test_layout_into_mapping() {
        let layout: TargetLayout = serde_json::from_str(
            r#"{
                "domains": [
                    {"master": "0xA", "sampling_rate": 48000, "members": ["0xB"]},
                    {"master": "0xC", "members": []}
                ],
                "secondary": {"0x000000000000000C": "0xA"},
                "unassigned": [13]
            }"#,
        )
        .unwrap();
        let mapping = layout.into_mapping();

        assert_eq!(mapping.primary_master(B), Some(A));
        assert_eq!(mapping.masters_of(C), vec![C, A]);
        assert!(mapping.contains(DeviceId(13)));
        assert!(mapping.domains_of(DeviceId(13)).is_empty());
        let domain = mapping.primary_domain(B).unwrap();
        assert_eq!(domain.sampling_rate, Some(SamplingRate(48000)));
    }

    #[test]
    fn test_layout_from_mapping_roundtrips_topology() {
        let mapping = DomainMappingBuilder::new()
            .with_domain(A, Some(SamplingRate(48000)))
            .member(A, A)
            .member(B, A)
            .member(C, C)
            .member(C, A)
            .unassigned(DeviceId(13))
            .build();

        let layout = TargetLayout::from_mapping(&mapping);
        assert_eq!(layout.secondary.get(&C), Some(&A));
        assert_eq!(layout.unassigned, vec![DeviceId(13)]);
        assert!(layout.into_mapping().same_topology(&mapping));
    }
}
