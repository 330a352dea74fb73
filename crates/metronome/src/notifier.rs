//! Snapshot diffing for change notifications.

use crate::mapping::DomainMapping;
use crate::types::DeviceId;

/// Devices whose effective primary master changed between two snapshots.
///
/// A device counts as changed when it is new, when its primary master id
/// differs (including gaining or losing one), or when its resolution error
/// changed.
pub fn changed_devices(previous: &DomainMapping, current: &DomainMapping) -> Vec<DeviceId> {
    current
        .devices()
        .filter(|device| {
            !previous.contains(*device)
                || previous.primary_master(*device) != current.primary_master(*device)
                || previous.error_of(*device) != current.error_of(*device)
        })
        .collect()
}

/// Devices in the domain led by `master`, the master and cascaded members
/// included. Used to refresh displayed master names after a rename.
pub fn devices_following_master(mapping: &DomainMapping, master: DeviceId) -> Vec<DeviceId> {
    mapping
        .find_domain_index_by_master(master)
        .map(|index| mapping.members_of(index))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::DomainMappingBuilder;
    use crate::resolver::ResolutionError;

    const A: DeviceId = DeviceId(1);
    const B: DeviceId = DeviceId(2);
    const C: DeviceId = DeviceId(3);

    #[test]
    fn test_unchanged_snapshot_reports_nothing() {
        let mapping = DomainMappingBuilder::new().member(A, A).member(B, A).build();
        assert!(changed_devices(&mapping, &mapping.clone()).is_empty());
    }

    #[test]
    fn test_master_switch_and_new_device_reported() {
        let previous = DomainMappingBuilder::new().member(A, A).member(B, A).member(C, C).build();
        let current = DomainMappingBuilder::new()
            .member(C, C)
            .member(A, A)
            .member(B, C)
            .member(DeviceId(4), A)
            .build();
        assert_eq!(changed_devices(&previous, &current), vec![B, DeviceId(4)]);
    }

    #[test]
    fn test_error_change_reported_even_with_same_master() {
        let previous = DomainMappingBuilder::new().member(A, A).build();
        let mut builder = DomainMappingBuilder::new();
        builder.assign(A, A);
        builder.record_error(A, ResolutionError::ExternalClockSource);
        let current = builder.build();
        assert_eq!(changed_devices(&previous, &current), vec![A]);
    }

    #[test]
    fn test_losing_master_reported() {
        let previous = DomainMappingBuilder::new().member(A, A).member(B, A).build();
        let current = DomainMappingBuilder::new().member(A, A).unassigned(B).build();
        assert_eq!(changed_devices(&previous, &current), vec![B]);
    }

    #[test]
    fn test_devices_following_master_includes_cascaded() {
        let mapping = DomainMappingBuilder::new()
            .member(A, A)
            .member(B, A)
            .member(C, C)
            .member(C, A)
            .build();
        assert_eq!(devices_following_master(&mapping, A), vec![A, B, C]);
        assert_eq!(devices_following_master(&mapping, C), vec![C]);
        assert!(devices_following_master(&mapping, DeviceId(99)).is_empty());
    }
}
