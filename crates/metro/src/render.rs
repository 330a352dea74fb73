//! Plain-text rendering of models and reports.

use std::fmt::Write;

use metronome::{CommandErrors, DeviceDirectory, DeviceId, DomainMapping};

fn name_of(directory: &dyn DeviceDirectory, device: DeviceId) -> String {
    directory
        .device(device)
        .map(|d| d.name.clone())
        .unwrap_or_else(|| "(offline)".to_string())
}

/// One line per device: id, name, master, resolution error.
pub fn masters(model: &DomainMapping, directory: &dyn DeviceDirectory) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<20} {:<20} {:<20} {}", "DEVICE", "NAME", "MASTER", "ERROR");
    for device in model.devices() {
        let master = model
            .primary_master(device)
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string());
        let error = model
            .error_of(device)
            .map(|e| e.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "{:<20} {:<20} {:<20} {}", device, name_of(directory, device), master, error);
    }
    out
}

/// Domains with their members, then devices without a domain.
pub fn model(model: &DomainMapping, directory: &dyn DeviceDirectory) -> String {
    let mut out = String::new();
    for domain in model.domains() {
        let rate = domain
            .sampling_rate
            .map(|r| r.to_string())
            .unwrap_or_else(|| "indeterminate".to_string());
        let _ = writeln!(
            out,
            "domain {} master {} ({}) @ {}",
            domain.index,
            domain.master,
            name_of(directory, domain.master),
            rate
        );
        for member in model.members_of(domain.index) {
            let secondary = model.domains_of(member).get(1) == Some(&domain.index);
            let _ = writeln!(
                out,
                "  {} {}{}",
                member,
                name_of(directory, member),
                if secondary { " (cascaded)" } else { "" }
            );
        }
    }

    let unassigned: Vec<DeviceId> = model.devices().filter(|d| model.domains_of(*d).is_empty()).collect();
    if !unassigned.is_empty() {
        let _ = writeln!(out, "unassigned");
        for device in unassigned {
            match model.error_of(device) {
                Some(error) => {
                    let _ = writeln!(out, "  {} {}: {}", device, name_of(directory, device), error);
                }
                None => {
                    let _ = writeln!(out, "  {} {}", device, name_of(directory, device));
                }
            }
        }
    }
    out
}

pub fn errors(errors: &CommandErrors, directory: &dyn DeviceDirectory) -> String {
    let mut out = String::new();
    for (device, info) in errors.iter() {
        let _ = writeln!(out, "{} {}: {}", device, name_of(directory, device), info);
    }
    out
}
