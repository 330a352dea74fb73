//! metronome - media clock domain management
//!
//! Works out which device each networked audio endpoint derives its media
//! clock from, groups endpoints into clock domains, and drives the network
//! from one domain layout to another.
//!
//! ## Pieces
//!
//! - [`resolver`] walks one device's clock-source chain to its master
//! - [`mapping`] resolves every device and groups the results into a
//!   [`DomainMapping`] snapshot
//! - [`planner`] diffs two snapshots into ordered phases of commands
//! - [`chain`] executes phases: units in a [`ParallelCommandSet`] run
//!   together, sets in a [`SequentialPlan`] run one after the other
//! - [`notifier`] reports which devices changed master between snapshots
//! - [`manager`] ties it together over a [`DeviceDirectory`] and a
//!   [`NetworkCommands`] backend
//!
//! [`FleetDirectory`] and [`SimulatedNetwork`] are in-memory implementations
//! of the two collaborators, driven from JSON fleet files.

pub mod chain;
pub mod command;
pub mod device;
pub mod directory;
pub mod manager;
pub mod mapping;
pub mod notifier;
pub mod planner;
pub mod resolver;
pub mod sim;
pub mod types;
pub mod units;

pub use chain::{CommandUnit, CompletionHandle, ParallelCommandSet, Progress, SequentialPlan};
pub use command::{
    AemStatus, Blame, CommandErrorInfo, CommandErrors, CommandExecutionError, CommandKind, ControlStatus,
    NetworkCommands,
};
pub use device::{AudioUnit, ClockDomain, ClockSelection, ClockSource, Device, StreamInput, StreamOutput};
pub use directory::{DeviceDirectory, DirectoryEvent, FleetDirectory, FleetError, FleetFile};
pub use manager::{ApplyInfo, ManagerEvent, MediaClockManager};
pub use mapping::{build_domain_model, Domain, DomainIndex, DomainLayout, DomainMapping, DomainMappingBuilder, TargetLayout};
pub use notifier::{changed_devices, devices_following_master};
pub use planner::{plan_transition, PhaseKind, PlannedCommand, PlannedPhase, TransitionPlan};
pub use resolver::{resolve_master, MasterResolution, ResolutionError};
pub use sim::SimulatedNetwork;
pub use types::*;
