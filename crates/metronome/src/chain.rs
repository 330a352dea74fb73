//! Command orchestration
//!
//! A [`ParallelCommandSet`] dispatches its units together and completes when
//! every unit has reported back. A [`SequentialPlan`] runs sets one after the
//! other, folding their errors into one map and reporting progress.
//!
//! Units report through a [`CompletionHandle`] that sends over an unbounded
//! channel, so a network callback can finish a unit from any thread without
//! holding a reference to the set.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::command::{CommandErrors, CommandExecutionError, CommandKind};
use crate::types::DeviceId;

/// One asynchronous remote operation.
///
/// Returns `true` when it started something and will report through the
/// handle, `false` when there was nothing to do. A unit returning `false`
/// may still record errors on the handle before returning.
pub type CommandUnit = Box<dyn FnOnce(CompletionHandle) -> bool + Send>;

#[derive(Debug)]
enum UnitMessage {
    Error {
        device: DeviceId,
        error: CommandExecutionError,
        command: Option<CommandKind>,
    },
    Completed {
        index: usize,
    },
    Released {
        index: usize,
    },
}

/// Reports the outcome of one unit back to its set.
#[derive(Debug)]
pub struct CompletionHandle {
    index: usize,
    tx: mpsc::UnboundedSender<UnitMessage>,
    completed: bool,
}

impl CompletionHandle {
    /// Position of the unit inside its set.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn add_error(&self, device: DeviceId, error: CommandExecutionError, command: Option<CommandKind>) {
        let _ = self.tx.send(UnitMessage::Error { device, error, command });
    }

    pub fn complete(mut self) {
        self.completed = true;
        let _ = self.tx.send(UnitMessage::Completed { index: self.index });
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if !self.completed {
            let _ = self.tx.send(UnitMessage::Released { index: self.index });
        }
    }
}

/// Units dispatched together, in insertion order, without waiting on each other.
#[derive(Default)]
pub struct ParallelCommandSet {
    units: Vec<CommandUnit>,
}

impl ParallelCommandSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, unit: CommandUnit) {
        self.units.push(unit);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Dispatch every unit once and wait until each has reported.
    ///
    /// Resolves without suspending when no unit started anything, so an
    /// empty set is complete on the first poll.
    pub async fn exec(self) -> CommandErrors {
        let total = self.units.len();
        let mut errors = CommandErrors::new();
        if total == 0 {
            return errors;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut done = vec![false; total];
        let mut completed = 0usize;

        for (index, unit) in self.units.into_iter().enumerate() {
            let handle = CompletionHandle {
                index,
                tx: tx.clone(),
                completed: false,
            };
            if !unit(handle) && !done[index] {
                done[index] = true;
                completed += 1;
            }
        }
        drop(tx);

        let mut handle_message = |message: UnitMessage, done: &mut Vec<bool>, completed: &mut usize| match message {
            UnitMessage::Error { device, error, command } => {
                errors.add(device, error, command);
            }
            UnitMessage::Completed { index } => {
                if !done[index] {
                    done[index] = true;
                    *completed += 1;
                }
            }
            UnitMessage::Released { index } => {
                if !done[index] {
                    tracing::warn!(unit.index = index, "Command unit dropped its completion handle without reporting");
                    done[index] = true;
                    *completed += 1;
                }
            }
        };

        // Messages already queued by synchronous units
        while let Ok(message) = rx.try_recv() {
            handle_message(message, &mut done, &mut completed);
        }

        while completed < total {
            match rx.recv().await {
                Some(message) => handle_message(message, &mut done, &mut completed),
                None => break,
            }
        }

        while let Ok(message) = rx.try_recv() {
            handle_message(message, &mut done, &mut completed);
        }

        errors
    }
}

/// Progress of a running plan, in units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// Rounded completion percentage. An empty plan is 100% done.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed as f64 / self.total as f64) * 100.0).round() as u8
    }
}

/// Parallel sets executed strictly one after the other.
#[derive(Default)]
pub struct SequentialPlan {
    sets: VecDeque<ParallelCommandSet>,
}

impl SequentialPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_plan(&mut self, sets: Vec<ParallelCommandSet>) {
        self.sets = sets.into();
    }

    pub fn push(&mut self, set: ParallelCommandSet) {
        self.sets.push_back(set);
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    pub fn total_units(&self) -> usize {
        self.sets.iter().map(ParallelCommandSet::len).sum()
    }

    /// Run every set in order. `on_progress` is called after each set with the
    /// cumulative unit count. Failures never stop the plan; they all come back
    /// in the returned map.
    pub async fn start(mut self, mut on_progress: impl FnMut(Progress)) -> CommandErrors {
        let total = self.total_units();
        let mut completed = 0usize;
        let mut errors = CommandErrors::new();

        tracing::info!(plan.sets = self.sets.len(), plan.units = total, "Plan started");

        let mut set_number = 0usize;
        while let Some(set) = self.sets.pop_front() {
            let units = set.len();
            let set_errors = set.exec().await;
            if !set_errors.is_empty() {
                tracing::warn!(plan.set = set_number, set.errors = set_errors.len(), "Command set finished with errors");
            }
            errors.merge(set_errors);
            completed += units;
            set_number += 1;
            on_progress(Progress { completed, total });
        }

        tracing::info!(plan.units = total, plan.errors = errors.len(), "Plan finished");
        errors
    }
}
