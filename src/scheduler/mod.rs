pub mod list;
pub mod modulo;

use crate::config::TargetConfig;
use crate::operation::Operation;

pub use list::{ListScheduler, ScoreboardTrust, SuccessorInfo};
pub use modulo::{LoopInfo, ModuloSchedule, ModuloScheduler};

/// Mutable state shared by all scheduler instances of one compilation:
/// currently the count of operations scheduled so far, which drives the
/// optional packing cutoff. Explicit and resettable, never process-global.
#[derive(Debug, Default)]
pub struct SchedulingContext {
    ops_scheduled: u64,
}

impl SchedulingContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_scheduled(&mut self) {
        self.ops_scheduled += 1;
    }

    #[must_use]
    pub fn ops_scheduled(&self) -> u64 {
        self.ops_scheduled
    }

    /// Whether recognizers built from now on should drop to serial issue.
    #[must_use]
    pub fn packing_disabled(&self, config: &TargetConfig) -> bool {
        config
            .max_parallel_ops
            .is_some_and(|limit| self.ops_scheduled >= limit)
    }
}

/// The unit of scheduling: a straight-line sequence of operations in program
/// order. A delay-slot operation, if present, must be the last operation.
#[derive(Debug, Clone)]
pub struct Region {
    pub ops: Vec<Operation>,
}

impl Region {
    #[must_use]
    pub fn new(ops: Vec<Operation>) -> Self {
        if let Some(idx) = ops
            .iter()
            .position(Operation::has_delay_slot)
        {
            assert!(
                idx == ops.len() - 1,
                "delay-slot operation must terminate the region"
            );
        }
        Self { ops }
    }

    /// Index of the terminating delay-slot operation, if any.
    #[must_use]
    pub fn delay_slot_op(&self) -> Option<usize> {
        match self.ops.last() {
            Some(op) if op.has_delay_slot() => Some(self.ops.len() - 1),
            _ => None,
        }
    }
}

/// One output cycle: the operations issuing in it (classes already rewritten
/// to their selected alternates) and the matched packet format name. Idle
/// cycles hold a single nop; standalone cycles have no format.
#[derive(Debug, Clone)]
pub struct Cycle {
    pub ops: Vec<Operation>,
    pub format: Option<String>,
}

impl Cycle {
    /// An idle cycle, materialized as a nop of the architecture's minimum
    /// size. The nop's uid is synthetic and never referenced elsewhere.
    #[must_use]
    pub fn idle(config: &TargetConfig) -> Self {
        let nop = Operation::new(usize::MAX, config.nop_class, vec![]);
        let format = config
            .formats
            .format(config.slot_set(config.nop_class))
            .map(|format| format.name.clone());
        Self {
            ops: vec![nop],
            format,
        }
    }

    #[must_use]
    pub fn is_idle(&self, config: &TargetConfig) -> bool {
        self.ops.len() == 1 && self.ops[0].class == config.nop_class
    }
}

impl std::fmt::Display for Cycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use itertools::Itertools;
        write!(f, "{{{}}}", self.ops.iter().map(ToString::to_string).join("; "))
    }
}

/// A linear cycle sequence, consumed downstream for encoding.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub cycles: Vec<Cycle>,
}

impl Schedule {
    #[must_use]
    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    /// All operations in execution order.
    pub fn ops(&self) -> impl Iterator<Item = &Operation> {
        self.cycles.iter().flat_map(|cycle| cycle.ops.iter())
    }

    /// Number of real (non-synthetic) operations.
    #[must_use]
    pub fn op_count(&self, config: &TargetConfig) -> usize {
        self.cycles
            .iter()
            .filter(|cycle| !cycle.is_idle(config))
            .map(|cycle| cycle.ops.len())
            .sum()
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, cycle) in self.cycles.iter().enumerate() {
            writeln!(f, "{idx:>4}: {cycle}")?;
        }
        Ok(())
    }
}

/// Shared by both schedulers: rewrite an operation to the concrete class it
/// was committed under before re-emitting it into a cycle.
pub(crate) fn reemit(op: &Operation, selected: crate::config::ClassId) -> Operation {
    let mut out = op.clone();
    out.class = selected;
    out
}
