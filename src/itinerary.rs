use serde::{Deserialize, Serialize};

use crate::config::ClassId;
use crate::format::SlotKind;

/// How a stage occupies its functional units.
///
/// `Required` units are exclusively owned for the stage's cycles and conflict
/// with any other use. `Reserved` units only conflict with `Required` uses,
/// which models units that are held "in the background" and may be shared by
/// other reserving stages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
pub enum ReservationKind {
    Required,
    Reserved,
}

/// One stage of an itinerary: a set of functional units occupied for a number
/// of cycles. `next_cycles` tells how far the next stage starts after this
/// one; it may be 0 (several unit sets in the same cycle) or larger than
/// `cycles` (a gap before the next stage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stage {
    pub cycles: u32,
    /// Bitset of the functional units this stage occupies.
    pub units: u64,
    pub next_cycles: u32,
    pub kind: ReservationKind,
}

impl Stage {
    #[must_use]
    pub fn required(cycles: u32, units: u64, next_cycles: u32) -> Self {
        Self {
            cycles,
            units,
            next_cycles,
            kind: ReservationKind::Required,
        }
    }

    #[must_use]
    pub fn reserved(cycles: u32, units: u64, next_cycles: u32) -> Self {
        Self {
            cycles,
            units,
            next_cycles,
            kind: ReservationKind::Reserved,
        }
    }
}

/// Static description of one schedule class: the resource itinerary shared by
/// all operations of that class, the cycle each operand is accessed in, the
/// issue slots the class may occupy, and alternate encodings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleClass {
    pub name: String,
    /// Ordered resource stages. Empty only for classes that never reach
    /// the post-allocation scheduler (meta/pseudo classes).
    #[serde(default)]
    pub stages: Vec<Stage>,
    /// Pipeline cycle in which operand `i` is read (uses) or written (defs).
    /// Missing entries default to cycle 0.
    #[serde(default)]
    pub operand_cycles: Vec<u32>,
    /// Forwarding class per operand. Two matching forwarding classes on a
    /// def/use pair shorten the effective latency by one cycle (the bypass
    /// network hands the value over before the register file does).
    #[serde(default)]
    pub forward_class: Vec<Option<u32>>,
    /// Issue slots this class can occupy, in preference order.
    /// Empty means the slot is unknown: such operations bundle standalone.
    #[serde(default)]
    pub slots: Vec<SlotKind>,
    /// Alternate encodings (other classes) tried in declaration order when
    /// the primary class does not fit.
    #[serde(default)]
    pub alternates: Vec<ClassId>,
}

impl ScheduleClass {
    /// The cycle operand `idx` is accessed in, defaulting to 0.
    #[must_use]
    pub fn operand_cycle(&self, idx: usize) -> u32 {
        self.operand_cycles.get(idx).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn forward_class(&self, idx: usize) -> Option<u32> {
        self.forward_class.get(idx).copied().flatten()
    }

    /// Depth of this itinerary: the last cycle (exclusive) any stage occupies.
    #[must_use]
    pub fn depth(&self) -> u32 {
        let mut cur = 0;
        let mut depth = 0;
        for stage in &self.stages {
            depth = depth.max(cur + stage.cycles);
            cur += stage.next_cycles;
        }
        depth
    }

    /// The latest cycle in which this class writes a result. Used as the
    /// latency that must elapse before control leaves a region.
    #[must_use]
    pub fn result_cycle(&self) -> u32 {
        self.operand_cycles.iter().copied().max().unwrap_or(0)
    }
}

/// Depth of the deepest itinerary over all classes.
#[must_use]
pub fn pipeline_depth(classes: &[ScheduleClass]) -> u32 {
    classes.iter().map(ScheduleClass::depth).max().unwrap_or(0)
}

/// Worst case operand-to-operand latency over all classes. This ignores
/// bypasses and the RAW/WAW/WAR distinction, so it overestimates.
#[must_use]
pub fn max_latency(classes: &[ScheduleClass]) -> u32 {
    let mut first_rw = u32::MAX;
    let mut last_rw = 0;
    for class in classes {
        for &cycle in &class.operand_cycles {
            first_rw = first_rw.min(cycle);
            last_rw = last_rw.max(cycle);
        }
    }
    if first_rw == u32::MAX {
        return 0;
    }
    last_rw - first_rw + 1
}

/// The maximum distance in cycles at which two operations can influence each
/// other, either through resources or through operand latencies.
#[must_use]
pub fn conflict_horizon(classes: &[ScheduleClass]) -> u32 {
    pipeline_depth(classes).max(max_latency(classes))
}
