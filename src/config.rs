use serde::{Deserialize, Serialize};

use crate::format::{PacketFormatTable, SlotBits, SlotInfo};
use crate::itinerary::{self, ScheduleClass};

/// Index into the target's schedule class table.
pub type ClassId = usize;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("target has no schedule classes")]
    NoClasses,
    #[error("target has no packet formats")]
    NoFormats,
    #[error("class {class} ({name}) references unknown slot kind {slot}")]
    UnknownSlot {
        class: ClassId,
        name: String,
        slot: usize,
    },
    #[error("class {class} ({name}) references unknown alternate class {alternate}")]
    UnknownAlternate {
        class: ClassId,
        name: String,
        alternate: ClassId,
    },
    #[error("nop class {0} does not exist")]
    UnknownNopClass(ClassId),
    #[error("nop class {class} ({name}) must have a known slot and no alternates")]
    InvalidNopClass { class: ClassId, name: String },
    #[error("class {class} ({name}): operand data for {got} operands, forwarding for {forward}")]
    OperandDataMismatch {
        class: ClassId,
        name: String,
        got: usize,
        forward: usize,
    },
    #[error("issue limit must be positive")]
    ZeroIssueLimit,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Static target configuration: itinerary table, slot table, packet format
/// table and scheduler tuning parameters. Loaded once per target and shared
/// by all scheduler instances (`Arc<TargetConfig>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub classes: Vec<ScheduleClass>,
    pub slot_table: Vec<SlotInfo>,
    pub formats: PacketFormatTable,
    /// Class used to materialize idle cycles in the output sequence.
    pub nop_class: ClassId,

    /// Maximum operations issued per cycle. 1 generates sequential code;
    /// higher values allow more instruction level parallelism.
    #[serde(default = "default_issue_limit")]
    pub issue_limit: u32,
    /// Minimum number of cycles scheduled bottom-up per region.
    #[serde(default = "default_bottom_up_cycles")]
    pub bottom_up_cycles: u32,
    /// Maximum cycle delta relative to the current cycle for bottom-up
    /// emission.
    #[serde(default = "default_bottom_up_delta")]
    pub bottom_up_delta: u32,
    /// Lower bound for negative-latency dependencies. Bumps the window of
    /// schedulable cycles in the bottom zone without hampering scheduling
    /// opportunities. Must not be larger than the most negative latency the
    /// bypass network can produce.
    #[serde(default = "default_negative_latency_lower_bound")]
    pub negative_latency_lower_bound: i32,
    /// How many initiation intervals beyond ResMII the pipeliner may try.
    #[serde(default = "default_max_ii_delta")]
    pub max_ii_delta: u32,
    /// Once this many operations have been scheduled, newly created hazard
    /// recognizers fall back to issue limit 1 (packing disabled). Debugging
    /// aid for bisecting bundling problems.
    #[serde(default)]
    pub max_parallel_ops: Option<u64>,
    /// Itinerary stages past this depth are ignored in pre-allocation mode,
    /// where detailed resource modelling does not pay off.
    #[serde(default = "default_pre_alloc_fu_depth")]
    pub pre_alloc_fu_depth: u32,
    /// Minimum scoreboard depth. The effective depth is the maximum of this
    /// and the pipeline depth, rounded up to a power of two.
    #[serde(default = "default_scoreboard_depth")]
    pub scoreboard_depth: u32,
    /// Delay-slot cycles to keep free of non-delay-slot operations.
    #[serde(default)]
    pub reserved_delay_slots: u32,
}

fn default_issue_limit() -> u32 {
    6
}
fn default_bottom_up_cycles() -> u32 {
    u32::MAX
}
fn default_bottom_up_delta() -> u32 {
    128
}
fn default_negative_latency_lower_bound() -> i32 {
    -10
}
fn default_max_ii_delta() -> u32 {
    8
}
fn default_pre_alloc_fu_depth() -> u32 {
    16
}
fn default_scoreboard_depth() -> u32 {
    128
}

impl TargetConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.classes.is_empty() {
            return Err(Error::NoClasses);
        }
        if self.formats.is_empty() {
            return Err(Error::NoFormats);
        }
        if self.issue_limit == 0 {
            return Err(Error::ZeroIssueLimit);
        }
        for (id, class) in self.classes.iter().enumerate() {
            for &slot in &class.slots {
                if slot >= self.slot_table.len() {
                    return Err(Error::UnknownSlot {
                        class: id,
                        name: class.name.clone(),
                        slot,
                    });
                }
            }
            for &alternate in &class.alternates {
                if alternate >= self.classes.len() {
                    return Err(Error::UnknownAlternate {
                        class: id,
                        name: class.name.clone(),
                        alternate,
                    });
                }
            }
            if !class.forward_class.is_empty()
                && class.forward_class.len() != class.operand_cycles.len()
            {
                return Err(Error::OperandDataMismatch {
                    class: id,
                    name: class.name.clone(),
                    got: class.operand_cycles.len(),
                    forward: class.forward_class.len(),
                });
            }
        }
        let nop = self
            .classes
            .get(self.nop_class)
            .ok_or(Error::UnknownNopClass(self.nop_class))?;
        if nop.slots.is_empty() || !nop.alternates.is_empty() {
            return Err(Error::InvalidNopClass {
                class: self.nop_class,
                name: nop.name.clone(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn class(&self, id: ClassId) -> &ScheduleClass {
        &self.classes[id]
    }

    /// Union of the slot bits class `id` can occupy. Classes with alternates
    /// are expected to resolve to single-slot alternates before this matters.
    #[must_use]
    pub fn slot_set(&self, id: ClassId) -> SlotBits {
        self.class(id)
            .slots
            .iter()
            .fold(0, |bits, &kind| bits | self.slot_table[kind].slots)
    }

    #[must_use]
    pub fn pipeline_depth(&self) -> u32 {
        itinerary::pipeline_depth(&self.classes)
    }

    #[must_use]
    pub fn max_latency(&self) -> u32 {
        itinerary::max_latency(&self.classes)
    }

    #[must_use]
    pub fn conflict_horizon(&self) -> u32 {
        itinerary::conflict_horizon(&self.classes)
    }
}
