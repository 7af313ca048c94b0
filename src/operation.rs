use crate::config::ClassId;

/// Physical register identity.
///
/// Only used to derive dependencies between operations; storage class and
/// allocation are the concern of upstream passes.
pub type RegId = u32;

/// A single operand of a machine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Register { reg: RegId, def: bool },
    Immediate(i64),
    Memory { base: RegId, offset: i64 },
}

impl Operand {
    #[must_use]
    pub fn read_reg(&self) -> Option<RegId> {
        match self {
            Operand::Register { reg, def: false } => Some(*reg),
            Operand::Memory { base, .. } => Some(*base),
            _ => None,
        }
    }

    #[must_use]
    pub fn written_reg(&self) -> Option<RegId> {
        match self {
            Operand::Register { reg, def: true } => Some(*reg),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Register { reg, def: true } => write!(f, "def r{reg}"),
            Operand::Register { reg, def: false } => write!(f, "r{reg}"),
            Operand::Immediate(value) => write!(f, "#{value}"),
            Operand::Memory { base, offset } => write!(f, "[r{base}+{offset}]"),
        }
    }
}

/// A selected machine operation, produced upstream.
///
/// The scheduler never changes the semantics of an operation; it only decides
/// its issue cycle and slot. When a class has alternate encodings, the chosen
/// alternate is tracked by the hazard recognizer and applied when the
/// operation is re-emitted into the output sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Unique id within one scheduling run.
    pub uid: usize,
    /// Schedule class describing the itinerary and slot of this operation.
    pub class: ClassId,
    pub operands: Vec<Operand>,
    /// Number of architectural delay slots following this operation
    /// (0 for all non-control-flow operations).
    pub delay_slots: u32,
    /// Meta operations take no slot and no resources; they are re-emitted
    /// after the bundle they were scheduled with.
    pub meta: bool,
    /// Marks the operation in a loop preheader that defines the trip count.
    pub trip_count_def: bool,
}

impl Operation {
    #[must_use]
    pub fn new(uid: usize, class: ClassId, operands: Vec<Operand>) -> Self {
        Self {
            uid,
            class,
            operands,
            delay_slots: 0,
            meta: false,
            trip_count_def: false,
        }
    }

    #[must_use]
    pub fn with_delay_slots(mut self, delay_slots: u32) -> Self {
        self.delay_slots = delay_slots;
        self
    }

    #[must_use]
    pub fn has_delay_slot(&self) -> bool {
        self.delay_slots > 0
    }

    /// Registers read by this operation, with their operand index.
    pub fn reads(&self) -> impl Iterator<Item = (usize, RegId)> + '_ {
        self.operands
            .iter()
            .enumerate()
            .filter_map(|(idx, op)| op.read_reg().map(|reg| (idx, reg)))
    }

    /// Registers written by this operation, with their operand index.
    pub fn writes(&self) -> impl Iterator<Item = (usize, RegId)> + '_ {
        self.operands
            .iter()
            .enumerate()
            .filter_map(|(idx, op)| op.written_reg().map(|reg| (idx, reg)))
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use itertools::Itertools;
        write!(
            f,
            "op{}(class {})[{}]",
            self.uid,
            self.class,
            self.operands.iter().map(ToString::to_string).join(", ")
        )
    }
}
