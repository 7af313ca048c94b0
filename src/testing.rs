//! Shared target fixture for unit tests: a small exposed-pipeline machine
//! with two ALU slots, one memory slot and one control slot.

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::config::{ClassId, TargetConfig};
use crate::format::{PacketFormat, PacketFormatTable, SlotInfo};
use crate::itinerary::{ScheduleClass, Stage};
use crate::operation::{Operand, Operation};

pub const SLOT_ALU0: usize = 0;
pub const SLOT_ALU1: usize = 1;
pub const SLOT_MEM: usize = 2;
pub const SLOT_CTRL: usize = 3;

pub const NOP: ClassId = 0;
pub const ALU_A: ClassId = 1;
pub const ALU_B: ClassId = 2;
pub const ALU: ClassId = 3;
pub const MUL: ClassId = 4;
pub const LOAD: ClassId = 5;
pub const STORE: ClassId = 6;
pub const BRANCH: ClassId = 7;
pub const META: ClassId = 8;
pub const DIV: ClassId = 9;

const UNIT_ALU0: u64 = 1 << 0;
const UNIT_ALU1: u64 = 1 << 1;
const UNIT_MUL: u64 = 1 << 2;
const UNIT_AGU: u64 = 1 << 3;
const UNIT_DMEM: u64 = 1 << 4;
const UNIT_PC: u64 = 1 << 5;
const UNIT_DIV: u64 = 1 << 6;

static TARGET: Lazy<Arc<TargetConfig>> = Lazy::new(|| {
    let classes = vec![
        // NOP
        ScheduleClass {
            name: "nop".to_string(),
            stages: vec![Stage::required(1, 0, 1)],
            operand_cycles: vec![],
            forward_class: vec![],
            slots: vec![SLOT_ALU0],
            alternates: vec![],
        },
        // ALU_A: result written in cycle 1, sources read in cycle 0.
        ScheduleClass {
            name: "alu.a".to_string(),
            stages: vec![Stage::required(1, UNIT_ALU0, 1)],
            operand_cycles: vec![1, 0, 0],
            forward_class: vec![Some(1), Some(1), Some(1)],
            slots: vec![SLOT_ALU0],
            alternates: vec![],
        },
        // ALU_B: same shape on the second ALU pipe.
        ScheduleClass {
            name: "alu.b".to_string(),
            stages: vec![Stage::required(1, UNIT_ALU1, 1)],
            operand_cycles: vec![1, 0, 0],
            forward_class: vec![Some(1), Some(1), Some(1)],
            slots: vec![SLOT_ALU1],
            alternates: vec![],
        },
        // ALU: generic ALU op resolved to one of the pipes at schedule time.
        ScheduleClass {
            name: "alu".to_string(),
            stages: vec![],
            operand_cycles: vec![],
            forward_class: vec![],
            slots: vec![],
            alternates: vec![ALU_A, ALU_B],
        },
        // MUL: three cycle result latency, one issue cycle.
        ScheduleClass {
            name: "mul".to_string(),
            stages: vec![Stage::required(1, UNIT_MUL, 1)],
            operand_cycles: vec![3, 0, 0],
            forward_class: vec![],
            slots: vec![SLOT_ALU0],
            alternates: vec![],
        },
        // LOAD: address generation, then data memory one cycle later.
        ScheduleClass {
            name: "load".to_string(),
            stages: vec![
                Stage::required(1, UNIT_AGU, 1),
                Stage::required(1, UNIT_DMEM, 1),
            ],
            operand_cycles: vec![2, 0],
            forward_class: vec![],
            slots: vec![SLOT_MEM],
            alternates: vec![],
        },
        // STORE
        ScheduleClass {
            name: "store".to_string(),
            stages: vec![
                Stage::required(1, UNIT_AGU, 1),
                Stage::required(1, UNIT_DMEM, 1),
            ],
            operand_cycles: vec![0, 0],
            forward_class: vec![],
            slots: vec![SLOT_MEM],
            alternates: vec![],
        },
        // BRANCH
        ScheduleClass {
            name: "branch".to_string(),
            stages: vec![Stage::required(1, UNIT_PC, 1)],
            operand_cycles: vec![0],
            forward_class: vec![],
            slots: vec![SLOT_CTRL],
            alternates: vec![],
        },
        // META: bookkeeping pseudo op, takes no slot and no resources.
        ScheduleClass {
            name: "meta".to_string(),
            stages: vec![],
            operand_cycles: vec![],
            forward_class: vec![],
            slots: vec![],
            alternates: vec![],
        },
        // DIV: iterative divider. The result is ready after one cycle but
        // the unit stays busy for three more, past the result cycle.
        ScheduleClass {
            name: "div".to_string(),
            stages: vec![Stage::required(4, UNIT_DIV, 4)],
            operand_cycles: vec![1, 0, 0],
            forward_class: vec![],
            slots: vec![SLOT_ALU1],
            alternates: vec![],
        },
    ];

    let slot_table = vec![
        SlotInfo {
            name: "alu0".to_string(),
            slots: 0b0001,
        },
        SlotInfo {
            name: "alu1".to_string(),
            slots: 0b0010,
        },
        SlotInfo {
            name: "mem".to_string(),
            slots: 0b0100,
        },
        SlotInfo {
            name: "ctrl".to_string(),
            slots: 0b1000,
        },
    ];

    let formats = PacketFormatTable::new(vec![
        PacketFormat {
            name: "alu".to_string(),
            slots: 0b0011,
            size_bytes: 4,
        },
        PacketFormat {
            name: "alu_mem".to_string(),
            slots: 0b0111,
            size_bytes: 8,
        },
        PacketFormat {
            name: "full".to_string(),
            slots: 0b1111,
            size_bytes: 16,
        },
    ]);

    let config = TargetConfig {
        classes,
        slot_table,
        formats,
        nop_class: NOP,
        issue_limit: 6,
        bottom_up_cycles: u32::MAX,
        bottom_up_delta: 128,
        negative_latency_lower_bound: -10,
        max_ii_delta: 8,
        max_parallel_ops: None,
        pre_alloc_fu_depth: 16,
        scoreboard_depth: 16,
        reserved_delay_slots: 0,
    };
    config.validate().unwrap();
    Arc::new(config)
});

pub fn target() -> Arc<TargetConfig> {
    Arc::clone(&TARGET)
}

/// Route log output into the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An operation without register operands, for resource-only tests.
pub fn op(uid: usize, class: ClassId) -> Operation {
    Operation::new(uid, class, vec![])
}

/// A three-address register operation `def = lhs op rhs`.
pub fn reg_op(uid: usize, class: ClassId, def: u32, lhs: u32, rhs: u32) -> Operation {
    Operation::new(
        uid,
        class,
        vec![
            Operand::Register { reg: def, def: true },
            Operand::Register {
                reg: lhs,
                def: false,
            },
            Operand::Register {
                reg: rhs,
                def: false,
            },
        ],
    )
}
