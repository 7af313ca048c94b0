use std::sync::Arc;

use crate::bundle::Bundle;
use crate::config::{ClassId, TargetConfig};
use crate::dep::DepGraph;
use crate::hazard::HazardRecognizer;
use crate::operation::{Operand, Operation};
use crate::scoreboard::ResourceScoreboard;

use super::{reemit, Cycle, Schedule, SchedulingContext};

/// A candidate loop for software pipelining: a preheader that defines the
/// trip count and a single-block body.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub preheader: Vec<Operation>,
    pub body: Vec<Operation>,
    /// Lower bound on the runtime trip count.
    pub min_trip_count: u32,
}

impl LoopInfo {
    /// The preheader operation defining the trip count, if the loop shape
    /// is recognized: it must be marked and carry an immediate.
    fn trip_count_op(&self) -> Option<usize> {
        self.preheader.iter().position(|op| {
            op.trip_count_def
                && op
                    .operands
                    .iter()
                    .any(|operand| matches!(operand, Operand::Immediate(_)))
        })
    }
}

/// Per-body-operation scheduling state across one pipelining attempt.
#[derive(Debug, Clone, Copy, Default)]
struct NodeInfo {
    scheduled: bool,
    cycle: i32,
    stage: u32,
    modulo_cycle: u32,
    earliest: i32,
    latest: i32,
}

/// A successful pipelining result: the rewritten preheader, the ramp-up and
/// ramp-down sequences, and the repeating steady state.
#[derive(Debug, Clone)]
pub struct ModuloSchedule {
    pub preheader: Vec<Operation>,
    pub prologue: Schedule,
    pub steady: Schedule,
    pub epilogue: Schedule,
    pub ii: u32,
    pub stages: u32,
    /// Applied to the trip count: `-(stages - 1)` iterations are peeled
    /// into prologue and epilogue.
    pub trip_count_adjust: i32,
}

/// Software pipeliner: proves a repeating steady state exists for a fixed
/// initiation interval and materializes the prologue/steady/epilogue split.
/// Every failure mode is a soft `None`; the caller falls back to the list
/// scheduler's linear result.
pub struct ModuloScheduler {
    config: Arc<TargetConfig>,
}

impl ModuloScheduler {
    #[must_use]
    pub fn new(config: Arc<TargetConfig>) -> Self {
        Self { config }
    }

    pub fn pipeline(
        &self,
        info: &LoopInfo,
        ctx: &mut SchedulingContext,
    ) -> Option<ModuloSchedule> {
        if info.body.is_empty() || info.min_trip_count < 2 {
            return None;
        }
        let trip_op = info.trip_count_op()?;

        let res_mii = self.res_mii(&info.body);
        let fallback_len = self.fallback_len(&info.body);
        log::debug!(
            "pipelining {} ops: ResMII {res_mii}, linear estimate {fallback_len} cycles",
            info.body.len()
        );

        for ii in res_mii..=res_mii + self.config.max_ii_delta {
            let n_copies = fallback_len.div_ceil(ii).max(2);
            if let Some((nodes, selected, stages)) = self.try_ii(info, ii, n_copies, ctx) {
                if stages > n_copies {
                    log::debug!("II {ii}: {stages} stages exceed {n_copies} copies");
                    continue;
                }
                if info.min_trip_count as i32 - (stages as i32 - 1) <= 0 {
                    log::debug!("II {ii}: {stages} stages leave no steady iterations");
                    continue;
                }
                log::debug!("II {ii} accepted with {stages} stages");
                // Only the accepted attempt counts against the packing
                // cutoff; discarded trials leave the context untouched.
                for _ in info.body.iter().filter(|op| !op.meta) {
                    ctx.record_scheduled();
                }
                return Some(self.materialize(info, trip_op, &nodes, &selected, ii, stages));
            }
        }
        None
    }

    /// Resource lower bound on the initiation interval: greedily pack the
    /// body's issue bits into rows, one row per cycle.
    fn res_mii(&self, body: &[Operation]) -> u32 {
        let mut rows: Vec<(u64, u32)> = vec![(0, 0); body.len()];
        let mut highest = 0;
        for op in body {
            if op.meta {
                continue;
            }
            let row = rows
                .iter()
                .position(|&(bits, count)| {
                    if count >= self.config.issue_limit {
                        return false;
                    }
                    match self.candidate_bits(op).find(|&cand| {
                        bits & cand == 0 && self.config.formats.format(bits | cand).is_some()
                    }) {
                        Some(_) => true,
                        // Unknown-slot operations monopolize a row.
                        None => self.config.class(op.class).slots.is_empty() && bits == 0,
                    }
                })
                .unwrap_or(rows.len() - 1);
            let bits = self
                .candidate_bits(op)
                .find(|&cand| {
                    rows[row].0 & cand == 0
                        && self.config.formats.format(rows[row].0 | cand).is_some()
                })
                .unwrap_or(!0);
            rows[row].0 |= bits;
            rows[row].1 += 1;
            highest = highest.max(row);
        }
        highest as u32 + 1
    }

    /// Issue-slot bitsets of an operation's concrete encodings.
    fn candidate_bits<'a>(&'a self, op: &Operation) -> impl Iterator<Item = u64> + 'a {
        let descriptor = self.config.class(op.class);
        let candidates: Vec<ClassId> = if descriptor.alternates.is_empty() {
            vec![op.class]
        } else {
            descriptor.alternates.clone()
        };
        candidates
            .into_iter()
            .map(|class| self.config.slot_set(class))
            .filter(|&bits| bits != 0)
    }

    /// Critical-path estimate of the unpipelined body length, used to size
    /// the unrolled window.
    fn fallback_len(&self, body: &[Operation]) -> u32 {
        let graph = DepGraph::build(body, &self.config);
        (0..body.len())
            .map(|idx| graph.depth(idx) + graph.exit_latency(idx).max(1))
            .max()
            .unwrap_or(1)
            .max(1) as u32
    }

    /// Attempt one initiation interval: bound each body operation with
    /// earliest/latest propagation across the iteration boundary, place the
    /// first copy greedily, replicate it at every `+II·k`, and verify the
    /// loop-carried latencies. Returns the node states, the selected
    /// encodings, and the stage count.
    fn try_ii(
        &self,
        info: &LoopInfo,
        ii: u32,
        n_copies: u32,
        ctx: &SchedulingContext,
    ) -> Option<(Vec<NodeInfo>, Vec<ClassId>, u32)> {
        let n = info.body.len();
        // Two concatenated copies expose the loop-carried edges as ordinary
        // register dependencies from copy 0 into copy 1.
        let mut unrolled = Vec::with_capacity(2 * n);
        for copy in 0..2 {
            for op in &info.body {
                let mut instance = op.clone();
                instance.uid = copy * n + instance.uid % n;
                unrolled.push(instance);
            }
        }
        let graph = DepGraph::build(&unrolled, &self.config);

        let horizon = (n_copies * ii) as i32;
        let mut nodes = vec![
            NodeInfo {
                latest: horizon - 1,
                ..NodeInfo::default()
            };
            n
        ];

        // Bounded relaxation of the earliest/latest windows. A window still
        // tightening after `n + 1` rounds means a recurrence needs more than
        // II cycles per iteration: infeasible at this II.
        for round in 0..=n {
            let mut changed = false;
            for idx in 0..n {
                for dep in graph.succs(idx) {
                    let (succ, shift) = if dep.other < n {
                        (dep.other, 0)
                    } else {
                        (dep.other - n, ii as i32)
                    };
                    let bound = nodes[idx].earliest + dep.latency - shift;
                    if bound > nodes[succ].earliest {
                        nodes[succ].earliest = bound;
                        changed = true;
                    }
                    let back = nodes[succ].latest - dep.latency + shift;
                    if back < nodes[idx].latest {
                        nodes[idx].latest = back;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
            if round == n {
                return None;
            }
        }
        if nodes.iter().any(|node| node.earliest > node.latest) {
            return None;
        }

        // Dedicated scoreboard covering every replica (latest start plus
        // all copies) and the pipeline tail; all offsets used are
        // non-negative.
        let mut scoreboard = ResourceScoreboard::new(
            (2 * horizon + self.config.conflict_horizon() as i32) as usize,
        );
        let hazard = HazardRecognizer::new(Arc::clone(&self.config), ctx);
        let mut selected = vec![0; n];

        for idx in 0..n {
            let op = &info.body[idx];
            if op.meta {
                nodes[idx].scheduled = true;
                continue;
            }
            let mut earliest = nodes[idx].earliest;
            for dep in graph.preds(idx) {
                if dep.other < n && nodes[dep.other].scheduled {
                    earliest = earliest.max(nodes[dep.other].cycle + dep.latency);
                }
            }
            let window_end = (earliest + ii as i32 - 1).min(nodes[idx].latest);
            let mut placed = false;
            'cycles: for cycle in earliest..=window_end {
                for class in self.candidates(op) {
                    let free = (0..n_copies).all(|copy| {
                        !hazard.class_conflict(
                            &scoreboard,
                            class,
                            cycle + (copy * ii) as i32,
                        )
                    });
                    if free {
                        for copy in 0..n_copies {
                            hazard.emit_class(&mut scoreboard, class, cycle + (copy * ii) as i32);
                        }
                        nodes[idx].cycle = cycle;
                        nodes[idx].scheduled = true;
                        selected[idx] = class;
                        placed = true;
                        break 'cycles;
                    }
                }
            }
            if !placed {
                log::trace!("II {ii}: no slot for {op} in [{earliest}, {window_end}]");
                return None;
            }
        }

        // Loop-carried latencies must hold between adjacent copies.
        for idx in 0..n {
            for dep in graph.succs(idx) {
                if dep.other >= n {
                    let succ = dep.other - n;
                    if nodes[succ].cycle + (ii as i32) < nodes[idx].cycle + dep.latency {
                        return None;
                    }
                }
            }
        }

        let mut stages = 1;
        for node in nodes.iter_mut().filter(|node| node.scheduled) {
            node.stage = node.cycle as u32 / ii;
            node.modulo_cycle = node.cycle as u32 % ii;
            stages = stages.max(node.stage + 1);
        }
        Some((nodes, selected, stages))
    }

    fn candidates(&self, op: &Operation) -> Vec<ClassId> {
        let descriptor = self.config.class(op.class);
        if descriptor.alternates.is_empty() {
            vec![op.class]
        } else {
            descriptor.alternates.clone()
        }
    }

    fn materialize(
        &self,
        info: &LoopInfo,
        trip_op: usize,
        nodes: &[NodeInfo],
        selected: &[ClassId],
        ii: u32,
        stages: u32,
    ) -> ModuloSchedule {
        let ramp = (stages - 1) * ii;
        let prologue = self.rows(info, nodes, selected, ramp, ii, |node, cycle| {
            node.stage <= cycle / ii
        });
        let steady = self.rows(info, nodes, selected, ii, ii, |_, _| true);
        let epilogue = self.rows(info, nodes, selected, ramp, ii, |node, cycle| {
            node.stage > cycle / ii
        });

        let trip_count_adjust = -(stages as i32 - 1);
        let mut preheader = info.preheader.clone();
        for operand in &mut preheader[trip_op].operands {
            if let Operand::Immediate(value) = operand {
                *value += i64::from(trip_count_adjust);
                break;
            }
        }

        ModuloSchedule {
            preheader,
            prologue,
            steady,
            epilogue,
            ii,
            stages,
            trip_count_adjust,
        }
    }

    /// Emit `len` cycles, filtering each body operation by its modulo cycle
    /// and the per-cycle stage predicate.
    fn rows(
        &self,
        info: &LoopInfo,
        nodes: &[NodeInfo],
        selected: &[ClassId],
        len: u32,
        ii: u32,
        include: impl Fn(&NodeInfo, u32) -> bool,
    ) -> Schedule {
        let mut schedule = Schedule::default();
        for cycle in 0..len {
            let mut bundle = Bundle::new(Arc::clone(&self.config));
            for (idx, op) in info.body.iter().enumerate() {
                let node = &nodes[idx];
                if !node.scheduled && !op.meta {
                    continue;
                }
                if node.modulo_cycle != cycle % ii || !include(node, cycle) {
                    continue;
                }
                if op.meta {
                    bundle.add_meta(idx);
                } else {
                    let added = bundle.add(idx, selected[idx]);
                    assert!(added, "modulo scoreboard admitted {op} but the bundle rejects it");
                }
            }
            if bundle.is_empty() {
                schedule.cycles.push(Cycle::idle(&self.config));
                continue;
            }
            let format = bundle.format().map(|format| format.name.clone());
            let mut ops: Vec<_> = bundle
                .members()
                .map(|(idx, class)| reemit(&info.body[idx], class))
                .collect();
            ops.extend(bundle.meta_members().iter().map(|&idx| info.body[idx].clone()));
            schedule.cycles.push(Cycle { ops, format });
        }
        schedule
    }
}
