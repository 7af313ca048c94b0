use smallvec::SmallVec;

use crate::config::{ClassId, TargetConfig};
use crate::operation::{Operation, RegId};

/// Dependency kind between two operations on the same register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DepKind {
    /// Read after write.
    Data,
    /// Write after read.
    Anti,
    /// Write after write.
    Output,
}

/// One edge of the dependency graph. `latency` is the minimum issue-cycle
/// distance between the two operations and may be negative: a consumer can
/// legally issue before its producer when the producer writes late in the
/// pipeline and the consumer reads late, or when a write lands after a
/// much-earlier read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dep {
    /// Arena index of the other endpoint.
    pub other: usize,
    pub kind: DepKind,
    pub latency: i32,
}

/// Register dependency graph over one region, arena-indexed in program
/// order. Edges always point from an earlier to a later operation, so
/// program order is a topological order.
#[derive(Debug, Default)]
pub struct DepGraph {
    succs: Vec<SmallVec<[Dep; 4]>>,
    preds: Vec<SmallVec<[Dep; 4]>>,
    /// Longest latency chain from each operation to the region exit.
    heights: Vec<i32>,
    /// Longest latency chain from the region entry to each operation.
    depths: Vec<i32>,
    /// Cycles each operation needs after issue before control may leave
    /// the region.
    exit_latencies: Vec<i32>,
}

/// The class whose itinerary data stands in for latency purposes. Classes
/// that only carry alternates delegate to their first alternate; all
/// alternates of one class share operand timing.
fn latency_class(config: &TargetConfig, class: ClassId) -> ClassId {
    let descriptor = config.class(class);
    match descriptor.alternates.first() {
        Some(&alternate) if descriptor.stages.is_empty() => alternate,
        _ => class,
    }
}

/// Latency of a read-after-write pair. One cycle more than the distance
/// between the producing and consuming pipeline cycles, one cycle less when
/// a forwarding path connects the two operands.
fn data_latency(
    config: &TargetConfig,
    def: &Operation,
    def_idx: usize,
    user: &Operation,
    use_idx: usize,
) -> i32 {
    let def_class = config.class(latency_class(config, def.class));
    let use_class = config.class(latency_class(config, user.class));
    let mut latency =
        def_class.operand_cycle(def_idx) as i32 - use_class.operand_cycle(use_idx) as i32 + 1;
    if let (Some(produce), Some(consume)) = (
        def_class.forward_class(def_idx),
        use_class.forward_class(use_idx),
    ) {
        if produce == consume {
            latency -= 1;
        }
    }
    latency
}

fn output_latency(
    config: &TargetConfig,
    first: &Operation,
    first_idx: usize,
    second: &Operation,
    second_idx: usize,
) -> i32 {
    let first_class = config.class(latency_class(config, first.class));
    let second_class = config.class(latency_class(config, second.class));
    first_class.operand_cycle(first_idx) as i32 - second_class.operand_cycle(second_idx) as i32 + 1
}

/// Latency of a write-after-read pair: the write must land after the read.
/// Often zero or negative on an exposed pipeline.
fn anti_latency(
    config: &TargetConfig,
    user: &Operation,
    use_idx: usize,
    def: &Operation,
    def_idx: usize,
) -> i32 {
    let use_class = config.class(latency_class(config, user.class));
    let def_class = config.class(latency_class(config, def.class));
    use_class.operand_cycle(use_idx) as i32 - def_class.operand_cycle(def_idx) as i32 + 1
}

impl DepGraph {
    /// Build the graph for `ops` in program order.
    #[must_use]
    pub fn build(ops: &[Operation], config: &TargetConfig) -> Self {
        let mut graph = Self {
            succs: vec![SmallVec::new(); ops.len()],
            preds: vec![SmallVec::new(); ops.len()],
            heights: vec![0; ops.len()],
            depths: vec![0; ops.len()],
            exit_latencies: vec![0; ops.len()],
        };

        // Last writer and the readers since that write, per register.
        let mut last_def: std::collections::HashMap<RegId, (usize, usize)> =
            std::collections::HashMap::new();
        let mut last_uses: std::collections::HashMap<RegId, Vec<(usize, usize)>> =
            std::collections::HashMap::new();

        for (idx, op) in ops.iter().enumerate() {
            for (use_idx, reg) in op.reads() {
                if let Some(&(def_op, def_idx)) = last_def.get(&reg) {
                    let latency = data_latency(config, &ops[def_op], def_idx, op, use_idx);
                    graph.edge(def_op, idx, DepKind::Data, latency);
                }
                last_uses.entry(reg).or_default().push((idx, use_idx));
            }
            for (def_idx, reg) in op.writes() {
                for &(use_op, use_idx) in last_uses.get(&reg).into_iter().flatten() {
                    if use_op != idx {
                        let latency = anti_latency(config, &ops[use_op], use_idx, op, def_idx);
                        graph.edge(use_op, idx, DepKind::Anti, latency);
                    }
                }
                if let Some(&(prev_op, prev_idx)) = last_def.get(&reg) {
                    let latency = output_latency(config, &ops[prev_op], prev_idx, op, def_idx);
                    graph.edge(prev_op, idx, DepKind::Output, latency);
                }
                last_def.insert(reg, (idx, def_idx));
                last_uses.remove(&reg);
            }
        }

        for (idx, op) in ops.iter().enumerate() {
            let class = config.class(latency_class(config, op.class));
            graph.exit_latencies[idx] = class.result_cycle() as i32;
        }
        graph.compute_chains();
        graph
    }

    fn edge(&mut self, from: usize, to: usize, kind: DepKind, latency: i32) {
        debug_assert!(from < to, "dependency edges follow program order");
        self.succs[from].push(Dep {
            other: to,
            kind,
            latency,
        });
        self.preds[to].push(Dep {
            other: from,
            kind,
            latency,
        });
    }

    /// Heights in reverse program order, depths in program order. Program
    /// order is topological, so one pass each suffices.
    fn compute_chains(&mut self) {
        for idx in (0..self.succs.len()).rev() {
            let mut height = self.exit_latencies[idx];
            for dep in &self.succs[idx] {
                height = height.max(dep.latency + self.heights[dep.other]);
            }
            self.heights[idx] = height;
        }
        for idx in 0..self.preds.len() {
            let mut depth = 0;
            for dep in &self.preds[idx] {
                depth = depth.max(self.depths[dep.other] + dep.latency);
            }
            self.depths[idx] = depth;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.succs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.succs.is_empty()
    }

    #[must_use]
    pub fn succs(&self, idx: usize) -> &[Dep] {
        &self.succs[idx]
    }

    #[must_use]
    pub fn preds(&self, idx: usize) -> &[Dep] {
        &self.preds[idx]
    }

    /// Longest remaining latency chain below `idx`, including its own exit
    /// latency.
    #[must_use]
    pub fn height(&self, idx: usize) -> i32 {
        self.heights[idx]
    }

    #[must_use]
    pub fn depth(&self, idx: usize) -> i32 {
        self.depths[idx]
    }

    #[must_use]
    pub fn exit_latency(&self, idx: usize) -> i32 {
        self.exit_latencies[idx]
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions_sorted::assert_eq;

    use super::{DepGraph, DepKind};
    use crate::testing;

    #[test]
    fn forwarding_shortens_raw_latency() {
        let config = testing::target();
        // r1 = r2 + r3 ; r4 = r1 + r1 : both ALU with matching forwarding.
        let ops = vec![
            testing::reg_op(0, testing::ALU_A, 1, 2, 3),
            testing::reg_op(1, testing::ALU_A, 4, 1, 1),
        ];
        let graph = DepGraph::build(&ops, &config);
        let deps = graph.succs(0);
        assert_eq!(deps.len(), 2);
        assert!(deps
            .iter()
            .all(|d| d.kind == DepKind::Data && d.latency == 1));
    }

    #[test]
    fn multiplier_latency_is_not_forwarded() {
        let config = testing::target();
        // r1 = r2 * r3 (writes in cycle 3) ; r4 = r1 + r5.
        let ops = vec![
            testing::reg_op(0, testing::MUL, 1, 2, 3),
            testing::reg_op(1, testing::ALU_A, 4, 1, 5),
        ];
        let graph = DepGraph::build(&ops, &config);
        assert_eq!(graph.succs(0).len(), 1);
        assert_eq!(graph.succs(0)[0].latency, 4);
        assert_eq!(graph.succs(0)[0].kind, DepKind::Data);
    }

    #[test]
    fn anti_dependency_can_be_negative() {
        let config = testing::target();
        // r4 = r1 + r2 reads r1 in cycle 0 ; r1 = r5 * r6 writes it in
        // cycle 3: the multiply may start up to two cycles earlier.
        let ops = vec![
            testing::reg_op(0, testing::ALU_A, 4, 1, 2),
            testing::reg_op(1, testing::MUL, 1, 5, 6),
        ];
        let graph = DepGraph::build(&ops, &config);
        let anti: Vec<_> = graph
            .succs(0)
            .iter()
            .filter(|d| d.kind == DepKind::Anti)
            .collect();
        assert_eq!(anti.len(), 1);
        assert_eq!(anti[0].latency, -2);
    }

    #[test]
    fn output_dependency_between_writers() {
        let config = testing::target();
        let ops = vec![
            testing::reg_op(0, testing::MUL, 1, 2, 3),
            testing::reg_op(1, testing::MUL, 1, 4, 5),
        ];
        let graph = DepGraph::build(&ops, &config);
        let output: Vec<_> = graph
            .succs(0)
            .iter()
            .filter(|d| d.kind == DepKind::Output)
            .collect();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].latency, 1);
    }

    #[test]
    fn alternate_classes_use_alternate_timing() {
        let config = testing::target();
        // Generic ALU ops delegate latency lookup to their first alternate.
        let ops = vec![
            testing::reg_op(0, testing::ALU, 1, 2, 3),
            testing::reg_op(1, testing::ALU, 4, 1, 1),
        ];
        let graph = DepGraph::build(&ops, &config);
        assert!(graph.succs(0).iter().all(|d| d.latency == 1));
    }

    #[test]
    fn heights_accumulate_chain_latency() {
        let config = testing::target();
        // mul feeds an add feeds an add.
        let ops = vec![
            testing::reg_op(0, testing::MUL, 1, 8, 9),
            testing::reg_op(1, testing::ALU_A, 2, 1, 1),
            testing::reg_op(2, testing::ALU_A, 3, 2, 2),
        ];
        let graph = DepGraph::build(&ops, &config);
        // Last op still needs its result cycle before exit.
        assert_eq!(graph.height(2), 1);
        assert_eq!(graph.height(1), 2);
        // 4 cycles to the add, then its height.
        assert_eq!(graph.height(0), 6);
        assert_eq!(graph.depth(0), 0);
        assert_eq!(graph.depth(1), 4);
        assert_eq!(graph.depth(2), 5);
    }

    #[test]
    fn independent_ops_have_no_edges() {
        let config = testing::target();
        let ops = vec![
            testing::reg_op(0, testing::ALU_A, 1, 2, 3),
            testing::reg_op(1, testing::ALU_B, 4, 5, 6),
        ];
        let graph = DepGraph::build(&ops, &config);
        assert!(graph.succs(0).is_empty());
        assert!(graph.preds(1).is_empty());
    }
}
