use std::cmp::Reverse;
use std::sync::Arc;

use crate::bundle::Bundle;
use crate::config::TargetConfig;
use crate::dep::DepGraph;
use crate::hazard::{HazardKind, HazardRecognizer};

use super::{reemit, Cycle, Region, Schedule, SchedulingContext};

/// How far to believe a known successor schedule when replaying it into the
/// bottom zone's lookahead cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreboardTrust {
    /// The successor starts exactly one cycle after this region's last.
    Absolute,
    /// The boundary may shift by one alignment cycle: book the successor's
    /// resources at both candidate positions.
    AccountForAlign,
}

/// What is known about the block executing after this region.
pub enum SuccessorInfo<'a> {
    /// Nothing; every lookahead cycle is treated as fully occupied.
    Unknown,
    /// A finished schedule, replayed into the lookahead.
    Known {
        schedule: &'a Schedule,
        trust: ScoreboardTrust,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Top(i32),
    Bottom(i32),
}

/// Two-zone greedy scheduler for straight-line regions.
///
/// The bottom zone commits backward from the region end (which places
/// delay-slot branches and catches conflicts with successor blocks), the top
/// zone forward from the region start. Each zone drives its own hazard
/// recognizer; the two partial schedules are concatenated with just enough
/// idle cycles between them to clear cross-zone latencies and resource
/// conflicts.
pub struct ListScheduler {
    config: Arc<TargetConfig>,
}

impl ListScheduler {
    #[must_use]
    pub fn new(config: Arc<TargetConfig>) -> Self {
        Self { config }
    }

    pub fn schedule(
        &self,
        region: &Region,
        successor: SuccessorInfo<'_>,
        ctx: &mut SchedulingContext,
    ) -> Schedule {
        let ops = &region.ops;
        if ops.is_empty() {
            return Schedule::default();
        }
        let graph = DepGraph::build(ops, &self.config);
        let branch = region.delay_slot_op();
        let mut placement: Vec<Option<Placement>> = vec![None; ops.len()];
        let mut remaining = ops.len();

        // Generous bound on zone length; hitting it means the scheduler is
        // stuck, which is a driver or target-description bug.
        let fuel = 4 * (ops.len() as i32
            + self.config.conflict_horizon() as i32
            + self.config.scoreboard_depth as i32)
            + ops.iter().map(|op| op.delay_slots as i32).sum::<i32>();

        // Bottom zone: cycle 0 is the region's last cycle, counting upward.
        let mut bot = HazardRecognizer::bottom_up(Arc::clone(&self.config), ctx);
        self.seed_successor(&mut bot, &successor);
        let mut bot_head: i32 = 0;
        let mut bot_len: i32 = 0;
        if self.config.bottom_up_cycles > 0 || branch.is_some() {
            if branch.is_some() && self.config.reserved_delay_slots > 0 {
                bot.set_reserved_cycles(self.config.reserved_delay_slots);
            }
            loop {
                while let Some((idx, delta)) =
                    self.pick_bottom(region, &graph, &placement, &bot, bot_head, branch)
                {
                    bot.commit(&ops[idx], delta, ctx);
                    let cycle = bot_head + delta;
                    log::trace!("bottom zone: {} at cycle {cycle}", ops[idx]);
                    placement[idx] = Some(Placement::Bottom(cycle));
                    bot_len = bot_len.max(cycle + 1);
                    remaining -= 1;
                }
                let branch_pending = branch.is_some_and(|b| placement[b].is_none());
                if remaining == 0
                    || (!branch_pending
                        && (bot_head + 1) as u32 >= self.config.bottom_up_cycles)
                {
                    break;
                }
                assert!(bot_head < fuel, "bottom zone stalled at cycle {bot_head}");
                bot.advance();
                bot_head += 1;
            }
        }
        log::debug!(
            "bottom zone done: {bot_len} cycles, {} ops left for the top zone",
            remaining
        );

        // Top zone: forward from the region start, commits at the head only.
        let mut top = HazardRecognizer::new(Arc::clone(&self.config), ctx);
        let mut top_head: i32 = 0;
        let mut top_len: i32 = 0;
        if remaining > 0 {
            loop {
                while let Some(idx) = self.pick_top(region, &graph, &placement, &top, top_head)
                {
                    top.commit(&ops[idx], 0, ctx);
                    log::trace!("top zone: {} at cycle {top_head}", ops[idx]);
                    placement[idx] = Some(Placement::Top(top_head));
                    top_len = top_head + 1;
                    remaining -= 1;
                }
                if remaining == 0 {
                    break;
                }
                assert!(top_head < fuel, "top zone stalled at cycle {top_head}");
                top.advance();
                top_head += 1;
            }
        }

        // Concatenation: find the smallest idle gap between the zones that
        // satisfies cross-zone latencies, exit latencies of top-zone
        // operations, and the resource seam.
        let mut gap: i32 = 0;
        for (idx, place) in placement.iter().copied().enumerate() {
            let Some(Placement::Top(cycle)) = place else {
                continue;
            };
            gap = gap.max(cycle + graph.exit_latency(idx) - top_len - bot_len);
            for dep in graph.succs(idx) {
                if let Some(Placement::Bottom(succ_cycle)) = placement[dep.other] {
                    gap = gap.max(dep.latency + cycle - top_len - bot_len + 1 + succ_cycle);
                }
            }
        }
        let seam_bound = top.scoreboard().depth() + bot.scoreboard().depth();
        loop {
            let align = top_len + gap + bot_len - 1 - bot_head - top_head;
            if !top.conflict_mirrored(&bot, align) {
                break;
            }
            gap += 1;
            assert!(gap <= seam_bound, "zone seam failed to clear");
        }
        log::debug!("concatenating zones: top {top_len} + gap {gap} + bottom {bot_len}");

        self.materialize(region, &placement, &top, &bot, top_len, gap, bot_len)
    }

    /// Bottom-zone ready cycle: every scheduled successor's cycle plus the
    /// edge latency, the operation's own exit latency, and for the region's
    /// branch its delay-slot count.
    fn earliest_bottom(
        &self,
        region: &Region,
        graph: &DepGraph,
        placement: &[Option<Placement>],
        idx: usize,
        branch: Option<usize>,
    ) -> i32 {
        let mut earliest = (graph.exit_latency(idx) - 1).max(0);
        if branch == Some(idx) {
            earliest = earliest.max(region.ops[idx].delay_slots as i32);
        }
        for dep in graph.succs(idx) {
            if let Some(Placement::Bottom(cycle)) = placement[dep.other] {
                earliest = earliest.max(cycle + dep.latency);
            }
        }
        earliest
    }

    /// Pick the next bottom-zone commit: among operations whose successors
    /// are all scheduled, prefer the delay-slot branch, then the longest
    /// chain above, then the soonest ready cycle, then reverse program
    /// order. Accept the lowest conflict-free cycle in the search window.
    fn pick_bottom(
        &self,
        region: &Region,
        graph: &DepGraph,
        placement: &[Option<Placement>],
        bot: &HazardRecognizer,
        head: i32,
        branch: Option<usize>,
    ) -> Option<(usize, i32)> {
        let ops = &region.ops;
        let earliest: Vec<i32> = (0..ops.len())
            .map(|idx| self.earliest_bottom(region, graph, placement, idx, branch))
            .collect();
        let mut candidates: Vec<usize> = (0..ops.len())
            .filter(|&idx| placement[idx].is_none())
            .filter(|&idx| {
                graph
                    .succs(idx)
                    .iter()
                    .all(|dep| placement[dep.other].is_some())
            })
            .collect();
        candidates.sort_by_key(|&idx| {
            (
                Reverse(branch == Some(idx)),
                Reverse(graph.depth(idx)),
                earliest[idx],
                Reverse(idx),
            )
        });
        for idx in candidates {
            if earliest[idx] > head {
                continue;
            }
            // Bypass latencies allow commits below the nominal ready cycle,
            // bounded by the target's negative-latency floor, the bottom-up
            // search window, and the scoreboard's commit window.
            let low = (earliest[idx] - head)
                .max(self.config.negative_latency_lower_bound)
                .max(-(self.config.bottom_up_delta as i32))
                .max(-bot.scoreboard().depth())
                .max(-head);
            for delta in low..=0 {
                if bot.query_hazard(&ops[idx], delta) == HazardKind::NoHazard {
                    return Some((idx, delta));
                }
            }
        }
        None
    }

    fn pick_top(
        &self,
        region: &Region,
        graph: &DepGraph,
        placement: &[Option<Placement>],
        top: &HazardRecognizer,
        head: i32,
    ) -> Option<usize> {
        let ops = &region.ops;
        let earliest: Vec<i32> = (0..ops.len())
            .map(|idx| {
                graph
                    .preds(idx)
                    .iter()
                    .filter_map(|dep| match placement[dep.other] {
                        Some(Placement::Top(cycle)) => Some(cycle + dep.latency),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(0)
                    .max(0)
            })
            .collect();
        let mut candidates: Vec<usize> = (0..ops.len())
            .filter(|&idx| placement[idx].is_none())
            .filter(|&idx| {
                graph
                    .preds(idx)
                    .iter()
                    .all(|dep| placement[dep.other].is_some())
            })
            .filter(|&idx| earliest[idx] <= head)
            .collect();
        candidates.sort_by_key(|&idx| (Reverse(graph.height(idx)), earliest[idx], idx));
        candidates
            .into_iter()
            .find(|&idx| top.query_hazard(&ops[idx], 0) == HazardKind::NoHazard)
    }

    fn seed_successor(&self, bot: &mut HazardRecognizer, successor: &SuccessorInfo<'_>) {
        let lookahead = self.config.conflict_horizon().max(1) as i32;
        match successor {
            SuccessorInfo::Unknown => {
                for cycle in 0..lookahead {
                    bot.block_cycle(-1 - cycle);
                }
            }
            SuccessorInfo::Known { schedule, trust } => {
                for (cycle, bundle) in schedule
                    .cycles
                    .iter()
                    .enumerate()
                    .take(lookahead as usize)
                {
                    if bundle.is_idle(&self.config) {
                        continue;
                    }
                    for op in &bundle.ops {
                        if op.meta {
                            continue;
                        }
                        let delta = -1 - cycle as i32;
                        bot.emit_self(op.class, delta);
                        if *trust == ScoreboardTrust::AccountForAlign {
                            bot.emit_self(op.class, delta + 1);
                        }
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn materialize(
        &self,
        region: &Region,
        placement: &[Option<Placement>],
        top: &HazardRecognizer,
        bot: &HazardRecognizer,
        top_len: i32,
        gap: i32,
        bot_len: i32,
    ) -> Schedule {
        let ops = &region.ops;
        let total = (top_len + gap + bot_len) as usize;
        let mut by_cycle: Vec<Vec<usize>> = vec![Vec::new(); total];
        for (idx, place) in placement.iter().copied().enumerate() {
            let exec = match place.expect("every operation is placed") {
                Placement::Top(cycle) => cycle as usize,
                Placement::Bottom(cycle) => (top_len + gap + bot_len - 1 - cycle) as usize,
            };
            by_cycle[exec].push(idx);
        }

        let mut schedule = Schedule::default();
        for indices in &mut by_cycle {
            if indices.is_empty() {
                schedule.cycles.push(Cycle::idle(&self.config));
                continue;
            }
            indices.sort_unstable();
            let mut bundle = Bundle::new(Arc::clone(&self.config));
            for &idx in indices.iter() {
                let op = &ops[idx];
                if op.meta {
                    bundle.add_meta(idx);
                    continue;
                }
                let selected = match placement[idx] {
                    Some(Placement::Top(_)) => top.selected_class(op),
                    _ => bot.selected_class(op),
                };
                let added = bundle.add(idx, selected);
                assert!(added, "scoreboard admitted {op} but the bundle rejects it");
            }
            let format = bundle.format().map(|format| format.name.clone());
            let mut emitted: Vec<_> = bundle
                .members()
                .map(|(idx, selected)| reemit(&ops[idx], selected))
                .collect();
            emitted.extend(bundle.meta_members().iter().map(|&idx| ops[idx].clone()));
            schedule.cycles.push(Cycle {
                ops: emitted,
                format,
            });
        }
        schedule
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ListScheduler, ScoreboardTrust, SuccessorInfo};
    use crate::scheduler::{Region, Schedule, SchedulingContext};
    use crate::testing;

    fn run(region: Region) -> Schedule {
        run_with(testing::target(), region, SuccessorInfo::Unknown)
    }

    fn run_with(
        config: Arc<crate::config::TargetConfig>,
        region: Region,
        successor: SuccessorInfo<'_>,
    ) -> Schedule {
        testing::init_logging();
        let mut ctx = SchedulingContext::new();
        ListScheduler::new(config).schedule(&region, successor, &mut ctx)
    }

    fn empty_successor() -> Schedule {
        Schedule::default()
    }

    #[test]
    fn packs_independent_ops_to_issue_limit() {
        let mut config = (*testing::target()).clone();
        config.issue_limit = 2;
        let region = Region::new(vec![
            testing::reg_op(0, testing::ALU, 1, 10, 11),
            testing::reg_op(1, testing::ALU, 2, 10, 11),
            testing::reg_op(2, testing::ALU, 3, 10, 11),
            testing::reg_op(3, testing::ALU, 4, 10, 11),
        ]);
        let succ = empty_successor();
        let schedule = run_with(
            Arc::new(config),
            region,
            SuccessorInfo::Known {
                schedule: &succ,
                trust: ScoreboardTrust::Absolute,
            },
        );
        assert_eq!(schedule.len(), 2);
        for cycle in &schedule.cycles {
            assert_eq!(cycle.ops.len(), 2);
        }
    }

    #[test]
    fn chain_latency_inserts_idle_cycles() {
        let config = testing::target();
        let succ = empty_successor();
        let region = Region::new(vec![
            testing::reg_op(0, testing::MUL, 1, 8, 9),
            testing::reg_op(1, testing::ALU_A, 2, 1, 1),
        ]);
        let schedule = run_with(
            config.clone(),
            region,
            SuccessorInfo::Known {
                schedule: &succ,
                trust: ScoreboardTrust::Absolute,
            },
        );
        // mul, three idle cycles for its latency, then the add.
        assert_eq!(schedule.len(), 5);
        assert_eq!(schedule.cycles[0].ops[0].class, testing::MUL);
        assert!(schedule.cycles[1].is_idle(&config));
        assert!(schedule.cycles[3].is_idle(&config));
        assert_eq!(schedule.cycles[4].ops[0].class, testing::ALU_A);
    }

    #[test]
    fn forwarding_allows_back_to_back_issue() {
        let succ = empty_successor();
        let region = Region::new(vec![
            testing::reg_op(0, testing::ALU_A, 1, 8, 9),
            testing::reg_op(1, testing::ALU_A, 2, 1, 1),
        ]);
        let schedule = run_with(
            testing::target(),
            region,
            SuccessorInfo::Known {
                schedule: &succ,
                trust: ScoreboardTrust::Absolute,
            },
        );
        assert_eq!(schedule.len(), 2);
    }

    #[test]
    fn delay_slot_branch_is_padded() {
        let config = testing::target();
        let succ = empty_successor();
        let region = Region::new(vec![
            testing::reg_op(0, testing::ALU_A, 1, 10, 11),
            testing::reg_op(1, testing::ALU_B, 2, 10, 11),
            testing::op(2, testing::BRANCH).with_delay_slots(3),
        ]);
        let schedule = run_with(
            config.clone(),
            region,
            SuccessorInfo::Known {
                schedule: &succ,
                trust: ScoreboardTrust::Absolute,
            },
        );
        // The branch issues first and its three delay slots follow it; the
        // independent ALU ops fill the last delay slot.
        assert_eq!(schedule.len(), 4);
        assert_eq!(schedule.cycles[0].ops[0].class, testing::BRANCH);
        assert!(schedule.cycles[1].is_idle(&config));
        assert!(schedule.cycles[2].is_idle(&config));
        assert_eq!(schedule.cycles[3].ops.len(), 2);
    }

    #[test]
    fn shallow_scoreboard_clamps_the_search_window() {
        // A scoreboard shallower than the negative-latency floor must bound
        // the bottom-zone search to its commit window instead of accepting
        // an offset it cannot represent. The long reserved delay-slot
        // window drives the head far past the ALU ops' ready cycles first.
        let mut config = (*testing::target()).clone();
        config.scoreboard_depth = 1;
        config.reserved_delay_slots = 10;
        let succ = empty_successor();
        let schedule = run_with(
            Arc::new(config),
            Region::new(vec![
                testing::reg_op(0, testing::ALU_A, 1, 10, 11),
                testing::reg_op(1, testing::ALU_B, 2, 10, 11),
                testing::op(2, testing::BRANCH).with_delay_slots(10),
            ]),
            SuccessorInfo::Known {
                schedule: &succ,
                trust: ScoreboardTrust::Absolute,
            },
        );
        assert_eq!(schedule.len(), 11);
        assert_eq!(schedule.cycles[0].ops[0].class, testing::BRANCH);
        // The ALU ops land at the deepest offset the scoreboard covers.
        assert_eq!(schedule.cycles[4].ops.len(), 2);
    }

    #[test]
    fn negative_latency_bound_controls_compaction() {
        // The ALU reads r1 early; the MUL overwrites it late. The anti
        // latency is -2, so the reader may execute after the writer when
        // the floor allows it.
        let ops = || {
            vec![
                testing::reg_op(0, testing::ALU_A, 4, 1, 2),
                testing::reg_op(1, testing::MUL, 1, 5, 6),
            ]
        };
        let succ = empty_successor();
        let relaxed = run_with(
            testing::target(),
            Region::new(ops()),
            SuccessorInfo::Known {
                schedule: &succ,
                trust: ScoreboardTrust::Absolute,
            },
        );
        assert_eq!(relaxed.len(), 3);

        let mut config = (*testing::target()).clone();
        config.negative_latency_lower_bound = 0;
        let floored = run_with(
            Arc::new(config),
            Region::new(ops()),
            SuccessorInfo::Known {
                schedule: &succ,
                trust: ScoreboardTrust::Absolute,
            },
        );
        assert_eq!(floored.len(), 4);
    }

    #[test]
    fn unknown_successor_blocks_the_lookahead() {
        // The divider stays busy past the region end; with an unknown
        // successor those cycles are treated as occupied.
        let region = || Region::new(vec![testing::reg_op(0, testing::DIV, 1, 2, 3)]);
        let pessimistic = run(region());
        assert_eq!(pessimistic.len(), 4);

        let succ = empty_successor();
        let exact = run_with(
            testing::target(),
            region(),
            SuccessorInfo::Known {
                schedule: &succ,
                trust: ScoreboardTrust::Absolute,
            },
        );
        assert_eq!(exact.len(), 1);
    }

    #[test]
    fn known_successor_is_replayed_into_the_lookahead() {
        let config = testing::target();
        let succ = empty_successor();
        // First produce a successor block that starts with a divide.
        let successor = run_with(
            config.clone(),
            Region::new(vec![testing::reg_op(9, testing::DIV, 7, 8, 9)]),
            SuccessorInfo::Known {
                schedule: &succ,
                trust: ScoreboardTrust::Absolute,
            },
        );
        assert_eq!(successor.len(), 1);

        let region = || Region::new(vec![testing::reg_op(0, testing::DIV, 1, 2, 3)]);
        let exact = run_with(
            config.clone(),
            region(),
            SuccessorInfo::Known {
                schedule: &successor,
                trust: ScoreboardTrust::Absolute,
            },
        );
        // Our divider must drain before the successor's starts.
        assert_eq!(exact.len(), 4);

        let aligned = run_with(
            config,
            region(),
            SuccessorInfo::Known {
                schedule: &successor,
                trust: ScoreboardTrust::AccountForAlign,
            },
        );
        // One more cycle of slack for the unknown boundary alignment.
        assert_eq!(aligned.len(), 5);
    }

    #[test]
    fn zones_concatenate_with_latency_gap() {
        let mut config = (*testing::target()).clone();
        // Force the dependent consumer into the bottom zone and the
        // producer into the top zone.
        config.bottom_up_cycles = 1;
        let succ = empty_successor();
        let schedule = run_with(
            Arc::new(config),
            Region::new(vec![
                testing::reg_op(0, testing::MUL, 1, 8, 9),
                testing::reg_op(1, testing::ALU_A, 2, 1, 1),
            ]),
            SuccessorInfo::Known {
                schedule: &succ,
                trust: ScoreboardTrust::Absolute,
            },
        );
        assert_eq!(schedule.len(), 5);
        assert_eq!(schedule.cycles[0].ops[0].class, testing::MUL);
        assert_eq!(schedule.cycles[4].ops[0].class, testing::ALU_A);
    }

    #[test]
    fn alternates_fan_out_over_issue_slots() {
        let succ = empty_successor();
        let schedule = run_with(
            testing::target(),
            Region::new(vec![
                testing::reg_op(0, testing::ALU, 1, 10, 11),
                testing::reg_op(1, testing::ALU, 2, 10, 11),
            ]),
            SuccessorInfo::Known {
                schedule: &succ,
                trust: ScoreboardTrust::Absolute,
            },
        );
        assert_eq!(schedule.len(), 1);
        let classes: Vec<_> = schedule.cycles[0].ops.iter().map(|op| op.class).collect();
        assert!(classes.contains(&testing::ALU_A));
        assert!(classes.contains(&testing::ALU_B));
        assert_eq!(schedule.cycles[0].format.as_deref(), Some("alu"));
    }

    #[test]
    fn meta_ops_ride_along_without_resources() {
        let succ = empty_successor();
        let mut meta = testing::op(1, testing::META);
        meta.meta = true;
        let schedule = run_with(
            testing::target(),
            Region::new(vec![testing::reg_op(0, testing::ALU_A, 1, 10, 11), meta]),
            SuccessorInfo::Known {
                schedule: &succ,
                trust: ScoreboardTrust::Absolute,
            },
        );
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.cycles[0].ops.len(), 2);
        assert!(schedule.cycles[0].ops[1].meta);
    }
}
