use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ClassId, TargetConfig};
use crate::operation::Operation;
use crate::scheduler::SchedulingContext;
use crate::scoreboard::{ResourceScoreboard, ScoreboardCell};

/// Outcome of a hazard query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum HazardKind {
    /// The operation can commit at the queried cycle.
    NoHazard,
    /// Resources conflict at the queried cycle; try another.
    Hazard,
    /// The current cycle must stay free for this operation; the scheduler
    /// has to emit an idle cycle before retrying.
    NoopHazard,
}

/// Time axis of a zone's scoreboard. A bottom-up zone stores cycles in
/// reverse execution order, so itinerary stages expand toward negative
/// offsets there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    TopDown,
    BottomUp,
}

impl Direction {
    fn sign(self) -> i32 {
        match self {
            Direction::TopDown => 1,
            Direction::BottomUp => -1,
        }
    }
}

/// Cycle-accurate hazard recognition over one scheduling zone.
///
/// Owns the zone's resource scoreboard and answers whether an operation can
/// commit `delta` cycles away from the current cycle, resolving alternate
/// encodings in declaration order. The scoreboard always counts cycles in
/// forward execution order; a bottom-up zone feeds it inverted cycles.
pub struct HazardRecognizer {
    config: Arc<TargetConfig>,
    scoreboard: ResourceScoreboard,
    issue_limit: u32,
    /// In pre-allocation mode, itinerary stages past this depth are ignored
    /// and missing itinerary data is tolerated optimistically.
    fu_depth_limit: Option<u32>,
    direction: Direction,
    /// Chosen alternate per operation uid, fixed at commit.
    selected: HashMap<usize, ClassId>,
    /// While positive, non-delay-slot operations are pushed out of the
    /// current cycle. Decays on advance/recede.
    reserved_cycles: u32,
}

impl HazardRecognizer {
    /// Post-allocation recognizer: exact itineraries, slots are mandatory.
    #[must_use]
    pub fn new(config: Arc<TargetConfig>, ctx: &SchedulingContext) -> Self {
        Self::build(config, ctx, None, Direction::TopDown)
    }

    /// Post-allocation recognizer for a bottom-up zone: the scoreboard runs
    /// in reverse execution order.
    #[must_use]
    pub fn bottom_up(config: Arc<TargetConfig>, ctx: &SchedulingContext) -> Self {
        Self::build(config, ctx, None, Direction::BottomUp)
    }

    /// Pre-allocation recognizer: stages past `pre_alloc_fu_depth` are
    /// ignored and classes without itinerary data never report a hazard.
    #[must_use]
    pub fn pre_alloc(config: Arc<TargetConfig>, ctx: &SchedulingContext) -> Self {
        let limit = config.pre_alloc_fu_depth;
        Self::build(config, ctx, Some(limit), Direction::TopDown)
    }

    fn build(
        config: Arc<TargetConfig>,
        ctx: &SchedulingContext,
        fu_depth_limit: Option<u32>,
        direction: Direction,
    ) -> Self {
        let depth = config
            .scoreboard_depth
            .max(config.conflict_horizon())
            .max(1) as usize;
        let issue_limit = if ctx.packing_disabled(&config) {
            1
        } else {
            config.issue_limit
        };
        Self {
            scoreboard: ResourceScoreboard::new(depth),
            config,
            issue_limit,
            fu_depth_limit,
            direction,
            selected: HashMap::new(),
            reserved_cycles: 0,
        }
    }

    #[must_use]
    pub fn scoreboard(&self) -> &ResourceScoreboard {
        &self.scoreboard
    }

    #[must_use]
    pub fn issue_limit(&self) -> u32 {
        self.issue_limit
    }

    #[must_use]
    pub fn config(&self) -> &Arc<TargetConfig> {
        &self.config
    }

    /// The concrete class `op` was committed under, which is one of its
    /// alternates when the primary class has any.
    #[must_use]
    pub fn selected_class(&self, op: &Operation) -> ClassId {
        self.selected.get(&op.uid).copied().unwrap_or(op.class)
    }

    /// Candidate concrete classes for `op`, in resolution order.
    fn candidates<'a>(&'a self, op: &'a Operation) -> &'a [ClassId] {
        let alternates = &self.config.class(op.class).alternates;
        if alternates.is_empty() {
            std::slice::from_ref(&op.class)
        } else {
            alternates
        }
    }

    /// Can `op` commit `delta` cycles from the current cycle?
    #[must_use]
    pub fn query_hazard(&self, op: &Operation, delta: i32) -> HazardKind {
        if op.meta {
            return HazardKind::NoHazard;
        }
        if self.reserved_cycles > 0 && !op.has_delay_slot() {
            return HazardKind::NoopHazard;
        }
        if self
            .candidates(op)
            .iter()
            .any(|&class| !self.class_conflict(&self.scoreboard, class, delta))
        {
            HazardKind::NoHazard
        } else {
            HazardKind::Hazard
        }
    }

    /// Commit `op` at `delta`, fixing its alternate selection. The caller
    /// must have seen `NoHazard` for this delta.
    pub fn commit(&mut self, op: &Operation, delta: i32, ctx: &mut SchedulingContext) {
        if op.meta {
            return;
        }
        assert!(
            self.scoreboard.is_valid_delta(delta),
            "commit of {op} at invalid cycle offset {delta}"
        );
        let class = self
            .candidates(op)
            .iter()
            .copied()
            .find(|&class| !self.class_conflict(&self.scoreboard, class, delta))
            .unwrap_or_else(|| panic!("committing {op} at {delta} without a free encoding"));
        log::trace!(
            "commit {op} at delta {delta} as {}",
            self.config.class(class).name
        );
        self.selected.insert(op.uid, class);
        let config = Arc::clone(&self.config);
        Self::emit_into(
            &config,
            self.fu_depth_limit,
            self.direction,
            &mut self.scoreboard,
            class,
            delta,
        );
        ctx.record_scheduled();
    }

    /// Book `class`'s resources into this zone's scoreboard without an
    /// operation behind them. Used to replay neighbor-block schedules into
    /// the lookahead cells before scheduling starts.
    pub fn emit_self(&mut self, class: ClassId, delta: i32) {
        let config = Arc::clone(&self.config);
        Self::emit_into(
            &config,
            self.fu_depth_limit,
            self.direction,
            &mut self.scoreboard,
            class,
            delta,
        );
    }

    pub fn advance(&mut self) {
        self.scoreboard.advance();
        self.reserved_cycles = self.reserved_cycles.saturating_sub(1);
    }

    pub fn recede(&mut self) {
        self.scoreboard.recede();
        self.reserved_cycles = self.reserved_cycles.saturating_sub(1);
    }

    /// Keep the next `cycles` cycles free for delay-slot fillers.
    pub fn set_reserved_cycles(&mut self, cycles: u32) {
        self.reserved_cycles = cycles;
    }

    /// Mark the cycle at `delta` as fully occupied.
    pub fn block_cycle(&mut self, delta: i32) {
        self.scoreboard.block(delta);
    }

    /// Whether this zone's scoreboard conflicts with `other`'s when `other`
    /// starts `delta` cycles after this one. Both zones must share a time
    /// axis.
    #[must_use]
    pub fn conflict(&self, other: &Self, delta: i32) -> bool {
        debug_assert_eq!(self.direction, other.direction);
        self.scoreboard
            .conflict(&other.scoreboard, delta, &self.config.formats)
    }

    /// Conflict test between this top-down zone and a bottom-up zone.
    /// Offset `d` in the bottom zone's scoreboard aligns with offset
    /// `gap - d` in this one.
    #[must_use]
    pub fn conflict_mirrored(&self, bottom: &Self, gap: i32) -> bool {
        debug_assert_eq!(self.direction, Direction::TopDown);
        debug_assert_eq!(bottom.direction, Direction::BottomUp);
        self.scoreboard
            .conflict_mirrored(&bottom.scoreboard, gap, &self.config.formats)
    }

    /// Resource conflict test for a concrete class against an arbitrary
    /// scoreboard. Used on the zone scoreboard by query/commit and on
    /// external scoreboards by the modulo scheduler.
    #[must_use]
    pub fn class_conflict(
        &self,
        scoreboard: &ResourceScoreboard,
        class: ClassId,
        delta: i32,
    ) -> bool {
        let descriptor = self.config.class(class);
        if descriptor.stages.is_empty() {
            assert!(
                self.fu_depth_limit.is_some(),
                "class {} ({}) has no itinerary",
                class,
                descriptor.name
            );
            return false;
        }
        if scoreboard.in_window(delta) {
            let cell = scoreboard.cell(delta);
            if cell.issue_count >= self.issue_limit {
                return true;
            }
            let emission = Self::emission_cell(&self.config, self.fu_depth_limit, class);
            if cell.conflict(&emission, &self.config.formats) {
                return true;
            }
        }
        let sign = self.direction.sign();
        let mut stage_start = delta;
        for stage in &descriptor.stages {
            if let Some(limit) = self.fu_depth_limit {
                if (stage_start - delta) * sign >= limit as i32 {
                    break;
                }
            }
            let stage_cell = ScoreboardCell::from_stage(stage);
            for offset in 0..stage.cycles as i32 {
                let cycle = stage_start + sign * offset;
                if scoreboard.in_window(cycle)
                    && scoreboard
                        .cell(cycle)
                        .conflict(&stage_cell, &self.config.formats)
                {
                    return true;
                }
            }
            stage_start += sign * stage.next_cycles as i32;
        }
        false
    }

    /// Commit a concrete class's resources into an arbitrary scoreboard.
    /// Cycles falling outside the scoreboard's window are dropped.
    pub fn emit_class(&self, scoreboard: &mut ResourceScoreboard, class: ClassId, delta: i32) {
        Self::emit_into(
            &self.config,
            self.fu_depth_limit,
            self.direction,
            scoreboard,
            class,
            delta,
        );
    }

    /// The cell a committed `class` contributes in its emission cycle,
    /// before the issue count is added.
    fn emission_cell(
        config: &TargetConfig,
        fu_depth_limit: Option<u32>,
        class: ClassId,
    ) -> ScoreboardCell {
        let descriptor = config.class(class);
        let slots = if descriptor.slots.is_empty() {
            if fu_depth_limit.is_some() {
                // Pre-allocation: unknown slots do not constrain the cycle.
                0
            } else {
                // Post-allocation: an unknown slot monopolizes the packet.
                !0
            }
        } else {
            config.slot_set(class)
        };
        ScoreboardCell::from_slots(slots)
    }

    fn emit_into(
        config: &TargetConfig,
        fu_depth_limit: Option<u32>,
        direction: Direction,
        scoreboard: &mut ResourceScoreboard,
        class: ClassId,
        delta: i32,
    ) {
        if scoreboard.in_window(delta) {
            let emission = Self::emission_cell(config, fu_depth_limit, class);
            let cell = scoreboard.cell_mut(delta);
            *cell |= emission;
            cell.issue_count += 1;
        }
        let sign = direction.sign();
        let mut stage_start = delta;
        for stage in &config.class(class).stages {
            if let Some(limit) = fu_depth_limit {
                if (stage_start - delta) * sign >= limit as i32 {
                    break;
                }
            }
            let stage_cell = ScoreboardCell::from_stage(stage);
            for offset in 0..stage.cycles as i32 {
                let cycle = stage_start + sign * offset;
                if scoreboard.in_window(cycle) {
                    *scoreboard.cell_mut(cycle) |= stage_cell;
                }
            }
            stage_start += sign * stage.next_cycles as i32;
        }
    }
}

impl std::fmt::Debug for HazardRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HazardRecognizer")
            .field("issue_limit", &self.issue_limit)
            .field("fu_depth_limit", &self.fu_depth_limit)
            .field("reserved_cycles", &self.reserved_cycles)
            .finish_non_exhaustive()
    }
}
