use crate::format::{PacketFormatTable, SlotBits};
use crate::itinerary::{ReservationKind, Stage};

/// Resource occupancy of one cycle: the functional units required and
/// reserved by in-flight operations, the occupied issue slots, and the
/// number of operations issued in the cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScoreboardCell {
    pub required: u64,
    pub reserved: u64,
    pub slots: SlotBits,
    pub issue_count: u32,
}

impl ScoreboardCell {
    /// Cell occupying only issue slots, used when testing/committing the
    /// emission cycle of an operation.
    #[must_use]
    pub fn from_slots(slots: SlotBits) -> Self {
        Self {
            slots,
            ..Self::default()
        }
    }

    /// Cell for one itinerary stage.
    #[must_use]
    pub fn from_stage(stage: &Stage) -> Self {
        match stage.kind {
            ReservationKind::Required => Self {
                required: stage.units,
                ..Self::default()
            },
            ReservationKind::Reserved => Self {
                reserved: stage.units,
                ..Self::default()
            },
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.required == 0 && self.reserved == 0 && self.slots == 0
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Make this cell conflict with any non-empty cell. Slot bits are set to
    /// all-ones without knowing format details; `conflict` is careful to only
    /// consult the format table when both sides occupy slots.
    pub fn block(&mut self) {
        self.required = !0;
        self.reserved = !0;
        self.slots = !0;
    }

    /// Whether two cells compete: required/required, required/reserved or
    /// slot/slot overlap, or a combined slot set no packet format can encode.
    #[must_use]
    pub fn conflict(&self, other: &Self, formats: &PacketFormatTable) -> bool {
        if self.required & other.required != 0
            || self.slots & other.slots != 0
            || self.reserved & other.required != 0
            || self.required & other.reserved != 0
        {
            return true;
        }
        // Only check formats when both cells occupy slots. This allows a
        // blocked cycle (slots == !0) without knowing slot or format details.
        self.slots != 0
            && other.slots != 0
            && formats.format(self.slots | other.slots).is_none()
    }
}

impl std::ops::BitOrAssign for ScoreboardCell {
    fn bitor_assign(&mut self, rhs: Self) {
        self.required |= rhs.required;
        self.reserved |= rhs.reserved;
        self.slots |= rhs.slots;
    }
}

impl std::fmt::Display for ScoreboardCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "req {:016x} rsrv {:016x} slots {:08x} issued {}",
            self.required, self.reserved, self.slots, self.issue_count
        )
    }
}

/// Circular buffer of per-cycle resource state around a movable head.
///
/// Cell 0 represents the current cycle, positive offsets the future, negative
/// offsets the past. The window extends from `-depth` to `depth - 1`;
/// committing resources is allowed in `[-depth, 0]`, which guarantees that
/// every stage of a committed itinerary stays inside the window. The buffer
/// always counts cycles in forward execution order: a bottom-up scheduler's
/// cycles are the inverse of its scoreboard cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScoreboard {
    cells: Box<[ScoreboardCell]>,
    /// Always a power of two so the head index wraps by masking.
    size: usize,
    /// Half of `size`.
    depth: usize,
    head: usize,
}

impl ResourceScoreboard {
    /// Allocate a scoreboard covering `depth` cycles of past and future.
    /// The depth is rounded up to a power of two.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "scoreboard depth must be positive");
        let depth = depth.next_power_of_two();
        let size = 2 * depth;
        Self {
            cells: vec![ScoreboardCell::default(); size].into_boxed_slice(),
            size,
            depth,
            head: 0,
        }
    }

    #[must_use]
    pub fn depth(&self) -> i32 {
        self.depth as i32
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    fn index(&self, delta: i32) -> usize {
        debug_assert!(self.in_window(delta), "cycle offset {delta} out of window");
        (self.head as i64 + i64::from(delta)) as usize & (self.size - 1)
    }

    /// Whether `delta` lies inside the represented window.
    #[must_use]
    pub fn in_window(&self, delta: i32) -> bool {
        delta >= -self.depth() && delta < self.depth()
    }

    /// Whether committing resources at `delta` is allowed.
    #[must_use]
    pub fn is_valid_delta(&self, delta: i32) -> bool {
        delta >= -self.depth() && delta <= 0
    }

    pub fn clear(&mut self) {
        for cell in self.cells.iter_mut() {
            cell.clear();
        }
        self.head = 0;
    }

    /// Move the head one cycle into the future. The cell rotating out of the
    /// past re-enters as the farthest future cycle and is cleared.
    pub fn advance(&mut self) {
        let recycled = self.index(-self.depth());
        self.cells[recycled].clear();
        self.head = (self.head + 1) & (self.size - 1);
    }

    /// Move the head one cycle into the past. The cell rotating out of the
    /// future re-enters as the farthest past cycle and is cleared.
    pub fn recede(&mut self) {
        let recycled = self.index(self.depth() - 1);
        self.cells[recycled].clear();
        self.head = (self.head + self.size - 1) & (self.size - 1);
    }

    #[must_use]
    pub fn cell(&self, delta: i32) -> &ScoreboardCell {
        &self.cells[self.index(delta)]
    }

    pub fn cell_mut(&mut self, delta: i32) -> &mut ScoreboardCell {
        let idx = self.index(delta);
        &mut self.cells[idx]
    }

    /// Mark the cycle at `delta` as conflicting with anything.
    pub fn block(&mut self, delta: i32) {
        self.cell_mut(delta).block();
    }

    /// Check whether this scoreboard and `other`, shifted `delta` cycles into
    /// the future relative to this one, compete for resources anywhere in the
    /// overlap of the two windows. Cycles outside either window are empty and
    /// never conflict; this is what lets a bounded window stand in for an
    /// unbounded schedule.
    #[must_use]
    pub fn conflict(
        &self,
        other: &Self,
        delta: i32,
        formats: &PacketFormatTable,
    ) -> bool {
        let mut cycle = -self.depth() + delta;
        let mut other_cycle = -other.depth();
        while cycle < -self.depth() {
            cycle += 1;
            other_cycle += 1;
        }
        while other_cycle < -other.depth() {
            cycle += 1;
            other_cycle += 1;
        }
        while cycle < self.depth() && other_cycle < other.depth() {
            if self.cell(cycle).conflict(other.cell(other_cycle), formats) {
                return true;
            }
            cycle += 1;
            other_cycle += 1;
        }
        false
    }

    /// Conflict test against a scoreboard whose time axis runs opposite to
    /// this one (a bottom-up zone's scoreboard). Offset `d` in `other` is
    /// aligned with offset `gap - d` here, so `gap` positions `other`'s head
    /// relative to this head in this scoreboard's orientation.
    #[must_use]
    pub fn conflict_mirrored(
        &self,
        other: &Self,
        gap: i32,
        formats: &PacketFormatTable,
    ) -> bool {
        for other_cycle in -other.depth()..other.depth() {
            let cycle = gap - other_cycle;
            if self.in_window(cycle)
                && self.cell(cycle).conflict(other.cell(other_cycle), formats)
            {
                return true;
            }
        }
        false
    }

    /// Offset of the earliest non-empty cell, if any.
    #[must_use]
    pub fn first_occupied(&self) -> Option<i32> {
        (-self.depth()..self.depth()).find(|&delta| !self.cell(delta).is_empty())
    }

    /// Offset of the latest non-empty cell, if any.
    #[must_use]
    pub fn last_occupied(&self) -> Option<i32> {
        (-self.depth()..self.depth())
            .rev()
            .find(|&delta| !self.cell(delta).is_empty())
    }
}

impl std::fmt::Display for ResourceScoreboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (Some(first), Some(last)) = (self.first_occupied(), self.last_occupied())
        else {
            return writeln!(f, "(empty scoreboard)");
        };
        for delta in first..=last {
            let marker = if delta == 0 { ">" } else { " " };
            writeln!(f, "{marker}{delta:>5}: {}", self.cell(delta))?;
        }
        Ok(())
    }
}
