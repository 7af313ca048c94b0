use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::{ClassId, TargetConfig};
use crate::format::{PacketFormat, SlotBits, SlotKind};

/// Operations assigned to one issue cycle.
///
/// Members are recorded under the slot kind they occupy; the combined slot
/// set must always be covered by some packet format. An operation whose class
/// has no known slot can never share a cycle and turns the bundle into a
/// singleton standalone bundle.
///
/// Members are referred to by their index into the caller's operation arena,
/// paired with the concrete class they were committed under (which differs
/// from the operation's own class when an alternate encoding was selected).
#[derive(Debug, Clone)]
pub struct Bundle {
    config: Arc<TargetConfig>,
    slot_map: IndexMap<SlotKind, (usize, ClassId)>,
    meta_ops: Vec<usize>,
    standalone: Option<(usize, ClassId)>,
    occupied: SlotBits,
}

impl Bundle {
    #[must_use]
    pub fn new(config: Arc<TargetConfig>) -> Self {
        Self {
            config,
            slot_map: IndexMap::new(),
            meta_ops: Vec::new(),
            standalone: None,
            occupied: 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot_map.is_empty() && self.meta_ops.is_empty() && self.standalone.is_none()
    }

    #[must_use]
    pub fn is_standalone(&self) -> bool {
        self.standalone.is_some()
    }

    #[must_use]
    pub fn occupied_slots(&self) -> SlotBits {
        self.occupied
    }

    /// The slot this class would occupy if added now: the first of the
    /// class's slot kinds that is free and keeps the combined set coverable.
    #[must_use]
    pub fn find_free_slot(&self, class: ClassId) -> Option<SlotKind> {
        let descriptor = self.config.class(class);
        descriptor.slots.iter().copied().find(|&kind| {
            let bits = self.config.slot_table[kind].slots;
            self.occupied & bits == 0
                && self.config.formats.format(self.occupied | bits).is_some()
        })
    }

    /// Whether an operation of `class` can join the bundle.
    #[must_use]
    pub fn can_add(&self, class: ClassId) -> bool {
        if self.standalone.is_some() {
            return false;
        }
        if self.config.class(class).slots.is_empty() {
            // Unknown slot: only as the sole member.
            return self.slot_map.is_empty();
        }
        self.find_free_slot(class).is_some()
    }

    /// Add operation `index` committed under `class`. Returns false and
    /// leaves the bundle unchanged when the operation does not fit.
    pub fn add(&mut self, index: usize, class: ClassId) -> bool {
        if !self.can_add(class) {
            return false;
        }
        if self.config.class(class).slots.is_empty() {
            self.standalone = Some((index, class));
            return true;
        }
        let kind = self
            .find_free_slot(class)
            .unwrap_or_else(|| unreachable!("can_add checked slot availability"));
        self.occupied |= self.config.slot_table[kind].slots;
        self.slot_map.insert(kind, (index, class));
        true
    }

    /// Meta operations bypass slot accounting and are re-emitted after the
    /// bundle's real members.
    pub fn add_meta(&mut self, index: usize) {
        self.meta_ops.push(index);
    }

    /// Matched packet format for the occupied slots. None for empty and
    /// standalone bundles, which are emitted without a format.
    #[must_use]
    pub fn format(&self) -> Option<&PacketFormat> {
        if self.occupied == 0 {
            return None;
        }
        self.config.formats.format(self.occupied)
    }

    /// Slot-occupying members in insertion order, then the standalone member.
    /// Yields `(arena index, committed class)`.
    pub fn members(&self) -> impl Iterator<Item = (usize, ClassId)> + '_ {
        self.slot_map.values().copied().chain(self.standalone)
    }

    /// Meta members, re-emitted after the real members.
    #[must_use]
    pub fn meta_members(&self) -> &[usize] {
        &self.meta_ops
    }
}

impl std::fmt::Display for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use itertools::Itertools;
        let names = self
            .slot_map
            .values()
            .chain(self.standalone.as_ref())
            .map(|&(idx, class)| format!("op{idx}:{}", self.config.class(class).name))
            .join(" ");
        match self.format() {
            Some(format) => write!(f, "[{} <{}>]", names, format.name),
            None => write!(f, "[{names}]"),
        }
    }
}
