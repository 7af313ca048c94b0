use serde::{Deserialize, Serialize};

/// Bitset of issue slots occupied within one cycle.
pub type SlotBits = u64;

/// Index into the target's slot table.
pub type SlotKind = usize;

/// Description of one issue slot kind.
///
/// A slot kind usually maps to a single slot bit, but composite kinds
/// (an operation spanning two encoding slots) are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub name: String,
    pub slots: SlotBits,
}

/// One legal simultaneous-issue combination: the set of slots a packet of
/// this format can encode, and the packet size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketFormat {
    pub name: String,
    pub slots: SlotBits,
    pub size_bytes: u32,
}

impl PacketFormat {
    /// Whether this format can accommodate all slots in `requested`.
    #[must_use]
    pub fn covers(&self, requested: SlotBits) -> bool {
        requested & !self.slots == 0
    }
}

/// The static, ordered table of legal packet formats.
///
/// Order is a priority: the first covering format wins, so narrow formats
/// must be listed before catch-all supersets to get minimum-size encodings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketFormatTable {
    pub formats: Vec<PacketFormat>,
}

impl PacketFormatTable {
    #[must_use]
    pub fn new(formats: Vec<PacketFormat>) -> Self {
        Self { formats }
    }

    /// The first format in table order that covers `slots`, if any.
    #[must_use]
    pub fn format(&self, slots: SlotBits) -> Option<&PacketFormat> {
        self.formats.iter().find(|format| format.covers(slots))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Size in bytes of the smallest packet, used for idle-cycle placeholders.
    #[must_use]
    pub fn min_size_bytes(&self) -> u32 {
        self.formats
            .iter()
            .map(|format| format.size_bytes)
            .min()
            .unwrap_or(0)
    }
}
