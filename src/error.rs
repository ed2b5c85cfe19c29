use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Registration or expansion rejected as a whole; no bus state was changed.
    #[error(transparent)]
    BusConflict(#[from] Conflict),

    #[error("Invalid slot {primary}.{secondary}")]
    InvalidSlot { primary: u8, secondary: u8 },

    #[error("Memory range {base:#06X}+{size:#X} exceeds the address space")]
    InvalidRange { base: u16, size: u32 },

    #[error("Invalid slot address {primary}.{secondary} page {page}")]
    InvalidSlotAddress { primary: u8, secondary: u8, page: u8 },

    #[error(
        "Can't remove slot expander from slot {primary} because the following devices are still inserted: {}.",
        devices.join(" ")
    )]
    ExpanderInUse { primary: u8, devices: Vec<String> },

    #[error("Port must be in range 0..255, got {0}")]
    InvalidPort(u32),

    #[error("Invalid watchpoint range {begin:#06X}-{end:#06X}")]
    InvalidWatchRange { begin: u32, end: u32 },

    #[error("No such debuggable: {0}")]
    UnknownDebuggable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    #[error("Overlapping memory devices in slot {primary}.{secondary}: {existing} and {new}.")]
    Overlap {
        primary: u8,
        secondary: u8,
        existing: String,
        new: String,
    },

    #[error("Slot {primary}.{secondary} does not exist because slot is not expanded.")]
    NotExpanded { primary: u8, secondary: u8 },

    #[error("Can't expand slot {primary} because it's already in use.")]
    SlotInUse { primary: u8 },
}

pub type BusResult<T> = Result<T, BusError>;
