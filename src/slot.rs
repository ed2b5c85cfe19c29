use std::fmt;

use serde::{Deserialize, Serialize};

pub const PAGE_SIZE: u32 = 0x4000;
pub const NUM_PAGES: usize = 4;
pub const NUM_SLOTS: usize = 4;

/// Size of the fully qualified (primary, secondary, address) space.
pub const SLOTTED_SPACE_SIZE: u32 = 0x10000 * (NUM_SLOTS * NUM_SLOTS) as u32;

/// Address of the sub-slot select register in an expanded slot.
pub const SUB_SLOT_REGISTER_ADDRESS: u16 = 0xFFFF;

pub fn page_of(address: u16) -> usize {
    (address >> 14) as usize
}

/// A 20 bit slotted address as used by debuggers:
/// `PP SS pp oooo oooo oooo oo`, where the low 16 bits include the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotAddress {
    pub primary: u8,
    pub secondary: u8,
    pub address: u16,
}

impl SlotAddress {
    pub fn new(primary: u8, secondary: u8, address: u16) -> Self {
        Self {
            primary: primary & 3,
            secondary: secondary & 3,
            address,
        }
    }

    pub fn from_linear(linear: u32) -> Self {
        Self {
            primary: ((linear & 0xC0000) >> 18) as u8,
            secondary: ((linear & 0x30000) >> 16) as u8,
            address: (linear & 0xFFFF) as u16,
        }
    }

    pub fn linear(&self) -> u32 {
        ((self.primary as u32) << 18) | ((self.secondary as u32) << 16) | self.address as u32
    }

    pub fn page(&self) -> usize {
        page_of(self.address)
    }
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{:04X}", self.primary, self.secondary, self.address)
    }
}

/// Slot select registers, the only bus state that survives a savestate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotState {
    pub primary_slots: u8,
    pub sub_slot_registers: [u8; NUM_SLOTS],
}

/// Splits `base..base+size` on 16KB boundaries.
pub fn split_pages(base: u16, size: u32) -> impl Iterator<Item = (u16, u32)> {
    let mut base = base as u32;
    let mut remaining = size;
    std::iter::from_fn(move || {
        if remaining == 0 {
            return None;
        }
        let partial = remaining.min(((base + PAGE_SIZE) & !(PAGE_SIZE - 1)) - base);
        let chunk = (base as u16, partial);
        base += partial;
        remaining -= partial;
        Some(chunk)
    })
}
