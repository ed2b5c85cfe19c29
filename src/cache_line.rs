use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

pub const CACHE_LINE_BITS: u32 = 8;
pub const CACHE_LINE_SIZE: usize = 1 << CACHE_LINE_BITS;
pub const CACHE_LINE_NUM: usize = 0x10000 / CACHE_LINE_SIZE;
pub const CACHE_LINE_LOW: u16 = (CACHE_LINE_SIZE - 1) as u16;
pub const CACHE_LINE_HIGH: u16 = !CACHE_LINE_LOW;

bitflags! {
    /// Why a 256 byte region has to go through the slow path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DisallowReason: u8 {
        /// 0xFFFF is the sub-slot register of the slot in page 3.
        const SUB_SLOT_REGISTER = 0x01;
        const MEMORY_WATCH = 0x02;
        const GLOBAL_WRITE = 0x04;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    Read,
    Write,
}

pub fn region_of(address: u16) -> usize {
    (address >> CACHE_LINE_BITS) as usize
}

pub fn region_start(region: usize) -> u16 {
    (region << CACHE_LINE_BITS) as u16
}

/// Per-region bitmask deciding whether the CPU may bypass the bus and touch a
/// device's backing storage directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLineMask {
    read: [DisallowReason; CACHE_LINE_NUM],
    write: [DisallowReason; CACHE_LINE_NUM],
}

impl Default for CacheLineMask {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheLineMask {
    pub fn new() -> Self {
        Self {
            read: [DisallowReason::empty(); CACHE_LINE_NUM],
            write: [DisallowReason::empty(); CACHE_LINE_NUM],
        }
    }

    fn table(&self, access: Access) -> &[DisallowReason; CACHE_LINE_NUM] {
        match access {
            Access::Read => &self.read,
            Access::Write => &self.write,
        }
    }

    pub fn reasons(&self, access: Access, region: usize) -> DisallowReason {
        self.table(access)[region]
    }

    pub fn is_allowed(&self, access: Access, address: u16) -> bool {
        self.table(access)[region_of(address)].is_empty()
    }

    pub fn read_allowed(&self, address: u16) -> bool {
        self.read[region_of(address)].is_empty()
    }

    pub fn write_allowed(&self, address: u16) -> bool {
        self.write[region_of(address)].is_empty()
    }

    /// Sets or clears one reason bit. Returns true when the region's
    /// accessibility flipped, i.e. cached translations must be dropped.
    pub fn set(&mut self, access: Access, region: usize, reason: DisallowReason, on: bool) -> bool {
        let entry = match access {
            Access::Read => &mut self.read[region],
            Access::Write => &mut self.write[region],
        };
        let before = entry.is_empty();
        entry.set(reason, on);
        before != entry.is_empty()
    }

    pub fn snapshot(&self) -> MaskSnapshot {
        let mut snapshot = MaskSnapshot {
            read: [0; CACHE_LINE_NUM],
            write: [0; CACHE_LINE_NUM],
        };
        for region in 0..CACHE_LINE_NUM {
            snapshot.read[region] = self.read[region].bits();
            snapshot.write[region] = self.write[region].bits();
        }
        snapshot
    }
}

/// Raw reason bits per region, for debugger front-ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskSnapshot {
    #[serde(with = "BigArray")]
    pub read: [u8; CACHE_LINE_NUM],
    #[serde(with = "BigArray")]
    pub write: [u8; CACHE_LINE_NUM],
}
