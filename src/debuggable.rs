use std::{fmt, str::FromStr};

use crate::{
    bus::DebugBus,
    device::EmuTime,
    error::BusError,
    slot::SLOTTED_SPACE_SIZE,
    utils::hexdump,
};

/// Byte-addressable views of the bus for memory editors and dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debuggable {
    /// The 64KB as the CPU currently sees it.
    Memory,
    /// All 4x4 slots, addressed as `primary << 18 | secondary << 16 | address`.
    SlottedMemory,
    IoPorts,
}

impl Debuggable {
    pub const ALL: [Debuggable; 3] = [
        Debuggable::Memory,
        Debuggable::SlottedMemory,
        Debuggable::IoPorts,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Debuggable::Memory => "memory",
            Debuggable::SlottedMemory => "slotted memory",
            Debuggable::IoPorts => "ioports",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Debuggable::Memory => "The memory currently visible for the CPU.",
            Debuggable::SlottedMemory => {
                "The memory in slots and subslots. Index is slot * 0x10000 + address."
            }
            Debuggable::IoPorts => "IO ports.",
        }
    }

    pub fn size(self) -> u32 {
        match self {
            Debuggable::Memory => 0x10000,
            Debuggable::SlottedMemory => SLOTTED_SPACE_SIZE,
            Debuggable::IoPorts => 0x100,
        }
    }

    /// Side-effect free read; `address` wraps at `size()`.
    pub fn read(self, bus: &DebugBus, address: u32, time: EmuTime) -> u8 {
        let address = address % self.size();
        match self {
            Debuggable::Memory => bus.peek_mem(address as u16, time),
            Debuggable::SlottedMemory => bus.peek_slotted_mem(address, time),
            Debuggable::IoPorts => bus.peek_io(address as u16, time),
        }
    }

    pub fn write(self, bus: &mut DebugBus, address: u32, value: u8, time: EmuTime) {
        let address = address % self.size();
        match self {
            Debuggable::Memory => bus.write_mem(address as u16, value, time),
            Debuggable::SlottedMemory => bus.write_slotted_mem(address, value, time),
            Debuggable::IoPorts => bus.write_io(address as u16, value, time),
        }
    }

    pub fn dump(self, bus: &DebugBus, start: u32, len: u32, time: EmuTime) -> String {
        let end = start.saturating_add(len).min(self.size());
        let bytes: Vec<u8> = (start..end).map(|a| self.read(bus, a, time)).collect();
        hexdump(&bytes, start)
    }
}

impl fmt::Display for Debuggable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Debuggable {
    type Err = BusError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.name() == name)
            .ok_or_else(|| BusError::UnknownDebuggable(name.to_string()))
    }
}
