use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    cache_line::{Access, CACHE_LINE_NUM},
    error::{BusError, BusResult},
    io_bus::{Direction, NUM_PORTS},
    script::Trigger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchType {
    ReadIo,
    WriteIo,
    ReadMem,
    WriteMem,
}

impl WatchType {
    pub fn is_io(self) -> bool {
        matches!(self, WatchType::ReadIo | WatchType::WriteIo)
    }

    fn limit(self) -> u32 {
        if self.is_io() {
            NUM_PORTS as u32 - 1
        } else {
            0xFFFF
        }
    }
}

impl fmt::Display for WatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatchType::ReadIo => "read_io",
            WatchType::WriteIo => "write_io",
            WatchType::ReadMem => "read_mem",
            WatchType::WriteMem => "write_mem",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WatchPointId(pub u32);

#[derive(Debug, Clone)]
pub struct WatchPoint {
    pub id: WatchPointId,
    pub kind: WatchType,
    pub begin: u16,
    pub end: u16,
    pub trigger: Trigger,
}

impl WatchPoint {
    pub fn covers(&self, address: u16) -> bool {
        self.begin <= address && address <= self.end
    }
}

/// One bit per byte of a 256 byte region (or per I/O port).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LineBits([u64; 4]);

impl LineBits {
    fn set(&mut self, offset: u8) {
        self.0[(offset >> 6) as usize] |= 1 << (offset & 63);
    }

    fn get(&self, offset: u8) -> bool {
        self.0[(offset >> 6) as usize] & (1 << (offset & 63)) != 0
    }

    fn any(&self) -> bool {
        self.0.iter().any(|&word| word != 0)
    }
}

/// Address-range watchpoints and the per-byte lookup tables derived from them.
#[derive(Debug, Clone)]
pub struct WatchpointEngine {
    watch_points: Vec<WatchPoint>,
    read_mem: Box<[LineBits; CACHE_LINE_NUM]>,
    write_mem: Box<[LineBits; CACHE_LINE_NUM]>,
    read_io: LineBits,
    write_io: LineBits,
    next_id: u32,
}

impl Default for WatchpointEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchpointEngine {
    pub fn new() -> Self {
        Self {
            watch_points: Vec::new(),
            read_mem: Box::new([LineBits::default(); CACHE_LINE_NUM]),
            write_mem: Box::new([LineBits::default(); CACHE_LINE_NUM]),
            read_io: LineBits::default(),
            write_io: LineBits::default(),
            next_id: 1,
        }
    }

    pub fn insert(
        &mut self,
        kind: WatchType,
        begin: u32,
        end: u32,
        trigger: Trigger,
    ) -> BusResult<WatchPointId> {
        if begin > end || end > kind.limit() {
            return Err(BusError::InvalidWatchRange { begin, end });
        }
        let id = WatchPointId(self.next_id);
        self.next_id += 1;
        self.watch_points.push(WatchPoint {
            id,
            kind,
            begin: begin as u16,
            end: end as u16,
            trigger,
        });
        self.rebuild(kind);
        Ok(id)
    }

    pub fn remove(&mut self, id: WatchPointId) -> Option<WatchPoint> {
        let index = self.watch_points.iter().position(|w| w.id == id)?;
        let watch_point = self.watch_points.remove(index);
        self.rebuild(watch_point.kind);
        Some(watch_point)
    }

    pub fn contains(&self, id: WatchPointId) -> bool {
        self.watch_points.iter().any(|w| w.id == id)
    }

    pub fn get(&self, id: WatchPointId) -> Option<&WatchPoint> {
        self.watch_points.iter().find(|w| w.id == id)
    }

    pub fn watch_points(&self) -> &[WatchPoint] {
        &self.watch_points
    }

    pub fn is_empty(&self) -> bool {
        self.watch_points.is_empty()
    }

    /// Recomputes the lookup table for `kind` from scratch.
    fn rebuild(&mut self, kind: WatchType) {
        match kind {
            WatchType::ReadMem | WatchType::WriteMem => {
                let mut table = Box::new([LineBits::default(); CACHE_LINE_NUM]);
                for w in self.watch_points.iter().filter(|w| w.kind == kind) {
                    for address in w.begin..=w.end {
                        table[(address >> 8) as usize].set(address as u8);
                    }
                }
                if kind == WatchType::ReadMem {
                    self.read_mem = table;
                } else {
                    self.write_mem = table;
                }
            }
            WatchType::ReadIo | WatchType::WriteIo => {
                let mut bits = LineBits::default();
                for w in self.watch_points.iter().filter(|w| w.kind == kind) {
                    for port in w.begin..=w.end {
                        bits.set(port as u8);
                    }
                }
                if kind == WatchType::ReadIo {
                    self.read_io = bits;
                } else {
                    self.write_io = bits;
                }
            }
        }
    }

    pub fn mem_watched(&self, access: Access, address: u16) -> bool {
        let table = match access {
            Access::Read => &self.read_mem,
            Access::Write => &self.write_mem,
        };
        table[(address >> 8) as usize].get(address as u8)
    }

    pub fn region_watched(&self, access: Access, region: usize) -> bool {
        match access {
            Access::Read => self.read_mem[region].any(),
            Access::Write => self.write_mem[region].any(),
        }
    }

    pub fn io_watched(&self, direction: Direction, port: u8) -> bool {
        match direction {
            Direction::In => self.read_io.get(port),
            Direction::Out => self.write_io.get(port),
        }
    }

    /// Copy of the watchpoints of `kind` covering `address`, in registration order.
    pub fn matching(&self, kind: WatchType, address: u16) -> Vec<(WatchPointId, Trigger)> {
        self.watch_points
            .iter()
            .filter(|w| w.kind == kind && w.covers(address))
            .map(|w| (w.id, w.trigger.clone()))
            .collect()
    }
}
