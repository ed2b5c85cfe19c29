//! Composite devices created by the bus when several devices share one
//! 16KB page or one I/O port.

use crate::{
    cache_line::CACHE_LINE_LOW,
    device::DeviceId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRange {
    pub device: DeviceId,
    pub base: u16,
    pub size: u32,
}

impl MemRange {
    pub fn contains(&self, address: u16) -> bool {
        (address as u32).wrapping_sub(self.base as u32) < self.size
    }

    fn overlaps(&self, base: u16, size: u32) -> bool {
        let (a0, a1) = (self.base as u32, self.base as u32 + self.size);
        let (b0, b1) = (base as u32, base as u32 + size);
        a0 < b1 && b0 < a1
    }
}

/// Devices occupying less than a full page, sharing that page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiMem {
    ranges: Vec<MemRange>,
}

impl MultiMem {
    pub fn new() -> Self {
        Self::default()
    }

    /// The member whose range collides with `base..base+size`, if any.
    pub fn overlapping(&self, base: u16, size: u32) -> Option<&MemRange> {
        self.ranges.iter().find(|r| r.overlaps(base, size))
    }

    pub fn can_add(&self, base: u16, size: u32) -> bool {
        self.overlapping(base, size).is_none()
    }

    pub fn add(&mut self, device: DeviceId, base: u16, size: u32) {
        debug_assert!(self.can_add(base, size));
        self.ranges.push(MemRange { device, base, size });
    }

    pub fn remove(&mut self, device: DeviceId, base: u16, size: u32) {
        let index = self
            .ranges
            .iter()
            .position(|r| r.device == device && r.base == base && r.size == size);
        assert!(
            index.is_some(),
            "device {device} not registered at {base:#06X}+{size:#X}"
        );
        if let Some(index) = index {
            self.ranges.remove(index);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[MemRange] {
        &self.ranges
    }

    /// Distinct member devices in registration order.
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut result: Vec<DeviceId> = Vec::with_capacity(self.ranges.len());
        for range in &self.ranges {
            if !result.contains(&range.device) {
                result.push(range.device);
            }
        }
        result
    }

    pub fn search(&self, address: u16) -> DeviceId {
        self.ranges
            .iter()
            .find(|r| r.contains(address))
            .map_or(DeviceId::DUMMY, |r| r.device)
    }

    /// Device that owns the whole cache line at `start`, or `None` when the
    /// line is split between members (or between a member and a hole).
    pub fn cache_line_owner(&self, start: u16) -> Option<DeviceId> {
        let end = start | CACHE_LINE_LOW;
        let first = self.search(start);
        if first != self.search(end) {
            return None;
        }
        if first.is_dummy() && self.overlapping(start, CACHE_LINE_LOW as u32 + 1).is_some() {
            return None;
        }
        match self.ranges.iter().find(|r| r.contains(start)) {
            Some(range) if !range.contains(end) => None,
            _ => Some(first),
        }
    }
}

/// Devices bound to the same I/O port, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiIo {
    devices: Vec<DeviceId>,
}

impl MultiIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, device: DeviceId) {
        self.devices.push(device);
    }

    pub fn remove(&mut self, device: DeviceId) {
        let index = self.devices.iter().position(|&d| d == device);
        assert!(index.is_some(), "device {device} not bound to this port");
        if let Some(index) = index {
            self.devices.remove(index);
        }
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn last(&self) -> DeviceId {
        self.devices.last().copied().unwrap_or(DeviceId::DUMMY)
    }
}
