use crate::{
    cache_line::region_of,
    device::DeviceId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalWrite {
    pub device: DeviceId,
    pub address: u16,
}

/// Devices that snoop writes to fixed addresses regardless of slot selection.
#[derive(Debug, Clone, Default)]
pub struct GlobalWriteRegistry {
    entries: Vec<GlobalWrite>,
}

impl GlobalWriteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, device: DeviceId, address: u16) {
        self.entries.push(GlobalWrite { device, address });
    }

    /// Returns true when no other entry remains in the same 256 byte region.
    pub fn unregister(&mut self, device: DeviceId, address: u16) -> bool {
        let index = self
            .entries
            .iter()
            .position(|g| g.device == device && g.address == address);
        assert!(
            index.is_some(),
            "global write {address:#06X} not registered for {device}"
        );
        if let Some(index) = index {
            self.entries.remove(index);
        }
        !self.covers_region(region_of(address))
    }

    pub fn covers_region(&self, region: usize) -> bool {
        self.entries.iter().any(|g| region_of(g.address) == region)
    }

    /// Devices watching `address`, in registration order.
    pub fn matching(&self, address: u16) -> Vec<DeviceId> {
        self.entries
            .iter()
            .filter(|g| g.address == address)
            .map(|g| g.device)
            .collect()
    }

    pub fn entries(&self) -> &[GlobalWrite] {
        &self.entries
    }
}
