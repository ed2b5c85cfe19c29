use crate::{
    bus::DebugBus,
    error::{BusError, BusResult},
    io_bus::{Direction, NUM_PORTS},
    slot::{NUM_PAGES, NUM_SLOTS},
};

/// Introspection queries for the debugger console. Unlike the bus itself,
/// these reject a secondary slot on a primary slot that is not expanded.
impl DebugBus {
    /// Names of the devices at `primary.secondary`, page `page`.
    pub fn slot_info(&self, primary: u32, secondary: u32, page: u32) -> BusResult<String> {
        let invalid = BusError::InvalidSlotAddress {
            primary: primary as u8,
            secondary: secondary as u8,
            page: page as u8,
        };
        if primary as usize >= NUM_SLOTS
            || secondary as usize >= NUM_SLOTS
            || page as usize >= NUM_PAGES
        {
            return Err(invalid);
        }
        if secondary != 0 && !self.is_expanded(primary as u8) {
            return Err(invalid);
        }
        let device = self.device_at(primary as u8, secondary as u8, page as usize);
        Ok(self.device_name(device))
    }

    pub fn is_sub_slotted(&self, primary: u32) -> BusResult<bool> {
        if primary as usize >= NUM_SLOTS {
            return Err(BusError::InvalidSlotAddress {
                primary: primary as u8,
                secondary: 0,
                page: 0,
            });
        }
        Ok(self.is_expanded(primary as u8))
    }

    /// Names of the devices bound to `port`, looking through any delay wrapper.
    pub fn io_port_info(&self, port: u32, direction: Direction) -> BusResult<String> {
        if port as usize >= NUM_PORTS {
            return Err(BusError::InvalidPort(port));
        }
        Ok(self.device_name(self.io_binding(port as u8, direction)))
    }
}
