use tracing::trace;

use crate::{
    bus::{BusMessage, MessageQueue},
    device::{Device, EmuTime},
};

/// The slot-select half of the MSX PPI on ports 0xA8-0xAB.
///
/// Port A selects the primary slot of each page; port C and its bit
/// set/reset control on 0xAB are latched.
#[derive(Debug)]
pub struct Ppi {
    queue: MessageQueue,
    pub primary_slot_config: u8,
    register_c: u8,
}

impl Ppi {
    pub fn new(queue: MessageQueue) -> Self {
        Ppi {
            queue,
            primary_slot_config: 0,
            register_c: 0x50, // Motor and CapsLed = 1 means OFF
        }
    }

    pub fn register_c(&self) -> u8 {
        self.register_c
    }

    fn set_primary_slots(&mut self, value: u8) {
        self.primary_slot_config = value;
        self.queue
            .borrow_mut()
            .push_back(BusMessage::SetPrimarySlots(value));
    }
}

impl Device for Ppi {
    fn name(&self) -> &str {
        "PPI"
    }

    fn reset(&mut self, _time: EmuTime) {
        self.register_c = 0x50;
        self.set_primary_slots(0);
    }

    fn peek_io(&self, port: u16, _time: EmuTime) -> u8 {
        match port & 0x03 {
            0 => self.primary_slot_config,
            2 => self.register_c,
            _ => 0xFF,
        }
    }

    fn read_io(&mut self, port: u16, time: EmuTime) -> u8 {
        let value = self.peek_io(port, time);
        trace!("[PPI] [RD] [{:02X}] = {:02X}", port as u8, value);
        value
    }

    fn write_io(&mut self, port: u16, value: u8, _time: EmuTime) {
        match port & 0x03 {
            0 => {
                trace!("[PPI] [WR] [PrimarySlot] = {:02X}", value);
                self.set_primary_slots(value);
            }
            2 => self.register_c = value,
            3 => {
                let bit = (value & 0x0e) >> 1;
                trace!("[PPI] [WR] [Port AB    ] = {:02X} bit {}", value, bit);
                if (value & 0x01) == 0 {
                    self.register_c &= !(1 << bit);
                } else {
                    self.register_c |= 1 << bit;
                }
            }
            _ => (),
        }
    }
}
