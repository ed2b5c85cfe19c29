use std::fmt;

use crate::device::EmuTime;

/// What the bus needs from the CPU core that drives it.
pub trait CpuInterface {
    /// Drop cached translations for `start..start+size`.
    fn invalidate_mem_cache(&mut self, start: u16, size: u32);

    /// Page `page` now shows slot `primary.secondary` (or another device in it).
    fn update_visible_page(&mut self, page: usize, _primary: u8, _secondary: u8) {
        self.invalidate_mem_cache((page as u16) << 14, 0x4000);
    }

    /// Leave the execution loop at the next instruction boundary.
    fn exit_cpu_loop_sync(&mut self);

    /// Stall the CPU until `until`.
    fn wait(&mut self, until: EmuTime);
}

/// Receives a call whenever the set of visible devices or the fast-path mask changes.
pub trait Scheduler {
    fn bus_changed(&mut self);
}

/// CPU stand-in for hosts that drive the bus directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCpu;

impl CpuInterface for NullCpu {
    fn invalidate_mem_cache(&mut self, _start: u16, _size: u32) {}

    fn exit_cpu_loop_sync(&mut self) {}

    fn wait(&mut self, _until: EmuTime) {}
}

impl fmt::Debug for dyn CpuInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CpuInterface")
    }
}

impl fmt::Debug for dyn Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Scheduler")
    }
}
