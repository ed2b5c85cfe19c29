use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    cpu::CpuInterface,
    device::{DeviceArena, DeviceId, EmuTime, Node},
    multi::MultiIo,
};

pub const NUM_PORTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// Ports whose accesses must be spaced at least `min_gap` ticks apart
/// (the VDP on fast CPUs). Sits in front of whatever is bound there.
#[derive(Debug, Clone)]
pub struct IoDelay {
    ports: RangeInclusive<u8>,
    min_gap: EmuTime,
    last_time: Option<EmuTime>,
    input: Vec<DeviceId>,
    output: Vec<DeviceId>,
}

impl IoDelay {
    pub fn new(ports: RangeInclusive<u8>, min_gap: EmuTime) -> Self {
        let count = ports.clone().count();
        Self {
            ports,
            min_gap,
            last_time: None,
            input: vec![DeviceId::DUMMY; count],
            output: vec![DeviceId::DUMMY; count],
        }
    }

    pub fn covers(&self, port: u8) -> bool {
        self.ports.contains(&port)
    }

    fn inner(&mut self, port: u8, direction: Direction) -> &mut DeviceId {
        let index = (port - self.ports.start()) as usize;
        match direction {
            Direction::In => &mut self.input[index],
            Direction::Out => &mut self.output[index],
        }
    }

    /// Time at which an access issued at `time` actually happens.
    fn access_time(&mut self, time: EmuTime, cpu: &mut dyn CpuInterface) -> EmuTime {
        let time = match self.last_time.map(|last| last.saturating_add(self.min_gap)) {
            Some(earliest) if earliest > time => {
                cpu.wait(earliest);
                earliest
            }
            _ => time,
        };
        self.last_time = Some(time);
        time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortEntry {
    Device(DeviceId),
    Delayed,
}

/// 256 input and 256 output port bindings.
#[derive(Debug, Clone)]
pub struct IoPortBus {
    input: [PortEntry; NUM_PORTS],
    output: [PortEntry; NUM_PORTS],
    delay: Option<IoDelay>,
}

impl Default for IoPortBus {
    fn default() -> Self {
        Self::new()
    }
}

impl IoPortBus {
    pub fn new() -> Self {
        Self {
            input: [PortEntry::Device(DeviceId::DUMMY); NUM_PORTS],
            output: [PortEntry::Device(DeviceId::DUMMY); NUM_PORTS],
            delay: None,
        }
    }

    /// Puts a delay wrapper in front of `delay`'s ports, keeping the
    /// devices already bound there behind it.
    pub fn install_delay(&mut self, mut delay: IoDelay) {
        assert!(self.delay.is_none(), "I/O delay already installed");
        for port in delay.ports.clone() {
            for direction in [Direction::In, Direction::Out] {
                let entry = &mut self.table_mut(direction)[port as usize];
                if let PortEntry::Device(id) = *entry {
                    *delay.inner(port, direction) = id;
                }
                *entry = PortEntry::Delayed;
            }
        }
        debug!("[IO] Delay installed on ports {:02X?}", delay.ports);
        self.delay = Some(delay);
    }

    fn table(&self, direction: Direction) -> &[PortEntry; NUM_PORTS] {
        match direction {
            Direction::In => &self.input,
            Direction::Out => &self.output,
        }
    }

    fn table_mut(&mut self, direction: Direction) -> &mut [PortEntry; NUM_PORTS] {
        match direction {
            Direction::In => &mut self.input,
            Direction::Out => &mut self.output,
        }
    }

    /// Binding at the end of the chain for `port`, looking through the delay wrapper.
    fn chain_tail(&mut self, port: u8, direction: Direction) -> &mut DeviceId {
        let table = match direction {
            Direction::In => &mut self.input,
            Direction::Out => &mut self.output,
        };
        match &mut table[port as usize] {
            PortEntry::Device(id) => id,
            PortEntry::Delayed => self
                .delay
                .as_mut()
                .expect("delayed port without delay device")
                .inner(port, direction),
        }
    }

    pub fn binding(&self, port: u8, direction: Direction) -> DeviceId {
        match self.table(direction)[port as usize] {
            PortEntry::Device(id) => id,
            PortEntry::Delayed => {
                let delay = self.delay.as_ref().expect("delayed port without delay device");
                let index = (port - delay.ports.start()) as usize;
                match direction {
                    Direction::In => delay.input[index],
                    Direction::Out => delay.output[index],
                }
            }
        }
    }

    pub fn is_delayed(&self, port: u8, direction: Direction) -> bool {
        self.table(direction)[port as usize] == PortEntry::Delayed
    }

    /// Device to dispatch to and the (possibly delayed) access time.
    pub(crate) fn resolve(
        &mut self,
        port: u8,
        direction: Direction,
        time: EmuTime,
        cpu: &mut dyn CpuInterface,
    ) -> (DeviceId, EmuTime) {
        let entry = self.table(direction)[port as usize];
        let time = match (&mut self.delay, entry) {
            (Some(delay), PortEntry::Delayed) => delay.access_time(time, cpu),
            _ => time,
        };
        (self.binding(port, direction), time)
    }

    pub fn register(
        &mut self,
        arena: &mut DeviceArena,
        port: u8,
        device: DeviceId,
        direction: Direction,
    ) {
        debug!(
            "[IO] {} registers {:?}-port {:02X}",
            arena.name(device),
            direction,
            port
        );
        let slot = self.chain_tail(port, direction);
        if slot.is_dummy() {
            // first, replace the dummy
            *slot = device;
            return;
        }
        match arena.node_mut(*slot) {
            // third or more
            Node::MultiIo(multi) => multi.add(device),
            _ => {
                // second, wrap both in a composite
                let mut multi = MultiIo::new();
                multi.add(*slot);
                multi.add(device);
                *slot = arena.alloc(Node::MultiIo(multi));
            }
        }
        if direction == Direction::In {
            warn!(
                "Conflicting input port 0x{:02X} for devices {}",
                port,
                arena.name(*slot)
            );
        }
    }

    pub fn unregister(
        &mut self,
        arena: &mut DeviceArena,
        port: u8,
        device: DeviceId,
        direction: Direction,
    ) {
        let slot = self.chain_tail(port, direction);
        let remaining = match arena.node_mut(*slot) {
            Node::MultiIo(multi) => {
                multi.remove(device);
                (multi.len() == 1).then(|| multi.last())
            }
            _ => {
                assert_eq!(*slot, device, "device not bound to port {port:02X}");
                *slot = DeviceId::DUMMY;
                None
            }
        };
        if let Some(last) = remaining {
            // only one left, drop the composite
            arena.release(*slot);
            *slot = last;
        }
    }

    /// Whether `device` is still bound to any port.
    pub fn references(&self, arena: &DeviceArena, device: DeviceId) -> bool {
        (0..NUM_PORTS).any(|port| {
            [Direction::In, Direction::Out].into_iter().any(|direction| {
                let id = self.binding(port as u8, direction);
                id == device
                    || matches!(arena.node(id), Node::MultiIo(multi) if multi.devices().contains(&device))
            })
        })
    }
}
