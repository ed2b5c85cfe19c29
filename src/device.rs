use std::fmt::{self, Debug};

use crate::{
    cache_line::CACHE_LINE_SIZE,
    multi::{MultiIo, MultiMem},
};

/// Emulated time in master clock ticks.
pub type EmuTime = u64;

/// Value seen on the data bus when nothing drives it.
pub const IDLE_BYTE: u8 = 0xFF;

static UNMAPPED_READ: [u8; CACHE_LINE_SIZE] = [IDLE_BYTE; CACHE_LINE_SIZE];

/// Anything that can sit in a slot or on an I/O port.
///
/// Every method has a default that behaves like an unconnected bus, so a
/// device only implements the capabilities it actually has.
pub trait Device: Debug {
    fn name(&self) -> &str;

    fn reset(&mut self, _time: EmuTime) {}

    fn read_mem(&mut self, address: u16, time: EmuTime) -> u8 {
        self.peek_mem(address, time)
    }

    /// Side-effect free read, used by debuggers and memory dumps.
    fn peek_mem(&self, _address: u16, _time: EmuTime) -> u8 {
        IDLE_BYTE
    }

    fn write_mem(&mut self, _address: u16, _value: u8, _time: EmuTime) {}

    fn read_io(&mut self, port: u16, time: EmuTime) -> u8 {
        self.peek_io(port, time)
    }

    fn peek_io(&self, _port: u16, _time: EmuTime) -> u8 {
        IDLE_BYTE
    }

    fn write_io(&mut self, _port: u16, _value: u8, _time: EmuTime) {}

    /// Write seen at a registered global-write address, whatever slot is selected.
    fn global_write(&mut self, _address: u16, _value: u8, _time: EmuTime) {}

    /// Raw backing storage for the 256 byte line starting at `start`, if
    /// reading it has no side effects.
    fn read_cache_line(&self, _start: u16) -> Option<&[u8]> {
        None
    }

    fn write_cache_line(&mut self, _start: u16) -> Option<&mut [u8]> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeviceId(pub(crate) usize);

impl DeviceId {
    /// The sentinel occupying every unmapped page and port.
    pub const DUMMY: DeviceId = DeviceId(0);

    pub fn is_dummy(self) -> bool {
        self == Self::DUMMY
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) enum Node {
    Dummy,
    Device(Box<dyn Device>),
    MultiMem(MultiMem),
    MultiIo(MultiIo),
    Free,
}

/// Owns every device on the bus, including the composites the bus creates
/// when several devices share a page or a port.
pub struct DeviceArena {
    nodes: Vec<Node>,
    free: Vec<usize>,
}

impl Default for DeviceArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for DeviceArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_map();
        for (index, node) in self.nodes.iter().enumerate() {
            if !matches!(node, Node::Free) {
                list.entry(&index, &self.name(DeviceId(index)));
            }
        }
        list.finish()
    }
}

impl DeviceArena {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::Dummy],
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, device: Box<dyn Device>) -> DeviceId {
        self.alloc(Node::Device(device))
    }

    /// Takes a plain device back out of the arena. The caller must already
    /// have unregistered it from every slot and port.
    pub fn remove(&mut self, id: DeviceId) -> Option<Box<dyn Device>> {
        match self.nodes.get(id.0) {
            Some(Node::Device(_)) => {}
            _ => return None,
        }
        match std::mem::replace(&mut self.nodes[id.0], Node::Free) {
            Node::Device(device) => {
                self.free.push(id.0);
                Some(device)
            }
            _ => None,
        }
    }

    pub fn get(&self, id: DeviceId) -> Option<&dyn Device> {
        match self.nodes.get(id.0) {
            Some(Node::Device(device)) => Some(device.as_ref()),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut (dyn Device + 'static)> {
        match self.nodes.get_mut(id.0) {
            Some(Node::Device(device)) => Some(device.as_mut()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    pub(crate) fn alloc(&mut self, node: Node) -> DeviceId {
        if let Some(index) = self.free.pop() {
            self.nodes[index] = node;
            DeviceId(index)
        } else {
            self.nodes.push(node);
            DeviceId(self.nodes.len() - 1)
        }
    }

    /// Frees a composite node once nothing points at it anymore.
    pub(crate) fn release(&mut self, id: DeviceId) {
        debug_assert!(matches!(
            self.nodes[id.0],
            Node::MultiMem(_) | Node::MultiIo(_)
        ));
        self.nodes[id.0] = Node::Free;
        self.free.push(id.0);
    }

    pub(crate) fn node(&self, id: DeviceId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: DeviceId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub(crate) fn multi_mem(&self, id: DeviceId) -> Option<&MultiMem> {
        match self.node(id) {
            Node::MultiMem(multi) => Some(multi),
            _ => None,
        }
    }

    pub fn name(&self, id: DeviceId) -> String {
        self.name_list(id).join(" ")
    }

    /// Names of the real devices behind `id`, expanding composites.
    pub fn name_list(&self, id: DeviceId) -> Vec<String> {
        match self.nodes.get(id.0) {
            Some(Node::Dummy) => vec!["empty".to_string()],
            Some(Node::Device(device)) => vec![device.name().to_string()],
            Some(Node::MultiMem(multi)) => multi
                .devices()
                .into_iter()
                .map(|member| self.name(member))
                .collect(),
            Some(Node::MultiIo(multi)) => multi
                .devices()
                .iter()
                .map(|&member| self.name(member))
                .collect(),
            Some(Node::Free) | None => vec![],
        }
    }

    /// Leaf device that answers `address` inside a (possibly composite) page binding.
    fn resolve_mem(&self, id: DeviceId, address: u16) -> DeviceId {
        match self.node(id) {
            Node::MultiMem(multi) => multi.search(address),
            _ => id,
        }
    }

    pub(crate) fn read_mem(&mut self, id: DeviceId, address: u16, time: EmuTime) -> u8 {
        let id = self.resolve_mem(id, address);
        match self.node_mut(id) {
            Node::Device(device) => device.read_mem(address, time),
            _ => IDLE_BYTE,
        }
    }

    pub(crate) fn peek_mem(&self, id: DeviceId, address: u16, time: EmuTime) -> u8 {
        match self.node(self.resolve_mem(id, address)) {
            Node::Device(device) => device.peek_mem(address, time),
            _ => IDLE_BYTE,
        }
    }

    pub(crate) fn write_mem(&mut self, id: DeviceId, address: u16, value: u8, time: EmuTime) {
        let id = self.resolve_mem(id, address);
        if let Node::Device(device) = self.node_mut(id) {
            device.write_mem(address, value, time);
        }
    }

    pub(crate) fn global_write(&mut self, id: DeviceId, address: u16, value: u8, time: EmuTime) {
        if let Node::Device(device) = self.node_mut(id) {
            device.global_write(address, value, time);
        }
    }

    pub(crate) fn read_cache_line(&self, id: DeviceId, start: u16) -> Option<&[u8]> {
        let id = match self.node(id) {
            Node::MultiMem(multi) => multi.cache_line_owner(start)?,
            _ => id,
        };
        match self.node(id) {
            Node::Dummy => Some(&UNMAPPED_READ[..]),
            Node::Device(device) => device.read_cache_line(start),
            _ => None,
        }
    }

    pub(crate) fn write_cache_line(&mut self, id: DeviceId, start: u16) -> Option<&mut [u8]> {
        let id = match self.node(id) {
            Node::MultiMem(multi) => multi.cache_line_owner(start)?,
            _ => id,
        };
        match self.node_mut(id) {
            Node::Device(device) => device.write_cache_line(start),
            _ => None,
        }
    }

    /// Every member of a shared port sees the read; the last one registered wins.
    pub(crate) fn read_io(&mut self, id: DeviceId, port: u16, time: EmuTime) -> u8 {
        let members = match self.node(id) {
            Node::MultiIo(multi) => multi.devices().to_vec(),
            _ => vec![id],
        };
        let mut value = IDLE_BYTE;
        for member in members {
            if let Node::Device(device) = self.node_mut(member) {
                value = device.read_io(port, time);
            }
        }
        value
    }

    pub(crate) fn peek_io(&self, id: DeviceId, port: u16, time: EmuTime) -> u8 {
        let id = match self.node(id) {
            Node::MultiIo(multi) => multi.last(),
            _ => id,
        };
        match self.node(id) {
            Node::Device(device) => device.peek_io(port, time),
            _ => IDLE_BYTE,
        }
    }

    pub(crate) fn write_io(&mut self, id: DeviceId, port: u16, value: u8, time: EmuTime) {
        let members = match self.node(id) {
            Node::MultiIo(multi) => multi.devices().to_vec(),
            _ => vec![id],
        };
        for member in members {
            if let Node::Device(device) = self.node_mut(member) {
                device.write_io(port, value, time);
            }
        }
    }

    pub(crate) fn reset_all(&mut self, time: EmuTime) {
        for node in &mut self.nodes {
            if let Node::Device(device) = node {
                device.reset(time);
            }
        }
    }
}
