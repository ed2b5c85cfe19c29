use std::{cell::RefCell, collections::VecDeque, ops::RangeInclusive, rc::Rc};

use tracing::{debug, trace};

use crate::{
    address_space::{AddressSpace, LayoutChange},
    breakpoint::{BreakpointEngine, DebugEvent, RunControl},
    cache_line::{
        region_of, region_start, Access, CacheLineMask, DisallowReason, MaskSnapshot,
        CACHE_LINE_HIGH, CACHE_LINE_LOW, CACHE_LINE_NUM, CACHE_LINE_SIZE,
    },
    cpu::{CpuInterface, NullCpu, Scheduler},
    device::{Device, DeviceArena, DeviceId, EmuTime},
    error::BusResult,
    global_write::GlobalWriteRegistry,
    io_bus::{Direction, IoDelay, IoPortBus},
    script::{Interpreter, Variables},
    slot::{page_of, SlotAddress, SlotState, NUM_PAGES, SUB_SLOT_REGISTER_ADDRESS},
    watchpoint::{WatchType, WatchpointEngine},
};

/// Side effects a device asks the bus for. Queued during the device access
/// and applied before the bus call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMessage {
    SetPrimarySlots(u8),
    SetSubSlot { primary: u8, value: u8 },
    InvalidateMemCache { start: u16, size: u32 },
    Break,
}

pub type MessageQueue = Rc<RefCell<VecDeque<BusMessage>>>;

/// Everything between the CPU core and the devices of one machine: slot
/// layout, I/O ports, fast-path mask and the debugger state layered on top.
#[derive(Debug)]
pub struct DebugBus {
    pub(crate) devices: DeviceArena,
    pub(crate) space: AddressSpace,
    pub(crate) io: IoPortBus,
    pub(crate) mask: CacheLineMask,
    pub(crate) global_writes: GlobalWriteRegistry,
    pub(crate) watches: WatchpointEngine,
    pub(crate) breaks: BreakpointEngine,
    pub(crate) run: RunControl,
    pub(crate) events: VecDeque<DebugEvent>,
    pub(crate) cpu: Box<dyn CpuInterface>,
    scheduler: Option<Box<dyn Scheduler>>,
    pub(crate) interpreter: Box<dyn Interpreter>,
    queue: MessageQueue,
}

impl Default for DebugBus {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugBus {
    pub fn new() -> Self {
        Self {
            devices: DeviceArena::new(),
            space: AddressSpace::new(),
            io: IoPortBus::new(),
            mask: CacheLineMask::new(),
            global_writes: GlobalWriteRegistry::new(),
            watches: WatchpointEngine::new(),
            breaks: BreakpointEngine::new(),
            run: RunControl::default(),
            events: VecDeque::new(),
            cpu: Box::new(NullCpu),
            scheduler: None,
            interpreter: Box::new(Variables::new()),
            queue: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    pub fn with_cpu(mut self, cpu: Box<dyn CpuInterface>) -> Self {
        self.cpu = cpu;
        self
    }

    pub fn set_cpu(&mut self, cpu: Box<dyn CpuInterface>) {
        self.cpu = cpu;
    }

    pub fn set_scheduler(&mut self, scheduler: Box<dyn Scheduler>) {
        self.scheduler = Some(scheduler);
    }

    pub fn set_interpreter(&mut self, interpreter: Box<dyn Interpreter>) {
        self.interpreter = interpreter;
    }

    pub fn interpreter(&self) -> &dyn Interpreter {
        self.interpreter.as_ref()
    }

    pub fn interpreter_mut(&mut self) -> &mut dyn Interpreter {
        self.interpreter.as_mut()
    }

    /// Queue devices use to request slot switches and other bus side effects.
    pub fn message_queue(&self) -> MessageQueue {
        self.queue.clone()
    }

    // Devices

    pub fn add_device(&mut self, device: Box<dyn Device>) -> DeviceId {
        self.devices.insert(device)
    }

    /// Takes a device off the bus. It must be unregistered everywhere first.
    pub fn remove_device(&mut self, id: DeviceId) -> Option<Box<dyn Device>> {
        debug_assert!(
            !self.space.references(&self.devices, id) && !self.io.references(&self.devices, id),
            "device {} removed while still registered",
            self.devices.name(id)
        );
        self.devices.remove(id)
    }

    pub fn device(&self, id: DeviceId) -> Option<&dyn Device> {
        self.devices.get(id)
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut (dyn Device + 'static)> {
        self.devices.get_mut(id)
    }

    pub fn device_name(&self, id: DeviceId) -> String {
        self.devices.name(id)
    }

    pub fn devices(&self) -> &DeviceArena {
        &self.devices
    }

    // Collaborator notifications

    fn notify_scheduler(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.bus_changed();
        }
    }

    fn apply(&mut self, change: LayoutChange) {
        for page in 0..NUM_PAGES {
            if change.pages & (1 << page) != 0 {
                self.cpu.update_visible_page(
                    page,
                    self.space.primary_slot(page),
                    self.space.secondary_slot(page),
                );
            }
        }
        let toggled = change
            .expansion
            .is_some_and(|expanded| self.change_expanded(expanded));
        if change.pages != 0 || toggled {
            self.notify_scheduler();
        }
    }

    /// Routes 0xFF00-0xFFFF through the slow path while 0xFFFF is a sub-slot register.
    fn change_expanded(&mut self, expanded: bool) -> bool {
        let region = region_of(SUB_SLOT_REGISTER_ADDRESS);
        let read = self
            .mask
            .set(Access::Read, region, DisallowReason::SUB_SLOT_REGISTER, expanded);
        let write = self
            .mask
            .set(Access::Write, region, DisallowReason::SUB_SLOT_REGISTER, expanded);
        if read || write {
            self.cpu
                .invalidate_mem_cache(region_start(region), CACHE_LINE_SIZE as u32);
        }
        read || write
    }

    /// Drops CPU translations for every region flagged in `toggled`,
    /// merging neighbouring regions into one call.
    pub(crate) fn invalidate_regions(&mut self, toggled: &[bool; CACHE_LINE_NUM]) {
        let mut region = 0;
        let mut any = false;
        while region < CACHE_LINE_NUM {
            if !toggled[region] {
                region += 1;
                continue;
            }
            let start = region;
            while region < CACHE_LINE_NUM && toggled[region] {
                region += 1;
            }
            self.cpu.invalidate_mem_cache(
                region_start(start),
                ((region - start) * CACHE_LINE_SIZE) as u32,
            );
            any = true;
        }
        if any {
            self.notify_scheduler();
        }
    }

    fn invalidate_region(&mut self, region: usize) {
        self.cpu
            .invalidate_mem_cache(region_start(region), CACHE_LINE_SIZE as u32);
        self.notify_scheduler();
    }

    pub(crate) fn process_messages(&mut self) {
        loop {
            let message = self.queue.borrow_mut().pop_front();
            let Some(message) = message else { break };
            trace!("[BUS] {:?}", message);
            match message {
                BusMessage::SetPrimarySlots(value) => self.set_primary_slots(value),
                BusMessage::SetSubSlot { primary, value } => self.set_sub_slot(primary, value),
                BusMessage::InvalidateMemCache { start, size } => {
                    self.cpu.invalidate_mem_cache(start, size);
                    self.notify_scheduler();
                }
                BusMessage::Break => self.do_break(),
            }
        }
    }

    // Slot layout

    pub fn register_mem_device(
        &mut self,
        device: DeviceId,
        primary: u8,
        secondary: u8,
        base: u16,
        size: u32,
    ) -> BusResult<()> {
        let change = self.space.register_mem_device(
            &mut self.devices,
            device,
            primary,
            secondary,
            base,
            size,
        )?;
        self.apply(change);
        Ok(())
    }

    pub fn unregister_mem_device(
        &mut self,
        device: DeviceId,
        primary: u8,
        secondary: u8,
        base: u16,
        size: u32,
    ) {
        let change = self.space.unregister_mem_device(
            &mut self.devices,
            device,
            primary,
            secondary,
            base,
            size,
        );
        self.apply(change);
    }

    pub fn set_expanded(&mut self, primary: u8) -> BusResult<()> {
        let change = self.space.set_expanded(primary)?;
        self.apply(change);
        Ok(())
    }

    /// Drops one expansion request. Every device in the slot's secondary
    /// slots must have been unregistered when the last request goes away.
    pub fn unset_expanded(&mut self, primary: u8) {
        let change = self.space.unset_expanded(&self.devices, primary);
        self.apply(change);
    }

    pub fn test_unset_expanded(&self, primary: u8, allowed: &[DeviceId]) -> BusResult<()> {
        self.space.test_unset_expanded(&self.devices, primary, allowed)
    }

    pub fn is_expanded(&self, primary: u8) -> bool {
        self.space.is_expanded(primary)
    }

    pub fn set_primary_slots(&mut self, value: u8) {
        let change = self.space.set_primary_slots(value);
        self.apply(change);
    }

    pub fn primary_slots(&self) -> u8 {
        self.space.primary_slots()
    }

    pub fn set_sub_slot(&mut self, primary: u8, value: u8) {
        let change = self.space.set_sub_slot(primary, value);
        self.apply(change);
    }

    pub fn sub_slot_register(&self, primary: u8) -> u8 {
        self.space.sub_slot_register(primary)
    }

    pub fn primary_slot(&self, page: usize) -> u8 {
        self.space.primary_slot(page)
    }

    pub fn secondary_slot(&self, page: usize) -> u8 {
        self.space.secondary_slot(page)
    }

    pub fn visible_device(&self, page: usize) -> DeviceId {
        self.space.visible(page)
    }

    pub fn device_at(&self, primary: u8, secondary: u8, page: usize) -> DeviceId {
        self.space.device_at(primary, secondary, page)
    }

    pub fn slot_state(&self) -> SlotState {
        self.space.state()
    }

    pub fn restore_slot_state(&mut self, state: &SlotState) {
        let change = self.space.restore(state);
        self.apply(change);
    }

    pub fn reset(&mut self, time: EmuTime) {
        debug!("[BUS] Reset");
        let change = self.space.reset();
        self.apply(change);
        self.devices.reset_all(time);
        self.process_messages();
    }

    // Memory

    pub fn cache_mask(&self) -> &CacheLineMask {
        &self.mask
    }

    pub fn cache_mask_snapshot(&self) -> MaskSnapshot {
        self.mask.snapshot()
    }

    /// Raw storage behind the 256 byte line holding `address`, when the CPU
    /// may read it without going through the bus.
    pub fn read_cache_line(&self, address: u16) -> Option<&[u8]> {
        if !self.mask.read_allowed(address) {
            return None;
        }
        self.devices
            .read_cache_line(self.space.visible(page_of(address)), address & CACHE_LINE_HIGH)
    }

    pub fn write_cache_line(&mut self, address: u16) -> Option<&mut [u8]> {
        if !self.mask.write_allowed(address) {
            return None;
        }
        self.devices
            .write_cache_line(self.space.visible(page_of(address)), address & CACHE_LINE_HIGH)
    }

    pub fn read_mem(&mut self, address: u16, time: EmuTime) -> u8 {
        if let Some(line) = self.read_cache_line(address) {
            return line[(address & CACHE_LINE_LOW) as usize];
        }
        self.read_mem_slow(address, time)
    }

    pub fn write_mem(&mut self, address: u16, value: u8, time: EmuTime) {
        if let Some(line) = self.write_cache_line(address) {
            line[(address & CACHE_LINE_LOW) as usize] = value;
            return;
        }
        self.write_mem_slow(address, value, time);
    }

    fn read_mem_slow(&mut self, address: u16, time: EmuTime) -> u8 {
        // read watches fire before the actual read
        if !self.mask.read_allowed(address) && self.watches.mem_watched(Access::Read, address) {
            self.execute_watch(WatchType::ReadMem, address, None);
        }
        if address == SUB_SLOT_REGISTER_ADDRESS && self.space.sub_slot_register_visible() {
            return 0xFF ^ self.space.sub_slot_register(self.space.primary_slot(3));
        }
        let value = self
            .devices
            .read_mem(self.space.visible(page_of(address)), address, time);
        self.process_messages();
        value
    }

    fn write_mem_slow(&mut self, address: u16, value: u8, time: EmuTime) {
        if address == SUB_SLOT_REGISTER_ADDRESS && self.space.sub_slot_register_visible() {
            self.set_sub_slot(self.space.primary_slot(3), value);
        } else {
            self.devices
                .write_mem(self.space.visible(page_of(address)), address, value, time);
            self.process_messages();
        }

        if self.mask.write_allowed(address) {
            return;
        }
        for device in self.global_writes.matching(address) {
            self.devices.global_write(device, address, value, time);
        }
        self.process_messages();
        // write watches fire after the actual write
        if self.watches.mem_watched(Access::Write, address) {
            self.execute_watch(WatchType::WriteMem, address, Some(value));
        }
    }

    /// Reads without side effects and without triggering watchpoints.
    pub fn peek_mem(&self, address: u16, time: EmuTime) -> u8 {
        if address == SUB_SLOT_REGISTER_ADDRESS && self.space.sub_slot_register_visible() {
            return 0xFF ^ self.space.sub_slot_register(self.space.primary_slot(3));
        }
        self.devices
            .peek_mem(self.space.visible(page_of(address)), address, time)
    }

    /// Secondary slot is forced to 0 on slots that are not expanded.
    fn slotted(&self, linear: u32) -> (SlotAddress, bool) {
        let mut slot = SlotAddress::from_linear(linear);
        let expanded = self.space.is_expanded(slot.primary);
        if !expanded {
            slot.secondary = 0;
        }
        (slot, expanded && slot.address == SUB_SLOT_REGISTER_ADDRESS)
    }

    pub fn peek_slotted_mem(&self, linear: u32, time: EmuTime) -> u8 {
        let (slot, is_register) = self.slotted(linear);
        if is_register {
            return 0xFF ^ self.space.sub_slot_register(slot.primary);
        }
        let device = self.space.device_at(slot.primary, slot.secondary, slot.page());
        self.devices.peek_mem(device, slot.address, time)
    }

    pub fn read_slotted_mem(&mut self, linear: u32, time: EmuTime) -> u8 {
        let (slot, is_register) = self.slotted(linear);
        if is_register {
            return 0xFF ^ self.space.sub_slot_register(slot.primary);
        }
        let device = self.space.device_at(slot.primary, slot.secondary, slot.page());
        let value = self.devices.read_mem(device, slot.address, time);
        self.process_messages();
        value
    }

    pub fn write_slotted_mem(&mut self, linear: u32, value: u8, time: EmuTime) {
        let (slot, is_register) = self.slotted(linear);
        if is_register {
            self.set_sub_slot(slot.primary, value);
            return;
        }
        let device = self.space.device_at(slot.primary, slot.secondary, slot.page());
        self.devices.write_mem(device, slot.address, value, time);
        self.process_messages();
    }

    // Global writes

    pub fn register_global_write(&mut self, device: DeviceId, address: u16) {
        self.global_writes.register(device, address);
        let region = region_of(address);
        if self
            .mask
            .set(Access::Write, region, DisallowReason::GLOBAL_WRITE, true)
        {
            self.invalidate_region(region);
        }
    }

    pub fn unregister_global_write(&mut self, device: DeviceId, address: u16) {
        if !self.global_writes.unregister(device, address) {
            // another entry still shares this region
            return;
        }
        let region = region_of(address);
        if self
            .mask
            .set(Access::Write, region, DisallowReason::GLOBAL_WRITE, false)
        {
            self.invalidate_region(region);
        }
    }

    // I/O

    pub fn register_io_port(&mut self, port: u8, device: DeviceId, direction: Direction) {
        self.io.register(&mut self.devices, port, device, direction);
    }

    pub fn unregister_io_port(&mut self, port: u8, device: DeviceId, direction: Direction) {
        self.io.unregister(&mut self.devices, port, device, direction);
    }

    /// Puts an access-spacing wrapper in front of `ports`.
    pub fn install_io_delay(&mut self, ports: RangeInclusive<u8>, min_gap: EmuTime) {
        self.io.install_delay(IoDelay::new(ports, min_gap));
    }

    pub fn io_binding(&self, port: u8, direction: Direction) -> DeviceId {
        self.io.binding(port, direction)
    }

    pub fn read_io(&mut self, port: u16, time: EmuTime) -> u8 {
        let index = port as u8;
        if self.watches.io_watched(Direction::In, index) {
            self.execute_watch(WatchType::ReadIo, index as u16, None);
        }
        let (device, time) = self
            .io
            .resolve(index, Direction::In, time, self.cpu.as_mut());
        let value = self.devices.read_io(device, port, time);
        self.process_messages();
        value
    }

    pub fn write_io(&mut self, port: u16, value: u8, time: EmuTime) {
        let index = port as u8;
        let (device, time) = self
            .io
            .resolve(index, Direction::Out, time, self.cpu.as_mut());
        self.devices.write_io(device, port, value, time);
        self.process_messages();
        if self.watches.io_watched(Direction::Out, index) {
            self.execute_watch(WatchType::WriteIo, index as u16, Some(value));
        }
    }

    pub fn peek_io(&self, port: u16, time: EmuTime) -> u8 {
        let device = self.io.binding(port as u8, Direction::In);
        self.devices.peek_io(device, port, time)
    }
}
