use tracing::{debug, trace};

use crate::{
    device::{DeviceArena, DeviceId, Node},
    error::{BusError, BusResult, Conflict},
    multi::MultiMem,
    slot::{split_pages, SlotState, NUM_PAGES, NUM_SLOTS, PAGE_SIZE},
};

/// What a slot operation changed, so the owner can notify the CPU.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LayoutChange {
    /// Bit n set: page n now shows another slot or another device.
    pub pages: u8,
    /// New expansion state of the slot selected in page 3, when it flipped
    /// (or when it has to be re-asserted after an expander change).
    pub expansion: Option<bool>,
}

impl LayoutChange {
    pub fn merge(self, other: LayoutChange) -> LayoutChange {
        LayoutChange {
            pages: self.pages | other.pages,
            expansion: other.expansion.or(self.expansion),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pages == 0 && self.expansion.is_none()
    }
}

/// The 4x4x4 slot grid plus the slot select state of the CPU.
#[derive(Debug, Clone)]
pub struct AddressSpace {
    layout: [[[DeviceId; NUM_PAGES]; NUM_SLOTS]; NUM_SLOTS],
    primary_slot_state: [u8; NUM_PAGES],
    secondary_slot_state: [u8; NUM_PAGES],
    sub_slot_register: [u8; NUM_SLOTS],
    expanded: [u32; NUM_SLOTS],
    visible: [DeviceId; NUM_PAGES],
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace {
    pub fn new() -> Self {
        Self {
            layout: [[[DeviceId::DUMMY; NUM_PAGES]; NUM_SLOTS]; NUM_SLOTS],
            primary_slot_state: [0; NUM_PAGES],
            secondary_slot_state: [0; NUM_PAGES],
            sub_slot_register: [0; NUM_SLOTS],
            expanded: [0; NUM_SLOTS],
            visible: [DeviceId::DUMMY; NUM_PAGES],
        }
    }

    pub fn is_expanded(&self, primary: u8) -> bool {
        self.expanded
            .get(primary as usize)
            .is_some_and(|&count| count != 0)
    }

    fn check_slot(primary: u8, secondary: u8) -> BusResult<()> {
        if primary as usize >= NUM_SLOTS || secondary as usize >= NUM_SLOTS {
            return Err(BusError::InvalidSlot { primary, secondary });
        }
        Ok(())
    }

    pub fn device_at(&self, primary: u8, secondary: u8, page: usize) -> DeviceId {
        self.layout[primary as usize][secondary as usize][page]
    }

    pub fn visible(&self, page: usize) -> DeviceId {
        self.visible[page]
    }

    pub fn primary_slot(&self, page: usize) -> u8 {
        self.primary_slot_state[page]
    }

    pub fn secondary_slot(&self, page: usize) -> u8 {
        self.secondary_slot_state[page]
    }

    pub fn sub_slot_register(&self, primary: u8) -> u8 {
        self.sub_slot_register[primary as usize]
    }

    pub fn primary_slots(&self) -> u8 {
        self.primary_slot_state
            .iter()
            .enumerate()
            .fold(0, |acc, (page, &ps)| acc | (ps << (2 * page)))
    }

    pub fn state(&self) -> SlotState {
        SlotState {
            primary_slots: self.primary_slots(),
            sub_slot_registers: self.sub_slot_register,
        }
    }

    /// True when the slot selected in page 3 exposes its sub-slot register at 0xFFFF.
    pub fn sub_slot_register_visible(&self) -> bool {
        self.is_expanded(self.primary_slot_state[3])
    }

    fn secondary_for(&self, primary: u8, page: usize) -> u8 {
        if self.is_expanded(primary) {
            (self.sub_slot_register[primary as usize] >> (2 * page)) & 3
        } else {
            0
        }
    }

    fn update_visible(&mut self, page: usize) -> bool {
        let device = self.layout[self.primary_slot_state[page] as usize]
            [self.secondary_slot_state[page] as usize][page];
        if self.visible[page] != device {
            self.visible[page] = device;
            true
        } else {
            false
        }
    }

    /// Re-derives the secondary slot and visible device of `page`.
    fn refresh_page(&mut self, page: usize) -> bool {
        let ss = self.secondary_for(self.primary_slot_state[page], page);
        let slot_changed = self.secondary_slot_state[page] != ss;
        self.secondary_slot_state[page] = ss;
        let device_changed = self.update_visible(page);
        slot_changed || device_changed
    }

    pub fn set_primary_slots(&mut self, value: u8) -> LayoutChange {
        let mut change = LayoutChange::default();
        for page in 0..NUM_PAGES {
            let ps = (value >> (2 * page)) & 3;
            if self.primary_slot_state[page] == ps {
                continue;
            }
            let old_expanded = self.is_expanded(self.primary_slot_state[page]);
            self.primary_slot_state[page] = ps;
            self.refresh_page(page);
            change.pages |= 1 << page;
            if page == 3 {
                let new_expanded = self.is_expanded(ps);
                if old_expanded != new_expanded {
                    change.expansion = Some(new_expanded);
                }
            }
        }
        if change.pages != 0 {
            trace!("[SLOT] Primary slots {:08b}", value);
        }
        change
    }

    pub fn set_sub_slot(&mut self, primary: u8, value: u8) -> LayoutChange {
        self.sub_slot_register[primary as usize] = value;
        let mut change = LayoutChange::default();
        for page in 0..NUM_PAGES {
            if self.primary_slot_state[page] == primary && self.refresh_page(page) {
                change.pages |= 1 << page;
            }
        }
        trace!("[SLOT] Sub-slot register {} = {:08b}", primary, value);
        change
    }

    pub fn reset(&mut self) -> LayoutChange {
        let mut change = LayoutChange::default();
        for primary in 0..NUM_SLOTS as u8 {
            change = change.merge(self.set_sub_slot(primary, 0));
        }
        change.merge(self.set_primary_slots(0))
    }

    pub fn restore(&mut self, state: &SlotState) -> LayoutChange {
        let mut change = self.set_primary_slots(state.primary_slots);
        for (primary, &value) in state.sub_slot_registers.iter().enumerate() {
            change = change.merge(self.set_sub_slot(primary as u8, value));
        }
        change
    }

    fn refresh_slot(&mut self, primary: u8) -> LayoutChange {
        let mut change = LayoutChange {
            pages: 0,
            expansion: Some(self.sub_slot_register_visible()),
        };
        for page in 0..NUM_PAGES {
            if self.primary_slot_state[page] == primary && self.refresh_page(page) {
                change.pages |= 1 << page;
            }
        }
        change
    }

    pub fn set_expanded(&mut self, primary: u8) -> BusResult<LayoutChange> {
        Self::check_slot(primary, 0)?;
        let ps = primary as usize;
        if self.expanded[ps] == 0 && self.layout[ps][0].iter().any(|d| !d.is_dummy()) {
            return Err(Conflict::SlotInUse { primary }.into());
        }
        self.expanded[ps] += 1;
        debug!("[SLOT] Expanded slot {} (count {})", primary, self.expanded[ps]);
        Ok(self.refresh_slot(primary))
    }

    /// Checks that removing one expander from `primary` would not orphan any
    /// device other than the `allowed` ones.
    pub fn test_unset_expanded(
        &self,
        arena: &DeviceArena,
        primary: u8,
        allowed: &[DeviceId],
    ) -> BusResult<()> {
        assert!(self.is_expanded(primary), "slot {primary} is not expanded");
        if self.expanded[primary as usize] != 1 {
            return Ok(());
        }

        let mut in_use: Vec<DeviceId> = Vec::new();
        for secondary in &self.layout[primary as usize] {
            for &slot in secondary {
                let devices = match arena.multi_mem(slot) {
                    Some(multi) => multi.devices(),
                    None => vec![slot],
                };
                for device in devices {
                    if !device.is_dummy() && !allowed.contains(&device) && !in_use.contains(&device) {
                        in_use.push(device);
                    }
                }
            }
        }
        if in_use.is_empty() {
            return Ok(());
        }
        Err(BusError::ExpanderInUse {
            primary,
            devices: in_use.into_iter().map(|d| arena.name(d)).collect(),
        })
    }

    pub fn unset_expanded(&mut self, arena: &DeviceArena, primary: u8) -> LayoutChange {
        if cfg!(debug_assertions) {
            if let Err(err) = self.test_unset_expanded(arena, primary, &[]) {
                panic!("slot expander removed while still in use: {err}");
            }
        }
        let count = &mut self.expanded[primary as usize];
        assert!(*count > 0, "slot {primary} is not expanded");
        *count -= 1;
        debug!(
            "[SLOT] Unexpanded slot {} (count {})",
            primary, self.expanded[primary as usize]
        );
        self.refresh_slot(primary)
    }

    fn test_register_slot(
        &self,
        arena: &DeviceArena,
        device: DeviceId,
        primary: u8,
        secondary: u8,
        base: u16,
        size: u32,
    ) -> BusResult<()> {
        let page = (base >> 14) as usize;
        let slot = self.layout[primary as usize][secondary as usize][page];
        let overlap = |existing: DeviceId| -> BusError {
            Conflict::Overlap {
                primary,
                secondary,
                existing: arena.name(existing),
                new: arena.name(device),
            }
            .into()
        };

        if size == PAGE_SIZE {
            // full 16KB, directly register device (no multiplexer)
            if !slot.is_dummy() {
                return Err(overlap(slot));
            }
        } else if !slot.is_dummy() {
            match arena.multi_mem(slot) {
                Some(multi) => {
                    if let Some(range) = multi.overlapping(base, size) {
                        return Err(overlap(range.device));
                    }
                }
                // conflict with a full ranged device
                None => return Err(overlap(slot)),
            }
        }
        Ok(())
    }

    fn register_slot(
        &mut self,
        arena: &mut DeviceArena,
        device: DeviceId,
        primary: u8,
        secondary: u8,
        base: u16,
        size: u32,
    ) -> bool {
        let page = (base >> 14) as usize;
        let slot = &mut self.layout[primary as usize][secondary as usize][page];
        if size == PAGE_SIZE {
            debug_assert!(slot.is_dummy());
            *slot = device;
        } else if slot.is_dummy() {
            let mut multi = MultiMem::new();
            multi.add(device, base, size);
            *slot = arena.alloc(Node::MultiMem(multi));
        } else {
            match arena.node_mut(*slot) {
                Node::MultiMem(multi) => multi.add(device, base, size),
                _ => unreachable!("partial page registered over a full page device"),
            }
        }
        self.is_selected(primary, secondary, page) && self.update_visible(page)
    }

    fn unregister_slot(
        &mut self,
        arena: &mut DeviceArena,
        device: DeviceId,
        primary: u8,
        secondary: u8,
        base: u16,
        size: u32,
    ) -> bool {
        let page = (base >> 14) as usize;
        let slot = &mut self.layout[primary as usize][secondary as usize][page];
        let emptied = match arena.node_mut(*slot) {
            Node::MultiMem(multi) => {
                multi.remove(device, base, size);
                multi.is_empty()
            }
            _ => {
                assert_eq!(*slot, device, "device not registered in slot {primary}.{secondary}");
                *slot = DeviceId::DUMMY;
                false
            }
        };
        if emptied {
            arena.release(*slot);
            *slot = DeviceId::DUMMY;
        }
        self.is_selected(primary, secondary, page) && self.update_visible(page)
    }

    fn is_selected(&self, primary: u8, secondary: u8, page: usize) -> bool {
        self.primary_slot_state[page] == primary && self.secondary_slot_state[page] == secondary
    }

    /// Registers `device` over `base..base+size` in slot `primary.secondary`.
    /// Either every page of the range is registered or none is.
    pub fn register_mem_device(
        &mut self,
        arena: &mut DeviceArena,
        device: DeviceId,
        primary: u8,
        secondary: u8,
        base: u16,
        size: u32,
    ) -> BusResult<LayoutChange> {
        Self::check_slot(primary, secondary)?;
        if !self.is_expanded(primary) && secondary != 0 {
            return Err(Conflict::NotExpanded { primary, secondary }.into());
        }
        if base as u32 + size > 0x10000 {
            return Err(BusError::InvalidRange { base, size });
        }

        for (base, size) in split_pages(base, size) {
            self.test_register_slot(arena, device, primary, secondary, base, size)?;
        }

        let mut change = LayoutChange::default();
        for (base, size) in split_pages(base, size) {
            if self.register_slot(arena, device, primary, secondary, base, size) {
                change.pages |= 1 << (base >> 14);
            }
        }
        debug!(
            "[SLOT] {} registered at {}.{} {:#06X}-{:#06X}",
            arena.name(device),
            primary,
            secondary,
            base,
            (base as u32 + size).saturating_sub(1)
        );
        Ok(change)
    }

    pub fn unregister_mem_device(
        &mut self,
        arena: &mut DeviceArena,
        device: DeviceId,
        primary: u8,
        secondary: u8,
        base: u16,
        size: u32,
    ) -> LayoutChange {
        let mut change = LayoutChange::default();
        for (base, size) in split_pages(base, size) {
            if self.unregister_slot(arena, device, primary, secondary, base, size) {
                change.pages |= 1 << (base >> 14);
            }
        }
        debug!(
            "[SLOT] {} unregistered from {}.{} {:#06X}",
            arena.name(device),
            primary,
            secondary,
            base
        );
        change
    }

    /// Whether `device` is still referenced anywhere in the slot grid.
    pub fn references(&self, arena: &DeviceArena, device: DeviceId) -> bool {
        self.layout.iter().flatten().flatten().any(|&slot| {
            slot == device
                || arena
                    .multi_mem(slot)
                    .is_some_and(|multi| multi.devices().contains(&device))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;

    #[derive(Debug)]
    struct Named(&'static str);

    impl Device for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn setup() -> (AddressSpace, DeviceArena, DeviceId, DeviceId) {
        let mut arena = DeviceArena::new();
        let a = arena.insert(Box::new(Named("a")));
        let b = arena.insert(Box::new(Named("b")));
        (AddressSpace::new(), arena, a, b)
    }

    #[test]
    fn test_full_page_conflict_is_rejected() {
        let (mut space, mut arena, a, b) = setup();
        space
            .register_mem_device(&mut arena, a, 0, 0, 0x4000, 0x4000)
            .unwrap();
        let err = space
            .register_mem_device(&mut arena, b, 0, 0, 0x4000, 0x4000)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Overlapping memory devices in slot 0.0: a and b."
        );
        assert_eq!(space.visible(1), a);
    }

    #[test]
    fn test_registration_is_all_or_nothing() {
        let (mut space, mut arena, a, b) = setup();
        space
            .register_mem_device(&mut arena, a, 1, 0, 0x8000, 0x4000)
            .unwrap();
        // page 1 is free but page 2 is taken
        assert!(space
            .register_mem_device(&mut arena, b, 1, 0, 0x4000, 0x8000)
            .is_err());
        assert!(space.device_at(1, 0, 1).is_dummy());
        assert_eq!(space.device_at(1, 0, 2), a);
    }

    #[test]
    fn test_partial_pages_share_a_composite() {
        let (mut space, mut arena, a, b) = setup();
        space
            .register_mem_device(&mut arena, a, 0, 0, 0x0000, 0x2000)
            .unwrap();
        space
            .register_mem_device(&mut arena, b, 0, 0, 0x2000, 0x2000)
            .unwrap();

        let composite = space.device_at(0, 0, 0);
        let multi = arena.multi_mem(composite).unwrap();
        assert_eq!(multi.search(0x1FFF), a);
        assert_eq!(multi.search(0x2000), b);
        assert_eq!(arena.name(composite), "a b");

        let _ = space.unregister_mem_device(&mut arena, a, 0, 0, 0x0000, 0x2000);
        assert_eq!(space.device_at(0, 0, 0), composite);
        let _ = space.unregister_mem_device(&mut arena, b, 0, 0, 0x2000, 0x2000);
        assert!(space.device_at(0, 0, 0).is_dummy());
    }

    #[test]
    fn test_secondary_requires_expansion() {
        let (mut space, mut arena, a, _) = setup();
        assert_eq!(
            space.register_mem_device(&mut arena, a, 2, 1, 0, 0x4000),
            Err(Conflict::NotExpanded {
                primary: 2,
                secondary: 1
            }
            .into())
        );
    }

    #[test]
    fn test_out_of_range_registration_is_rejected() {
        let (mut space, mut arena, a, _) = setup();
        assert_eq!(
            space.register_mem_device(&mut arena, a, 6, 0, 0, 0x4000),
            Err(BusError::InvalidSlot {
                primary: 6,
                secondary: 0
            })
        );
        let _ = space.set_expanded(1).unwrap();
        assert!(space.register_mem_device(&mut arena, a, 1, 4, 0, 0x4000).is_err());
        assert_eq!(
            space.register_mem_device(&mut arena, a, 1, 0, 0xC000, 0x8000),
            Err(BusError::InvalidRange {
                base: 0xC000,
                size: 0x8000
            })
        );
        assert!(space.device_at(1, 0, 3).is_dummy());
        assert_eq!(
            space.set_expanded(4),
            Err(BusError::InvalidSlot {
                primary: 4,
                secondary: 0
            })
        );
        assert!(!space.is_expanded(4));
    }

    #[test]
    fn test_expanding_occupied_slot_fails() {
        let (mut space, mut arena, a, _) = setup();
        space
            .register_mem_device(&mut arena, a, 2, 0, 0xC000, 0x4000)
            .unwrap();
        assert_eq!(
            space.set_expanded(2),
            Err(Conflict::SlotInUse { primary: 2 }.into())
        );
        assert!(!space.is_expanded(2));
    }

    #[test]
    fn test_expansion_is_reference_counted() {
        let (mut space, arena, _, _) = setup();
        let _ = space.set_expanded(1).unwrap();
        let _ = space.set_expanded(1).unwrap();
        let _ = space.unset_expanded(&arena, 1);
        assert!(space.is_expanded(1));
        let _ = space.unset_expanded(&arena, 1);
        assert!(!space.is_expanded(1));
    }

    #[test]
    fn test_sub_slot_selects_visible_device() {
        let (mut space, mut arena, a, b) = setup();
        let _ = space.set_expanded(3).unwrap();
        space
            .register_mem_device(&mut arena, a, 3, 0, 0x4000, 0x4000)
            .unwrap();
        space
            .register_mem_device(&mut arena, b, 3, 2, 0x4000, 0x4000)
            .unwrap();

        let change = space.set_primary_slots(0b11_11_11_11);
        assert_eq!(change.pages, 0b1111);
        assert_eq!(change.expansion, Some(true));
        assert_eq!(space.visible(1), a);

        let change = space.set_sub_slot(3, 0b00_00_10_00);
        assert_eq!(change.pages, 0b0010);
        assert_eq!(space.secondary_slot(1), 2);
        assert_eq!(space.visible(1), b);
    }

    #[test]
    fn test_test_unset_expanded_lists_devices() {
        let (mut space, mut arena, a, b) = setup();
        let _ = space.set_expanded(0).unwrap();
        space
            .register_mem_device(&mut arena, a, 0, 2, 0x0000, 0x4000)
            .unwrap();
        space
            .register_mem_device(&mut arena, b, 0, 1, 0x8000, 0x100)
            .unwrap();

        let err = space.test_unset_expanded(&arena, 0, &[]).unwrap_err();
        assert_eq!(
            err,
            BusError::ExpanderInUse {
                primary: 0,
                devices: vec!["b".to_string(), "a".to_string()]
            }
        );
        assert!(space.test_unset_expanded(&arena, 0, &[a, b]).is_ok());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "slot expander removed while still in use")]
    fn test_unset_expanded_with_devices_is_fatal() {
        let (mut space, mut arena, a, _) = setup();
        let _ = space.set_expanded(0).unwrap();
        space
            .register_mem_device(&mut arena, a, 0, 2, 0x0000, 0x4000)
            .unwrap();
        let _ = space.unset_expanded(&arena, 0);
    }

    #[test]
    #[should_panic(expected = "slot 2 is not expanded")]
    fn test_unset_unexpanded_slot_is_fatal() {
        let (mut space, arena, _, _) = setup();
        let _ = space.unset_expanded(&arena, 2);
    }
}
