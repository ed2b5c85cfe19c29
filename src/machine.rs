use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context};

use crate::{
    bus::DebugBus,
    config::{DeviceConfig, DeviceKind, IoMapping, MachineConfig, MemMapping},
    debuggable::Debuggable,
    device::{Device, DeviceId, EmuTime},
    memory::{Ram, Rom},
    ppi::Ppi,
};

/// Ports behind the I/O delay wrapper.
pub const VDP_PORTS: std::ops::RangeInclusive<u8> = 0x98..=0x9B;
pub const PPI_PORTS: std::ops::RangeInclusive<u8> = 0xA8..=0xAB;

#[derive(Debug, Clone)]
struct Inserted {
    id: DeviceId,
    mem: Vec<MemMapping>,
    io: Vec<IoMapping>,
}

/// One emulated machine: the bus plus the devices plugged into it.
#[derive(Debug)]
pub struct Machine {
    pub bus: DebugBus,
    devices: BTreeMap<String, Inserted>,
    time: EmuTime,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            bus: DebugBus::new(),
            devices: BTreeMap::new(),
            time: 0,
        }
    }

    pub fn from_config(config: &MachineConfig) -> anyhow::Result<Self> {
        tracing::info!(
            "[MACHINE] Initializing {} with {} devices",
            if config.name.is_empty() {
                "MSX"
            } else {
                config.name.as_str()
            },
            config.devices.len()
        );
        let mut machine = Self::new();
        if let Some(min_gap) = config.io_delay {
            machine.bus.install_io_delay(VDP_PORTS, min_gap);
        }
        for &primary in &config.expanded {
            machine
                .bus
                .set_expanded(primary)
                .with_context(|| format!("Couldn't expand slot {primary}"))?;
        }
        for device in &config.devices {
            machine.insert_from_config(device)?;
        }
        machine.reset();
        Ok(machine)
    }

    fn insert_from_config(&mut self, config: &DeviceConfig) -> anyhow::Result<DeviceId> {
        let (device, io): (Box<dyn Device>, Vec<IoMapping>) = match &config.kind {
            DeviceKind::Ram { base, size } => {
                (Box::new(Ram::new(&config.name, *base, *size)), config.io.clone())
            }
            DeviceKind::Rom {
                base,
                size,
                path: Some(path),
                ..
            } => (
                Box::new(
                    Rom::load(&config.name, path.clone(), *base, *size)
                        .with_context(|| format!("Couldn't load {}", config.name))?,
                ),
                config.io.clone(),
            ),
            DeviceKind::Rom {
                base, size, data, ..
            } => (
                Box::new(Rom::new(&config.name, data, *base, *size)),
                config.io.clone(),
            ),
            DeviceKind::Ppi => {
                let io = if config.io.is_empty() {
                    IoMapping::both(PPI_PORTS)
                } else {
                    config.io.clone()
                };
                (Box::new(Ppi::new(self.bus.message_queue())), io)
            }
        };
        self.insert_device(&config.name, device, &config.mem, &io)
    }

    /// Plugs `device` in at the given slot ranges and ports. Either every
    /// mapping is applied or none is.
    pub fn insert_device(
        &mut self,
        name: &str,
        device: Box<dyn Device>,
        mem: &[MemMapping],
        io: &[IoMapping],
    ) -> anyhow::Result<DeviceId> {
        if self.devices.contains_key(name) {
            bail!("There is already a device named {name}");
        }
        let id = self.bus.add_device(device);
        for (index, range) in mem.iter().enumerate() {
            let result = self.bus.register_mem_device(
                id,
                range.primary,
                range.secondary,
                range.base,
                range.size,
            );
            if let Err(err) = result {
                for done in &mem[..index] {
                    self.bus
                        .unregister_mem_device(id, done.primary, done.secondary, done.base, done.size);
                }
                self.bus.remove_device(id);
                return Err(anyhow!(err).context(format!("Couldn't insert {name}")));
            }
        }
        for mapping in io {
            self.bus.register_io_port(mapping.port, id, mapping.direction);
        }
        tracing::debug!("[MACHINE] Inserted {} as {}", name, id);
        self.devices.insert(
            name.to_string(),
            Inserted {
                id,
                mem: mem.to_vec(),
                io: io.to_vec(),
            },
        );
        Ok(id)
    }

    pub fn remove_device(&mut self, name: &str) -> anyhow::Result<Box<dyn Device>> {
        let inserted = self
            .devices
            .remove(name)
            .ok_or_else(|| anyhow!("No such device: {name}"))?;
        for mapping in &inserted.io {
            self.bus
                .unregister_io_port(mapping.port, inserted.id, mapping.direction);
        }
        for range in &inserted.mem {
            self.bus.unregister_mem_device(
                inserted.id,
                range.primary,
                range.secondary,
                range.base,
                range.size,
            );
        }
        tracing::debug!("[MACHINE] Removed {}", name);
        self.bus
            .remove_device(inserted.id)
            .ok_or_else(|| anyhow!("Device {name} missing from the bus"))
    }

    pub fn device_id(&self, name: &str) -> Option<DeviceId> {
        self.devices.get(name).map(|inserted| inserted.id)
    }

    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    /// Takes the expander out of `primary`, refusing while devices remain in its subslots.
    pub fn remove_expander(&mut self, primary: u8) -> anyhow::Result<()> {
        if !self.bus.is_expanded(primary) {
            bail!("Slot {primary} is not expanded");
        }
        self.bus.test_unset_expanded(primary, &[])?;
        self.bus.unset_expanded(primary);
        Ok(())
    }

    pub fn time(&self) -> EmuTime {
        self.time
    }

    pub fn advance(&mut self, ticks: EmuTime) {
        self.time += ticks;
    }

    pub fn reset(&mut self) {
        self.bus.reset(self.time);
    }

    pub fn read(&mut self, address: u16) -> u8 {
        self.bus.read_mem(address, self.time)
    }

    pub fn write(&mut self, address: u16, value: u8) {
        self.bus.write_mem(address, value, self.time);
    }

    pub fn read_io(&mut self, port: u16) -> u8 {
        self.bus.read_io(port, self.time)
    }

    pub fn write_io(&mut self, port: u16, value: u8) {
        self.bus.write_io(port, value, self.time);
    }

    /// The 64KB the CPU currently sees, read without side effects.
    pub fn memory(&self) -> Vec<u8> {
        (0..=0xFFFF)
            .map(|address| self.bus.peek_mem(address, self.time))
            .collect()
    }

    pub fn dump(&self, debuggable: &str, start: u32, len: u32) -> anyhow::Result<String> {
        let debuggable: Debuggable = debuggable.parse()?;
        Ok(debuggable.dump(&self.bus, start, len, self.time))
    }

    pub fn primary_slot_config(&self) -> u8 {
        self.bus.primary_slots()
    }
}

/// Shorthand for assembling a [`MachineConfig`] in code.
#[derive(Default)]
pub struct MachineBuilder {
    config: MachineConfig,
}

impl MachineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expanded(&mut self, primary: u8) -> &mut Self {
        self.config.expanded.push(primary);
        self
    }

    pub fn io_delay(&mut self, min_gap: EmuTime) -> &mut Self {
        self.config.io_delay = Some(min_gap);
        self
    }

    pub fn ram_slot(
        &mut self,
        name: &str,
        primary: u8,
        secondary: u8,
        base: u16,
        size: u32,
    ) -> &mut Self {
        self.push(
            name,
            DeviceKind::Ram { base, size },
            MemMapping {
                primary,
                secondary,
                base,
                size,
            },
        )
    }

    pub fn rom_slot(
        &mut self,
        name: &str,
        data: &[u8],
        primary: u8,
        secondary: u8,
        base: u16,
        size: u32,
    ) -> &mut Self {
        self.push(
            name,
            DeviceKind::Rom {
                base,
                size,
                path: None,
                data: data.to_vec(),
            },
            MemMapping {
                primary,
                secondary,
                base,
                size,
            },
        )
    }

    pub fn ppi(&mut self) -> &mut Self {
        self.config.devices.push(DeviceConfig {
            name: "PPI".to_string(),
            kind: DeviceKind::Ppi,
            mem: vec![],
            io: vec![],
        });
        self
    }

    fn push(&mut self, name: &str, kind: DeviceKind, mapping: MemMapping) -> &mut Self {
        self.config.devices.push(DeviceConfig {
            name: name.to_string(),
            kind,
            mem: vec![mapping],
            io: vec![],
        });
        self
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn build(&self) -> anyhow::Result<Machine> {
        Machine::from_config(&self.config)
    }
}
