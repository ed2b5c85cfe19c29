use std::{fs, path::PathBuf};

use msxbus::{
    config::{DeviceKind, IoMapping, MemMapping},
    get_machine, BusError, Conflict, Device, Direction, Machine, MachineBuilder, MachineConfig,
};
use tracing_subscriber::fmt;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    let fmt_subscriber = fmt::Subscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)
        .expect("Unable to set global tracing subscriber");
}

fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("msxbus-{}-{}", std::process::id(), name));
    fs::write(&path, contents).unwrap();
    path
}

const HOTBIT: &str = r#"{
    "name": "Hotbit",
    "expanded": [3],
    "io_delay": 12,
    "devices": [
        { "name": "PPI", "type": "ppi" },
        {
            "name": "MSX BIOS",
            "type": "rom",
            "base": 0,
            "size": 32768,
            "data": [243, 195],
            "mem": [{ "primary": 0, "base": 0, "size": 32768 }]
        },
        {
            "name": "Main RAM",
            "type": "ram",
            "base": 0,
            "size": 65536,
            "mem": [{ "primary": 3, "secondary": 2, "base": 0, "size": 65536 }]
        }
    ]
}"#;

#[test]
fn test_machine_from_config() {
    let config = MachineConfig::from_json(HOTBIT).unwrap();
    let mut machine = Machine::from_config(&config).unwrap();

    assert_eq!(machine.bus.slot_info(0, 0, 0).unwrap(), "MSX BIOS");
    assert_eq!(machine.bus.slot_info(3, 2, 2).unwrap(), "Main RAM");
    assert!(machine.bus.is_sub_slotted(3).unwrap());
    assert_eq!(
        machine.bus.io_port_info(0xA8, Direction::Out).unwrap(),
        "PPI"
    );
    assert_eq!(
        machine.bus.io_port_info(0x98, Direction::Out).unwrap(),
        "empty"
    );

    // the usual BIOS boot dance: RAM in pages 2 and 3
    machine.write_io(0xA8, 0b11_11_00_00);
    machine.write(0xFFFF, 0b10_10_00_00);
    machine.write(0x8000, 0x99);
    assert_eq!(machine.read(0x8000), 0x99);
    assert_eq!(machine.read(0x0001), 0xC3);
    assert_eq!(machine.read(0xFFFF), 0b01_01_11_11);

    let dump = machine.dump("memory", 0x8000, 2).unwrap();
    assert!(dump.starts_with("8000: 99 ff"));
    assert!(machine.dump("vram", 0, 16).is_err());

    machine.reset();
    assert_eq!(machine.primary_slot_config(), 0);
    assert_eq!(machine.bus.sub_slot_register(3), 0);
}

#[test]
fn test_config_round_trip_through_json() {
    let config = MachineConfig::from_json(HOTBIT).unwrap();
    let json = config.to_json().unwrap();
    assert_eq!(MachineConfig::from_json(&json).unwrap(), config);
}

#[test]
fn test_conflict_aborts_configuration() {
    let mut config = MachineConfig::from_json(HOTBIT).unwrap();
    config.devices.push(msxbus::config::DeviceConfig {
        name: "Cartridge".to_string(),
        kind: DeviceKind::Ram {
            base: 0x4000,
            size: 0x4000,
        },
        mem: vec![MemMapping {
            primary: 0,
            secondary: 0,
            base: 0x4000,
            size: 0x4000,
        }],
        io: vec![],
    });

    let err = Machine::from_config(&config).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("Couldn't insert Cartridge"), "{message}");
    assert!(
        message.contains("Overlapping memory devices in slot 0.0: MSX BIOS and Cartridge."),
        "{message}"
    );
    assert!(matches!(
        err.root_cause().downcast_ref::<BusError>(),
        Some(BusError::BusConflict(Conflict::Overlap { .. }))
    ));
}

#[test]
fn test_rom_from_file() {
    let path = temp_file("bios.rom", &[0x01, 0x02, 0x03, 0x04]);
    let json = format!(
        r#"{{ "devices": [{{
            "name": "BIOS", "type": "rom", "base": 0, "size": 16384,
            "path": {:?},
            "mem": [{{ "primary": 0, "base": 0, "size": 16384 }}]
        }}] }}"#,
        path.display().to_string()
    );
    let mut machine = Machine::from_config(&MachineConfig::from_json(&json).unwrap()).unwrap();
    assert_eq!(machine.read(0x0002), 0x03);
    assert_eq!(machine.read(0x0006), 0x03);
    fs::remove_file(&path).unwrap();

    let missing = json.replace("bios.rom", "missing.rom");
    let err = Machine::from_config(&MachineConfig::from_json(&missing).unwrap()).unwrap_err();
    assert!(format!("{err:#}").contains("Couldn't load BIOS"));
}

#[test]
fn test_config_from_file() {
    let path = temp_file("machine.json", HOTBIT.as_bytes());
    let config = MachineConfig::load(&path).unwrap();
    assert_eq!(config.name, "Hotbit");
    fs::remove_file(&path).unwrap();
    assert!(MachineConfig::load(&path).is_err());
}

#[test]
fn test_insert_and_remove_cartridge() {
    let mut machine = get_machine(&[0xF3]).unwrap();
    assert!(machine.device_names().eq(["MSX BIOS", "Main RAM", "PPI"]));

    machine
        .insert_device(
            "Cartridge",
            Box::new(msxbus::memory::Rom::new("Cartridge", b"AB", 0x4000, 0x4000)),
            &[MemMapping {
                primary: 1,
                secondary: 0,
                base: 0x4000,
                size: 0x4000,
            }],
            &[IoMapping {
                port: 0x7C,
                direction: Direction::Out,
            }],
        )
        .unwrap();
    assert!(machine
        .insert_device(
            "Cartridge",
            Box::new(msxbus::memory::Ram::new("Cartridge", 0, 0x100)),
            &[],
            &[]
        )
        .is_err());

    machine.write_io(0xA8, 0b00_00_01_00);
    assert_eq!(machine.read(0x4000), b'A');
    assert_eq!(machine.bus.io_port_info(0x7C, Direction::Out).unwrap(), "Cartridge");

    let cartridge = machine.remove_device("Cartridge").unwrap();
    assert_eq!(cartridge.name(), "Cartridge");
    assert_eq!(machine.read(0x4000), 0xFF);
    assert!(machine.bus.io_binding(0x7C, Direction::Out).is_dummy());
    assert!(machine.memory().len() == 0x10000);
}

#[test]
fn test_builder_matches_config() {
    let mut builder = MachineBuilder::new();
    builder
        .expanded(3)
        .io_delay(12)
        .ppi()
        .rom_slot("MSX BIOS", &[243, 195], 0, 0, 0x0000, 0x8000)
        .ram_slot("Main RAM", 3, 2, 0x0000, 0x10000);
    let mut expected = MachineConfig::from_json(HOTBIT).unwrap();
    expected.name.clear();
    assert_eq!(builder.config(), &expected);
}

#[test]
fn test_bad_slot_config_is_an_error() {
    let ram = |primary: u8, base: u16, size: u32| MachineConfig {
        devices: vec![msxbus::config::DeviceConfig {
            name: "RAM".to_string(),
            kind: DeviceKind::Ram { base, size },
            mem: vec![MemMapping {
                primary,
                secondary: 0,
                base,
                size,
            }],
            io: vec![],
        }],
        ..Default::default()
    };

    let mut expanded = ram(0, 0, 0x4000);
    expanded.expanded = vec![4];
    let err = Machine::from_config(&expanded).unwrap_err();
    assert!(format!("{err:#}").contains("Couldn't expand slot 4"), "{err:#}");

    let err = Machine::from_config(&ram(6, 0, 0x4000)).unwrap_err();
    assert!(format!("{err:#}").contains("Invalid slot 6.0"), "{err:#}");

    let err = Machine::from_config(&ram(0, 0xC000, 0x8000)).unwrap_err();
    assert!(
        format!("{err:#}").contains("Memory range 0xC000+0x8000 exceeds the address space"),
        "{err:#}"
    );

    let mut machine = get_machine(&[0xF3]).unwrap();
    assert!(machine.remove_expander(1).is_err());
}
