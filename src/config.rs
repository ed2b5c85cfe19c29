use std::{fs, path::Path, path::PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{device::EmuTime, io_bus::Direction};

/// Machine description: which slots are expanded and which devices sit where.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MachineConfig {
    pub name: String,
    /// Primary slots that get a slot expander.
    pub expanded: Vec<u8>,
    /// Minimum gap between accesses to the VDP ports 0x98-0x9B.
    pub io_delay: Option<EmuTime>,
    pub devices: Vec<DeviceConfig>,
}

impl MachineConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Invalid machine configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Couldn't read machine configuration {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: DeviceKind,
    #[serde(default)]
    pub mem: Vec<MemMapping>,
    #[serde(default)]
    pub io: Vec<IoMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceKind {
    Ram {
        base: u16,
        size: u32,
    },
    Rom {
        base: u16,
        size: u32,
        #[serde(default)]
        path: Option<PathBuf>,
        /// Inline image, used when no path is given.
        #[serde(default)]
        data: Vec<u8>,
    },
    /// Slot select; binds 0xA8-0xAB unless `io` says otherwise.
    Ppi,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemMapping {
    pub primary: u8,
    #[serde(default)]
    pub secondary: u8,
    pub base: u16,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IoMapping {
    pub port: u8,
    pub direction: Direction,
}

impl IoMapping {
    /// In and out bindings for every port in `ports`.
    pub fn both(ports: impl IntoIterator<Item = u8>) -> Vec<IoMapping> {
        ports
            .into_iter()
            .flat_map(|port| {
                [Direction::In, Direction::Out]
                    .map(|direction| IoMapping { port, direction })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let config = MachineConfig::from_json(
            r#"{
                "name": "Hotbit",
                "expanded": [3],
                "io_delay": 12,
                "devices": [
                    {
                        "name": "Main RAM",
                        "type": "ram",
                        "base": 0,
                        "size": 65536,
                        "mem": [{ "primary": 3, "secondary": 2, "base": 0, "size": 65536 }]
                    },
                    { "name": "PPI", "type": "ppi" },
                    {
                        "name": "BIOS",
                        "type": "rom",
                        "base": 0,
                        "size": 32768,
                        "data": [201],
                        "mem": [{ "primary": 0, "base": 0, "size": 32768 }],
                        "io": [{ "port": 160, "direction": "out" }]
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.expanded, vec![3]);
        assert_eq!(config.io_delay, Some(12));
        assert_eq!(config.devices[0].mem[0].secondary, 2);
        assert_eq!(config.devices[1].kind, DeviceKind::Ppi);
        assert_eq!(config.devices[2].mem[0].secondary, 0);
        assert_eq!(
            config.devices[2].io,
            vec![IoMapping {
                port: 0xA0,
                direction: Direction::Out
            }]
        );
        assert!(matches!(
            &config.devices[2].kind,
            DeviceKind::Rom { path: None, data, .. } if data == &vec![0xC9]
        ));
    }

    #[test]
    fn test_unknown_device_type() {
        let err = MachineConfig::from_json(r#"{ "devices": [{ "name": "x", "type": "vdp" }] }"#)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid machine configuration"));
    }
}
