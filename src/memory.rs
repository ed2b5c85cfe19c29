use std::{fs::File, io::Read, path::PathBuf};

use anyhow::Context;
use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    cache_line::CACHE_LINE_SIZE,
    device::{Device, EmuTime, IDLE_BYTE},
};

/// Offset of the cache line at `start` inside `len` bytes mapped at `base`,
/// when the whole line is backed by storage.
fn line_offset(base: u16, len: usize, start: u16) -> Option<usize> {
    let offset = start.checked_sub(base)? as usize;
    (offset + CACHE_LINE_SIZE <= len).then_some(offset)
}

#[derive(Derivative, Serialize, Deserialize, Clone, PartialEq)]
#[derivative(Debug)]
pub struct Ram {
    pub name: String,
    pub base: u16,
    pub size: u32,
    #[derivative(Debug = "ignore")]
    pub data: Vec<u8>,
}

impl Ram {
    pub fn new(name: impl Into<String>, base: u16, size: u32) -> Self {
        Ram {
            name: name.into(),
            base,
            size,
            data: vec![0xFF; size as usize],
        }
    }

    fn translate_address(&self, address: u16) -> Option<usize> {
        let offset = address.checked_sub(self.base)? as usize;
        (offset < self.data.len()).then_some(offset)
    }
}

impl Device for Ram {
    fn name(&self) -> &str {
        &self.name
    }

    fn peek_mem(&self, address: u16, _time: EmuTime) -> u8 {
        match self.translate_address(address) {
            Some(offset) => self.data[offset],
            None => {
                tracing::trace!(
                    "[SLOT] Read from out of bounds RAM address {:#06X}, returning 0xFF",
                    address
                );
                IDLE_BYTE
            }
        }
    }

    fn write_mem(&mut self, address: u16, value: u8, _time: EmuTime) {
        if let Some(offset) = self.translate_address(address) {
            self.data[offset] = value;
        }
    }

    fn read_cache_line(&self, start: u16) -> Option<&[u8]> {
        let offset = line_offset(self.base, self.data.len(), start)?;
        Some(&self.data[offset..offset + CACHE_LINE_SIZE])
    }

    fn write_cache_line(&mut self, start: u16) -> Option<&mut [u8]> {
        let offset = line_offset(self.base, self.data.len(), start)?;
        Some(&mut self.data[offset..offset + CACHE_LINE_SIZE])
    }
}

#[derive(Derivative, Serialize, Deserialize, Clone, PartialEq)]
#[derivative(Debug)]
pub struct Rom {
    pub name: String,
    pub rom_path: Option<PathBuf>,
    pub base: u16,
    pub size: u32,
    #[derivative(Debug = "ignore")]
    pub data: Vec<u8>,
}

impl Rom {
    /// Images smaller than `size` are mirrored to fill it.
    pub fn new(name: impl Into<String>, rom: &[u8], base: u16, size: u32) -> Self {
        let data = if rom.is_empty() {
            vec![IDLE_BYTE; size as usize]
        } else {
            rom.iter().copied().cycle().take(size as usize).collect()
        };

        Rom {
            name: name.into(),
            rom_path: None,
            base,
            size,
            data,
        }
    }

    pub fn load(
        name: impl Into<String>,
        rom_path: PathBuf,
        base: u16,
        size: u32,
    ) -> anyhow::Result<Self> {
        let mut file = File::open(&rom_path)
            .with_context(|| format!("Couldn't open ROM image {}", rom_path.display()))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        let mut rom = Self::new(name, &buffer, base, size);
        rom.rom_path = Some(rom_path);

        Ok(rom)
    }
}

impl Device for Rom {
    fn name(&self) -> &str {
        &self.name
    }

    fn peek_mem(&self, address: u16, _time: EmuTime) -> u8 {
        address
            .checked_sub(self.base)
            .and_then(|offset| self.data.get(offset as usize))
            .copied()
            .unwrap_or(IDLE_BYTE)
    }

    fn write_mem(&mut self, address: u16, _value: u8, _time: EmuTime) {
        tracing::trace!("[SLOT] Write to ROM address {:#06X} ignored", address);
    }

    fn read_cache_line(&self, start: u16) -> Option<&[u8]> {
        let offset = line_offset(self.base, self.data.len(), start)?;
        Some(&self.data[offset..offset + CACHE_LINE_SIZE])
    }
}
