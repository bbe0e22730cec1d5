// src/cache/store.rs
//
// Block-store layout (§3 "Cache layout on the internal block store", §6
// "Block-store layout"). Sector numbers and guard tags are the wire
// format shared with the executor's reader side; nothing here depends on
// a real storage device, only on the [`BlockStore`] port.

use crate::error::FirmwareError;
use crate::ports::{BlockStore, SECTOR_SIZE};

pub const SECTOR_STATE: u32 = 4;
pub const SECTOR_MATERIALS: u32 = 5;
pub const SECTOR_CONTROL: u32 = 10;
pub const SECTOR_RECORDS_START: u32 = 11;
pub const RECORDS_PER_SECTOR: usize = SECTOR_SIZE / crate::record::RECORD_SIZE;

const STATE_GUARD: [u8; 4] = *b"stat";
const CONTROL_GUARD: [u8; 4] = *b"prnt";
const MATERIAL_GUARD: [u8; 4] = *b"mtrl";

const CONTROL_NAME_LEN: usize = 32;
const MATERIAL_NAME_LEN: usize = 9;
const MATERIAL_SLOT_SIZE: usize = 32;
const MATERIAL_SLOTS: usize = SECTOR_SIZE / MATERIAL_SLOT_SIZE;

/// Persisted resume cursor (§3 "`PrinterState`"). `logical_position` is
/// the compiled-program position at the moment of the save; `actual_position`
/// is where the head physically was, which can diverge from the former
/// while a service buffer is being played (§3 "State duality").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrinterState {
    pub logical_position: [i32; 4],
    pub actual_position: [i32; 4],
    pub nozzle_setpoint: u16,
    pub bed_setpoint: u16,
    pub command_index: u32,
    pub sector: u32,
    pub caret: u8,
}

impl Default for PrinterState {
    fn default() -> Self {
        Self {
            logical_position: [0; 4],
            actual_position: [0; 4],
            nozzle_setpoint: 0,
            bed_setpoint: 0,
            command_index: 0,
            sector: SECTOR_RECORDS_START,
            caret: 0,
        }
    }
}

impl PrinterState {
    fn write_bytes(&self, buf: &mut [u8; SECTOR_SIZE]) {
        buf[0..4].copy_from_slice(&STATE_GUARD);
        let mut off = 4;
        for v in self.logical_position {
            buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
            off += 4;
        }
        for v in self.actual_position {
            buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
            off += 4;
        }
        buf[off..off + 2].copy_from_slice(&self.nozzle_setpoint.to_le_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&self.bed_setpoint.to_le_bytes());
        off += 2;
        buf[off..off + 4].copy_from_slice(&self.command_index.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.sector.to_le_bytes());
        off += 4;
        buf[off] = self.caret;
    }

    fn read_bytes(buf: &[u8; SECTOR_SIZE]) -> Result<Self, FirmwareError> {
        if buf[0..4] != STATE_GUARD {
            return Err(FirmwareError::InvalidControlBlock);
        }
        let mut off = 4;
        let mut read_i32 = || {
            let v = i32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
            off += 4;
            v
        };
        let logical_position = [read_i32(), read_i32(), read_i32(), read_i32()];
        let actual_position = [read_i32(), read_i32(), read_i32(), read_i32()];
        let nozzle_setpoint = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
        off += 2;
        let bed_setpoint = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
        off += 2;
        let command_index = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let sector = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let caret = buf[off];
        Ok(Self {
            logical_position,
            actual_position,
            nozzle_setpoint,
            bed_setpoint,
            command_index,
            sector,
            caret,
        })
    }

    /// Atomic rewrite of sector 4 (§4.5 resume semantics, §8 property 5:
    /// two back-to-back saves must produce identical bytes).
    pub fn save(&self, store: &mut impl BlockStore) -> Result<(), FirmwareError> {
        let mut buf = [0u8; SECTOR_SIZE];
        self.write_bytes(&mut buf);
        store.write(SECTOR_STATE, &buf)
    }

    pub fn load(store: &mut impl BlockStore) -> Result<Self, FirmwareError> {
        let mut buf = [0u8; SECTOR_SIZE];
        store.read(SECTOR_STATE, &mut buf)?;
        Self::read_bytes(&buf)
    }
}

/// §3 "`ControlBlock`": tag `prnt`, starting sector of the compiled
/// stream, source filename, total command count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlBlock {
    pub start_sector: u32,
    pub filename: String,
    pub command_count: u32,
}

impl ControlBlock {
    pub fn save(&self, store: &mut impl BlockStore) -> Result<(), FirmwareError> {
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0..4].copy_from_slice(&CONTROL_GUARD);
        buf[4..8].copy_from_slice(&self.start_sector.to_le_bytes());
        let name_bytes = self.filename.as_bytes();
        let len = name_bytes.len().min(CONTROL_NAME_LEN);
        buf[8..8 + len].copy_from_slice(&name_bytes[..len]);
        buf[8 + CONTROL_NAME_LEN..12 + CONTROL_NAME_LEN]
            .copy_from_slice(&self.command_count.to_le_bytes());
        store.write(SECTOR_CONTROL, &buf)
    }

    pub fn load(store: &mut impl BlockStore) -> Result<Self, FirmwareError> {
        let mut buf = [0u8; SECTOR_SIZE];
        store.read(SECTOR_CONTROL, &mut buf)?;
        if buf[0..4] != CONTROL_GUARD {
            return Err(FirmwareError::InvalidControlBlock);
        }
        let start_sector = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let name_end = buf[8..8 + CONTROL_NAME_LEN]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(CONTROL_NAME_LEN);
        let filename = String::from_utf8_lossy(&buf[8..8 + name_end]).into_owned();
        let command_count =
            u32::from_le_bytes(buf[8 + CONTROL_NAME_LEN..12 + CONTROL_NAME_LEN].try_into().unwrap());
        Ok(Self {
            start_sector,
            filename,
            command_count,
        })
    }
}

/// §3 "Material override" / §6 "Material file". `flow_percent == 0` means
/// "treat as 100" per §6, applied by callers, not baked into storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialSlot {
    pub name: [u8; MATERIAL_NAME_LEN],
    pub nozzle: u16,
    pub bed: u16,
    pub flow_percent: u16,
    pub cooler: u16,
}

impl MaterialSlot {
    fn to_bytes(self) -> [u8; MATERIAL_SLOT_SIZE] {
        let mut buf = [0u8; MATERIAL_SLOT_SIZE];
        buf[0..4].copy_from_slice(&MATERIAL_GUARD);
        buf[4..4 + MATERIAL_NAME_LEN].copy_from_slice(&self.name);
        let mut off = 4 + MATERIAL_NAME_LEN;
        buf[off..off + 2].copy_from_slice(&self.nozzle.to_le_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&self.bed.to_le_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&self.flow_percent.to_le_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&self.cooler.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; MATERIAL_SLOT_SIZE]) -> Option<Self> {
        if buf[0..4] != MATERIAL_GUARD {
            return None;
        }
        let name: [u8; MATERIAL_NAME_LEN] = buf[4..4 + MATERIAL_NAME_LEN].try_into().unwrap();
        let mut off = 4 + MATERIAL_NAME_LEN;
        let mut read_u16 = || {
            let v = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
            off += 2;
            v
        };
        Some(Self {
            name,
            nozzle: read_u16(),
            bed: read_u16(),
            flow_percent: read_u16(),
            cooler: read_u16(),
        })
    }
}

/// 16-slot material table (§3, §6). Grounded on the `FileManagerSaveMTL` /
/// `FileManagerRemoveMTL` / `FileManagerGetNextMTL` trio: first free-or-
/// matching-name slot wins on save, removal tombstones by zeroing the
/// guard rather than compacting the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialTable {
    slots: [Option<MaterialSlot>; MATERIAL_SLOTS],
}

impl Default for MaterialTable {
    fn default() -> Self {
        Self {
            slots: [None; MATERIAL_SLOTS],
        }
    }
}

impl MaterialTable {
    pub fn load(store: &mut impl BlockStore) -> Result<Self, FirmwareError> {
        let mut buf = [0u8; SECTOR_SIZE];
        store.read(SECTOR_MATERIALS, &mut buf)?;
        let mut slots = [None; MATERIAL_SLOTS];
        for (i, slot) in slots.iter_mut().enumerate() {
            let start = i * MATERIAL_SLOT_SIZE;
            let chunk: [u8; MATERIAL_SLOT_SIZE] =
                buf[start..start + MATERIAL_SLOT_SIZE].try_into().unwrap();
            *slot = MaterialSlot::from_bytes(&chunk);
        }
        Ok(Self { slots })
    }

    pub fn save(&self, store: &mut impl BlockStore) -> Result<(), FirmwareError> {
        let mut buf = [0u8; SECTOR_SIZE];
        for (i, slot) in self.slots.iter().enumerate() {
            let start = i * MATERIAL_SLOT_SIZE;
            if let Some(s) = slot {
                buf[start..start + MATERIAL_SLOT_SIZE].copy_from_slice(&s.to_bytes());
            }
        }
        store.write(SECTOR_MATERIALS, &buf)
    }

    /// Insert or overwrite by name, first free-or-matching slot.
    pub fn save_material(&mut self, slot: MaterialSlot) -> Result<(), FirmwareError> {
        if let Some(existing) = self.slots.iter_mut().find(|s| matches!(s, Some(s) if s.name == slot.name)) {
            *existing = Some(slot);
            return Ok(());
        }
        if let Some(free) = self.slots.iter_mut().find(|s| s.is_none()) {
            *free = Some(slot);
            return Ok(());
        }
        Err(FirmwareError::TooManyMaterials)
    }

    pub fn remove_material(&mut self, name: &[u8; MATERIAL_NAME_LEN]) {
        if let Some(slot) = self.slots.iter_mut().find(|s| matches!(s, Some(s) if &s.name == name)) {
            *slot = None;
        }
    }

    pub fn find(&self, name: &[u8; MATERIAL_NAME_LEN]) -> Option<MaterialSlot> {
        self.slots.iter().flatten().find(|s| &s.name == name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MaterialSlot> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::sim::MemoryBlockStore;

    #[test]
    fn printer_state_round_trips() {
        let mut store = MemoryBlockStore::new();
        let state = PrinterState {
            logical_position: [100, 200, 300, 400],
            actual_position: [90, 190, 300, 400],
            nozzle_setpoint: 210,
            bed_setpoint: 60,
            command_index: 42,
            sector: 17,
            caret: 5,
        };
        state.save(&mut store).unwrap();
        let loaded = PrinterState::load(&mut store).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn two_back_to_back_saves_are_identical() {
        // §8 property 5.
        let mut store = MemoryBlockStore::new();
        let state = PrinterState {
            command_index: 7,
            ..Default::default()
        };
        state.save(&mut store).unwrap();
        let mut first = [0u8; SECTOR_SIZE];
        store.read(SECTOR_STATE, &mut first).unwrap();
        state.save(&mut store).unwrap();
        let mut second = [0u8; SECTOR_SIZE];
        store.read(SECTOR_STATE, &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn control_block_round_trips() {
        let mut store = MemoryBlockStore::new();
        let cb = ControlBlock {
            start_sector: 11,
            filename: "bracket.gcode".to_string(),
            command_count: 128,
        };
        cb.save(&mut store).unwrap();
        assert_eq!(ControlBlock::load(&mut store).unwrap(), cb);
    }

    #[test]
    fn material_table_first_free_or_matching_slot() {
        let mut table = MaterialTable::default();
        let mut name = [0u8; MATERIAL_NAME_LEN];
        name[..3].copy_from_slice(b"pla");
        let slot = MaterialSlot {
            name,
            nozzle: 210,
            bed: 60,
            flow_percent: 100,
            cooler: 255,
        };
        table.save_material(slot).unwrap();
        assert_eq!(table.find(&name), Some(slot));

        let updated = MaterialSlot {
            nozzle: 215,
            ..slot
        };
        table.save_material(updated).unwrap();
        assert_eq!(table.iter().count(), 1);
        assert_eq!(table.find(&name).unwrap().nozzle, 215);
    }

    #[test]
    fn material_table_removal_tombstones_the_slot() {
        let mut table = MaterialTable::default();
        let mut name = [0u8; MATERIAL_NAME_LEN];
        name[..3].copy_from_slice(b"abs");
        table
            .save_material(MaterialSlot {
                name,
                nozzle: 240,
                bed: 100,
                flow_percent: 100,
                cooler: 0,
            })
            .unwrap();
        table.remove_material(&name);
        assert_eq!(table.find(&name), None);
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn material_table_full_is_an_error() {
        let mut table = MaterialTable::default();
        for i in 0..MATERIAL_SLOTS {
            let mut name = [0u8; MATERIAL_NAME_LEN];
            name[0] = i as u8 + 1;
            table
                .save_material(MaterialSlot {
                    name,
                    nozzle: 200,
                    bed: 60,
                    flow_percent: 100,
                    cooler: 0,
                })
                .unwrap();
        }
        let mut overflow_name = [0u8; MATERIAL_NAME_LEN];
        overflow_name[0] = 99;
        let err = table.save_material(MaterialSlot {
            name: overflow_name,
            nozzle: 200,
            bed: 60,
            flow_percent: 100,
            cooler: 0,
        });
        assert!(matches!(err, Err(FirmwareError::TooManyMaterials)));
    }
}
