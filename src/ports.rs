// src/ports.rs
//
// Trait-style abstractions over the host collaborators the core never
// implements itself (§6): GPIO, block storage, the FAT-like filesystem, and
// the hard timer. One concrete type per subsystem behind a small trait;
// no runtime dispatch is needed on the hot path since `Executor` is generic
// over its port types rather than boxing them.

use crate::error::FirmwareError;

pub const SECTOR_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioLevel {
    Low,
    High,
}

/// One pin per motor direction/step line, one per heater, one for the
/// cooler. Pins are partitioned at configuration time; no pin is read and
/// written by two components (§5 "Shared-resource policy").
pub trait Gpio {
    fn write(&mut self, port: u8, pin: u8, level: GpioLevel);
}

/// Single-block SPI-style transfers to the internal store. Calls happen on
/// the main cooperative loop only, never inside `execute_tick`.
pub trait BlockStore {
    fn read(&mut self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FirmwareError>;
    fn write(&mut self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), FirmwareError>;
}

/// FAT-like access to the removable card holding source `.gcode`/`.mtl`
/// files. Distinct from `BlockStore`, which is the internal cache device.
pub trait Filesystem {
    type File;

    fn open(&mut self, path: &str) -> Result<Self::File, FirmwareError>;
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, FirmwareError>;
    fn close(&mut self, file: Self::File) -> Result<(), FirmwareError>;
}

/// The one hard-timer preemption point. `schedule` arms the periodic
/// interrupt; the core itself never calls it more than once at startup.
pub trait Ticker {
    fn schedule(&mut self, hz: u32);
}

/// Supplement to §6's four listed ports: the thermal regulator (§4.9)
/// needs an ADC source and none of `Gpio`/`BlockStore`/`Filesystem`/
/// `Ticker` carries analog input. One channel per regulator (nozzle,
/// bed); the reading is already linearly mapped to the same voltage-proxy
/// units the regulator's setpoints are expressed in.
pub trait Thermistor {
    fn read_voltage(&mut self, channel: u8) -> f64;
}

/// File-backed `BlockStore`: the internal cache device as a plain file of
/// `sector_count` fixed-size sectors, grown lazily on first write. This is
/// the one port implementation this crate ships as production code rather
/// than a test double — `BlockStore` is an in-scope port (§6), unlike
/// `Gpio`/`Thermistor`, for which no real driver exists in this core's
/// scope (board pin-map and ADC wiring are both out-of-scope external
/// ports).
pub struct FileBlockStore {
    file: std::fs::File,
}

impl FileBlockStore {
    pub fn open(path: &str) -> Result<Self, FirmwareError> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| FirmwareError::SdcardFailure(e.to_string()))?;
        Ok(Self { file })
    }
}

impl BlockStore for FileBlockStore {
    fn read(&mut self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FirmwareError> {
        use std::io::{Read, Seek, SeekFrom};
        let offset = sector as u64 * SECTOR_SIZE as u64;
        if self.file.seek(SeekFrom::Start(offset)).is_err() {
            buf.fill(0);
            return Ok(());
        }
        match self.file.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(_) => {
                buf.fill(0);
                Ok(())
            }
        }
    }

    fn write(&mut self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), FirmwareError> {
        use std::io::{Seek, SeekFrom, Write};
        let offset = sector as u64 * SECTOR_SIZE as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| FirmwareError::SdcardFailure(e.to_string()))?;
        self.file
            .write_all(buf)
            .map_err(|e| FirmwareError::SdcardFailure(e.to_string()))
    }
}

pub mod sim {
    //! Reference in-memory implementations used by tests and the
    //! `printer-core` demonstration binary. A real board substitutes
    //! its own SPI/GPIO drivers behind the same traits.
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    pub struct MemoryBlockStore {
        sectors: HashMap<u32, [u8; SECTOR_SIZE]>,
    }

    impl MemoryBlockStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl BlockStore for MemoryBlockStore {
        fn read(&mut self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FirmwareError> {
            match self.sectors.get(&sector) {
                Some(data) => {
                    buf.copy_from_slice(data);
                    Ok(())
                }
                None => {
                    buf.fill(0);
                    Ok(())
                }
            }
        }

        fn write(&mut self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), FirmwareError> {
            self.sectors.insert(sector, *buf);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct RecordingGpio {
        pub writes: Vec<(u8, u8, GpioLevel)>,
    }

    impl Gpio for RecordingGpio {
        fn write(&mut self, port: u8, pin: u8, level: GpioLevel) {
            self.writes.push((port, pin, level));
        }
    }

    /// Fixed-reading thermistor stand-in, with an optional per-channel
    /// override for tests that drive a particular regulator toward a
    /// setpoint without modelling the other channel.
    #[derive(Debug, Default)]
    pub struct FixedThermistor {
        pub readings: HashMap<u8, f64>,
    }

    impl FixedThermistor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&mut self, channel: u8, voltage: f64) {
            self.readings.insert(channel, voltage);
        }
    }

    impl Thermistor for FixedThermistor {
        fn read_voltage(&mut self, channel: u8) -> f64 {
            *self.readings.get(&channel).unwrap_or(&0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_block_store_round_trips_a_written_sector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.img");
        let mut store = FileBlockStore::open(path.to_str().unwrap()).unwrap();

        let mut buf = [0u8; SECTOR_SIZE];
        buf[0] = 0xab;
        buf[SECTOR_SIZE - 1] = 0xcd;
        store.write(7, &buf).unwrap();

        let mut readback = [0u8; SECTOR_SIZE];
        store.read(7, &mut readback).unwrap();
        assert_eq!(readback, buf);
    }

    #[test]
    fn file_block_store_reads_an_untouched_sector_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.img");
        let mut store = FileBlockStore::open(path.to_str().unwrap()).unwrap();

        let mut buf = [0xffu8; SECTOR_SIZE];
        store.read(3, &mut buf).unwrap();
        assert_eq!(buf, [0u8; SECTOR_SIZE]);
    }
}
