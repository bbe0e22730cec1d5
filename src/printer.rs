// src/printer.rs
//
// Top-level wiring (§4): compiles a source file into the cache, then
// drives the executor tick by tick. Grounded on `printer.c`'s
// `MainLoop`/`startPrinting` pair and `printer_file_manager.c`'s
// `FileManagerOpenGCode`/`FileManagerReadGCodeBlock`, which is the
// source material's closest tie between the file layer, the compiler,
// and the executor.

use tracing::{info, warn};

use crate::cache::store::{ControlBlock, MaterialSlot, MaterialTable, SECTOR_RECORDS_START};
use crate::cache::writer::CacheWriter;
use crate::config::Config;
use crate::error::FirmwareError;
use crate::executor::{ActiveState, ExecOutcome, Executor, MotionState};
use crate::gcode::Compiler;
use crate::ports::{BlockStore, Gpio, Thermistor};
use crate::record::CommandRecord;

/// Reads from the internal cache retry this many times before a
/// transient `BlockStore` failure is surfaced as fatal (§4.5).
const SDCARD_READ_FAIL_ATTEMPTS: u32 = 10;

pub struct Printer<G: Gpio, T: Thermistor> {
    config: Config,
    executor: Executor<G, T>,
    materials: MaterialTable,
}

impl<G: Gpio, T: Thermistor> Printer<G, T> {
    pub fn new(config: Config, gpio: G, thermistor: T) -> Self {
        let executor = Executor::new(config.axis, config.motion, gpio, thermistor);
        Self {
            config,
            executor,
            materials: MaterialTable::default(),
        }
    }

    pub fn executor(&self) -> &Executor<G, T> {
        &self.executor
    }

    /// Compiles G-code source into the cache (§4.2, §4.3, §4.4). A line
    /// that fails to parse is logged and skipped; it does not abort the
    /// rest of the file (§7 "Parse errors during caching abort the
    /// caching step but do not touch the existing cached program").
    pub fn compile(
        &self,
        store: &mut impl BlockStore,
        source: &str,
        filename: &str,
    ) -> Result<ControlBlock, FirmwareError> {
        let mut compiler = Compiler::new(self.config.axis, self.config.motion);
        let mut writer = CacheWriter::new(self.config.axis, SECTOR_RECORDS_START);

        for (lineno, line) in source.lines().enumerate() {
            match compiler.compile_line(line) {
                Ok(records) => {
                    for record in records {
                        writer.append(store, record)?;
                    }
                }
                Err(e) => warn!("{filename}:{}: skipping unparsable line: {e}", lineno + 1),
            }
        }

        let control = ControlBlock {
            start_sector: writer.start_sector(),
            filename: filename.to_string(),
            command_count: writer.total_records(),
        };
        writer.close(store)?;
        control.save(store)?;
        info!(
            "compiled {filename}: {} records starting at sector {}",
            control.command_count, control.start_sector
        );
        Ok(control)
    }

    pub fn load_materials(&mut self, store: &mut impl BlockStore) -> Result<(), FirmwareError> {
        self.materials = MaterialTable::load(store)?;
        Ok(())
    }

    pub fn save_materials(&self, store: &mut impl BlockStore) -> Result<(), FirmwareError> {
        self.materials.save(store)
    }

    pub fn save_material(&mut self, slot: MaterialSlot) -> Result<(), FirmwareError> {
        self.materials.save_material(slot)
    }

    pub fn remove_material(&mut self, name: &[u8; 9]) {
        self.materials.remove_material(name);
    }

    /// Arms the active material override for the print about to start, or
    /// clears it if `name` doesn't match a stored slot.
    pub fn select_material(&mut self, name: &[u8; 9]) {
        self.executor.set_material(self.materials.find(name));
    }

    pub fn start(&mut self, store: &mut impl BlockStore, control: ControlBlock) -> Result<(), FirmwareError> {
        if self.executor.motion_state() != MotionState::Idle || self.executor.active_state() == ActiveState::Service
        {
            return Err(FirmwareError::AlreadyStarted);
        }
        self.executor.start_print(store, control)
    }

    pub fn resume(&mut self, store: &mut impl BlockStore, control: ControlBlock) -> Result<(), FirmwareError> {
        self.executor.resume_print(store, control)
    }

    pub fn inject_service(&mut self, records: Vec<CommandRecord>) {
        self.executor.inject_service(records);
    }

    pub fn save_state(&self, store: &mut impl BlockStore) -> Result<(), FirmwareError> {
        self.executor.save_state(store)
    }

    /// Advance the command cursor until a tick boundary, a finish, or an
    /// unrecoverable error. Retries a transiently-failing preload read up
    /// to [`SDCARD_READ_FAIL_ATTEMPTS`] times before giving up (§4.5).
    pub fn advance(&mut self, store: &mut impl BlockStore) -> Result<ExecOutcome, FirmwareError> {
        let mut attempts = 0;
        loop {
            match self.executor.next_command(store)? {
                ExecOutcome::Ok => continue,
                ExecOutcome::PreloadRequired => match self.executor.load_data(store) {
                    Ok(()) => continue,
                    Err(FirmwareError::SdcardFailure(_)) if attempts < SDCARD_READ_FAIL_ATTEMPTS => {
                        attempts += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                },
                outcome => return Ok(outcome),
            }
        }
    }

    /// Advance by exactly one compiled record, without the
    /// preload/retry handling `advance` does. Callers that need to
    /// observe per-record state transitions (tests, a step-debugger) use
    /// this directly; normal operation should prefer `advance`.
    pub fn step(&mut self, store: &mut impl BlockStore) -> Result<ExecOutcome, FirmwareError> {
        self.executor.next_command(store)
    }

    pub fn load_data(&mut self, store: &mut impl BlockStore) -> Result<(), FirmwareError> {
        self.executor.load_data(store)
    }

    /// Runs one 10kHz tick of motor pulses, acceleration, and thermal
    /// regulation. Does no `BlockStore` I/O (§4.5).
    pub fn tick(&mut self) {
        self.executor.execute_tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AxisConfig, McuPorts, MotionConfig, StorageConfig};
    use crate::ports::sim::{FixedThermistor, MemoryBlockStore, RecordingGpio};

    fn config() -> Config {
        Config {
            axis: AxisConfig {
                x_steps_per_mm: 100,
                y_steps_per_mm: 100,
                z_steps_per_mm: 400,
                e_steps_per_mm: 104,
            },
            motion: MotionConfig::default(),
            mcu: McuPorts {
                motor_step_pins: ["".into(), "".into(), "".into(), "".into()],
                motor_dir_pins: ["".into(), "".into(), "".into(), "".into()],
                nozzle_heater_pin: "".into(),
                bed_heater_pin: "".into(),
                cooler_pin: "".into(),
            },
            storage: StorageConfig {
                path: "unused".into(),
                sector_count: 4096,
            },
        }
    }

    #[test]
    fn compiles_and_runs_a_short_program_to_completion() {
        let mut store = MemoryBlockStore::new();
        let mut printer = Printer::new(config(), RecordingGpio::default(), FixedThermistor::new());
        let control = printer
            .compile(&mut store, "G0 F1800 X0 Y0\nG1 F1800 X10 Y0\n", "demo.gcode")
            .unwrap();

        printer.start(&mut store, control).unwrap();
        let mut ticks = 0;
        loop {
            match printer.advance(&mut store).unwrap() {
                ExecOutcome::Finished => break,
                ExecOutcome::Incomplete => {
                    printer.tick();
                    ticks += 1;
                    assert!(ticks < 100_000, "runaway test");
                }
                _ => {}
            }
        }
    }

    #[test]
    fn starting_twice_without_finishing_is_rejected() {
        let mut store = MemoryBlockStore::new();
        let mut printer = Printer::new(config(), RecordingGpio::default(), FixedThermistor::new());
        let control = printer
            .compile(&mut store, "G1 F1800 X100 Y0\n", "demo.gcode")
            .unwrap();
        printer.start(&mut store, control.clone()).unwrap();
        assert!(matches!(
            printer.start(&mut store, control),
            Err(FirmwareError::AlreadyStarted)
        ));
    }
}
