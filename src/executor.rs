// src/executor.rs
//
// Motion driver / executor (§4.5): the 10kHz tick state machine that
// consumes the compiled record stream. Grounded on
// `printer_gcode_driver.c`'s `PrinterNextCommand`/`PrinterExecuteCommand`
// pair (idle/moving/wait-nozzle/wait-bed dispatch) and `PrinterLoadData`'s
// main/preload sector scheme; the primary-vs-service state duality (§3)
// is `ActiveState` indexing two `PrinterState`s.
//
// Pin numbering is a simplification this crate owns outright: §6 lists
// pin assignments as configuration strings (`McuPorts`) but the `Gpio`
// port takes numeric port/pin pairs, and nothing in the source material
// specifies the mapping between the two. Fixed port numbers are used
// here instead (documented in DESIGN.md) rather than inventing a naming
// scheme no source material describes.

use crate::cache::store::{ControlBlock, MaterialSlot, RECORDS_PER_SECTOR};
use crate::cache::writer::move_payload;
use crate::config::{AxisConfig, MotionConfig};
use crate::error::FirmwareError;
use crate::gcode::compiler::HOME_FETCH_SPEED;
use crate::motion::accel;
use crate::motion::pulse::{EDGE_LEADING, EDGE_TRAILING};
use crate::motion::{AccelerationScheduler, PulseGenerator};
use crate::ports::{BlockStore, Gpio, GpioLevel, Thermistor, SECTOR_SIZE};
use crate::record::{CommandRecord, MotionOp, MotionPayload, SubOp, RECORD_SIZE};
use crate::thermal::{Polarity, ThermalRegulator};

const STEP_PORT: u8 = 0;
const DIR_PORT: u8 = 1;
const HEATER_PORT: u8 = 2;
const COOLER_PORT: u8 = 3;
const NOZZLE_PIN: u8 = 0;
const BED_PIN: u8 = 1;
const NOZZLE_CHANNEL: u8 = 0;
const BED_CHANNEL: u8 = 1;

/// What the tick state machine is doing right now (§3, §4.5). Computed
/// from the executor's internal flags rather than stored directly, since
/// a resume can arm `wait_nozzle` and `wait_bed` at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Idle,
    Moving,
    WaitNozzle,
    WaitBed,
}

/// Which of the two [`crate::cache::store::PrinterState`] slots is live
/// (§3 "State duality"). Service commands (calibration, a manual jog)
/// run against `Service` without disturbing the primary print's cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveState {
    Primary = 0,
    Service = 1,
}

/// Result of one [`Executor::next_command`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The record was fully handled; the caller may call `next_command`
    /// again immediately.
    Ok,
    /// A motion or wait was started; ticks must run before the next
    /// call can advance.
    Incomplete,
    /// The main page is exhausted and the preload page isn't ready yet;
    /// the caller must call [`Executor::load_data`] and retry.
    PreloadRequired,
    /// The primary command stream has been fully consumed.
    Finished,
}

struct ReadPage {
    bytes: [u8; SECTOR_SIZE],
    sector: u32,
    loaded: bool,
}

impl ReadPage {
    fn empty() -> Self {
        Self {
            bytes: [0u8; SECTOR_SIZE],
            sector: 0,
            loaded: false,
        }
    }

    fn record_at(&self, index: usize) -> Option<CommandRecord> {
        let off = index * RECORD_SIZE;
        let chunk: [u8; RECORD_SIZE] = self.bytes[off..off + RECORD_SIZE].try_into().unwrap();
        CommandRecord::from_bytes(&chunk)
    }
}

pub struct Executor<G: Gpio, T: Thermistor> {
    axis: AxisConfig,
    motion_cfg: MotionConfig,
    gpio: G,
    thermistor: T,

    states: [crate::cache::store::PrinterState; 2],
    active: ActiveState,
    material: Option<MaterialSlot>,

    pulses: [PulseGenerator; 4],
    cooler: PulseGenerator,
    accel: Option<AccelerationScheduler>,
    nozzle_reg: ThermalRegulator,
    bed_reg: ThermalRegulator,

    moving: bool,
    wait_nozzle: bool,
    wait_bed: bool,
    pending_resume_move: bool,
    remaining_ticks: u32,
    move_delta: [i32; 4],

    main: ReadPage,
    preload: ReadPage,
    caret: usize,
    preload_requested: bool,

    service_buffer: Vec<CommandRecord>,
    service_index: usize,

    control: ControlBlock,
    tick_count: u64,
}

impl<G: Gpio, T: Thermistor> Executor<G, T> {
    pub fn new(axis: AxisConfig, motion_cfg: MotionConfig, gpio: G, thermistor: T) -> Self {
        let mut pulses = [
            PulseGenerator::new(EDGE_TRAILING),
            PulseGenerator::new(EDGE_TRAILING),
            PulseGenerator::new(EDGE_TRAILING),
            PulseGenerator::new(EDGE_LEADING),
        ];
        for p in &mut pulses {
            p.configure(1, 0);
        }
        let mut cooler = PulseGenerator::new(EDGE_TRAILING);
        cooler.configure(256, 0);

        Self {
            axis,
            motion_cfg,
            gpio,
            thermistor,
            states: [crate::cache::store::PrinterState::default(); 2],
            active: ActiveState::Primary,
            material: None,
            pulses,
            cooler,
            accel: None,
            nozzle_reg: ThermalRegulator::new(Polarity::HighWhenOn),
            bed_reg: ThermalRegulator::new(Polarity::LowWhenOn),
            moving: false,
            wait_nozzle: false,
            wait_bed: false,
            pending_resume_move: false,
            remaining_ticks: 0,
            move_delta: [0; 4],
            main: ReadPage::empty(),
            preload: ReadPage::empty(),
            caret: 0,
            preload_requested: false,
            service_buffer: Vec::new(),
            service_index: 0,
            control: ControlBlock {
                start_sector: crate::cache::store::SECTOR_RECORDS_START,
                filename: String::new(),
                command_count: 0,
            },
            tick_count: 0,
        }
    }

    pub fn motion_state(&self) -> MotionState {
        if self.moving {
            MotionState::Moving
        } else if self.wait_nozzle {
            MotionState::WaitNozzle
        } else if self.wait_bed {
            MotionState::WaitBed
        } else {
            MotionState::Idle
        }
    }

    pub fn active_state(&self) -> ActiveState {
        self.active
    }

    pub fn primary_state(&self) -> &crate::cache::store::PrinterState {
        &self.states[ActiveState::Primary as usize]
    }

    pub fn set_material(&mut self, material: Option<MaterialSlot>) {
        self.material = material;
    }

    /// How many records of the primary print remain undispatched (§B
    /// `PrinterGetRemainingCommandsCount`). Zero once `Finished`.
    pub fn remaining_commands_count(&self) -> u32 {
        self.control
            .command_count
            .saturating_sub(self.states[ActiveState::Primary as usize].command_index)
    }

    /// Last commanded cooler duty, 0..255 (§B `PrinterGetCoolerSpeed`).
    pub fn cooler_speed(&self) -> u32 {
        self.cooler.power()
    }

    /// Step delta of the move currently in flight, zero when idle (§B
    /// `PrinterGetCurrentPath`). This is the delta of the *current*
    /// segment, not the absolute position — matching the later, more
    /// heavily tested of the two original copies (see DESIGN.md).
    pub fn current_path(&self) -> [i32; 4] {
        if self.moving {
            self.move_delta
        } else {
            [0; 4]
        }
    }

    /// Begin a fresh print at the control block's start sector (§4.5
    /// "Starting a new print").
    pub fn start_print(
        &mut self,
        store: &mut impl BlockStore,
        control: ControlBlock,
    ) -> Result<(), FirmwareError> {
        self.control = control.clone();
        self.active = ActiveState::Primary;
        self.states[ActiveState::Primary as usize] = crate::cache::store::PrinterState {
            sector: control.start_sector,
            ..Default::default()
        };
        self.load_initial_page(store, control.start_sector)
    }

    /// Resume a previously saved print (§4.5 "Resume semantics", §9):
    /// restores the saved cursor, re-arms both heater setpoints, and
    /// schedules a synthetic move back to the saved logical position
    /// before normal dispatch continues. The re-arm is unconditional —
    /// `M24` always triggers it rather than trusting the physical head
    /// to already be where the cursor says it is.
    pub fn resume_print(
        &mut self,
        store: &mut impl BlockStore,
        control: ControlBlock,
    ) -> Result<(), FirmwareError> {
        self.control = control.clone();
        let saved = crate::cache::store::PrinterState::load(store)?;
        self.active = ActiveState::Primary;
        self.states[ActiveState::Primary as usize] = saved;
        self.load_initial_page(store, saved.sector)?;
        self.caret = saved.caret as usize;

        if saved.nozzle_setpoint > 0 {
            self.nozzle_reg.set_target(saved.nozzle_setpoint as f64);
            self.wait_nozzle = true;
        }
        if saved.bed_setpoint > 0 {
            self.bed_reg.set_target(saved.bed_setpoint as f64);
            self.wait_bed = true;
        }
        self.pending_resume_move = true;
        Ok(())
    }

    /// Hand a short in-memory command buffer to the executor for
    /// immediate playback against the service state (§3 "State
    /// duality" — a calibration routine or manual jog that must not
    /// perturb the primary print's cursor). The service state starts
    /// from the origin, not the primary's current position; its
    /// resulting head position is copied back into the primary state
    /// when the buffer drains (see `drain_service_into_primary`), so a
    /// resume synthesized afterward still computes its return delta
    /// from where the head actually is.
    pub fn inject_service(&mut self, records: Vec<CommandRecord>) {
        self.active = ActiveState::Service;
        self.states[ActiveState::Service as usize] = crate::cache::store::PrinterState::default();
        self.service_buffer = records;
        self.service_index = 0;
    }

    fn load_initial_page(&mut self, store: &mut impl BlockStore, sector: u32) -> Result<(), FirmwareError> {
        let mut bytes = [0u8; SECTOR_SIZE];
        store.read(sector, &mut bytes)?;
        self.main = ReadPage {
            bytes,
            sector,
            loaded: true,
        };
        self.caret = 0;
        self.preload = ReadPage::empty();
        self.preload_requested = false;
        Ok(())
    }

    /// Fills the preload page when the main page has been exhausted
    /// (§4.4 "symmetric main/preload scheme"). Never called from
    /// [`Executor::execute_tick`] — block-store calls stay on the
    /// cooperative main loop.
    pub fn load_data(&mut self, store: &mut impl BlockStore) -> Result<(), FirmwareError> {
        if self.preload_requested && !self.preload.loaded {
            let sector = self.main.sector + 1;
            let mut bytes = [0u8; SECTOR_SIZE];
            store.read(sector, &mut bytes)?;
            self.preload = ReadPage {
                bytes,
                sector,
                loaded: true,
            };
        }
        Ok(())
    }

    /// Persists the primary cursor to sector 4 (§4.5). Resume always
    /// restores the primary print, so only the primary state is ever
    /// saved, regardless of which state is currently active.
    pub fn save_state(&self, store: &mut impl BlockStore) -> Result<(), FirmwareError> {
        self.states[ActiveState::Primary as usize].save(store)
    }

    /// Copies the service routine's resulting head position into the
    /// primary state and persists it, then flips the active pointer back
    /// (§3 "State duality", §4.5 "`save_state` is called and the active
    /// pointer flips back to primary"). Grounded on
    /// `printer_gcode_driver.c`'s `resumePrint`/`PrinterNextCommand`,
    /// whose equivalent transition is
    /// `driver->state.position = driver->active_state->position` before
    /// the active pointer is restored — the primary cursor must see
    /// where the service buffer actually left the head, or a resume
    /// synthesized afterward computes its return delta from stale data.
    fn drain_service_into_primary(&mut self, store: &mut impl BlockStore) -> Result<(), FirmwareError> {
        let service = self.states[ActiveState::Service as usize];
        {
            let primary = &mut self.states[ActiveState::Primary as usize];
            primary.actual_position = service.actual_position;
            primary.logical_position = service.logical_position;
        }
        self.active = ActiveState::Primary;
        self.save_state(store)
    }

    fn resolve_override(requested: i16, material_value: Option<u16>) -> u16 {
        if requested == 0 {
            return 0;
        }
        match material_value {
            Some(v) if v > 0 => v,
            _ => requested as u16,
        }
    }

    /// Advance by one compiled record. Re-entrant: calling this while a
    /// motion or a wait is still pending re-reports the same
    /// [`ExecOutcome::Incomplete`] without consuming another record.
    pub fn next_command(&mut self, store: &mut impl BlockStore) -> Result<ExecOutcome, FirmwareError> {
        if self.moving {
            return Ok(ExecOutcome::Incomplete);
        }
        if self.wait_nozzle {
            if self.nozzle_reg.is_stabilized() {
                self.wait_nozzle = false;
            } else {
                return Ok(ExecOutcome::Incomplete);
            }
        }
        if self.wait_bed {
            if self.bed_reg.is_stabilized() {
                self.wait_bed = false;
            } else {
                return Ok(ExecOutcome::Incomplete);
            }
        }
        if self.pending_resume_move {
            self.pending_resume_move = false;
            return Ok(self.dispatch_resume_move());
        }

        match self.active {
            ActiveState::Service => self.next_service_command(store),
            ActiveState::Primary => self.next_primary_command(store),
        }
    }

    fn next_primary_command(&mut self, store: &mut impl BlockStore) -> Result<ExecOutcome, FirmwareError> {
        if self.states[ActiveState::Primary as usize].command_index >= self.control.command_count {
            return Ok(ExecOutcome::Finished);
        }
        if self.caret >= RECORDS_PER_SECTOR {
            if !self.preload.loaded {
                self.preload_requested = true;
                return Ok(ExecOutcome::PreloadRequired);
            }
            self.main = std::mem::replace(&mut self.preload, ReadPage::empty());
            self.caret = 0;
            self.preload_requested = false;
        }

        let record = self
            .main
            .record_at(self.caret)
            .ok_or(FirmwareError::InvalidControlBlock)?;
        self.caret += 1;
        {
            let state = &mut self.states[ActiveState::Primary as usize];
            state.command_index += 1;
            state.caret = self.caret as u8;
            state.sector = self.main.sector;
        }
        Ok(self.dispatch(record))
    }

    /// A drained service buffer copies its resulting head position into
    /// the primary state, persists it, and flips the active state back
    /// to primary — there's no caller-visible "service finished" status
    /// distinct from the overall job's, so a drain just restores the
    /// primary cursor and keeps going (see DESIGN.md).
    fn next_service_command(&mut self, store: &mut impl BlockStore) -> Result<ExecOutcome, FirmwareError> {
        if self.service_index >= self.service_buffer.len() {
            self.drain_service_into_primary(store)?;
            return Ok(ExecOutcome::Ok);
        }
        let record = self.service_buffer[self.service_index];
        self.service_index += 1;
        Ok(self.dispatch(record))
    }

    fn dispatch(&mut self, record: CommandRecord) -> ExecOutcome {
        match record {
            CommandRecord::Motion(MotionOp::Move, payload) | CommandRecord::Motion(MotionOp::Home, payload) => {
                if payload.segment_time == 0 {
                    ExecOutcome::Ok
                } else {
                    self.arm_move(payload);
                    ExecOutcome::Incomplete
                }
            }
            CommandRecord::Motion(MotionOp::SetPosition, payload) => {
                let idx = self.active as usize;
                self.states[idx].logical_position = [payload.x, payload.y, payload.z, payload.e];
                self.states[idx].actual_position = [payload.x, payload.y, payload.z, payload.e];
                ExecOutcome::Ok
            }
            CommandRecord::Motion(MotionOp::SavePosition, payload)
            | CommandRecord::Motion(MotionOp::SaveState, payload) => {
                let idx = self.active as usize;
                self.states[idx].logical_position = [payload.x, payload.y, payload.z, payload.e];
                ExecOutcome::Ok
            }
            CommandRecord::Sub(SubOp::StartResume, _) => {
                self.pending_resume_move = true;
                ExecOutcome::Ok
            }
            CommandRecord::Sub(SubOp::SetNozzleTemperature, payload) => {
                let target = Self::resolve_override(payload.s, self.material.map(|m| m.nozzle));
                let idx = self.active as usize;
                self.states[idx].nozzle_setpoint = target;
                self.nozzle_reg.set_target(target as f64);
                ExecOutcome::Ok
            }
            CommandRecord::Sub(SubOp::WaitNozzle, _) => {
                self.wait_nozzle = true;
                ExecOutcome::Incomplete
            }
            CommandRecord::Sub(SubOp::SetBedTemperature, payload) => {
                let target = Self::resolve_override(payload.s, self.material.map(|m| m.bed));
                let idx = self.active as usize;
                self.states[idx].bed_setpoint = target;
                self.bed_reg.set_target(target as f64);
                ExecOutcome::Ok
            }
            CommandRecord::Sub(SubOp::WaitBed, _) => {
                self.wait_bed = true;
                ExecOutcome::Incomplete
            }
            CommandRecord::Sub(SubOp::SetCoolerSpeed, payload) => {
                let target = Self::resolve_override(payload.s, self.material.map(|m| m.cooler));
                self.cooler.set_power(target.min(255) as u32);
                ExecOutcome::Ok
            }
        }
    }

    fn dispatch_resume_move(&mut self) -> ExecOutcome {
        let state = self.states[ActiveState::Primary as usize];
        let delta = [
            state.logical_position[0] - state.actual_position[0],
            state.logical_position[1] - state.actual_position[1],
            state.logical_position[2] - state.actual_position[2],
            state.logical_position[3] - state.actual_position[3],
        ];
        if delta == [0, 0, 0, 0] {
            return ExecOutcome::Ok;
        }
        let payload = move_payload(delta[0], delta[1], delta[2], delta[3], HOME_FETCH_SPEED, &self.axis);
        self.arm_move(payload);
        ExecOutcome::Incomplete
    }

    fn arm_move(&mut self, payload: MotionPayload) {
        let steps = [payload.x, payload.y, payload.z, payload.e];
        let period = payload.segment_time.max(1);
        for (i, gen) in self.pulses.iter_mut().enumerate() {
            gen.configure(period, steps[i].unsigned_abs());
        }
        for (i, &delta) in steps.iter().enumerate() {
            let level = if delta >= 0 { GpioLevel::High } else { GpioLevel::Low };
            self.gpio.write(DIR_PORT, i as u8, level);
        }
        self.move_delta = steps;
        self.remaining_ticks = period;
        self.moving = true;

        if self.motion_cfg.acceleration_enabled && payload.sequence_time != 0 {
            self.accel = Some(AccelerationScheduler::start_region(
                payload.sequence_time,
                payload.fetch,
                self.motion_cfg.min_fetch_speed,
                self.motion_cfg.acceleration,
            ));
        }
    }

    /// One 10kHz tick (§4.5): services thermal regulation once per 1000
    /// ticks, cooler PWM once per 100, acceleration and motor pulses
    /// every tick. No-op on `BlockStore` — never called with I/O.
    pub fn execute_tick(&mut self) {
        self.tick_count += 1;

        if self.tick_count % 1000 == 0 {
            self.nozzle_reg.accumulate(self.thermistor.read_voltage(NOZZLE_CHANNEL));
            self.bed_reg.accumulate(self.thermistor.read_voltage(BED_CHANNEL));
        }
        let nozzle_level = self.nozzle_reg.pwm_tick();
        self.gpio.write(HEATER_PORT, NOZZLE_PIN, nozzle_level);
        let bed_level = self.bed_reg.pwm_tick();
        self.gpio.write(HEATER_PORT, BED_PIN, bed_level);

        if self.tick_count % 100 == 0 {
            let on = self.cooler.tick();
            self.gpio
                .write(COOLER_PORT, 0, if on { GpioLevel::High } else { GpioLevel::Low });
        }

        if !self.moving {
            return;
        }

        if let Some(mut scheduler) = self.accel.take() {
            let tick = scheduler.tick();
            if self.motion_cfg.acceleration_enabled {
                let mut refs: Vec<&mut PulseGenerator> = self.pulses.iter_mut().collect();
                accel::apply(tick, &mut refs);
            }
            if !scheduler.is_region_complete() {
                self.accel = Some(scheduler);
            }
        }

        for (i, gen) in self.pulses.iter_mut().enumerate() {
            if gen.tick() {
                self.gpio.write(STEP_PORT, i as u8, GpioLevel::High);
                self.gpio.write(STEP_PORT, i as u8, GpioLevel::Low);
            }
        }

        self.remaining_ticks = self.remaining_ticks.saturating_sub(1);
        if self.remaining_ticks == 0 {
            self.moving = false;
            let idx = self.active as usize;
            for i in 0..4 {
                self.states[idx].actual_position[i] += self.move_delta[i];
            }
        }
    }
}
