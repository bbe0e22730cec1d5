// src/gcode/compiler.rs
//
// Drives modal state and serializes a parsed line into zero, one, or two
// 32-byte records (§4.2). Grounded on `gcode.c`'s `parseCommand`/
// `parseCommandParams` dispatch; `M109`/`M190` splitting into a
// set-then-wait pair mirrors `printer_gcode_driver.c`'s
// `setNozzleTemperature`/`setNozzleTemperatureBlocking` (and the bed's
// `setTableTemperature`/`setTableTemperatureBlocking` counterpart)
// rather than adding a combined opcode the record format has no room
// for.

use crate::config::{AxisConfig, MotionConfig};
use crate::error::FirmwareError;
use crate::gcode::parser::{self, AxisParams, ParsedLine, SubParams};
use crate::record::{CommandRecord, ModalState, MotionOp, MotionPayload, SubOp, SubPayload};

/// Fetch speed forced onto `G28` regardless of modal state or clamp
/// (§4.2 "G28 (home)").
pub const HOME_FETCH_SPEED: u32 = 1800;

pub struct Compiler {
    axis: AxisConfig,
    motion: MotionConfig,
    modal: ModalState,
    last_fetch: u32,
}

impl Compiler {
    pub fn new(axis: AxisConfig, motion: MotionConfig) -> Self {
        Self {
            axis,
            motion,
            modal: ModalState::default(),
            last_fetch: motion.min_fetch_speed.max(1),
        }
    }

    pub fn modal_state(&self) -> &ModalState {
        &self.modal
    }

    /// Compile one source line into the records it emits. `NoCommand` is
    /// routine (blank line, full-line comment) and simply yields no
    /// records; other parse errors abort this line only, leaving modal
    /// state untouched (§7 "Parse errors during caching abort the caching
    /// step but do not touch the existing cached program").
    pub fn compile_line(&mut self, line: &str) -> Result<Vec<CommandRecord>, FirmwareError> {
        let parsed = match parser::parse_line(line, &self.axis) {
            Ok(parsed) => parsed,
            Err(crate::error::ParseError::NoCommand) => return Ok(Vec::new()),
            Err(e) => return Err(FirmwareError::Parse(e)),
        };

        match parsed {
            ParsedLine::Motion { index, params } => Ok(self.compile_motion(index, params)),
            ParsedLine::Sub { index, params } => Ok(self.compile_sub(index, params)),
        }
    }

    fn clamp_fetch(&self, fetch: u32) -> u32 {
        if self.motion.max_fetch_speed != 0 && fetch > self.motion.max_fetch_speed {
            self.motion.max_fetch_speed
        } else {
            fetch
        }
    }

    fn resolve_axis(
        &self,
        current: i32,
        requested: Option<i64>,
        absolute: bool,
    ) -> (i32, i32) {
        // Returns (delta, new_absolute_position).
        match requested {
            None => (0, current),
            Some(v) if absolute => (v as i32 - current, v as i32),
            Some(v) => (v as i32, current + v as i32),
        }
    }

    fn compile_motion(&mut self, index: u32, params: AxisParams) -> Vec<CommandRecord> {
        match index {
            0 | 1 => vec![self.compile_move(params)],
            28 => vec![self.compile_home(params)],
            60 => vec![self.snapshot_record(MotionOp::SavePosition)],
            90 => {
                self.modal.absolute_motion = true;
                Vec::new()
            }
            91 => {
                self.modal.absolute_motion = false;
                Vec::new()
            }
            92 => vec![self.compile_set_position(params)],
            99 => vec![self.snapshot_record(MotionOp::SaveState)],
            _ => Vec::new(),
        }
    }

    fn compile_move(&mut self, params: AxisParams) -> CommandRecord {
        let pos = self.modal.position;
        let (dx, nx) = self.resolve_axis(pos[0], params.x, self.modal.absolute_motion);
        let (dy, ny) = self.resolve_axis(pos[1], params.y, self.modal.absolute_motion);
        let (dz, nz) = self.resolve_axis(pos[2], params.z, self.modal.absolute_motion);
        let (de, ne) = self.resolve_axis(pos[3], params.e, self.modal.absolute_extrusion);

        let fetch = self.clamp_fetch(params.f.map(|f| f as u32).unwrap_or(self.last_fetch));
        self.last_fetch = fetch;
        self.modal.position = [nx, ny, nz, ne];

        CommandRecord::Motion(
            MotionOp::Move,
            MotionPayload {
                x: dx,
                y: dy,
                z: dz,
                e: de,
                fetch,
                segment_time: 0,
                sequence_time: 0,
            },
        )
    }

    /// §4.2 "G28": forced 1800 mm/min, absolute motion + relative
    /// extrusion regardless of modal flags. An axis with no parameter is
    /// left untouched; `G28` with no axis letters at all homes X, Y and Z
    /// to zero (no explicit spec text covers the no-argument case; this is
    /// the conventional reading recorded in DESIGN.md).
    fn compile_home(&mut self, params: AxisParams) -> CommandRecord {
        let home_all = params.x.is_none() && params.y.is_none() && params.z.is_none();
        let pos = self.modal.position;
        let target = |given: Option<i64>, current: i32| -> i32 {
            match given {
                Some(v) => v as i32,
                None if home_all => 0,
                None => current,
            }
        };
        let nx = target(params.x, pos[0]);
        let ny = target(params.y, pos[1]);
        let nz = target(params.z, pos[2]);
        let de = params.e.unwrap_or(0) as i32;

        let record = CommandRecord::Motion(
            MotionOp::Home,
            MotionPayload {
                x: nx - pos[0],
                y: ny - pos[1],
                z: nz - pos[2],
                e: de,
                fetch: HOME_FETCH_SPEED,
                segment_time: 0,
                sequence_time: 0,
            },
        );
        self.modal.position = [nx, ny, nz, pos[3] + de];
        self.last_fetch = HOME_FETCH_SPEED;
        record
    }

    fn compile_set_position(&mut self, params: AxisParams) -> CommandRecord {
        let pos = self.modal.position;
        let nx = params.x.map(|v| v as i32).unwrap_or(pos[0]);
        let ny = params.y.map(|v| v as i32).unwrap_or(pos[1]);
        let nz = params.z.map(|v| v as i32).unwrap_or(pos[2]);
        let ne = params.e.map(|v| v as i32).unwrap_or(pos[3]);
        self.modal.position = [nx, ny, nz, ne];
        CommandRecord::Motion(
            MotionOp::SetPosition,
            MotionPayload {
                x: nx,
                y: ny,
                z: nz,
                e: ne,
                fetch: 0,
                segment_time: 0,
                sequence_time: 0,
            },
        )
    }

    /// `G60`/`G99` carry the current absolute position as their payload;
    /// neither moves the head (§9 Open Questions: `G99` = save full
    /// executor state, `G60` = save position only — the distinction lives
    /// in what the executor does on dispatch, not in this payload).
    fn snapshot_record(&self, op: MotionOp) -> CommandRecord {
        let pos = self.modal.position;
        CommandRecord::Motion(
            op,
            MotionPayload {
                x: pos[0],
                y: pos[1],
                z: pos[2],
                e: pos[3],
                fetch: 0,
                segment_time: 0,
                sequence_time: 0,
            },
        )
    }

    fn compile_sub(&mut self, index: u32, params: SubParams) -> Vec<CommandRecord> {
        let payload = |s: i16| SubPayload {
            s,
            i: params.i.unwrap_or(0) as i16,
            r: params.r.unwrap_or(0) as i16,
            p: params.p.unwrap_or(0) as i16,
        };

        match index {
            24 => vec![CommandRecord::Sub(
                SubOp::StartResume,
                payload(params.s.unwrap_or(0) as i16),
            )],
            82 => {
                self.modal.absolute_extrusion = true;
                Vec::new()
            }
            83 => {
                self.modal.absolute_extrusion = false;
                Vec::new()
            }
            104 => vec![CommandRecord::Sub(
                SubOp::SetNozzleTemperature,
                payload(params.s.unwrap_or(0) as i16),
            )],
            109 => {
                let s = params.s.unwrap_or(0) as i16;
                vec![
                    CommandRecord::Sub(SubOp::SetNozzleTemperature, payload(s)),
                    CommandRecord::Sub(SubOp::WaitNozzle, payload(s)),
                ]
            }
            106 => {
                let s = params.s.unwrap_or(255).clamp(0, 255) as i16;
                vec![CommandRecord::Sub(SubOp::SetCoolerSpeed, payload(s))]
            }
            107 => vec![CommandRecord::Sub(SubOp::SetCoolerSpeed, payload(0))],
            140 => vec![CommandRecord::Sub(
                SubOp::SetBedTemperature,
                payload(params.s.unwrap_or(0) as i16),
            )],
            190 => {
                let s = params.s.unwrap_or(0) as i16;
                vec![
                    CommandRecord::Sub(SubOp::SetBedTemperature, payload(s)),
                    CommandRecord::Sub(SubOp::WaitBed, payload(s)),
                ]
            }
            _ => Vec::new(),
        }
    }
}
