// End-to-end scenarios: compile a short program, run it to completion
// through the public `Printer` API, and check the observable state a
// worked example of each behavior would produce.

use printer_core::cache::store::{ControlBlock, MaterialSlot};
use printer_core::config::{AxisConfig, Config, McuPorts, MotionConfig, StorageConfig};
use printer_core::executor::ExecOutcome;
use printer_core::ports::sim::{FixedThermistor, MemoryBlockStore, RecordingGpio};
use printer_core::Printer;

fn axis() -> AxisConfig {
    AxisConfig {
        x_steps_per_mm: 100,
        y_steps_per_mm: 100,
        z_steps_per_mm: 400,
        e_steps_per_mm: 104,
    }
}

fn config(motion: MotionConfig) -> Config {
    Config {
        axis: axis(),
        motion,
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

fn run_to_finish(
    printer: &mut Printer<RecordingGpio, FixedThermistor>,
    store: &mut MemoryBlockStore,
) -> u32 {
    let mut ticks = 0;
    loop {
        match printer.advance(store).unwrap() {
            ExecOutcome::Finished => break,
            ExecOutcome::Incomplete => {
                printer.tick();
                ticks += 1;
                assert!(ticks < 500_000, "test program never finished");
            }
            _ => unreachable!(),
        }
    }
    ticks
}

/// Scenario 1: 3000 steps at 1800 mm/min on a 100 steps/mm axis takes
/// exactly 10_000 ticks (one second) at 10kHz.
#[test]
fn straight_line_move_takes_the_expected_tick_count() {
    let mut store = MemoryBlockStore::new();
    let mut printer = Printer::new(
        config(MotionConfig {
            acceleration_enabled: false,
            ..MotionConfig::default()
        }),
        RecordingGpio::default(),
        FixedThermistor::new(),
    );
    let control = printer
        .compile(&mut store, "G0 F1800 X0 Y0\nG1 F1800 X30 Y0\n", "line.gcode")
        .unwrap();
    printer.start(&mut store, control).unwrap();
    let ticks = run_to_finish(&mut printer, &mut store);
    assert_eq!(ticks, 10_000);
}

/// Scenario 2: relative moves are taken at face value, not accumulated
/// from the origin.
#[test]
fn relative_moves_land_at_the_expected_absolute_position() {
    let mut store = MemoryBlockStore::new();
    let mut printer = Printer::new(config(MotionConfig::default()), RecordingGpio::default(), FixedThermistor::new());
    let control = printer
        .compile(
            &mut store,
            "G0 F1800 X0 Y0\nG91\nG0 X30\nG0 X50\n",
            "relative.gcode",
        )
        .unwrap();
    printer.start(&mut store, control).unwrap();
    run_to_finish(&mut printer, &mut store);
    // total physical travel: 30 + 50 = 80mm -> 8000 steps at 100 steps/mm
    assert_eq!(printer.executor().primary_state().actual_position[0], 8000);
}

/// Scenario 3: a loaded material's nonzero nozzle temperature shadows an
/// explicit nonzero request, but an explicit S0 always wins.
#[test]
fn material_override_shadows_nonzero_requests_but_not_explicit_zero() {
    let mut store = MemoryBlockStore::new();
    let mut printer = Printer::new(config(MotionConfig::default()), RecordingGpio::default(), FixedThermistor::new());

    let mut name = [0u8; 9];
    name[..3].copy_from_slice(b"pla");
    printer
        .save_material(MaterialSlot {
            name,
            nozzle: 210,
            bed: 60,
            flow_percent: 100,
            cooler: 0,
        })
        .unwrap();
    printer.select_material(&name);

    let control = printer.compile(&mut store, "M104 S150\n", "shadowed.gcode").unwrap();
    printer.start(&mut store, control).unwrap();
    run_to_finish(&mut printer, &mut store);
    assert_eq!(printer.executor().primary_state().nozzle_setpoint, 210);

    let control = printer.compile(&mut store, "M104 S0\n", "explicit_zero.gcode").unwrap();
    printer.start(&mut store, control).unwrap();
    run_to_finish(&mut printer, &mut store);
    assert_eq!(printer.executor().primary_state().nozzle_setpoint, 0);
}

/// Scenario 5: `M109` blocks command advancement until the nozzle
/// regulator reports the setpoint reached.
#[test]
fn wait_nozzle_blocks_until_reported_temperature_is_reached() {
    let mut store = MemoryBlockStore::new();
    let mut thermistor = FixedThermistor::new();
    thermistor.set(0, 205.0);
    let mut printer = Printer::new(config(MotionConfig::default()), RecordingGpio::default(), thermistor);
    let control = printer.compile(&mut store, "M109 S205\n", "wait.gcode").unwrap();
    printer.start(&mut store, control).unwrap();
    let ticks = run_to_finish(&mut printer, &mut store);
    assert!(ticks > 0, "should have needed at least one bucket of readings");
    assert_eq!(printer.executor().primary_state().nozzle_setpoint, 205);
}

/// A saved, then resumed, print restores the cursor and synthesizes a
/// return move before continuing rather than silently skipping ahead.
#[test]
fn resume_after_save_continues_from_the_saved_cursor() {
    let mut store = MemoryBlockStore::new();
    let mut printer = Printer::new(config(MotionConfig::default()), RecordingGpio::default(), FixedThermistor::new());
    let control = printer
        .compile(
            &mut store,
            "G0 F1800 X0 Y0\nG1 F1800 X10 Y0\nG99\nG1 F1800 X20 Y0\n",
            "resumable.gcode",
        )
        .unwrap();
    printer.start(&mut store, control.clone()).unwrap();

    // Run until the G99 save-state record is dispatched, then persist.
    let mut guard = 0;
    loop {
        match printer.step(&mut store).unwrap() {
            ExecOutcome::Finished => panic!("finished before reaching the save point"),
            ExecOutcome::Incomplete => printer.tick(),
            ExecOutcome::PreloadRequired => printer.load_data(&mut store).unwrap(),
            ExecOutcome::Ok => {
                if printer.executor().primary_state().logical_position[0] == 1000 {
                    break;
                }
            }
        }
        guard += 1;
        assert!(guard < 500_000, "never reached the save point");
    }
    printer.save_state(&mut store).unwrap();

    let mut resumed = Printer::new(config(MotionConfig::default()), RecordingGpio::default(), FixedThermistor::new());
    resumed.resume(&mut store, control).unwrap();
    run_to_finish(&mut resumed, &mut store);
    assert_eq!(resumed.executor().primary_state().actual_position[0], 2000);
}

/// A long collinear region still reaches its full programmed fetch
/// speed and ends exactly at the commanded position (§4.8 scenario 6).
#[test]
fn accelerated_long_region_reaches_the_commanded_position() {
    let mut store = MemoryBlockStore::new();
    let mut printer = Printer::new(config(MotionConfig::default()), RecordingGpio::default(), FixedThermistor::new());
    let mut gcode = String::from("G0 F1800 X0 Y0\n");
    for i in 1..=50 {
        gcode.push_str(&format!("G1 F6000 X{}\n", i * 20));
    }
    let control = printer.compile(&mut store, &gcode, "accel.gcode").unwrap();
    printer.start(&mut store, control).unwrap();
    run_to_finish(&mut printer, &mut store);
    assert_eq!(printer.executor().primary_state().actual_position[0], 100_000);
}
