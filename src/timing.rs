// src/timing.rs
//
// Motion time computation (§4.6). Grounded on `printer_math.c`'s
// `CalculateTime`/`CalculateSegmentTime`/`Dot`, the canonical version (as
// opposed to the slightly different inline copy embedded in
// `printer_gcode_driver.c`'s `setupMove`).

use crate::config::AxisConfig;

pub const TICKS_PER_SEC: u64 = 10_000;
const SECONDS_IN_MINUTE: u64 = 60;

/// The greater of (a) one tick per step and (b) the ticks the requested
/// velocity demands for this axis.
fn axis_time(steps: i64, steps_per_mm: u32, fetch_mm_min: u32) -> u64 {
    let steps = steps.unsigned_abs();
    if steps == 0 || fetch_mm_min == 0 {
        return 0;
    }
    let velocity_ticks = steps * TICKS_PER_SEC * SECONDS_IN_MINUTE / (steps_per_mm as u64 * fetch_mm_min as u64);
    steps.max(velocity_ticks)
}

/// `segment_time` for a single `(dx, dy, dz, de)` step delta at fetch speed
/// `fetch_mm_min`. Zero fetch speed means "no time precomputed here" (the
/// source's guard in `CalculateSegmentTime`).
pub fn segment_time(dx: i32, dy: i32, dz: i32, de: i32, fetch_mm_min: u32, axis: &AxisConfig) -> u32 {
    if fetch_mm_min == 0 {
        return 0;
    }
    let diagonal = ((dx as f64).powi(2) + (dy as f64).powi(2)).sqrt().round() as i64;
    let xy_time = axis_time(diagonal, axis.x_steps_per_mm, fetch_mm_min);
    let z_time = axis_time(dz as i64, axis.z_steps_per_mm, fetch_mm_min);
    let e_time = axis_time(de as i64, axis.e_steps_per_mm, fetch_mm_min);
    xy_time.max(z_time).max(e_time) as u32
}

/// Integer dot product of two XYZ direction vectors (E is excluded from the
/// continuity test, per `Dot` in `printer_math.c`).
pub fn dot_xyz(a: (i32, i32, i32), b: (i32, i32, i32)) -> f64 {
    a.0 as f64 * b.0 as f64 + a.1 as f64 * b.1 as f64 + a.2 as f64 * b.2 as f64
}
