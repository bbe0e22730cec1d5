// src/motion/accel.rs
//
// Trapezoidal acceleration scheduler (§4.8), active across a whole
// continuous region rather than a single segment. Grounded on
// `printer_gcode_driver.c`'s `setupMove` (which arms
// `acceleration_subsequent_region_length`/`acceleration_region_increment`
// for a new region) and `PrinterExecuteCommand`'s per-tick ramp/brake
// logic.

use crate::motion::pulse::PulseGenerator;
use crate::timing::TICKS_PER_SEC;

/// Ticks held per rung (§4.8, GLOSSARY "Rung").
pub const SEG: u32 = 50;

/// Per-region state, (re)built when a region's base record is dispatched.
/// `tick()` is called once per executor tick for the lifetime of the
/// region; callers read [`AccelTick::power`] and feed it to the relevant
/// [`PulseGenerator`]s, and [`AccelTick::active`] to decide whether the
/// scheduler is modulating this tick at all (cruise runs motors at full
/// program rate untouched).
pub struct AccelerationScheduler {
    subsequent_region_length: i64,
    n_rungs: u32,
    region: u32,
    distance: u64,
    region_increment: i32,
    acc_tick: u32,
    distance_increment: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccelTick {
    pub active: bool,
    pub power: u32,
}

impl AccelerationScheduler {
    /// `region_length` is the base record's `sequence_time` (total ticks
    /// in the region); `fetch_mm_min` is the region's shared fetch speed.
    /// `accel_mm_s2` and `min_fetch_mm_min` come from [`crate::config::MotionConfig`].
    pub fn start_region(
        region_length: u32,
        fetch_mm_min: u32,
        min_fetch_mm_min: u32,
        accel_mm_s2: f64,
    ) -> Self {
        let delta_v = if fetch_mm_min > min_fetch_mm_min {
            (fetch_mm_min - min_fetch_mm_min) as f64 / 60.0
        } else {
            fetch_mm_min as f64 / 60.0
        };
        let t_a = if accel_mm_s2 > 0.0 {
            (TICKS_PER_SEC as f64 * delta_v / accel_mm_s2).round() as u32
        } else {
            0
        };
        let n_rungs = ((region_length + t_a) / SEG).max(1);

        Self {
            subsequent_region_length: region_length as i64,
            n_rungs,
            region: 1,
            distance: 0,
            region_increment: 1,
            acc_tick: 0,
            distance_increment: 1,
        }
    }

    /// One executor tick. Returns the scheduler's verdict for this tick;
    /// the caller only consults `power` when `active` is true.
    pub fn tick(&mut self) -> AccelTick {
        let ramping = self.region < self.n_rungs;
        let braking = self.subsequent_region_length <= self.distance as i64 - 1;
        let active = ramping || braking;

        if self.subsequent_region_length < self.distance as i64 {
            self.region_increment = -1;
            self.acc_tick = SEG.saturating_sub(self.acc_tick);
            self.distance_increment = 0;
        }

        self.acc_tick += 1;
        if self.acc_tick >= SEG {
            self.acc_tick = 0;
            self.region = (self.region as i32 + self.region_increment).max(1) as u32;
        }
        let power = ((self.region * SEG) / self.n_rungs.max(1)).max(1);

        self.distance += self.distance_increment.max(0) as u64;
        self.subsequent_region_length -= 1;

        AccelTick { active, power }
    }

    pub fn is_region_complete(&self) -> bool {
        self.subsequent_region_length <= 0
    }
}

/// Applies an [`AccelTick`] to a set of per-axis pulse generators: while
/// active, scales their `power` to the rung's fraction; while inactive
/// (cruise), leaves them alone to run their programmed power every tick.
pub fn apply(tick: AccelTick, generators: &mut [&mut PulseGenerator]) {
    if !tick.active {
        return;
    }
    for gen in generators {
        gen.set_power(tick.power.min(gen.period()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_region_has_at_least_one_rung() {
        let sched = AccelerationScheduler::start_region(100, 1800, 4500, 120.0);
        assert!(sched.n_rungs >= 1);
    }

    #[test]
    fn region_is_consumed_exactly_after_its_length_in_ticks() {
        let length = 500;
        let mut sched = AccelerationScheduler::start_region(length, 1800, 4500, 120.0);
        for _ in 0..length {
            sched.tick();
        }
        assert!(sched.is_region_complete());
    }

    #[test]
    fn power_never_exceeds_a_full_rung_worth_of_ticks() {
        let mut sched = AccelerationScheduler::start_region(2000, 6000, 4500, 120.0);
        for _ in 0..2000 {
            let t = sched.tick();
            assert!(t.power <= SEG);
        }
    }

    #[test]
    fn long_region_at_cruise_is_inactive_in_the_middle() {
        // A long, high-fetch region should spend its middle ticks at
        // cruise (scheduler inactive) per §4.8 step 1 / scenario 6.
        let length = 20_000;
        let mut sched = AccelerationScheduler::start_region(length, 1800, 4500, 120.0);
        let mut saw_inactive = false;
        for _ in 0..length {
            let t = sched.tick();
            if !t.active {
                saw_inactive = true;
            }
        }
        assert!(saw_inactive, "expected a cruise phase for a long region");
    }
}
