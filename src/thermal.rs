// src/thermal.rs
//
// Adaptive bang-bang thermal regulator (§4.9). Grounded on
// `termal_regulator.c`'s `TR_SetADCValue`/`TR_IsHeaterStabilized`: the
// bucket-of-15 averaging, the probe-index stuck-heating/stuck-cooling
// detection, and the full-reset-on-long-stall branch are all carried over
// with the post-increment-and-test idiom translated to an explicit
// pre-check (Rust has no `i++` to lean on).

use crate::motion::pulse::{PulseGenerator, EDGE_LEADING};

/// Readings are serviced once per 1000 ticks (§4.5); a decision bucket is
/// 15 consecutive readings (GLOSSARY "Bucket").
pub const BUCKET_SIZE: u32 = 15;
/// 10-tick PWM window for the heater pin (§4.9).
pub const PWM_PERIOD: u32 = 10;
const MAX_POWER: u32 = 10;
const PROBE_STALL_LIMIT: u32 = 10;

/// Heater pin polarity: nozzle heats on `high`, bed on `low`, to match
/// opposite-polarity solid-state relays (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    HighWhenOn,
    LowWhenOn,
}

pub struct ThermalRegulator {
    polarity: Polarity,
    pwm: PulseGenerator,

    target_voltage: f64,
    initial_voltage: f64,
    current_voltage: f64,

    heat_power: u32,
    heat_power_min: u32,
    cool_power: u32,
    cool_power_max: u32,

    heating: bool,
    temperature_reached: bool,
    heat_probe_index: u32,

    bucket_sum: f64,
    bucket_count: u32,
}

impl ThermalRegulator {
    pub fn new(polarity: Polarity) -> Self {
        let mut pwm = PulseGenerator::new(EDGE_LEADING);
        pwm.configure(PWM_PERIOD, 0);
        Self {
            polarity,
            pwm,
            target_voltage: 0.0,
            initial_voltage: 0.0,
            current_voltage: 0.0,
            heat_power: MAX_POWER,
            heat_power_min: 0,
            cool_power: 0,
            cool_power_max: MAX_POWER,
            heating: false,
            temperature_reached: true,
            heat_probe_index: 0,
        }
    }

    /// Arms a new setpoint (°C, mapped to the same voltage-proxy units as
    /// the thermistor readings by the caller). Resets the reached-latch.
    pub fn set_target(&mut self, target_voltage: f64) {
        self.target_voltage = target_voltage;
        self.initial_voltage = self.current_voltage;
        self.temperature_reached = (self.current_voltage - target_voltage).abs() < f64::EPSILON;
    }

    pub fn is_reached(&self) -> bool {
        self.temperature_reached
    }

    /// §9 supplement: `IsHeaterStabilized` is the latch the executor's
    /// wait-states poll; it tracks `is_reached` exactly; a separate
    /// "narrowed rung window" gate was considered but dropped; see
    /// DESIGN.md for why.
    pub fn is_stabilized(&self) -> bool {
        self.temperature_reached
    }

    /// Feed one raw thermistor reading. Must be called once per 1000
    /// ticks (§4.5 "Services thermal regulation once per 1000 ticks").
    /// Runs the bucket/update logic every 15th call.
    pub fn accumulate(&mut self, reading: f64) {
        self.bucket_sum += reading;
        self.bucket_count += 1;
        if self.bucket_count == BUCKET_SIZE {
            let average = self.bucket_sum / BUCKET_SIZE as f64;
            self.bucket_count = 0;
            self.bucket_sum = 0.0;
            self.update(average);
        }
    }

    fn update(&mut self, current_avg: f64) {
        let delta = current_avg - self.current_voltage;
        self.current_voltage = current_avg;

        if (self.current_voltage - self.target_voltage) * (self.initial_voltage - self.target_voltage) <= 0.0 {
            self.temperature_reached = true;
        }

        if self.current_voltage < self.target_voltage {
            if self.heating && delta <= 0.0 && self.heat_power == self.heat_power_min {
                self.heat_probe_index += 1;
                if self.heat_probe_index >= 2 {
                    self.heat_power = (self.heat_power + 1).min(MAX_POWER);
                    self.heat_probe_index = 0;
                }
            }
            if !self.heating
                && self.temperature_reached
                && self.cool_power == self.cool_power_max
                && self.cool_power < self.heat_power
            {
                self.cool_power_max = (self.cool_power_max + 1).min(MAX_POWER);
                self.cool_power += 1;
            }
            self.heating = true;
        } else {
            if !self.heating && delta >= 0.0 && self.cool_power == self.cool_power_max {
                self.heat_probe_index += 1;
                if self.heat_probe_index >= 2 {
                    self.cool_power_max = self.cool_power_max.saturating_sub(1);
                    self.cool_power = self.cool_power_max;
                    self.heat_probe_index = 0;
                }
            }
            if self.heating
                && self.temperature_reached
                && self.heat_power == self.heat_power_min
                && self.heat_power > self.cool_power
            {
                self.heat_power_min = self.heat_power_min.saturating_sub(1);
                self.heat_power -= 1;
            }
            self.heating = false;
        }

        if self.heat_probe_index > PROBE_STALL_LIMIT {
            self.heat_power = MAX_POWER;
            self.heat_power_min = 0;
            self.cool_power = 0;
            self.cool_power_max = MAX_POWER;
            self.heat_probe_index = 0;
        }

        let power = if self.heating {
            self.heat_power
        } else {
            self.cool_power
        };
        self.pwm.set_power(power);
    }

    /// Advance the PWM window by one tick; returns the pin level to drive.
    pub fn pwm_tick(&mut self) -> crate::ports::GpioLevel {
        let on = self.pwm.tick();
        match (on, self.polarity) {
            (true, Polarity::HighWhenOn) => crate::ports::GpioLevel::High,
            (true, Polarity::LowWhenOn) => crate::ports::GpioLevel::Low,
            (false, Polarity::HighWhenOn) => crate::ports::GpioLevel::Low,
            (false, Polarity::LowWhenOn) => crate::ports::GpioLevel::High,
        }
    }
}
