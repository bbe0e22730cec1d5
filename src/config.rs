// src/config.rs
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Steps-per-millimeter for each axis (§3 "Axis configuration"). Immutable
/// after boot; shared by the compiler (mm -> steps) and the executor
/// (steps -> ticks).
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct AxisConfig {
    pub x_steps_per_mm: u32,
    pub y_steps_per_mm: u32,
    pub z_steps_per_mm: u32,
    pub e_steps_per_mm: u32,
}

impl AxisConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.x_steps_per_mm == 0 {
            return Err(ConfigError::InvalidAxisScale { axis: "x" });
        }
        if self.y_steps_per_mm == 0 {
            return Err(ConfigError::InvalidAxisScale { axis: "y" });
        }
        if self.z_steps_per_mm == 0 {
            return Err(ConfigError::InvalidAxisScale { axis: "z" });
        }
        if self.e_steps_per_mm == 0 {
            return Err(ConfigError::InvalidAxisScale { axis: "e" });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct MotionConfig {
    /// §4.2 fetch-speed clamp. Zero means "no clamp".
    #[serde(default)]
    pub max_fetch_speed: u32,
    #[serde(default = "default_acceleration_enabled")]
    pub acceleration_enabled: bool,
    /// `a` in §4.8, mm/s^2.
    #[serde(default = "default_acceleration")]
    pub acceleration: f64,
    /// `F_min` in §4.8, mm/min.
    #[serde(default = "default_min_fetch_speed")]
    pub min_fetch_speed: u32,
}

fn default_acceleration_enabled() -> bool {
    true
}
fn default_acceleration() -> f64 {
    120.0
}
fn default_min_fetch_speed() -> u32 {
    4500
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            max_fetch_speed: 0,
            acceleration_enabled: default_acceleration_enabled(),
            acceleration: default_acceleration(),
            min_fetch_speed: default_min_fetch_speed(),
        }
    }
}

/// Symbolic pin assignments. Not wired to real GPIO in this crate; consumed
/// by the `Gpio` port implementations under `ports::sim`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McuPorts {
    pub motor_step_pins: [String; 4],
    pub motor_dir_pins: [String; 4],
    pub nozzle_heater_pin: String,
    pub bed_heater_pin: String,
    pub cooler_pin: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Path to the backing file used by the file-backed `BlockStore`.
    pub path: String,
    /// Total sectors in the backing device.
    #[serde(default = "default_sector_count")]
    pub sector_count: u32,
}

fn default_sector_count() -> u32 {
    4096
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub axis: AxisConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    pub mcu: McuPorts,
    pub storage: StorageConfig,
}

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    let config: Config = toml::from_str(&contents)?;
    config.axis.validate()?;
    Ok(config)
}
