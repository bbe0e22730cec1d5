//! Motor pulse generation (§4.7, §4.10) and the trapezoidal acceleration
//! scheduler that modulates it across a region (§4.8).

pub mod accel;
pub mod pulse;

pub use accel::AccelerationScheduler;
pub use pulse::PulseGenerator;
