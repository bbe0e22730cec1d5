//! Internal block-store layout (§3, §6) and the compile-side double
//! buffer that writes into it (§4.4).

pub mod store;
pub mod writer;

pub use store::{ControlBlock, MaterialSlot, MaterialTable, PrinterState};
pub use writer::CacheWriter;
