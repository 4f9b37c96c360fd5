//! Batch input
//!
//! Turns instrument definition rows (device, module, register, type tag)
//! into protocol commands. Rows with an unrecognized tag are skipped.

mod loader;

pub use loader::{assemble_batch, load_csv};
