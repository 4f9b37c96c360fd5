//! Shared Status
//!
//! The single lock-guarded status record written by the frame reader and the
//! sequencer, plus a notification channel for outcome changes.

mod shared;

pub use shared::{SharedStatus, ValueSnapshot};
