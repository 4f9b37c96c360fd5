//! Frame Reader
//!
//! This module handles:
//! - Draining the transport one byte at a time without blocking the sequencer
//! - Delimiting replies on the carriage-return terminator
//! - Handing each complete reply to the shared status for interpretation

mod frame_reader;

pub use frame_reader::FrameReader;
