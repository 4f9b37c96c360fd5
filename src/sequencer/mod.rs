//! Command sequencing for one batch
//!
//! This module handles:
//! - Sending one command at a time and waiting for its classified reply
//! - Applying the retry, re-send and timeout policy
//! - Producing the single terminal result of the batch

mod executor;

pub use executor::{Sequencer, SequencerConfig};
