//! Controller facade
//!
//! Owns the transport, the frame reader task and the shared status, and
//! exposes batch loading, running, value access and shutdown to callers.

mod facade;

pub use facade::{Controller, ControllerConfig};
