//! Transport trait abstraction for pluggable byte channels to the controller

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A byte-oriented duplex channel to the controller
///
/// The frame reader and the sequencer share one transport, so every call
/// must return promptly: `byte_available` never blocks and `read_one_byte`
/// is bounded by the transport's own read timeout.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write the whole buffer
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Check, without blocking, whether a byte can be read
    fn byte_available(&mut self) -> Result<bool>;

    /// Read exactly one byte
    async fn read_one_byte(&mut self) -> Result<u8>;

    /// Close the channel
    async fn close(&mut self) -> Result<()>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// Factory for opening transport channels
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// The transport type this connector produces
    type Transport: Transport;

    /// Attempt to open the channel
    async fn connect(&self) -> Result<Self::Transport>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// Transport shared between the frame reader and the sequencer
pub type SharedTransport<T> = Arc<Mutex<T>>;
