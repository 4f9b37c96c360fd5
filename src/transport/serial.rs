//! Serial transport implementation for the controller's RS-232/USB link

use crate::transport::traits::{Transport, TransportConnector};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tcm_shared::timing;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::debug;

/// Configuration for the serial link
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g. "/dev/ttyUSB0" or "COM3")
    pub port: String,
    /// Baud rate, 8N1 without flow control
    pub baud_rate: u32,
    /// Upper bound on a single byte read
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".into(),
            baud_rate: timing::DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(timing::SERIAL_READ_TIMEOUT_MS),
        }
    }
}

/// Serial stream wrapper implementing Transport
///
/// The port handle is released on `close`; any later call fails.
pub struct SerialTransport {
    inner: Option<SerialStream>,
    read_timeout: Duration,
}

impl SerialTransport {
    pub fn new(stream: SerialStream, read_timeout: Duration) -> Self {
        Self {
            inner: Some(stream),
            read_timeout,
        }
    }

    fn stream(&mut self) -> Result<&mut SerialStream> {
        self.inner
            .as_mut()
            .ok_or_else(|| anyhow!("Serial port is closed"))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        stream
            .write_all(bytes)
            .await
            .context("Serial write failed")?;
        stream.flush().await.context("Serial flush failed")?;
        Ok(())
    }

    fn byte_available(&mut self) -> Result<bool> {
        let pending = self
            .stream()?
            .bytes_to_read()
            .context("Failed to query serial input buffer")?;
        Ok(pending > 0)
    }

    async fn read_one_byte(&mut self) -> Result<u8> {
        let read_timeout = self.read_timeout;
        tokio::time::timeout(read_timeout, self.stream()?.read_u8())
            .await
            .map_err(|_| anyhow!("Serial read timed out after {:?}", read_timeout))?
            .context("Serial read failed")
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.inner.take() else {
            return Ok(());
        };
        // Dropping the stream closes the port handle
        stream.flush().await.context("Serial flush on close failed")
    }

    fn name(&self) -> &'static str {
        "Serial"
    }
}

/// Connector that opens a local serial port
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportConnector for SerialConnector {
    type Transport = SerialTransport;

    async fn connect(&self) -> Result<Self::Transport> {
        let ports = tokio_serial::available_ports().context("Failed to list serial ports")?;
        debug!(
            "Available serial ports: {:?}",
            ports.iter().map(|p| p.port_name.as_str()).collect::<Vec<_>>()
        );
        if !ports.iter().any(|p| p.port_name == self.config.port) {
            return Err(anyhow!("No device found at {}", self.config.port));
        }

        let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("Failed to open serial port {}", self.config.port))?;

        Ok(SerialTransport::new(stream, self.config.read_timeout))
    }

    fn name(&self) -> &'static str {
        "Serial"
    }
}
