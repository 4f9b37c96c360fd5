//! TCP transport for controllers reached through a serial device server

use crate::transport::traits::{Transport, TransportConnector};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// TCP stream wrapper implementing Transport
pub struct TcpTransport {
    inner: TcpStream,
    /// Byte taken off the socket by `byte_available`
    lookahead: Option<u8>,
    read_timeout: Duration,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, read_timeout: Duration) -> Self {
        Self {
            inner: stream,
            lookahead: None,
            read_timeout,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes).await.context("TCP write failed")?;
        Ok(())
    }

    fn byte_available(&mut self) -> Result<bool> {
        if self.lookahead.is_some() {
            return Ok(true);
        }

        let mut buf = [0u8; 1];
        match self.inner.try_read(&mut buf) {
            Ok(0) => Err(anyhow!("Device server closed connection")),
            Ok(_) => {
                self.lookahead = Some(buf[0]);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(anyhow!("TCP read error: {}", e)),
        }
    }

    async fn read_one_byte(&mut self) -> Result<u8> {
        if let Some(byte) = self.lookahead.take() {
            return Ok(byte);
        }

        tokio::time::timeout(self.read_timeout, self.inner.read_u8())
            .await
            .map_err(|_| anyhow!("TCP read timed out after {:?}", self.read_timeout))?
            .context("TCP read failed")
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await.context("TCP shutdown failed")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}

/// TCP connector for a serial device server address
pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TcpConnector {
    pub fn new(address: String, read_timeout: Duration) -> Self {
        Self {
            address,
            connect_timeout: Duration::from_secs(5),
            read_timeout,
        }
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self) -> Result<Self::Transport> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| anyhow!("Timed out connecting to {}", self.address))?
            .with_context(|| format!("Failed to connect to {}", self.address))?;
        stream.set_nodelay(true)?;
        Ok(TcpTransport::new(stream, self.read_timeout))
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}
