//! In-memory transport with a scripted responder
//!
//! Stands in for the controller in tests and in `--simulate` runs. Every
//! written frame is passed to the responder, and whatever replies it returns
//! are queued (terminator appended) for the reader to drain.

use crate::transport::traits::Transport;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tcm_shared::codec::TERMINATOR;
use tcm_shared::CommandKind;

/// Produces the replies for one written command (terminator stripped)
pub type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

/// Observation side of a mock transport
#[derive(Clone, Default)]
pub struct MockHandle {
    writes: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
}

impl MockHandle {
    /// Every frame written so far, terminator stripped
    #[cfg(test)]
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Number of writes of exactly `text`
    #[cfg(test)]
    pub fn count_writes(&self, text: &str) -> usize {
        self.writes().iter().filter(|w| w.as_str() == text).count()
    }

    /// How many times `close` was called
    #[cfg(test)]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// In-memory transport driven by a responder closure
pub struct MockTransport {
    responder: Responder,
    inbound: VecDeque<u8>,
    handle: MockHandle,
    fail_reads: bool,
    fail_writes: bool,
}

impl MockTransport {
    /// Create a mock answering each written command through `responder`
    pub fn new<F>(responder: F) -> (Self, MockHandle)
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let handle = MockHandle::default();
        let transport = Self {
            responder: Box::new(responder),
            inbound: VecDeque::new(),
            handle: handle.clone(),
            fail_reads: false,
            fail_writes: false,
        };
        (transport, handle)
    }

    /// A mock that never answers
    #[cfg(test)]
    pub fn silent() -> (Self, MockHandle) {
        Self::new(|_| Vec::new())
    }

    /// Simulated controller answering every command of a known batch
    ///
    /// Commands are answered according to the kind they were queued with;
    /// unknown text gets a plain acknowledgement.
    pub fn simulated_device(kinds: Vec<(String, CommandKind)>) -> (Self, MockHandle) {
        Self::new(move |text| {
            let kind = kinds
                .iter()
                .find(|(t, _)| t == text)
                .map(|(_, kind)| *kind)
                .unwrap_or(CommandKind::Ack);
            vec![simulated_reply(kind).to_string()]
        })
    }

    /// Queue raw bytes as if the controller had sent them unprompted
    #[cfg(test)]
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Make every subsequent availability check fail
    #[cfg(test)]
    pub fn fail_reads(&mut self) {
        self.fail_reads = true;
    }

    /// Make every subsequent write fail
    #[cfg(test)]
    pub fn fail_writes(&mut self) {
        self.fail_writes = true;
    }
}

/// Canned successful reply for a command of `kind`
fn simulated_reply(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Ack | CommandKind::RawEcho => "RPY0REPLY=1",
        CommandKind::Save => "RPY0REPLY=8",
        CommandKind::Value => "RPY0=25.0@0",
        CommandKind::Percent => "RPY0=100@0",
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.fail_writes {
            return Err(anyhow!("Mock device write failed"));
        }
        let text = String::from_utf8_lossy(bytes);
        for frame in text.split_terminator(TERMINATOR as char) {
            self.handle
                .writes
                .lock()
                .map_err(|_| anyhow!("Mock write log poisoned"))?
                .push(frame.to_owned());

            for reply in (self.responder)(frame) {
                self.inbound.extend(reply.as_bytes());
                self.inbound.push_back(TERMINATOR);
            }
        }
        Ok(())
    }

    fn byte_available(&mut self) -> Result<bool> {
        if self.fail_reads {
            return Err(anyhow!("Mock device unplugged"));
        }
        Ok(!self.inbound.is_empty())
    }

    async fn read_one_byte(&mut self) -> Result<u8> {
        self.inbound
            .pop_front()
            .ok_or_else(|| anyhow!("No byte available"))
    }

    async fn close(&mut self) -> Result<()> {
        self.handle.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(transport: &mut MockTransport) -> Vec<u8> {
        let mut bytes = Vec::new();
        while transport.byte_available().expect("poll failed") {
            bytes.push(transport.read_one_byte().await.expect("read failed"));
        }
        bytes
    }

    #[tokio::test]
    async fn test_responder_replies_are_terminated() {
        let (mut transport, handle) = MockTransport::new(|text| vec![format!("ECHO {}", text)]);

        transport.write(b"A\rB\r").await.expect("write failed");

        assert_eq!(handle.writes(), vec!["A", "B"]);
        assert_eq!(drain(&mut transport).await, b"ECHO A\rECHO B\r");
        assert!(transport.read_one_byte().await.is_err());
    }

    #[tokio::test]
    async fn test_simulated_device_answers_by_kind() {
        let (mut transport, handle) = MockTransport::simulated_device(vec![
            ("TC1:SAVE@0".into(), CommandKind::Save),
            ("TC1:TEMP?@0".into(), CommandKind::Value),
        ]);

        transport.write(b"TC1:SAVE@0\r").await.expect("write failed");
        transport.write(b"TC1:TEMP?@0\r").await.expect("write failed");
        transport.write(b"OTHER\r").await.expect("write failed");

        assert_eq!(
            drain(&mut transport).await,
            b"RPY0REPLY=8\rRPY0=25.0@0\rRPY0REPLY=1\r"
        );
        assert_eq!(handle.count_writes("OTHER"), 1);
    }

    #[tokio::test]
    async fn test_close_and_failure() {
        let (mut transport, handle) = MockTransport::silent();
        transport.push_inbound(b"X");
        assert!(transport.byte_available().expect("poll failed"));

        transport.fail_reads();
        assert!(transport.byte_available().is_err());

        transport.fail_writes();
        assert!(transport.write(b"TC1:SAVE@0\r").await.is_err());
        assert!(handle.writes().is_empty());

        transport.close().await.expect("close failed");
        assert_eq!(handle.close_count(), 1);
        assert_eq!(transport.name(), "Mock");
    }
}
