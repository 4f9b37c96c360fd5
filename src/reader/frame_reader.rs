//! Background task turning the transport byte stream into classified replies

use crate::status::SharedStatus;
use crate::transport::{SharedTransport, Transport};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tcm_shared::codec::FrameDecoder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reads reply frames for the controller's whole lifetime
pub struct FrameReader<T: Transport> {
    transport: SharedTransport<T>,
    status: Arc<SharedStatus>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl<T: Transport> FrameReader<T> {
    pub fn new(
        transport: SharedTransport<T>,
        status: Arc<SharedStatus>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            status,
            poll_interval,
            shutdown,
        }
    }

    /// Spawn the reader onto the runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the shutdown token fires or the transport fails
    ///
    /// A transport failure finishes any active batch with an error and
    /// cancels the shutdown token so the rest of the controller winds down.
    pub async fn run(self) {
        info!("[READER] Started");

        if let Err(e) = self.read_loop().await {
            error!("[READER] Transport failure: {:#}", e);
            self.status
                .update(|status| status.abort(format!("transport read failed: {:#}", e)))
                .await;
            self.shutdown.cancel();
        }

        info!("[READER] Stopped");
    }

    async fn read_loop(&self) -> Result<()> {
        let mut decoder = FrameDecoder::new();

        while !self.shutdown.is_cancelled() {
            // Hold the transport only for a single poll/read
            let byte = {
                let mut transport = self.transport.lock().await;
                if transport.byte_available()? {
                    Some(transport.read_one_byte().await?)
                } else {
                    None
                }
            };

            let Some(byte) = byte else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
                continue;
            };

            decoder.extend(&[byte]);
            loop {
                match decoder.decode_next() {
                    Ok(Some(reply)) => self.handle_reply(&reply).await,
                    Ok(None) => break,
                    Err(e) => warn!("[READER] Discarding frame: {}", e),
                }
            }
        }

        Ok(())
    }

    async fn handle_reply(&self, reply: &str) {
        debug!("[READER] Frame: {:?}", reply);
        match self.status.apply_reply(reply).await {
            Some(verdict) => debug!("[READER] Reply classified as {:?}", verdict),
            None => warn!("[READER] Stray reply with no command awaiting: {:?}", reply),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use tcm_shared::{CommandKind, DecodedValue, Outcome};
    use tokio::sync::Mutex;

    fn reader_for(
        transport: MockTransport,
        status: Arc<SharedStatus>,
    ) -> (JoinHandle<()>, CancellationToken, SharedTransport<MockTransport>) {
        let transport = Arc::new(Mutex::new(transport));
        let shutdown = CancellationToken::new();
        let handle = FrameReader::new(
            transport.clone(),
            status,
            Duration::from_millis(1),
            shutdown.clone(),
        )
        .spawn();
        (handle, shutdown, transport)
    }

    #[tokio::test]
    async fn test_reply_reaches_status() {
        let status = Arc::new(SharedStatus::new(5));
        status.update(|s| s.reset(1)).await;
        status.update(|s| s.mark_sent(CommandKind::Value)).await;

        let (mut mock, _) = MockTransport::silent();
        // A malformed frame first; it must be skipped without stopping the reader
        mock.push_inbound(b"\xff\xfe\rRPY1=25.3@0\r");
        let (handle, shutdown, _transport) = reader_for(mock, status.clone());

        assert!(status.wait_for_reply(Duration::from_secs(2)).await);
        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.outcome(), Outcome::Ok);
        assert_eq!(
            snapshot.decoded_value(),
            Some(&DecodedValue::Text("25.3".into()))
        );

        shutdown.cancel();
        handle.await.expect("reader panicked");
    }

    #[tokio::test]
    async fn test_stops_promptly_on_cancel() {
        let status = Arc::new(SharedStatus::new(5));
        let (mock, _) = MockTransport::silent();
        let (handle, shutdown, _transport) = reader_for(mock, status);

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("reader did not stop")
            .expect("reader panicked");
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_batch() {
        let status = Arc::new(SharedStatus::new(5));
        status.update(|s| s.reset(2)).await;
        status.update(|s| s.mark_sent(CommandKind::Ack)).await;

        let (mut mock, _) = MockTransport::silent();
        mock.fail_reads();
        let (handle, shutdown, _transport) = reader_for(mock, status.clone());

        handle.await.expect("reader panicked");
        assert!(shutdown.is_cancelled());

        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.outcome(), Outcome::Finished);
        assert!(matches!(
            snapshot.result(),
            Some(tcm_shared::BatchResult::Error { .. })
        ));
    }
}
