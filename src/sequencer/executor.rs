//! Sequencer - drives a batch through the controller one command at a time

use crate::status::SharedStatus;
use crate::transport::{SharedTransport, Transport};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tcm_shared::{codec, timing, BatchResult, Command, Outcome, Step};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Retry and timing policy for a batch run
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Attempts allowed for a failing command
    pub max_retries: u32,
    /// Granularity of the reply wait
    pub poll_interval: Duration,
    /// Number of poll intervals before a sent command times out
    pub max_polls: u32,
    /// Pause between consecutive command attempts
    pub inter_command_delay: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            max_retries: timing::DEFAULT_MAX_RETRIES,
            poll_interval: Duration::from_millis(timing::REPLY_POLL_INTERVAL_MS),
            max_polls: timing::REPLY_MAX_POLLS,
            inter_command_delay: Duration::from_millis(timing::INTER_COMMAND_DELAY_MS),
        }
    }
}

impl SequencerConfig {
    /// Wait window after each send
    pub fn reply_timeout(&self) -> Duration {
        self.poll_interval * self.max_polls
    }
}

/// Drives one batch to completion or failure
pub struct Sequencer<T: Transport> {
    batch: Arc<[Command]>,
    transport: SharedTransport<T>,
    status: Arc<SharedStatus>,
    config: SequencerConfig,
    cancel: CancellationToken,
    /// Cancelled when the transport fails, winding the controller down
    fault: CancellationToken,
}

impl<T: Transport> Sequencer<T> {
    /// Create a sequencer for `batch`
    ///
    /// The status must already be reset for this batch.
    pub fn new(
        batch: Arc<[Command]>,
        transport: SharedTransport<T>,
        status: Arc<SharedStatus>,
        config: SequencerConfig,
        cancel: CancellationToken,
        fault: CancellationToken,
    ) -> Self {
        Self {
            batch,
            transport,
            status,
            config,
            cancel,
            fault,
        }
    }

    /// Run the batch and return its terminal result
    pub async fn run(self) -> BatchResult {
        info!("[SEQ] Starting batch of {} command(s)", self.batch.len());
        let mut first_attempt = true;

        loop {
            let index = match self.settle().await {
                Step::Done(result) => {
                    self.report(&result);
                    return result;
                }
                Step::Send(index) => index,
            };

            if !first_attempt {
                tokio::select! {
                    _ = self.cancel.cancelled() => return self.abort("batch run cancelled").await,
                    _ = tokio::time::sleep(self.config.inter_command_delay) => {}
                }
            }
            first_attempt = false;

            let Some(command) = self.batch.get(index) else {
                return self
                    .abort(format!("no command at index {}", index))
                    .await;
            };

            if let Err(e) = self.send(command, index).await {
                error!("[SEQ] Failed to send {}: {:#}", command, e);
                let result = self.abort(format!("{:#}", e)).await;
                // Unencodable text is a batch error, not a transport fault
                if !e.is::<codec::CodecError>() {
                    self.fault.cancel();
                }
                return result;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return self.abort("batch run cancelled").await,
                _ = self.status.wait_for_reply(self.config.reply_timeout()) => {}
            }
        }
    }

    /// Apply the transition for whatever outcome the wait ended on
    async fn settle(&self) -> Step {
        let (observed, retry_count, percent, last_reply, step) = self
            .status
            .update(|status| {
                let observed = status.outcome();
                let step = status.settle();
                (
                    observed,
                    status.retry_count(),
                    status.decoded_percent().map(str::to_owned),
                    status.last_reply().to_owned(),
                    step,
                )
            })
            .await;

        match observed {
            Outcome::Fail => warn!(
                "[SEQ] Attempt failed ({}/{}), reply: {:?}",
                retry_count,
                self.config.max_retries,
                last_reply
            ),
            Outcome::Continue => info!(
                "[SEQ] Tuning in progress: {}%",
                percent.as_deref().unwrap_or("?")
            ),
            Outcome::Sent => warn!(
                "[SEQ] No reply within {:?}",
                self.config.reply_timeout()
            ),
            _ => {}
        }

        step
    }

    /// Mark the command as sent, then write it
    ///
    /// `Sent` is published before the write so an immediate reply is never
    /// attributed to the previous state.
    async fn send(&self, command: &Command, index: usize) -> Result<()> {
        let frame = codec::encode(command)?;

        let (accepted, retry_count) = self
            .status
            .update(|status| (status.mark_sent(command.kind()), status.retry_count()))
            .await;
        if !accepted {
            return Ok(());
        }

        info!(
            "[SEQ] No. {} attempt {}: {}",
            index + 1,
            retry_count + 1,
            command
        );

        self.transport.lock().await.write(&frame).await
    }

    async fn abort(&self, reason: impl Into<String>) -> BatchResult {
        let reason = reason.into();
        let step = self.status.update(|status| status.abort(reason.clone())).await;
        let result = match step {
            Step::Done(result) => result,
            Step::Send(_) => BatchResult::Error { reason },
        };
        self.report(&result);
        result
    }

    fn report(&self, result: &BatchResult) {
        match result {
            BatchResult::Success => info!("[SEQ] Batch executed successfully"),
            BatchResult::Failure { last_reply, index } => error!(
                "[SEQ] Batch failed at No. {} ({}), reply: {:?}",
                index + 1,
                self.describe(*index),
                last_reply
            ),
            BatchResult::Timeout { index } => error!(
                "[SEQ] Batch timed out at No. {} ({})",
                index + 1,
                self.describe(*index)
            ),
            BatchResult::Error { reason } => error!("[SEQ] Batch aborted: {}", reason),
        }
    }

    fn describe(&self, index: usize) -> String {
        self.batch
            .get(index)
            .map(|command| command.to_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::FrameReader;
    use crate::transport::{MockHandle, MockTransport};
    use tcm_shared::CommandKind;
    use tokio::sync::Mutex;

    fn fast_config() -> SequencerConfig {
        SequencerConfig {
            max_retries: 5,
            poll_interval: Duration::from_millis(5),
            max_polls: 20,
            inter_command_delay: Duration::from_millis(1),
        }
    }

    async fn run_batch(
        mock: MockTransport,
        batch: Vec<Command>,
        config: SequencerConfig,
    ) -> (BatchResult, Arc<SharedStatus>) {
        let transport = Arc::new(Mutex::new(mock));
        let status = Arc::new(SharedStatus::new(config.max_retries));
        status.update(|s| s.reset(batch.len())).await;

        let shutdown = CancellationToken::new();
        let reader = FrameReader::new(
            transport.clone(),
            status.clone(),
            Duration::from_millis(1),
            shutdown.clone(),
        )
        .spawn();

        let sequencer = Sequencer::new(
            batch.into(),
            transport,
            status.clone(),
            config,
            shutdown.child_token(),
            shutdown.clone(),
        );
        let result = sequencer.run().await;

        shutdown.cancel();
        reader.await.expect("reader panicked");
        (result, status)
    }

    fn ack_batch() -> Vec<Command> {
        vec![Command::new("TC1:TCADJTEMP=50@0", CommandKind::Ack)]
    }

    #[test]
    fn test_default_config() {
        let config = SequencerConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.reply_timeout(), Duration::from_secs(10));
        assert_eq!(config.inter_command_delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_multi_command_batch() {
        let (mock, handle): (MockTransport, MockHandle) = MockTransport::new(|text| {
            let reply = match text {
                "TC1:TCACTUALTEMP?@0" => "RPY1=23.9@0",
                "TC1:TCSAVE@0" => "RPY1REPLY=8",
                _ => "RPY1REPLY=1",
            };
            vec![reply.to_string()]
        });
        let batch = vec![
            Command::new("TC1:TCADJTEMP=50@0", CommandKind::Ack),
            Command::query("0", "TC1", "TCACTUALTEMP"),
            Command::new("TC1:TCSAVE@0", CommandKind::Save),
        ];

        let (result, status) = run_batch(mock, batch, fast_config()).await;

        assert_eq!(result, BatchResult::Success);
        assert_eq!(
            handle.writes(),
            vec!["TC1:TCADJTEMP=50@0", "TC1:TCACTUALTEMP?@0", "TC1:TCSAVE@0"]
        );
        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.active_index(), 3);
        assert_eq!(
            snapshot.decoded_value(),
            Some(&tcm_shared::DecodedValue::Text("23.9".into()))
        );
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let mut attempts = 0;
        let (mock, handle) = MockTransport::new(move |_| {
            attempts += 1;
            let reply = if attempts < 3 { "RPY1REPLY=0" } else { "RPY1REPLY=1" };
            vec![reply.to_string()]
        });

        let (result, status) = run_batch(mock, ack_batch(), fast_config()).await;

        assert_eq!(result, BatchResult::Success);
        assert_eq!(handle.count_writes("TC1:TCADJTEMP=50@0"), 3);
        assert_eq!(status.snapshot().await.retry_count(), 0);
    }

    #[tokio::test]
    async fn test_unencodable_command_is_an_error() {
        let (mock, handle) = MockTransport::silent();
        let batch = vec![Command::new("TC1:TEMP=°@0", CommandKind::Ack)];

        let (result, _) = run_batch(mock, batch, fast_config()).await;

        assert!(matches!(result, BatchResult::Error { .. }));
        assert!(handle.writes().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_the_run() {
        let (mock, _) = MockTransport::silent();
        let transport = Arc::new(Mutex::new(mock));
        let status = Arc::new(SharedStatus::new(5));
        status.update(|s| s.reset(1)).await;

        let cancel = CancellationToken::new();
        let sequencer = Sequencer::new(
            ack_batch().into(),
            transport,
            status.clone(),
            SequencerConfig::default(),
            cancel.clone(),
            CancellationToken::new(),
        );
        let run = tokio::spawn(sequencer.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("sequencer did not stop")
            .expect("sequencer panicked");

        assert_eq!(
            result,
            BatchResult::Error {
                reason: "batch run cancelled".into()
            }
        );
        assert_eq!(status.outcome(), Outcome::Finished);
    }
}
