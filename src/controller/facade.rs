//! Controller facade owning the transport, reader task and batch runs

use crate::reader::FrameReader;
use crate::sequencer::{Sequencer, SequencerConfig};
use crate::status::{SharedStatus, ValueSnapshot};
use crate::transport::{SharedTransport, Transport};
use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tcm_shared::{codec, timing, BatchResult, Command, Status};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Configuration for the controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Retry and timing policy of batch runs
    pub sequencer: SequencerConfig,
    /// Idle interval of the frame reader
    pub reader_poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sequencer: SequencerConfig::default(),
            reader_poll_interval: Duration::from_millis(timing::READER_POLL_INTERVAL_MS),
        }
    }
}

/// Pending terminal result of one batch run
pub struct BatchRun {
    result_rx: oneshot::Receiver<BatchResult>,
}

impl BatchRun {
    /// Wait for the batch to finish
    pub async fn result(self) -> BatchResult {
        self.result_rx.await.unwrap_or_else(|_| BatchResult::Error {
            reason: "batch run ended without a result".into(),
        })
    }
}

/// An active sequencer task
struct ActiveRun {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Drives command batches against one controller
pub struct Controller<T: Transport> {
    config: ControllerConfig,
    transport: SharedTransport<T>,
    status: Arc<SharedStatus>,
    batch: RwLock<Arc<[Command]>>,
    shutdown: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
    active_run: Mutex<Option<ActiveRun>>,
    closed: AtomicBool,
}

impl<T: Transport> Controller<T> {
    /// Create a controller over an already opened transport
    pub fn new(transport: T, config: ControllerConfig) -> Self {
        info!("Controller using {} transport", transport.name());
        let status = Arc::new(SharedStatus::new(config.sequencer.max_retries));

        Self {
            config,
            transport: Arc::new(Mutex::new(transport)),
            status,
            batch: RwLock::new(Arc::from(Vec::new())),
            shutdown: CancellationToken::new(),
            reader: Mutex::new(None),
            active_run: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether the transport is still usable
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    /// Replace the active batch and reset the status
    ///
    /// A run still driving the previous batch is cancelled first.
    pub async fn load_batch(&self, commands: Vec<Command>) -> Result<()> {
        self.ensure_open()?;
        self.cancel_active_run("superseded by a new batch").await;

        let len = commands.len();
        *self.batch.write().await = Arc::from(commands);
        self.status.update(|status| status.reset(len)).await;

        info!("Loaded batch of {} command(s)", len);
        Ok(())
    }

    /// Spawn the frame reader (no-op if already running)
    pub async fn start(&self) -> Result<()> {
        self.ensure_open()?;

        let mut reader = self.reader.lock().await;
        if reader.is_some() {
            return Ok(());
        }

        *reader = Some(
            FrameReader::new(
                self.transport.clone(),
                self.status.clone(),
                self.config.reader_poll_interval,
                self.shutdown.clone(),
            )
            .spawn(),
        );
        Ok(())
    }

    /// Spawn a sequencer for the loaded batch
    ///
    /// Starts the reader if needed. Only one run may be active at a time.
    pub async fn run_batch(&self) -> Result<BatchRun> {
        self.start().await?;

        let mut active = self.active_run.lock().await;
        if active.as_ref().is_some_and(|run| !run.task.is_finished()) {
            return Err(anyhow!("A batch run is already active"));
        }

        let cancel = self.shutdown.child_token();
        let sequencer = Sequencer::new(
            self.batch.read().await.clone(),
            self.transport.clone(),
            self.status.clone(),
            self.config.sequencer.clone(),
            cancel.clone(),
            self.shutdown.clone(),
        );

        let (result_tx, result_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let result = sequencer.run().await;
            let _ = result_tx.send(result);
        });

        *active = Some(ActiveRun { cancel, task });
        Ok(BatchRun { result_rx })
    }

    /// Load, start and run a batch, waiting for its result
    pub async fn execute(&self, commands: Vec<Command>) -> Result<BatchResult> {
        self.load_batch(commands).await?;
        let run = self.run_batch().await?;
        Ok(run.result().await)
    }

    /// Write a command without tracking any reply
    pub async fn send_raw(&self, text: &str) -> Result<()> {
        self.ensure_open()?;
        let frame = codec::encode_text(text).context("Invalid raw command")?;
        self.transport.lock().await.write(&frame).await
    }

    /// Latest decoded value and tuning percentage
    pub async fn current_value(&self) -> ValueSnapshot {
        self.status.values().await
    }

    /// Consistent snapshot of the whole status record
    pub async fn status(&self) -> Status {
        self.status.snapshot().await
    }

    /// Stop the reader and any run, then close the transport
    ///
    /// Safe to call more than once; the transport is closed exactly once.
    pub async fn stop(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.cancel();
        self.cancel_active_run("controller stopped").await;

        if let Some(reader) = self.reader.lock().await.take() {
            if let Err(e) = reader.await {
                warn!("Frame reader task ended abnormally: {}", e);
            }
        }

        let result = self.transport.lock().await.close().await;
        info!("Controller stopped");
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(anyhow!("Controller transport is closed"))
        }
    }

    async fn cancel_active_run(&self, reason: &str) {
        let Some(run) = self.active_run.lock().await.take() else {
            return;
        };
        if run.task.is_finished() {
            return;
        }

        info!("Cancelling active batch run: {}", reason);
        run.cancel.cancel();
        if let Err(e) = run.task.await {
            warn!("Batch run task ended abnormally: {}", e);
        }
    }
}
