//! Batch State Machine
//!
//! Tracks where the active command of a batch stands and decides what the
//! sequencer does next.
//!
//! ```text
//! Init -> Sent -> { Ok | Fail | Continue | Sent (timeout) } -> ... -> Finished
//! ```

use crate::interpreter::{self, Verdict};
use crate::{timing, CommandKind, DecodedValue};

/// Where the active command stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Batch loaded, nothing sent yet
    Init,
    /// Command written, awaiting a classified reply or timeout
    Sent,
    /// Active command succeeded
    Ok,
    /// Active command's reply did not match
    Fail,
    /// Percent command still converging
    Continue,
    /// Terminal; a new batch must be loaded to leave this state
    Finished,
}

/// Terminal result of one batch run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
    /// Every command succeeded
    Success,
    /// Retries exhausted on the command at `index`
    Failure { last_reply: String, index: usize },
    /// No reply classified within the wait window for the command at `index`
    Timeout { index: usize },
    /// Transport fault, unencodable command or cancelled run
    Error { reason: String },
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// What the sequencer should do after settling an outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Send the command at this index (first attempt, retry or re-send)
    Send(usize),
    /// The batch is finished
    Done(BatchResult),
}

/// Status record shared by the frame reader and the sequencer
#[derive(Debug, Clone)]
pub struct Status {
    outcome: Outcome,
    active_index: usize,
    batch_len: usize,
    retry_count: u32,
    max_retries: u32,
    pending_kind: Option<CommandKind>,
    last_reply: String,
    decoded_value: Option<DecodedValue>,
    decoded_percent: Option<String>,
    result: Option<BatchResult>,
}

impl Default for Status {
    fn default() -> Self {
        Self::new(timing::DEFAULT_MAX_RETRIES)
    }
}

impl Status {
    /// Create a status with no batch loaded yet
    pub fn new(max_retries: u32) -> Self {
        Self {
            outcome: Outcome::Init,
            active_index: 0,
            batch_len: 0,
            retry_count: 0,
            max_retries,
            pending_kind: None,
            last_reply: String::new(),
            decoded_value: None,
            decoded_percent: None,
            result: None,
        }
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn batch_len(&self) -> usize {
        self.batch_len
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn last_reply(&self) -> &str {
        &self.last_reply
    }

    pub fn decoded_value(&self) -> Option<&DecodedValue> {
        self.decoded_value.as_ref()
    }

    pub fn decoded_percent(&self) -> Option<&str> {
        self.decoded_percent.as_deref()
    }

    /// Result of the finished batch, if any
    pub fn result(&self) -> Option<&BatchResult> {
        self.result.as_ref()
    }

    /// Reset for a newly loaded batch of `batch_len` commands
    ///
    /// An empty batch has nothing to drive and finishes immediately.
    pub fn reset(&mut self, batch_len: usize) {
        self.outcome = Outcome::Init;
        self.active_index = 0;
        self.batch_len = batch_len;
        self.retry_count = 0;
        self.pending_kind = None;
        self.last_reply.clear();
        self.decoded_value = None;
        self.decoded_percent = None;
        self.result = None;

        if batch_len == 0 {
            self.finish(BatchResult::Success);
        }
    }

    /// Record that the active command (of `kind`) is about to be written
    ///
    /// Returns `false` if the batch is already finished.
    pub fn mark_sent(&mut self, kind: CommandKind) -> bool {
        if self.outcome == Outcome::Finished {
            return false;
        }
        self.outcome = Outcome::Sent;
        self.pending_kind = Some(kind);
        true
    }

    /// Classify a reply against the pending command
    ///
    /// Only a command in the `Sent` state can be answered; replies arriving
    /// in any other state are stray and leave the status untouched. Returns
    /// the verdict when the reply was applied.
    pub fn apply_reply(&mut self, reply: &str) -> Option<Verdict> {
        if self.outcome != Outcome::Sent {
            return None;
        }
        let kind = self.pending_kind?;

        let interpretation = interpreter::interpret(kind, reply);
        self.last_reply = reply.to_owned();
        if let Some(value) = interpretation.value {
            self.decoded_value = Some(value);
        }
        if let Some(percent) = interpretation.percent {
            self.decoded_percent = Some(percent);
        }
        self.outcome = interpretation.verdict.into();
        self.pending_kind = None;

        Some(interpretation.verdict)
    }

    /// Apply the transition for the currently observed outcome
    ///
    /// Called by the sequencer once the wait for a reply has ended (or before
    /// the first send). A command still `Sent` here has timed out.
    pub fn settle(&mut self) -> Step {
        match self.outcome {
            Outcome::Init | Outcome::Continue if self.active_index >= self.batch_len => {
                self.active_index = self.batch_len;
                self.finish(BatchResult::Success)
            }
            Outcome::Init | Outcome::Continue => Step::Send(self.active_index),
            Outcome::Ok => {
                self.active_index += 1;
                self.retry_count = 0;
                if self.active_index >= self.batch_len {
                    self.active_index = self.batch_len;
                    self.finish(BatchResult::Success)
                } else {
                    Step::Send(self.active_index)
                }
            }
            Outcome::Fail => {
                self.retry_count += 1;
                if self.retry_count < self.max_retries {
                    Step::Send(self.active_index)
                } else {
                    let result = BatchResult::Failure {
                        last_reply: self.last_reply.clone(),
                        index: self.active_index,
                    };
                    self.finish(result)
                }
            }
            Outcome::Sent => self.finish(BatchResult::Timeout {
                index: self.active_index,
            }),
            Outcome::Finished => Step::Done(self.result.clone().unwrap_or(BatchResult::Error {
                reason: "finished without result".into(),
            })),
        }
    }

    /// Finish the batch with an error unless it already finished
    pub fn abort(&mut self, reason: impl Into<String>) -> Step {
        if self.outcome == Outcome::Finished {
            return self.settle();
        }
        self.finish(BatchResult::Error {
            reason: reason.into(),
        })
    }

    fn finish(&mut self, result: BatchResult) -> Step {
        self.outcome = Outcome::Finished;
        self.pending_kind = None;
        self.result = Some(result.clone());
        Step::Done(result)
    }
}
