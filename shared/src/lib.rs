//! TCM Shared Protocol Types
//!
//! This crate provides the protocol types, reply interpreter, frame codec
//! and batch state machine for driving a TCM temperature/process controller.
//! Nothing in here performs I/O.

pub mod codec;
pub mod interpreter;
pub mod state_machine;

use std::fmt;

pub use interpreter::{interpret, Interpretation, Verdict};
pub use state_machine::{BatchResult, Outcome, Status, Step};

/// Timing and retry parameters for the protocol
pub mod timing {
    /// Attempts allowed for a failing command before the batch fails
    pub const DEFAULT_MAX_RETRIES: u32 = 5;

    /// Interval between outcome checks while a reply is pending
    pub const REPLY_POLL_INTERVAL_MS: u64 = 500;

    /// Number of outcome checks before a sent command times out
    pub const REPLY_MAX_POLLS: u32 = 20;

    /// Pause between consecutive command attempts
    pub const INTER_COMMAND_DELAY_MS: u64 = 1000;

    /// Idle interval of the frame reader when no byte is available
    pub const READER_POLL_INTERVAL_MS: u64 = 10;

    /// Default controller baud rate
    pub const DEFAULT_BAUD_RATE: u32 = 57600;

    /// Upper bound on a single byte read from the transport
    pub const SERIAL_READ_TIMEOUT_MS: u64 = 1000;
}

/// Selects the rule used to interpret the reply to a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Setting acknowledged with `REPLY=1`
    Ack,
    /// Tuning progress reported as a percentage until it reaches 100
    Percent,
    /// Query answered with `=value@`
    Value,
    /// Save acknowledged with `REPLY=8`
    Save,
    /// Echo for display, validated like `Ack`
    RawEcho,
}

impl CommandKind {
    /// Parse the one-letter tag used in instrument tables
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "A" => Some(Self::Ack),
            "P" => Some(Self::Percent),
            "V" => Some(Self::Value),
            "S" => Some(Self::Save),
            "R" => Some(Self::RawEcho),
            _ => None,
        }
    }

    /// The one-letter tag for this kind
    pub fn tag(self) -> &'static str {
        match self {
            Self::Ack => "A",
            Self::Percent => "P",
            Self::Value => "V",
            Self::Save => "S",
            Self::RawEcho => "R",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A single instrument command queued for the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    kind: CommandKind,
}

impl Command {
    /// Create a command from its wire text (without terminator) and kind
    pub fn new(text: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    /// Build a value query, `module:register?@device`
    pub fn query(device: &str, module: &str, register: &str) -> Self {
        Self::new(format!("{}:{}?@{}", module, register, device), CommandKind::Value)
    }

    /// Build a setting or action command, `module:register@device`
    pub fn setting(device: &str, module: &str, register: &str, kind: CommandKind) -> Self {
        Self::new(format!("{}:{}@{}", module, register, device), kind)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.text)
    }
}

/// Value decoded from a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedValue {
    /// Raw text between `=` and `@` of a value reply
    Text(String),
    /// Numeric completion value of a percent command
    Number(i64),
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}
