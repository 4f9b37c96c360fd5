//! Reply Interpreter
//!
//! Classifies a controller reply according to the kind of the command it
//! answers. Replies are matched as fixed-width text: the status field sits at
//! character offsets 4..11 (e.g. `RPY1REPLY=1`), and values sit between the
//! first `=` and the first `@` (e.g. `RPY1=25.3@0`).

use crate::{CommandKind, DecodedValue, Outcome};

/// Acknowledgement of a setting or echo command
const REPLY_ACK: &str = "REPLY=1";
/// Device-reported error for a value query
const REPLY_ERROR: &str = "REPLY=2";
/// Acknowledgement of a save command
const REPLY_SAVED: &str = "REPLY=8";

/// Percentage reported when tuning has converged
const PERCENT_COMPLETE: &str = "100";

/// Classification of a single reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Command succeeded
    Ok,
    /// Reply did not match the expected shape
    Fail,
    /// Percent command still converging
    Continue,
}

impl From<Verdict> for Outcome {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Ok => Outcome::Ok,
            Verdict::Fail => Outcome::Fail,
            Verdict::Continue => Outcome::Continue,
        }
    }
}

/// Result of interpreting one reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpretation {
    pub verdict: Verdict,
    /// New decoded value, if the reply carried one
    pub value: Option<DecodedValue>,
    /// New tuning percentage, if the reply carried one
    pub percent: Option<String>,
}

impl Interpretation {
    fn verdict(verdict: Verdict) -> Self {
        Self {
            verdict,
            value: None,
            percent: None,
        }
    }
}

/// Interpret `reply` as the answer to a command of `kind`
pub fn interpret(kind: CommandKind, reply: &str) -> Interpretation {
    match kind {
        CommandKind::Ack | CommandKind::RawEcho => expect_status(reply, REPLY_ACK),
        CommandKind::Save => expect_status(reply, REPLY_SAVED),
        CommandKind::Value => {
            if status_field_is(reply, REPLY_ERROR) {
                return Interpretation::verdict(Verdict::Fail);
            }
            match payload(reply) {
                Some(value) => Interpretation {
                    verdict: Verdict::Ok,
                    value: Some(DecodedValue::Text(value.to_owned())),
                    percent: None,
                },
                None => Interpretation::verdict(Verdict::Fail),
            }
        }
        CommandKind::Percent => match payload(reply) {
            Some(PERCENT_COMPLETE) => Interpretation {
                verdict: Verdict::Ok,
                value: Some(DecodedValue::Number(100)),
                percent: Some(PERCENT_COMPLETE.to_owned()),
            },
            Some(percent) => Interpretation {
                verdict: Verdict::Continue,
                value: None,
                percent: Some(percent.to_owned()),
            },
            None => Interpretation::verdict(Verdict::Fail),
        },
    }
}

fn expect_status(reply: &str, expected: &str) -> Interpretation {
    if status_field_is(reply, expected) {
        Interpretation::verdict(Verdict::Ok)
    } else {
        Interpretation::verdict(Verdict::Fail)
    }
}

/// Compare characters 4..11 of the reply; shorter replies never match
fn status_field_is(reply: &str, expected: &str) -> bool {
    reply.chars().skip(4).take(7).eq(expected.chars())
}

/// Text between the first `=` and the first `@`
///
/// `None` when either delimiter is missing. An `@` before the `=` yields an
/// empty payload.
fn payload(reply: &str) -> Option<&str> {
    let start = reply.find('=')? + 1;
    let end = reply.find('@')?;
    Some(reply.get(start..end).unwrap_or(""))
}
