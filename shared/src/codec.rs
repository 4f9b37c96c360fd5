//! Carriage-return framed codec for the controller's ASCII protocol
//!
//! Commands and replies share the same framing:
//! ```text
//! [ N bytes: ASCII text ][ 0x0D ]
//! ```
//!
//! The terminator is stripped before a reply is handed to the interpreter.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::Command;

/// Frame terminator (carriage return)
pub const TERMINATOR: u8 = 0x0D;

/// Maximum reply length without a terminator before the buffer is discarded
pub const MAX_FRAME_LEN: usize = 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Command text contains the frame terminator")]
    EmbeddedTerminator,

    #[error("Command text is not ASCII")]
    NonAscii,

    #[error("Reply is not valid text: {0}")]
    InvalidText(#[from] std::str::Utf8Error),

    #[error("Frame too large: {0} bytes without terminator (max: {MAX_FRAME_LEN})")]
    FrameTooLarge(usize),
}

/// Encode a command as its wire bytes, terminator included
pub fn encode(command: &Command) -> Result<Bytes, CodecError> {
    encode_text(command.text())
}

/// Encode raw command text as wire bytes, terminator included
pub fn encode_text(text: &str) -> Result<Bytes, CodecError> {
    if !text.is_ascii() {
        return Err(CodecError::NonAscii);
    }
    if text.as_bytes().contains(&TERMINATOR) {
        return Err(CodecError::EmbeddedTerminator);
    }

    let mut buf = BytesMut::with_capacity(text.len() + 1);
    buf.put_slice(text.as_bytes());
    buf.put_u8(TERMINATOR);

    Ok(buf.freeze())
}

/// Try to decode one terminated reply from a buffer
///
/// Returns:
/// - `Ok(Some(reply))` if a complete frame was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if a frame was consumed but could not be decoded
///
/// After `FrameTooLarge` the buffer holds only the start of the oversized
/// frame; its tail up to the next terminator must be skipped by the caller.
/// [`FrameDecoder`] does this.
pub fn decode(buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
    let Some(end) = buf.iter().position(|&b| b == TERMINATOR) else {
        if buf.len() > MAX_FRAME_LEN {
            let len = buf.len();
            buf.clear();
            return Err(CodecError::FrameTooLarge(len));
        }
        return Ok(None);
    };

    let frame = buf.split_to(end);
    buf.advance(1);

    let text = std::str::from_utf8(&frame)?;
    Ok(Some(text.to_owned()))
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
    /// Skipping the tail of an oversized frame until the next terminator
    discarding: bool,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
            discarding: false,
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)`. An error means one
    /// frame was dropped; later frames are still decodable.
    pub fn decode_next(&mut self) -> Result<Option<String>, CodecError> {
        if self.discarding {
            match self.buffer.iter().position(|&b| b == TERMINATOR) {
                Some(end) => {
                    self.buffer.advance(end + 1);
                    self.discarding = false;
                }
                None => {
                    self.buffer.clear();
                    return Ok(None);
                }
            }
        }

        let result = decode(&mut self.buffer);
        if matches!(result, Err(CodecError::FrameTooLarge(_))) {
            self.discarding = true;
        }
        result
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
