//! Newline-delimited transport codec for protocol messages.
//!
//! Each [`Message`] is one UTF-8 JSON object terminated by `\n`; there is no
//! length prefix and no message may span multiple lines. A line that fails to
//! parse is logged and skipped rather than tearing down the session.

use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::protocol::Message;

/// Maximum accepted line length (16 MB). A peer writing past this is broken.
const MAX_LINE_SIZE: usize = 16 * 1024 * 1024;

/// Codec for newline-delimited JSON protocol messages.
#[derive(Debug, Default)]
pub struct LineCodec {
    scanned: usize,
}

impl LineCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.scanned..].iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_SIZE {
                    return Err(CodecError::LineTooLong(src.len()));
                }
                // Remember how far we scanned so the next call resumes there.
                self.scanned = src.len();
                return Ok(None);
            };

            let line = src.split_to(self.scanned + offset + 1);
            self.scanned = 0;

            let line = std::str::from_utf8(&line[..line.len() - 1])?.trim();
            if line.is_empty() {
                continue;
            }

            match Message::parse(line) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    // Unparseable input is dropped per-line, never fatal.
                    warn!("Dropping unparseable message line: {}", e);
                }
            }
        }
    }
}

impl Encoder<Message> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = item.to_json()?;
        if json.len() > MAX_LINE_SIZE {
            return Err(CodecError::LineTooLong(json.len()));
        }

        dst.reserve(json.len() + 1);
        dst.put_slice(json.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Line too long: {0} bytes (max: {MAX_LINE_SIZE})")]
    LineTooLong(usize),
}
