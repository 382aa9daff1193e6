//! Newline-delimited JSON framing for [`Envelope`]s.
//!
//! JSON escapes raw newlines inside strings, so `\n` can only appear on
//! the wire as a frame terminator. A frame is one JSON object followed by
//! `\n` (a preceding `\r` is tolerated).

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::Envelope;

/// Maximum frame size (1 MB), excluding the terminator.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1_048_576;

/// Errors produced while framing or parsing envelopes.
///
/// Every variant other than `Io` means the peer sent something that is
/// not a well-formed envelope.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("Stream ended inside a frame ({bytes} bytes buffered)")]
    Truncated { bytes: usize },

    #[error("Unexpected {bytes} bytes after frame")]
    TrailingBytes { bytes: usize },
}

impl CodecError {
    /// True for errors caused by the transport rather than the bytes.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Streaming codec for envelopes.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    /// Index of next byte to check for newline
    next_index: usize,
    /// Maximum frame body length
    max_frame_bytes: usize,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            next_index: 0,
            max_frame_bytes,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    fn parse_frame(&self, frame: &[u8]) -> Result<Envelope, CodecError> {
        let body = frame.strip_suffix(b"\n").unwrap_or(frame);
        let body = body.strip_suffix(b"\r").unwrap_or(body);

        if body.len() > self.max_frame_bytes {
            return Err(CodecError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame_bytes,
            });
        }

        let text = std::str::from_utf8(body)?;
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
        let start = self.next_index.min(src.len());
        let newline = src
            .get(start..)
            .and_then(|rest| rest.iter().position(|b| *b == b'\n'));

        match newline {
            Some(offset) => {
                let frame = src.split_to(start + offset + 1);
                self.next_index = 0;
                self.parse_frame(&frame).map(Some)
            }
            None => {
                // Remember where we stopped so the next scan resumes there
                self.next_index = src.len();

                if src.len() > self.max_frame_bytes {
                    return Err(CodecError::FrameTooLarge {
                        size: src.len(),
                        max: self.max_frame_bytes,
                    });
                }

                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
        if let Some(envelope) = self.decode(src)? {
            return Ok(Some(envelope));
        }

        if src.is_empty() {
            return Ok(None);
        }

        // A partial frame at close is an error, never a message
        let bytes = src.len();
        src.clear();
        self.next_index = 0;
        Err(CodecError::Truncated { bytes })
    }
}

impl EnvelopeCodec {
    fn write_frame(&self, envelope: &Envelope, dst: &mut BytesMut) -> Result<(), CodecError> {
        let json = serde_json::to_vec(envelope).map_err(|e| CodecError::Malformed(e.to_string()))?;

        if json.len() > self.max_frame_bytes {
            return Err(CodecError::FrameTooLarge {
                size: json.len(),
                max: self.max_frame_bytes,
            });
        }

        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}

// A single Encoder impl keeps `Sink::close`/`flush` unambiguous on FramedWrite.
impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<(), CodecError> {
        self.write_frame(&envelope, dst)
    }
}

/// Encodes one envelope into a complete frame.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    let mut buf = BytesMut::new();
    EnvelopeCodec::new().write_frame(envelope, &mut buf)?;
    Ok(buf.to_vec())
}

/// Decodes exactly one frame.
///
/// Fails if the bytes hold a partial frame, a malformed envelope, or
/// anything after the first frame.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let mut codec = EnvelopeCodec::new();
    let mut buf = BytesMut::from(bytes);

    match codec.decode_eof(&mut buf)? {
        Some(envelope) if buf.is_empty() => Ok(envelope),
        Some(_) => Err(CodecError::TrailingBytes { bytes: buf.len() }),
        None => Err(CodecError::Truncated { bytes: 0 }),
    }
}
