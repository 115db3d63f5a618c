// Framing - length-prefixed JSON frames
//
// Each frame is a 4-byte big-endian length followed by one JSON payload.
// The decoder buffers partial reads and yields a message only once its
// whole frame has arrived.

use crate::wire::Message;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec, LengthDelimitedCodecError};

/// Largest frame accepted unless configured otherwise (16 MiB)
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Errors from encoding or decoding frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Malformed message: {0}")]
    Format(String),

    #[error("Frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl WireError {
    /// Check if the peer sent something we cannot interpret
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::Format(_) | Self::FrameTooLarge { .. })
    }
}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        let oversized = e
            .get_ref()
            .map(|inner| inner.is::<LengthDelimitedCodecError>())
            .unwrap_or(false);

        if oversized {
            Self::Format(e.to_string())
        } else {
            Self::Io(e.to_string())
        }
    }
}

/// Codec turning a byte stream into [`Message`]s and back
#[derive(Debug)]
pub struct MessageCodec {
    frames: LengthDelimitedCodec,
    max_frame_length: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl MessageCodec {
    pub fn new(max_frame_length: usize) -> Self {
        let frames = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .max_frame_length(max_frame_length)
            .new_codec();

        Self {
            frames,
            max_frame_length,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Encode a message into a complete frame, header included
    pub fn encode_frame(&mut self, message: &Message) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::new();
        self.encode(message.clone(), &mut buf)?;
        Ok(buf.freeze())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, WireError> {
        match self.frames.decode(src)? {
            Some(frame) => Message::from_bytes(&frame).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = WireError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), WireError> {
        let payload = message.to_bytes()?;
        if payload.len() > self.max_frame_length {
            return Err(WireError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_length,
            });
        }
        self.frames.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}
