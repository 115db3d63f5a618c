// Wire module - THE ENVELOPE
// Message types, JSON payload shape and length-prefixed framing

mod codec;
mod message;

pub use codec::{MessageCodec, WireError, DEFAULT_MAX_FRAME_LENGTH};
pub use message::{Message, MessageKind};
