//! Message framing and the schema-driven codec.

pub mod codec;
pub mod wire;

pub use codec::{decode_message, discard_message, encode_message, DecodedMessage, EncodedMessage};
pub use wire::{padded_len, MessageHeader, HEADER_SIZE, MAX_MESSAGE_SIZE};
