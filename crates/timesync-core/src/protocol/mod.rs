//! Protocol module containing the datagram layouts and the binary codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_control, decode_sync, encode_control, encode_sync, ProtocolError};
pub use messages::*;
