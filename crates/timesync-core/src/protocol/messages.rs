//! Datagram layouts used between the notifier and its receivers.
//!
//! Every payload travels as a single UDP datagram.  There is no common header:
//! the first byte is a tag and the datagram length alone decides whether the
//! rest of the bytes make sense.
//!
//! ```text
//! Sync Packet (notifier → receivers, 18 bytes)
//! [0x01][status:u8][time:i64][length:i64]
//!
//! Control messages (receiver → notifier)
//! [0x01]                   register      (1 byte)
//! [0x02]                   unregister    (1 byte)
//! [0x03][payload:8 bytes]  echo          (9 bytes, accepted but never answered)
//! ```
//!
//! All multi-byte integers are big-endian two's-complement.

// ── Sync Packet layout ────────────────────────────────────────────────────────

/// Tag byte that opens every Sync Packet.
pub const SYNC_TAG: u8 = 0x01;

/// Total size of an encoded Sync Packet in bytes.
pub const SYNC_PACKET_LEN: usize = 18;

/// Byte offset of the status field.
pub const STATUS_OFFSET: usize = 1;

/// Byte offset of the big-endian `time` field.
pub const TIME_OFFSET: usize = 2;

/// Byte offset of the big-endian `length` field.
pub const LENGTH_OFFSET: usize = 10;

// ── Control message layout ────────────────────────────────────────────────────

/// Tag byte of a register request.
pub const REGISTER_TAG: u8 = 0x01;

/// Tag byte of an unregister request.
pub const UNREGISTER_TAG: u8 = 0x02;

/// Tag byte of an echo request.
pub const ECHO_TAG: u8 = 0x03;

/// Size of a register or unregister datagram.
pub const SHORT_CONTROL_LEN: usize = 1;

/// Size of an echo datagram: tag plus 8 opaque payload bytes.
pub const ECHO_LEN: usize = 9;

/// A control message sent by a receiver to the notifier's listen port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Add the sender's address to the unicast client registry.
    Register,
    /// Remove the sender's address from the unicast client registry.
    Unregister,
    /// Echo request.  The wire slot is reserved; the notifier logs it and
    /// does not reply.
    Echo([u8; 8]),
}

impl ControlMessage {
    /// Returns the tag byte this message is encoded with.
    pub fn tag(&self) -> u8 {
        match self {
            ControlMessage::Register => REGISTER_TAG,
            ControlMessage::Unregister => UNREGISTER_TAG,
            ControlMessage::Echo(_) => ECHO_TAG,
        }
    }
}
