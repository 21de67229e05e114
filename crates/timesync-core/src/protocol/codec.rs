//! Binary codec for Sync Packets and control messages.
//!
//! Sync Packet wire format:
//! ```text
//! [tag=0x01:1][status:1][time:8][length:8]
//! ```
//! Total size: 18 bytes. All multi-byte integers are big-endian.
//!
//! Control messages are recognised purely by `(length, tag)`.  Anything that
//! does not match one of the three known shapes decodes to
//! [`ProtocolError::Unrecognized`], which the notifier drops without a reply.

use crate::domain::clock::ClockSnapshot;
use crate::protocol::messages::{
    ControlMessage, ECHO_LEN, ECHO_TAG, LENGTH_OFFSET, REGISTER_TAG, SHORT_CONTROL_LEN,
    STATUS_OFFSET, SYNC_PACKET_LEN, SYNC_TAG, TIME_OFFSET, UNREGISTER_TAG,
};
use thiserror::Error;

/// Errors that can occur while decoding a datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The datagram length does not match the layout it claims to be.
    #[error("insufficient data: need {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The first byte is not the tag expected for this layout.
    #[error("unknown tag: 0x{0:02X}")]
    UnknownTag(u8),

    /// The datagram is not a control message this notifier understands.
    #[error("unrecognized control datagram (tag {tag:?}, {len} bytes)")]
    Unrecognized { tag: Option<u8>, len: usize },
}

// ── Sync Packet ───────────────────────────────────────────────────────────────

/// Encodes a [`ClockSnapshot`] into the fixed 18-byte Sync Packet.
///
/// The status is truncated to its low byte; `time` and `length` are written
/// as big-endian two's-complement.  This cannot fail.
///
/// # Examples
///
/// ```rust
/// use timesync_core::{encode_sync, ClockSnapshot};
///
/// let bytes = encode_sync(&ClockSnapshot::new(2, 1000, 5000));
/// assert_eq!(bytes[0], 0x01);
/// assert_eq!(bytes[1], 0x02);
/// assert_eq!(&bytes[8..10], &[0x03, 0xE8]);
/// ```
pub fn encode_sync(snapshot: &ClockSnapshot) -> [u8; SYNC_PACKET_LEN] {
    let mut buf = [0u8; SYNC_PACKET_LEN];
    buf[0] = SYNC_TAG;
    buf[STATUS_OFFSET] = snapshot.status as u8;
    buf[TIME_OFFSET..LENGTH_OFFSET].copy_from_slice(&snapshot.time.to_be_bytes());
    buf[LENGTH_OFFSET..SYNC_PACKET_LEN].copy_from_slice(&snapshot.length.to_be_bytes());
    buf
}

/// Decodes a Sync Packet back into a [`ClockSnapshot`].
///
/// Used by receivers.  The status comes back as the unsigned wire byte, so
/// statuses outside `0..=255` do not survive a round trip.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] unless `bytes` is exactly
/// 18 bytes long, and [`ProtocolError::UnknownTag`] if the first byte is not
/// the Sync tag.
pub fn decode_sync(bytes: &[u8]) -> Result<ClockSnapshot, ProtocolError> {
    if bytes.len() != SYNC_PACKET_LEN {
        return Err(ProtocolError::InsufficientData {
            needed: SYNC_PACKET_LEN,
            available: bytes.len(),
        });
    }
    if bytes[0] != SYNC_TAG {
        return Err(ProtocolError::UnknownTag(bytes[0]));
    }

    Ok(ClockSnapshot {
        status: i32::from(bytes[STATUS_OFFSET]),
        time: read_i64(bytes, TIME_OFFSET),
        length: read_i64(bytes, LENGTH_OFFSET),
    })
}

// ── Control messages ──────────────────────────────────────────────────────────

/// Classifies an inbound control datagram.
///
/// | length | first byte | result       |
/// |--------|------------|--------------|
/// | 1      | `0x01`     | `Register`   |
/// | 1      | `0x02`     | `Unregister` |
/// | 9      | `0x03`     | `Echo`       |
/// | other  | any        | error        |
///
/// # Errors
///
/// Returns [`ProtocolError::Unrecognized`] for every other shape, including
/// an empty datagram and a register tag followed by extra bytes.
pub fn decode_control(bytes: &[u8]) -> Result<ControlMessage, ProtocolError> {
    match (bytes.len(), bytes.first().copied()) {
        (SHORT_CONTROL_LEN, Some(REGISTER_TAG)) => Ok(ControlMessage::Register),
        (SHORT_CONTROL_LEN, Some(UNREGISTER_TAG)) => Ok(ControlMessage::Unregister),
        (ECHO_LEN, Some(ECHO_TAG)) => {
            let mut payload = [0u8; 8];
            payload.copy_from_slice(&bytes[1..ECHO_LEN]);
            Ok(ControlMessage::Echo(payload))
        }
        (len, tag) => Err(ProtocolError::Unrecognized { tag, len }),
    }
}

/// Encodes a control message the way a receiver sends it.
pub fn encode_control(msg: &ControlMessage) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ECHO_LEN);
    buf.push(msg.tag());
    if let ControlMessage::Echo(payload) = msg {
        buf.extend_from_slice(payload);
    }
    buf
}

fn read_i64(bytes: &[u8], offset: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    i64::from_be_bytes(raw)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
