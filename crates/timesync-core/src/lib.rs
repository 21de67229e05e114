//! # timesync-core
//!
//! Shared library for the timesync notifier containing the UDP wire codec and
//! the boundary types for the clock authority.
//!
//! It has zero dependencies on OS APIs or network sockets, so receivers that
//! only want to decode Sync Packets can depend on it without pulling in the
//! notifier's socket stack.
//!
//! # Architecture overview
//!
//! A notifier periodically publishes a small status packet describing one
//! contest clock (its status, current time and total length) to every
//! interested receiver on the local network.  Receivers either listen on a
//! multicast group, on the subnet broadcast address, or register themselves
//! for unicast delivery by sending a one-byte control datagram.
//!
//! - **`protocol`** – How bytes travel over the network: the 18-byte Sync
//!   Packet and the 1- or 9-byte control messages.
//!
//! - **`domain`** – The [`ClockSnapshot`] value and the [`ClockAuthority`]
//!   trait the notifier queries on every publish tick.

pub mod domain;
pub mod protocol;

pub use domain::clock::{ClockAuthority, ClockError, ClockSnapshot};
pub use protocol::codec::{decode_control, decode_sync, encode_control, encode_sync, ProtocolError};
pub use protocol::messages::ControlMessage;
