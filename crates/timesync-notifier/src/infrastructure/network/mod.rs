//! Network infrastructure for the notifier.
//!
//! # Sub-modules
//!
//! - **`channel`** – Builds the single non-blocking UDP socket: address reuse,
//!   optional listen port, per-interface multicast membership, broadcast
//!   capability, and the resolved multicast/broadcast destinations.
//!
//! - **`event_loop`** – The worker that owns the channel and the client
//!   registry, waits for readiness, handles control datagrams and runs one
//!   publish pass per sync interval.

pub mod channel;
pub mod event_loop;
