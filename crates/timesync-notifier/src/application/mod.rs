//! Application layer of the notifier.
//!
//! Everything here is plain data manipulation with no sockets and no threads,
//! so it can be unit tested without touching the network.
//!
//! # Sub-modules
//!
//! - **`manage_clients`** – The set of receivers that asked for unicast
//!   delivery by sending a register datagram.
//!
//! - **`publish`** – Computes the destination set for one publish tick and
//!   fans a Sync Packet out to it through the [`publish::DatagramSink`] seam,
//!   isolating one destination's failure from the others.

pub mod manage_clients;
pub mod publish;
