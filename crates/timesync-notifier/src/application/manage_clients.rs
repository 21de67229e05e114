//! Client registry: receivers that asked for unicast Sync Packets.
//!
//! A receiver registers by sending the one-byte `[0x01]` datagram to the
//! notifier's listen port; the *source address* of that datagram (IP and port)
//! becomes the unicast destination.  Sending `[0x02]` from the same address
//! removes it again.
//!
//! There is no handshake, no acknowledgment and no expiry.  A receiver that
//! disappears without unregistering stays a send target for the lifetime of
//! the notifier; a UDP send to a dead host costs one datagram per tick.
//!
//! # Ownership
//!
//! The registry is owned by the sync event loop and only ever touched from its
//! thread, so it has no internal locking.  Other threads see it through the
//! immutable snapshots the loop publishes.

use std::collections::BTreeSet;
use std::net::SocketAddr;

/// Set of remote addresses entitled to unicast Sync Packets.
///
/// A `BTreeSet` keeps the publish order stable from tick to tick, which makes
/// packet captures and tests deterministic.
#[derive(Debug, Default, Clone)]
pub struct ClientRegistry {
    clients: BTreeSet<SocketAddr>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `addr`.  Returns `true` if it was not registered before.
    pub fn register(&mut self, addr: SocketAddr) -> bool {
        self.clients.insert(addr)
    }

    /// Removes `addr`.  Returns `false` (and changes nothing) if it was absent.
    pub fn unregister(&mut self, addr: SocketAddr) -> bool {
        self.clients.remove(&addr)
    }

    /// Returns a copy of every registered address, in ascending order.
    pub fn snapshot(&self) -> Vec<SocketAddr> {
        self.clients.iter().copied().collect()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.clients.contains(addr)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
