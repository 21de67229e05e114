//! Publish planning and fan-out for one publish tick.
//!
//! Each tick the event loop:
//!
//! 1. Builds the destination set from the channel's fixed targets (multicast,
//!    broadcast) and the current client registry snapshot.
//! 2. Sends the same encoded Sync Packet to every destination, one
//!    `send_to` per destination.
//!
//! Sends are independent: an error sending to one destination is logged and
//! the pass moves on to the next.  Nothing is retried within a tick.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use tracing::{trace, warn};

/// Fixed destinations resolved by the channel manager at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryTargets {
    /// Multicast group and destination port.  `None` when multicast is not
    /// configured *or* no interface accepted the group membership.
    pub multicast: Option<SocketAddr>,
    /// Broadcast address and destination port, when configured.
    pub broadcast: Option<SocketAddr>,
}

/// One entry of a tick's destination set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Multicast(SocketAddr),
    Broadcast(SocketAddr),
    Client(SocketAddr),
}

impl Destination {
    pub fn addr(&self) -> SocketAddr {
        match *self {
            Destination::Multicast(a) | Destination::Broadcast(a) | Destination::Client(a) => a,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Multicast(a) => write!(f, "multicast {a}"),
            Destination::Broadcast(a) => write!(f, "broadcast {a}"),
            Destination::Client(a) => write!(f, "client {a}"),
        }
    }
}

/// Builds the destination set for one tick: multicast, then broadcast, then
/// every registered client.
pub fn destinations(targets: &DeliveryTargets, clients: &[SocketAddr]) -> Vec<Destination> {
    let mut out = Vec::with_capacity(clients.len() + 2);
    out.extend(targets.multicast.map(Destination::Multicast));
    out.extend(targets.broadcast.map(Destination::Broadcast));
    out.extend(clients.iter().copied().map(Destination::Client));
    out
}

/// Anything that can send one datagram to an address.
///
/// Implemented for the notifier's socket in `infrastructure::network`; tests
/// substitute a mock.
#[cfg_attr(test, mockall::automock)]
pub trait DatagramSink {
    fn send_datagram(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize>;
}

/// Outcome counts of one publish pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Sends `packet` to every destination, isolating failures.
pub fn publish<S: DatagramSink + ?Sized>(
    sink: &S,
    packet: &[u8],
    destinations: &[Destination],
) -> PublishReport {
    let mut report = PublishReport::default();
    for dest in destinations {
        match sink.send_datagram(packet, dest.addr()) {
            Ok(_) => {
                trace!("sync packet sent to {dest}");
                report.delivered += 1;
            }
            Err(e) => {
                warn!("failed to send sync packet to {dest}: {e}");
                report.failed += 1;
            }
        }
    }
    report
}

// ── Tests ─────────────────────────────────────────────────────────────────────
