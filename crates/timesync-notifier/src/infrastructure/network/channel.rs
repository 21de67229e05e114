//! The notifier's single UDP channel.
//!
//! [`SyncChannel::open`] turns a [`NotifierConfig`] into one ready-to-use,
//! non-blocking datagram socket plus the fixed destinations it publishes to:
//!
//! 1. Open an IPv4 UDP socket with `SO_REUSEADDR` and bind it to
//!    `0.0.0.0:<udp-listen-port>`, or to an ephemeral port when no listen port
//!    is configured (the socket can then only send).
//! 2. If `multicast-group` is set, resolve it and try every local IPv4
//!    interface in turn: make it the multicast egress interface and join the
//!    group on it.  Failures are logged and skipped; the memberships that did
//!    succeed are kept.  With no membership at all, multicast delivery is
//!    simply off.
//! 3. If `broadcast-addr` is set, resolve it and enable `SO_BROADCAST`.
//!
//! Only unresolvable host names and a socket that cannot be opened or bound
//! are fatal; they surface as [`ChannelError`] from `open`.
//!
//! # Why socket2?
//!
//! `std::net::UdpSocket::bind` sets options only after binding, but
//! `SO_REUSEADDR` must be set *before* `bind` to share the port with another
//! receiver on the same host.  `socket2` exposes the raw socket lifecycle
//! (`new` → options → `bind`) and the `IP_MULTICAST_IF` option.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::publish::{DatagramSink, DeliveryTargets};
use crate::infrastructure::storage::config::NotifierConfig;

/// Error type for channel setup.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A configured host name could not be resolved.
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    /// A configured host name resolved, but not to an IPv4 address.
    #[error("{host} has no IPv4 address")]
    NoIpv4Address { host: String },

    /// The configured multicast group is outside 224.0.0.0/4.
    #[error("{0} is not a multicast address")]
    NotMulticast(Ipv4Addr),

    /// Multicast or broadcast is enabled but `udp-port` is absent.
    #[error("udp-port is required for multicast and broadcast delivery")]
    MissingDestinationPort,

    /// The base socket could not be created.
    #[error("failed to open UDP socket: {0}")]
    Open(#[source] io::Error),

    /// The socket could not be bound.
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A required socket option could not be set.
    #[error("failed to set {option}: {source}")]
    SocketOption {
        option: &'static str,
        #[source]
        source: io::Error,
    },
}

/// A successful join of the channel's socket to a group on one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastMembership {
    pub group: Ipv4Addr,
    /// Interface name as reported by the OS (e.g. `eth0`).
    pub interface: String,
    /// Local address identifying the interface.
    pub interface_addr: Ipv4Addr,
}

/// The multicast-related socket calls used by the per-interface join.
///
/// Implemented for `socket2::Socket`; tests use a mock so that partial
/// failure can be exercised without real interfaces.
#[cfg_attr(test, mockall::automock)]
pub trait MulticastSocket {
    /// Sets `IP_MULTICAST_IF`.
    fn set_egress_interface(&self, interface: Ipv4Addr) -> io::Result<()>;
    /// Adds `IP_ADD_MEMBERSHIP` for `group` on `interface`.
    fn join_group(&self, group: Ipv4Addr, interface: Ipv4Addr) -> io::Result<()>;
}

impl MulticastSocket for Socket {
    fn set_egress_interface(&self, interface: Ipv4Addr) -> io::Result<()> {
        self.set_multicast_if_v4(&interface)
    }

    fn join_group(&self, group: Ipv4Addr, interface: Ipv4Addr) -> io::Result<()> {
        self.join_multicast_v4(&group, &interface)
    }
}

/// One non-blocking UDP socket plus the destinations resolved from config.
///
/// Owned by the sync event loop's thread once the worker is started.
/// Dropping the channel leaves every multicast group it joined and closes the
/// socket.
#[derive(Debug)]
pub struct SyncChannel {
    socket: mio::net::UdpSocket,
    memberships: Vec<MulticastMembership>,
    targets: DeliveryTargets,
}

impl SyncChannel {
    /// Builds the channel described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when the socket cannot be opened or bound, a
    /// host name does not resolve, or broadcast cannot be enabled.
    /// Per-interface multicast failures are *not* errors.
    pub fn open(config: &NotifierConfig) -> Result<Self, ChannelError> {
        let socket = open_socket(config.udp_listen_port)?;
        let mut targets = DeliveryTargets::default();
        let mut memberships = Vec::new();

        if let Some(group_host) = &config.multicast_group {
            info!("initiating multicast notifier");
            let port = config.udp_port.ok_or(ChannelError::MissingDestinationPort)?;
            let group = resolve_ipv4(group_host, port)?;
            if !group.ip().is_multicast() {
                return Err(ChannelError::NotMulticast(*group.ip()));
            }

            memberships = join_on_interfaces(&socket, *group.ip(), &list_ipv4_interfaces());
            if memberships.is_empty() {
                warn!("no interface accepted multicast group {group}; multicast delivery disabled");
            } else {
                if let Err(e) = socket.set_multicast_loop_v4(true) {
                    debug!("could not enable multicast loopback: {e}");
                }
                targets.multicast = Some(SocketAddr::V4(group));
                info!(
                    "multicast notifier initiated: {group} on {} interface(s)",
                    memberships.len()
                );
            }
        }

        if let Some(broadcast_host) = &config.broadcast_addr {
            warn!("broadcast delivery floods every host on the subnet; prefer multicast");
            info!("initiating broadcast notifier");
            let port = config.udp_port.ok_or(ChannelError::MissingDestinationPort)?;
            let addr = resolve_ipv4(broadcast_host, port)?;
            socket
                .set_broadcast(true)
                .map_err(|source| ChannelError::SocketOption {
                    option: "SO_BROADCAST",
                    source,
                })?;
            targets.broadcast = Some(SocketAddr::V4(addr));
            info!("broadcast notifier initiated: {addr}");
        }

        if let Some(tcp_port) = config.tcp_port {
            error!("TCP notifier not implemented (tcp-port {tcp_port} ignored)");
        }

        let std_socket: std::net::UdpSocket = socket.into();
        Ok(Self {
            socket: mio::net::UdpSocket::from_std(std_socket),
            memberships,
            targets,
        })
    }

    pub fn targets(&self) -> DeliveryTargets {
        self.targets
    }

    pub fn memberships(&self) -> &[MulticastMembership] {
        &self.memberships
    }

    /// Address the socket is bound to (useful when the port was ephemeral).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives one pending datagram without blocking.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    /// The socket as a mio event source, for (re)registration with a `Poll`.
    pub fn source(&mut self) -> &mut mio::net::UdpSocket {
        &mut self.socket
    }
}

impl DatagramSink for SyncChannel {
    fn send_datagram(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(payload, dest)
    }
}

impl Drop for SyncChannel {
    fn drop(&mut self) {
        for m in &self.memberships {
            if let Err(e) = self.socket.leave_multicast_v4(&m.group, &m.interface_addr) {
                debug!("leaving {} on {} failed: {e}", m.group, m.interface);
            }
        }
    }
}

// ── Setup helpers ─────────────────────────────────────────────────────────────

/// Creates the non-blocking, address-reusing socket and binds it.
fn open_socket(listen_port: Option<u16>) -> Result<Socket, ChannelError> {
    let socket =
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(ChannelError::Open)?;
    socket
        .set_reuse_address(true)
        .map_err(|source| ChannelError::SocketOption {
            option: "SO_REUSEADDR",
            source,
        })?;
    socket
        .set_nonblocking(true)
        .map_err(|source| ChannelError::SocketOption {
            option: "O_NONBLOCK",
            source,
        })?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, listen_port.unwrap_or(0)));
    socket
        .bind(&addr.into())
        .map_err(|source| ChannelError::Bind { addr, source })?;

    match listen_port {
        Some(port) => info!("UDP notifier listening for control messages on port {port}"),
        None => debug!("no udp-listen-port configured; socket is send-only"),
    }
    Ok(socket)
}

/// Resolves `host` (literal or name) to its first IPv4 address on `port`.
///
/// # Errors
///
/// Returns [`ChannelError::Resolve`] if the lookup fails and
/// [`ChannelError::NoIpv4Address`] if it yields only IPv6 addresses.
pub fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddrV4, ChannelError> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddrV4::new(ip, port));
    }
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ChannelError::Resolve {
            host: host.to_string(),
            source,
        })?;
    addrs
        .filter_map(|a| match a {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| ChannelError::NoIpv4Address {
            host: host.to_string(),
        })
}

/// Lists every local IPv4 interface, loopback first.
///
/// The egress interface ends up on the last interface that joined, so putting
/// loopback first leaves a real NIC as the egress interface when one exists.
fn list_ipv4_interfaces() -> Vec<(String, Ipv4Addr)> {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            warn!("failed to list network interfaces: {e}");
            return Vec::new();
        }
    };

    let mut v4: Vec<(String, Ipv4Addr)> = interfaces
        .into_iter()
        .filter_map(|(name, ip)| match ip {
            IpAddr::V4(addr) => Some((name, addr)),
            IpAddr::V6(_) => None,
        })
        .collect();
    v4.sort_by_key(|(_, addr)| !addr.is_loopback());
    debug!("discovered {} IPv4 interface(s)", v4.len());
    v4
}

/// Attempts the join on every interface and returns the ones that succeeded.
///
/// A failure on one interface never stops the attempts on the rest.  When at
/// least one join succeeded, the egress interface is left on the last joined
/// interface rather than on whichever interface was tried last.
pub fn join_on_interfaces<S: MulticastSocket + ?Sized>(
    socket: &S,
    group: Ipv4Addr,
    interfaces: &[(String, Ipv4Addr)],
) -> Vec<MulticastMembership> {
    let mut joined = Vec::new();
    for (name, addr) in interfaces {
        let attempt = socket
            .set_egress_interface(*addr)
            .and_then(|()| socket.join_group(group, *addr));
        match attempt {
            Ok(()) => {
                debug!("joined multicast group {group} on {name} ({addr})");
                joined.push(MulticastMembership {
                    group,
                    interface: name.clone(),
                    interface_addr: *addr,
                });
            }
            // The group is already joined on the same NIC through another of
            // its addresses.
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                debug!("multicast group {group} already joined via {name} ({addr}), skipping");
            }
            Err(e) => {
                warn!("could not join multicast group {group} on {name} ({addr}): {e}");
            }
        }
    }

    let last_tried = interfaces.last().map(|(_, addr)| *addr);
    if let Some(egress) = joined.last() {
        if last_tried != Some(egress.interface_addr) {
            if let Err(e) = socket.set_egress_interface(egress.interface_addr) {
                warn!(
                    "could not restore multicast egress to {} ({}): {e}",
                    egress.interface, egress.interface_addr
                );
            }
        }
    }
    joined
}

// ── Tests ─────────────────────────────────────────────────────────────────────
