//! The sync event loop: one worker thread, one socket, one `mio::Poll`.
//!
//! # States
//!
//! ```text
//!             sync interval elapsed
//!  ReadOnly ─────────────────────────► ReadWrite
//!     ▲                                    │
//!     └──────── publish pass done ─────────┘
//! ```
//!
//! In `ReadOnly` the socket is registered for `READABLE` only, so the poll
//! wakes for inbound control datagrams and otherwise sleeps until the publish
//! deadline.  Switching to `ReadWrite` re-registers the socket with
//! `WRITABLE` as well; the next writable event triggers one publish pass, and
//! the socket goes straight back to `ReadOnly`.
//!
//! # One datagram per iteration
//!
//! Each iteration receives at most one datagram.  mio is edge-triggered, so
//! after a successful receive the loop remembers that more data may be queued
//! and tries again on the next iteration without waiting for a new edge.
//!
//! # Shutdown
//!
//! The loop exits when its shutdown channel yields a message or is
//! disconnected.  The controlling thread also fires the [`Waker`] so that a
//! poll wait returns immediately, and the idle sleep between iterations is a
//! `recv_timeout` on that same channel, so both suspension points react to a
//! stop request without further I/O.

use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Token, Waker};
use timesync_core::{decode_control, encode_sync, ClockAuthority, ControlMessage, ProtocolError};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::application::manage_clients::ClientRegistry;
use crate::application::publish::{destinations, publish};
use crate::infrastructure::network::channel::SyncChannel;

const SOCKET: Token = Token(0);
const WAKER: Token = Token(1);

/// Lower bound on a poll wait, so an overdue deadline does not busy-spin.
pub const MIN_WAIT: Duration = Duration::from_millis(10);

/// Control datagrams are 1 or 9 bytes; anything longer is dropped anyway.
const RECV_BUF_LEN: usize = 512;

/// Which readiness events the socket is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    ReadOnly,
    ReadWrite,
}

impl LoopMode {
    fn interest(self) -> Interest {
        match self {
            LoopMode::ReadOnly => Interest::READABLE,
            LoopMode::ReadWrite => Interest::READABLE | Interest::WRITABLE,
        }
    }
}

/// Immutable view of the worker's state, handed to other threads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierStatus {
    /// Registered unicast clients, in send order.
    pub clients: Vec<SocketAddr>,
    /// Publish passes completed since start (skipped ticks not counted).
    pub publish_ticks: u64,
    /// Number of interfaces the multicast group was joined on.
    pub memberships: usize,
}

/// Timing and identity parameters of the loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub clock_id: String,
    pub sync_interval: Duration,
    pub idle_interval: Duration,
}

/// What one iteration amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    /// The wait ended with no socket event.
    TimedOut,
    /// A datagram was handled and/or a publish pass ran.
    Worked,
    /// The waker fired.
    Interrupted,
}

/// The worker that owns the channel and the client registry.
pub struct SyncEventLoop {
    channel: SyncChannel,
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    registry: ClientRegistry,
    authority: Arc<dyn ClockAuthority>,
    settings: LoopSettings,
    mode: LoopMode,
    last_publish: Instant,
    read_pending: bool,
    publish_ticks: u64,
    shutdown: Receiver<()>,
    status: watch::Sender<NotifierStatus>,
    buf: [u8; RECV_BUF_LEN],
}

impl SyncEventLoop {
    /// Creates the poll, registers the channel read-only and sets up the waker.
    ///
    /// The first publish happens one sync interval after construction.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the poll cannot be created or the socket
    /// cannot be registered with it.
    pub fn new(
        mut channel: SyncChannel,
        authority: Arc<dyn ClockAuthority>,
        settings: LoopSettings,
        shutdown: Receiver<()>,
        status: watch::Sender<NotifierStatus>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(channel.source(), SOCKET, LoopMode::ReadOnly.interest())?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        Ok(Self {
            channel,
            poll,
            events: Events::with_capacity(8),
            waker,
            registry: ClientRegistry::new(),
            authority,
            settings,
            mode: LoopMode::ReadOnly,
            last_publish: Instant::now(),
            read_pending: false,
            publish_ticks: 0,
            shutdown,
            status,
            buf: [0u8; RECV_BUF_LEN],
        })
    }

    /// Handle used by the controlling thread to interrupt a poll wait.
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Runs until a shutdown request arrives.  Consumes the loop; the channel
    /// (and with it the socket and memberships) is released on return.
    pub fn run(mut self) {
        info!(
            "sync event loop started for clock {} (interval {:?})",
            self.settings.clock_id, self.settings.sync_interval
        );
        self.send_status();

        loop {
            if self.shutdown_requested() {
                break;
            }

            let turn = match self.turn() {
                Ok(turn) => turn,
                Err(e) => {
                    warn!("sync event loop error: {e}");
                    Turn::Worked
                }
            };

            match turn {
                Turn::Interrupted | Turn::TimedOut => continue,
                Turn::Worked => {}
            }

            match self.shutdown.recv_timeout(self.settings.idle_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!("sync event loop stopped");
    }

    fn shutdown_requested(&self) -> bool {
        !matches!(self.shutdown.try_recv(), Err(TryRecvError::Empty))
    }

    /// One loop body: wait, then receive and/or publish.
    fn turn(&mut self) -> io::Result<Turn> {
        let elapsed = self.last_publish.elapsed();
        let remaining = self.settings.sync_interval.saturating_sub(elapsed);
        if self.mode == LoopMode::ReadOnly && remaining.is_zero() {
            self.switch_mode(LoopMode::ReadWrite)?;
        }

        let timeout = if self.read_pending {
            Duration::ZERO
        } else {
            remaining.max(MIN_WAIT)
        };
        if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(Turn::TimedOut);
            }
            return Err(e);
        }

        let mut readable = std::mem::take(&mut self.read_pending);
        let mut writable = false;
        for event in self.events.iter() {
            match event.token() {
                WAKER => return Ok(Turn::Interrupted),
                SOCKET => {
                    readable |= event.is_readable();
                    writable |= event.is_writable();
                }
                _ => {}
            }
        }

        if !readable && !writable {
            return Ok(Turn::TimedOut);
        }
        if readable {
            self.receive_one();
        }
        if writable && self.mode == LoopMode::ReadWrite {
            self.publish_tick();
            self.switch_mode(LoopMode::ReadOnly)?;
        }
        Ok(Turn::Worked)
    }

    fn switch_mode(&mut self, mode: LoopMode) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(self.channel.source(), SOCKET, mode.interest())?;
        trace!("socket interest switched to {mode:?}");
        self.mode = mode;
        Ok(())
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    fn receive_one(&mut self) {
        match self.channel.recv_from(&mut self.buf) {
            Ok((len, src)) => {
                self.read_pending = true;
                let decoded = decode_control(&self.buf[..len]);
                self.apply_control(decoded, src);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                // Some platforms surface per-datagram errors here; whatever is
                // still queued is picked up on the next iteration.
                self.read_pending = true;
                warn!("control receive failed: {e}");
            }
        }
    }

    fn apply_control(&mut self, decoded: Result<ControlMessage, ProtocolError>, src: SocketAddr) {
        match decoded {
            Ok(ControlMessage::Register) => {
                if self.registry.register(src) {
                    info!("client {src} registered ({} total)", self.registry.len());
                    self.send_status();
                } else {
                    debug!("client {src} already registered");
                }
            }
            Ok(ControlMessage::Unregister) => {
                if self.registry.unregister(src) {
                    info!("client {src} unregistered ({} left)", self.registry.len());
                    self.send_status();
                } else {
                    debug!("unregister from unknown client {src} ignored");
                }
            }
            Ok(ControlMessage::Echo(payload)) => {
                debug!("echo request from {src} ({payload:02X?}); echo replies are not supported");
            }
            Err(e) => trace!("dropping datagram from {src}: {e}"),
        }
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    fn publish_tick(&mut self) {
        match self.authority.clock(&self.settings.clock_id) {
            Ok(snapshot) => {
                let packet = encode_sync(&snapshot);
                let dests = destinations(&self.channel.targets(), &self.registry.snapshot());
                let report = publish(&self.channel, &packet, &dests);
                self.publish_ticks += 1;
                debug!(
                    "publish tick {}: clock {} {:?} -> {} delivered, {} failed",
                    self.publish_ticks,
                    self.settings.clock_id,
                    snapshot,
                    report.delivered,
                    report.failed
                );
            }
            Err(e) => warn!(
                "clock {} unavailable, skipping publish tick: {e}",
                self.settings.clock_id
            ),
        }
        self.last_publish = Instant::now();
        self.send_status();
    }

    fn send_status(&self) {
        self.status.send_replace(NotifierStatus {
            clients: self.registry.snapshot(),
            publish_ticks: self.publish_ticks,
            memberships: self.channel.memberships().len(),
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::config::NotifierConfig;
    use mockall::mock;
    use std::net::UdpSocket;
    use std::sync::mpsc;
    use timesync_core::{decode_sync, ClockError, ClockSnapshot};

    mock! {
        pub Authority {}
        impl ClockAuthority for Authority {
            fn clock(&self, clock_id: &str) -> Result<ClockSnapshot, ClockError>;
        }
    }

    struct Harness {
        event_loop: SyncEventLoop,
        target: SocketAddr,
        _shutdown_tx: mpsc::Sender<()>,
        status_rx: watch::Receiver<NotifierStatus>,
    }

    fn harness(authority: MockAuthority, sync_interval: Duration) -> Harness {
        let channel = SyncChannel::open(&NotifierConfig::new("A")).expect("channel opens");
        let port = channel.local_addr().unwrap().port();
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let (status_tx, status_rx) = watch::channel(NotifierStatus::default());
        let settings = LoopSettings {
            clock_id: "A".to_string(),
            sync_interval,
            idle_interval: Duration::from_millis(5),
        };
        let event_loop =
            SyncEventLoop::new(channel, Arc::new(authority), settings, shutdown_rx, status_tx)
                .expect("loop builds");
        Harness {
            event_loop,
            target: SocketAddr::from(([127, 0, 0, 1], port)),
            _shutdown_tx: shutdown_tx,
            status_rx,
        }
    }

    fn client() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("client bind");
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        socket
    }

    /// Runs loop bodies until `done` holds or 200 iterations pass.
    fn turn_until(event_loop: &mut SyncEventLoop, mut done: impl FnMut(&SyncEventLoop) -> bool) {
        for _ in 0..200 {
            if done(event_loop) {
                return;
            }
            event_loop.turn().expect("turn");
        }
        assert!(done(event_loop), "condition not reached");
    }

    #[test]
    fn test_loop_starts_read_only() {
        let h = harness(MockAuthority::new(), Duration::from_secs(60));
        assert_eq!(h.event_loop.mode, LoopMode::ReadOnly);
    }

    #[test]
    fn test_register_datagram_adds_sender_to_registry() {
        // Arrange
        let mut h = harness(MockAuthority::new(), Duration::from_secs(60));
        let c = client();
        let me = SocketAddr::from(([127, 0, 0, 1], c.local_addr().unwrap().port()));

        // Act
        c.send_to(&[0x01], h.target).unwrap();
        turn_until(&mut h.event_loop, |l| l.registry.contains(&me));

        // Assert
        assert_eq!(h.event_loop.registry.len(), 1);
        assert_eq!(h.status_rx.borrow().clients, vec![me]);
    }

    #[test]
    fn test_unregister_datagram_removes_sender() {
        let mut h = harness(MockAuthority::new(), Duration::from_secs(60));
        let c = client();
        let me = SocketAddr::from(([127, 0, 0, 1], c.local_addr().unwrap().port()));

        c.send_to(&[0x01], h.target).unwrap();
        turn_until(&mut h.event_loop, |l| l.registry.contains(&me));
        c.send_to(&[0x02], h.target).unwrap();
        turn_until(&mut h.event_loop, |l| l.registry.is_empty());

        assert!(h.status_rx.borrow().clients.is_empty());
    }

    #[test]
    fn test_queued_datagrams_are_drained_one_per_iteration() {
        // Two clients register back to back; both must end up registered even
        // though each readiness edge only drains one datagram.
        let mut h = harness(MockAuthority::new(), Duration::from_secs(60));
        let a = client();
        let b = client();

        a.send_to(&[0x01], h.target).unwrap();
        b.send_to(&[0x01], h.target).unwrap();
        turn_until(&mut h.event_loop, |l| l.registry.len() == 2);
    }

    #[test]
    fn test_malformed_datagram_does_not_touch_registry() {
        // Arrange: 5 bytes starting with the register tag, then a real register
        // from a second client to know the first one has been processed.
        let mut h = harness(MockAuthority::new(), Duration::from_secs(60));
        let bad = client();
        let good = client();
        let good_addr = SocketAddr::from(([127, 0, 0, 1], good.local_addr().unwrap().port()));

        // Act
        bad.send_to(&[0x01, 0, 0, 0, 0], h.target).unwrap();
        good.send_to(&[0x01], h.target).unwrap();
        turn_until(&mut h.event_loop, |l| l.registry.contains(&good_addr));

        // Assert
        assert_eq!(h.event_loop.registry.snapshot(), vec![good_addr]);
    }

    #[test]
    fn test_echo_is_accepted_without_reply() {
        let mut h = harness(MockAuthority::new(), Duration::from_secs(60));
        let c = client();
        c.set_read_timeout(Some(Duration::from_millis(100))).unwrap();

        c.send_to(&[0x03, 1, 2, 3, 4, 5, 6, 7, 8], h.target).unwrap();
        for _ in 0..5 {
            h.event_loop.turn().expect("turn");
        }

        let mut buf = [0u8; 64];
        assert!(c.recv_from(&mut buf).is_err(), "echo must not be answered");
        assert!(h.event_loop.registry.is_empty());
    }

    #[test]
    fn test_publish_tick_sends_sync_packet_to_registered_client() {
        // Arrange
        let mut authority = MockAuthority::new();
        authority
            .expect_clock()
            .withf(|id| id == "A")
            .returning(|_| Ok(ClockSnapshot::new(2, 1000, 5000)));
        let mut h = harness(authority, Duration::from_millis(20));
        let c = client();
        let me = SocketAddr::from(([127, 0, 0, 1], c.local_addr().unwrap().port()));
        c.send_to(&[0x01], h.target).unwrap();
        turn_until(&mut h.event_loop, |l| l.registry.contains(&me));
        let ticks_before = h.event_loop.publish_ticks;

        // Act
        turn_until(&mut h.event_loop, |l| l.publish_ticks > ticks_before);

        // Assert
        let mut buf = [0u8; 64];
        let (len, _) = c.recv_from(&mut buf).expect("sync packet arrives");
        assert_eq!(decode_sync(&buf[..len]), Ok(ClockSnapshot::new(2, 1000, 5000)));
        assert_eq!(h.event_loop.mode, LoopMode::ReadOnly, "reverts after publish");
        assert_eq!(h.status_rx.borrow().publish_ticks, h.event_loop.publish_ticks);
    }

    #[test]
    fn test_clock_error_skips_the_tick() {
        // Arrange
        let mut authority = MockAuthority::new();
        authority
            .expect_clock()
            .returning(|id| Err(ClockError::NoSuchClock(id.to_string())));
        let mut h = harness(authority, Duration::from_millis(10));
        let c = client();
        c.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        let me = SocketAddr::from(([127, 0, 0, 1], c.local_addr().unwrap().port()));
        c.send_to(&[0x01], h.target).unwrap();
        turn_until(&mut h.event_loop, |l| l.registry.contains(&me));
        let before = h.event_loop.last_publish;

        // Act: run until the (skipped) tick has been recorded.
        turn_until(&mut h.event_loop, |l| l.last_publish > before);

        // Assert
        assert_eq!(h.event_loop.publish_ticks, 0);
        assert_eq!(h.event_loop.mode, LoopMode::ReadOnly);
        let mut buf = [0u8; 64];
        assert!(c.recv_from(&mut buf).is_err(), "nothing published");
    }

    #[test]
    fn test_wait_times_out_without_events() {
        let mut h = harness(MockAuthority::new(), Duration::from_secs(60));
        // Short deadline so the idle wait ends quickly.
        h.event_loop.settings.sync_interval = Duration::from_millis(15);
        h.event_loop.last_publish = Instant::now();

        let turn = h.event_loop.turn().expect("turn");

        assert_eq!(turn, Turn::TimedOut);
        assert_eq!(h.event_loop.mode, LoopMode::ReadOnly);
    }

    #[test]
    fn test_waker_interrupts_a_long_wait() {
        // Arrange
        let mut h = harness(MockAuthority::new(), Duration::from_secs(60));
        let waker = h.event_loop.waker();
        let started = Instant::now();

        // Act
        waker.wake().expect("wake");
        let turn = h.event_loop.turn().expect("turn");

        // Assert
        assert_eq!(turn, Turn::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_run_exits_on_shutdown_request() {
        // Arrange
        let channel = SyncChannel::open(&NotifierConfig::new("A")).expect("channel opens");
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let (status_tx, _status_rx) = watch::channel(NotifierStatus::default());
        let settings = LoopSettings {
            clock_id: "A".to_string(),
            sync_interval: Duration::from_secs(60),
            idle_interval: Duration::from_millis(400),
        };
        let event_loop = SyncEventLoop::new(
            channel,
            Arc::new(MockAuthority::new()),
            settings,
            shutdown_rx,
            status_tx,
        )
        .expect("loop builds");
        let waker = event_loop.waker();
        let worker = std::thread::spawn(move || event_loop.run());
        std::thread::sleep(Duration::from_millis(50));

        // Act
        let started = Instant::now();
        shutdown_tx.send(()).unwrap();
        waker.wake().unwrap();
        worker.join().expect("worker exits cleanly");

        // Assert
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
