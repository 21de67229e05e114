//! Start/stop API for the notifier.
//!
//! [`start`] does all fallible setup on the calling thread (config
//! validation, socket, memberships, poll registration) so that every setup
//! error comes back synchronously.  Only then is the worker thread spawned.
//!
//! [`stop`] (or dropping the [`NotifierHandle`]) sends a shutdown message,
//! fires the waker to cut short a pending poll wait, and joins the worker.

use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mio::Waker;
use thiserror::Error;
use timesync_core::ClockAuthority;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::infrastructure::network::channel::{ChannelError, SyncChannel};
use crate::infrastructure::network::event_loop::{LoopSettings, SyncEventLoop};
use crate::infrastructure::storage::config::{ConfigError, NotifierConfig};

pub use crate::infrastructure::network::event_loop::NotifierStatus;

/// Well-known name of the notifier service.
pub const SERVICE_NAME: &str = "timer-notifier";

const WORKER_THREAD_NAME: &str = "timer-notifier-thread";

/// Errors surfaced by [`start`].
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("invalid notifier configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("notifier channel setup failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("failed to set up the readiness poll: {0}")]
    Poll(#[source] io::Error),

    #[error("failed to spawn the notifier worker: {0}")]
    Spawn(#[source] io::Error),
}

/// A running notifier.
pub struct NotifierHandle {
    worker: Option<JoinHandle<()>>,
    shutdown: Sender<()>,
    waker: Arc<Waker>,
    local_addr: SocketAddr,
    status: watch::Receiver<NotifierStatus>,
}

impl NotifierHandle {
    /// Address the notifier socket is bound to.  With no `udp-listen-port`
    /// configured this carries the ephemeral port the OS picked.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Latest state published by the worker.
    pub fn status(&self) -> NotifierStatus {
        self.status.borrow().clone()
    }

    /// Receiver that sees every status update; useful for waiting on changes.
    pub fn subscribe(&self) -> watch::Receiver<NotifierStatus> {
        self.status.clone()
    }

    /// Stops the worker and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // Either may fail only if the worker is already gone.
        let _ = self.shutdown.send(());
        if let Err(e) = self.waker.wake() {
            warn!("failed to wake the notifier worker: {e}");
        }
        if worker.join().is_err() {
            warn!("notifier worker panicked");
        }
        info!("{SERVICE_NAME} stopped");
    }
}

impl Drop for NotifierHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

/// Validates `config`, opens the channel and spawns the worker.
///
/// # Errors
///
/// - [`NotifierError::Config`] if the configuration is inconsistent.
/// - [`NotifierError::Channel`] if the socket cannot be created or bound, or
///   a configured address does not resolve.
/// - [`NotifierError::Poll`] / [`NotifierError::Spawn`] on OS failures.
pub fn start(
    config: &NotifierConfig,
    authority: Arc<dyn ClockAuthority>,
) -> Result<NotifierHandle, NotifierError> {
    config.validate()?;
    info!("{SERVICE_NAME} registered for clock {}", config.clock_id);

    let channel = SyncChannel::open(config)?;
    let local_addr = channel.local_addr().map_err(NotifierError::Poll)?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let (status_tx, status_rx) = watch::channel(NotifierStatus {
        memberships: channel.memberships().len(),
        ..NotifierStatus::default()
    });
    let settings = LoopSettings {
        clock_id: config.clock_id.clone(),
        sync_interval: config.sync_interval(),
        idle_interval: config.idle_interval(),
    };
    let event_loop = SyncEventLoop::new(channel, authority, settings, shutdown_rx, status_tx)
        .map_err(NotifierError::Poll)?;
    let waker = event_loop.waker();

    let worker = thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || event_loop.run())
        .map_err(NotifierError::Spawn)?;

    info!("{SERVICE_NAME} started on {local_addr}");
    Ok(NotifierHandle {
        worker: Some(worker),
        shutdown: shutdown_tx,
        waker,
        local_addr,
        status: status_rx,
    })
}

/// Stops a notifier started with [`start`].
pub fn stop(handle: NotifierHandle) {
    handle.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use timesync_core::{ClockError, ClockSnapshot};

    struct FixedClock;

    impl ClockAuthority for FixedClock {
        fn clock(&self, _clock_id: &str) -> Result<ClockSnapshot, ClockError> {
            Ok(ClockSnapshot::new(1, 0, 0))
        }
    }

    #[test]
    fn test_start_rejects_invalid_config_before_opening_anything() {
        let mut config = NotifierConfig::new("A");
        config.multicast_group = Some("239.1.1.1".to_string());

        let result = start(&config, Arc::new(FixedClock));

        assert!(matches!(
            result,
            Err(NotifierError::Config(ConfigError::MissingAttribute("udp-port")))
        ));
    }

    #[test]
    fn test_start_surfaces_channel_errors() {
        let mut config = NotifierConfig::new("A");
        config.udp_port = Some(9000);
        config.multicast_group = Some("10.0.0.1".to_string());

        let result = start(&config, Arc::new(FixedClock));

        assert!(matches!(result, Err(NotifierError::Channel(_))));
    }

    #[tokio::test]
    async fn test_initial_status_matches_the_worker_report() {
        // Arrange: whether any interface joins depends on the host, so compare
        // the value seen right after start with the worker's first report.
        let mut config = NotifierConfig::new("A");
        config.udp_port = Some(9000);
        config.multicast_group = Some("239.1.1.1".to_string());
        let handle = start(&config, Arc::new(FixedClock)).expect("starts");
        let mut updates = handle.subscribe();

        // Act
        let seeded = handle.status();
        tokio::time::timeout(Duration::from_secs(2), updates.changed())
            .await
            .expect("worker reports within 2 s")
            .expect("worker alive");
        let reported = updates.borrow().clone();

        // Assert
        assert_eq!(seeded.memberships, reported.memberships);
        tokio::task::spawn_blocking(move || handle.stop())
            .await
            .unwrap();
    }

    #[test]
    fn test_drop_stops_the_worker() {
        // Arrange
        let handle = start(&NotifierConfig::new("A"), Arc::new(FixedClock)).expect("starts");
        let started = Instant::now();

        // Act
        drop(handle);

        // Assert
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
