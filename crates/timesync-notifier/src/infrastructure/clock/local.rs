//! In-process clock authority.
//!
//! Serves the clocks declared in the `[[clocks]]` section of the config file.
//! A clock's `time` is the number of milliseconds elapsed since it was
//! (re)started; `status` and `length` are whatever was configured or last set.
//!
//! The authority is shared between the thread that manages clocks and the
//! notifier's worker, so its table sits behind an `RwLock`.  Readers (one per
//! publish tick) vastly outnumber writers.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};
use std::time::Instant;

use timesync_core::{ClockAuthority, ClockError, ClockSnapshot};
use tracing::debug;

use crate::infrastructure::storage::config::ClockEntry;

#[derive(Debug, Clone, Copy)]
struct LocalClock {
    status: i32,
    length: i64,
    started: Instant,
}

/// Clock table owned by this process.
#[derive(Debug, Default)]
pub struct LocalClockAuthority {
    clocks: RwLock<HashMap<String, LocalClock>>,
}

impl LocalClockAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an authority with one running clock per config entry.
    pub fn from_entries(entries: &[ClockEntry]) -> Self {
        let started = Instant::now();
        let clocks = entries
            .iter()
            .map(|entry| {
                let clock = LocalClock {
                    status: entry.status,
                    length: entry.length,
                    started,
                };
                (entry.id.clone(), clock)
            })
            .collect();
        debug!("local clock authority serving {} clock(s)", entries.len());
        Self {
            clocks: RwLock::new(clocks),
        }
    }

    /// Adds (or restarts) a clock whose time counts up from zero now.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Unreachable`] if the clock table is poisoned.
    pub fn start_clock(&self, id: &str, status: i32, length: i64) -> Result<(), ClockError> {
        let clock = LocalClock {
            status,
            length,
            started: Instant::now(),
        };
        self.write_table()?.insert(id.to_string(), clock);
        debug!("local clock {id} started (status={status}, length={length})");
        Ok(())
    }

    /// Changes the status code reported for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::NoSuchClock`] if `id` is unknown and
    /// [`ClockError::Unreachable`] if the clock table is poisoned.
    pub fn set_status(&self, id: &str, status: i32) -> Result<(), ClockError> {
        let mut clocks = self.write_table()?;
        let clock = clocks
            .get_mut(id)
            .ok_or_else(|| ClockError::NoSuchClock(id.to_string()))?;
        clock.status = status;
        Ok(())
    }

    fn write_table(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, LocalClock>>, ClockError> {
        self.clocks.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> ClockError {
    ClockError::Unreachable("clock table poisoned".to_string())
}

impl ClockAuthority for LocalClockAuthority {
    fn clock(&self, clock_id: &str) -> Result<ClockSnapshot, ClockError> {
        let clocks = self
            .clocks
            .read()
            .map_err(|_| poisoned())?;
        let clock = clocks
            .get(clock_id)
            .ok_or_else(|| ClockError::NoSuchClock(clock_id.to_string()))?;
        let elapsed_ms = i64::try_from(clock.started.elapsed().as_millis()).unwrap_or(i64::MAX);
        Ok(ClockSnapshot::new(clock.status, elapsed_ms, clock.length))
    }
}
