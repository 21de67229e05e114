//! Clock snapshot value and the clock authority boundary.
//!
//! The notifier never owns clock state.  On every publish tick it asks a
//! [`ClockAuthority`] for the current [`ClockSnapshot`] of one clock, encodes
//! it, and forgets it.  Nothing is cached across ticks, so a status change made
//! by the authority is visible on the very next packet.

use thiserror::Error;

/// The state of one contest clock at the moment it was queried.
///
/// The unit of `time` and `length` is defined by the authority (the bundled
/// local authority uses milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockSnapshot {
    /// Small status code.  Only the low byte travels on the wire.
    pub status: i32,
    /// Current clock time.
    pub time: i64,
    /// Total clock length.
    pub length: i64,
}

impl ClockSnapshot {
    pub fn new(status: i32, time: i64, length: i64) -> Self {
        Self {
            status,
            time,
            length,
        }
    }
}

/// Reasons a clock lookup can fail.
///
/// Both variants are recoverable from the notifier's point of view: the
/// current publish tick is skipped and the next scheduled tick tries again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClockError {
    /// The authority does not know a clock with this identifier.
    #[error("no such clock: {0}")]
    NoSuchClock(String),

    /// The authority could not be reached or failed to answer.
    #[error("clock authority unreachable: {0}")]
    Unreachable(String),
}

/// Source of truth for clock state, queried once per publish tick.
///
/// Implementations must be shareable with the notifier's worker thread.
pub trait ClockAuthority: Send + Sync {
    /// Returns the current state of the clock identified by `clock_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::NoSuchClock`] for an unknown identifier and
    /// [`ClockError::Unreachable`] when the authority cannot answer.
    fn clock(&self, clock_id: &str) -> Result<ClockSnapshot, ClockError>;
}
