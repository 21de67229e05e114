//! Domain layer: values owned by the clock authority and the trait the
//! notifier uses to query it.
//!
//! Nothing in here performs I/O.  The notifier only ever holds a transient
//! copy of a [`clock::ClockSnapshot`] for the duration of one publish tick.

pub mod clock;

pub use clock::{ClockAuthority, ClockError, ClockSnapshot};
