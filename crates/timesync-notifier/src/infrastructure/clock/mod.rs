//! Clock authority adapters.
//!
//! The notifier only depends on the [`timesync_core::ClockAuthority`] trait.
//! `local` provides an in-process implementation for running the notifier
//! stand-alone from a config file.

pub mod local;

pub use local::LocalClockAuthority;
