//! Infrastructure layer for the notifier.
//!
//! Contains OS-facing adapters: the UDP channel and its event loop, the
//! configuration file reader, and the bundled local clock authority.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `timesync_core`, but MUST NOT be imported by the `application` layer.

pub mod clock;
pub mod network;
pub mod storage;
