//! Storage infrastructure: configuration file loading.
//!
//! The `config` sub-module reads the TOML file, fills in defaults and checks
//! the cross-field rules before anything touches a socket.

pub mod config;
