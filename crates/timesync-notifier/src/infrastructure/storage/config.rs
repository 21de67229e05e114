//! TOML-based configuration for the notifier.
//!
//! The whole service is configured from one file:
//!
//! ```toml
//! [service]
//! log-level = "info"
//!
//! [notifier]
//! clock-id = "main"
//! sync-timeout = 400          # ms between publish passes
//! udp-listen-port = 4242      # control messages (register / unregister)
//! udp-port = 9000             # destination port for multicast / broadcast
//! multicast-group = "239.1.1.1"
//! # broadcast-addr = "192.168.1.255"
//! # tcp-port = 4243           # reserved, not implemented
//!
//! [[clocks]]
//! id = "main"
//! status = 1
//! length = 18000000
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the key is absent.  Optional delivery modes are plain
//! `Option`s: a missing key means the mode is disabled.
//!
//! Structural problems (bad TOML, wrong value type, missing `clock-id`) are
//! reported by `toml` as [`ConfigError::Parse`]; cross-field rules are checked
//! by [`NotifierConfig::validate`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed into the schema.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A key required by the enabled options is absent.
    #[error("required attribute `{0}` is not set")]
    MissingAttribute(&'static str),

    /// A key is present but its value is not usable.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level file layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub notifier: NotifierConfig,
    /// Clocks served by the bundled local clock authority.
    #[serde(default)]
    pub clocks: Vec<ClockEntry>,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Options recognised by the notifier component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct NotifierConfig {
    /// Which clock the authority is queried for.
    pub clock_id: String,
    /// Milliseconds between publish passes.
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout: u64,
    /// Local port for inbound control datagrams.  Absent: ephemeral, send-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp_listen_port: Option<u16>,
    /// Destination port for multicast and broadcast sends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp_port: Option<u16>,
    /// Multicast group (IP or host name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multicast_group: Option<String>,
    /// Broadcast address (IP or host name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_addr: Option<String>,
    /// Reserved for a TCP delivery mode that does not exist yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_port: Option<u16>,
    /// Milliseconds the worker sleeps between loop bodies.
    #[serde(default = "default_idle_interval")]
    pub idle_interval: u64,
}

/// A clock declared for the local clock authority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClockEntry {
    pub id: String,
    #[serde(default)]
    pub status: i32,
    /// Total clock length in milliseconds.
    #[serde(default)]
    pub length: i64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_sync_timeout() -> u64 {
    400
}
fn default_idle_interval() -> u64 {
    400
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl NotifierConfig {
    /// Creates a config for `clock_id` with every delivery mode disabled.
    pub fn new(clock_id: impl Into<String>) -> Self {
        Self {
            clock_id: clock_id.into(),
            sync_timeout: default_sync_timeout(),
            udp_listen_port: None,
            udp_port: None,
            multicast_group: None,
            broadcast_addr: None,
            tcp_port: None,
            idle_interval: default_idle_interval(),
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_timeout)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval)
    }

    /// Checks the rules serde cannot express.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidValue`] for an empty `clock-id` or a zero
    ///   `sync-timeout`.
    /// - [`ConfigError::MissingAttribute`] for `udp-port` when multicast or
    ///   broadcast delivery is enabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "clock-id",
                reason: "must not be empty".to_string(),
            });
        }
        if self.sync_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sync-timeout",
                reason: "must be at least 1 ms".to_string(),
            });
        }
        let sends_to_port = self.multicast_group.is_some() || self.broadcast_addr.is_some();
        if sends_to_port && self.udp_port.is_none() {
            return Err(ConfigError::MissingAttribute("udp-port"));
        }
        Ok(())
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses an [`AppConfig`] from TOML text and validates the notifier section.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed TOML and any error from
/// [`NotifierConfig::validate`].
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let cfg: AppConfig = toml::from_str(content)?;
    cfg.notifier.validate()?;
    Ok(cfg)
}

/// Loads and validates the config file at `path`.
///
/// There is no usable default (the clock id is mandatory), so a missing file
/// is an error.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
/// errors of [`parse_config`].
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[service]
log-level = "debug"

[notifier]
clock-id = "A"
sync-timeout = 250
udp-listen-port = 4242
udp-port = 9000
multicast-group = "239.1.1.1"
broadcast-addr = "192.168.1.255"
tcp-port = 4243
idle-interval = 50

[[clocks]]
id = "A"
status = 2
length = 5000
"#;

    #[test]
    fn test_parse_full_config_reads_every_key() {
        // Act
        let cfg = parse_config(FULL).expect("full config parses");

        // Assert
        assert_eq!(cfg.service.log_level, "debug");
        let n = &cfg.notifier;
        assert_eq!(n.clock_id, "A");
        assert_eq!(n.sync_timeout, 250);
        assert_eq!(n.udp_listen_port, Some(4242));
        assert_eq!(n.udp_port, Some(9000));
        assert_eq!(n.multicast_group.as_deref(), Some("239.1.1.1"));
        assert_eq!(n.broadcast_addr.as_deref(), Some("192.168.1.255"));
        assert_eq!(n.tcp_port, Some(4243));
        assert_eq!(n.idle_interval(), Duration::from_millis(50));
        assert_eq!(
            cfg.clocks,
            vec![ClockEntry {
                id: "A".to_string(),
                status: 2,
                length: 5000
            }]
        );
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config("[notifier]\nclock-id = \"main\"\n").expect("minimal parses");

        assert_eq!(cfg.service.log_level, "info");
        assert_eq!(cfg.notifier.sync_interval(), Duration::from_millis(400));
        assert_eq!(cfg.notifier.idle_interval(), Duration::from_millis(400));
        assert_eq!(cfg.notifier.udp_listen_port, None);
        assert!(cfg.clocks.is_empty());
    }

    #[test]
    fn test_missing_clock_id_is_a_parse_error() {
        let result = parse_config("[notifier]\nsync-timeout = 100\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_non_integer_port_is_a_parse_error() {
        let result = parse_config("[notifier]\nclock-id = \"A\"\nudp-port = \"nine\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_multicast_without_udp_port_is_rejected() {
        // Arrange
        let mut cfg = NotifierConfig::new("A");
        cfg.multicast_group = Some("239.1.1.1".to_string());

        // Act
        let result = cfg.validate();

        // Assert
        assert!(matches!(result, Err(ConfigError::MissingAttribute("udp-port"))));
    }

    #[test]
    fn test_broadcast_without_udp_port_is_rejected() {
        let mut cfg = NotifierConfig::new("A");
        cfg.broadcast_addr = Some("10.0.0.255".to_string());
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MissingAttribute("udp-port"))
        ));
    }

    #[test]
    fn test_unicast_only_config_needs_no_udp_port() {
        let mut cfg = NotifierConfig::new("A");
        cfg.udp_listen_port = Some(4242);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_sync_timeout_is_rejected() {
        let mut cfg = NotifierConfig::new("A");
        cfg.sync_timeout = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue {
                key: "sync-timeout",
                ..
            })
        ));
    }

    #[test]
    fn test_blank_clock_id_is_rejected() {
        let cfg = NotifierConfig::new("  ");
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { key: "clock-id", .. })
        ));
    }

    #[test]
    fn test_notifier_config_round_trips_through_toml() {
        let mut cfg = NotifierConfig::new("A");
        cfg.udp_port = Some(9000);
        cfg.multicast_group = Some("239.1.1.1".to_string());

        let text = toml::to_string(&cfg).expect("serialize");
        let restored: NotifierConfig = toml::from_str(&text).expect("deserialize");

        assert_eq!(cfg, restored);
        assert!(!text.contains("broadcast-addr"), "None must be omitted");
    }

    #[test]
    fn test_load_config_missing_file_is_io_error() {
        let result = load_config(Path::new("/nonexistent/path/timesync.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_config_reads_file_from_disk() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("timesync_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("timesync.toml");
        std::fs::write(&path, FULL).unwrap();

        // Act
        let cfg = load_config(&path).expect("load");

        // Assert
        assert_eq!(cfg.notifier.udp_port, Some(9000));

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }
}
