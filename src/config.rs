//! Configuration for the sync engine.
//!
//! This module defines all configuration types needed to run the sync
//! controller. Configuration is passed to
//! [`SyncController::new()`](crate::SyncController::new) and can be
//! constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use manifest_sync::config::{SyncConfig, EventStoreConfig};
//!
//! let config = SyncConfig {
//!     event_store: EventStoreConfig::in_memory(),
//!     ..Default::default()
//! };
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! SyncConfig
//! ├── bus: BusConfig               # Local event store polling
//! ├── external: ExternalSyncConfig # Cross-service polling + retry
//! ├── http: Option<HttpServerConfig> # Sync HTTP service bind address
//! └── event_store: EventStoreConfig  # SQLite event log persistence
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! bus:
//!   poll_interval: "100ms"
//!
//! external:
//!   poll_interval: "5s"
//!   retry_max_attempts: 5
//!
//! http:
//!   host: "0.0.0.0"
//!   port: 3000
//!
//! event_store:
//!   sqlite_path: "/var/lib/app/events.db"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resilience::RetryConfig;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed from daemon to SyncController::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `SyncController::new()`.
///
/// # Fields
///
/// - `bus`: Polling cadence for the local event store subscription.
/// - `external`: Cross-service polling cadence and retry policy.
/// - `http`: Optional bind address for the sync HTTP service.
/// - `event_store`: SQLite event log persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    /// Local event store subscription settings.
    #[serde(default)]
    pub bus: BusConfig,

    /// Cross-service (external manifest) polling settings.
    #[serde(default)]
    pub external: ExternalSyncConfig,

    /// Sync HTTP service settings. `None` disables the HTTP surface,
    /// which means other services cannot poll this one.
    #[serde(default)]
    pub http: Option<HttpServerConfig>,

    /// Event log persistence settings.
    /// Events are stored in SQLite so delivery survives restarts.
    #[serde(default)]
    pub event_store: EventStoreConfig,
}

impl SyncConfig {
    /// Create a minimal config for testing: tight poll intervals,
    /// no HTTP service, in-memory event log.
    pub fn for_testing() -> Self {
        Self {
            bus: BusConfig {
                poll_interval: "10ms".to_string(),
            },
            external: ExternalSyncConfig {
                poll_interval: "50ms".to_string(),
                ..Default::default()
            },
            http: None,
            event_store: EventStoreConfig::in_memory(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BusConfig: local event store subscription
// ═══════════════════════════════════════════════════════════════════════════════

/// Local event store subscription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// How long to wait between event store polls, as a duration
    /// string (e.g., "100ms"). Parsed to Duration internally.
    #[serde(default = "default_bus_poll_interval")]
    pub poll_interval: String,
}

fn default_bus_poll_interval() -> String {
    "100ms".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            poll_interval: "100ms".to_string(),
        }
    }
}

impl BusConfig {
    /// Parse the poll_interval string to a Duration.
    pub fn poll_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.poll_interval).unwrap_or(Duration::from_millis(100))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ExternalSyncConfig: cross-service polling
// ═══════════════════════════════════════════════════════════════════════════════

/// Cross-service polling configuration.
///
/// Consumer schemas may reference public schemas published by manifests
/// that are not loaded locally. Those are polled over HTTP from the
/// services that host them, with bounded exponential backoff on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSyncConfig {
    /// How long to wait after a full round over all remote services,
    /// as a duration string (e.g., "5s").
    #[serde(default = "default_external_poll_interval")]
    pub poll_interval: String,

    /// Maximum attempts per remote read before giving up for this round.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Initial retry delay (ms). Doubles on every attempt.
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Retry delay ceiling (ms).
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_external_poll_interval() -> String {
    "5s".to_string()
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_initial_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    5_000
}

impl Default for ExternalSyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: "5s".to_string(),
            retry_max_attempts: 5,
            retry_initial_delay_ms: 100,
            retry_max_delay_ms: 5_000,
        }
    }
}

impl ExternalSyncConfig {
    /// Parse the poll_interval string to a Duration.
    pub fn poll_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.poll_interval).unwrap_or(Duration::from_secs(5))
    }

    /// Build a retry policy from the configured bounds.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            ..Default::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HttpServerConfig: sync HTTP service bind address
// ═══════════════════════════════════════════════════════════════════════════════

/// Sync HTTP service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    /// Interface to bind to.
    #[serde(default = "default_http_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    3000
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl HttpServerConfig {
    /// Render as a `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EventStoreConfig: event log persistence
// ═══════════════════════════════════════════════════════════════════════════════

/// Event log persistence configuration.
///
/// The event store is the durability boundary of the pipeline: sources
/// acknowledge transactions only after their transformed operations are
/// committed here, so the log must survive restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStoreConfig {
    /// Path to SQLite database for the event log.
    pub sqlite_path: String,

    /// Whether to use WAL mode for SQLite (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "sync_events.db".to_string(),
            wal_mode: true,
        }
    }
}

impl EventStoreConfig {
    /// Create an in-memory config for testing.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            wal_mode: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
