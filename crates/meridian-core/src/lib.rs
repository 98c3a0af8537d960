//! Meridian Core Library
//!
//! Core types, configuration, and utilities for the Meridian multi-region
//! replication system.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::MeridianConfig;
pub use error::{Error, Result};

/// Meridian version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Source node id stamped on events produced by conflict resolution
pub const RESOLVER_NODE_ID: &str = "conflict-resolver";

/// Default region for nodes that do not declare one
pub const DEFAULT_REGION: &str = "local";

/// Maximum number of events retained in the replication log
pub const DEFAULT_LOG_MAX_EVENTS: usize = 100_000;

/// Replication log retention window (hours)
pub const DEFAULT_LOG_RETENTION_HOURS: u64 = 24;

/// Window within which writes to the same key count as concurrent (millis)
pub const DEFAULT_CONFLICT_WINDOW_MILLIS: u64 = 1_000;

/// How long a semi-sync dispatch waits for the first acknowledgment (millis)
pub const DEFAULT_SEMI_SYNC_TIMEOUT_MILLIS: u64 = 5_000;

/// Health probe interval (seconds)
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;

/// Interval between conflict resolution sweeps (millis)
pub const DEFAULT_RESOLVE_INTERVAL_MILLIS: u64 = 1_000;

/// Max observed lag before the cluster counts as degraded (millis)
pub const DEGRADED_LAG_MILLIS: u64 = 1_000;

/// Max observed lag before the cluster counts as critical (millis)
pub const CRITICAL_LAG_MILLIS: u64 = 5_000;
