//! Domain event feed records
//!
//! The shape of inbound change notifications from the application's event
//! bus, before translation into replication events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One change notification from the domain event feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainChange {
    /// Identity of the changed entity
    pub aggregate_id: String,
    /// Aggregate type, mapped to a table via configuration
    pub aggregate_type: String,
    /// Domain event name, e.g. "TodoCreated"
    pub event_type: String,
    /// Entity state carried by the event
    pub payload: serde_json::Value,
    /// When the change occurred
    pub occurred_at: DateTime<Utc>,
    /// Per-source version counter
    pub version: u64,
}

impl DomainChange {
    pub fn new(
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        version: u64,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            payload,
            occurred_at: Utc::now(),
            version,
        }
    }
}
