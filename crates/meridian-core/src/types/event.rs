//! Replication event type
//!
//! An event is one accepted change: immutable once appended to the
//! replication log, identified by its `(source_node_id, version)` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::node::NodeId;

/// Kind of change an event carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Insert,
    #[default]
    Update,
    Delete,
}

/// One replicated change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationEvent {
    /// Unique event id
    pub id: String,
    /// Kind of change
    pub change_type: ChangeType,
    /// Table or collection the change touches
    pub table: String,
    /// Logical key of the entity within the table
    pub key: String,
    /// Row payload
    pub payload: serde_json::Value,
    /// When the change occurred at its source
    pub timestamp: DateTime<Utc>,
    /// Node the change originated on
    pub source_node_id: NodeId,
    /// Per-source monotonically increasing counter
    pub version: u64,
    /// SHA-256 of the serialized payload
    pub checksum: String,
}

impl ReplicationEvent {
    pub fn new(
        change_type: ChangeType,
        table: impl Into<String>,
        key: impl Into<String>,
        payload: serde_json::Value,
        source_node_id: impl Into<NodeId>,
        version: u64,
    ) -> Self {
        let checksum = payload_checksum(&payload);
        Self {
            id: Uuid::new_v4().to_string(),
            change_type,
            table: table.into(),
            key: key.into(),
            payload,
            timestamp: Utc::now(),
            source_node_id: source_node_id.into(),
            version,
            checksum,
        }
    }

    pub fn insert(
        table: impl Into<String>,
        key: impl Into<String>,
        payload: serde_json::Value,
        source_node_id: impl Into<NodeId>,
        version: u64,
    ) -> Self {
        Self::new(ChangeType::Insert, table, key, payload, source_node_id, version)
    }

    pub fn update(
        table: impl Into<String>,
        key: impl Into<String>,
        payload: serde_json::Value,
        source_node_id: impl Into<NodeId>,
        version: u64,
    ) -> Self {
        Self::new(ChangeType::Update, table, key, payload, source_node_id, version)
    }

    pub fn delete(
        table: impl Into<String>,
        key: impl Into<String>,
        source_node_id: impl Into<NodeId>,
        version: u64,
    ) -> Self {
        Self::new(
            ChangeType::Delete,
            table,
            key,
            serde_json::Value::Null,
            source_node_id,
            version,
        )
    }

    /// Replace the creation timestamp with the change's original
    /// occurrence time. Used when translating feed records that carry
    /// their own clock.
    pub fn recorded_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Recompute the payload checksum and compare against the stored one.
    pub fn verify_checksum(&self) -> bool {
        payload_checksum(&self.payload) == self.checksum
    }
}

/// SHA-256 hex digest of a JSON payload.
///
/// `serde_json` keeps object keys sorted, so the digest is stable for a
/// given value.
pub fn payload_checksum(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_constructor() {
        let event = ReplicationEvent::insert(
            "todos",
            "t1",
            json!({"title": "write tests"}),
            "node-1",
            1,
        );

        assert!(!event.id.is_empty());
        assert_eq!(event.change_type, ChangeType::Insert);
        assert_eq!(event.table, "todos");
        assert_eq!(event.key, "t1");
        assert_eq!(event.source_node_id, "node-1");
        assert_eq!(event.version, 1);
        assert!(event.verify_checksum());
    }

    #[test]
    fn test_checksum_detects_tamper() {
        let mut event =
            ReplicationEvent::update("todos", "t1", json!({"done": false}), "node-1", 2);
        assert!(event.verify_checksum());

        event.payload = json!({"done": true});
        assert!(!event.verify_checksum());
    }

    #[test]
    fn test_checksum_stable_across_key_order() {
        let a = json!({"a": 1, "b": 2});
        let b = serde_json::from_str::<serde_json::Value>(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(payload_checksum(&a), payload_checksum(&b));
    }

    #[test]
    fn test_delete_has_null_payload() {
        let event = ReplicationEvent::delete("todos", "t1", "node-1", 3);
        assert_eq!(event.payload, serde_json::Value::Null);
        assert!(event.verify_checksum());
    }
}
