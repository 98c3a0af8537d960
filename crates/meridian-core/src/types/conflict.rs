//! Conflict records
//!
//! A conflict captures concurrent writes to the same `(table, key)` from
//! different source nodes. It lives until a resolver picks or merges a
//! winning payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::ReplicationEvent;
use super::node::NodeId;

/// One of the concurrently observed writes inside a conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictVersion {
    pub node_id: NodeId,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

impl From<&ReplicationEvent> for ConflictVersion {
    fn from(event: &ReplicationEvent) -> Self {
        Self {
            node_id: event.source_node_id.clone(),
            payload: event.payload.clone(),
            timestamp: event.timestamp,
            version: event.version,
        }
    }
}

/// Concurrent writes to one entity awaiting resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub table: String,
    pub key: String,
    /// Observed writes, in arrival order
    pub versions: Vec<ConflictVersion>,
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    pub fn new(
        table: impl Into<String>,
        key: impl Into<String>,
        versions: Vec<ConflictVersion>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            table: table.into(),
            key: key.into(),
            versions,
            detected_at: Utc::now(),
        }
    }

    /// Add another observed write, ignoring `(node_id, version)` pairs
    /// already present.
    pub fn add_version(&mut self, version: ConflictVersion) -> bool {
        let seen = self
            .versions
            .iter()
            .any(|v| v.node_id == version.node_id && v.version == version.version);
        if seen {
            return false;
        }
        self.versions.push(version);
        true
    }

    pub fn involves(&self, node_id: &str) -> bool {
        self.versions.iter().any(|v| v.node_id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn version(node: &str, v: u64) -> ConflictVersion {
        ConflictVersion {
            node_id: node.to_string(),
            payload: json!({"v": v}),
            timestamp: Utc::now(),
            version: v,
        }
    }

    #[test]
    fn test_add_version_dedupes() {
        let mut conflict = Conflict::new("todos", "t1", vec![version("a", 1)]);
        assert!(conflict.add_version(version("b", 1)));
        assert!(!conflict.add_version(version("b", 1)));
        assert_eq!(conflict.versions.len(), 2);
    }

    #[test]
    fn test_involves() {
        let conflict = Conflict::new("todos", "t1", vec![version("a", 1), version("b", 1)]);
        assert!(conflict.involves("a"));
        assert!(!conflict.involves("c"));
    }
}
