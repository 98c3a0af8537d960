//! Replication node types
//!
//! A node is one member of the replication set: the primary that accepts
//! writes, or a replica that trails it by some measured lag. Nodes are
//! registered once and mutated only through the owning registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a replication node
pub type NodeId = String;

/// Node role in the replication set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Accepts writes; the authoritative copy
    Primary,
    /// Read-only copy trailing the primary
    #[default]
    Replica,
}

/// Current node status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Reachable and serving
    #[default]
    Active,
    /// Catching up after joining or recovering
    Syncing,
    /// Reachable but behind the degraded-lag threshold
    Lagging,
    /// Unreachable
    Offline,
}

impl NodeStatus {
    /// Whether the node can receive replicated events and serve reads.
    /// Everything short of offline still participates.
    pub fn is_available(&self) -> bool {
        !matches!(self, NodeStatus::Offline)
    }
}

/// Capacity ceilings for a node. Zero means unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NodeCapacity {
    /// Storage ceiling in gigabytes
    pub storage_gb: u64,
    /// IOPS ceiling
    pub iops: u32,
    /// Throughput ceiling in MB/s
    pub throughput_mbps: u32,
}

/// Live metrics reported by a node's health probe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeMetrics {
    pub replication_lag_millis: u64,
    pub transactions_per_sec: f64,
    pub conflicts_resolved: u64,
    pub error_rate: f64,
}

/// One member of the replication set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationNode {
    /// Unique node identifier
    pub id: NodeId,
    /// Human-readable node name
    pub name: String,
    /// Region the node lives in
    pub region: String,
    /// Node role
    pub role: NodeRole,
    /// Endpoint the transport sends to (e.g. "http://node1.meridian.local:9000")
    pub endpoint: String,
    /// Current status
    pub status: NodeStatus,
    /// Measured delay behind the primary; absent for the primary itself
    pub lag_millis: Option<u64>,
    /// When the node last acknowledged a send or answered a probe
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Capacity ceilings
    pub capacity: NodeCapacity,
    /// Latest probe metrics, if the prober supplies them
    pub metrics: Option<NodeMetrics>,
}

impl ReplicationNode {
    pub fn new(
        id: impl Into<NodeId>,
        region: impl Into<String>,
        role: NodeRole,
        endpoint: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            region: region.into(),
            role,
            endpoint: endpoint.into(),
            status: NodeStatus::Active,
            lag_millis: None,
            last_sync_at: None,
            capacity: NodeCapacity::default(),
            metrics: None,
        }
    }

    /// Convenience constructor for a primary node.
    pub fn primary(
        id: impl Into<NodeId>,
        region: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::new(id, region, NodeRole::Primary, endpoint)
    }

    /// Convenience constructor for a replica node.
    pub fn replica(
        id: impl Into<NodeId>,
        region: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::new(id, region, NodeRole::Replica, endpoint)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capacity(mut self, capacity: NodeCapacity) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn is_available(&self) -> bool {
        self.status.is_available()
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.role, NodeRole::Primary)
    }

    /// Lag used when comparing candidates for reads. The primary is by
    /// definition current, so an unmeasured lag counts as zero there and
    /// as unknown (u64::MAX) on replicas.
    pub fn effective_lag_millis(&self) -> u64 {
        match (self.role, self.lag_millis) {
            (_, Some(lag)) => lag,
            (NodeRole::Primary, None) => 0,
            (NodeRole::Replica, None) => u64::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_availability() {
        let mut node = ReplicationNode::replica("r1", "eu-west", "http://r1:9000");
        assert!(node.is_available());

        node.status = NodeStatus::Lagging;
        assert!(node.is_available());

        node.status = NodeStatus::Offline;
        assert!(!node.is_available());
    }

    #[test]
    fn test_effective_lag() {
        let mut primary = ReplicationNode::primary("p1", "us-east", "http://p1:9000");
        assert_eq!(primary.effective_lag_millis(), 0);
        primary.lag_millis = Some(3);
        assert_eq!(primary.effective_lag_millis(), 3);

        let mut replica = ReplicationNode::replica("r1", "us-east", "http://r1:9000");
        assert_eq!(replica.effective_lag_millis(), u64::MAX);
        replica.lag_millis = Some(120);
        assert_eq!(replica.effective_lag_millis(), 120);
    }

    #[test]
    fn test_role_serde_names() {
        let json = serde_json::to_string(&NodeRole::Primary).unwrap();
        assert_eq!(json, "\"primary\"");
        let json = serde_json::to_string(&NodeStatus::Lagging).unwrap();
        assert_eq!(json, "\"lagging\"");
    }
}
