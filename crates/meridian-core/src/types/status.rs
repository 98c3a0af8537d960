//! Replication status snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::{NodeId, NodeRole, NodeStatus};

/// Aggregate health of the replication set, classified from the maximum
/// observed replica lag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClusterHealth {
    #[default]
    Healthy,
    Degraded,
    Critical,
}

impl ClusterHealth {
    pub fn classify(max_lag_millis: u64, degraded_at: u64, critical_at: u64) -> Self {
        if max_lag_millis > critical_at {
            ClusterHealth::Critical
        } else if max_lag_millis > degraded_at {
            ClusterHealth::Degraded
        } else {
            ClusterHealth::Healthy
        }
    }
}

/// Per-node line in a status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatusReport {
    pub node_id: NodeId,
    pub region: String,
    pub role: NodeRole,
    pub status: NodeStatus,
    pub lag_millis: Option<u64>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the replication set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub health: ClusterHealth,
    pub nodes: Vec<NodeStatusReport>,
    /// Largest measured lag across nodes
    pub max_lag_millis: u64,
    /// Sum of measured lags across nodes
    pub total_lag_millis: u64,
    /// Conflicts detected but not yet resolved
    pub open_conflicts: usize,
}

/// Aggregate counters maintained by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReplicationStats {
    pub events_appended: u64,
    pub events_evicted: u64,
    pub dispatches_acked: u64,
    pub dispatches_failed: u64,
    pub conflicts_detected: u64,
    pub conflicts_resolved: u64,
    pub notices_dropped: u64,
}
