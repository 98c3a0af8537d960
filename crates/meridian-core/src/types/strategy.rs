//! Replication strategy and runtime configuration
//!
//! The strategy is pure configuration: how events are delivered, how reads
//! pick a node, how conflicts resolve, and (optionally) how keys map onto
//! the node set.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::node::NodeId;

/// How a dispatch waits on its targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Every target must acknowledge before the caller returns
    Sync,
    /// Fire-and-forget; failures surface as notices only
    #[default]
    Async,
    /// First acknowledgment wins the caller's wait
    SemiSync,
}

/// Read consistency requested per query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "level", rename_all = "lowercase")]
pub enum ConsistencyLevel {
    /// Primary only
    Strong,
    /// Any available node, lowest lag preferred
    #[default]
    Eventual,
    /// Replica within the staleness bound, primary as fallback
    Bounded { max_lag_millis: u64 },
}

/// Conflict resolution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Latest timestamp wins, ties broken by (timestamp, node id)
    #[default]
    LastWriteWins,
    /// Highest version counter wins
    MultiVersionMerge,
    /// Field-wise merge, later-touched field wins per field
    ConvergentMerge,
    /// Injected resolver decides
    Custom,
}

/// A key's owning nodes: the primary plus its replica set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub primary: NodeId,
    pub replicas: Vec<NodeId>,
}

impl Placement {
    pub fn new(primary: impl Into<NodeId>, replicas: Vec<NodeId>) -> Self {
        Self {
            primary: primary.into(),
            replicas,
        }
    }

    /// Primary first, then replicas.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(1 + self.replicas.len());
        ids.push(self.primary.clone());
        ids.extend(self.replicas.iter().cloned());
        ids
    }
}

/// One key-range rule: keys below `upper` (lexicographic) land on
/// `placement`. `upper = None` catches everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeBound {
    pub upper: Option<String>,
    pub placement: Placement,
}

/// Partitioning configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum PartitionScheme {
    /// Hash of (table, key) over the sorted active node set
    Hash { replica_count: usize },
    /// Ordered key ranges with explicit placements
    Range { bounds: Vec<RangeBound> },
    /// Explicit per-table placement
    List { tables: HashMap<String, Placement> },
    /// Table pinned to a region; nodes of that region serve it
    Geo {
        table_regions: HashMap<String, String>,
        replica_count: usize,
    },
}

/// The full replication strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReplicationStrategy {
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    #[serde(default)]
    pub consistency: ConsistencyLevel,
    #[serde(default)]
    pub conflict_resolution: ResolutionStrategy,
    #[serde(default)]
    pub partitioning: Option<PartitionScheme>,
}

/// Runtime configuration consumed by the replication engine
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Id of the node this process runs on; stamped on feed-translated events
    pub local_node_id: NodeId,
    pub strategy: ReplicationStrategy,
    /// Replication log count bound
    pub log_max_events: usize,
    /// Replication log age bound
    pub log_retention: Duration,
    /// Writes to the same key within this window count as concurrent
    pub conflict_window: Duration,
    /// Semi-sync dispatch deadline
    pub semi_sync_timeout: Duration,
    /// Health probe interval
    pub probe_interval: Duration,
    /// Conflict resolution sweep interval
    pub resolve_interval: Duration,
    /// Max lag before the cluster counts as degraded
    pub degraded_lag_millis: u64,
    /// Max lag before the cluster counts as critical
    pub critical_lag_millis: u64,
    /// Verify payload checksums before dispatching
    pub verify_checksums: bool,
    /// Capacity of the notice channel
    pub notice_queue_size: usize,
    /// Aggregate type to table name mapping for the domain feed
    pub table_map: HashMap<String, String>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            local_node_id: Uuid::new_v4().to_string(),
            strategy: ReplicationStrategy::default(),
            log_max_events: crate::DEFAULT_LOG_MAX_EVENTS,
            log_retention: Duration::from_secs(crate::DEFAULT_LOG_RETENTION_HOURS * 3600),
            conflict_window: Duration::from_millis(crate::DEFAULT_CONFLICT_WINDOW_MILLIS),
            semi_sync_timeout: Duration::from_millis(crate::DEFAULT_SEMI_SYNC_TIMEOUT_MILLIS),
            probe_interval: Duration::from_secs(crate::DEFAULT_PROBE_INTERVAL_SECS),
            resolve_interval: Duration::from_millis(crate::DEFAULT_RESOLVE_INTERVAL_MILLIS),
            degraded_lag_millis: crate::DEGRADED_LAG_MILLIS,
            critical_lag_millis: crate::CRITICAL_LAG_MILLIS,
            verify_checksums: true,
            notice_queue_size: 1024,
            table_map: HashMap::new(),
        }
    }
}
