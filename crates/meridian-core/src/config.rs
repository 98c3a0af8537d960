//! Configuration for Meridian

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{
    ConsistencyLevel, DeliveryMode, NodeRole, PartitionScheme, ReplicationConfig,
    ReplicationNode, ReplicationStrategy, ResolutionStrategy,
};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MeridianConfig {
    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub replication: ReplicationSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MeridianConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("MERIDIAN_NODE_ID") {
            config.node.node_id = Some(id);
        }
        if let Ok(name) = std::env::var("MERIDIAN_NODE_NAME") {
            config.node.node_name = Some(name);
        }
        if let Ok(region) = std::env::var("MERIDIAN_REGION") {
            config.node.region = region;
        }
        if let Ok(endpoint) = std::env::var("MERIDIAN_ENDPOINT") {
            config.node.endpoint = endpoint;
        }
        if let Ok(mode) = std::env::var("MERIDIAN_DELIVERY_MODE") {
            config.replication.delivery_mode = mode;
        }
        if let Ok(level) = std::env::var("MERIDIAN_CONSISTENCY") {
            config.replication.consistency = level;
        }
        if let Ok(strategy) = std::env::var("MERIDIAN_CONFLICT_RESOLUTION") {
            config.replication.conflict_resolution = strategy;
        }
        if let Ok(millis) = std::env::var("MERIDIAN_SEMI_SYNC_TIMEOUT_MILLIS") {
            if let Ok(m) = millis.parse() {
                config.replication.semi_sync_timeout_millis = m;
            }
        }
        if let Ok(secs) = std::env::var("MERIDIAN_PROBE_INTERVAL_SECS") {
            if let Ok(s) = secs.parse() {
                config.replication.probe_interval_secs = s;
            }
        }
        if let Ok(level) = std::env::var("MERIDIAN_LOG_LEVEL") {
            config.logging.level = level;
        }

        config
    }

    /// Build the local node description used for registration.
    pub fn local_node(&self) -> ReplicationNode {
        let node_id = self
            .node
            .node_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let node_name = self.node.node_name.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "meridian-node".to_string())
        });

        let role = match self.node.role.as_str() {
            "replica" => NodeRole::Replica,
            _ => NodeRole::Primary,
        };

        ReplicationNode::new(
            node_id,
            self.node.region.clone(),
            role,
            self.node.endpoint.clone(),
        )
        .with_name(node_name)
    }

    /// Convert the file/env sections into the runtime config the
    /// replication engine consumes.
    pub fn to_replication_config(&self) -> ReplicationConfig {
        let r = &self.replication;

        let delivery_mode = match r.delivery_mode.as_str() {
            "sync" => DeliveryMode::Sync,
            "semi-sync" => DeliveryMode::SemiSync,
            _ => DeliveryMode::Async,
        };

        let consistency = match r.consistency.as_str() {
            "strong" => ConsistencyLevel::Strong,
            "bounded" => ConsistencyLevel::Bounded {
                max_lag_millis: r.bounded_max_lag_millis,
            },
            _ => ConsistencyLevel::Eventual,
        };

        let conflict_resolution = match r.conflict_resolution.as_str() {
            "multi-version-merge" => ResolutionStrategy::MultiVersionMerge,
            "convergent-merge" => ResolutionStrategy::ConvergentMerge,
            "custom" => ResolutionStrategy::Custom,
            _ => ResolutionStrategy::LastWriteWins,
        };

        ReplicationConfig {
            local_node_id: self
                .node
                .node_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            strategy: ReplicationStrategy {
                delivery_mode,
                consistency,
                conflict_resolution,
                partitioning: r.partitioning.clone(),
            },
            log_max_events: r.log_max_events,
            log_retention: Duration::from_secs(r.log_retention_hours * 3600),
            conflict_window: Duration::from_millis(r.conflict_window_millis),
            semi_sync_timeout: Duration::from_millis(r.semi_sync_timeout_millis),
            probe_interval: Duration::from_secs(r.probe_interval_secs),
            resolve_interval: Duration::from_millis(r.resolve_interval_millis),
            degraded_lag_millis: r.degraded_lag_millis,
            critical_lag_millis: r.critical_lag_millis,
            verify_checksums: r.verify_checksums,
            notice_queue_size: r.notice_queue_size,
            table_map: r.tables.clone(),
        }
    }
}

/// Identity of the node this process runs on
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// This node's unique ID (auto-generated if not set)
    pub node_id: Option<String>,
    /// This node's human-readable name (hostname if not set)
    pub node_name: Option<String>,
    /// Region this node lives in
    pub region: String,
    /// Endpoint other nodes reach this one at
    pub endpoint: String,
    /// Role of this node (primary or replica)
    pub role: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            node_id: None,
            node_name: None,
            region: crate::DEFAULT_REGION.to_string(),
            endpoint: "http://localhost:9000".to_string(),
            role: "primary".to_string(),
        }
    }
}

/// Replication engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSection {
    /// Delivery mode (sync, async, semi-sync)
    pub delivery_mode: String,
    /// Default read consistency (strong, eventual, bounded)
    pub consistency: String,
    /// Staleness bound used when consistency = "bounded"
    pub bounded_max_lag_millis: u64,
    /// Conflict resolution strategy (last-write-wins, multi-version-merge,
    /// convergent-merge, custom)
    pub conflict_resolution: String,
    /// Optional key partitioning
    pub partitioning: Option<PartitionScheme>,
    /// Replication log count bound
    pub log_max_events: usize,
    /// Replication log age bound in hours
    pub log_retention_hours: u64,
    /// Concurrency window for conflict detection in millis
    pub conflict_window_millis: u64,
    /// Semi-sync dispatch deadline in millis
    pub semi_sync_timeout_millis: u64,
    /// Health probe interval in seconds
    pub probe_interval_secs: u64,
    /// Conflict resolution sweep interval in millis
    pub resolve_interval_millis: u64,
    /// Max lag before the cluster counts as degraded
    pub degraded_lag_millis: u64,
    /// Max lag before the cluster counts as critical
    pub critical_lag_millis: u64,
    /// Verify payload checksums before dispatching
    pub verify_checksums: bool,
    /// Capacity of the notice channel
    pub notice_queue_size: usize,
    /// Aggregate type to table name mapping for the domain feed
    pub tables: HashMap<String, String>,
}

impl Default for ReplicationSection {
    fn default() -> Self {
        Self {
            delivery_mode: "async".to_string(),
            consistency: "eventual".to_string(),
            bounded_max_lag_millis: 500,
            conflict_resolution: "last-write-wins".to_string(),
            partitioning: None,
            log_max_events: crate::DEFAULT_LOG_MAX_EVENTS,
            log_retention_hours: crate::DEFAULT_LOG_RETENTION_HOURS,
            conflict_window_millis: crate::DEFAULT_CONFLICT_WINDOW_MILLIS,
            semi_sync_timeout_millis: crate::DEFAULT_SEMI_SYNC_TIMEOUT_MILLIS,
            probe_interval_secs: crate::DEFAULT_PROBE_INTERVAL_SECS,
            resolve_interval_millis: crate::DEFAULT_RESOLVE_INTERVAL_MILLIS,
            degraded_lag_millis: crate::DEGRADED_LAG_MILLIS,
            critical_lag_millis: crate::CRITICAL_LAG_MILLIS,
            verify_checksums: true,
            notice_queue_size: 1024,
            tables: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
