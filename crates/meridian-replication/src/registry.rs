//! Node registry
//!
//! Owns the set of nodes participating in replication. Registration is
//! last-writer-wins by node id; removal is refused while sends to the
//! node are still in flight.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::gauge;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use meridian_core::types::{NodeId, NodeMetrics, NodeStatus, ReplicationNode};

use crate::error::{ReplicationError, ReplicationResult};
use crate::metrics::names;

/// Filter for node listings
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub status: Option<NodeStatus>,
    pub region: Option<String>,
}

/// Registry of replication nodes
pub struct NodeRegistry {
    nodes: RwLock<HashMap<NodeId, ReplicationNode>>,
    in_flight: Arc<Mutex<HashMap<NodeId, usize>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Add or replace a node.
    pub fn register(&self, node: ReplicationNode) -> ReplicationResult<()> {
        if node.id.trim().is_empty() {
            return Err(ReplicationError::InvalidNode("node id is empty".to_string()));
        }
        if node.endpoint.trim().is_empty() {
            return Err(ReplicationError::InvalidNode(format!(
                "node {} has no endpoint",
                node.id
            )));
        }

        let node_id = node.id.clone();
        let count;
        let replaced;
        {
            let mut nodes = self.nodes.write();
            replaced = nodes.insert(node_id.clone(), node).is_some();
            count = nodes.len();
        }
        gauge!(names::NODES_REGISTERED).set(count as f64);

        if replaced {
            debug!(node_id = %node_id, "Replaced existing node registration");
        } else {
            info!(node_id = %node_id, "Registered node");
        }
        Ok(())
    }

    /// Remove a node. Fails while sends to it are in flight.
    pub fn deregister(&self, node_id: &str) -> ReplicationResult<ReplicationNode> {
        // Lock order is in_flight then nodes, same as begin_send.
        let in_flight = self.in_flight.lock();
        let pending = in_flight.get(node_id).copied().unwrap_or(0);
        if pending > 0 {
            return Err(ReplicationError::NodeBusy {
                node_id: node_id.to_string(),
                in_flight: pending,
            });
        }

        let removed = {
            let mut nodes = self.nodes.write();
            let removed = nodes
                .remove(node_id)
                .ok_or_else(|| ReplicationError::NodeNotFound(node_id.to_string()))?;
            gauge!(names::NODES_REGISTERED).set(nodes.len() as f64);
            removed
        };
        info!(node_id = %node_id, "Deregistered node");
        Ok(removed)
    }

    pub fn get(&self, node_id: &str) -> Option<ReplicationNode> {
        self.nodes.read().get(node_id).cloned()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.read().contains_key(node_id)
    }

    /// List nodes matching the filter, ordered by id.
    pub fn list(&self, filter: &NodeFilter) -> Vec<ReplicationNode> {
        let mut nodes: Vec<ReplicationNode> = self
            .nodes
            .read()
            .values()
            .filter(|n| filter.status.map_or(true, |s| n.status == s))
            .filter(|n| filter.region.as_deref().map_or(true, |r| n.region == r))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Nodes currently able to receive events or serve reads, ordered by id.
    pub fn available_nodes(&self) -> Vec<ReplicationNode> {
        let mut nodes: Vec<ReplicationNode> = self
            .nodes
            .read()
            .values()
            .filter(|n| n.is_available())
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// The first available primary, by id order.
    pub fn primary(&self) -> Option<ReplicationNode> {
        self.available_nodes().into_iter().find(|n| n.is_primary())
    }

    /// Available nodes excluding the event source.
    pub fn replication_targets(&self, source_node_id: &str) -> Vec<ReplicationNode> {
        self.available_nodes()
            .into_iter()
            .filter(|n| n.id != source_node_id)
            .collect()
    }

    /// Mark the start of a send to a node. The returned guard releases the
    /// slot on drop, including when the send task panics.
    pub fn begin_send(&self, node_id: &str) -> ReplicationResult<InFlightGuard> {
        let mut in_flight = self.in_flight.lock();
        if !self.nodes.read().contains_key(node_id) {
            return Err(ReplicationError::NodeNotFound(node_id.to_string()));
        }
        *in_flight.entry(node_id.to_string()).or_insert(0) += 1;
        Ok(InFlightGuard {
            counters: Arc::clone(&self.in_flight),
            node_id: node_id.to_string(),
        })
    }

    /// Number of sends currently in flight for a node
    pub fn in_flight(&self, node_id: &str) -> usize {
        self.in_flight.lock().get(node_id).copied().unwrap_or(0)
    }

    /// Record a measured replication round-trip for a node. Lag is a
    /// replica measure; a primary only gets its sync time refreshed.
    pub fn record_lag(&self, node_id: &str, lag_millis: u64) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(node_id) {
            if !node.is_primary() {
                node.lag_millis = Some(lag_millis);
            }
            node.last_sync_at = Some(Utc::now());
        }
    }

    /// Apply one probe outcome. Returns the status the node had before.
    pub fn apply_probe(
        &self,
        node_id: &str,
        status: NodeStatus,
        lag_millis: Option<u64>,
        node_metrics: Option<NodeMetrics>,
    ) -> Option<NodeStatus> {
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(node_id)?;
        let previous = node.status;
        node.status = status;
        if let Some(lag) = lag_millis {
            node.lag_millis = Some(lag);
        }
        if let Some(m) = node_metrics {
            node.metrics = Some(m);
        }
        if status.is_available() {
            node.last_sync_at = Some(Utc::now());
        }
        Some(previous)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases one in-flight send slot on drop
pub struct InFlightGuard {
    counters: Arc<Mutex<HashMap<NodeId, usize>>>,
    node_id: NodeId,
}

impl InFlightGuard {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut counters = self.counters.lock();
        if let Some(count) = counters.get_mut(&self.node_id) {
            *count -= 1;
            if *count == 0 {
                counters.remove(&self.node_id);
            }
        }
    }
}

impl std::fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightGuard")
            .field("node_id", &self.node_id)
            .finish()
    }
}
