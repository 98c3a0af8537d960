//! Node transport
//!
//! Delivery and probing are abstracted behind a trait so the engine never
//! assumes anything about latency or failure behavior. Production wiring
//! uses the HTTP transport; tests inject the in-memory one and script
//! latencies and faults per node.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use meridian_core::types::{NodeId, NodeMetrics, ReplicationEvent, ReplicationNode};

use crate::error::{ReplicationError, ReplicationResult};

/// Outcome of probing one node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    pub reachable: bool,
    pub lag_millis: Option<u64>,
    pub metrics: Option<NodeMetrics>,
}

/// Delivery and probing operations against a single node
#[async_trait]
pub trait ReplicaTransport: Send + Sync {
    /// Deliver one event. Ok means the node acknowledged the event.
    async fn send(&self, node: &ReplicationNode, event: &ReplicationEvent)
        -> ReplicationResult<()>;

    /// Probe a node. An unreachable node is a successful probe with
    /// `reachable: false`; Err is reserved for transport faults.
    async fn probe(&self, node: &ReplicationNode) -> ReplicationResult<ProbeReport>;
}

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

/// Event delivery over node HTTP endpoints
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> ReplicationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    async fn post_with_retry(
        &self,
        url: &str,
        event: &ReplicationEvent,
    ) -> ReplicationResult<()> {
        let mut last_error = None;
        let mut delay = self.config.retry_base_delay;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                debug!("Retry attempt {} for {}", attempt, url);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }

            match self.client.post(url).json(event).send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(_) => return Ok(()),
                    Err(e) => {
                        warn!("Request to {} rejected (attempt {}): {}", url, attempt + 1, e);
                        last_error = Some(e);
                    }
                },
                Err(e) => {
                    warn!("Request to {} failed (attempt {}): {}", url, attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(ReplicationError::Http(e)),
            None => Err(ReplicationError::Transport(format!(
                "request to {} failed with no error detail",
                url
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct HealthBody {
    lag_millis: Option<u64>,
    metrics: Option<NodeMetrics>,
}

#[async_trait]
impl ReplicaTransport for HttpTransport {
    async fn send(
        &self,
        node: &ReplicationNode,
        event: &ReplicationEvent,
    ) -> ReplicationResult<()> {
        let url = format!(
            "{}/replication/events",
            node.endpoint.trim_end_matches('/')
        );
        self.post_with_retry(&url, event).await
    }

    async fn probe(&self, node: &ReplicationNode) -> ReplicationResult<ProbeReport> {
        let url = format!("{}/health", node.endpoint.trim_end_matches('/'));
        let started = Instant::now();

        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let rtt = started.elapsed().as_millis() as u64;
                let body: HealthBody = response.json().await.unwrap_or_default();
                Ok(ProbeReport {
                    reachable: true,
                    lag_millis: body.lag_millis.or(Some(rtt)),
                    metrics: body.metrics,
                })
            }
            Ok(response) => {
                debug!(node_id = %node.id, status = %response.status(), "Health probe rejected");
                Ok(ProbeReport::default())
            }
            Err(e) => {
                debug!(node_id = %node.id, error = %e, "Health probe failed");
                Ok(ProbeReport::default())
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct NodeSim {
    latency: Duration,
    fail_sends: bool,
    unreachable: bool,
    lag_millis: Option<u64>,
    metrics: Option<NodeMetrics>,
}

/// In-memory transport for tests and local simulations
#[derive(Default)]
pub struct MemoryTransport {
    sims: Mutex<HashMap<NodeId, NodeSim>>,
    delivered: Mutex<HashMap<NodeId, Vec<ReplicationEvent>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every send and probe to this node.
    pub fn set_latency(&self, node_id: &str, latency: Duration) {
        self.sims.lock().entry(node_id.to_string()).or_default().latency = latency;
    }

    /// Make sends to this node fail.
    pub fn fail_sends(&self, node_id: &str, fail: bool) {
        self.sims.lock().entry(node_id.to_string()).or_default().fail_sends = fail;
    }

    /// Make the node unreachable for sends and probes.
    pub fn set_unreachable(&self, node_id: &str, unreachable: bool) {
        self.sims.lock().entry(node_id.to_string()).or_default().unreachable = unreachable;
    }

    /// Replication lag the node reports when probed.
    pub fn set_lag(&self, node_id: &str, lag_millis: u64) {
        self.sims.lock().entry(node_id.to_string()).or_default().lag_millis = Some(lag_millis);
    }

    /// Node metrics returned by probes.
    pub fn set_metrics(&self, node_id: &str, metrics: NodeMetrics) {
        self.sims.lock().entry(node_id.to_string()).or_default().metrics = Some(metrics);
    }

    /// Events acknowledged by a node, in delivery order
    pub fn delivered(&self, node_id: &str) -> Vec<ReplicationEvent> {
        self.delivered
            .lock()
            .get(node_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn delivered_count(&self, node_id: &str) -> usize {
        self.delivered
            .lock()
            .get(node_id)
            .map_or(0, |events| events.len())
    }

    fn sim(&self, node_id: &str) -> NodeSim {
        self.sims.lock().get(node_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ReplicaTransport for MemoryTransport {
    async fn send(
        &self,
        node: &ReplicationNode,
        event: &ReplicationEvent,
    ) -> ReplicationResult<()> {
        let sim = self.sim(&node.id);
        if !sim.latency.is_zero() {
            tokio::time::sleep(sim.latency).await;
        }
        if sim.unreachable {
            return Err(ReplicationError::Transport(format!(
                "node {} is unreachable",
                node.id
            )));
        }
        if sim.fail_sends {
            return Err(ReplicationError::Transport(format!(
                "send to {} failed",
                node.id
            )));
        }
        self.delivered
            .lock()
            .entry(node.id.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn probe(&self, node: &ReplicationNode) -> ReplicationResult<ProbeReport> {
        let sim = self.sim(&node.id);
        if !sim.latency.is_zero() {
            tokio::time::sleep(sim.latency).await;
        }
        if sim.unreachable {
            return Ok(ProbeReport::default());
        }
        Ok(ProbeReport {
            reachable: true,
            lag_millis: sim.lag_millis.or(Some(sim.latency.as_millis() as u64)),
            metrics: sim.metrics,
        })
    }
}
