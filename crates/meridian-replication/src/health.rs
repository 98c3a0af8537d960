//! Health monitoring
//!
//! Probes every registered node on a fixed interval, classifies each as
//! active, lagging, or offline, and emits notices on availability
//! transitions. Probing runs on its own task and never blocks dispatch.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::RwLock;
use tokio::time::interval;
use tracing::{debug, info, warn};

use meridian_core::types::NodeStatus;

use crate::metrics::names;
use crate::notice::{NoticeSender, ReplicationNotice};
use crate::registry::{NodeFilter, NodeRegistry};
use crate::transport::{ProbeReport, ReplicaTransport};

pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,
    transport: Arc<dyn ReplicaTransport>,
    notices: NoticeSender,
    probe_interval: Duration,
    degraded_lag_millis: u64,
    shutdown: Arc<RwLock<bool>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        transport: Arc<dyn ReplicaTransport>,
        notices: NoticeSender,
        probe_interval: Duration,
        degraded_lag_millis: u64,
    ) -> Self {
        Self {
            registry,
            transport,
            notices,
            probe_interval,
            degraded_lag_millis,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Spawn the periodic probe loop.
    pub fn start(&self) {
        let registry = Arc::clone(&self.registry);
        let transport = Arc::clone(&self.transport);
        let notices = self.notices.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let degraded_lag_millis = self.degraded_lag_millis;
        let probe_interval = self.probe_interval;

        tokio::spawn(async move {
            let mut ticker = interval(probe_interval);
            loop {
                ticker.tick().await;
                if *shutdown.read() {
                    break;
                }
                Self::probe_all(&registry, &transport, &notices, degraded_lag_millis).await;
            }
            debug!("Health probe loop stopped");
        });
    }

    pub fn stop(&self) {
        *self.shutdown.write() = true;
    }

    /// Run one probe pass over every registered node.
    pub async fn probe_once(&self) {
        Self::probe_all(
            &self.registry,
            &self.transport,
            &self.notices,
            self.degraded_lag_millis,
        )
        .await;
    }

    async fn probe_all(
        registry: &Arc<NodeRegistry>,
        transport: &Arc<dyn ReplicaTransport>,
        notices: &NoticeSender,
        degraded_lag_millis: u64,
    ) {
        for node in registry.list(&NodeFilter::default()) {
            let report = match transport.probe(&node).await {
                Ok(report) => report,
                Err(e) => {
                    debug!(node_id = %node.id, error = %e, "Probe failed");
                    ProbeReport::default()
                }
            };

            // Lag is a replica measure; the primary defines the baseline.
            let lag = if node.is_primary() {
                None
            } else {
                report.lag_millis
            };
            let status = if !report.reachable {
                NodeStatus::Offline
            } else if lag.map_or(false, |l| l > degraded_lag_millis) {
                NodeStatus::Lagging
            } else {
                NodeStatus::Active
            };

            let Some(previous) = registry.apply_probe(&node.id, status, lag, report.metrics)
            else {
                continue;
            };

            if previous.is_available() && !status.is_available() {
                warn!(node_id = %node.id, "Node became unreachable");
                counter!(names::HEALTH_TRANSITIONS_TOTAL, "to" => "unhealthy").increment(1);
                notices.emit(ReplicationNotice::NodeUnhealthy {
                    node_id: node.id.clone(),
                });
            } else if !previous.is_available() && status.is_available() {
                info!(node_id = %node.id, "Node recovered");
                counter!(names::HEALTH_TRANSITIONS_TOTAL, "to" => "healthy").increment(1);
                notices.emit(ReplicationNotice::NodeHealthy {
                    node_id: node.id.clone(),
                });
            }
        }
    }
}
