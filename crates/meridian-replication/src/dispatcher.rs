//! Replication dispatcher
//!
//! Fans an accepted event out to its target nodes under the configured
//! delivery mode:
//!
//! - sync: every target must acknowledge; the first failure fails the
//!   call. Targets that already acknowledged are not rolled back.
//! - async: sends are spawned and the call returns immediately; failures
//!   surface as `replication:failed` notices.
//! - semi-sync: the call returns on the first acknowledgment and times
//!   out when none arrives in time. Remaining sends continue in the
//!   background.
//!
//! Targets come from the partitioner when one is configured, otherwise
//! every available node except the event source.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use meridian_core::types::{payload_checksum, DeliveryMode, NodeId, ReplicationEvent, ReplicationNode};

use crate::error::{ReplicationError, ReplicationResult};
use crate::log::ReplicationLog;
use crate::metrics;
use crate::notice::{NoticeSender, ReplicationNotice};
use crate::partition::KeyPartitioner;
use crate::registry::{InFlightGuard, NodeRegistry};
use crate::transport::ReplicaTransport;

/// Per-target send state: `Pending` until the send task is spawned,
/// `Sending` while in flight, then one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SendState {
    Pending,
    Sending,
    Acked,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    pub node_id: NodeId,
    pub state: SendState,
    pub rtt_millis: Option<u64>,
    pub error: Option<String>,
}

impl TargetOutcome {
    fn pending(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: SendState::Pending,
            rtt_millis: None,
            error: None,
        }
    }
}

/// What one dispatch call did
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub event_id: String,
    pub mode: DeliveryMode,
    pub targets: Vec<TargetOutcome>,
}

impl DispatchReport {
    fn new(event_id: String, mode: DeliveryMode) -> Self {
        Self {
            event_id,
            mode,
            targets: Vec::new(),
        }
    }

    fn mark(&mut self, node_id: &str, state: SendState, rtt_millis: Option<u64>, error: Option<String>) {
        if let Some(target) = self.targets.iter_mut().find(|t| t.node_id == node_id) {
            target.state = state;
            target.rtt_millis = rtt_millis;
            target.error = error;
        }
    }

    pub fn acked(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| t.state == SendState::Acked)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| t.state == SendState::Failed)
            .count()
    }

    /// First acknowledged target, if any
    pub fn first_acked(&self) -> Option<&TargetOutcome> {
        self.targets.iter().find(|t| t.state == SendState::Acked)
    }
}

struct SendOutcome {
    node_id: NodeId,
    result: Result<u64, String>,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub delivery_mode: DeliveryMode,
    pub semi_sync_timeout: std::time::Duration,
    pub verify_checksums: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::Async,
            semi_sync_timeout: std::time::Duration::from_secs(5),
            verify_checksums: true,
        }
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    registry: Arc<NodeRegistry>,
    log: Arc<ReplicationLog>,
    transport: Arc<dyn ReplicaTransport>,
    partitioner: Option<Box<dyn KeyPartitioner>>,
    notices: NoticeSender,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        registry: Arc<NodeRegistry>,
        log: Arc<ReplicationLog>,
        transport: Arc<dyn ReplicaTransport>,
        partitioner: Option<Box<dyn KeyPartitioner>>,
        notices: NoticeSender,
    ) -> Self {
        Self {
            config,
            registry,
            log,
            transport,
            partitioner,
            notices,
        }
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.config.delivery_mode
    }

    /// Replicate one logged event to its targets.
    pub async fn dispatch(&self, event: &ReplicationEvent) -> ReplicationResult<DispatchReport> {
        if self.config.verify_checksums && !event.verify_checksum() {
            return Err(ReplicationError::ChecksumMismatch {
                expected: event.checksum.clone(),
                got: payload_checksum(&event.payload),
            });
        }

        let targets = self.resolve_targets(event);
        if targets.is_empty() {
            // Semi-sync needs at least one acknowledgment, which an
            // empty target set can never produce.
            if self.config.delivery_mode == DeliveryMode::SemiSync {
                metrics::record_dispatch(DeliveryMode::SemiSync, "timeout");
                return Err(ReplicationError::SemiSyncTimeout {
                    timeout_millis: self.config.semi_sync_timeout.as_millis() as u64,
                });
            }
            debug!(event_id = %event.id, "No replication targets for event");
            return Ok(DispatchReport::new(
                event.id.clone(),
                self.config.delivery_mode,
            ));
        }

        match self.config.delivery_mode {
            DeliveryMode::Sync => self.dispatch_sync(event, targets).await,
            DeliveryMode::Async => self.dispatch_async(event, targets),
            DeliveryMode::SemiSync => self.dispatch_semi_sync(event, targets).await,
        }
    }

    /// Targets for an event against the current membership. The owning
    /// placement is computed fresh on every call.
    fn resolve_targets(&self, event: &ReplicationEvent) -> Vec<ReplicationNode> {
        let available = self.registry.available_nodes();
        let mut targets = match &self.partitioner {
            Some(partitioner) => {
                match partitioner.placement(&event.table, &event.key, &available) {
                    Some(placement) => placement
                        .node_ids()
                        .into_iter()
                        .filter_map(|id| available.iter().find(|n| n.id == id).cloned())
                        .collect(),
                    None => {
                        debug!(
                            table = %event.table,
                            key = %event.key,
                            scheme = partitioner.name(),
                            "No placement for key, replicating to all available nodes"
                        );
                        available
                    }
                }
            }
            None => available,
        };
        targets.retain(|n| n.id != event.source_node_id);
        targets
    }

    async fn dispatch_sync(
        &self,
        event: &ReplicationEvent,
        targets: Vec<ReplicationNode>,
    ) -> ReplicationResult<DispatchReport> {
        // The event stays replayable until every target acknowledges.
        let _pin = self.log.pin(&event.id);

        let mut report = DispatchReport::new(event.id.clone(), DeliveryMode::Sync);
        for node in &targets {
            report.targets.push(TargetOutcome::pending(node.id.clone()));
        }
        let (tx, mut rx) = mpsc::channel(targets.len());
        for node in targets {
            match self.registry.begin_send(&node.id) {
                Ok(guard) => {
                    report.mark(&node.id, SendState::Sending, None, None);
                    self.spawn_send(event, node, guard, Some(tx.clone()), false);
                }
                Err(e) => {
                    debug!(node_id = %node.id, error = %e, "Skipping target");
                    report.mark(&node.id, SendState::Skipped, None, None);
                }
            }
        }
        drop(tx);

        while let Some(outcome) = rx.recv().await {
            match outcome.result {
                Ok(rtt) => {
                    report.mark(&outcome.node_id, SendState::Acked, Some(rtt), None);
                }
                Err(reason) => {
                    report.mark(
                        &outcome.node_id,
                        SendState::Failed,
                        None,
                        Some(reason.clone()),
                    );
                    metrics::record_dispatch(DeliveryMode::Sync, "failed");
                    return Err(ReplicationError::Dispatch {
                        node_id: outcome.node_id,
                        reason,
                    });
                }
            }
        }

        metrics::record_dispatch(DeliveryMode::Sync, "acked");
        Ok(report)
    }

    fn dispatch_async(
        &self,
        event: &ReplicationEvent,
        targets: Vec<ReplicationNode>,
    ) -> ReplicationResult<DispatchReport> {
        let mut report = DispatchReport::new(event.id.clone(), DeliveryMode::Async);
        for node in &targets {
            report.targets.push(TargetOutcome::pending(node.id.clone()));
        }
        for node in targets {
            match self.registry.begin_send(&node.id) {
                Ok(guard) => {
                    report.mark(&node.id, SendState::Sending, None, None);
                    self.spawn_send(event, node, guard, None, true);
                }
                Err(e) => {
                    debug!(node_id = %node.id, error = %e, "Skipping target");
                    report.mark(&node.id, SendState::Skipped, None, None);
                }
            }
        }
        metrics::record_dispatch(DeliveryMode::Async, "sent");
        Ok(report)
    }

    async fn dispatch_semi_sync(
        &self,
        event: &ReplicationEvent,
        targets: Vec<ReplicationNode>,
    ) -> ReplicationResult<DispatchReport> {
        let timeout_millis = self.config.semi_sync_timeout.as_millis() as u64;
        let mut report = DispatchReport::new(event.id.clone(), DeliveryMode::SemiSync);
        for node in &targets {
            report.targets.push(TargetOutcome::pending(node.id.clone()));
        }
        let (tx, mut rx) = mpsc::channel(targets.len());
        let mut sent = 0usize;
        for node in targets {
            match self.registry.begin_send(&node.id) {
                Ok(guard) => {
                    report.mark(&node.id, SendState::Sending, None, None);
                    self.spawn_send(event, node, guard, Some(tx.clone()), true);
                    sent += 1;
                }
                Err(e) => {
                    debug!(node_id = %node.id, error = %e, "Skipping target");
                    report.mark(&node.id, SendState::Skipped, None, None);
                }
            }
        }
        drop(tx);

        if sent == 0 {
            metrics::record_dispatch(DeliveryMode::SemiSync, "timeout");
            return Err(ReplicationError::SemiSyncTimeout { timeout_millis });
        }

        let deadline = tokio::time::Instant::now() + self.config.semi_sync_timeout;
        let mut failed = 0usize;
        loop {
            let outcome = match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(outcome)) => outcome,
                // Every sender is gone or the deadline passed: no
                // acknowledgment is coming.
                Ok(None) | Err(_) => {
                    metrics::record_dispatch(DeliveryMode::SemiSync, "timeout");
                    return Err(ReplicationError::SemiSyncTimeout { timeout_millis });
                }
            };
            match outcome.result {
                Ok(rtt) => {
                    report.mark(&outcome.node_id, SendState::Acked, Some(rtt), None);
                    debug!(
                        event_id = %event.id,
                        node_id = %outcome.node_id,
                        rtt_millis = rtt,
                        "Semi-sync dispatch acknowledged, remaining sends continue"
                    );
                    metrics::record_dispatch(DeliveryMode::SemiSync, "acked");
                    return Ok(report);
                }
                Err(reason) => {
                    report.mark(&outcome.node_id, SendState::Failed, None, Some(reason));
                    failed += 1;
                    if failed == sent {
                        metrics::record_dispatch(DeliveryMode::SemiSync, "timeout");
                        return Err(ReplicationError::SemiSyncTimeout { timeout_millis });
                    }
                }
            }
        }
    }

    fn spawn_send(
        &self,
        event: &ReplicationEvent,
        node: ReplicationNode,
        guard: InFlightGuard,
        tx: Option<mpsc::Sender<SendOutcome>>,
        notify_failure: bool,
    ) {
        let transport = Arc::clone(&self.transport);
        let registry = Arc::clone(&self.registry);
        let notices = self.notices.clone();
        let event = event.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let result = transport.send(&node, &event).await;
            let rtt_millis = started.elapsed().as_millis() as u64;

            let outcome = match result {
                Ok(()) => {
                    registry.record_lag(&node.id, rtt_millis);
                    metrics::record_send_rtt(&node.id, rtt_millis);
                    SendOutcome {
                        node_id: node.id.clone(),
                        result: Ok(rtt_millis),
                    }
                }
                Err(e) => {
                    warn!(
                        node_id = %node.id,
                        event_id = %event.id,
                        error = %e,
                        "Replication send failed"
                    );
                    metrics::record_send_failure(&node.id);
                    if notify_failure {
                        notices.emit(ReplicationNotice::ReplicationFailed {
                            node_id: node.id.clone(),
                            event_id: event.id.clone(),
                            reason: e.to_string(),
                        });
                    }
                    SendOutcome {
                        node_id: node.id.clone(),
                        result: Err(e.to_string()),
                    }
                }
            };

            if let Some(tx) = tx {
                let _ = tx.send(outcome).await;
            }
            drop(guard);
        });
    }
}
