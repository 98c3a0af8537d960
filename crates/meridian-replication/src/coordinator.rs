//! Replication coordinator
//!
//! The single object an application holds: it owns the registry, log,
//! detector, dispatcher, monitor, and router, and mediates every
//! operation between them. All state lives here; nothing in the engine
//! is process-global, so several coordinators can coexist in one
//! process.
//!
//! ```text
//!   feed ──> translator ──> log ──> detector ──┐
//!                            │                 ▼
//!                            │          resolution sweep
//!                            ▼                 │
//!                        dispatcher <──────────┘
//!                            │
//!                  transport ┴ registry <── health monitor
//!                                │
//!                         query router
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::interval;
use tracing::{debug, info, warn};

use meridian_core::types::{
    ClusterHealth, Conflict, ConsistencyLevel, DomainChange, NodeStatusReport, ReplicationConfig,
    ReplicationEvent, ReplicationNode, ReplicationStats, ReplicationStatus, ResolutionStrategy,
    VectorClock,
};
use meridian_core::RESOLVER_NODE_ID;

use crate::conflict::{resolution_event, resolve_conflict, ConflictDetector, CustomResolver};
use crate::dispatcher::{DispatchReport, Dispatcher, DispatcherConfig};
use crate::error::{ReplicationError, ReplicationResult};
use crate::feed::ChangeTranslator;
use crate::health::HealthMonitor;
use crate::log::{EventFilter, LogPosition, ReplicationLog};
use crate::metrics;
use crate::notice::{NoticeSender, ReplicationNotice};
use crate::partition::build_partitioner;
use crate::registry::{NodeFilter, NodeRegistry};
use crate::router::{QueryExecutor, QueryOutcome, QueryRouter};
use crate::transport::ReplicaTransport;

#[derive(Default)]
struct Counters {
    events_appended: AtomicU64,
    dispatches_acked: AtomicU64,
    dispatches_failed: AtomicU64,
    conflicts_detected: AtomicU64,
    conflicts_resolved: AtomicU64,
}

/// Owns and wires the replication engine
pub struct ReplicationCoordinator {
    config: ReplicationConfig,
    registry: Arc<NodeRegistry>,
    log: Arc<ReplicationLog>,
    detector: Arc<ConflictDetector>,
    dispatcher: Arc<Dispatcher>,
    monitor: HealthMonitor,
    router: Option<QueryRouter>,
    translator: ChangeTranslator,
    custom_resolver: Option<Arc<dyn CustomResolver>>,
    notices: NoticeSender,
    counters: Arc<Counters>,
    // Serializes resolution so replay versions are allocated once.
    resolve_gate: Arc<AsyncMutex<()>>,
    shutdown: Arc<RwLock<bool>>,
}

impl ReplicationCoordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Wire up a coordinator. The returned receiver carries every notice
    /// the engine emits.
    pub fn new(
        config: ReplicationConfig,
        transport: Arc<dyn ReplicaTransport>,
        executor: Option<Arc<dyn QueryExecutor>>,
        custom_resolver: Option<Arc<dyn CustomResolver>>,
    ) -> (Self, mpsc::Receiver<ReplicationNotice>) {
        let (notices, notice_rx) = NoticeSender::channel(config.notice_queue_size);
        let registry = Arc::new(NodeRegistry::new());
        let log = Arc::new(ReplicationLog::new(config.log_max_events, config.log_retention));
        let detector = Arc::new(ConflictDetector::new(
            Arc::clone(&log),
            config.conflict_window,
            notices.clone(),
        ));
        let partitioner = config.strategy.partitioning.as_ref().map(build_partitioner);
        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig {
                delivery_mode: config.strategy.delivery_mode,
                semi_sync_timeout: config.semi_sync_timeout,
                verify_checksums: config.verify_checksums,
            },
            Arc::clone(&registry),
            Arc::clone(&log),
            Arc::clone(&transport),
            partitioner,
            notices.clone(),
        ));
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&transport),
            notices.clone(),
            config.probe_interval,
            config.degraded_lag_millis,
        );
        let router = executor.map(|executor| QueryRouter::new(Arc::clone(&registry), executor));
        let translator = ChangeTranslator::new(config.table_map.clone(), config.local_node_id.clone());

        let coordinator = Self {
            config,
            registry,
            log,
            detector,
            dispatcher,
            monitor,
            router,
            translator,
            custom_resolver,
            notices,
            counters: Arc::new(Counters::default()),
            resolve_gate: Arc::new(AsyncMutex::new(())),
            shutdown: Arc::new(RwLock::new(false)),
        };
        (coordinator, notice_rx)
    }

    /// Start the background probe and resolution loops.
    pub fn start(&self) {
        info!(
            local_node_id = %self.config.local_node_id,
            "Starting replication coordinator"
        );
        self.monitor.start();
        self.start_resolve_loop();
    }

    /// Stop the background loops. In-flight sends run to completion.
    pub fn stop(&self) {
        *self.shutdown.write() = true;
        self.monitor.stop();
        info!("Replication coordinator stopped");
    }

    pub fn local_node_id(&self) -> &str {
        &self.config.local_node_id
    }

    /// Add or replace a node and announce it.
    pub fn register_node(&self, node: ReplicationNode) -> ReplicationResult<()> {
        self.registry.register(node.clone())?;
        self.notices.emit(ReplicationNotice::NodeRegistered {
            node_id: node.id,
            region: node.region,
            role: node.role,
        });
        Ok(())
    }

    /// Remove a node. Fails while sends to it are in flight.
    pub fn deregister_node(&self, node_id: &str) -> ReplicationResult<ReplicationNode> {
        self.registry.deregister(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<ReplicationNode> {
        self.registry.get(node_id)
    }

    pub fn nodes(&self) -> Vec<ReplicationNode> {
        self.registry.list(&NodeFilter::default())
    }

    /// Accept one pre-built event: append it, check for conflicts, and
    /// dispatch it under the configured delivery mode.
    pub async fn replicate(&self, event: ReplicationEvent) -> ReplicationResult<DispatchReport> {
        let event = self.log.append(event)?;
        self.counters.events_appended.fetch_add(1, Ordering::Relaxed);

        if let Some(detection) = self.detector.inspect(&event) {
            if detection.newly_opened {
                self.counters.conflicts_detected.fetch_add(1, Ordering::Relaxed);
            }
        }

        match self.dispatcher.dispatch(&event).await {
            Ok(report) => {
                self.counters.dispatches_acked.fetch_add(1, Ordering::Relaxed);
                Ok(report)
            }
            Err(e) => {
                self.counters.dispatches_failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Accept a raw domain change from the feed.
    pub async fn ingest(&self, change: DomainChange) -> ReplicationResult<DispatchReport> {
        let event = self.translator.translate(&change);
        self.replicate(event).await
    }

    /// Resolve every open conflict under the configured strategy. Each
    /// resolution is appended to the log and dispatched like any other
    /// event. A resolver error leaves the conflict queued and propagates.
    pub async fn resolve_conflicts(&self) -> ReplicationResult<Vec<ReplicationEvent>> {
        let _gate = self.resolve_gate.lock().await;
        Self::resolve_open(
            &self.detector,
            &self.log,
            &self.dispatcher,
            self.config.strategy.conflict_resolution,
            self.custom_resolver.as_deref(),
            &self.counters,
        )
        .await
    }

    async fn resolve_open(
        detector: &ConflictDetector,
        log: &ReplicationLog,
        dispatcher: &Dispatcher,
        strategy: ResolutionStrategy,
        custom: Option<&dyn CustomResolver>,
        counters: &Counters,
    ) -> ReplicationResult<Vec<ReplicationEvent>> {
        let mut resolved = Vec::new();
        for conflict in detector.open_conflicts() {
            let payload = resolve_conflict(&conflict, strategy, custom)?;
            let version = log.tracker().next_version(RESOLVER_NODE_ID);
            let event = log.append(resolution_event(&conflict, payload, version))?;
            counters.events_appended.fetch_add(1, Ordering::Relaxed);
            detector.close(&conflict.id);
            counters.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
            info!(
                conflict_id = %conflict.id,
                event_id = %event.id,
                strategy = ?strategy,
                "Conflict resolved"
            );

            match dispatcher.dispatch(&event).await {
                Ok(_) => {
                    counters.dispatches_acked.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.dispatches_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        event_id = %event.id,
                        error = %e,
                        "Resolution dispatch failed, the event stays logged for replay"
                    );
                }
            }
            resolved.push(event);
        }
        Ok(resolved)
    }

    fn start_resolve_loop(&self) {
        let detector = Arc::clone(&self.detector);
        let log = Arc::clone(&self.log);
        let dispatcher = Arc::clone(&self.dispatcher);
        let counters = Arc::clone(&self.counters);
        let custom = self.custom_resolver.clone();
        let gate = Arc::clone(&self.resolve_gate);
        let shutdown = Arc::clone(&self.shutdown);
        let strategy = self.config.strategy.conflict_resolution;
        let resolve_interval = self.config.resolve_interval;

        tokio::spawn(async move {
            let mut ticker = interval(resolve_interval);
            loop {
                ticker.tick().await;
                if *shutdown.read() {
                    break;
                }
                if detector.open_count() == 0 {
                    continue;
                }
                let _gate = gate.lock().await;
                match Self::resolve_open(
                    &detector,
                    &log,
                    &dispatcher,
                    strategy,
                    custom.as_deref(),
                    &counters,
                )
                .await
                {
                    Ok(events) if !events.is_empty() => {
                        debug!(resolved = events.len(), "Resolution sweep completed");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Resolution sweep failed, conflicts stay queued");
                    }
                }
            }
            debug!("Resolution sweep loop stopped");
        });
    }

    /// Run one health probe pass immediately.
    pub async fn probe_health(&self) {
        self.monitor.probe_once().await;
    }

    /// Point-in-time view of the replication set.
    pub fn status(&self) -> ReplicationStatus {
        let nodes = self.registry.list(&NodeFilter::default());
        let reports: Vec<NodeStatusReport> = nodes
            .iter()
            .map(|n| NodeStatusReport {
                node_id: n.id.clone(),
                region: n.region.clone(),
                role: n.role,
                status: n.status,
                lag_millis: n.lag_millis,
                last_sync_at: n.last_sync_at,
            })
            .collect();
        let max_lag_millis = nodes.iter().filter_map(|n| n.lag_millis).max().unwrap_or(0);
        let total_lag_millis = nodes.iter().filter_map(|n| n.lag_millis).sum();
        let health = ClusterHealth::classify(
            max_lag_millis,
            self.config.degraded_lag_millis,
            self.config.critical_lag_millis,
        );
        metrics::record_cluster_health(health);

        ReplicationStatus {
            health,
            nodes: reports,
            max_lag_millis,
            total_lag_millis,
            open_conflicts: self.detector.open_count(),
        }
    }

    /// Aggregate counters since startup.
    pub fn stats(&self) -> ReplicationStats {
        ReplicationStats {
            events_appended: self.counters.events_appended.load(Ordering::Relaxed),
            events_evicted: self.log.evicted_count(),
            dispatches_acked: self.counters.dispatches_acked.load(Ordering::Relaxed),
            dispatches_failed: self.counters.dispatches_failed.load(Ordering::Relaxed),
            conflicts_detected: self.counters.conflicts_detected.load(Ordering::Relaxed),
            conflicts_resolved: self.counters.conflicts_resolved.load(Ordering::Relaxed),
            notices_dropped: self.notices.dropped(),
        }
    }

    /// Route and execute one read. `consistency` overrides the configured
    /// default for this call.
    pub async fn query(
        &self,
        query: &str,
        params: &[Value],
        consistency: Option<ConsistencyLevel>,
    ) -> ReplicationResult<QueryOutcome> {
        let router = self.router.as_ref().ok_or(ReplicationError::NoQueryExecutor)?;
        let consistency = consistency.unwrap_or(self.config.strategy.consistency);
        router.query(query, params, consistency).await
    }

    /// Replay access to the log.
    pub fn events_since(&self, position: &LogPosition, filter: &EventFilter) -> Vec<ReplicationEvent> {
        self.log.events_since(position, filter)
    }

    pub fn open_conflicts(&self) -> Vec<Conflict> {
        self.detector.open_conflicts()
    }

    /// Current per-source version clock.
    pub fn vector_clock(&self) -> VectorClock {
        self.log.vector_clock()
    }
}

impl std::fmt::Debug for ReplicationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationCoordinator")
            .field("local_node_id", &self.config.local_node_id)
            .field("delivery_mode", &self.config.strategy.delivery_mode)
            .field("nodes", &self.registry.len())
            .field("log_events", &self.log.len())
            .field("open_conflicts", &self.detector.open_count())
            .finish()
    }
}

/// Builder for [`ReplicationCoordinator`]
pub struct CoordinatorBuilder {
    config: ReplicationConfig,
    transport: Option<Arc<dyn ReplicaTransport>>,
    executor: Option<Arc<dyn QueryExecutor>>,
    custom_resolver: Option<Arc<dyn CustomResolver>>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: ReplicationConfig::default(),
            transport: None,
            executor: None,
            custom_resolver: None,
        }
    }

    pub fn config(mut self, config: ReplicationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ReplicaTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn query_executor(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn custom_resolver(mut self, resolver: Arc<dyn CustomResolver>) -> Self {
        self.custom_resolver = Some(resolver);
        self
    }

    pub fn build(
        self,
    ) -> ReplicationResult<(ReplicationCoordinator, mpsc::Receiver<ReplicationNotice>)> {
        let transport = self.transport.ok_or_else(|| {
            ReplicationError::Internal("a transport is required to build the coordinator".to_string())
        })?;
        Ok(ReplicationCoordinator::new(
            self.config,
            transport,
            self.executor,
            self.custom_resolver,
        ))
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
