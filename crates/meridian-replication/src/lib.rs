//! Meridian Replication - Multi-region event replication engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Replication Coordinator                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌───────────────┐  ┌───────────────┐  ┌───────────────┐   │
//! │  │ NodeRegistry  │  │ReplicationLog │  │  Dispatcher   │   │
//! │  │               │  │               │  │               │   │
//! │  │ - Membership  │  │ - Event store │  │ - Sync        │   │
//! │  │ - Lag state   │  │ - Vector clock│  │ - Async       │   │
//! │  │ - In-flight   │  │ - Eviction    │  │ - Semi-sync   │   │
//! │  └───────┬───────┘  └───────┬───────┘  └───────┬───────┘   │
//! │          │                  │                  │           │
//! │  ┌───────┴───────┐  ┌───────┴───────┐  ┌───────┴───────┐   │
//! │  │ HealthMonitor │  │ConflictDetect.│  │  QueryRouter  │   │
//! │  │               │  │  + Resolver   │  │               │   │
//! │  │ - Probes      │  │ - Window scan │  │ - Strong      │   │
//! │  │ - Transitions │  │ - LWW / merge │  │ - Eventual    │   │
//! │  │ - Notices     │  │ - Replay      │  │ - Bounded     │   │
//! │  └───────┬───────┘  └───────────────┘  └───────────────┘   │
//! │          │                                                  │
//! │  ┌───────┴─────────────────────────────────────────────┐   │
//! │  │               ReplicaTransport (HTTP)               │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Delivery Modes**: Sync (all-or-nothing), Async (fire-and-forget),
//!   Semi-sync (first acknowledgment wins)
//! - **Conflict Handling**: Window-based detection with last-write-wins,
//!   version-merge, convergent-merge, or custom resolution
//! - **Consistency Routing**: Strong, eventual, or bounded-staleness reads
//! - **Partitioning**: Hash, range, list, or geographic key placement
//! - **Health Monitoring**: Periodic probes with lag tracking and
//!   unhealthy/healthy transition notices
//! - **Bounded Log**: Count- and age-limited event log with vector clock
//!   versioning and replay

mod clock;
mod conflict;
mod coordinator;
mod dispatcher;
mod error;
mod feed;
mod health;
mod log;
pub mod metrics;
mod notice;
mod partition;
mod registry;
mod router;
mod transport;

pub use clock::VersionTracker;
pub use conflict::{resolution_event, resolve_conflict, ConflictDetector, CustomResolver, Detection};
pub use coordinator::{CoordinatorBuilder, ReplicationCoordinator};
pub use dispatcher::{DispatchReport, Dispatcher, DispatcherConfig, SendState, TargetOutcome};
pub use error::{ReplicationError, ReplicationResult};
pub use feed::ChangeTranslator;
pub use health::HealthMonitor;
pub use log::{EventFilter, LogPosition, PinGuard, ReplicationLog};
pub use notice::{NoticeSender, ReplicationNotice};
pub use partition::{
    build_partitioner, GeoPartitioner, HashPartitioner, KeyPartitioner, ListPartitioner,
    RangePartitioner,
};
pub use registry::{InFlightGuard, NodeFilter, NodeRegistry};
pub use router::{QueryExecutor, QueryOutcome, QueryRouter, RouteDecision};
pub use transport::{HttpTransport, MemoryTransport, ProbeReport, ReplicaTransport, TransportConfig};

// Re-export types from core
pub use meridian_core::types::{
    ChangeType, ClusterHealth, Conflict, ConflictVersion, ConsistencyLevel, DeliveryMode,
    DomainChange, NodeCapacity, NodeId, NodeMetrics, NodeRole, NodeStatus, NodeStatusReport,
    PartitionScheme, Placement, RangeBound, ReplicationConfig, ReplicationEvent, ReplicationNode,
    ReplicationStats, ReplicationStatus, ReplicationStrategy, ResolutionStrategy, VectorClock,
};
pub use meridian_core::RESOLVER_NODE_ID;
