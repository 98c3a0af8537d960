//! Replication notices
//!
//! Components report noteworthy state changes as notices on a bounded
//! channel handed out when the coordinator is built. Emission never
//! blocks: when the subscriber falls behind, notices are dropped and
//! counted instead of stalling replication.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use meridian_core::types::{NodeId, NodeRole};

use crate::metrics::names;

/// State changes surfaced to the embedding application
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationNotice {
    NodeRegistered {
        node_id: NodeId,
        region: String,
        role: NodeRole,
    },
    NodeUnhealthy {
        node_id: NodeId,
    },
    NodeHealthy {
        node_id: NodeId,
    },
    ConflictDetected {
        conflict_id: String,
        table: String,
        key: String,
        versions: usize,
    },
    ReplicationFailed {
        node_id: NodeId,
        event_id: String,
        reason: String,
    },
}

impl ReplicationNotice {
    /// Stable name for logs and subscribers
    pub fn kind(&self) -> &'static str {
        match self {
            ReplicationNotice::NodeRegistered { .. } => "node:registered",
            ReplicationNotice::NodeUnhealthy { .. } => "node:unhealthy",
            ReplicationNotice::NodeHealthy { .. } => "node:healthy",
            ReplicationNotice::ConflictDetected { .. } => "conflict:detected",
            ReplicationNotice::ReplicationFailed { .. } => "replication:failed",
        }
    }
}

/// Non-blocking emitter shared by all components
#[derive(Clone)]
pub struct NoticeSender {
    tx: mpsc::Sender<ReplicationNotice>,
    dropped: Arc<AtomicU64>,
}

impl NoticeSender {
    /// Create a bounded notice channel and its sender handle.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ReplicationNotice>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sender = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sender, rx)
    }

    /// Emit a notice without blocking. A full or closed channel drops the
    /// notice and bumps the dropped counter.
    pub fn emit(&self, notice: ReplicationNotice) {
        match self.tx.try_send(notice) {
            Ok(()) => {}
            Err(TrySendError::Full(notice)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(names::NOTICES_DROPPED_TOTAL).increment(1);
                warn!(kind = notice.kind(), "Notice channel full, dropping notice");
            }
            Err(TrySendError::Closed(notice)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(kind = notice.kind(), "Notice channel closed, dropping notice");
            }
        }
    }

    /// Number of notices dropped since startup
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
