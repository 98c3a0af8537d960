//! Per-source version tracking
//!
//! Wraps a vector clock to enforce that versions from each source only
//! move forward. Versions start at 1; anything at or below the highest
//! version already seen for a source is rejected as a duplicate.

use parking_lot::RwLock;

use meridian_core::types::{NodeId, VectorClock};

use crate::error::{ReplicationError, ReplicationResult};

pub struct VersionTracker {
    clock: RwLock<VectorClock>,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self {
            clock: RwLock::new(VectorClock::new()),
        }
    }

    /// Record one (source, version) observation. Rejects re-used or stale
    /// versions without advancing the clock.
    pub fn observe(&self, source_node_id: &str, version: u64) -> ReplicationResult<()> {
        let mut clock = self.clock.write();
        if version <= clock.get(source_node_id) {
            return Err(ReplicationError::DuplicateEvent {
                source_node_id: source_node_id.to_string(),
                version,
            });
        }
        clock.record(source_node_id, version);
        Ok(())
    }

    /// Highest version seen from a source, if any
    pub fn last_seen(&self, source_node_id: &str) -> Option<u64> {
        let version = self.clock.read().get(source_node_id);
        (version > 0).then_some(version)
    }

    /// The version the next event from a source should carry
    pub fn next_version(&self, source_node_id: &str) -> u64 {
        self.clock.read().get(source_node_id) + 1
    }

    /// Copy of the current clock state
    pub fn snapshot(&self) -> VectorClock {
        self.clock.read().clone()
    }

    pub fn sources(&self) -> Vec<NodeId> {
        self.clock
            .read()
            .iter()
            .map(|(node_id, _)| node_id.clone())
            .collect()
    }
}

impl Default for VersionTracker {
    fn default() -> Self {
        Self::new()
    }
}
