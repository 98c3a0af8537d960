//! Replication log
//!
//! Append-only, bounded record of accepted change events. The log is the
//! source of truth for replay and conflict detection: every event passes
//! through it before dispatch. Capacity is bounded by entry count and by
//! age, except that entries pinned by an unfinished sync dispatch are
//! never evicted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use meridian_core::types::{NodeId, ReplicationEvent, VectorClock};

use crate::clock::VersionTracker;
use crate::error::ReplicationResult;
use crate::metrics::names;

/// Where a replay starts. Events strictly after the position are returned.
#[derive(Debug, Clone)]
pub enum LogPosition {
    Timestamp(DateTime<Utc>),
    Version(u64),
}

/// Filter for log reads
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub table: Option<String>,
    pub source_node_id: Option<NodeId>,
}

pub struct ReplicationLog {
    entries: RwLock<VecDeque<ReplicationEvent>>,
    tracker: VersionTracker,
    pins: Arc<Mutex<HashMap<String, usize>>>,
    evicted: AtomicU64,
    max_events: usize,
    retention: chrono::Duration,
}

impl ReplicationLog {
    pub fn new(max_events: usize, retention: std::time::Duration) -> Self {
        let retention =
            chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::hours(24));
        Self {
            entries: RwLock::new(VecDeque::new()),
            tracker: VersionTracker::new(),
            pins: Arc::new(Mutex::new(HashMap::new())),
            evicted: AtomicU64::new(0),
            max_events,
            retention,
        }
    }

    /// Append one event in arrival order. Rejects duplicate or stale
    /// versions per source, then enforces the capacity bounds.
    pub fn append(&self, event: ReplicationEvent) -> ReplicationResult<ReplicationEvent> {
        let mut entries = self.entries.write();
        self.tracker.observe(&event.source_node_id, event.version)?;
        entries.push_back(event.clone());
        self.evict(&mut entries);
        gauge!(names::LOG_EVENTS).set(entries.len() as f64);
        drop(entries);

        counter!(names::EVENTS_APPENDED_TOTAL).increment(1);
        trace!(
            event_id = %event.id,
            source = %event.source_node_id,
            version = event.version,
            table = %event.table,
            "Appended replication event"
        );
        Ok(event)
    }

    fn evict(&self, entries: &mut VecDeque<ReplicationEvent>) {
        let cutoff = Utc::now() - self.retention;
        let pins = self.pins.lock();
        let mut evicted = 0u64;
        loop {
            let Some(front) = entries.front() else { break };
            let over_count = entries.len() > self.max_events;
            let over_age = front.timestamp < cutoff;
            if !over_count && !over_age {
                break;
            }
            // A pinned entry shields everything behind it; eviction resumes
            // once the pin is released.
            if pins.contains_key(&front.id) {
                break;
            }
            entries.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            self.evicted.fetch_add(evicted, Ordering::Relaxed);
            counter!(names::EVENTS_EVICTED_TOTAL).increment(evicted);
            debug!(evicted, "Evicted replication log entries");
        }
    }

    /// Pin an event for the duration of the returned guard. Pinned events
    /// survive eviction until every guard for them is dropped.
    pub fn pin(&self, event_id: &str) -> PinGuard {
        let mut pins = self.pins.lock();
        *pins.entry(event_id.to_string()).or_insert(0) += 1;
        PinGuard {
            pins: Arc::clone(&self.pins),
            event_id: event_id.to_string(),
        }
    }

    /// Events strictly after the position, oldest first.
    pub fn events_since(&self, position: &LogPosition, filter: &EventFilter) -> Vec<ReplicationEvent> {
        self.entries
            .read()
            .iter()
            .filter(|event| match position {
                LogPosition::Timestamp(ts) => event.timestamp > *ts,
                LogPosition::Version(version) => event.version > *version,
            })
            .filter(|event| filter.table.as_deref().map_or(true, |t| event.table == t))
            .filter(|event| {
                filter
                    .source_node_id
                    .as_deref()
                    .map_or(true, |s| event.source_node_id == s)
            })
            .cloned()
            .collect()
    }

    /// Events touching (table, key) whose timestamps fall within `window`
    /// before `at`, in arrival order. Arrival order approximates time
    /// order for the trailing window this serves.
    pub fn recent_for_key(
        &self,
        table: &str,
        key: &str,
        window: chrono::Duration,
        at: DateTime<Utc>,
    ) -> Vec<ReplicationEvent> {
        let cutoff = at - window;
        let entries = self.entries.read();
        let mut matches: Vec<ReplicationEvent> = entries
            .iter()
            .rev()
            .take_while(|event| event.timestamp >= cutoff)
            .filter(|event| event.table == table && event.key == key)
            .cloned()
            .collect();
        matches.reverse();
        matches
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Total entries dropped by the capacity bounds since startup
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn tracker(&self) -> &VersionTracker {
        &self.tracker
    }

    /// Current per-source version clock
    pub fn vector_clock(&self) -> VectorClock {
        self.tracker.snapshot()
    }
}

/// Keeps one event exempt from eviction while alive
pub struct PinGuard {
    pins: Arc<Mutex<HashMap<String, usize>>>,
    event_id: String,
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(&self.event_id) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&self.event_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::types::ChangeType;
    use serde_json::json;
    use std::time::Duration;

    fn event(source: &str, version: u64) -> ReplicationEvent {
        ReplicationEvent::new(
            ChangeType::Update,
            "todos",
            "t1",
            json!({"value": version}),
            source,
            version,
        )
    }

    fn log() -> ReplicationLog {
        ReplicationLog::new(100_000, Duration::from_secs(24 * 3600))
    }

    #[test]
    fn test_append_accepts_increasing_versions() {
        let log = log();
        for version in 1..=10 {
            log.append(event("n1", version)).unwrap();
        }
        assert_eq!(log.len(), 10);
        assert_eq!(log.vector_clock().get("n1"), 10);
    }

    #[test]
    fn test_duplicate_version_is_rejected_without_appending() {
        let log = log();
        log.append(event("n1", 1)).unwrap();

        assert!(log.append(event("n1", 1)).is_err());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_count_bound_evicts_oldest_first() {
        let log = ReplicationLog::new(3, Duration::from_secs(24 * 3600));
        for version in 1..=5 {
            log.append(event("n1", version)).unwrap();
        }

        assert_eq!(log.len(), 3);
        assert_eq!(log.evicted_count(), 2);
        let remaining = log.events_since(&LogPosition::Version(0), &EventFilter::default());
        let versions: Vec<u64> = remaining.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![3, 4, 5]);
    }

    #[test]
    fn test_age_bound_evicts_expired_entries() {
        let log = ReplicationLog::new(100, Duration::from_secs(3600));
        let stale = event("n1", 1).recorded_at(Utc::now() - chrono::Duration::hours(2));
        log.append(stale).unwrap();
        log.append(event("n1", 2)).unwrap();

        assert_eq!(log.len(), 1);
        assert_eq!(log.evicted_count(), 1);
        let remaining = log.events_since(&LogPosition::Version(0), &EventFilter::default());
        assert_eq!(remaining[0].version, 2);
    }

    #[test]
    fn test_pinned_entry_halts_eviction_until_released() {
        let log = ReplicationLog::new(2, Duration::from_secs(24 * 3600));
        let first = log.append(event("n1", 1)).unwrap();
        let pin = log.pin(&first.id);

        for version in 2..=4 {
            log.append(event("n1", version)).unwrap();
        }
        // Pin at the front shields the whole log from the count bound.
        assert_eq!(log.len(), 4);
        assert_eq!(log.evicted_count(), 0);

        drop(pin);
        log.append(event("n1", 5)).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.evicted_count(), 3);
    }

    #[test]
    fn test_events_since_filters_by_position_and_table() {
        let log = log();
        let base = Utc::now();
        log.append(
            ReplicationEvent::new(ChangeType::Insert, "todos", "t1", json!({}), "n1", 1)
                .recorded_at(base),
        )
        .unwrap();
        log.append(
            ReplicationEvent::new(ChangeType::Insert, "users", "u1", json!({}), "n1", 2)
                .recorded_at(base + chrono::Duration::milliseconds(10)),
        )
        .unwrap();
        log.append(
            ReplicationEvent::new(ChangeType::Update, "todos", "t1", json!({}), "n2", 1)
                .recorded_at(base + chrono::Duration::milliseconds(20)),
        )
        .unwrap();

        let after_base = log.events_since(
            &LogPosition::Timestamp(base),
            &EventFilter {
                table: Some("todos".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(after_base.len(), 1);
        assert_eq!(after_base[0].source_node_id, "n2");

        let from_n1 = log.events_since(
            &LogPosition::Version(1),
            &EventFilter {
                source_node_id: Some("n1".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(from_n1.len(), 1);
        assert_eq!(from_n1[0].table, "users");
    }

    #[test]
    fn test_recent_for_key_honors_the_window() {
        let log = log();
        let now = Utc::now();
        log.append(
            ReplicationEvent::new(ChangeType::Update, "todos", "t1", json!({}), "n1", 1)
                .recorded_at(now - chrono::Duration::seconds(5)),
        )
        .unwrap();
        log.append(
            ReplicationEvent::new(ChangeType::Update, "todos", "t1", json!({}), "n2", 1)
                .recorded_at(now - chrono::Duration::milliseconds(300)),
        )
        .unwrap();
        log.append(
            ReplicationEvent::new(ChangeType::Update, "todos", "other", json!({}), "n3", 1)
                .recorded_at(now),
        )
        .unwrap();

        let recent = log.recent_for_key("todos", "t1", chrono::Duration::seconds(1), now);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].source_node_id, "n2");
    }
}
