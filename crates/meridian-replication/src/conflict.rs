//! Conflict detection and resolution
//!
//! Writes to the same `(table, key)` from different sources whose
//! timestamps fall within the detection window are treated as concurrent.
//! Detection runs on the arrival path; resolution picks or merges a
//! winning payload under the configured strategy and replays it as a new
//! event from the dedicated resolver source.
//!
//! Strategies:
//! - last-write-wins: latest timestamp, ties broken by node id
//! - multi-version-merge: highest per-source version counter
//! - convergent-merge: field-wise union, later fields win, order-free
//! - custom: delegated to an application-supplied resolver

use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::info;

use meridian_core::types::{
    ChangeType, Conflict, ConflictVersion, ReplicationEvent, ResolutionStrategy,
};
use meridian_core::RESOLVER_NODE_ID;

use crate::error::{ReplicationError, ReplicationResult};
use crate::log::ReplicationLog;
use crate::metrics::names;
use crate::notice::{NoticeSender, ReplicationNotice};

/// Application-supplied resolver for `ResolutionStrategy::Custom`
pub trait CustomResolver: Send + Sync {
    /// Produce the winning payload for a conflict.
    fn resolve(&self, conflict: &Conflict) -> ReplicationResult<Value>;
}

/// What `inspect` found for one event
#[derive(Debug, Clone)]
pub struct Detection {
    pub conflict: Conflict,
    /// False when the event joined a conflict that was already open
    pub newly_opened: bool,
}

/// Watches the arrival path for concurrent writes
pub struct ConflictDetector {
    log: Arc<ReplicationLog>,
    window: chrono::Duration,
    open: Mutex<Vec<Conflict>>,
    notices: NoticeSender,
}

impl ConflictDetector {
    pub fn new(log: Arc<ReplicationLog>, window: std::time::Duration, notices: NoticeSender) -> Self {
        let window =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(1));
        Self {
            log,
            window,
            open: Mutex::new(Vec::new()),
            notices,
        }
    }

    /// Evaluate a just-appended event against the trailing window.
    pub fn inspect(&self, event: &ReplicationEvent) -> Option<Detection> {
        // Resolution replays never re-open conflicts.
        if event.source_node_id == RESOLVER_NODE_ID {
            return None;
        }

        let recent = self
            .log
            .recent_for_key(&event.table, &event.key, self.window, event.timestamp);
        let contenders: Vec<&ReplicationEvent> = recent
            .iter()
            .filter(|e| e.id != event.id)
            .filter(|e| e.source_node_id != event.source_node_id)
            .filter(|e| e.source_node_id != RESOLVER_NODE_ID)
            .collect();
        if contenders.is_empty() {
            return None;
        }

        let mut open = self.open.lock();
        if let Some(existing) = open
            .iter_mut()
            .find(|c| c.table == event.table && c.key == event.key)
        {
            existing.add_version(ConflictVersion::from(event));
            return Some(Detection {
                conflict: existing.clone(),
                newly_opened: false,
            });
        }

        let mut versions: Vec<ConflictVersion> =
            contenders.iter().map(|e| ConflictVersion::from(*e)).collect();
        versions.push(ConflictVersion::from(event));
        let conflict = Conflict::new(event.table.clone(), event.key.clone(), versions);

        info!(
            conflict_id = %conflict.id,
            table = %conflict.table,
            key = %conflict.key,
            versions = conflict.versions.len(),
            "Detected concurrent writes"
        );
        counter!(names::CONFLICTS_DETECTED_TOTAL).increment(1);
        self.notices.emit(ReplicationNotice::ConflictDetected {
            conflict_id: conflict.id.clone(),
            table: conflict.table.clone(),
            key: conflict.key.clone(),
            versions: conflict.versions.len(),
        });

        open.push(conflict.clone());
        gauge!(names::CONFLICTS_OPEN).set(open.len() as f64);
        Some(Detection {
            conflict,
            newly_opened: true,
        })
    }

    /// Conflicts awaiting resolution, oldest first
    pub fn open_conflicts(&self) -> Vec<Conflict> {
        self.open.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }

    /// Drop a resolved conflict from the open set.
    pub fn close(&self, conflict_id: &str) -> Option<Conflict> {
        let mut open = self.open.lock();
        let index = open.iter().position(|c| c.id == conflict_id)?;
        let conflict = open.remove(index);
        gauge!(names::CONFLICTS_OPEN).set(open.len() as f64);
        counter!(names::CONFLICTS_RESOLVED_TOTAL).increment(1);
        Some(conflict)
    }
}

/// Pick or merge the winning payload for a conflict.
pub fn resolve_conflict(
    conflict: &Conflict,
    strategy: ResolutionStrategy,
    custom: Option<&dyn CustomResolver>,
) -> ReplicationResult<Value> {
    if conflict.versions.is_empty() {
        return Err(ReplicationError::Internal(format!(
            "conflict {} has no versions",
            conflict.id
        )));
    }
    match strategy {
        ResolutionStrategy::LastWriteWins => Ok(last_write_wins(&conflict.versions)),
        ResolutionStrategy::MultiVersionMerge => Ok(highest_version(&conflict.versions)),
        ResolutionStrategy::ConvergentMerge => Ok(convergent_merge(&conflict.versions)),
        ResolutionStrategy::Custom => custom
            .ok_or(ReplicationError::NoResolverConfigured)?
            .resolve(conflict),
    }
}

/// Build the event that replays a resolution to every node.
pub fn resolution_event(conflict: &Conflict, payload: Value, version: u64) -> ReplicationEvent {
    ReplicationEvent::new(
        ChangeType::Update,
        conflict.table.clone(),
        conflict.key.clone(),
        payload,
        RESOLVER_NODE_ID,
        version,
    )
}

fn last_write_wins(versions: &[ConflictVersion]) -> Value {
    versions
        .iter()
        .max_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.node_id.cmp(&b.node_id))
        })
        .map(|v| v.payload.clone())
        .unwrap_or(Value::Null)
}

fn highest_version(versions: &[ConflictVersion]) -> Value {
    versions
        .iter()
        .max_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
                .then_with(|| a.node_id.cmp(&b.node_id))
        })
        .map(|v| v.payload.clone())
        .unwrap_or(Value::Null)
}

fn convergent_merge(versions: &[ConflictVersion]) -> Value {
    let mut ordered: Vec<&ConflictVersion> = versions.iter().collect();
    ordered.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });

    // Field-wise union over (timestamp, node_id) order makes the result
    // independent of arrival order. Non-object payloads cannot merge; the
    // latest one wins only when no object fields exist at all.
    let mut merged = Map::new();
    let mut last_non_object = None;
    for version in &ordered {
        match &version.payload {
            Value::Object(fields) => {
                for (field, value) in fields {
                    merged.insert(field.clone(), value.clone());
                }
            }
            other => last_non_object = Some(other.clone()),
        }
    }
    if merged.is_empty() {
        if let Some(value) = last_non_object {
            return value;
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn detector() -> (Arc<ReplicationLog>, ConflictDetector) {
        let log = Arc::new(ReplicationLog::new(1000, Duration::from_secs(3600)));
        let (notices, _rx) = NoticeSender::channel(64);
        let detector = ConflictDetector::new(Arc::clone(&log), Duration::from_secs(1), notices);
        (log, detector)
    }

    fn write(
        source: &str,
        version: u64,
        payload: Value,
        at: chrono::DateTime<Utc>,
    ) -> ReplicationEvent {
        ReplicationEvent::update("todos", "t1", payload, source, version).recorded_at(at)
    }

    #[test]
    fn test_concurrent_writes_from_different_sources_conflict() {
        let (log, detector) = detector();
        let base = Utc::now();

        let a = log
            .append(write("p1", 1, json!({"value": "a"}), base))
            .unwrap();
        assert!(detector.inspect(&a).is_none());

        let b = log
            .append(write(
                "r1",
                1,
                json!({"value": "b"}),
                base + chrono::Duration::milliseconds(100),
            ))
            .unwrap();
        let detection = detector.inspect(&b).unwrap();
        assert!(detection.newly_opened);
        assert_eq!(detection.conflict.versions.len(), 2);
        assert!(detection.conflict.involves("p1"));
        assert!(detection.conflict.involves("r1"));
        assert_eq!(detector.open_count(), 1);
    }

    #[test]
    fn test_same_source_writes_never_conflict() {
        let (log, detector) = detector();
        let base = Utc::now();

        let a = log
            .append(write("p1", 1, json!({"v": 1}), base))
            .unwrap();
        detector.inspect(&a);
        let b = log
            .append(write(
                "p1",
                2,
                json!({"v": 2}),
                base + chrono::Duration::milliseconds(50),
            ))
            .unwrap();

        assert!(detector.inspect(&b).is_none());
        assert_eq!(detector.open_count(), 0);
    }

    #[test]
    fn test_writes_outside_the_window_do_not_conflict() {
        let (log, detector) = detector();
        let base = Utc::now();

        let a = log.append(write("p1", 1, json!({}), base)).unwrap();
        detector.inspect(&a);
        let b = log
            .append(write("r1", 1, json!({}), base + chrono::Duration::seconds(2)))
            .unwrap();

        assert!(detector.inspect(&b).is_none());
    }

    #[test]
    fn test_resolver_replays_are_ignored() {
        let (log, detector) = detector();
        let base = Utc::now();

        let a = log.append(write("p1", 1, json!({}), base)).unwrap();
        detector.inspect(&a);
        let replay = log
            .append(write(
                RESOLVER_NODE_ID,
                1,
                json!({}),
                base + chrono::Duration::milliseconds(10),
            ))
            .unwrap();
        assert!(detector.inspect(&replay).is_none());

        // The replay never becomes a conflict version for later writes.
        let b = log
            .append(write(
                "r1",
                1,
                json!({}),
                base + chrono::Duration::milliseconds(20),
            ))
            .unwrap();
        let detection = detector.inspect(&b).unwrap();
        assert!(detection
            .conflict
            .versions
            .iter()
            .all(|v| v.node_id != RESOLVER_NODE_ID));
    }

    #[test]
    fn test_third_write_extends_the_open_conflict() {
        let (log, detector) = detector();
        let base = Utc::now();

        let a = log.append(write("p1", 1, json!({}), base)).unwrap();
        detector.inspect(&a);
        let b = log
            .append(write("r1", 1, json!({}), base + chrono::Duration::milliseconds(50)))
            .unwrap();
        let first = detector.inspect(&b).unwrap();
        let c = log
            .append(write("r2", 1, json!({}), base + chrono::Duration::milliseconds(80)))
            .unwrap();
        let second = detector.inspect(&c).unwrap();

        assert!(!second.newly_opened);
        assert_eq!(second.conflict.id, first.conflict.id);
        assert_eq!(second.conflict.versions.len(), 3);
        assert_eq!(detector.open_count(), 1);
    }

    #[test]
    fn test_close_removes_the_conflict() {
        let (log, detector) = detector();
        let base = Utc::now();

        let a = log.append(write("p1", 1, json!({}), base)).unwrap();
        detector.inspect(&a);
        let b = log
            .append(write("r1", 1, json!({}), base + chrono::Duration::milliseconds(50)))
            .unwrap();
        let detection = detector.inspect(&b).unwrap();

        assert!(detector.close(&detection.conflict.id).is_some());
        assert_eq!(detector.open_count(), 0);
        assert!(detector.close(&detection.conflict.id).is_none());
    }

    fn version_at(node: &str, version: u64, payload: Value, offset_millis: i64) -> ConflictVersion {
        ConflictVersion {
            node_id: node.to_string(),
            payload,
            timestamp: Utc::now() + chrono::Duration::milliseconds(offset_millis),
            version,
        }
    }

    #[test]
    fn test_last_write_wins_picks_the_latest_timestamp() {
        let conflict = Conflict::new(
            "todos",
            "t1",
            vec![
                version_at("p1", 1, json!({"value": "a"}), 0),
                version_at("r1", 1, json!({"value": "b"}), 100),
            ],
        );

        let winner = resolve_conflict(&conflict, ResolutionStrategy::LastWriteWins, None).unwrap();
        assert_eq!(winner, json!({"value": "b"}));
    }

    #[test]
    fn test_last_write_wins_breaks_timestamp_ties_by_node_id() {
        let at = Utc::now();
        let mut a = version_at("a-node", 1, json!({"from": "a"}), 0);
        let mut b = version_at("z-node", 1, json!({"from": "z"}), 0);
        a.timestamp = at;
        b.timestamp = at;

        let forward = Conflict::new("todos", "t1", vec![a.clone(), b.clone()]);
        let reversed = Conflict::new("todos", "t1", vec![b, a]);

        let first = resolve_conflict(&forward, ResolutionStrategy::LastWriteWins, None).unwrap();
        let second = resolve_conflict(&reversed, ResolutionStrategy::LastWriteWins, None).unwrap();
        assert_eq!(first, json!({"from": "z"}));
        assert_eq!(first, second);
    }

    #[test]
    fn test_multi_version_merge_picks_the_highest_version() {
        let conflict = Conflict::new(
            "todos",
            "t1",
            vec![
                version_at("p1", 7, json!({"value": "older-but-higher"}), 100),
                version_at("r1", 3, json!({"value": "newer-but-lower"}), 200),
            ],
        );

        let winner =
            resolve_conflict(&conflict, ResolutionStrategy::MultiVersionMerge, None).unwrap();
        assert_eq!(winner, json!({"value": "older-but-higher"}));
    }

    #[test]
    fn test_convergent_merge_unions_fields_and_is_order_free() {
        let a = version_at("p1", 1, json!({"title": "x", "done": false}), 0);
        let b = version_at("r1", 1, json!({"done": true, "owner": "kim"}), 100);

        let forward = Conflict::new("todos", "t1", vec![a.clone(), b.clone()]);
        let reversed = Conflict::new("todos", "t1", vec![b, a]);

        let merged =
            resolve_conflict(&forward, ResolutionStrategy::ConvergentMerge, None).unwrap();
        assert_eq!(
            merged,
            json!({"title": "x", "done": true, "owner": "kim"})
        );
        assert_eq!(
            merged,
            resolve_conflict(&reversed, ResolutionStrategy::ConvergentMerge, None).unwrap()
        );
    }

    #[test]
    fn test_custom_strategy_requires_a_resolver() {
        let conflict = Conflict::new("todos", "t1", vec![version_at("p1", 1, json!({}), 0)]);

        let err = resolve_conflict(&conflict, ResolutionStrategy::Custom, None).unwrap_err();
        assert!(matches!(err, ReplicationError::NoResolverConfigured));
    }

    #[test]
    fn test_custom_resolver_is_consulted() {
        struct PreferP1;
        impl CustomResolver for PreferP1 {
            fn resolve(&self, conflict: &Conflict) -> ReplicationResult<Value> {
                conflict
                    .versions
                    .iter()
                    .find(|v| v.node_id == "p1")
                    .map(|v| v.payload.clone())
                    .ok_or_else(|| ReplicationError::Resolver("p1 wrote nothing".to_string()))
            }
        }

        let conflict = Conflict::new(
            "todos",
            "t1",
            vec![
                version_at("p1", 1, json!({"from": "p1"}), 0),
                version_at("r1", 1, json!({"from": "r1"}), 100),
            ],
        );

        let winner = resolve_conflict(&conflict, ResolutionStrategy::Custom, Some(&PreferP1)).unwrap();
        assert_eq!(winner, json!({"from": "p1"}));
    }

    #[test]
    fn test_resolution_event_replays_from_the_resolver_source() {
        let conflict = Conflict::new("todos", "t1", vec![version_at("p1", 1, json!({}), 0)]);

        let event = resolution_event(&conflict, json!({"value": "winner"}), 4);
        assert_eq!(event.source_node_id, RESOLVER_NODE_ID);
        assert_eq!(event.table, "todos");
        assert_eq!(event.key, "t1");
        assert_eq!(event.change_type, ChangeType::Update);
        assert_eq!(event.version, 4);
        assert!(event.verify_checksum());
    }
}
