//! Domain feed translation
//!
//! Adapts raw domain change records into replication events. Event type
//! suffixes choose the change kind, aggregate types map to tables through
//! configuration, and the change's own clock and version counter carry
//! over unchanged.

use std::collections::HashMap;

use tracing::trace;

use meridian_core::types::{ChangeType, DomainChange, NodeId, ReplicationEvent};

pub struct ChangeTranslator {
    table_map: HashMap<String, String>,
    local_node_id: NodeId,
}

impl ChangeTranslator {
    pub fn new(table_map: HashMap<String, String>, local_node_id: impl Into<NodeId>) -> Self {
        Self {
            table_map,
            local_node_id: local_node_id.into(),
        }
    }

    /// Translate one feed record into a replication event sourced from
    /// the local node.
    pub fn translate(&self, change: &DomainChange) -> ReplicationEvent {
        let table = self
            .table_map
            .get(&change.aggregate_type)
            .cloned()
            .unwrap_or_else(|| change.aggregate_type.to_lowercase());
        let event = ReplicationEvent::new(
            change_type_for(&change.event_type),
            table,
            change.aggregate_id.clone(),
            change.payload.clone(),
            self.local_node_id.clone(),
            change.version,
        )
        .recorded_at(change.occurred_at);
        trace!(
            event_id = %event.id,
            event_type = %change.event_type,
            table = %event.table,
            "Translated domain change"
        );
        event
    }
}

/// `*Created` inserts, `*Deleted` deletes, everything else updates.
fn change_type_for(event_type: &str) -> ChangeType {
    if event_type.ends_with("Created") {
        ChangeType::Insert
    } else if event_type.ends_with("Deleted") {
        ChangeType::Delete
    } else {
        ChangeType::Update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn translator() -> ChangeTranslator {
        let mut table_map = HashMap::new();
        table_map.insert("Todo".to_string(), "todos".to_string());
        ChangeTranslator::new(table_map, "node-local")
    }

    #[test]
    fn test_created_suffix_becomes_an_insert() {
        let change = DomainChange::new("t1", "Todo", "TodoCreated", json!({"title": "x"}), 1);

        let event = translator().translate(&change);
        assert_eq!(event.change_type, ChangeType::Insert);
        assert_eq!(event.table, "todos");
        assert_eq!(event.key, "t1");
        assert_eq!(event.source_node_id, "node-local");
        assert_eq!(event.version, 1);
    }

    #[test]
    fn test_deleted_suffix_becomes_a_delete() {
        let change = DomainChange::new("t1", "Todo", "TodoDeleted", json!(null), 3);

        let event = translator().translate(&change);
        assert_eq!(event.change_type, ChangeType::Delete);
    }

    #[test]
    fn test_unknown_suffixes_default_to_update() {
        for event_type in ["TodoUpdated", "TodoArchived", "Snapshot"] {
            let change = DomainChange::new("t1", "Todo", event_type, json!({}), 2);
            let event = translator().translate(&change);
            assert_eq!(event.change_type, ChangeType::Update, "{}", event_type);
        }
    }

    #[test]
    fn test_unmapped_aggregates_use_the_lowercased_name() {
        let change = DomainChange::new("u1", "UserProfile", "UserProfileUpdated", json!({}), 1);

        let event = translator().translate(&change);
        assert_eq!(event.table, "userprofile");
    }

    #[test]
    fn test_the_change_clock_is_preserved() {
        let mut change = DomainChange::new("t1", "Todo", "TodoUpdated", json!({}), 2);
        change.occurred_at = change.occurred_at - chrono::Duration::minutes(5);

        let event = translator().translate(&change);
        assert_eq!(event.timestamp, change.occurred_at);
    }
}
