//! Replication metrics
//!
//! Metric names and recording helpers. Metrics are emitted through the
//! `metrics` facade; the embedding application decides whether and where
//! to install a recorder.

use metrics::{counter, gauge, histogram};

use meridian_core::types::{ClusterHealth, DeliveryMode};

/// Metric name constants
pub mod names {
    pub const EVENTS_APPENDED_TOTAL: &str = "meridian_events_appended_total";
    pub const EVENTS_EVICTED_TOTAL: &str = "meridian_events_evicted_total";
    pub const LOG_EVENTS: &str = "meridian_log_events";
    pub const DISPATCHES_TOTAL: &str = "meridian_dispatches_total";
    pub const DISPATCH_FAILURES_TOTAL: &str = "meridian_dispatch_failures_total";
    pub const SEND_RTT_MILLIS: &str = "meridian_send_rtt_milliseconds";
    pub const CONFLICTS_DETECTED_TOTAL: &str = "meridian_conflicts_detected_total";
    pub const CONFLICTS_RESOLVED_TOTAL: &str = "meridian_conflicts_resolved_total";
    pub const CONFLICTS_OPEN: &str = "meridian_conflicts_open";
    pub const NODES_REGISTERED: &str = "meridian_nodes_registered";
    pub const NODE_LAG_MILLIS: &str = "meridian_node_lag_milliseconds";
    pub const HEALTH_TRANSITIONS_TOTAL: &str = "meridian_health_transitions_total";
    pub const QUERY_ROUTES_TOTAL: &str = "meridian_query_routes_total";
    pub const QUERY_FALLBACKS_TOTAL: &str = "meridian_query_fallbacks_total";
    pub const NOTICES_DROPPED_TOTAL: &str = "meridian_notices_dropped_total";
    pub const CLUSTER_HEALTH: &str = "meridian_cluster_health";
}

/// Record a completed dispatch call.
pub fn record_dispatch(mode: DeliveryMode, outcome: &'static str) {
    counter!(names::DISPATCHES_TOTAL, "mode" => mode_label(mode), "outcome" => outcome).increment(1);
}

/// Record one send round-trip to a node.
pub fn record_send_rtt(node_id: &str, rtt_millis: u64) {
    histogram!(names::SEND_RTT_MILLIS, "node" => node_id.to_string()).record(rtt_millis as f64);
    gauge!(names::NODE_LAG_MILLIS, "node" => node_id.to_string()).set(rtt_millis as f64);
}

/// Record a failed send to a node.
pub fn record_send_failure(node_id: &str) {
    counter!(names::DISPATCH_FAILURES_TOTAL, "node" => node_id.to_string()).increment(1);
}

/// Record the current cluster health as a gauge (0 healthy, 1 degraded, 2 critical).
pub fn record_cluster_health(health: ClusterHealth) {
    let level = match health {
        ClusterHealth::Healthy => 0.0,
        ClusterHealth::Degraded => 1.0,
        ClusterHealth::Critical => 2.0,
    };
    gauge!(names::CLUSTER_HEALTH).set(level);
}

fn mode_label(mode: DeliveryMode) -> &'static str {
    match mode {
        DeliveryMode::Sync => "sync",
        DeliveryMode::Async => "async",
        DeliveryMode::SemiSync => "semi-sync",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_labels_are_stable() {
        assert_eq!(mode_label(DeliveryMode::Sync), "sync");
        assert_eq!(mode_label(DeliveryMode::Async), "async");
        assert_eq!(mode_label(DeliveryMode::SemiSync), "semi-sync");
    }

    #[test]
    fn test_names_share_the_meridian_prefix() {
        for name in [
            names::EVENTS_APPENDED_TOTAL,
            names::DISPATCHES_TOTAL,
            names::CONFLICTS_DETECTED_TOTAL,
            names::NODES_REGISTERED,
            names::CLUSTER_HEALTH,
        ] {
            assert!(name.starts_with("meridian_"));
        }
    }
}
