//! Query routing
//!
//! Picks the node a read should hit for the requested consistency level:
//! strong reads go to the primary, eventual reads to the freshest node,
//! bounded reads to any replica within the staleness bound with an
//! observable fallback to the primary.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use meridian_core::types::{ConsistencyLevel, NodeId, ReplicationNode};

use crate::error::{ReplicationError, ReplicationResult};
use crate::metrics::names;
use crate::registry::NodeRegistry;

/// Executes a read against a chosen node
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        node: &ReplicationNode,
        query: &str,
        params: &[Value],
    ) -> ReplicationResult<Value>;
}

/// Which node a read was routed to, and why
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub node_id: NodeId,
    /// True when a bounded read fell back to the primary
    pub fell_back: bool,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub route: RouteDecision,
    pub rows: Value,
}

pub struct QueryRouter {
    registry: Arc<NodeRegistry>,
    executor: Arc<dyn QueryExecutor>,
}

impl QueryRouter {
    pub fn new(registry: Arc<NodeRegistry>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self { registry, executor }
    }

    /// Pick the node a read should hit.
    pub fn route(&self, consistency: ConsistencyLevel) -> ReplicationResult<RouteDecision> {
        match consistency {
            ConsistencyLevel::Strong => {
                let primary = self.registry.primary().ok_or(ReplicationError::NoPrimary)?;
                counter!(names::QUERY_ROUTES_TOTAL, "consistency" => "strong").increment(1);
                Ok(RouteDecision {
                    node_id: primary.id,
                    fell_back: false,
                })
            }
            ConsistencyLevel::Eventual => {
                // The primary counts as lag zero; unmeasured replicas sort last.
                let node = self
                    .registry
                    .available_nodes()
                    .into_iter()
                    .min_by_key(|n| n.effective_lag_millis())
                    .ok_or(ReplicationError::NoNodesAvailable)?;
                counter!(names::QUERY_ROUTES_TOTAL, "consistency" => "eventual").increment(1);
                Ok(RouteDecision {
                    node_id: node.id,
                    fell_back: false,
                })
            }
            ConsistencyLevel::Bounded { max_lag_millis } => {
                let candidate = self
                    .registry
                    .available_nodes()
                    .into_iter()
                    .filter(|n| !n.is_primary())
                    .filter(|n| n.lag_millis.map_or(false, |lag| lag <= max_lag_millis))
                    .min_by_key(|n| n.effective_lag_millis());
                counter!(names::QUERY_ROUTES_TOTAL, "consistency" => "bounded").increment(1);
                match candidate {
                    Some(node) => Ok(RouteDecision {
                        node_id: node.id,
                        fell_back: false,
                    }),
                    None => {
                        let primary =
                            self.registry.primary().ok_or(ReplicationError::NoPrimary)?;
                        warn!(
                            max_lag_millis,
                            node_id = %primary.id,
                            "No replica within the staleness bound, reading from primary"
                        );
                        counter!(names::QUERY_FALLBACKS_TOTAL).increment(1);
                        Ok(RouteDecision {
                            node_id: primary.id,
                            fell_back: true,
                        })
                    }
                }
            }
        }
    }

    /// Route and execute one read.
    pub async fn query(
        &self,
        query: &str,
        params: &[Value],
        consistency: ConsistencyLevel,
    ) -> ReplicationResult<QueryOutcome> {
        let route = self.route(consistency)?;
        let node = self
            .registry
            .get(&route.node_id)
            .ok_or_else(|| ReplicationError::NodeNotFound(route.node_id.clone()))?;
        debug!(node_id = %node.id, fell_back = route.fell_back, "Routing query");
        let rows = self.executor.execute(&node, query, params).await?;
        Ok(QueryOutcome { route, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::types::{NodeRole, NodeStatus};
    use serde_json::json;

    struct EchoExecutor;

    #[async_trait]
    impl QueryExecutor for EchoExecutor {
        async fn execute(
            &self,
            node: &ReplicationNode,
            query: &str,
            _params: &[Value],
        ) -> ReplicationResult<Value> {
            Ok(json!({"node": node.id, "query": query}))
        }
    }

    fn router() -> (Arc<NodeRegistry>, QueryRouter) {
        let registry = Arc::new(NodeRegistry::new());
        registry
            .register(ReplicationNode::new(
                "p1",
                "us-east",
                NodeRole::Primary,
                "http://p1:9000",
            ))
            .unwrap();
        registry
            .register(ReplicationNode::new(
                "r1",
                "eu-west",
                NodeRole::Replica,
                "http://r1:9000",
            ))
            .unwrap();
        registry
            .register(ReplicationNode::new(
                "r2",
                "ap-south",
                NodeRole::Replica,
                "http://r2:9000",
            ))
            .unwrap();
        let router = QueryRouter::new(Arc::clone(&registry), Arc::new(EchoExecutor));
        (registry, router)
    }

    #[test]
    fn test_strong_routes_to_the_primary() {
        let (_registry, router) = router();

        let route = router.route(ConsistencyLevel::Strong).unwrap();
        assert_eq!(route.node_id, "p1");
        assert!(!route.fell_back);
    }

    #[test]
    fn test_strong_fails_without_an_active_primary() {
        let (registry, router) = router();
        registry.apply_probe("p1", NodeStatus::Offline, None, None);

        let err = router.route(ConsistencyLevel::Strong).unwrap_err();
        assert!(matches!(err, ReplicationError::NoPrimary));
    }

    #[test]
    fn test_eventual_prefers_the_lowest_lag() {
        let (registry, router) = router();
        registry.record_lag("r1", 50);
        registry.record_lag("r2", 20);

        // An active primary counts as lag zero and wins.
        let route = router.route(ConsistencyLevel::Eventual).unwrap();
        assert_eq!(route.node_id, "p1");

        registry.apply_probe("p1", NodeStatus::Offline, None, None);
        let route = router.route(ConsistencyLevel::Eventual).unwrap();
        assert_eq!(route.node_id, "r2");
    }

    #[test]
    fn test_eventual_fails_with_no_available_nodes() {
        let (registry, router) = router();
        for id in ["p1", "r1", "r2"] {
            registry.apply_probe(id, NodeStatus::Offline, None, None);
        }

        let err = router.route(ConsistencyLevel::Eventual).unwrap_err();
        assert!(matches!(err, ReplicationError::NoNodesAvailable));
    }

    #[test]
    fn test_bounded_picks_a_replica_within_the_bound() {
        let (registry, router) = router();
        registry.record_lag("r1", 50);
        registry.record_lag("r2", 200);

        let route = router
            .route(ConsistencyLevel::Bounded {
                max_lag_millis: 100,
            })
            .unwrap();
        assert_eq!(route.node_id, "r1");
        assert!(!route.fell_back);
    }

    #[test]
    fn test_bounded_falls_back_to_the_primary_observably() {
        let (registry, router) = router();
        registry.record_lag("r1", 50);
        registry.record_lag("r2", 200);

        let route = router
            .route(ConsistencyLevel::Bounded { max_lag_millis: 10 })
            .unwrap();
        assert_eq!(route.node_id, "p1");
        assert!(route.fell_back);
    }

    #[test]
    fn test_bounded_ignores_replicas_with_unknown_lag() {
        let (_registry, router) = router();

        // No replica has a measured lag yet.
        let route = router
            .route(ConsistencyLevel::Bounded {
                max_lag_millis: 1000,
            })
            .unwrap();
        assert_eq!(route.node_id, "p1");
        assert!(route.fell_back);
    }

    #[test]
    fn test_bounded_fails_when_even_the_fallback_is_gone() {
        let (registry, router) = router();
        registry.apply_probe("p1", NodeStatus::Offline, None, None);

        let err = router
            .route(ConsistencyLevel::Bounded { max_lag_millis: 10 })
            .unwrap_err();
        assert!(matches!(err, ReplicationError::NoPrimary));
    }

    #[tokio::test]
    async fn test_query_executes_on_the_routed_node() {
        let (_registry, router) = router();

        let outcome = router
            .query("select * from todos", &[], ConsistencyLevel::Strong)
            .await
            .unwrap();
        assert_eq!(outcome.route.node_id, "p1");
        assert_eq!(outcome.rows["node"], "p1");
        assert_eq!(outcome.rows["query"], "select * from todos");
    }
}
