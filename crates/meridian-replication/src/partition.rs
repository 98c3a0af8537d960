//! Key partitioning
//!
//! Maps a (table, key) pair onto the placement that owns it. Partitioners
//! are pure functions of the key and the node set passed in, so ownership
//! is evaluated fresh against the current membership on every dispatch
//! and never cached across membership changes.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use meridian_core::types::{PartitionScheme, Placement, RangeBound, ReplicationNode};

/// Placement policy for replicated keys
pub trait KeyPartitioner: Send + Sync {
    /// Resolve the owning placement for a key, or None when the scheme
    /// cannot place it with the given nodes.
    fn placement(&self, table: &str, key: &str, nodes: &[ReplicationNode]) -> Option<Placement>;

    fn name(&self) -> &'static str;
}

/// Build the partitioner for a configured scheme.
pub fn build_partitioner(scheme: &PartitionScheme) -> Box<dyn KeyPartitioner> {
    match scheme {
        PartitionScheme::Hash { replica_count } => Box::new(HashPartitioner::new(*replica_count)),
        PartitionScheme::Range { bounds } => Box::new(RangePartitioner::new(bounds.clone())),
        PartitionScheme::List { tables } => Box::new(ListPartitioner::new(tables.clone())),
        PartitionScheme::Geo {
            table_regions,
            replica_count,
        } => Box::new(GeoPartitioner::new(table_regions.clone(), *replica_count)),
    }
}

/// Spreads keys over all nodes by hashing (table, key)
pub struct HashPartitioner {
    replica_count: usize,
}

impl HashPartitioner {
    pub fn new(replica_count: usize) -> Self {
        Self { replica_count }
    }
}

impl KeyPartitioner for HashPartitioner {
    fn placement(&self, table: &str, key: &str, nodes: &[ReplicationNode]) -> Option<Placement> {
        if nodes.is_empty() {
            return None;
        }
        let mut ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        ids.sort_unstable();

        let slot = (hash_key(table, key) % ids.len() as u64) as usize;
        let mut replicas = Vec::new();
        for offset in 1..ids.len() {
            if replicas.len() == self.replica_count {
                break;
            }
            replicas.push(ids[(slot + offset) % ids.len()].to_string());
        }
        Some(Placement {
            primary: ids[slot].to_string(),
            replicas,
        })
    }

    fn name(&self) -> &'static str {
        "hash"
    }
}

/// Assigns keys to placements by lexicographic upper bounds
pub struct RangePartitioner {
    bounds: Vec<RangeBound>,
}

impl RangePartitioner {
    pub fn new(bounds: Vec<RangeBound>) -> Self {
        Self { bounds }
    }
}

impl KeyPartitioner for RangePartitioner {
    fn placement(&self, _table: &str, key: &str, _nodes: &[ReplicationNode]) -> Option<Placement> {
        // First bound whose upper is open or still above the key wins.
        self.bounds
            .iter()
            .find(|bound| bound.upper.as_deref().map_or(true, |upper| key < upper))
            .map(|bound| bound.placement.clone())
    }

    fn name(&self) -> &'static str {
        "range"
    }
}

/// Pins whole tables to explicit placements
pub struct ListPartitioner {
    tables: HashMap<String, Placement>,
}

impl ListPartitioner {
    pub fn new(tables: HashMap<String, Placement>) -> Self {
        Self { tables }
    }
}

impl KeyPartitioner for ListPartitioner {
    fn placement(&self, table: &str, _key: &str, _nodes: &[ReplicationNode]) -> Option<Placement> {
        self.tables.get(table).cloned()
    }

    fn name(&self) -> &'static str {
        "list"
    }
}

/// Keeps each table's writes inside its home region
pub struct GeoPartitioner {
    table_regions: HashMap<String, String>,
    replica_count: usize,
}

impl GeoPartitioner {
    pub fn new(table_regions: HashMap<String, String>, replica_count: usize) -> Self {
        Self {
            table_regions,
            replica_count,
        }
    }
}

impl KeyPartitioner for GeoPartitioner {
    fn placement(&self, table: &str, _key: &str, nodes: &[ReplicationNode]) -> Option<Placement> {
        let region = self.table_regions.get(table)?;
        let mut local: Vec<&ReplicationNode> =
            nodes.iter().filter(|n| n.region == *region).collect();
        if local.is_empty() {
            return None;
        }
        local.sort_by(|a, b| a.id.cmp(&b.id));

        let primary = local
            .iter()
            .find(|n| n.is_primary())
            .copied()
            .unwrap_or(local[0]);
        let replicas = local
            .iter()
            .filter(|n| n.id != primary.id)
            .take(self.replica_count)
            .map(|n| n.id.clone())
            .collect();
        Some(Placement {
            primary: primary.id.clone(),
            replicas,
        })
    }

    fn name(&self) -> &'static str {
        "geo"
    }
}

fn hash_key(table: &str, key: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(table.as_bytes());
    hasher.update(b":");
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::types::NodeRole;

    fn node(id: &str, region: &str, role: NodeRole) -> ReplicationNode {
        ReplicationNode::new(id, region, role, format!("http://{}:9000", id))
    }

    fn cluster() -> Vec<ReplicationNode> {
        vec![
            node("n1", "us-east", NodeRole::Primary),
            node("n2", "us-east", NodeRole::Replica),
            node("n3", "eu-west", NodeRole::Replica),
            node("n4", "eu-west", NodeRole::Primary),
        ]
    }

    #[test]
    fn test_hash_is_deterministic_and_stays_within_the_node_set() {
        let partitioner = HashPartitioner::new(2);
        let nodes = cluster();

        let first = partitioner.placement("todos", "t1", &nodes).unwrap();
        let second = partitioner.placement("todos", "t1", &nodes).unwrap();
        assert_eq!(first.primary, second.primary);
        assert_eq!(first.replicas, second.replicas);

        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&first.primary.as_str()));
        for replica in &first.replicas {
            assert!(ids.contains(&replica.as_str()));
            assert_ne!(replica, &first.primary);
        }
        assert_eq!(first.replicas.len(), 2);
    }

    #[test]
    fn test_hash_replica_count_is_capped_by_cluster_size() {
        let partitioner = HashPartitioner::new(10);
        let nodes = cluster();

        let placement = partitioner.placement("todos", "t1", &nodes).unwrap();
        assert_eq!(placement.replicas.len(), 3);
        assert!(partitioner.placement("todos", "t1", &[]).is_none());
    }

    #[test]
    fn test_hash_spreads_distinct_keys() {
        let partitioner = HashPartitioner::new(1);
        let nodes = cluster();

        let primaries: std::collections::HashSet<String> = (0..32)
            .map(|i| {
                partitioner
                    .placement("todos", &format!("key-{}", i), &nodes)
                    .unwrap()
                    .primary
            })
            .collect();
        assert!(primaries.len() > 1);
    }

    #[test]
    fn test_range_picks_first_matching_bound() {
        let partitioner = RangePartitioner::new(vec![
            RangeBound {
                upper: Some("m".to_string()),
                placement: Placement {
                    primary: "n1".to_string(),
                    replicas: vec!["n2".to_string()],
                },
            },
            RangeBound {
                upper: None,
                placement: Placement {
                    primary: "n3".to_string(),
                    replicas: vec![],
                },
            },
        ]);

        let low = partitioner.placement("todos", "apple", &[]).unwrap();
        assert_eq!(low.primary, "n1");
        let high = partitioner.placement("todos", "zebra", &[]).unwrap();
        assert_eq!(high.primary, "n3");
    }

    #[test]
    fn test_range_without_catch_all_can_miss() {
        let partitioner = RangePartitioner::new(vec![RangeBound {
            upper: Some("m".to_string()),
            placement: Placement {
                primary: "n1".to_string(),
                replicas: vec![],
            },
        }]);

        assert!(partitioner.placement("todos", "zebra", &[]).is_none());
    }

    #[test]
    fn test_list_places_only_mapped_tables() {
        let mut tables = HashMap::new();
        tables.insert(
            "todos".to_string(),
            Placement {
                primary: "n1".to_string(),
                replicas: vec!["n2".to_string()],
            },
        );
        let partitioner = ListPartitioner::new(tables);

        assert_eq!(
            partitioner.placement("todos", "t1", &[]).unwrap().primary,
            "n1"
        );
        assert!(partitioner.placement("users", "u1", &[]).is_none());
    }

    #[test]
    fn test_geo_prefers_the_regional_primary() {
        let mut table_regions = HashMap::new();
        table_regions.insert("todos".to_string(), "eu-west".to_string());
        let partitioner = GeoPartitioner::new(table_regions, 2);
        let nodes = cluster();

        let placement = partitioner.placement("todos", "t1", &nodes).unwrap();
        assert_eq!(placement.primary, "n4");
        assert_eq!(placement.replicas, vec!["n3".to_string()]);
    }

    #[test]
    fn test_geo_misses_unmapped_tables_and_empty_regions() {
        let mut table_regions = HashMap::new();
        table_regions.insert("todos".to_string(), "ap-south".to_string());
        let partitioner = GeoPartitioner::new(table_regions, 1);

        assert!(partitioner.placement("todos", "t1", &cluster()).is_none());
        assert!(partitioner.placement("users", "u1", &cluster()).is_none());
    }

    #[test]
    fn test_factory_builds_each_scheme() {
        let schemes = [
            PartitionScheme::Hash { replica_count: 2 },
            PartitionScheme::Range { bounds: vec![] },
            PartitionScheme::List {
                tables: HashMap::new(),
            },
            PartitionScheme::Geo {
                table_regions: HashMap::new(),
                replica_count: 1,
            },
        ];
        let names: Vec<&str> = schemes
            .iter()
            .map(|s| build_partitioner(s).name())
            .collect();
        assert_eq!(names, vec!["hash", "range", "list", "geo"]);
    }
}
