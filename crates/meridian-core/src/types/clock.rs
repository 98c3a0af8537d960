//! Vector clock
//!
//! Maps each source node to the highest version counter observed from it.
//! Maintained globally by the version tracker rather than attached to every
//! event; the comparison operations exist for callers that snapshot clocks
//! at emission time and want a true concurrency test instead of the
//! wall-clock window heuristic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::node::NodeId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    clocks: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for a node; zero if the node has never been observed.
    pub fn get(&self, node: &str) -> u64 {
        self.clocks.get(node).copied().unwrap_or(0)
    }

    /// Advance a node's counter to `version` if it is newer. Returns true
    /// when the clock advanced.
    pub fn record(&mut self, node: &str, version: u64) -> bool {
        let current = self.get(node);
        if version > current {
            self.clocks.insert(node.to_string(), version);
            true
        } else {
            false
        }
    }

    /// Increment a node's counter by one and return the new value.
    pub fn increment(&mut self, node: &str) -> u64 {
        let next = self.get(node) + 1;
        self.clocks.insert(node.to_string(), next);
        next
    }

    /// Take the element-wise maximum of the two clocks.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, &version) in &other.clocks {
            let entry = self.clocks.entry(node.clone()).or_insert(0);
            if version > *entry {
                *entry = version;
            }
        }
    }

    /// True if every counter in `self` is ≤ the counterpart in `other`
    /// and at least one is strictly less. Missing entries count as zero.
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        let mut strictly_less = false;
        for (node, &version) in &self.clocks {
            let theirs = other.get(node);
            if version > theirs {
                return false;
            }
            if version < theirs {
                strictly_less = true;
            }
        }
        if !strictly_less {
            strictly_less = other
                .clocks
                .iter()
                .any(|(node, &v)| v > 0 && !self.clocks.contains_key(node));
        }
        strictly_less
    }

    /// Neither clock happens before the other and they are not equal.
    pub fn concurrent_with(&self, other: &VectorClock) -> bool {
        self != other && !self.happens_before(other) && !other.happens_before(self)
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &u64)> {
        self.clocks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_is_monotonic() {
        let mut clock = VectorClock::new();
        assert!(clock.record("a", 3));
        assert!(!clock.record("a", 2));
        assert!(!clock.record("a", 3));
        assert!(clock.record("a", 4));
        assert_eq!(clock.get("a"), 4);
    }

    #[test]
    fn test_happens_before() {
        let mut earlier = VectorClock::new();
        earlier.record("a", 1);

        let mut later = VectorClock::new();
        later.record("a", 2);
        later.record("b", 1);

        assert!(earlier.happens_before(&later));
        assert!(!later.happens_before(&earlier));
    }

    #[test]
    fn test_happens_before_with_unseen_node() {
        let mut base = VectorClock::new();
        base.record("a", 1);

        let mut extended = base.clone();
        extended.record("b", 1);

        assert!(base.happens_before(&extended));
        assert!(!extended.happens_before(&base));
    }

    #[test]
    fn test_concurrent() {
        let mut left = VectorClock::new();
        left.record("a", 2);
        left.record("b", 1);

        let mut right = VectorClock::new();
        right.record("a", 1);
        right.record("b", 2);

        assert!(left.concurrent_with(&right));
        assert!(right.concurrent_with(&left));

        let same = left.clone();
        assert!(!left.concurrent_with(&same));
    }

    #[test]
    fn test_merge_takes_maximum() {
        let mut left = VectorClock::new();
        left.record("a", 2);
        left.record("b", 1);

        let mut right = VectorClock::new();
        right.record("a", 1);
        right.record("c", 5);

        left.merge(&right);
        assert_eq!(left.get("a"), 2);
        assert_eq!(left.get("b"), 1);
        assert_eq!(left.get("c"), 5);
    }
}
