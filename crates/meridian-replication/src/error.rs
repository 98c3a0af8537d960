//! Replication error types

use thiserror::Error;

use meridian_core::types::NodeId;

/// Result type for replication operations
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Replication-related errors
#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node busy: {node_id} has {in_flight} in-flight sends")]
    NodeBusy { node_id: NodeId, in_flight: usize },

    #[error("Duplicate event: version {version} from {source_node_id} already seen")]
    DuplicateEvent { source_node_id: NodeId, version: u64 },

    #[error("Semi-sync dispatch got no acknowledgment within {timeout_millis}ms")]
    SemiSyncTimeout { timeout_millis: u64 },

    #[error("No custom resolver configured")]
    NoResolverConfigured,

    #[error("No active primary node")]
    NoPrimary,

    #[error("No nodes available to serve the query")]
    NoNodesAvailable,

    #[error("No query executor configured")]
    NoQueryExecutor,

    #[error("Dispatch to {node_id} failed: {reason}")]
    Dispatch { node_id: NodeId, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: String, got: String },

    #[error("Resolver error: {0}")]
    Resolver(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
