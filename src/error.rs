//! Error types for the lineage catalog
//!
//! Every operation returns these to the caller; nothing is retried or
//! swallowed inside the catalog.

use thiserror::Error;

use crate::lineage::{NodeId, NodeKind};

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Which ceiling an operation ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapacityClass {
    /// Manually created artifacts
    Artifacts,
    /// Manually created actions
    Actions,
    /// Manually created contexts
    Contexts,
    /// Manually created associations
    Associations,
}

impl std::fmt::Display for CapacityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Artifacts => "artifacts",
            Self::Actions => "actions",
            Self::Contexts => "contexts",
            Self::Associations => "associations",
        };
        f.write_str(label)
    }
}

/// Lineage catalog error types
#[derive(Error, Debug)]
pub enum Error {
    /// Node reference does not resolve
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// Association reference does not resolve
    #[error("association {source_id} -> {destination_id} not found")]
    AssociationNotFound {
        /// Source endpoint of the missing association
        source_id: NodeId,
        /// Destination endpoint of the missing association
        destination_id: NodeId,
    },

    /// Manual entity name collision within a kind
    #[error("a manually created {kind} named '{name}' already exists\nPick a different name or update the existing node's properties")]
    DuplicateName {
        /// Kind of the colliding node
        kind: NodeKind,
        /// Colliding name
        name: String,
    },

    /// Manual ceiling reached
    #[error("capacity exceeded: at most {limit} manually created {class} allowed\nDelete unused entries or register them as automatic entities")]
    CapacityExceeded {
        /// Counter that is full
        class: CapacityClass,
        /// Configured ceiling
        limit: usize,
    },

    /// Association creation references a nonexistent node
    #[error("association endpoint {0} does not exist")]
    DanglingEndpoint(NodeId),

    /// Association would connect two experiment entities
    #[error("cannot associate experiment entities {source_id} and {destination_id}\nExperiments, trials and trial components are linked through their own hierarchy")]
    InvalidExperimentLink {
        /// Source experiment entity
        source_id: NodeId,
        /// Destination experiment entity
        destination_id: NodeId,
    },

    /// Direct delete attempted on a node with live associations
    #[error("node {id} still has {edges} association(s)\nUse delete_node_cascade() to remove them together with the node")]
    HasDependentEdges {
        /// Node that was not deleted
        id: NodeId,
        /// Number of associations still touching it
        edges: usize,
    },

    /// Invalid catalog configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Snapshot storage error (Parquet/Arrow layout)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Property encoding error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl Error {
    /// Whether this error reports a reference that no longer resolves.
    ///
    /// Bulk cleanup uses this to treat already-removed entries as success.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NodeNotFound(_) | Self::AssociationNotFound { .. }
        )
    }
}
