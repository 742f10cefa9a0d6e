//! Deletion orchestration
//!
//! A cascade removes every association touching a node and then the node
//! itself. Cascades on the same node are serialised by a per-node mutex, so
//! two callers cannot both enumerate and delete the same associations; there
//! is no catalog-wide lock.
//!
//! Association deletion inside a cascade is idempotent: an association that
//! a neighbour's cascade already removed counts as done.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::lineage::{Node, NodeId};
use crate::store::{EdgeStore, NodeQuery, NodeStore};
use crate::{Error, Result};

/// Outcome of a single cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedNode {
    node: Node,
    associations_removed: usize,
}

impl DeletedNode {
    /// The node that was removed.
    #[must_use]
    pub const fn node(&self) -> &Node {
        &self.node
    }

    /// Associations this cascade removed itself.
    #[must_use]
    pub const fn associations_removed(&self) -> usize {
        self.associations_removed
    }
}

/// Outcome of [`DeletionOrchestrator::purge_catalog`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Nodes deleted by this purge.
    pub nodes_deleted: usize,
    /// Associations deleted by this purge.
    pub associations_removed: usize,
}

/// Coordinates cascading deletes over a node store and its edge store.
#[derive(Debug)]
pub struct DeletionOrchestrator {
    nodes: Arc<NodeStore>,
    edges: Arc<EdgeStore>,
    locks: DashMap<NodeId, Arc<Mutex<()>>>,
}

impl DeletionOrchestrator {
    /// Orchestrator over `nodes` and `edges`.
    #[must_use]
    pub fn new(nodes: Arc<NodeStore>, edges: Arc<EdgeStore>) -> Self {
        Self {
            nodes,
            edges,
            locks: DashMap::new(),
        }
    }

    fn node_lock(&self, id: NodeId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id).or_default().value())
    }

    /// Drop the per-node mutex once nobody else holds a handle to it.
    fn release_lock(&self, id: NodeId) {
        self.locks
            .remove_if(&id, |_, lock| Arc::strong_count(lock) <= 2);
    }

    /// Delete `id` together with every association touching it.
    ///
    /// # Errors
    ///
    /// Returns `Error::NodeNotFound` if the node does not exist, in which
    /// case no association is touched.
    pub fn delete_node_cascade(&self, id: NodeId) -> Result<DeletedNode> {
        let lock = self.node_lock(id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.cascade_locked(id)
        };
        self.release_lock(id);
        drop(lock);
        result
    }

    fn cascade_locked(&self, id: NodeId) -> Result<DeletedNode> {
        if !self.nodes.contains(id) {
            return Err(Error::NodeNotFound(id));
        }

        let mut associations_removed = 0;
        loop {
            let mut touching = self.edges.list_by_source(id);
            touching.extend(self.edges.list_by_destination(id));

            for edge in touching {
                match self
                    .edges
                    .delete_association(edge.source_id(), edge.destination_id())
                {
                    Ok(_) => associations_removed += 1,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }

            match self.edges.detach_node(id) {
                Ok(node) => {
                    debug!(%id, associations_removed, "cascade complete");
                    return Ok(DeletedNode {
                        node,
                        associations_removed,
                    });
                }
                // Someone attached a new association after we enumerated
                Err(Error::HasDependentEdges { .. }) => {
                    debug!(%id, "associations added during cascade, repeating");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Cascade-delete every node present when the purge starts.
    ///
    /// Nodes removed concurrently by someone else are skipped. Running a
    /// purge on an empty catalog is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first error other than "not found" raised by a cascade.
    pub fn purge_catalog(&self) -> Result<PurgeReport> {
        let ids = self.nodes.list_nodes(NodeQuery::new()).ids().to_vec();
        info!(nodes = ids.len(), "purging catalog");

        let outcomes = self.cascade_all(&ids);

        let mut report = PurgeReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(deleted) => {
                    report.nodes_deleted += 1;
                    report.associations_removed += deleted.associations_removed();
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        info!(
            nodes_deleted = report.nodes_deleted,
            associations_removed = report.associations_removed,
            "catalog purged"
        );
        Ok(report)
    }

    #[cfg(feature = "rayon")]
    fn cascade_all(&self, ids: &[NodeId]) -> Vec<Result<DeletedNode>> {
        use rayon::prelude::*;

        ids.par_iter()
            .map(|&id| self.delete_node_cascade(id))
            .collect()
    }

    #[cfg(not(feature = "rayon"))]
    fn cascade_all(&self, ids: &[NodeId]) -> Vec<Result<DeletedNode>> {
        ids.iter().map(|&id| self.delete_node_cascade(id)).collect()
    }
}
