//! Catalog facade
//!
//! Owns one node store, its edge store and the deletion orchestrator, and
//! exposes the operation set callers use. A catalog is `Send + Sync`; share
//! it between threads behind an `Arc`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cascade::{DeletedNode, DeletionOrchestrator, PurgeReport};
use crate::clock::{Clock, SystemClock};
use crate::config::{CapacityLimits, CatalogConfig};
use crate::error::CapacityClass;
use crate::lineage::{Association, AssociationSpec, AssociationType, Node, NodeId, NodeKind, NodeSpec};
use crate::storage::CatalogSnapshot;
use crate::store::{AssociationFilter, EdgeStore, NodeCursor, NodeQuery, NodeStore};
use crate::traversal::{Direction, LineageReport, TraversalEngine};
use crate::Result;

/// Counts of everything in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogStats {
    /// Live nodes per kind, in [`NodeKind::ALL`] order.
    pub nodes_by_kind: Vec<(NodeKind, usize)>,
    /// Live manual entities per capacity class, with the configured ceiling.
    pub manual_usage: Vec<(CapacityClass, usize, usize)>,
    /// Live associations, manual and automatic.
    pub associations: usize,
}

impl CatalogStats {
    /// Total number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes_by_kind.iter().map(|(_, count)| count).sum()
    }
}

/// In-memory lineage catalog.
#[derive(Debug)]
pub struct Catalog {
    config: CatalogConfig,
    nodes: Arc<NodeStore>,
    edges: Arc<EdgeStore>,
    orchestrator: DeletionOrchestrator,
}

impl Catalog {
    /// Create a new catalog builder
    #[must_use]
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Configuration the catalog was built with.
    #[must_use]
    pub const fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Underlying node store.
    #[must_use]
    pub const fn node_store(&self) -> &Arc<NodeStore> {
        &self.nodes
    }

    /// Underlying edge store.
    #[must_use]
    pub const fn edge_store(&self) -> &Arc<EdgeStore> {
        &self.edges
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Create a node.
    ///
    /// # Errors
    ///
    /// `Error::CapacityExceeded` or `Error::DuplicateName` for manual nodes.
    pub fn create_node(&self, spec: NodeSpec) -> Result<Node> {
        self.nodes.create_node(spec)
    }

    /// Get a node by id.
    ///
    /// # Errors
    ///
    /// `Error::NodeNotFound` if the id does not resolve.
    pub fn get_node(&self, id: NodeId) -> Result<Node> {
        self.nodes.get_node(id)
    }

    /// List nodes lazily.
    #[must_use]
    pub fn list_nodes(&self, query: NodeQuery) -> NodeCursor<'_> {
        self.nodes.list_nodes(query)
    }

    /// Nodes pointing at the external object `uri`, oldest first.
    #[must_use]
    pub fn find_by_source_uri(&self, uri: &str) -> Vec<Node> {
        self.nodes.find_by_source_uri(uri)
    }

    /// Set and remove node properties.
    ///
    /// # Errors
    ///
    /// `Error::NodeNotFound` if the id does not resolve.
    pub fn update_properties(
        &self,
        id: NodeId,
        set: BTreeMap<String, String>,
        remove: &[&str],
    ) -> Result<Node> {
        self.nodes.update_properties(id, set, remove)
    }

    /// Delete a node that has no associations.
    ///
    /// # Errors
    ///
    /// `Error::NodeNotFound` or `Error::HasDependentEdges`.
    pub fn delete_node(&self, id: NodeId) -> Result<Node> {
        self.edges.detach_node(id)
    }

    // ------------------------------------------------------------------
    // Associations
    // ------------------------------------------------------------------

    /// Create (or retype) a manual association `source -> destination`.
    ///
    /// # Errors
    ///
    /// `Error::DanglingEndpoint`, `Error::InvalidExperimentLink` or
    /// `Error::CapacityExceeded`.
    pub fn create_association(
        &self,
        source_id: NodeId,
        destination_id: NodeId,
        association_type: AssociationType,
    ) -> Result<Association> {
        self.edges.create_association(
            AssociationSpec::new(source_id, destination_id).association_type(association_type),
        )
    }

    /// Create (or retype) an association from a full spec.
    ///
    /// # Errors
    ///
    /// Same as [`Catalog::create_association`].
    pub fn create_association_with(&self, spec: AssociationSpec) -> Result<Association> {
        self.edges.create_association(spec)
    }

    /// Get the association for an ordered pair.
    ///
    /// # Errors
    ///
    /// `Error::AssociationNotFound` if there is none.
    pub fn get_association(&self, source_id: NodeId, destination_id: NodeId) -> Result<Association> {
        self.edges.get_association(source_id, destination_id)
    }

    /// Associations leaving `source_id`.
    #[must_use]
    pub fn list_associations_by_source(&self, source_id: NodeId) -> Vec<Association> {
        self.edges.list_by_source(source_id)
    }

    /// Associations entering `destination_id`.
    #[must_use]
    pub fn list_associations_by_destination(&self, destination_id: NodeId) -> Vec<Association> {
        self.edges.list_by_destination(destination_id)
    }

    /// Associations matching `filter`.
    #[must_use]
    pub fn list_associations(&self, filter: AssociationFilter) -> Vec<Association> {
        self.edges.list_associations(filter)
    }

    /// Delete the association for an ordered pair.
    ///
    /// # Errors
    ///
    /// `Error::AssociationNotFound` if there is none.
    pub fn delete_association(&self, source_id: NodeId, destination_id: NodeId) -> Result<Association> {
        self.edges.delete_association(source_id, destination_id)
    }

    // ------------------------------------------------------------------
    // Traversal and deletion
    // ------------------------------------------------------------------

    /// Breadth-first lineage walk from `start`.
    ///
    /// # Errors
    ///
    /// `Error::NodeNotFound` if `start` does not resolve.
    pub fn traverse_lineage(
        &self,
        start: NodeId,
        direction: Direction,
        max_depth: Option<usize>,
    ) -> Result<LineageReport> {
        TraversalEngine::new(&self.nodes, &self.edges).traverse(start, direction, max_depth)
    }

    /// Delete a node and every association touching it.
    ///
    /// # Errors
    ///
    /// `Error::NodeNotFound` if the node does not exist.
    pub fn delete_node_cascade(&self, id: NodeId) -> Result<DeletedNode> {
        self.orchestrator.delete_node_cascade(id)
    }

    /// Remove every node and association.
    ///
    /// # Errors
    ///
    /// Propagates any cascade failure other than "already gone".
    pub fn purge_catalog(&self) -> Result<PurgeReport> {
        self.orchestrator.purge_catalog()
    }

    // ------------------------------------------------------------------
    // Introspection and persistence
    // ------------------------------------------------------------------

    /// Current counts.
    #[must_use]
    pub fn stats(&self) -> CatalogStats {
        let limits = self.nodes.limits();
        let manual_usage = [
            CapacityClass::Artifacts,
            CapacityClass::Actions,
            CapacityClass::Contexts,
        ]
        .into_iter()
        .map(|class| (class, self.nodes.manual_count(class), limits.limit(class)))
        .chain(std::iter::once((
            CapacityClass::Associations,
            self.edges.manual_count(),
            limits.associations,
        )))
        .collect();

        CatalogStats {
            nodes_by_kind: self.nodes.count_by_kind(),
            manual_usage,
            associations: self.edges.len(),
        }
    }

    /// Consistent copy of every node and association.
    #[must_use]
    pub fn snapshot(&self) -> CatalogSnapshot {
        let (nodes, associations) = self.edges.snapshot();
        CatalogSnapshot::new(nodes, associations)
    }

    /// Write a snapshot to `dir` as Parquet tables.
    ///
    /// # Errors
    ///
    /// Propagates IO and Parquet failures.
    pub fn save_snapshot<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let snapshot = self.snapshot();
        snapshot.write_parquet(dir.as_ref())?;
        info!(
            dir = %dir.as_ref().display(),
            nodes = snapshot.nodes().len(),
            associations = snapshot.associations().len(),
            "saved catalog snapshot"
        );
        Ok(())
    }

    /// Build a catalog with `builder` and load the snapshot in `dir` into it.
    ///
    /// Indexes are rebuilt from the association table alone.
    ///
    /// # Errors
    ///
    /// Propagates IO and Parquet failures; `Error::Storage` if the snapshot
    /// violates an integrity rule.
    pub fn open_snapshot<P: AsRef<Path>>(dir: P, builder: CatalogBuilder) -> Result<Self> {
        let snapshot = CatalogSnapshot::load_parquet(dir.as_ref())?;
        let catalog = builder.build()?;
        catalog.restore(snapshot)?;
        info!(dir = %dir.as_ref().display(), "opened catalog snapshot");
        Ok(catalog)
    }

    /// Load `snapshot` into this catalog.
    ///
    /// The snapshot is applied whole or not at all: on error the catalog
    /// is left exactly as it was.
    ///
    /// # Errors
    ///
    /// `Error::Storage` if an id or manual name collides with existing
    /// content or within the snapshot, an association breaks an integrity
    /// rule, or an id or sequence number is out of range.
    pub fn restore(&self, snapshot: CatalogSnapshot) -> Result<()> {
        let (nodes, associations) = snapshot.into_parts();
        let (node_count, association_count) = (nodes.len(), associations.len());
        self.edges.restore(nodes, associations)?;
        debug!(nodes = node_count, associations = association_count, "restored snapshot");
        Ok(())
    }
}

/// Catalog builder
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    config: CatalogConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl CatalogBuilder {
    /// Use a full configuration.
    #[must_use]
    pub fn config(mut self, config: CatalogConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the manual entity ceilings.
    #[must_use]
    pub const fn limits(mut self, limits: CapacityLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Use `clock` for creation timestamps instead of the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the catalog
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid
    pub fn build(self) -> Result<Catalog> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let nodes = Arc::new(NodeStore::new(self.config.limits, clock));
        let edges = Arc::new(EdgeStore::new(Arc::clone(&nodes)));
        let orchestrator = DeletionOrchestrator::new(Arc::clone(&nodes), Arc::clone(&edges));

        info!(limits = ?self.config.limits, "lineage catalog ready");
        Ok(Catalog {
            config: self.config,
            nodes,
            edges,
            orchestrator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_builder_rejects_zero_limit() {
        let err = Catalog::builder()
            .limits(CapacityLimits {
                associations: 0,
                ..CapacityLimits::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_stats() {
        let catalog = Catalog::builder().build().unwrap();
        let a = catalog.create_node(NodeSpec::artifact("a")).unwrap();
        let b = catalog.create_node(NodeSpec::action("b")).unwrap();
        catalog
            .create_node(NodeSpec::artifact("auto").automatic())
            .unwrap();
        catalog
            .create_association(a.id(), b.id(), AssociationType::ContributedTo)
            .unwrap();

        let stats = catalog.stats();
        assert_eq!(stats.node_count(), 3);
        assert_eq!(stats.associations, 1);
        assert!(stats
            .manual_usage
            .contains(&(CapacityClass::Artifacts, 1, 6000)));
        assert!(stats
            .manual_usage
            .contains(&(CapacityClass::Associations, 1, 6000)));
        assert!(stats.nodes_by_kind.contains(&(NodeKind::Artifact, 2)));
    }

    #[test]
    fn test_delete_node_refuses_with_edges() {
        let catalog = Catalog::builder().build().unwrap();
        let a = catalog.create_node(NodeSpec::artifact("a")).unwrap();
        let b = catalog.create_node(NodeSpec::artifact("b")).unwrap();
        catalog
            .create_association(a.id(), b.id(), AssociationType::DerivedFrom)
            .unwrap();

        assert!(matches!(
            catalog.delete_node(a.id()),
            Err(Error::HasDependentEdges { .. })
        ));
        catalog.delete_association(a.id(), b.id()).unwrap();
        catalog.delete_node(a.id()).unwrap();
        assert!(catalog.get_node(a.id()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_restore_rejects_sequence_at_counter_limit() {
        let source = Catalog::builder().build().unwrap();
        let a = source.create_node(NodeSpec::artifact("a")).unwrap();
        let b = source.create_node(NodeSpec::action("b")).unwrap();
        let edge = Association::new(
            a.id(),
            b.id(),
            AssociationType::ContributedTo,
            a.created_at(),
            crate::lineage::Origin::Manual,
            u64::MAX,
        );
        let snapshot = CatalogSnapshot::new(vec![a, b], vec![edge]);

        let target = Catalog::builder().build().unwrap();
        let err = target.restore(snapshot).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(target.stats().node_count(), 0);
        assert_eq!(target.stats().associations, 0);
    }
}
