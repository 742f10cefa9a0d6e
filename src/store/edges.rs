//! Edge Store - directed associations with forward and reverse indexes
//!
//! Both indexes sit behind a single `RwLock`, so an association is either
//! visible in both or in neither. Endpoint checks run under the same write
//! lock that node detachment takes, which keeps every stored association
//! pointing at live nodes.
//!
//! Adjacency lists are kept in creation-sequence order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use super::NodeStore;
use crate::error::CapacityClass;
use crate::lineage::{Association, AssociationSpec, AssociationType, Node, NodeId, NodeKind};
use crate::{Error, Result};

#[derive(Debug, Default)]
struct Indexes {
    forward: FxHashMap<NodeId, Vec<Association>>,
    reverse: FxHashMap<NodeId, Vec<Association>>,
    total: usize,
    manual: usize,
}

impl Indexes {
    fn find(&self, source_id: NodeId, destination_id: NodeId) -> Option<&Association> {
        self.forward
            .get(&source_id)?
            .iter()
            .find(|edge| edge.destination_id() == destination_id)
    }

    fn insert(&mut self, edge: Association) {
        if edge.origin().is_manual() {
            self.manual += 1;
        }
        self.total += 1;
        self.reverse
            .entry(edge.destination_id())
            .or_default()
            .push(edge.clone());
        self.forward.entry(edge.source_id()).or_default().push(edge);
    }

    fn retype(
        &mut self,
        source_id: NodeId,
        destination_id: NodeId,
        association_type: AssociationType,
    ) -> Option<Association> {
        let forward = self
            .forward
            .get_mut(&source_id)?
            .iter_mut()
            .find(|edge| edge.destination_id() == destination_id)?;
        forward.set_association_type(association_type);
        let updated = forward.clone();

        if let Some(reverse) = self
            .reverse
            .get_mut(&destination_id)
            .and_then(|edges| edges.iter_mut().find(|edge| edge.source_id() == source_id))
        {
            reverse.set_association_type(association_type);
        }
        Some(updated)
    }

    fn remove(&mut self, source_id: NodeId, destination_id: NodeId) -> Option<Association> {
        let removed = take_matching(&mut self.forward, source_id, |edge| {
            edge.destination_id() == destination_id
        })?;
        take_matching(&mut self.reverse, destination_id, |edge| {
            edge.source_id() == source_id
        });

        if removed.origin().is_manual() {
            self.manual -= 1;
        }
        self.total -= 1;
        Some(removed)
    }

    /// Associations touching `id`; a self-loop counts once.
    fn degree(&self, id: NodeId) -> usize {
        let outgoing = self.forward.get(&id).map_or(0, Vec::len);
        let incoming = self.reverse.get(&id).map_or(0, |edges| {
            edges.iter().filter(|edge| edge.source_id() != id).count()
        });
        outgoing + incoming
    }
}

/// Remove the first edge in `index[key]` matching `predicate`, dropping the
/// list once it is empty.
fn take_matching(
    index: &mut FxHashMap<NodeId, Vec<Association>>,
    key: NodeId,
    predicate: impl Fn(&Association) -> bool,
) -> Option<Association> {
    let edges = index.get_mut(&key)?;
    let position = edges.iter().position(predicate)?;
    let removed = edges.remove(position);
    if edges.is_empty() {
        index.remove(&key);
    }
    Some(removed)
}

/// Endpoint and experiment-link rule for `source_id -> destination_id`,
/// resolving kinds through `kind_of`.
fn check_link(
    source_id: NodeId,
    destination_id: NodeId,
    kind_of: impl Fn(NodeId) -> Option<NodeKind>,
) -> Result<()> {
    let source_kind = kind_of(source_id).ok_or(Error::DanglingEndpoint(source_id))?;
    let destination_kind =
        kind_of(destination_id).ok_or(Error::DanglingEndpoint(destination_id))?;

    if source_kind.is_experiment_entity() && destination_kind.is_experiment_entity() {
        return Err(Error::InvalidExperimentLink {
            source_id,
            destination_id,
        });
    }
    Ok(())
}

/// Filter for [`EdgeStore::list_associations`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssociationFilter {
    source_id: Option<NodeId>,
    destination_id: Option<NodeId>,
    association_type: Option<AssociationType>,
}

impl AssociationFilter {
    /// Match every association.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only associations leaving `id`.
    #[must_use]
    pub const fn source(mut self, id: NodeId) -> Self {
        self.source_id = Some(id);
        self
    }

    /// Only associations entering `id`.
    #[must_use]
    pub const fn destination(mut self, id: NodeId) -> Self {
        self.destination_id = Some(id);
        self
    }

    /// Only associations of this type.
    #[must_use]
    pub const fn association_type(mut self, association_type: AssociationType) -> Self {
        self.association_type = Some(association_type);
        self
    }

    fn matches(&self, edge: &Association) -> bool {
        self.source_id.map_or(true, |id| edge.source_id() == id)
            && self
                .destination_id
                .map_or(true, |id| edge.destination_id() == id)
            && self
                .association_type
                .map_or(true, |ty| edge.association_type() == ty)
    }
}

/// Concurrent table of associations.
#[derive(Debug)]
pub struct EdgeStore {
    nodes: Arc<NodeStore>,
    indexes: RwLock<Indexes>,
    next_sequence: AtomicU64,
}

impl EdgeStore {
    /// Create an empty edge store over `nodes`.
    #[must_use]
    pub fn new(nodes: Arc<NodeStore>) -> Self {
        Self {
            nodes,
            indexes: RwLock::new(Indexes::default()),
            next_sequence: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Indexes> {
        self.indexes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indexes> {
        self.indexes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Node store this edge store validates endpoints against.
    #[must_use]
    pub const fn nodes(&self) -> &Arc<NodeStore> {
        &self.nodes
    }

    /// Check endpoints and the experiment-link rule.
    fn validate(&self, source_id: NodeId, destination_id: NodeId) -> Result<()> {
        check_link(source_id, destination_id, |id| self.nodes.kind_of(id))
    }

    /// Create an association, or retype the existing one for the same pair.
    ///
    /// A second association between the same ordered pair replaces the type
    /// of the first and keeps its origin, timestamp and sequence; it does
    /// not consume capacity.
    ///
    /// # Errors
    ///
    /// Returns `Error::DanglingEndpoint` if either endpoint is unknown,
    /// `Error::InvalidExperimentLink` if both are experiment entities and
    /// `Error::CapacityExceeded` if the manual association ceiling is full.
    pub fn create_association(&self, spec: AssociationSpec) -> Result<Association> {
        let source_id = spec.source_id();
        let destination_id = spec.destination_id();

        let mut indexes = self.write();
        self.validate(source_id, destination_id)?;

        if let Some(updated) = indexes.retype(source_id, destination_id, spec.kind()) {
            debug!(%source_id, %destination_id, association_type = %spec.kind(), "updated association");
            return Ok(updated);
        }

        if spec.origin().is_manual() {
            let limit = self.nodes.limits().associations;
            if indexes.manual >= limit {
                warn!(limit, "manual association ceiling reached");
                return Err(Error::CapacityExceeded {
                    class: CapacityClass::Associations,
                    limit,
                });
            }
        }

        let edge = Association::new(
            source_id,
            destination_id,
            spec.kind(),
            self.nodes.clock().now(),
            spec.origin(),
            self.next_sequence.fetch_add(1, Ordering::Relaxed),
        );
        indexes.insert(edge.clone());

        debug!(%source_id, %destination_id, association_type = %edge.association_type(), "created association");
        Ok(edge)
    }

    /// Look up the association for an ordered pair.
    ///
    /// # Errors
    ///
    /// Returns `Error::AssociationNotFound` if there is none.
    pub fn get_association(&self, source_id: NodeId, destination_id: NodeId) -> Result<Association> {
        self.read()
            .find(source_id, destination_id)
            .cloned()
            .ok_or(Error::AssociationNotFound {
                source_id,
                destination_id,
            })
    }

    /// Associations leaving `source_id`, in creation order.
    #[must_use]
    pub fn list_by_source(&self, source_id: NodeId) -> Vec<Association> {
        self.read()
            .forward
            .get(&source_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Associations entering `destination_id`, in creation order.
    #[must_use]
    pub fn list_by_destination(&self, destination_id: NodeId) -> Vec<Association> {
        self.read()
            .reverse
            .get(&destination_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Associations matching `filter`, in creation order.
    #[must_use]
    pub fn list_associations(&self, filter: AssociationFilter) -> Vec<Association> {
        let indexes = self.read();
        let mut edges: Vec<Association> = match (filter.source_id, filter.destination_id) {
            (Some(source_id), _) => indexes
                .forward
                .get(&source_id)
                .map(|edges| edges.iter().filter(|e| filter.matches(e)).cloned().collect())
                .unwrap_or_default(),
            (None, Some(destination_id)) => indexes
                .reverse
                .get(&destination_id)
                .map(|edges| edges.iter().filter(|e| filter.matches(e)).cloned().collect())
                .unwrap_or_default(),
            (None, None) => indexes
                .forward
                .values()
                .flatten()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect(),
        };
        drop(indexes);

        edges.sort_by_key(Association::sequence);
        edges
    }

    /// Delete the association for an ordered pair from both indexes.
    ///
    /// # Errors
    ///
    /// Returns `Error::AssociationNotFound` if there is none.
    pub fn delete_association(&self, source_id: NodeId, destination_id: NodeId) -> Result<Association> {
        let removed = self
            .write()
            .remove(source_id, destination_id)
            .ok_or(Error::AssociationNotFound {
                source_id,
                destination_id,
            })?;
        debug!(%source_id, %destination_id, "deleted association");
        Ok(removed)
    }

    /// Number of associations touching `id` in either direction.
    #[must_use]
    pub fn degree(&self, id: NodeId) -> usize {
        self.read().degree(id)
    }

    /// Delete a node that no association references.
    ///
    /// The degree check and the removal happen under the index write lock,
    /// so no association can be attached in between.
    ///
    /// # Errors
    ///
    /// Returns `Error::HasDependentEdges` if associations still touch the
    /// node, `Error::NodeNotFound` if it does not exist.
    pub fn detach_node(&self, id: NodeId) -> Result<Node> {
        let indexes = self.write();
        if !self.nodes.contains(id) {
            return Err(Error::NodeNotFound(id));
        }
        let edges = indexes.degree(id);
        if edges > 0 {
            return Err(Error::HasDependentEdges { id, edges });
        }
        self.nodes.remove(id)
    }

    /// Consistent copy of every node and association.
    ///
    /// Holds the index read lock throughout, so no association can be added
    /// and no node detached while the copy is taken.
    #[must_use]
    pub fn snapshot(&self) -> (Vec<Node>, Vec<Association>) {
        let indexes = self.read();
        let mut edges: Vec<Association> = indexes.forward.values().flatten().cloned().collect();
        let nodes: Vec<Node> = self.nodes.list_nodes(super::NodeQuery::new()).collect();
        drop(indexes);

        edges.sort_by_key(Association::sequence);
        (nodes, edges)
    }

    /// Load persisted nodes and associations.
    ///
    /// Every association is checked against the union of live and incoming
    /// nodes, and the node batch is checked by [`NodeStore::restore`], before
    /// anything is written. The index write lock is held throughout, so no
    /// live endpoint can be detached in between. A rejected snapshot leaves
    /// both stores untouched.
    pub(crate) fn restore(&self, nodes: Vec<Node>, mut edges: Vec<Association>) -> Result<()> {
        let mut indexes = self.write();

        let incoming: FxHashMap<NodeId, NodeKind> =
            nodes.iter().map(|node| (node.id(), node.kind())).collect();
        let mut pairs = FxHashSet::default();
        let mut next_sequence = self.next_sequence.load(Ordering::Relaxed);
        for edge in &edges {
            let (source_id, destination_id) = (edge.source_id(), edge.destination_id());
            check_link(source_id, destination_id, |id| {
                incoming.get(&id).copied().or_else(|| self.nodes.kind_of(id))
            })
            .map_err(|e| Error::Storage(format!("invalid association in snapshot: {e}")))?;

            if indexes.find(source_id, destination_id).is_some()
                || !pairs.insert((source_id, destination_id))
            {
                return Err(Error::Storage(format!(
                    "duplicate association {source_id} -> {destination_id} in snapshot"
                )));
            }
            let after = edge.sequence().checked_add(1).ok_or_else(|| {
                Error::Storage(format!("association sequence {} out of range", edge.sequence()))
            })?;
            next_sequence = next_sequence.max(after);
        }

        self.nodes.restore(nodes)?;

        self.next_sequence.fetch_max(next_sequence, Ordering::Relaxed);
        edges.sort_by_key(Association::sequence);
        for edge in edges {
            indexes.insert(edge);
        }
        Ok(())
    }

    /// Number of manual associations currently stored.
    #[must_use]
    pub fn manual_count(&self) -> usize {
        self.read().manual
    }

    /// Number of associations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().total
    }

    /// Whether there are no associations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::CapacityLimits;
    use crate::lineage::{ExperimentTag, NodeSpec};

    fn stores(limits: CapacityLimits) -> EdgeStore {
        EdgeStore::new(Arc::new(NodeStore::new(limits, Arc::new(SystemClock))))
    }

    fn node(edges: &EdgeStore, spec: NodeSpec) -> NodeId {
        edges.nodes().create_node(spec).unwrap().id()
    }

    #[test]
    fn test_indexes_agree() {
        let edges = stores(CapacityLimits::default());
        let a = node(&edges, NodeSpec::artifact("a"));
        let b = node(&edges, NodeSpec::action("b"));

        let edge = edges
            .create_association(AssociationSpec::new(a, b))
            .unwrap();
        assert_eq!(edges.list_by_source(a), vec![edge.clone()]);
        assert_eq!(edges.list_by_destination(b), vec![edge]);
        assert!(edges.list_by_source(b).is_empty());
        assert_eq!(edges.degree(a), 1);
    }

    #[test]
    fn test_dangling_endpoint() {
        let edges = stores(CapacityLimits::default());
        let a = node(&edges, NodeSpec::artifact("a"));
        let ghost = NodeId::new(404);

        assert!(matches!(
            edges.create_association(AssociationSpec::new(a, ghost)),
            Err(Error::DanglingEndpoint(id)) if id == ghost
        ));
        assert!(matches!(
            edges.create_association(AssociationSpec::new(ghost, a)),
            Err(Error::DanglingEndpoint(id)) if id == ghost
        ));
        assert!(edges.is_empty());
    }

    #[test]
    fn test_experiment_link_rejected() {
        let edges = stores(CapacityLimits::default());
        let exp = node(
            &edges,
            NodeSpec::experiment_entity(ExperimentTag::Experiment, "exp"),
        );
        let trial = node(&edges, NodeSpec::experiment_entity(ExperimentTag::Trial, "t"));
        let data = node(&edges, NodeSpec::artifact("data"));

        for ty in AssociationType::ALL {
            let err = edges
                .create_association(AssociationSpec::new(exp, trial).association_type(ty))
                .unwrap_err();
            assert!(matches!(err, Error::InvalidExperimentLink { .. }));
        }
        // Mixed links are fine
        edges
            .create_association(AssociationSpec::new(data, trial))
            .unwrap();
    }

    #[test]
    fn test_duplicate_pair_upserts() {
        let edges = stores(CapacityLimits::default());
        let a = node(&edges, NodeSpec::action("a"));
        let b = node(&edges, NodeSpec::artifact("b"));

        let first = edges.create_association(AssociationSpec::new(a, b)).unwrap();
        let second = edges
            .create_association(AssociationSpec::new(a, b).association_type(AssociationType::Produced))
            .unwrap();

        assert_eq!(edges.len(), 1);
        assert_eq!(second.sequence(), first.sequence());
        assert_eq!(
            edges.list_by_destination(b)[0].association_type(),
            AssociationType::Produced
        );
        assert_eq!(
            edges.get_association(a, b).unwrap().association_type(),
            AssociationType::Produced
        );
    }

    #[test]
    fn test_association_ceiling() {
        let limits = CapacityLimits {
            associations: 1,
            ..CapacityLimits::default()
        };
        let edges = stores(limits);
        let a = node(&edges, NodeSpec::artifact("a"));
        let b = node(&edges, NodeSpec::artifact("b"));
        let c = node(&edges, NodeSpec::artifact("c"));

        edges.create_association(AssociationSpec::new(a, b)).unwrap();
        assert!(matches!(
            edges.create_association(AssociationSpec::new(a, c)),
            Err(Error::CapacityExceeded {
                class: CapacityClass::Associations,
                limit: 1
            })
        ));
        edges
            .create_association(AssociationSpec::new(a, c).automatic())
            .unwrap();
        assert_eq!(edges.manual_count(), 1);
        assert_eq!(edges.len(), 2);
    }

    #[test]
    fn test_delete_association() {
        let edges = stores(CapacityLimits::default());
        let a = node(&edges, NodeSpec::artifact("a"));
        let b = node(&edges, NodeSpec::artifact("b"));
        edges.create_association(AssociationSpec::new(a, b)).unwrap();

        edges.delete_association(a, b).unwrap();
        assert!(edges.list_by_source(a).is_empty());
        assert!(edges.list_by_destination(b).is_empty());
        assert!(edges.delete_association(a, b).unwrap_err().is_not_found());
    }

    #[test]
    fn test_detach_requires_zero_degree() {
        let edges = stores(CapacityLimits::default());
        let a = node(&edges, NodeSpec::artifact("a"));
        let b = node(&edges, NodeSpec::artifact("b"));
        edges.create_association(AssociationSpec::new(a, b)).unwrap();

        assert!(matches!(
            edges.detach_node(b),
            Err(Error::HasDependentEdges { edges: 1, .. })
        ));
        edges.delete_association(a, b).unwrap();
        edges.detach_node(b).unwrap();
        assert!(matches!(edges.detach_node(b), Err(Error::NodeNotFound(_))));
    }

    #[test]
    fn test_list_associations_filter() {
        let edges = stores(CapacityLimits::default());
        let ctx = node(&edges, NodeSpec::context("ctx"));
        let job = node(&edges, NodeSpec::action("job"));
        let model = node(&edges, NodeSpec::artifact("model"));

        edges
            .create_association(
                AssociationSpec::new(ctx, job).association_type(AssociationType::AssociatedWith),
            )
            .unwrap();
        edges
            .create_association(AssociationSpec::new(job, model).association_type(AssociationType::Produced))
            .unwrap();

        let produced = edges.list_associations(
            AssociationFilter::new().association_type(AssociationType::Produced),
        );
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].destination_id(), model);

        let into_job = edges.list_associations(AssociationFilter::new().destination(job));
        assert_eq!(into_job.len(), 1);
        assert_eq!(edges.list_associations(AssociationFilter::new()).len(), 2);
    }

    #[test]
    fn test_self_loop() {
        let edges = stores(CapacityLimits::default());
        let a = node(&edges, NodeSpec::action("a"));
        edges.create_association(AssociationSpec::new(a, a)).unwrap();
        assert_eq!(edges.degree(a), 1);
        assert!(matches!(
            edges.detach_node(a),
            Err(Error::HasDependentEdges { edges: 1, .. })
        ));
        edges.delete_association(a, a).unwrap();
        assert_eq!(edges.degree(a), 0);
        assert!(edges.is_empty());
    }
}
