//! Node Store - typed entities keyed by id
//!
//! Nodes live in a `DashMap` so reads never contend with each other. Every
//! creation, deletion and restore passes through a small registry mutex that
//! owns the per-kind counters and the name index; the capacity check, name
//! check and insertion happen while it is held, so concurrent callers cannot
//! overshoot a ceiling or claim an id a restore is about to insert.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use super::{NodeQuery, SortBy, SortOrder};
use crate::clock::Clock;
use crate::config::CapacityLimits;
use crate::error::CapacityClass;
use crate::lineage::{Node, NodeId, NodeKind, NodeSpec};
use crate::{Error, Result};

/// Counters and name index for manually created nodes.
#[derive(Debug, Default)]
struct ManualRegistry {
    counts: FxHashMap<CapacityClass, usize>,
    names: FxHashMap<(NodeKind, String), NodeId>,
}

impl ManualRegistry {
    fn count(&self, class: CapacityClass) -> usize {
        self.counts.get(&class).copied().unwrap_or(0)
    }

    /// Reject `spec` if it would break a ceiling or collide by name.
    fn admit(&self, spec: &NodeSpec, limits: &CapacityLimits) -> Result<()> {
        if let Some(class) = spec.kind().capacity_class() {
            let limit = limits.limit(class);
            if self.count(class) >= limit {
                warn!(%class, limit, "manual node ceiling reached");
                return Err(Error::CapacityExceeded { class, limit });
            }
        }
        if self
            .names
            .contains_key(&(spec.kind(), spec.name().to_string()))
        {
            return Err(Error::DuplicateName {
                kind: spec.kind(),
                name: spec.name().to_string(),
            });
        }
        Ok(())
    }

    fn record(&mut self, node: &Node) {
        if let Some(class) = node.kind().capacity_class() {
            *self.counts.entry(class).or_insert(0) += 1;
        }
        self.names
            .insert((node.kind(), node.name().to_string()), node.id());
    }

    fn release(&mut self, node: &Node) {
        if let Some(class) = node.kind().capacity_class() {
            if let Some(count) = self.counts.get_mut(&class) {
                *count = count.saturating_sub(1);
            }
        }
        let key = (node.kind(), node.name().to_string());
        if self.names.get(&key) == Some(&node.id()) {
            self.names.remove(&key);
        }
    }
}

/// Concurrent table of lineage nodes.
#[derive(Debug)]
pub struct NodeStore {
    nodes: DashMap<NodeId, Node>,
    registry: Mutex<ManualRegistry>,
    next_id: AtomicU64,
    limits: CapacityLimits,
    clock: Arc<dyn Clock>,
}

impl NodeStore {
    /// Create an empty store with the given ceilings and timestamp source.
    #[must_use]
    pub fn new(limits: CapacityLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes: DashMap::new(),
            registry: Mutex::new(ManualRegistry::default()),
            next_id: AtomicU64::new(1),
            limits,
            clock,
        }
    }

    fn registry(&self) -> MutexGuard<'_, ManualRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate(&self, spec: NodeSpec) -> Node {
        let id = NodeId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        Node::from_spec(id, spec, self.clock.now())
    }

    /// Create a node from `spec`.
    ///
    /// Manual nodes are checked against the per-kind ceiling and the name
    /// index before anything is written. Automatic nodes skip both checks.
    ///
    /// # Errors
    ///
    /// Returns `Error::CapacityExceeded` or `Error::DuplicateName` for a
    /// manual node that would break a ceiling or reuse a name.
    pub fn create_node(&self, spec: NodeSpec) -> Result<Node> {
        let mut registry = self.registry();
        let node = if spec.origin().is_manual() {
            registry.admit(&spec, &self.limits)?;
            let node = self.allocate(spec);
            registry.record(&node);
            node
        } else {
            self.allocate(spec)
        };
        self.nodes.insert(node.id(), node.clone());
        drop(registry);

        debug!(id = %node.id(), kind = %node.kind(), name = node.name(), "created node");
        Ok(node)
    }

    /// Get a node by id.
    ///
    /// # Errors
    ///
    /// Returns `Error::NodeNotFound` if the id does not resolve.
    pub fn get_node(&self, id: NodeId) -> Result<Node> {
        self.nodes
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::NodeNotFound(id))
    }

    /// Whether `id` resolves to a live node.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Kind of the node with `id`, if it exists.
    #[must_use]
    pub fn kind_of(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&id).map(|entry| entry.kind())
    }

    /// Set and remove properties on an existing node.
    ///
    /// Removals are applied after insertions, so a key present in both ends
    /// up absent.
    ///
    /// # Errors
    ///
    /// Returns `Error::NodeNotFound` if the id does not resolve.
    pub fn update_properties(
        &self,
        id: NodeId,
        set: BTreeMap<String, String>,
        remove: &[&str],
    ) -> Result<Node> {
        let mut entry = self.nodes.get_mut(&id).ok_or(Error::NodeNotFound(id))?;
        let properties = entry.properties_mut();
        properties.extend(set);
        for key in remove {
            properties.remove(*key);
        }
        Ok(entry.value().clone())
    }

    /// List nodes matching `query` as a lazy, restartable cursor.
    ///
    /// The set of matching ids and their order is fixed when the cursor is
    /// created; node records are fetched as the cursor advances, so nodes
    /// deleted in the meantime are skipped.
    #[must_use]
    pub fn list_nodes(&self, query: NodeQuery) -> NodeCursor<'_> {
        let mut keys: Vec<(DateTime<Utc>, NodeId)> = self
            .nodes
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| match query.field() {
                SortBy::CreationTime => (entry.created_at(), entry.id()),
            })
            .collect();

        keys.sort_unstable();
        if query.order() == SortOrder::Descending {
            keys.reverse();
        }

        NodeCursor {
            store: self,
            ids: keys.into_iter().map(|(_, id)| id).collect(),
            position: 0,
        }
    }

    /// All nodes whose source URI equals `uri`, oldest first.
    #[must_use]
    pub fn find_by_source_uri(&self, uri: &str) -> Vec<Node> {
        let mut matches: Vec<Node> = self
            .nodes
            .iter()
            .filter(|entry| entry.source_uri() == Some(uri))
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by_key(|node| (node.created_at(), node.id()));
        matches
    }

    /// Remove a node without looking at associations.
    ///
    /// Callers must guarantee that no association references `id`.
    pub(crate) fn remove(&self, id: NodeId) -> Result<Node> {
        let mut registry = self.registry();
        let (_, node) = self.nodes.remove(&id).ok_or(Error::NodeNotFound(id))?;
        if node.origin().is_manual() {
            registry.release(&node);
        }
        debug!(%id, kind = %node.kind(), "deleted node");
        Ok(node)
    }

    /// Re-insert persisted nodes, keeping their ids and timestamps.
    ///
    /// The whole batch is checked before anything is written: ids must be
    /// new to the store and unique within the batch, and manual names must
    /// not collide with live manual nodes or with each other. A rejected
    /// batch leaves the store untouched.
    ///
    /// Ceilings are not enforced here; a snapshot taken under larger limits
    /// still loads, but further manual creations fail until enough nodes
    /// are deleted.
    pub(crate) fn restore(&self, nodes: Vec<Node>) -> Result<()> {
        let mut registry = self.registry();

        let mut ids = FxHashSet::default();
        let mut names = FxHashSet::default();
        let mut next_id = self.next_id.load(Ordering::Relaxed);
        for node in &nodes {
            let id = node.id();
            if self.nodes.contains_key(&id) || !ids.insert(id) {
                return Err(Error::Storage(format!("duplicate node id {id} in snapshot")));
            }
            let after = id
                .get()
                .checked_add(1)
                .ok_or_else(|| Error::Storage(format!("node id {id} out of range")))?;
            next_id = next_id.max(after);

            if node.origin().is_manual() {
                let key = (node.kind(), node.name().to_string());
                if registry.names.contains_key(&key) || !names.insert(key) {
                    return Err(Error::Storage(format!(
                        "duplicate manual {} name '{}' in snapshot",
                        node.kind(),
                        node.name()
                    )));
                }
            }
        }

        self.next_id.fetch_max(next_id, Ordering::Relaxed);
        for node in nodes {
            if node.origin().is_manual() {
                registry.record(&node);
            }
            self.nodes.insert(node.id(), node);
        }

        for class in [
            CapacityClass::Artifacts,
            CapacityClass::Actions,
            CapacityClass::Contexts,
        ] {
            let limit = self.limits.limit(class);
            if registry.count(class) > limit {
                warn!(%class, limit, "restored snapshot exceeds manual ceiling");
            }
        }
        Ok(())
    }

    /// Number of live manual nodes charged against `class`.
    #[must_use]
    pub fn manual_count(&self, class: CapacityClass) -> usize {
        self.registry().count(class)
    }

    /// Number of live nodes of each kind, in [`NodeKind::ALL`] order.
    #[must_use]
    pub fn count_by_kind(&self) -> Vec<(NodeKind, usize)> {
        let mut counts: FxHashMap<NodeKind, usize> = FxHashMap::default();
        for entry in &self.nodes {
            *counts.entry(entry.kind()).or_insert(0) += 1;
        }
        NodeKind::ALL
            .into_iter()
            .map(|kind| (kind, counts.get(&kind).copied().unwrap_or(0)))
            .collect()
    }

    /// Configured ceilings.
    #[must_use]
    pub const fn limits(&self) -> &CapacityLimits {
        &self.limits
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the store holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Lazy cursor over a node listing.
///
/// Iterating yields nodes in the listing order; [`NodeCursor::restart`]
/// rewinds it to the beginning without re-running the query.
#[derive(Debug)]
pub struct NodeCursor<'a> {
    store: &'a NodeStore,
    ids: Vec<NodeId>,
    position: usize,
}

impl NodeCursor<'_> {
    /// Rewind to the first node.
    pub fn restart(&mut self) {
        self.position = 0;
    }

    /// Ids captured when the listing was created.
    #[must_use]
    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }
}

impl Iterator for NodeCursor<'_> {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        while let Some(id) = self.ids.get(self.position).copied() {
            self.position += 1;
            if let Ok(node) = self.store.get_node(id) {
                return Some(node);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.ids.len() - self.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::lineage::ExperimentTag;

    fn store_with_limits(limits: CapacityLimits) -> NodeStore {
        NodeStore::new(limits, Arc::new(SystemClock))
    }

    #[test]
    fn test_create_and_get() {
        let store = store_with_limits(CapacityLimits::default());
        let node = store
            .create_node(NodeSpec::artifact("model").source_uri("s3://b/model.tar.gz"))
            .unwrap();

        assert_eq!(store.get_node(node.id()).unwrap(), node);
        assert_eq!(store.manual_count(CapacityClass::Artifacts), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_ids_are_unique_and_not_reused() {
        let store = store_with_limits(CapacityLimits::default());
        let first = store.create_node(NodeSpec::context("a")).unwrap();
        store.remove(first.id()).unwrap();
        let second = store.create_node(NodeSpec::context("a")).unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_capacity_ceiling() {
        let limits = CapacityLimits {
            contexts: 2,
            ..CapacityLimits::default()
        };
        let store = store_with_limits(limits);
        store.create_node(NodeSpec::context("c1")).unwrap();
        store.create_node(NodeSpec::context("c2")).unwrap();

        let err = store.create_node(NodeSpec::context("c3")).unwrap_err();
        assert!(matches!(
            err,
            Error::CapacityExceeded {
                class: CapacityClass::Contexts,
                limit: 2
            }
        ));
        // Rejection writes nothing
        assert_eq!(store.len(), 2);

        // Automatic contexts are not counted
        store
            .create_node(NodeSpec::context("c3").automatic())
            .unwrap();
        assert_eq!(store.manual_count(CapacityClass::Contexts), 2);
    }

    #[test]
    fn test_deleting_frees_capacity_and_name() {
        let limits = CapacityLimits {
            actions: 1,
            ..CapacityLimits::default()
        };
        let store = store_with_limits(limits);
        let action = store.create_node(NodeSpec::action("train")).unwrap();
        store.remove(action.id()).unwrap();
        store.create_node(NodeSpec::action("train")).unwrap();
    }

    #[test]
    fn test_duplicate_name_per_kind() {
        let store = store_with_limits(CapacityLimits::default());
        store.create_node(NodeSpec::artifact("shared")).unwrap();

        let err = store.create_node(NodeSpec::artifact("shared")).unwrap_err();
        assert!(matches!(err, Error::DuplicateName { kind: NodeKind::Artifact, .. }));

        // Same name, different kind
        store.create_node(NodeSpec::action("shared")).unwrap();
        // Automatic entities are exempt
        store
            .create_node(NodeSpec::artifact("shared").automatic())
            .unwrap();
    }

    #[test]
    fn test_experiment_entities_have_no_ceiling() {
        let limits = CapacityLimits {
            artifacts: 1,
            actions: 1,
            contexts: 1,
            associations: 1,
        };
        let store = store_with_limits(limits);
        for i in 0..10 {
            store
                .create_node(NodeSpec::experiment_entity(
                    ExperimentTag::Trial,
                    format!("trial-{i}"),
                ))
                .unwrap();
        }
        assert_eq!(store.len(), 10);
    }

    #[test]
    fn test_update_properties() {
        let store = store_with_limits(CapacityLimits::default());
        let node = store
            .create_node(NodeSpec::artifact("data").property("stage", "raw"))
            .unwrap();

        let mut set = BTreeMap::new();
        set.insert("stage".to_string(), "clean".to_string());
        set.insert("rows".to_string(), "1000".to_string());
        let updated = store.update_properties(node.id(), set, &["rows"]).unwrap();

        assert_eq!(updated.property("stage"), Some("clean"));
        assert_eq!(updated.property("rows"), None);
        assert_eq!(updated.created_at(), node.created_at());
        assert!(matches!(
            store.update_properties(NodeId::new(999), BTreeMap::new(), &[]),
            Err(Error::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_cursor_is_restartable_and_skips_deleted() {
        let store = store_with_limits(CapacityLimits::default());
        let a = store.create_node(NodeSpec::artifact("a")).unwrap();
        let b = store.create_node(NodeSpec::artifact("b")).unwrap();
        let c = store.create_node(NodeSpec::artifact("c")).unwrap();

        let mut cursor = store.list_nodes(NodeQuery::new());
        let first: Vec<NodeId> = cursor.by_ref().map(|n| n.id()).collect();
        assert_eq!(first, vec![a.id(), b.id(), c.id()]);

        store.remove(b.id()).unwrap();
        cursor.restart();
        let second: Vec<NodeId> = cursor.map(|n| n.id()).collect();
        assert_eq!(second, vec![a.id(), c.id()]);
    }

    #[test]
    fn test_find_by_source_uri() {
        let store = store_with_limits(CapacityLimits::default());
        let uri = "s3://bucket/abalone.csv";
        let a = store
            .create_node(NodeSpec::artifact("train").source_uri(uri))
            .unwrap();
        let b = store
            .create_node(NodeSpec::artifact("copy").source_uri(uri).automatic())
            .unwrap();
        store.create_node(NodeSpec::artifact("other")).unwrap();

        let ids: Vec<NodeId> = store.find_by_source_uri(uri).iter().map(Node::id).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }

    fn persisted(id: u64, spec: NodeSpec) -> Node {
        Node::from_spec(NodeId::new(id), spec, SystemClock.now())
    }

    #[test]
    fn test_restore_rejects_whole_batch() {
        let store = store_with_limits(CapacityLimits::default());
        let existing = store.create_node(NodeSpec::artifact("clash")).unwrap();

        let batch = vec![
            persisted(50, NodeSpec::artifact("fresh")),
            persisted(51, NodeSpec::artifact("clash")),
        ];
        let err = store.restore(batch).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        assert_eq!(store.len(), 1);
        assert_eq!(store.manual_count(CapacityClass::Artifacts), 1);
        assert!(!store.contains(NodeId::new(50)));
        // The id counter was not advanced by the rejected batch
        let next = store.create_node(NodeSpec::action("next")).unwrap();
        assert_eq!(next.id().get(), existing.id().get() + 1);
    }

    #[test]
    fn test_restore_rejects_duplicates_within_batch() {
        let store = store_with_limits(CapacityLimits::default());

        let same_id = vec![
            persisted(7, NodeSpec::artifact("a")),
            persisted(7, NodeSpec::artifact("b")),
        ];
        assert!(matches!(store.restore(same_id), Err(Error::Storage(_))));

        let same_name = vec![
            persisted(7, NodeSpec::context("ctx")),
            persisted(8, NodeSpec::context("ctx")),
        ];
        assert!(matches!(store.restore(same_name), Err(Error::Storage(_))));
        assert!(store.is_empty());

        // Automatic nodes may share names
        let automatic = vec![
            persisted(7, NodeSpec::context("ctx").automatic()),
            persisted(8, NodeSpec::context("ctx").automatic()),
        ];
        store.restore(automatic).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_restore_rejects_id_at_counter_limit() {
        let store = store_with_limits(CapacityLimits::default());
        let err = store
            .restore(vec![persisted(u64::MAX, NodeSpec::artifact("edge"))])
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_restore_resumes_ids_above_batch() {
        let store = store_with_limits(CapacityLimits::default());
        store
            .restore(vec![
                persisted(40, NodeSpec::artifact("a")),
                persisted(9, NodeSpec::artifact("b")),
            ])
            .unwrap();
        let fresh = store.create_node(NodeSpec::artifact("c")).unwrap();
        assert_eq!(fresh.id().get(), 41);
    }
}
