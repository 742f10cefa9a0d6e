//! Lineage traversal
//!
//! Breadth-first walk over the association indexes starting from one node.
//! The graph is not assumed to be acyclic: a visited set seeded with the
//! start node guarantees every node is reported at most once and that the
//! walk terminates.
//!
//! Traversal never takes a lock across the whole walk. Associations added or
//! removed concurrently may or may not be observed; a neighbour that
//! disappears between reading an adjacency list and resolving the node is
//! dropped from the report.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use tracing::trace;

use crate::lineage::{Association, Node, NodeId};
use crate::store::{EdgeStore, NodeStore};
use crate::Result;

/// Which associations a traversal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow incoming associations (upstream inputs).
    Ancestors,
    /// Follow outgoing associations (downstream outputs).
    Descendants,
    /// Follow both, at every hop.
    Both,
}

/// Direction in which the discovering association was walked.
///
/// This describes the last hop only. Under [`Direction::Both`] a node tagged
/// `Ancestor` need not be upstream of the start node (a sibling input is
/// reached backwards through a shared action); use [`Direction::Ancestors`]
/// or [`Direction::Descendants`] for strict upstream or downstream sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineageSide {
    /// Reached by walking an association backwards.
    Ancestor,
    /// Reached by walking an association forwards.
    Descendant,
}

/// One discovered node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageEntry {
    node: Node,
    depth: usize,
    edge: Association,
    side: LineageSide,
}

impl LineageEntry {
    /// The discovered node.
    #[must_use]
    pub const fn node(&self) -> &Node {
        &self.node
    }

    /// Number of hops from the start node.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Association the node was first discovered through.
    #[must_use]
    pub const fn edge(&self) -> &Association {
        &self.edge
    }

    /// Whether the discovering association was walked backwards or forwards.
    #[must_use]
    pub const fn side(&self) -> LineageSide {
        self.side
    }
}

/// Result of [`TraversalEngine::traverse`]: entries in first-discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageReport {
    start: NodeId,
    direction: Direction,
    entries: Vec<LineageEntry>,
}

impl LineageReport {
    /// Node the walk started from (never part of `entries`).
    #[must_use]
    pub const fn start(&self) -> NodeId {
        self.start
    }

    /// Direction the walk followed.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Discovered nodes in BFS order.
    #[must_use]
    pub fn entries(&self) -> &[LineageEntry] {
        &self.entries
    }

    /// Entries whose discovering association was walked backwards.
    ///
    /// Equals the upstream set only for [`Direction::Ancestors`] walks; see
    /// [`LineageSide`].
    pub fn ancestors(&self) -> impl Iterator<Item = &LineageEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.side == LineageSide::Ancestor)
    }

    /// Entries whose discovering association was walked forwards.
    ///
    /// Equals the downstream set only for [`Direction::Descendants`] walks;
    /// see [`LineageSide`].
    pub fn descendants(&self) -> impl Iterator<Item = &LineageEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.side == LineageSide::Descendant)
    }

    /// Entries exactly `depth` hops from the start.
    pub fn at_depth(&self, depth: usize) -> impl Iterator<Item = &LineageEntry> {
        self.entries.iter().filter(move |entry| entry.depth == depth)
    }

    /// Entry for `id`, if it was discovered.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&LineageEntry> {
        self.entries.iter().find(|entry| entry.node.id() == id)
    }

    /// Whether `id` was discovered.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Number of discovered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-only walker over a node store and its edge store.
#[derive(Debug, Clone, Copy)]
pub struct TraversalEngine<'a> {
    nodes: &'a NodeStore,
    edges: &'a EdgeStore,
}

impl<'a> TraversalEngine<'a> {
    /// Walker over `nodes` and `edges`.
    #[must_use]
    pub const fn new(nodes: &'a NodeStore, edges: &'a EdgeStore) -> Self {
        Self { nodes, edges }
    }

    /// Associations to follow out of `id`, in creation order.
    fn adjacent(&self, id: NodeId, direction: Direction) -> Vec<(Association, LineageSide)> {
        let outgoing = || {
            self.edges
                .list_by_source(id)
                .into_iter()
                .map(|edge| (edge, LineageSide::Descendant))
        };
        let incoming = || {
            self.edges
                .list_by_destination(id)
                .into_iter()
                .map(|edge| (edge, LineageSide::Ancestor))
        };

        match direction {
            Direction::Descendants => outgoing().collect(),
            Direction::Ancestors => incoming().collect(),
            Direction::Both => {
                let mut both: Vec<_> = outgoing().chain(incoming()).collect();
                both.sort_by_key(|(edge, _)| edge.sequence());
                both
            }
        }
    }

    /// Walk from `start`.
    ///
    /// `max_depth` bounds the number of hops; `None` explores until the
    /// frontier is exhausted and `Some(0)` yields an empty report.
    ///
    /// # Errors
    ///
    /// Returns `Error::NodeNotFound` if `start` does not resolve.
    pub fn traverse(
        &self,
        start: NodeId,
        direction: Direction,
        max_depth: Option<usize>,
    ) -> Result<LineageReport> {
        self.nodes.get_node(start)?;

        let mut visited = FxHashSet::default();
        visited.insert(start);
        let mut frontier = VecDeque::from([(start, 0usize)]);
        let mut entries = Vec::new();

        while let Some((current, depth)) = frontier.pop_front() {
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }

            for (edge, side) in self.adjacent(current, direction) {
                let next = match side {
                    LineageSide::Descendant => edge.destination_id(),
                    LineageSide::Ancestor => edge.source_id(),
                };
                if !visited.insert(next) {
                    continue;
                }
                let Ok(node) = self.nodes.get_node(next) else {
                    trace!(%next, "dropping association to a concurrently deleted node");
                    continue;
                };

                entries.push(LineageEntry {
                    node,
                    depth: depth + 1,
                    edge,
                    side,
                });
                frontier.push_back((next, depth + 1));
            }
        }

        Ok(LineageReport {
            start,
            direction,
            entries,
        })
    }
}
