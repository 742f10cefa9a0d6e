//! Node and association stores
//!
//! ```text
//! NodeStore  (DashMap<NodeId, Node> + manual registry)
//!     ^
//!     │ endpoint checks
//! EdgeStore  (forward: source -> [Association], reverse: destination -> [Association])
//! ```
//!
//! The edge store owns a handle to the node store; the node store knows
//! nothing about associations.

mod edges;
mod nodes;

pub use edges::{AssociationFilter, EdgeStore};
pub use nodes::{NodeCursor, NodeStore};

use chrono::{DateTime, Utc};

use crate::lineage::{Node, NodeKind};

/// Sort order for node listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Oldest first
    #[default]
    Ascending,
    /// Newest first
    Descending,
}

/// Field node listings are sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// Creation timestamp, ties broken by id
    #[default]
    CreationTime,
}

/// Filters and ordering for [`NodeStore::list_nodes`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeQuery {
    kind: Option<NodeKind>,
    type_label: Option<String>,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
    sort_by: SortBy,
    sort_order: SortOrder,
}

impl NodeQuery {
    /// Every node, oldest first.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only nodes of `kind`.
    #[must_use]
    pub const fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Only nodes with this exact type label.
    #[must_use]
    pub fn type_label(mut self, type_label: impl Into<String>) -> Self {
        self.type_label = Some(type_label.into());
        self
    }

    /// Only nodes created strictly after `instant`.
    #[must_use]
    pub const fn created_after(mut self, instant: DateTime<Utc>) -> Self {
        self.created_after = Some(instant);
        self
    }

    /// Only nodes created strictly before `instant`.
    #[must_use]
    pub const fn created_before(mut self, instant: DateTime<Utc>) -> Self {
        self.created_before = Some(instant);
        self
    }

    /// Sort field.
    #[must_use]
    pub const fn sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    /// Sort direction.
    #[must_use]
    pub const fn sort_order(mut self, order: SortOrder) -> Self {
        self.sort_order = order;
        self
    }

    pub(crate) const fn order(&self) -> SortOrder {
        self.sort_order
    }

    pub(crate) const fn field(&self) -> SortBy {
        self.sort_by
    }

    pub(crate) fn matches(&self, node: &Node) -> bool {
        self.kind.map_or(true, |kind| node.kind() == kind)
            && self
                .type_label
                .as_deref()
                .map_or(true, |label| node.type_label() == label)
            && self
                .created_after
                .map_or(true, |after| node.created_at() > after)
            && self
                .created_before
                .map_or(true, |before| node.created_at() < before)
    }
}
