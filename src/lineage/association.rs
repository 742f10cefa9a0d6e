//! Association records - directed, typed edges between nodes

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NodeId, Origin};
use crate::{Error, Result};

/// Relationship carried by an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AssociationType {
    /// Source produced the destination (action -> output artifact).
    Produced,
    /// Source was derived from the destination.
    DerivedFrom,
    /// Loose grouping, typically context -> entity.
    AssociatedWith,
    /// Source fed into the destination (input artifact -> action).
    #[default]
    ContributedTo,
}

impl AssociationType {
    /// Every association type, in storage order.
    pub const ALL: [Self; 4] = [
        Self::Produced,
        Self::DerivedFrom,
        Self::AssociatedWith,
        Self::ContributedTo,
    ];

    /// Stable label used in snapshots.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Produced => "Produced",
            Self::DerivedFrom => "DerivedFrom",
            Self::AssociatedWith => "AssociatedWith",
            Self::ContributedTo => "ContributedTo",
        }
    }
}

impl fmt::Display for AssociationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AssociationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| Error::Storage(format!("unknown association type '{s}'")))
    }
}

/// A directed association `source -> destination`.
///
/// The `(source, destination)` pair identifies an association; `sequence`
/// orders associations by creation and breaks ties during traversal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Association {
    source_id: NodeId,
    destination_id: NodeId,
    association_type: AssociationType,
    created_at: DateTime<Utc>,
    origin: Origin,
    sequence: u64,
}

impl Association {
    pub(crate) const fn new(
        source_id: NodeId,
        destination_id: NodeId,
        association_type: AssociationType,
        created_at: DateTime<Utc>,
        origin: Origin,
        sequence: u64,
    ) -> Self {
        Self {
            source_id,
            destination_id,
            association_type,
            created_at,
            origin,
            sequence,
        }
    }

    /// Get the source node id.
    #[must_use]
    pub const fn source_id(&self) -> NodeId {
        self.source_id
    }

    /// Get the destination node id.
    #[must_use]
    pub const fn destination_id(&self) -> NodeId {
        self.destination_id
    }

    /// Get the association type.
    #[must_use]
    pub const fn association_type(&self) -> AssociationType {
        self.association_type
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the origin of the association.
    #[must_use]
    pub const fn origin(&self) -> Origin {
        self.origin
    }

    /// Get the creation sequence number.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether the association touches `id` at either end.
    #[must_use]
    pub fn touches(&self, id: NodeId) -> bool {
        self.source_id == id || self.destination_id == id
    }

    /// The endpoint opposite to `id`.
    #[must_use]
    pub fn other_end(&self, id: NodeId) -> NodeId {
        if self.source_id == id {
            self.destination_id
        } else {
            self.source_id
        }
    }

    pub(crate) fn set_association_type(&mut self, association_type: AssociationType) {
        self.association_type = association_type;
    }
}

/// Everything a caller supplies to create an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationSpec {
    source_id: NodeId,
    destination_id: NodeId,
    association_type: AssociationType,
    origin: Origin,
}

impl AssociationSpec {
    /// Create a spec using the default association type.
    #[must_use]
    pub fn new(source_id: NodeId, destination_id: NodeId) -> Self {
        Self {
            source_id,
            destination_id,
            association_type: AssociationType::default(),
            origin: Origin::Manual,
        }
    }

    /// Set the association type.
    #[must_use]
    pub const fn association_type(mut self, association_type: AssociationType) -> Self {
        self.association_type = association_type;
        self
    }

    /// Mark the association as created by the platform.
    #[must_use]
    pub const fn automatic(mut self) -> Self {
        self.origin = Origin::Automatic;
        self
    }

    /// Source node id.
    #[must_use]
    pub const fn source_id(&self) -> NodeId {
        self.source_id
    }

    /// Destination node id.
    #[must_use]
    pub const fn destination_id(&self) -> NodeId {
        self.destination_id
    }

    /// Requested association type.
    #[must_use]
    pub const fn kind(&self) -> AssociationType {
        self.association_type
    }

    /// Origin of the association this spec creates.
    #[must_use]
    pub const fn origin(&self) -> Origin {
        self.origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_association_type() {
        let spec = AssociationSpec::new(NodeId::new(1), NodeId::new(2));
        assert_eq!(spec.kind(), AssociationType::ContributedTo);
        assert_eq!(spec.origin(), Origin::Manual);
    }

    #[test]
    fn test_other_end() {
        let edge = Association::new(
            NodeId::new(1),
            NodeId::new(2),
            AssociationType::Produced,
            Utc::now(),
            Origin::Manual,
            0,
        );
        assert_eq!(edge.other_end(NodeId::new(1)), NodeId::new(2));
        assert_eq!(edge.other_end(NodeId::new(2)), NodeId::new(1));
        assert!(edge.touches(NodeId::new(2)));
        assert!(!edge.touches(NodeId::new(3)));
    }

    #[test]
    fn test_association_type_labels() {
        for ty in AssociationType::ALL {
            assert_eq!(ty.as_str().parse::<AssociationType>().unwrap(), ty);
        }
        assert!("Consumed".parse::<AssociationType>().is_err());
    }
}
