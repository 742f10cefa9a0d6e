//! Node records - the typed entities of the lineage graph

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CapacityClass;
use crate::{Error, Result};

/// Catalog-wide node identifier.
///
/// Ids are allocated from a monotonically increasing counter and are never
/// reused, not even after the node is deleted or the catalog is reloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Wrap a raw id value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Subtype of an experiment entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExperimentTag {
    /// Root of an experiment hierarchy.
    Experiment,
    /// One trial of an experiment.
    Trial,
    /// A step or job within a trial.
    TrialComponent,
}

/// Kind of a lineage node.
///
/// Capacity ceilings and the experiment-link rule both switch on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// URI-addressable object (dataset, model) consumed or produced by a step.
    Artifact,
    /// Computation, transformation or job.
    Action,
    /// Logical grouping of other entities.
    Context,
    /// Experiment, trial or trial component.
    ExperimentEntity(ExperimentTag),
}

impl NodeKind {
    /// Every kind, in storage order.
    pub const ALL: [Self; 6] = [
        Self::Artifact,
        Self::Action,
        Self::Context,
        Self::ExperimentEntity(ExperimentTag::Experiment),
        Self::ExperimentEntity(ExperimentTag::Trial),
        Self::ExperimentEntity(ExperimentTag::TrialComponent),
    ];

    /// Whether this is an experiment, trial or trial component.
    #[must_use]
    pub const fn is_experiment_entity(self) -> bool {
        matches!(self, Self::ExperimentEntity(_))
    }

    /// Counter that manual nodes of this kind are charged against.
    ///
    /// Experiment entities have no ceiling.
    #[must_use]
    pub const fn capacity_class(self) -> Option<CapacityClass> {
        match self {
            Self::Artifact => Some(CapacityClass::Artifacts),
            Self::Action => Some(CapacityClass::Actions),
            Self::Context => Some(CapacityClass::Contexts),
            Self::ExperimentEntity(_) => None,
        }
    }

    /// Stable label used in snapshots.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Artifact => "Artifact",
            Self::Action => "Action",
            Self::Context => "Context",
            Self::ExperimentEntity(ExperimentTag::Experiment) => "Experiment",
            Self::ExperimentEntity(ExperimentTag::Trial) => "Trial",
            Self::ExperimentEntity(ExperimentTag::TrialComponent) => "TrialComponent",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::Storage(format!("unknown node kind '{s}'")))
    }
}

/// Who created an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Origin {
    /// Created by a caller; counted against capacity and name-unique per kind.
    #[default]
    Manual,
    /// Created by the surrounding platform; exempt from both checks.
    Automatic,
}

impl Origin {
    /// Whether the entity is subject to capacity and uniqueness rules.
    #[must_use]
    pub const fn is_manual(self) -> bool {
        matches!(self, Self::Manual)
    }
}

/// A lineage node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    name: String,
    type_label: String,
    source_uri: Option<String>,
    properties: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    origin: Origin,
}

impl Node {
    pub(crate) fn from_spec(id: NodeId, spec: NodeSpec, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: spec.kind,
            name: spec.name,
            type_label: spec.type_label,
            source_uri: spec.source_uri,
            properties: spec.properties,
            created_at,
            origin: spec.origin,
        }
    }

    /// Get the node id.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node kind.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the free-form subtype label (e.g. "`ModelBuild`", "`TestData`").
    #[must_use]
    pub fn type_label(&self) -> &str {
        &self.type_label
    }

    /// Get the URI of the external object this node stands for, if any.
    #[must_use]
    pub fn source_uri(&self) -> Option<&str> {
        self.source_uri.as_deref()
    }

    /// Get the metadata properties.
    #[must_use]
    pub const fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Get a single property value.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the origin of the node.
    #[must_use]
    pub const fn origin(&self) -> Origin {
        self.origin
    }

    pub(crate) fn properties_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.properties
    }
}

/// Everything a caller supplies to create a node.
///
/// ```rust
/// use lineage_db::lineage::{NodeKind, NodeSpec};
///
/// let spec = NodeSpec::artifact("train-data")
///     .type_label("DataSet")
///     .source_uri("s3://bucket/train.csv")
///     .property("format", "csv");
/// assert_eq!(spec.kind(), NodeKind::Artifact);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    kind: NodeKind,
    name: String,
    type_label: String,
    source_uri: Option<String>,
    properties: BTreeMap<String, String>,
    origin: Origin,
}

impl NodeSpec {
    /// Create a spec with the required fields.
    #[must_use]
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            type_label: String::new(),
            source_uri: None,
            properties: BTreeMap::new(),
            origin: Origin::Manual,
        }
    }

    /// Spec for an artifact.
    #[must_use]
    pub fn artifact(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Artifact, name)
    }

    /// Spec for an action.
    #[must_use]
    pub fn action(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Action, name)
    }

    /// Spec for a context.
    #[must_use]
    pub fn context(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Context, name)
    }

    /// Spec for an experiment, trial or trial component.
    #[must_use]
    pub fn experiment_entity(tag: ExperimentTag, name: impl Into<String>) -> Self {
        Self::new(NodeKind::ExperimentEntity(tag), name)
    }

    /// Set the subtype label.
    #[must_use]
    pub fn type_label(mut self, type_label: impl Into<String>) -> Self {
        self.type_label = type_label.into();
        self
    }

    /// Set the source URI.
    #[must_use]
    pub fn source_uri(mut self, uri: impl Into<String>) -> Self {
        self.source_uri = Some(uri.into());
        self
    }

    /// Add one property.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Replace all properties.
    #[must_use]
    pub fn properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    /// Mark the node as created by the platform rather than a caller.
    #[must_use]
    pub const fn automatic(mut self) -> Self {
        self.origin = Origin::Automatic;
        self
    }

    /// Kind of node this spec creates.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Name of the node this spec creates.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Origin of the node this spec creates.
    #[must_use]
    pub const fn origin(&self) -> Origin {
        self.origin
    }
}

/// A persisted node, as read back from a snapshot.
pub(crate) struct NodeRow {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub type_label: String,
    pub source_uri: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub origin: Origin,
}

impl From<NodeRow> for Node {
    fn from(row: NodeRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            name: row.name,
            type_label: row.type_label,
            source_uri: row.source_uri,
            properties: row.properties,
            created_at: row.created_at,
            origin: row.origin,
        }
    }
}
