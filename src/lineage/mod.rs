//! Lineage records
//!
//! The entity graph tracked by the catalog:
//!
//! ```text
//! Context ──AssociatedWith──> Action ──Produced──> Artifact (model)
//!                               ^
//! Artifact (data) ─ContributedTo┘
//! ```
//!
//! Nodes are one of four kinds ([`NodeKind`]); experiment entities carry a
//! further [`ExperimentTag`]. Associations are directed and typed
//! ([`AssociationType`]) and may never link two experiment entities.
//!
//! ## Usage
//!
//! ```rust
//! use lineage_db::lineage::{AssociationType, NodeSpec};
//! use lineage_db::Catalog;
//!
//! let catalog = Catalog::builder().build()?;
//! let data = catalog.create_node(NodeSpec::artifact("train.csv"))?;
//! let job = catalog.create_node(NodeSpec::action("training-job"))?;
//! catalog.create_association(data.id(), job.id(), AssociationType::ContributedTo)?;
//! # Ok::<(), lineage_db::Error>(())
//! ```

mod association;
mod node;

pub use association::{Association, AssociationSpec, AssociationType};
pub(crate) use node::NodeRow;
pub use node::{ExperimentTag, Node, NodeId, NodeKind, NodeSpec, Origin};
