//! # Lineage-DB: Embedded Lineage Catalog
//!
//! **Version**: 0.1.0
//!
//! Lineage-DB is an in-process metadata catalog for ML and data pipelines:
//! artifacts, actions, contexts and experiment entities connected by
//! directed, typed associations. It answers "where did this model come
//! from?" and "what was built from this dataset?" with breadth-first lineage
//! walks, and removes entities together with their associations.
//!
//! ## Design Principles
//!
//! - **Integrity first**: every association points at live nodes, and no
//!   association links two experiment entities
//! - **Bounded**: manual entities are capped per kind; platform-created
//!   (automatic) entities are exempt
//! - **Fine-grained locking**: a registry mutex for capacity checks, one
//!   lock around the paired association indexes, per-node cascade locks
//! - **Cycle-safe traversal**: walks never assume a DAG
//!
//! ## Example Usage
//!
//! ```rust
//! use lineage_db::lineage::{AssociationType, NodeSpec};
//! use lineage_db::traversal::Direction;
//! use lineage_db::Catalog;
//!
//! let catalog = Catalog::builder().build()?;
//!
//! let data = catalog.create_node(NodeSpec::artifact("train-data").source_uri("s3://b/train.csv"))?;
//! let job = catalog.create_node(NodeSpec::action("training-job").type_label("ModelBuild"))?;
//! let model = catalog.create_node(NodeSpec::artifact("model").source_uri("s3://b/model.tar.gz"))?;
//!
//! catalog.create_association(data.id(), job.id(), AssociationType::ContributedTo)?;
//! catalog.create_association(job.id(), model.id(), AssociationType::Produced)?;
//!
//! let upstream = catalog.traverse_lineage(model.id(), Direction::Ancestors, None)?;
//! assert_eq!(upstream.len(), 2);
//!
//! catalog.purge_catalog()?;
//! # Ok::<(), lineage_db::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cascade;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod lineage;
pub mod storage;
pub mod store;
pub mod traversal;

pub use catalog::{Catalog, CatalogBuilder, CatalogStats};
pub use error::{Error, Result};
