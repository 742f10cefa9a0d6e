//! Lineage Walkthrough Example
//!
//! Registers the lineage of a model build (context, training job, input
//! datasets, model), walks it in both directions, snapshots the catalog and
//! finally purges it.
//!
//! Run with: cargo run --example lineage_walkthrough
//! Set `RUST_LOG=lineage_db=debug` to see every catalog operation.

use anyhow::Result;
use lineage_db::lineage::{AssociationType, NodeSpec};
use lineage_db::store::NodeQuery;
use lineage_db::traversal::{Direction, LineageSide};
use lineage_db::Catalog;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lineage_db=debug".into()),
        )
        .init();

    println!("=== Lineage-DB Walkthrough ===\n");

    let catalog = Catalog::builder().build()?;

    // -------------------------------------------------------------------------
    // 1. Register the pipeline entities
    // -------------------------------------------------------------------------
    println!("1. Registering entities...");

    let context = catalog.create_node(
        NodeSpec::context("abalone-pipeline")
            .type_label("Pipeline")
            .property("owner", "ml-platform"),
    )?;
    let training = catalog.create_node(
        NodeSpec::action("xgboost-training")
            .type_label("ModelBuild")
            .source_uri("arn:training-job/xgboost-training"),
    )?;
    let train_data = catalog.create_node(
        NodeSpec::artifact("train-data")
            .type_label("DataSet")
            .source_uri("s3://example-bucket/abalone/train.csv"),
    )?;
    let validation_data = catalog.create_node(
        NodeSpec::artifact("validation-data")
            .type_label("DataSet")
            .source_uri("s3://example-bucket/abalone/validation.csv"),
    )?;
    let model = catalog.create_node(
        NodeSpec::artifact("abalone-model")
            .type_label("Model")
            .source_uri("s3://example-bucket/abalone/model.tar.gz"),
    )?;

    for node in catalog.list_nodes(NodeQuery::new()) {
        println!("   {} {:<16} {}", node.id(), node.kind(), node.name());
    }

    // -------------------------------------------------------------------------
    // 2. Connect them
    // -------------------------------------------------------------------------
    println!("\n2. Creating associations...");

    catalog.create_association(context.id(), training.id(), AssociationType::AssociatedWith)?;
    catalog.create_association(train_data.id(), training.id(), AssociationType::default())?;
    catalog.create_association(validation_data.id(), training.id(), AssociationType::default())?;
    catalog.create_association(training.id(), model.id(), AssociationType::Produced)?;

    println!("   {} associations", catalog.stats().associations);

    // -------------------------------------------------------------------------
    // 3. Walk the lineage of the training job
    // -------------------------------------------------------------------------
    println!("\n3. Lineage of '{}':", training.name());

    let report = catalog.traverse_lineage(training.id(), Direction::Both, None)?;
    for entry in report.entries() {
        let side = match entry.side() {
            LineageSide::Ancestor => "upstream",
            LineageSide::Descendant => "downstream",
        };
        println!(
            "   depth {} {:<10} {} ({}, via {})",
            entry.depth(),
            side,
            entry.node().name(),
            entry.node().kind(),
            entry.edge().association_type()
        );
    }

    // -------------------------------------------------------------------------
    // 4. Snapshot and purge
    // -------------------------------------------------------------------------
    let dir = std::env::temp_dir().join("lineage-db-walkthrough");
    catalog.save_snapshot(&dir)?;
    println!("\n4. Snapshot written to {}", dir.display());

    let purged = catalog.purge_catalog()?;
    println!(
        "   Purged {} nodes and {} associations",
        purged.nodes_deleted, purged.associations_removed
    );

    let restored = Catalog::open_snapshot(&dir, Catalog::builder())?;
    println!(
        "   Restored catalog holds {} nodes",
        restored.stats().node_count()
    );

    println!("\n=== Done ===");
    Ok(())
}
