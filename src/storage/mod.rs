//! Snapshot storage (Arrow/Parquet)
//!
//! A snapshot is two Parquet files in one directory:
//!
//! ```text
//! nodes.parquet         id | kind | name | type_label | source_uri | properties | created_at_us | automatic
//! associations.parquet  source_id | destination_id | association_type | created_at_us | automatic | sequence
//! ```
//!
//! `properties` holds the property map as a JSON object. The forward and
//! reverse association indexes are not persisted; they are rebuilt from the
//! association table on load.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, BooleanArray, Int64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::lineage::{Association, Node, NodeId, NodeRow, Origin};
use crate::{Error, Result};

/// File name of the node table inside a snapshot directory
pub const NODES_FILE: &str = "nodes.parquet";
/// File name of the association table inside a snapshot directory
pub const ASSOCIATIONS_FILE: &str = "associations.parquet";

fn node_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        Field::new("kind", DataType::Utf8, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("type_label", DataType::Utf8, false),
        Field::new("source_uri", DataType::Utf8, true),
        Field::new("properties", DataType::Utf8, false),
        Field::new("created_at_us", DataType::Int64, false),
        Field::new("automatic", DataType::Boolean, false),
    ]))
}

fn association_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("source_id", DataType::UInt64, false),
        Field::new("destination_id", DataType::UInt64, false),
        Field::new("association_type", DataType::Utf8, false),
        Field::new("created_at_us", DataType::Int64, false),
        Field::new("automatic", DataType::Boolean, false),
        Field::new("sequence", DataType::UInt64, false),
    ]))
}

/// Point-in-time copy of a catalog's node and association tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    nodes: Vec<Node>,
    associations: Vec<Association>,
}

impl CatalogSnapshot {
    /// Snapshot from already-collected tables.
    #[must_use]
    pub const fn new(nodes: Vec<Node>, associations: Vec<Association>) -> Self {
        Self {
            nodes,
            associations,
        }
    }

    /// Node table.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Association table.
    #[must_use]
    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub(crate) fn into_parts(self) -> (Vec<Node>, Vec<Association>) {
        (self.nodes, self.associations)
    }

    /// Write both tables into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns error if the directory or files cannot be written
    pub fn write_parquet<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        write_batch(&dir.join(NODES_FILE), &nodes_to_batch(&self.nodes)?)?;
        write_batch(
            &dir.join(ASSOCIATIONS_FILE),
            &associations_to_batch(&self.associations)?,
        )?;
        Ok(())
    }

    /// Read both tables from `dir`.
    ///
    /// # Errors
    ///
    /// Returns error if a file is missing, unreadable or has an unexpected
    /// layout
    pub fn load_parquet<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();

        let mut nodes = Vec::new();
        for batch in read_batches(&dir.join(NODES_FILE))? {
            nodes.extend(batch_to_nodes(&batch)?);
        }

        let mut associations = Vec::new();
        for batch in read_batches(&dir.join(ASSOCIATIONS_FILE))? {
            associations.extend(batch_to_associations(&batch)?);
        }

        Ok(Self {
            nodes,
            associations,
        })
    }
}

fn write_batch(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .map_err(|e| Error::Storage(format!("Failed to create Parquet writer: {e}")))?;
    writer
        .write(batch)
        .map_err(|e| Error::Storage(format!("Failed to write record batch: {e}")))?;
    writer
        .close()
        .map_err(|e| Error::Storage(format!("Failed to finish Parquet file: {e}")))?;
    Ok(())
}

fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path)
        .map_err(|e| Error::Storage(format!("Failed to open Parquet file {}: {e}", path.display())))?;

    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::Storage(format!("Failed to parse Parquet file: {e}")))?
        .build()
        .map_err(|e| Error::Storage(format!("Failed to create Parquet reader: {e}")))?;

    reader
        .map(|batch| {
            batch.map_err(|e| Error::Storage(format!("Failed to read record batch: {e}")))
        })
        .collect()
}

fn nodes_to_batch(nodes: &[Node]) -> Result<RecordBatch> {
    let properties = nodes
        .iter()
        .map(|node| serde_json::to_string(node.properties()))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let batch = RecordBatch::try_new(
        node_schema(),
        vec![
            Arc::new(UInt64Array::from_iter_values(
                nodes.iter().map(|n| n.id().get()),
            )),
            Arc::new(StringArray::from_iter_values(
                nodes.iter().map(|n| n.kind().as_str()),
            )),
            Arc::new(StringArray::from_iter_values(nodes.iter().map(Node::name))),
            Arc::new(StringArray::from_iter_values(
                nodes.iter().map(Node::type_label),
            )),
            Arc::new(nodes.iter().map(Node::source_uri).collect::<StringArray>()),
            Arc::new(StringArray::from(properties)),
            Arc::new(Int64Array::from_iter_values(
                nodes.iter().map(|n| n.created_at().timestamp_micros()),
            )),
            Arc::new(BooleanArray::from(
                nodes
                    .iter()
                    .map(|n| n.origin() == Origin::Automatic)
                    .collect::<Vec<_>>(),
            )),
        ],
    )?;
    Ok(batch)
}

fn associations_to_batch(associations: &[Association]) -> Result<RecordBatch> {
    let batch = RecordBatch::try_new(
        association_schema(),
        vec![
            Arc::new(UInt64Array::from_iter_values(
                associations.iter().map(|a| a.source_id().get()),
            )),
            Arc::new(UInt64Array::from_iter_values(
                associations.iter().map(|a| a.destination_id().get()),
            )),
            Arc::new(StringArray::from_iter_values(
                associations.iter().map(|a| a.association_type().as_str()),
            )),
            Arc::new(Int64Array::from_iter_values(
                associations.iter().map(|a| a.created_at().timestamp_micros()),
            )),
            Arc::new(BooleanArray::from(
                associations
                    .iter()
                    .map(|a| a.origin() == Origin::Automatic)
                    .collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from_iter_values(
                associations.iter().map(Association::sequence),
            )),
        ],
    )?;
    Ok(batch)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::Storage(format!("missing column '{name}'")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Storage(format!("column '{name}' has an unexpected type")))
}

fn timestamp(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::Storage(format!("timestamp {micros} out of range")))
}

const fn origin(automatic: bool) -> Origin {
    if automatic {
        Origin::Automatic
    } else {
        Origin::Manual
    }
}

fn batch_to_nodes(batch: &RecordBatch) -> Result<Vec<Node>> {
    let ids = column::<UInt64Array>(batch, "id")?;
    let kinds = column::<StringArray>(batch, "kind")?;
    let names = column::<StringArray>(batch, "name")?;
    let labels = column::<StringArray>(batch, "type_label")?;
    let uris = column::<StringArray>(batch, "source_uri")?;
    let properties = column::<StringArray>(batch, "properties")?;
    let created = column::<Int64Array>(batch, "created_at_us")?;
    let automatic = column::<BooleanArray>(batch, "automatic")?;

    (0..batch.num_rows())
        .map(|row| {
            let properties: BTreeMap<String, String> =
                serde_json::from_str(properties.value(row))?;
            Ok(Node::from(NodeRow {
                id: NodeId::new(ids.value(row)),
                kind: kinds.value(row).parse()?,
                name: names.value(row).to_string(),
                type_label: labels.value(row).to_string(),
                source_uri: (!uris.is_null(row)).then(|| uris.value(row).to_string()),
                properties,
                created_at: timestamp(created.value(row))?,
                origin: origin(automatic.value(row)),
            }))
        })
        .collect()
}

fn batch_to_associations(batch: &RecordBatch) -> Result<Vec<Association>> {
    let sources = column::<UInt64Array>(batch, "source_id")?;
    let destinations = column::<UInt64Array>(batch, "destination_id")?;
    let types = column::<StringArray>(batch, "association_type")?;
    let created = column::<Int64Array>(batch, "created_at_us")?;
    let automatic = column::<BooleanArray>(batch, "automatic")?;
    let sequences = column::<UInt64Array>(batch, "sequence")?;

    (0..batch.num_rows())
        .map(|row| {
            Ok(Association::new(
                NodeId::new(sources.value(row)),
                NodeId::new(destinations.value(row)),
                types.value(row).parse()?,
                timestamp(created.value(row))?,
                origin(automatic.value(row)),
                sequences.value(row),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineage::{AssociationType, NodeKind, NodeSpec};

    fn sample_node(id: u64, spec: NodeSpec) -> Node {
        let created_at = DateTime::from_timestamp_micros(1_700_000_000_000_000 + id as i64).unwrap();
        Node::from_spec(NodeId::new(id), spec, created_at)
    }

    #[test]
    fn test_node_batch_layout() {
        let nodes = vec![
            sample_node(
                1,
                NodeSpec::artifact("model")
                    .source_uri("s3://bucket/model.tar.gz")
                    .property("framework", "xgboost"),
            ),
            sample_node(2, NodeSpec::context("pipeline").automatic()),
        ];

        let batch = nodes_to_batch(&nodes).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema(), node_schema());

        let uris = column::<StringArray>(&batch, "source_uri").unwrap();
        assert!(!uris.is_null(0));
        assert!(uris.is_null(1));

        let decoded = batch_to_nodes(&batch).unwrap();
        assert_eq!(decoded, nodes);
        assert_eq!(decoded[1].kind(), NodeKind::Context);
        assert_eq!(decoded[1].origin(), Origin::Automatic);
    }

    #[test]
    fn test_association_batch_layout() {
        let created_at = DateTime::from_timestamp_micros(1_700_000_000_000_000).unwrap();
        let associations = vec![Association::new(
            NodeId::new(1),
            NodeId::new(2),
            AssociationType::Produced,
            created_at,
            Origin::Manual,
            3,
        )];

        let batch = associations_to_batch(&associations).unwrap();
        assert_eq!(batch_to_associations(&batch).unwrap(), associations);
    }

    #[test]
    fn test_missing_column_is_storage_error() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::UInt64, false)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(UInt64Array::from(vec![1_u64]))]).unwrap();
        let err = batch_to_nodes(&batch).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(err.to_string().contains("kind"));
    }
}
