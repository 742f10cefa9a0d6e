//! Tests for error types

use lineage_db::error::CapacityClass;
use lineage_db::lineage::{NodeId, NodeKind};
use lineage_db::Error;

#[test]
fn test_node_not_found_error() {
    let error = Error::NodeNotFound(NodeId::new(3));
    assert_eq!(format!("{error}"), "node node-3 not found");
    assert!(error.is_not_found());
}

#[test]
fn test_association_not_found_error() {
    let error = Error::AssociationNotFound {
        source_id: NodeId::new(1),
        destination_id: NodeId::new(2),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("node-1 -> node-2"));
    assert!(error.is_not_found());
}

#[test]
fn test_duplicate_name_error() {
    let error = Error::DuplicateName {
        kind: NodeKind::Context,
        name: "pipeline".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Context"));
    assert!(error_str.contains("'pipeline'"));
}

#[test]
fn test_capacity_exceeded_error() {
    let error = Error::CapacityExceeded {
        class: CapacityClass::Contexts,
        limit: 500,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("at most 500"));
    assert!(error_str.contains("contexts"));
    assert!(!error.is_not_found());
}

#[test]
fn test_invalid_experiment_link_error() {
    let error = Error::InvalidExperimentLink {
        source_id: NodeId::new(4),
        destination_id: NodeId::new(5),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("experiment entities"));
    assert!(error_str.contains("node-4"));
}

#[test]
fn test_has_dependent_edges_error() {
    let error = Error::HasDependentEdges {
        id: NodeId::new(9),
        edges: 3,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("3 association(s)"));
    assert!(error_str.contains("delete_node_cascade"));
}

#[test]
fn test_dangling_endpoint_error() {
    let error = Error::DanglingEndpoint(NodeId::new(8));
    assert!(format!("{error}").contains("node-8 does not exist"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_storage_and_config_errors() {
    assert!(format!("{}", Error::Storage("bad file".to_string())).contains("Storage error"));
    assert!(format!("{}", Error::Config("zero".to_string())).contains("invalid configuration"));
}
