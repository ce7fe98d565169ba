//! Placement through the coordinator.

use super::helpers::{Harness, test_data};
use crate::error::ErrorKind;

/// Node A at 90/100 used, node B at 10/100 used.
async fn skewed_pair(h: &Harness) -> (quay_types::NodeId, quay_types::NodeId) {
    let a = h.memory_node("a", 100).await.id;
    h.add("/fill-a", &[0; 90]).await.unwrap();
    let b = h.memory_node("b", 100).await.id;
    h.add("/fill-b", &[0; 10]).await.unwrap();

    assert_eq!(h.server.get_node(&a).unwrap().used, 90);
    assert_eq!(h.server.get_node(&b).unwrap().used, 10);
    (a, b)
}

#[tokio::test]
async fn test_file_goes_to_most_free_node() {
    let h = Harness::new();
    let (_, b) = skewed_pair(&h).await;

    let record = h.add("/fifty", &[5; 50]).await.unwrap();
    assert_eq!(record.owner, b);
    assert_eq!(h.server.get_node(&b).unwrap().used, 60);
    h.assert_consistent();
}

#[tokio::test]
async fn test_no_single_node_fits() {
    let h = Harness::new();
    let (a, b) = skewed_pair(&h).await;
    let files_before = h.server.list_all_files();

    let err = h.add("/too-big", &[9; 95]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoCapacityAvailable);

    assert_eq!(h.server.get_node(&a).unwrap().used, 90);
    assert_eq!(h.server.get_node(&b).unwrap().used, 10);
    assert_eq!(h.server.list_all_files(), files_before);

    // The failed attempt did not keep the path.
    h.add("/too-big", &[9; 5]).await.unwrap();
    h.assert_consistent();
}

#[tokio::test]
async fn test_no_nodes_means_no_capacity() {
    let h = Harness::new();
    let err = h.add("/x", b"data").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoCapacityAvailable);
}

#[tokio::test]
async fn test_ties_break_to_lowest_id() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for label in ["n1", "n2", "n3"] {
        ids.push(h.memory_node(label, 100).await.id);
    }
    let lowest = *ids.iter().min().unwrap();

    let record = h.add("/tie", &[1; 10]).await.unwrap();
    assert_eq!(record.owner, lowest);
}

#[tokio::test]
async fn test_fill_to_exact_capacity() {
    let h = Harness::new();
    let id = h.memory_node("a", 64).await.id;

    for i in 0..8 {
        h.add(&format!("/block-{i}"), &test_data(8)).await.unwrap();
    }
    assert_eq!(h.server.get_node(&id).unwrap().used, 64);

    let err = h.add("/one-more", b"x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoCapacityAvailable);

    // Zero-byte files still fit.
    h.add("/nothing", b"").await.unwrap();
    h.assert_consistent();
}

#[tokio::test]
async fn test_load_spreads_across_nodes() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for label in ["a", "b", "c", "d"] {
        ids.push(h.memory_node(label, 10_000).await.id);
    }

    for i in 0..40 {
        h.add(&format!("/obj-{i}"), &test_data(100)).await.unwrap();
    }

    // Equal sizes and capacities: every node ends up with the same share.
    for id in &ids {
        assert_eq!(h.server.get_node(id).unwrap().used, 1_000);
        assert_eq!(h.server.list_node_files(id).unwrap().len(), 10);
    }
    h.assert_consistent();
}
