use std::collections::BTreeSet;

use circuitmap_common::{CircuitMapError, LinkRole, SynapticLink};
use circuitmap_links::{LinkStore, MemoryLinkStore};

fn fixture() -> MemoryLinkStore {
    MemoryLinkStore::new(vec![
        SynapticLink::new(3, 100, 200, 30),
        SynapticLink::new(1, 100, 300, 10),
        SynapticLink::new(2, 400, 100, 20).with_cluster(30),
        SynapticLink::new(4, 500, 600, 40),
    ])
}

#[tokio::test]
async fn pre_role_returns_outgoing_links_in_id_order() {
    let store = fixture();
    let links = store.links_for(100, LinkRole::Pre).await.unwrap();
    let ids: Vec<i64> = links.iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![1, 3]);
}

#[tokio::test]
async fn post_role_returns_incoming_links() {
    let store = fixture();
    let links = store.links_for(100, LinkRole::Post).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].segmentid_pre, 400);
}

#[tokio::test]
async fn unknown_segment_is_empty_not_an_error() {
    let store = fixture();
    assert!(store.links_for(999, LinkRole::Pre).await.unwrap().is_empty());
}

#[tokio::test]
async fn representatives_are_keyed_by_offset() {
    let store = fixture();
    let offsets: BTreeSet<i32> = [30, 77].into_iter().collect();
    let reps = store.representative_links_for(&offsets).await.unwrap();
    assert_eq!(reps.len(), 1);
    assert_eq!(reps[&30].id, 3);
}

#[tokio::test]
async fn fetches_are_recorded() {
    let store = fixture();
    store.links_for(100, LinkRole::Pre).await.unwrap();
    store.links_for(100, LinkRole::Post).await.unwrap();
    store.links_for(200, LinkRole::Pre).await.unwrap();
    assert_eq!(store.fetch_count(100), 2);
    assert_eq!(
        store.fetches(),
        vec![
            (100, LinkRole::Pre),
            (100, LinkRole::Post),
            (200, LinkRole::Pre)
        ]
    );
}

#[tokio::test]
async fn offline_store_reports_unavailable() {
    let store = MemoryLinkStore::unavailable();
    let err = store.links_for(1, LinkRole::Pre).await.unwrap_err();
    assert!(matches!(err, CircuitMapError::StoreUnavailable(_)));
    assert!(err.is_retryable());
}
