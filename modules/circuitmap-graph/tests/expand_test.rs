use std::collections::BTreeSet;

use circuitmap_common::{CircuitMapError, SynapticLink};
use circuitmap_graph::{load_subgraph, postsynaptic_partners, presynaptic_partners, SegmentGraph};
use circuitmap_links::MemoryLinkStore;

fn chain() -> Vec<SynapticLink> {
    vec![
        // 100 -> 200 (3), 100 -> 300 (1)
        SynapticLink::new(1, 100, 200, 1),
        SynapticLink::new(2, 100, 200, 2),
        SynapticLink::new(3, 100, 200, 3),
        SynapticLink::new(4, 100, 300, 4),
        // second hop: 200 -> 400, 500 -> 300
        SynapticLink::new(5, 200, 400, 5),
        SynapticLink::new(6, 500, 300, 6),
        // background links
        SynapticLink::new(7, 100, 0, 7),
        SynapticLink::new(8, 0, 100, 8),
        // third hop
        SynapticLink::new(9, 400, 600, 9),
    ]
}

#[tokio::test]
async fn order_zero_loads_direct_neighbours() {
    let store = MemoryLinkStore::new(chain());
    let graph = load_subgraph(&store, 100, 0).await.unwrap();

    assert_eq!(graph.edges(), vec![(100, 200, 3), (100, 300, 1)]);
    assert!(!graph.contains(0));
    assert_eq!(store.fetch_count(100), 2);
    assert_eq!(store.fetch_count(200), 0);
}

#[tokio::test]
async fn order_one_expands_second_hop_without_double_counting() {
    let store = MemoryLinkStore::new(chain());
    let graph = load_subgraph(&store, 100, 1).await.unwrap();

    assert_eq!(
        graph.edges(),
        vec![(100, 200, 3), (100, 300, 1), (200, 400, 1), (500, 300, 1)]
    );
    // Every segment is fetched once per role at most.
    for segment in [100, 200, 300] {
        assert_eq!(store.fetch_count(segment), 2, "segment {segment}");
    }
    assert_eq!(store.fetch_count(400), 0);
    assert_eq!(store.fetch_count(0), 0);
}

#[tokio::test]
async fn expansion_stops_when_frontier_empties() {
    let store = MemoryLinkStore::new(vec![SynapticLink::new(1, 10, 20, 1)]);
    let graph = load_subgraph(&store, 10, 5).await.unwrap();
    assert_eq!(graph.edges(), vec![(10, 20, 1)]);
    assert_eq!(store.fetches().len(), 4);
}

#[tokio::test]
async fn background_seed_yields_empty_graph() {
    let store = MemoryLinkStore::new(chain());
    let graph = load_subgraph(&store, 0, 2).await.unwrap();
    assert!(graph.is_empty());
    assert!(store.fetches().is_empty());
}

#[tokio::test]
async fn unavailable_store_propagates() {
    let store = MemoryLinkStore::unavailable();
    let err = load_subgraph(&store, 100, 0).await.unwrap_err();
    assert!(matches!(err, CircuitMapError::StoreUnavailable(_)));
}

#[test]
fn edge_aggregation_is_order_independent() {
    let links = chain();
    let mut forward = SegmentGraph::new();
    forward.add_links(&links);

    let mut reversed = SegmentGraph::new();
    reversed.add_links(links.iter().rev());

    let mut interleaved = SegmentGraph::new();
    interleaved.add_links(links.iter().step_by(2));
    interleaved.add_links(links.iter().skip(1).step_by(2));
    interleaved.add_links(&links);

    assert_eq!(forward.edges(), reversed.edges());
    assert_eq!(forward.edges(), interleaved.edges());
}

#[tokio::test]
async fn partners_follow_thresholds_on_loaded_graph() {
    let store = MemoryLinkStore::new(chain());
    let graph = load_subgraph(&store, 100, 0).await.unwrap();

    assert_eq!(postsynaptic_partners(&graph, 100, 3), BTreeSet::from([200]));
    assert_eq!(postsynaptic_partners(&graph, 100, 1), BTreeSet::from([200, 300]));
    assert_eq!(postsynaptic_partners(&graph, 100, 4), BTreeSet::new());
    assert!(presynaptic_partners(&graph, 100, 1).is_empty());
}
