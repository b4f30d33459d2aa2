use std::collections::{BTreeSet, HashSet};

use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use tracing::{debug, info};

use circuitmap_common::{LinkRole, Result, SynapticLink};
use circuitmap_links::LinkStore;

/// Background label in the segmentation. Never a node.
const BACKGROUND: i64 = 0;

/// Directed segment adjacency. Edge `a -> b` carries the number of distinct
/// synaptic links from `a` (presynaptic) to `b` (postsynaptic).
#[derive(Debug, Default, Clone)]
pub struct SegmentGraph {
    graph: DiGraphMap<i64, u32>,
    counted: HashSet<i64>,
}

impl SegmentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `links` to the graph. A link id already counted is ignored, and
    /// links touching the background segment contribute nothing.
    pub fn add_links<'a>(&mut self, links: impl IntoIterator<Item = &'a SynapticLink>) {
        for link in links {
            if link.segmentid_pre == BACKGROUND || link.segmentid_post == BACKGROUND {
                continue;
            }
            if !self.counted.insert(link.id) {
                continue;
            }
            let (pre, post) = (link.segmentid_pre, link.segmentid_post);
            match self.graph.edge_weight_mut(pre, post) {
                Some(w) => *w += 1,
                None => {
                    self.graph.add_edge(pre, post, 1);
                }
            }
        }
    }

    /// Synapse count on `pre -> post`, if the edge exists.
    pub fn weight(&self, pre: i64, post: i64) -> Option<u32> {
        self.graph.edge_weight(pre, post).copied()
    }

    pub fn contains(&self, segment_id: i64) -> bool {
        self.graph.contains_node(segment_id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All edges as `(pre, post, count)`, sorted.
    pub fn edges(&self) -> Vec<(i64, i64, u32)> {
        let mut edges: Vec<_> = self
            .graph
            .all_edges()
            .map(|(a, b, w)| (a, b, *w))
            .collect();
        edges.sort_unstable();
        edges
    }

    /// Neighbours of `segment_id` in `dir` with their edge counts.
    pub(crate) fn neighbours(
        &self,
        segment_id: i64,
        dir: Direction,
    ) -> impl Iterator<Item = (i64, u32)> + '_ {
        self.graph
            .neighbors_directed(segment_id, dir)
            .filter_map(move |other| {
                let w = match dir {
                    Direction::Outgoing => self.weight(segment_id, other),
                    Direction::Incoming => self.weight(other, segment_id),
                };
                w.map(|w| (other, w))
            })
    }
}

/// Breadth-first expansion from `seed` over `order + 1` rounds.
///
/// Each round fetches both link roles for every frontier segment, adds the
/// links to the graph, and moves the opposite sides not yet visited into the
/// next frontier. Every segment is fetched at most once.
pub async fn load_subgraph(store: &dyn LinkStore, seed: i64, order: u32) -> Result<SegmentGraph> {
    let mut graph = SegmentGraph::new();
    if seed == BACKGROUND {
        return Ok(graph);
    }

    let mut visited: HashSet<i64> = HashSet::new();
    let mut frontier: BTreeSet<i64> = BTreeSet::from([seed]);

    for round in 0..=order {
        if frontier.is_empty() {
            break;
        }

        let mut candidates = BTreeSet::new();
        for &segment_id in &frontier {
            visited.insert(segment_id);

            let pre_links = store.links_for(segment_id, LinkRole::Pre).await?;
            let post_links = store.links_for(segment_id, LinkRole::Post).await?;

            candidates.extend(pre_links.iter().map(|l| l.segmentid_post));
            candidates.extend(post_links.iter().map(|l| l.segmentid_pre));

            graph.add_links(pre_links.iter().chain(post_links.iter()));
        }

        debug!(
            seed,
            round,
            expanded = frontier.len(),
            nodes = graph.node_count(),
            "Expansion round finished"
        );

        frontier = candidates
            .into_iter()
            .filter(|s| *s != BACKGROUND && !visited.contains(s))
            .collect();
    }

    info!(
        seed,
        order,
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "Loaded segment subgraph"
    );
    Ok(graph)
}
