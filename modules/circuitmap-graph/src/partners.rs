use std::collections::BTreeSet;

use petgraph::Direction;

use crate::expand::SegmentGraph;

/// Segments with at least `threshold` synapses onto `segment_id`.
pub fn presynaptic_partners(graph: &SegmentGraph, segment_id: i64, threshold: u32) -> BTreeSet<i64> {
    partners(graph, segment_id, threshold, Direction::Incoming)
}

/// Segments receiving at least `threshold` synapses from `segment_id`.
pub fn postsynaptic_partners(graph: &SegmentGraph, segment_id: i64, threshold: u32) -> BTreeSet<i64> {
    partners(graph, segment_id, threshold, Direction::Outgoing)
}

fn partners(graph: &SegmentGraph, segment_id: i64, threshold: u32, dir: Direction) -> BTreeSet<i64> {
    if !graph.contains(segment_id) {
        return BTreeSet::new();
    }
    graph
        .neighbours(segment_id, dir)
        .filter(|&(other, count)| other != segment_id && other != 0 && count >= threshold)
        .map(|(other, _)| other)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use circuitmap_common::SynapticLink;

    fn graph(edges: &[(i64, i64, u32)]) -> SegmentGraph {
        let mut links = Vec::new();
        let mut id = 0;
        for &(pre, post, count) in edges {
            for _ in 0..count {
                id += 1;
                links.push(SynapticLink::new(id, pre, post, id as i32));
            }
        }
        let mut g = SegmentGraph::new();
        g.add_links(&links);
        g
    }

    #[test]
    fn threshold_is_inclusive() {
        let g = graph(&[(1, 100, 5), (2, 100, 4), (100, 3, 5), (100, 4, 6)]);
        assert_eq!(presynaptic_partners(&g, 100, 5), BTreeSet::from([1]));
        assert_eq!(presynaptic_partners(&g, 100, 4), BTreeSet::from([1, 2]));
        assert_eq!(postsynaptic_partners(&g, 100, 6), BTreeSet::from([4]));
        assert_eq!(postsynaptic_partners(&g, 100, 5), BTreeSet::from([3, 4]));
    }

    #[test]
    fn self_loops_are_not_partners() {
        let g = graph(&[(100, 100, 9), (100, 7, 1)]);
        assert!(presynaptic_partners(&g, 100, 1).is_empty());
        assert_eq!(postsynaptic_partners(&g, 100, 1), BTreeSet::from([7]));
    }

    #[test]
    fn absent_segment_has_no_partners() {
        let g = graph(&[(1, 2, 3)]);
        assert!(presynaptic_partners(&g, 99, 0).is_empty());
        assert!(postsynaptic_partners(&SegmentGraph::new(), 1, 0).is_empty());
    }
}
