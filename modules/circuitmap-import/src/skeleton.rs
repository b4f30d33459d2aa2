//! Turns raw segment geometry into a rooted treenode hierarchy.
//!
//! Only the largest connected component is kept. It is rooted at its lowest
//! vertex index, and node IDs use the deterministic encoding so that a
//! re-import of the same segment lands on the same rows.

use std::collections::VecDeque;

use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};

use circuitmap_common::{encode_node_id, CircuitMapError, Point3, Result, SkeletonNode};

use crate::geometry::SegmentGeometry;

/// A treenode ready for insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub location: Point3,
    pub radius: f64,
}

/// Rooted skeleton of one segment, nodes in breadth-first order from the root.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonTree {
    pub segment_id: i64,
    pub nodes: Vec<TreeNode>,
    /// Vertices dropped with the smaller components.
    pub n_discarded: usize,
}

impl SkeletonTree {
    pub fn root(&self) -> &TreeNode {
        &self.nodes[0]
    }

    pub fn skeleton_nodes(&self) -> Vec<SkeletonNode> {
        self.nodes
            .iter()
            .map(|n| SkeletonNode::new(n.id, n.location))
            .collect()
    }
}

/// Build the rooted tree for `segment_id` in `project_id` from `geometry`.
pub fn build_tree(segment_id: i64, project_id: i64, geometry: &SegmentGeometry) -> Result<SkeletonTree> {
    validate(segment_id, geometry)?;
    let n = geometry.vertices.len();

    let mut components = UnionFind::<usize>::new(n);
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(a, b) in &geometry.edges {
        if a == b {
            continue;
        }
        components.union(a, b);
        adjacency[a].push(b);
        adjacency[b].push(a);
    }
    for neighbours in &mut adjacency {
        neighbours.sort_unstable();
        neighbours.dedup();
    }

    // Largest component; ties go to the one holding the lowest vertex.
    let labels = components.into_labeling();
    let mut sizes = vec![0usize; n];
    for &label in &labels {
        sizes[label] += 1;
    }
    let mut root = 0;
    for v in 0..n {
        if sizes[labels[v]] > sizes[labels[root]] {
            root = v;
        }
    }
    let kept = sizes[labels[root]];

    let mut nodes = Vec::with_capacity(kept);
    let mut seen = vec![false; n];
    let mut queue = VecDeque::from([(root, None)]);
    seen[root] = true;

    while let Some((v, parent_id)) = queue.pop_front() {
        let id = encode_node_id(segment_id, v as i64, project_id)?;
        nodes.push(TreeNode {
            id,
            parent_id,
            location: geometry.vertices[v].truncated(),
            radius: geometry.radii.get(v).copied().unwrap_or(0.0),
        });
        for &next in &adjacency[v] {
            if !seen[next] {
                seen[next] = true;
                queue.push_back((next, Some(id)));
            }
        }
    }

    Ok(SkeletonTree {
        segment_id,
        nodes,
        n_discarded: n - kept,
    })
}

fn validate(segment_id: i64, geometry: &SegmentGeometry) -> Result<()> {
    let n = geometry.vertices.len();
    if n == 0 {
        return Err(CircuitMapError::invalid(format!(
            "segment {segment_id} has no skeleton vertices"
        )));
    }
    if !geometry.radii.is_empty() && geometry.radii.len() != n {
        return Err(CircuitMapError::invalid(format!(
            "segment {segment_id} has {} radii for {n} vertices",
            geometry.radii.len()
        )));
    }
    if let Some(i) = geometry.vertices.iter().position(|p| !p.is_finite()) {
        return Err(CircuitMapError::invalid(format!(
            "segment {segment_id} vertex {i} has a non-finite coordinate"
        )));
    }
    if let Some(&(a, b)) = geometry.edges.iter().find(|(a, b)| *a >= n || *b >= n) {
        return Err(CircuitMapError::invalid(format!(
            "segment {segment_id} edge ({a}, {b}) references a missing vertex"
        )));
    }
    Ok(())
}
