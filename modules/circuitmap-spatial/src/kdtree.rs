use circuitmap_common::{CircuitMapError, Point3, Result};

const DIMS: usize = 3;

#[derive(Debug, Clone)]
struct KdNode {
    /// Index into `KdTree::points`.
    point: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// Static 3-d tree over a fixed point set, answering exact nearest-neighbour
/// queries. Ties resolve to the lowest point index.
#[derive(Debug, Clone)]
pub struct KdTree {
    points: Vec<[f64; DIMS]>,
    nodes: Vec<KdNode>,
    root: Option<usize>,
}

impl KdTree {
    /// Build over `points`. Fails on an empty set or any non-finite coordinate.
    pub fn new(points: &[Point3]) -> Result<Self> {
        if points.is_empty() {
            return Err(CircuitMapError::invalid("cannot index an empty point set"));
        }
        if let Some(i) = points.iter().position(|p| !p.is_finite()) {
            return Err(CircuitMapError::invalid(format!(
                "point {i} has a non-finite coordinate"
            )));
        }

        let mut tree = KdTree {
            points: points.iter().map(|p| p.to_array()).collect(),
            nodes: Vec::with_capacity(points.len()),
            root: None,
        };
        let mut order: Vec<usize> = (0..points.len()).collect();
        tree.root = tree.build(&mut order, 0);
        Ok(tree)
    }

    fn build(&mut self, indices: &mut [usize], depth: usize) -> Option<usize> {
        if indices.is_empty() {
            return None;
        }
        let axis = depth % DIMS;
        let points = &self.points;
        indices.sort_unstable_by(|&a, &b| {
            points[a][axis]
                .total_cmp(&points[b][axis])
                .then(a.cmp(&b))
        });

        let mid = indices.len() / 2;
        let slot = self.nodes.len();
        self.nodes.push(KdNode {
            point: indices[mid],
            axis,
            left: None,
            right: None,
        });

        let (lower, rest) = indices.split_at_mut(mid);
        let left = self.build(lower, depth + 1);
        let right = self.build(&mut rest[1..], depth + 1);
        self.nodes[slot].left = left;
        self.nodes[slot].right = right;
        Some(slot)
    }

    /// Nearest point to `query` as `(distance, point index)`.
    pub fn nearest(&self, query: &Point3) -> (f64, usize) {
        let q = query.to_array();
        let mut best = (f64::INFINITY, usize::MAX);
        if let Some(root) = self.root {
            self.search(root, &q, &mut best);
        }
        (best.0.sqrt(), best.1)
    }

    fn search(&self, slot: usize, q: &[f64; DIMS], best: &mut (f64, usize)) {
        let node = &self.nodes[slot];
        let p = &self.points[node.point];

        let d2 = squared_distance(p, q);
        if d2 < best.0 || (d2 == best.0 && node.point < best.1) {
            *best = (d2, node.point);
        }

        let diff = q[node.axis] - p[node.axis];
        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(near) = near {
            self.search(near, q, best);
        }
        // Equal distance still has to be checked for a lower index.
        if let Some(far) = far {
            if diff * diff <= best.0 {
                self.search(far, q, best);
            }
        }
    }
}

fn squared_distance(a: &[f64; DIMS], b: &[f64; DIMS]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
