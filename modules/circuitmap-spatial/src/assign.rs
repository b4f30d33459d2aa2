use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use circuitmap_common::{
    encode_connector_id, CircuitMapError, Point3, Relation, Result, SkeletonNode, SynapticLink,
};

use crate::kdtree::KdTree;

/// Confidence written on every imported node link.
pub const LINK_CONFIDENCE: i16 = 5;

#[derive(Debug, Clone, TypedBuilder)]
pub struct AssignParams {
    /// Maximum link-to-node distance. Negative disables the filter.
    #[builder(default = -1.0)]
    pub distance_threshold: f64,
    #[builder(default = false)]
    pub with_autapses: bool,
    /// Base added to `offset * 10` when deriving connector IDs.
    pub connector_id_offset: i64,
    /// Skeleton the nodes belong to; scopes autapse suppression.
    pub skeleton_id: i64,
}

/// A connector to create, with the link record it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorRecord {
    pub id: i64,
    /// Presynaptic location of `source`, truncated to integer voxels.
    pub location: Point3,
    /// The link itself, or its cluster representative.
    pub source: SynapticLink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeLink {
    pub node_id: i64,
    pub connector_id: i64,
    pub relation: Relation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub connectors: BTreeMap<i64, ConnectorRecord>,
    pub links: BTreeSet<NodeLink>,
}

impl Assignment {
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty() && self.links.is_empty()
    }

    /// Connector IDs linked to the skeleton with `relation`.
    pub fn connectors_with(&self, relation: Relation) -> BTreeSet<i64> {
        self.links
            .iter()
            .filter(|l| l.relation == relation)
            .map(|l| l.connector_id)
            .collect()
    }
}

/// Assigns synaptic links to the nodes of one skeleton.
pub struct SynapseAssigner {
    nodes: Vec<SkeletonNode>,
    tree: KdTree,
    params: AssignParams,
}

/// A link that survived the filters of one pass, pending deduplication.
struct Candidate {
    node_id: i64,
    distance: f64,
    source: SynapticLink,
}

impl SynapseAssigner {
    /// Index `nodes` for nearest-node queries. Fails on an empty node list or
    /// any non-finite coordinate.
    pub fn new(nodes: Vec<SkeletonNode>, params: AssignParams) -> Result<Self> {
        if nodes.is_empty() {
            return Err(CircuitMapError::invalid(format!(
                "skeleton {} has no nodes",
                params.skeleton_id
            )));
        }
        let locations: Vec<Point3> = nodes.iter().map(|n| n.location).collect();
        let tree = KdTree::new(&locations)?;
        Ok(Self {
            nodes,
            tree,
            params,
        })
    }

    /// Assign `pre_links` (source segments presynaptic) and `post_links`
    /// (source segments postsynaptic) to the skeleton.
    ///
    /// `representatives` maps cluster offsets to their representative link.
    /// A clustered link without a representative falls back to its own offset.
    pub fn assign(
        &self,
        pre_links: &[SynapticLink],
        post_links: &[SynapticLink],
        representatives: &HashMap<i32, SynapticLink>,
    ) -> Assignment {
        let mut connectors = BTreeMap::new();

        let pre = self.pass(
            Relation::PresynapticTo,
            pre_links,
            representatives,
            &HashSet::new(),
            &mut connectors,
        );

        // Without autapses a connector may not be both pre- and postsynaptic
        // to this skeleton.
        let suppressed: HashSet<i64> = if self.params.with_autapses {
            HashSet::new()
        } else {
            pre.iter().map(|l| l.connector_id).collect()
        };

        let post = self.pass(
            Relation::PostsynapticTo,
            post_links,
            representatives,
            &suppressed,
            &mut connectors,
        );

        let links: BTreeSet<NodeLink> = pre.into_iter().chain(post).collect();
        let linked: HashSet<i64> = links.iter().map(|l| l.connector_id).collect();
        connectors.retain(|id, _| linked.contains(id));

        info!(
            skeleton_id = self.params.skeleton_id,
            pre_links = pre_links.len(),
            post_links = post_links.len(),
            connectors = connectors.len(),
            node_links = links.len(),
            "Assigned synaptic links to skeleton"
        );

        Assignment { connectors, links }
    }

    fn pass(
        &self,
        relation: Relation,
        links: &[SynapticLink],
        representatives: &HashMap<i32, SynapticLink>,
        suppressed: &HashSet<i64>,
        connectors: &mut BTreeMap<i64, ConnectorRecord>,
    ) -> Vec<NodeLink> {
        let role = relation.role();
        let keep_self_links = self.params.with_autapses && relation == Relation::PresynapticTo;

        // (segment, connector) -> closest candidate, in first-seen order.
        let mut closest: BTreeMap<(i64, i64), Candidate> = BTreeMap::new();
        let mut order: Vec<(i64, i64)> = Vec::new();

        for link in links {
            let location = link.location(role);
            if !location.is_finite() {
                debug!(link_id = link.id, "Skipping link with non-finite location");
                continue;
            }

            let (distance, index) = self.tree.nearest(&location);
            if self.params.distance_threshold >= 0.0 && distance > self.params.distance_threshold {
                continue;
            }
            if link.is_self_link() && !keep_self_links {
                continue;
            }

            let (connector_id, source) = self.resolve_connector(link, representatives);
            if suppressed.contains(&connector_id) {
                debug!(
                    skeleton_id = self.params.skeleton_id,
                    connector_id, "Skipping autapse"
                );
                continue;
            }

            let segment_id = link.segment(role);
            connectors.entry(connector_id).or_insert_with(|| ConnectorRecord {
                id: connector_id,
                location: source.pre.truncated(),
                source: source.clone(),
            });

            let candidate = Candidate {
                node_id: self.nodes[index].id,
                distance,
                source,
            };
            match closest.get_mut(&(segment_id, connector_id)) {
                Some(existing) if candidate.distance < existing.distance => *existing = candidate,
                Some(_) => {}
                None => {
                    order.push((segment_id, connector_id));
                    closest.insert((segment_id, connector_id), candidate);
                }
            }
        }

        order
            .into_iter()
            .filter_map(|key| closest.get(&key).map(|c| (key.1, c)))
            .map(|(connector_id, c)| {
                debug!(
                    node_id = c.node_id,
                    connector_id,
                    link_id = c.source.id,
                    %relation,
                    "Linked connector"
                );
                NodeLink {
                    node_id: c.node_id,
                    connector_id,
                    relation,
                }
            })
            .collect()
    }

    fn resolve_connector(
        &self,
        link: &SynapticLink,
        representatives: &HashMap<i32, SynapticLink>,
    ) -> (i64, SynapticLink) {
        let base = self.params.connector_id_offset;
        if link.is_clustered() {
            if let Some(rep) = representatives.get(&link.clust_con_offset) {
                return (encode_connector_id(base, link.clust_con_offset), rep.clone());
            }
        }
        (encode_connector_id(base, link.offset), link.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_skeleton() -> Vec<SkeletonNode> {
        vec![
            SkeletonNode::new(11, Point3::new(0.0, 0.0, 0.0)),
            SkeletonNode::new(12, Point3::new(10.0, 0.0, 0.0)),
            SkeletonNode::new(13, Point3::new(20.0, 0.0, 0.0)),
        ]
    }

    fn params() -> AssignParams {
        AssignParams::builder()
            .distance_threshold(5.0)
            .connector_id_offset(1_000)
            .skeleton_id(1)
            .build()
    }

    #[test]
    fn empty_skeleton_is_rejected() {
        let err = SynapseAssigner::new(vec![], params()).err().unwrap();
        assert!(matches!(err, CircuitMapError::InvalidInput(_)));
    }

    #[test]
    fn closest_candidate_wins_per_segment_and_connector() {
        let assigner = SynapseAssigner::new(line_skeleton(), params()).unwrap();
        // Both links resolve to connector of cluster 50 but land on different nodes.
        let far = SynapticLink::new(1, 7, 8, 1)
            .with_pre(Point3::new(14.0, 0.0, 0.0))
            .with_cluster(50);
        let near = SynapticLink::new(2, 7, 8, 2)
            .with_pre(Point3::new(1.0, 0.0, 0.0))
            .with_cluster(50);
        let reps = HashMap::from([(50, SynapticLink::new(3, 7, 8, 50))]);

        let out = assigner.assign(&[far, near], &[], &reps);
        assert_eq!(out.links.len(), 1);
        let link = out.links.iter().next().unwrap();
        assert_eq!(link.node_id, 11);
        assert_eq!(link.connector_id, 1_500);
    }

    #[test]
    fn repeated_links_on_one_node_yield_one_node_link() {
        let assigner = SynapseAssigner::new(line_skeleton(), params()).unwrap();
        // Same connector reached from two segments and twice from one of them.
        let links = [
            SynapticLink::new(1, 7, 8, 1).with_pre(Point3::new(9.0, 0.0, 0.0)).with_cluster(60),
            SynapticLink::new(2, 7, 8, 2).with_pre(Point3::new(11.0, 0.0, 0.0)).with_cluster(60),
            SynapticLink::new(3, 9, 8, 3).with_pre(Point3::new(10.5, 0.0, 0.0)).with_cluster(60),
        ];
        let reps = HashMap::from([(60, SynapticLink::new(4, 7, 8, 60))]);

        let out = assigner.assign(&links, &[], &reps);
        assert_eq!(out.links.len(), 1);
        assert_eq!(out.connectors.len(), 1);
        let link = out.links.iter().next().unwrap();
        assert_eq!((link.node_id, link.connector_id), (12, 1_600));
    }

    #[test]
    fn unlinked_connectors_are_dropped() {
        let assigner = SynapseAssigner::new(line_skeleton(), params()).unwrap();
        let far = SynapticLink::new(1, 7, 8, 1).with_pre(Point3::new(100.0, 0.0, 0.0));
        let out = assigner.assign(&[far], &[], &HashMap::new());
        assert!(out.is_empty());
    }
}
