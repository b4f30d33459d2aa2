use std::collections::{BTreeSet, HashMap};

use circuitmap_common::{CircuitMapError, Point3, Relation, SkeletonNode, SynapticLink};
use circuitmap_spatial::{AssignParams, NodeLink, SynapseAssigner};

const BASE: i64 = 1_000_000;
const SKELETON: i64 = 77;

fn three_nodes() -> Vec<SkeletonNode> {
    vec![
        SkeletonNode::new(101, Point3::new(0.0, 0.0, 0.0)),
        SkeletonNode::new(102, Point3::new(10.0, 0.0, 0.0)),
        SkeletonNode::new(103, Point3::new(20.0, 0.0, 0.0)),
    ]
}

fn params(threshold: f64, with_autapses: bool) -> AssignParams {
    AssignParams::builder()
        .distance_threshold(threshold)
        .with_autapses(with_autapses)
        .connector_id_offset(BASE)
        .skeleton_id(SKELETON)
        .build()
}

fn assigner(threshold: f64, with_autapses: bool) -> SynapseAssigner {
    SynapseAssigner::new(three_nodes(), params(threshold, with_autapses)).unwrap()
}

fn pre_link(id: i64, pre_segment: i64, post_segment: i64, offset: i32, at: [f64; 3]) -> SynapticLink {
    SynapticLink::new(id, pre_segment, post_segment, offset).with_pre(at.into())
}

fn post_link(id: i64, pre_segment: i64, post_segment: i64, offset: i32, at: [f64; 3]) -> SynapticLink {
    SynapticLink::new(id, pre_segment, post_segment, offset)
        .with_pre(at.into())
        .with_post(at.into())
}

#[test]
fn single_presynaptic_link_near_first_node() {
    let out = assigner(5.0, false).assign(
        &[pre_link(1, 500, 600, 9, [1.0, 0.0, 0.0])],
        &[],
        &HashMap::new(),
    );

    assert_eq!(
        out.links,
        BTreeSet::from([NodeLink {
            node_id: 101,
            connector_id: BASE + 90,
            relation: Relation::PresynapticTo,
        }])
    );
    let connector = &out.connectors[&(BASE + 90)];
    assert_eq!(connector.location, Point3::new(1.0, 0.0, 0.0));
    assert_eq!(connector.source.id, 1);
}

#[test]
fn distinct_representatives_at_one_node_are_both_kept() {
    let a = pre_link(1, 500, 600, 11, [1.0, 0.0, 0.0]).with_cluster(40);
    let b = pre_link(2, 500, 700, 12, [0.5, 0.0, 0.0]).with_cluster(41);
    let reps = HashMap::from([
        (40, pre_link(3, 500, 600, 40, [2.4, 0.7, 0.0])),
        (41, pre_link(4, 500, 700, 41, [0.2, 0.0, 0.0])),
    ]);

    let out = assigner(5.0, false).assign(&[a, b], &[], &reps);
    assert_eq!(
        out.connectors_with(Relation::PresynapticTo),
        BTreeSet::from([BASE + 400, BASE + 410])
    );
    assert!(out.links.iter().all(|l| l.node_id == 101));
    assert_eq!(out.connectors[&(BASE + 400)].location, Point3::new(2.0, 0.0, 0.0));
    assert_eq!(out.connectors[&(BASE + 400)].source.id, 3);
}

#[test]
fn same_cluster_at_one_node_collapses_to_one_link() {
    let reps = HashMap::from([(30, pre_link(9, 500, 600, 30, [0.0, 0.0, 0.0]))]);
    let out = assigner(5.0, false).assign(
        &[
            pre_link(1, 500, 600, 1, [1.0, 0.0, 0.0]).with_cluster(30),
            pre_link(2, 500, 601, 2, [0.5, 0.0, 0.0]).with_cluster(30),
        ],
        &[],
        &reps,
    );
    assert_eq!(out.links.len(), 1);
    assert_eq!(out.connectors.keys().copied().collect::<Vec<_>>(), vec![BASE + 300]);
}

#[test]
fn missing_representative_falls_back_to_own_offset() {
    let link = pre_link(1, 500, 600, 3, [1.0, 0.0, 0.0]).with_cluster(99);
    let out = assigner(5.0, false).assign(&[link], &[], &HashMap::new());
    assert_eq!(out.connectors_with(Relation::PresynapticTo), BTreeSet::from([BASE + 30]));
}

#[test]
fn positive_threshold_excludes_far_links() {
    let links = [
        pre_link(1, 500, 600, 1, [0.0, 4.9, 0.0]),
        pre_link(2, 501, 600, 2, [0.0, 5.0, 0.0]),
        pre_link(3, 502, 600, 3, [0.0, 5.1, 0.0]),
    ];
    let out = assigner(5.0, false).assign(&links, &[], &HashMap::new());
    assert_eq!(
        out.connectors_with(Relation::PresynapticTo),
        BTreeSet::from([BASE + 10, BASE + 20])
    );
}

#[test]
fn negative_threshold_disables_distance_filter() {
    let links = [pre_link(1, 500, 600, 1, [0.0, 5000.0, 0.0])];
    let out = assigner(-1.0, false).assign(&links, &[], &HashMap::new());
    assert_eq!(out.links.len(), 1);
}

#[test]
fn post_pass_uses_postsynaptic_location() {
    let link = SynapticLink::new(1, 600, 500, 4)
        .with_pre(Point3::new(0.0, 0.0, 0.0))
        .with_post(Point3::new(19.0, 0.0, 0.0));
    let out = assigner(5.0, false).assign(&[], &[link], &HashMap::new());
    assert_eq!(
        out.links,
        BTreeSet::from([NodeLink {
            node_id: 103,
            connector_id: BASE + 40,
            relation: Relation::PostsynapticTo,
        }])
    );
    // Connector placed at the presynaptic side.
    assert_eq!(out.connectors[&(BASE + 40)].location, Point3::new(0.0, 0.0, 0.0));
}

#[test]
fn autapses_disabled_never_link_a_connector_both_ways() {
    // A link between two fragments of the same skeleton shows up in both passes.
    let link = SynapticLink::new(1, 500, 501, 6)
        .with_pre(Point3::new(0.0, 0.0, 0.0))
        .with_post(Point3::new(20.0, 0.0, 0.0));
    let self_link = post_link(2, 500, 500, 7, [10.0, 0.0, 0.0]);

    let out = assigner(5.0, false).assign(
        &[link.clone(), self_link.clone()],
        &[link, self_link],
        &HashMap::new(),
    );

    let pre = out.connectors_with(Relation::PresynapticTo);
    let post = out.connectors_with(Relation::PostsynapticTo);
    assert_eq!(pre, BTreeSet::from([BASE + 60]));
    assert!(post.is_empty());
    assert!(pre.is_disjoint(&post));
}

#[test]
fn autapses_enabled_keep_presynaptic_self_links() {
    let self_link = post_link(2, 500, 500, 7, [10.0, 0.0, 0.0]);
    let out = assigner(5.0, true).assign(
        &[self_link.clone()],
        &[self_link],
        &HashMap::new(),
    );
    assert_eq!(out.connectors_with(Relation::PresynapticTo), BTreeSet::from([BASE + 70]));
    // Self-links are always dropped from the postsynaptic pass.
    assert!(out.connectors_with(Relation::PostsynapticTo).is_empty());
}

#[test]
fn autapses_enabled_allow_connector_in_both_passes() {
    let link = SynapticLink::new(1, 500, 501, 6)
        .with_pre(Point3::new(0.0, 0.0, 0.0))
        .with_post(Point3::new(20.0, 0.0, 0.0));
    let out = assigner(5.0, true).assign(&[link.clone()], &[link], &HashMap::new());
    assert_eq!(out.links.len(), 2);
    assert_eq!(out.connectors.len(), 1);
}

#[test]
fn suppressed_autapse_does_not_block_later_candidate_at_same_node() {
    let crossing = SynapticLink::new(1, 500, 501, 6)
        .with_pre(Point3::new(0.0, 0.0, 0.0))
        .with_post(Point3::new(20.0, 0.0, 0.0));
    let incoming = post_link(2, 900, 501, 8, [19.0, 0.0, 0.0]);

    let out = assigner(5.0, false).assign(&[crossing.clone()], &[crossing, incoming], &HashMap::new());
    assert_eq!(out.connectors_with(Relation::PostsynapticTo), BTreeSet::from([BASE + 80]));
}

#[test]
fn assignment_is_idempotent() {
    let pre = vec![
        pre_link(1, 500, 600, 1, [1.0, 0.0, 0.0]),
        pre_link(2, 500, 601, 2, [9.0, 1.0, 0.0]).with_cluster(30),
        pre_link(3, 502, 602, 3, [21.0, 0.0, 0.0]),
    ];
    let post = vec![post_link(4, 700, 500, 4, [11.0, 0.0, 0.0])];
    let reps = HashMap::from([(30, pre_link(5, 500, 601, 30, [9.5, 0.5, 0.5]))]);

    let a = assigner(5.0, false);
    let first = a.assign(&pre, &post, &reps);
    let second = a.assign(&pre, &post, &reps);
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );

    let fresh = assigner(5.0, false).assign(&pre, &post, &reps);
    assert_eq!(first, fresh);
}

#[test]
fn non_finite_skeleton_node_is_rejected() {
    let mut nodes = three_nodes();
    nodes[1].location.y = f64::INFINITY;
    let err = SynapseAssigner::new(nodes, params(5.0, false)).err().unwrap();
    assert!(matches!(err, CircuitMapError::InvalidInput(_)));
}
