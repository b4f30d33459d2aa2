use serde::{Deserialize, Serialize};

// --- Geometry ---

/// A point in dataset (physical) space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Point3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Truncate each coordinate toward zero (integer voxel placement).
    pub fn truncated(&self) -> Point3 {
        Point3::new(self.x.trunc(), self.y.trunc(), self.z.trunc())
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for Point3 {
    fn from(p: [f64; 3]) -> Self {
        Point3::new(p[0], p[1], p[2])
    }
}

// --- Synaptic links ---

/// Which side of a synaptic link a segment is looked up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRole {
    Pre,
    Post,
}

impl std::fmt::Display for LinkRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkRole::Pre => write!(f, "pre"),
            LinkRole::Post => write!(f, "post"),
        }
    }
}

/// One raw synaptic link from the precomputed segmentation link table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynapticLink {
    pub id: i64,
    pub segmentid_pre: i64,
    pub segmentid_post: i64,
    pub pre: Point3,
    pub post: Point3,
    pub scores: f64,
    pub cleft_scores: i32,
    pub cleft_id: i64,
    pub dist: f64,
    /// Offset of this link's cluster representative; 0 when not clustered.
    pub clust_con_offset: i32,
    /// Unique offset identifying this link.
    pub offset: i32,
    pub prob_min: i32,
    pub prob_max: i32,
    pub prob_sum: i32,
    pub prob_mean: i32,
    pub prob_count: i32,
}

impl SynapticLink {
    /// Minimal link with zeroed score fields.
    pub fn new(id: i64, segmentid_pre: i64, segmentid_post: i64, offset: i32) -> Self {
        Self {
            id,
            segmentid_pre,
            segmentid_post,
            pre: Point3::default(),
            post: Point3::default(),
            scores: 0.0,
            cleft_scores: 0,
            cleft_id: 0,
            dist: 0.0,
            clust_con_offset: 0,
            offset,
            prob_min: 0,
            prob_max: 0,
            prob_sum: 0,
            prob_mean: 0,
            prob_count: 0,
        }
    }

    pub fn with_pre(mut self, pre: Point3) -> Self {
        self.pre = pre;
        self
    }

    pub fn with_post(mut self, post: Point3) -> Self {
        self.post = post;
        self
    }

    pub fn with_cluster(mut self, clust_con_offset: i32) -> Self {
        self.clust_con_offset = clust_con_offset;
        self
    }

    pub fn is_self_link(&self) -> bool {
        self.segmentid_pre == self.segmentid_post
    }

    pub fn is_clustered(&self) -> bool {
        self.clust_con_offset > 0
    }

    /// The segment playing `role` in this link.
    pub fn segment(&self, role: LinkRole) -> i64 {
        match role {
            LinkRole::Pre => self.segmentid_pre,
            LinkRole::Post => self.segmentid_post,
        }
    }

    /// The segment on the opposite side of `role`.
    pub fn partner(&self, role: LinkRole) -> i64 {
        match role {
            LinkRole::Pre => self.segmentid_post,
            LinkRole::Post => self.segmentid_pre,
        }
    }

    pub fn location(&self, role: LinkRole) -> Point3 {
        match role {
            LinkRole::Pre => self.pre,
            LinkRole::Post => self.post,
        }
    }
}

// --- Skeletons ---

/// A node of a target skeleton, as consumed by spatial assignment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkeletonNode {
    pub id: i64,
    pub location: Point3,
}

impl SkeletonNode {
    pub const fn new(id: i64, location: Point3) -> Self {
        Self { id, location }
    }
}

/// Direction of a skeleton node's participation in a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    PresynapticTo,
    PostsynapticTo,
}

impl Relation {
    /// Relation name as stored in the host application's relation table.
    pub fn name(&self) -> &'static str {
        match self {
            Relation::PresynapticTo => "presynaptic_to",
            Relation::PostsynapticTo => "postsynaptic_to",
        }
    }

    /// The link role whose segment shares this relation with the skeleton.
    pub fn role(&self) -> LinkRole {
        match self {
            Relation::PresynapticTo => LinkRole::Pre,
            Relation::PostsynapticTo => LinkRole::Post,
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
