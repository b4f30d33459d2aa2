use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use circuitmap_common::Point3;

use crate::status::ImportStatus;

/// Source label of the segment import record created with a segment-seeded run.
pub const SEED_SOURCE: &str = "seed";
/// Source label of segment import records created for partner fragments.
pub const PARTNER_SOURCE: &str = "partner";

/// What a run starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Seed {
    /// A segment picked at a location in the dataset.
    Segment {
        segment_id: i64,
        voxel: Point3,
        physical: Point3,
    },
    /// A skeleton already present in the catalog.
    Skeleton { skeleton_id: i64 },
}

/// Parameters of one reconciliation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct ImportRequest {
    pub seed: Seed,
    pub project_id: i64,
    pub user_id: i64,
    /// Link-to-node distance limit for skeleton-seeded runs. Negative disables it.
    #[builder(default = 1000.0)]
    pub distance_threshold: f64,
    #[builder(default = 5)]
    pub upstream_syn_count: u32,
    #[builder(default = 5)]
    pub downstream_syn_count: u32,
    #[builder(default = false)]
    pub fetch_upstream: bool,
    #[builder(default = false)]
    pub fetch_downstream: bool,
    #[builder(default = false)]
    pub with_autapses: bool,
    #[builder(default)]
    pub tags: Vec<String>,
    #[builder(default)]
    pub annotations: Vec<String>,
    /// Hash of the front-end widget that started the run.
    #[builder(default, setter(strip_option))]
    pub request_id: Option<String>,
}

impl ImportRequest {
    pub fn wants_partners(&self) -> bool {
        self.fetch_upstream || self.fetch_downstream
    }
}

/// Running counters of a run, checkpointed to the job store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub n_imported_connectors: i32,
    pub n_imported_links: i32,
    pub n_upstream_partners: i32,
    pub n_downstream_partners: i32,
    pub n_expected_upstream: i32,
    pub n_expected_downstream: i32,
    pub skeleton_id: Option<i64>,
    /// Transaction of the seed's synapse write.
    pub txid: Option<i64>,
}

impl RunProgress {
    pub fn has_data(&self) -> bool {
        self.n_imported_connectors > 0
            || self.n_imported_links > 0
            || self.n_upstream_partners > 0
            || self.n_downstream_partners > 0
    }
}

/// A persisted import run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: i64,
    pub request: ImportRequest,
    pub status: ImportStatus,
    pub status_detail: String,
    /// Seconds from claim to terminal state.
    pub runtime: Option<f64>,
    pub progress: RunProgress,
    pub created_at: DateTime<Utc>,
}

/// A fragment imported within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentImport {
    pub id: i64,
    pub import_id: i64,
    pub source: String,
    pub segment_id: i64,
    pub voxel: Point3,
    pub physical: Point3,
    pub n_nodes: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSegmentImport {
    pub source: String,
    pub segment_id: i64,
    pub voxel: Point3,
    pub physical: Point3,
}

impl NewSegmentImport {
    /// The record created alongside a segment-seeded run, if any.
    pub fn for_seed(seed: &Seed) -> Option<Self> {
        match seed {
            Seed::Segment {
                segment_id,
                voxel,
                physical,
            } => Some(Self {
                source: SEED_SOURCE.to_string(),
                segment_id: *segment_id,
                voxel: *voxel,
                physical: *physical,
            }),
            Seed::Skeleton { .. } => None,
        }
    }

    /// A partner fragment, located at its skeleton root.
    pub fn partner(segment_id: i64, root: Point3) -> Self {
        Self {
            source: PARTNER_SOURCE.to_string(),
            segment_id,
            voxel: root,
            physical: root,
        }
    }
}
