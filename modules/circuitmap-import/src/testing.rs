// Test doubles for the import pipeline.
//
// One per trait boundary the importer talks to:
// - MockGeometry (GeometrySource): segment -> skeleton geometry map
// - MockSegmentation (SegmentationSource): location -> segments map
// - MemoryCatalog (CatalogStore): stateful in-memory skeleton and connector tables
// - MemoryJobStore (JobStore): in-memory runs with a status history
//
// Links come from circuitmap_links::MemoryLinkStore.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use circuitmap_common::{decode_node_id, CircuitMapError, Point3, Result, SkeletonNode};
use circuitmap_spatial::{Assignment, ConnectorRecord, NodeLink};

use crate::catalog::{CatalogStore, SkeletonWrite, SkeletonWriteOutcome};
use crate::geometry::{GeometrySource, SegmentGeometry, SegmentationSource};
use crate::jobs::JobStore;
use crate::request::{ImportRequest, ImportRun, NewSegmentImport, RunProgress, SegmentImport};
use crate::status::ImportStatus;

/// A straight chain of `n` vertices starting at `start`, one unit apart along x.
pub fn chain(start: Point3, n: usize) -> SegmentGeometry {
    SegmentGeometry {
        vertices: (0..n)
            .map(|i| Point3::new(start.x + i as f64, start.y, start.z))
            .collect(),
        radii: vec![1.0; n],
        edges: (1..n).map(|i| (i - 1, i)).collect(),
    }
}

// ---------------------------------------------------------------------------
// MockGeometry
// ---------------------------------------------------------------------------

/// Segment geometry by ID. Unregistered segments fail with `InvalidInput`,
/// segments marked with `.failing()` with `StoreUnavailable`.
#[derive(Default)]
pub struct MockGeometry {
    skeletons: HashMap<i64, SegmentGeometry>,
    failing: HashSet<i64>,
    fetched: Mutex<Vec<i64>>,
}

impl MockGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_segment(mut self, segment_id: i64, geometry: SegmentGeometry) -> Self {
        self.skeletons.insert(segment_id, geometry);
        self
    }

    pub fn failing(mut self, segment_id: i64) -> Self {
        self.failing.insert(segment_id);
        self
    }

    /// Segments fetched so far, in call order.
    pub fn fetched(&self) -> Vec<i64> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl GeometrySource for MockGeometry {
    async fn skeleton(&self, segment_id: i64) -> Result<SegmentGeometry> {
        self.fetched.lock().unwrap().push(segment_id);
        if self.failing.contains(&segment_id) {
            return Err(CircuitMapError::unavailable(format!(
                "MockGeometry: segment {segment_id} is failing"
            )));
        }
        self.skeletons.get(&segment_id).cloned().ok_or_else(|| {
            CircuitMapError::invalid(format!("MockGeometry: no skeleton for segment {segment_id}"))
        })
    }
}

// ---------------------------------------------------------------------------
// MockSegmentation
// ---------------------------------------------------------------------------

/// Segments under a location, keyed by the truncated coordinates.
/// Unregistered locations are background.
#[derive(Default)]
pub struct MockSegmentation {
    segments: HashMap<(i64, i64, i64), Vec<i64>>,
}

impl MockSegmentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_point(mut self, point: Point3, segments: Vec<i64>) -> Self {
        self.segments.insert(key(&point), segments);
        self
    }
}

fn key(p: &Point3) -> (i64, i64, i64) {
    (p.x.trunc() as i64, p.y.trunc() as i64, p.z.trunc() as i64)
}

#[async_trait]
impl SegmentationSource for MockSegmentation {
    async fn segments_at(&self, points: &[Point3]) -> Result<Vec<Vec<i64>>> {
        Ok(points
            .iter()
            .map(|p| self.segments.get(&key(p)).cloned().unwrap_or_else(|| vec![0]))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryCatalog
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CatalogState {
    /// node id -> (project, skeleton, location)
    treenodes: BTreeMap<i64, (i64, i64, Point3)>,
    next_skeleton_id: i64,
    skeleton_writes: usize,
    connectors: BTreeMap<i64, ConnectorRecord>,
    links: BTreeSet<(i64, NodeLink)>,
    tags: Vec<(i64, String)>,
    annotations: Vec<(i64, String)>,
    txid: i64,
    race_next_write: bool,
}

/// In-memory catalog with the same conflict rules as the Postgres one:
/// treenodes, connectors and node links are never written twice.
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CatalogState {
                next_skeleton_id: 1000,
                txid: 500,
                ..Default::default()
            }),
        }
    }

    /// Seed an existing skeleton.
    pub fn with_skeleton(self, project_id: i64, skeleton_id: i64, nodes: &[SkeletonNode]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for node in nodes {
                state
                    .treenodes
                    .insert(node.id, (project_id, skeleton_id, node.location));
            }
        }
        self
    }

    /// Make the next `write_skeleton` lose against a concurrent writer that
    /// creates the same nodes first.
    pub fn race_next_write(&self) {
        self.state.lock().unwrap().race_next_write = true;
    }

    /// Number of `write_skeleton` calls that created a skeleton.
    pub fn skeleton_writes(&self) -> usize {
        self.state.lock().unwrap().skeleton_writes
    }

    pub fn skeleton_of(&self, node_id: i64) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .treenodes
            .get(&node_id)
            .map(|(_, skeleton_id, _)| *skeleton_id)
    }

    pub fn node_count(&self, skeleton_id: i64) -> usize {
        self.state
            .lock()
            .unwrap()
            .treenodes
            .values()
            .filter(|(_, s, _)| *s == skeleton_id)
            .count()
    }

    pub fn connectors(&self) -> BTreeMap<i64, ConnectorRecord> {
        self.state.lock().unwrap().connectors.clone()
    }

    /// Node links written for `skeleton_id`.
    pub fn links_of(&self, skeleton_id: i64) -> Vec<NodeLink> {
        self.state
            .lock()
            .unwrap()
            .links
            .iter()
            .filter(|(s, _)| *s == skeleton_id)
            .map(|(_, l)| *l)
            .collect()
    }

    pub fn tags(&self) -> Vec<(i64, String)> {
        self.state.lock().unwrap().tags.clone()
    }

    pub fn annotations(&self) -> Vec<(i64, String)> {
        self.state.lock().unwrap().annotations.clone()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn find_imported_skeleton(&self, project_id: i64, segment_id: i64) -> Result<Option<i64>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .treenodes
            .iter()
            .filter(|(id, (p, _, _))| {
                let (segment, _, project) = decode_node_id(**id);
                *p == project_id && segment == segment_id && project == project_id
            })
            .min_by_key(|(id, _)| **id)
            .map(|(_, (_, skeleton_id, _))| *skeleton_id))
    }

    async fn skeleton_nodes(&self, project_id: i64, skeleton_id: i64) -> Result<Vec<SkeletonNode>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .treenodes
            .iter()
            .filter(|(_, (p, s, _))| *p == project_id && *s == skeleton_id)
            .map(|(id, (_, _, location))| SkeletonNode::new(*id, *location))
            .collect())
    }

    async fn write_skeleton(&self, write: &SkeletonWrite) -> Result<SkeletonWriteOutcome> {
        let mut state = self.state.lock().unwrap();
        let root = write
            .nodes
            .first()
            .ok_or_else(|| CircuitMapError::invalid("skeleton write without nodes"))?;

        if std::mem::take(&mut state.race_next_write) {
            state.next_skeleton_id += 1;
            let winner = state.next_skeleton_id;
            for node in &write.nodes {
                state
                    .treenodes
                    .insert(node.id, (write.project_id, winner, node.location));
            }
        }

        if let Some((_, existing, _)) = state.treenodes.get(&root.id) {
            return Ok(SkeletonWriteOutcome {
                skeleton_id: *existing,
                created: false,
            });
        }

        state.next_skeleton_id += 1;
        let skeleton_id = state.next_skeleton_id;
        for node in &write.nodes {
            state
                .treenodes
                .entry(node.id)
                .or_insert((write.project_id, skeleton_id, node.location));
        }
        for tag in &write.tags {
            state.tags.push((root.id, tag.clone()));
        }
        for annotation in &write.annotations {
            state.annotations.push((skeleton_id, annotation.clone()));
        }
        state.skeleton_writes += 1;

        Ok(SkeletonWriteOutcome {
            skeleton_id,
            created: true,
        })
    }

    async fn write_synapses(
        &self,
        _project_id: i64,
        _user_id: i64,
        skeleton_id: i64,
        assignment: &Assignment,
    ) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        for (id, connector) in &assignment.connectors {
            state.connectors.entry(*id).or_insert_with(|| connector.clone());
        }
        for link in &assignment.links {
            state.links.insert((skeleton_id, *link));
        }
        state.txid += 1;
        Ok(state.txid)
    }
}

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct JobState {
    runs: BTreeMap<i64, ImportRun>,
    segment_imports: Vec<SegmentImport>,
    history: Vec<(i64, ImportStatus)>,
    progress_writes: usize,
    next_id: i64,
}

impl JobState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn run_mut(&mut self, run_id: i64) -> Result<&mut ImportRun> {
        self.runs
            .get_mut(&run_id)
            .ok_or_else(|| CircuitMapError::ImportConflict(format!("import run {run_id} not found")))
    }
}

/// In-memory job store with the same transition rules as the Postgres one.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<JobState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status a run has been moved to, in order.
    pub fn history(&self, run_id: i64) -> Vec<ImportStatus> {
        self.state
            .lock()
            .unwrap()
            .history
            .iter()
            .filter(|(id, _)| *id == run_id)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn run(&self, run_id: i64) -> Option<ImportRun> {
        self.state.lock().unwrap().runs.get(&run_id).cloned()
    }

    /// Number of `update_progress` calls so far.
    pub fn progress_writes(&self) -> usize {
        self.state.lock().unwrap().progress_writes
    }

    /// Overwrite a run's status without transition checks.
    pub fn force_status(&self, run_id: i64, status: ImportStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(run) = state.runs.get_mut(&run_id) {
            run.status = status;
        }
        state.history.push((run_id, status));
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, request: &ImportRequest) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        let run_id = state.next_id();
        state.runs.insert(
            run_id,
            ImportRun {
                id: run_id,
                request: request.clone(),
                status: ImportStatus::Created,
                status_detail: String::new(),
                runtime: None,
                progress: RunProgress::default(),
                created_at: Utc::now(),
            },
        );
        state.history.push((run_id, ImportStatus::Created));

        if let Some(record) = NewSegmentImport::for_seed(&request.seed) {
            let id = state.next_id();
            state.segment_imports.push(SegmentImport {
                id,
                import_id: run_id,
                source: record.source,
                segment_id: record.segment_id,
                voxel: record.voxel,
                physical: record.physical,
                n_nodes: 0,
            });
        }

        state.run_mut(run_id)?.status = ImportStatus::Queued;
        state.history.push((run_id, ImportStatus::Queued));
        Ok(run_id)
    }

    async fn claim_next(&self) -> Result<Option<ImportRun>> {
        let mut state = self.state.lock().unwrap();
        let Some(run) = state
            .runs
            .values_mut()
            .find(|r| r.status == ImportStatus::Queued)
        else {
            return Ok(None);
        };
        run.status = ImportStatus::Computing;
        let run = run.clone();
        state.history.push((run.id, ImportStatus::Computing));
        Ok(Some(run))
    }

    async fn get(&self, run_id: i64) -> Result<Option<ImportRun>> {
        Ok(self.run(run_id))
    }

    async fn segment_imports(&self, run_id: i64) -> Result<Vec<SegmentImport>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .segment_imports
            .iter()
            .filter(|s| s.import_id == run_id)
            .cloned()
            .collect())
    }

    async fn record_segment_import(&self, run_id: i64, record: &NewSegmentImport) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        state.run_mut(run_id)?;
        let id = state.next_id();
        state.segment_imports.push(SegmentImport {
            id,
            import_id: run_id,
            source: record.source.clone(),
            segment_id: record.segment_id,
            voxel: record.voxel,
            physical: record.physical,
            n_nodes: 0,
        });
        Ok(id)
    }

    async fn set_segment_nodes(&self, segment_import_id: i64, n_nodes: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state
            .segment_imports
            .iter_mut()
            .find(|s| s.id == segment_import_id)
        {
            record.n_nodes = n_nodes;
        }
        Ok(())
    }

    async fn set_status(&self, run_id: i64, status: ImportStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let run = state.run_mut(run_id)?;
        if !run.status.can_transition_to(status) {
            return Err(CircuitMapError::ImportConflict(format!(
                "import run {run_id} cannot move from {} to {status}",
                run.status
            )));
        }
        run.status = status;
        state.history.push((run_id, status));
        Ok(())
    }

    async fn update_progress(&self, run_id: i64, progress: &RunProgress) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.run_mut(run_id)?.progress = progress.clone();
        state.progress_writes += 1;
        Ok(())
    }

    async fn finish(
        &self,
        run_id: i64,
        status: ImportStatus,
        detail: &str,
        runtime_secs: f64,
    ) -> Result<bool> {
        if !status.is_terminal() {
            return Err(CircuitMapError::invalid(format!(
                "{status} is not a terminal status"
            )));
        }
        let mut state = self.state.lock().unwrap();
        let run = state.run_mut(run_id)?;
        if !run.status.can_transition_to(status) {
            return Ok(false);
        }
        run.status = status;
        run.status_detail = detail.to_string();
        run.runtime = Some(runtime_secs);
        state.history.push((run_id, status));
        Ok(true)
    }
}
