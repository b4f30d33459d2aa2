use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use circuitmap_common::{
    decode_node_id, CircuitMapError, Config, LinkRole, Point3, Result, SkeletonNode,
};
use circuitmap_graph::{load_subgraph, postsynaptic_partners, presynaptic_partners};
use circuitmap_links::{cluster_offsets, LinkStore};
use circuitmap_spatial::{AssignParams, SynapseAssigner};

use crate::catalog::{CatalogStore, SkeletonWrite};
use crate::geometry::{GeometrySource, SegmentationSource};
use crate::jobs::JobStore;
use crate::request::{ImportRun, NewSegmentImport, RunProgress, Seed};
use crate::skeleton::build_tree;
use crate::status::ImportStatus;

/// Segment-derived skeletons follow their segment exactly, so their links are
/// assigned without a distance limit.
const UNBOUNDED: f64 = -1.0;

/// Background label in the segmentation.
const BACKGROUND: i64 = 0;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ImporterSettings {
    pub connector_id_offset: i64,
    /// Author of every catalog row written by an import.
    pub import_user_id: i64,
    #[builder(default)]
    pub ignored_segment_ids: BTreeSet<i64>,
    #[builder(default = 10)]
    pub progress_checkpoint_every: usize,
}

impl From<&Config> for ImporterSettings {
    fn from(config: &Config) -> Self {
        Self {
            connector_id_offset: config.connector_id_offset,
            import_user_id: config.import_user_id,
            ignored_segment_ids: config.ignored_segment_ids.clone(),
            progress_checkpoint_every: config.progress_checkpoint_every,
        }
    }
}

/// Result of importing one fragment (a segment's skeleton plus its synapses).
#[derive(Debug, Clone)]
struct Fragment {
    skeleton_id: i64,
    root: Point3,
    n_nodes: i32,
    synapses: SynapseOutcome,
}

#[derive(Debug, Clone, Copy, Default)]
struct SynapseOutcome {
    connectors: i32,
    links: i32,
    txid: Option<i64>,
}

/// Labels written with a newly created skeleton.
struct Labels<'a> {
    tags: &'a [String],
    annotations: &'a [String],
}

impl Labels<'static> {
    const NONE: Self = Labels {
        tags: &[],
        annotations: &[],
    };
}

#[derive(Clone, Copy)]
enum PartnerSide {
    Upstream,
    Downstream,
}

/// Runs import jobs end to end: geometry, synapse assignment, partner
/// fragments and the run's lifecycle in the job store.
pub struct Importer {
    links: Arc<dyn LinkStore>,
    catalog: Arc<dyn CatalogStore>,
    jobs: Arc<dyn JobStore>,
    geometry: Arc<dyn GeometrySource>,
    segmentation: Arc<dyn SegmentationSource>,
    settings: ImporterSettings,
}

impl Importer {
    pub fn new(
        links: Arc<dyn LinkStore>,
        catalog: Arc<dyn CatalogStore>,
        jobs: Arc<dyn JobStore>,
        geometry: Arc<dyn GeometrySource>,
        segmentation: Arc<dyn SegmentationSource>,
        settings: ImporterSettings,
    ) -> Self {
        Self {
            links,
            catalog,
            jobs,
            geometry,
            segmentation,
            settings,
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Execute a claimed run to a terminal status and return that status.
    ///
    /// Failures inside the run end it as `Error`; only failures to record the
    /// terminal status are returned as errors.
    pub async fn execute(
        &self,
        run: &ImportRun,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<ImportStatus> {
        let started = Instant::now();
        let mut progress = run.progress.clone();

        info!(run_id = run.id, seed = ?run.request.seed, "Import run started");
        let outcome = self.run_steps(run, &mut progress, shutdown).await;
        let runtime = started.elapsed().as_secs_f64();

        let (status, detail) = match outcome {
            Ok(()) if progress.has_data() => (ImportStatus::Done, String::new()),
            Ok(()) => (ImportStatus::NoData, String::new()),
            Err(e) => {
                error!(run_id = run.id, error = %e, "Import run failed");
                (ImportStatus::Error, e.to_string())
            }
        };

        if let Err(e) = self.jobs.update_progress(run.id, &progress).await {
            warn!(run_id = run.id, error = %e, "Failed to store final progress");
        }
        let updated = self.jobs.finish(run.id, status, &detail, runtime).await?;
        if !updated {
            warn!(run_id = run.id, %status, "Run was already terminal, status kept");
        }

        info!(
            run_id = run.id,
            %status,
            runtime_secs = runtime,
            connectors = progress.n_imported_connectors,
            links = progress.n_imported_links,
            upstream = progress.n_upstream_partners,
            downstream = progress.n_downstream_partners,
            "Import run finished"
        );
        Ok(status)
    }

    async fn run_steps(
        &self,
        run: &ImportRun,
        progress: &mut RunProgress,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<()> {
        match &run.request.seed {
            Seed::Segment { segment_id, .. } => {
                self.import_seed_segment(run, *segment_id, progress).await?;
                if run.request.wants_partners() {
                    self.import_partners(run, *segment_id, progress, shutdown)
                        .await?;
                }
                Ok(())
            }
            Seed::Skeleton { skeleton_id } => {
                self.import_for_skeleton(run, *skeleton_id, progress).await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Seeds
    // -----------------------------------------------------------------------

    async fn import_seed_segment(
        &self,
        run: &ImportRun,
        segment_id: i64,
        progress: &mut RunProgress,
    ) -> Result<()> {
        let records = self.jobs.segment_imports(run.id).await?;
        let [record] = records.as_slice() else {
            return Err(CircuitMapError::ImportConflict(format!(
                "run {} has {} segment import records, expected exactly one",
                run.id,
                records.len()
            )));
        };
        if record.segment_id != segment_id {
            return Err(CircuitMapError::ImportConflict(format!(
                "run {} seeds segment {segment_id} but its record names segment {}",
                run.id, record.segment_id
            )));
        }

        let labels = Labels {
            tags: &run.request.tags,
            annotations: &run.request.annotations,
        };
        let fragment = self.import_fragment(run, segment_id, &labels).await?;
        self.jobs
            .set_segment_nodes(record.id, fragment.n_nodes)
            .await?;

        progress.skeleton_id = Some(fragment.skeleton_id);
        progress.txid = fragment.synapses.txid;
        progress.n_imported_connectors += fragment.synapses.connectors;
        progress.n_imported_links += fragment.synapses.links;
        self.jobs.update_progress(run.id, progress).await
    }

    async fn import_for_skeleton(
        &self,
        run: &ImportRun,
        skeleton_id: i64,
        progress: &mut RunProgress,
    ) -> Result<()> {
        let project_id = run.request.project_id;
        let nodes = self.catalog.skeleton_nodes(project_id, skeleton_id).await?;
        if nodes.is_empty() {
            return Err(CircuitMapError::invalid(format!(
                "skeleton {skeleton_id} has no nodes in project {project_id}"
            )));
        }

        let segments = self.overlapping_segments(&nodes).await?;
        info!(
            run_id = run.id,
            skeleton_id,
            nodes = nodes.len(),
            segments = segments.len(),
            "Resolved segments overlapping skeleton"
        );

        let outcome = self
            .assign_and_write(
                run,
                skeleton_id,
                nodes,
                &segments,
                run.request.distance_threshold,
            )
            .await?;

        progress.skeleton_id = Some(skeleton_id);
        progress.txid = outcome.txid;
        progress.n_imported_connectors += outcome.connectors;
        progress.n_imported_links += outcome.links;
        self.jobs.update_progress(run.id, progress).await
    }

    /// Segments under any node of the skeleton, minus background and ignored IDs.
    async fn overlapping_segments(&self, nodes: &[SkeletonNode]) -> Result<BTreeSet<i64>> {
        let points: Vec<Point3> = nodes.iter().map(|n| n.location).collect();
        let per_node = self.segmentation.segments_at(&points).await?;

        let segments: BTreeSet<i64> = per_node
            .into_iter()
            .flatten()
            .filter(|s| *s != BACKGROUND && !self.settings.ignored_segment_ids.contains(s))
            .collect();
        Ok(segments)
    }

    // -----------------------------------------------------------------------
    // Fragments
    // -----------------------------------------------------------------------

    /// Import `segment_id`'s skeleton (or reuse a prior import) and assign its
    /// synapses to it.
    async fn import_fragment(
        &self,
        run: &ImportRun,
        segment_id: i64,
        labels: &Labels<'_>,
    ) -> Result<Fragment> {
        let project_id = run.request.project_id;
        let (skeleton_id, nodes) = match self
            .catalog
            .find_imported_skeleton(project_id, segment_id)
            .await?
        {
            Some(skeleton_id) => {
                debug!(segment_id, skeleton_id, "Segment already imported, reusing skeleton");
                let nodes = self.catalog.skeleton_nodes(project_id, skeleton_id).await?;
                (skeleton_id, nodes)
            }
            None => self.write_geometry(run, segment_id, labels).await?,
        };

        // The skeleton is rooted at its lowest encoded vertex of this segment.
        let root = nodes
            .iter()
            .filter(|n| {
                let (segment, _, project) = decode_node_id(n.id);
                segment == segment_id && project == project_id
            })
            .min_by_key(|n| n.id)
            .or_else(|| nodes.first())
            .map(|n| n.location)
            .ok_or_else(|| {
                CircuitMapError::invalid(format!("skeleton {skeleton_id} has no nodes"))
            })?;
        let n_nodes = i32::try_from(nodes.len()).unwrap_or(i32::MAX);

        let segments = BTreeSet::from([segment_id]);
        let synapses = self
            .assign_and_write(run, skeleton_id, nodes, &segments, UNBOUNDED)
            .await?;

        info!(
            run_id = run.id,
            segment_id,
            skeleton_id,
            nodes = n_nodes,
            connectors = synapses.connectors,
            links = synapses.links,
            "Imported fragment"
        );

        Ok(Fragment {
            skeleton_id,
            root,
            n_nodes,
            synapses,
        })
    }

    async fn write_geometry(
        &self,
        run: &ImportRun,
        segment_id: i64,
        labels: &Labels<'_>,
    ) -> Result<(i64, Vec<SkeletonNode>)> {
        let project_id = run.request.project_id;
        let geometry = self.geometry.skeleton(segment_id).await?;
        let tree = build_tree(segment_id, project_id, &geometry)?;
        if tree.n_discarded > 0 {
            debug!(
                segment_id,
                kept = tree.nodes.len(),
                discarded = tree.n_discarded,
                "Kept largest skeleton component"
            );
        }

        let write = SkeletonWrite {
            project_id,
            user_id: self.settings.import_user_id,
            segment_id,
            nodes: tree.nodes.clone(),
            tags: labels.tags.to_vec(),
            annotations: labels.annotations.to_vec(),
        };
        let outcome = self.catalog.write_skeleton(&write).await?;

        if outcome.created {
            Ok((outcome.skeleton_id, tree.skeleton_nodes()))
        } else {
            debug!(
                segment_id,
                skeleton_id = outcome.skeleton_id,
                "Concurrent import won, reusing its skeleton"
            );
            let nodes = self
                .catalog
                .skeleton_nodes(project_id, outcome.skeleton_id)
                .await?;
            Ok((outcome.skeleton_id, nodes))
        }
    }

    async fn assign_and_write(
        &self,
        run: &ImportRun,
        skeleton_id: i64,
        nodes: Vec<SkeletonNode>,
        segments: &BTreeSet<i64>,
        distance_threshold: f64,
    ) -> Result<SynapseOutcome> {
        let mut pre_links = Vec::new();
        let mut post_links = Vec::new();
        for &segment_id in segments {
            pre_links.extend(self.links.links_for(segment_id, LinkRole::Pre).await?);
            post_links.extend(self.links.links_for(segment_id, LinkRole::Post).await?);
        }

        let mut offsets = cluster_offsets(&pre_links);
        offsets.extend(cluster_offsets(&post_links));
        let representatives = self.links.representative_links_for(&offsets).await?;

        let params = AssignParams::builder()
            .distance_threshold(distance_threshold)
            .with_autapses(run.request.with_autapses)
            .connector_id_offset(self.settings.connector_id_offset)
            .skeleton_id(skeleton_id)
            .build();
        let assignment =
            SynapseAssigner::new(nodes, params)?.assign(&pre_links, &post_links, &representatives);

        if assignment.is_empty() {
            return Ok(SynapseOutcome::default());
        }

        let txid = self
            .catalog
            .write_synapses(
                run.request.project_id,
                self.settings.import_user_id,
                skeleton_id,
                &assignment,
            )
            .await?;

        Ok(SynapseOutcome {
            connectors: count(assignment.connectors.len()),
            links: count(assignment.links.len()),
            txid: Some(txid),
        })
    }

    // -----------------------------------------------------------------------
    // Partners
    // -----------------------------------------------------------------------

    async fn import_partners(
        &self,
        run: &ImportRun,
        seed: i64,
        progress: &mut RunProgress,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<()> {
        let request = &run.request;
        let graph = load_subgraph(self.links.as_ref(), seed, 0).await?;
        let mut imported: HashSet<i64> = HashSet::from([seed]);

        if request.fetch_upstream {
            self.jobs
                .set_status(run.id, ImportStatus::FetchPrePartners)
                .await?;
            let partners = presynaptic_partners(&graph, seed, request.upstream_syn_count);
            progress.n_expected_upstream = count(partners.len());
            self.jobs.update_progress(run.id, progress).await?;
            info!(run_id = run.id, seed, partners = partners.len(), "Importing upstream partners");
            self.drain_partners(run, partners, PartnerSide::Upstream, &mut imported, progress, shutdown)
                .await?;
        }

        if request.fetch_downstream {
            self.jobs
                .set_status(run.id, ImportStatus::FetchPostPartners)
                .await?;
            let partners = postsynaptic_partners(&graph, seed, request.downstream_syn_count);
            progress.n_expected_downstream = count(partners.len());
            self.jobs.update_progress(run.id, progress).await?;
            info!(run_id = run.id, seed, partners = partners.len(), "Importing downstream partners");
            self.drain_partners(run, partners, PartnerSide::Downstream, &mut imported, progress, shutdown)
                .await?;
        }

        Ok(())
    }

    async fn drain_partners(
        &self,
        run: &ImportRun,
        partners: BTreeSet<i64>,
        side: PartnerSide,
        imported: &mut HashSet<i64>,
        progress: &mut RunProgress,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<()> {
        let every = self.settings.progress_checkpoint_every.max(1);
        let mut queue: VecDeque<i64> = partners.into_iter().collect();
        let mut since_checkpoint = 0;

        while let Some(partner) = queue.pop_front() {
            if *shutdown.borrow() {
                return Err(CircuitMapError::Cancelled);
            }
            if !imported.insert(partner) {
                continue;
            }

            match self.import_partner(run, partner).await {
                Ok(fragment) => {
                    progress.n_imported_connectors += fragment.synapses.connectors;
                    progress.n_imported_links += fragment.synapses.links;
                    match side {
                        PartnerSide::Upstream => progress.n_upstream_partners += 1,
                        PartnerSide::Downstream => progress.n_downstream_partners += 1,
                    }
                }
                Err(e) => {
                    let failure = CircuitMapError::PartialFailure {
                        segment_id: partner,
                        detail: e.to_string(),
                    };
                    warn!(run_id = run.id, segment_id = partner, error = %failure, "Partner import failed");
                }
            }

            since_checkpoint += 1;
            if since_checkpoint >= every {
                self.jobs.update_progress(run.id, progress).await?;
                since_checkpoint = 0;
            }
        }

        self.jobs.update_progress(run.id, progress).await
    }

    async fn import_partner(&self, run: &ImportRun, segment_id: i64) -> Result<Fragment> {
        let fragment = self.import_fragment(run, segment_id, &Labels::NONE).await?;
        let record_id = self
            .jobs
            .record_segment_import(run.id, &NewSegmentImport::partner(segment_id, fragment.root))
            .await?;
        self.jobs
            .set_segment_nodes(record_id, fragment.n_nodes)
            .await?;
        Ok(fragment)
    }
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
