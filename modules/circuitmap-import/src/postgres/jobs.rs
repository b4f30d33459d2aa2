use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};

use circuitmap_common::{CircuitMapError, Point3, Result};

use crate::jobs::JobStore;
use crate::request::{
    ImportRequest, ImportRun, NewSegmentImport, RunProgress, SegmentImport, Seed, SEED_SOURCE,
};
use crate::status::ImportStatus;

use super::{bounded, db_err, DEFAULT_QUERY_TIMEOUT};

const SELECT_RUN: &str = r#"
    SELECT r.id, r.user_id, r.project_id, r.request_id, r.seed_segment_id, r.seed_skeleton_id,
           r.skeleton_id, r.status, r.status_detail, r.runtime, r.distance_threshold,
           r.with_autapses, r.upstream_syn_count, r.downstream_syn_count,
           r.fetch_upstream, r.fetch_downstream, r.tags, r.annotations,
           r.n_imported_connectors, r.n_imported_links, r.n_upstream_partners,
           r.n_downstream_partners, r.n_expected_upstream, r.n_expected_downstream,
           r.txid, r.created_at,
           s.voxel_x, s.voxel_y, s.voxel_z, s.physical_x, s.physical_y, s.physical_z
    FROM circuitmap_synapseimport r
    LEFT JOIN LATERAL (
        SELECT voxel_x, voxel_y, voxel_z, physical_x, physical_y, physical_z
        FROM circuitmap_segmentimport
        WHERE import_id = r.id AND source = 'seed'
        ORDER BY id
        LIMIT 1
    ) s ON TRUE
    WHERE r.id = $1
"#;

/// Import runs in `circuitmap_synapseimport` and `circuitmap_segmentimport`.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Bound every call, transaction included, by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Guarded status write: only applies while the run is not terminal and
    /// the transition is allowed. Returns whether a row changed.
    async fn transition(
        &self,
        run_id: i64,
        status: ImportStatus,
        detail: Option<&str>,
        runtime_secs: Option<f64>,
    ) -> Result<bool> {
        bounded(self.timeout, "status transition", async {
            let mut tx = self.pool.begin().await.map_err(db_err)?;

            let current = sqlx::query_scalar::<_, i16>(
                "SELECT status FROM circuitmap_synapseimport WHERE id = $1 FOR UPDATE",
            )
            .bind(run_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| {
                CircuitMapError::ImportConflict(format!("import run {run_id} not found"))
            })?;

            let current = ImportStatus::from_code(current)?;
            if !current.can_transition_to(status) {
                tx.rollback().await.map_err(db_err)?;
                debug!(run_id, %current, %status, "Refused status transition");
                return Ok(false);
            }

            sqlx::query(
                r#"
                UPDATE circuitmap_synapseimport
                SET status = $2,
                    status_detail = COALESCE($3, status_detail),
                    runtime = COALESCE($4, runtime),
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(run_id)
            .bind(status.code())
            .bind(detail)
            .bind(runtime_secs)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            tx.commit().await.map_err(db_err)?;
            Ok(true)
        })
        .await
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, request: &ImportRequest) -> Result<i64> {
        bounded(self.timeout, "enqueue run", async {
            let (seed_segment_id, seed_skeleton_id) = match &request.seed {
                Seed::Segment { segment_id, .. } => (Some(*segment_id), None),
                Seed::Skeleton { skeleton_id } => (None, Some(*skeleton_id)),
            };

            let mut tx = self.pool.begin().await.map_err(db_err)?;

            let run_id = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO circuitmap_synapseimport
                    (user_id, project_id, request_id, seed_segment_id, seed_skeleton_id, status,
                     distance_threshold, with_autapses, upstream_syn_count, downstream_syn_count,
                     fetch_upstream, fetch_downstream, tags, annotations)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                RETURNING id
                "#,
            )
            .bind(request.user_id)
            .bind(request.project_id)
            .bind(&request.request_id)
            .bind(seed_segment_id)
            .bind(seed_skeleton_id)
            .bind(ImportStatus::Created.code())
            .bind(request.distance_threshold)
            .bind(request.with_autapses)
            .bind(to_i32(request.upstream_syn_count))
            .bind(to_i32(request.downstream_syn_count))
            .bind(request.fetch_upstream)
            .bind(request.fetch_downstream)
            .bind(&request.tags)
            .bind(&request.annotations)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

            if let Some(record) = NewSegmentImport::for_seed(&request.seed) {
                insert_segment_import(&mut tx, run_id, &record).await?;
            }

            // Claimable only once the seed record exists.
            sqlx::query(
                "UPDATE circuitmap_synapseimport SET status = $2 WHERE id = $1 AND status = $3",
            )
            .bind(run_id)
            .bind(ImportStatus::Queued.code())
            .bind(ImportStatus::Created.code())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            tx.commit().await.map_err(db_err)?;
            info!(run_id, seed = ?request.seed, "Queued import run");
            Ok(run_id)
        })
        .await
    }

    async fn claim_next(&self) -> Result<Option<ImportRun>> {
        bounded(self.timeout, "claim run", async {
            let claimed = sqlx::query_scalar::<_, i64>(
                r#"
                UPDATE circuitmap_synapseimport
                SET status = $1, updated_at = now()
                WHERE id = (
                    SELECT id FROM circuitmap_synapseimport
                    WHERE status = $2
                    ORDER BY id
                    FOR UPDATE SKIP LOCKED
                    LIMIT 1
                )
                RETURNING id
                "#,
            )
            .bind(ImportStatus::Computing.code())
            .bind(ImportStatus::Queued.code())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

            match claimed {
                Some(run_id) => self.get(run_id).await,
                None => Ok(None),
            }
        })
        .await
    }

    async fn get(&self, run_id: i64) -> Result<Option<ImportRun>> {
        bounded(self.timeout, "load run", async {
            let row = sqlx::query_as::<_, RunRow>(SELECT_RUN)
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            row.map(ImportRun::try_from).transpose()
        })
        .await
    }

    async fn segment_imports(&self, run_id: i64) -> Result<Vec<SegmentImport>> {
        bounded(self.timeout, "load segment imports", async {
            let rows = sqlx::query_as::<_, SegmentImportRow>(
                r#"
                SELECT id, import_id, source, segment_id,
                       voxel_x, voxel_y, voxel_z, physical_x, physical_y, physical_z, n_nodes
                FROM circuitmap_segmentimport
                WHERE import_id = $1
                ORDER BY id
                "#,
            )
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(rows.into_iter().map(SegmentImport::from).collect())
        })
        .await
    }

    async fn record_segment_import(&self, run_id: i64, record: &NewSegmentImport) -> Result<i64> {
        bounded(self.timeout, "record segment import", async {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let id = insert_segment_import(&mut tx, run_id, record).await?;
            tx.commit().await.map_err(db_err)?;
            Ok(id)
        })
        .await
    }

    async fn set_segment_nodes(&self, segment_import_id: i64, n_nodes: i32) -> Result<()> {
        bounded(self.timeout, "store node count", async {
            sqlx::query("UPDATE circuitmap_segmentimport SET n_nodes = $2 WHERE id = $1")
                .bind(segment_import_id)
                .bind(n_nodes)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn set_status(&self, run_id: i64, status: ImportStatus) -> Result<()> {
        if self.transition(run_id, status, None, None).await? {
            Ok(())
        } else {
            Err(CircuitMapError::ImportConflict(format!(
                "import run {run_id} cannot move to {status}"
            )))
        }
    }

    async fn update_progress(&self, run_id: i64, progress: &RunProgress) -> Result<()> {
        bounded(self.timeout, "store progress", async {
            sqlx::query(
                r#"
                UPDATE circuitmap_synapseimport
                SET n_imported_connectors = $2,
                    n_imported_links = $3,
                    n_upstream_partners = $4,
                    n_downstream_partners = $5,
                    n_expected_upstream = $6,
                    n_expected_downstream = $7,
                    skeleton_id = COALESCE($8, skeleton_id),
                    txid = COALESCE($9, txid),
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(run_id)
            .bind(progress.n_imported_connectors)
            .bind(progress.n_imported_links)
            .bind(progress.n_upstream_partners)
            .bind(progress.n_downstream_partners)
            .bind(progress.n_expected_upstream)
            .bind(progress.n_expected_downstream)
            .bind(progress.skeleton_id)
            .bind(progress.txid)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(())
        })
        .await
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
        self.transition(run_id, status, Some(detail), Some(runtime_secs))
            .await
    }
}

async fn insert_segment_import(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    run_id: i64,
    record: &NewSegmentImport,
) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO circuitmap_segmentimport
            (import_id, source, segment_id, voxel_x, voxel_y, voxel_z,
             physical_x, physical_y, physical_z)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
        "#,
    )
    .bind(run_id)
    .bind(&record.source)
    .bind(record.segment_id)
    .bind(record.voxel.x)
    .bind(record.voxel.y)
    .bind(record.voxel.z)
    .bind(record.physical.x)
    .bind(record.physical.y)
    .bind(record.physical.z)
    .fetch_one(&mut **tx)
    .await
    .map_err(db_err)
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct RunRow {
    id: i64,
    user_id: i64,
    project_id: i64,
    request_id: Option<String>,
    seed_segment_id: Option<i64>,
    seed_skeleton_id: Option<i64>,
    skeleton_id: Option<i64>,
    status: i16,
    status_detail: String,
    runtime: Option<f64>,
    distance_threshold: f64,
    with_autapses: bool,
    upstream_syn_count: i32,
    downstream_syn_count: i32,
    fetch_upstream: bool,
    fetch_downstream: bool,
    tags: Vec<String>,
    annotations: Vec<String>,
    n_imported_connectors: i32,
    n_imported_links: i32,
    n_upstream_partners: i32,
    n_downstream_partners: i32,
    n_expected_upstream: i32,
    n_expected_downstream: i32,
    txid: Option<i64>,
    created_at: DateTime<Utc>,
    voxel_x: Option<f64>,
    voxel_y: Option<f64>,
    voxel_z: Option<f64>,
    physical_x: Option<f64>,
    physical_y: Option<f64>,
    physical_z: Option<f64>,
}

impl TryFrom<RunRow> for ImportRun {
    type Error = CircuitMapError;

    fn try_from(r: RunRow) -> Result<Self> {
        let point = |x: Option<f64>, y: Option<f64>, z: Option<f64>| {
            Point3::new(x.unwrap_or(0.0), y.unwrap_or(0.0), z.unwrap_or(0.0))
        };
        let seed = match (r.seed_segment_id, r.seed_skeleton_id) {
            (Some(segment_id), None) => Seed::Segment {
                segment_id,
                voxel: point(r.voxel_x, r.voxel_y, r.voxel_z),
                physical: point(r.physical_x, r.physical_y, r.physical_z),
            },
            (None, Some(skeleton_id)) => Seed::Skeleton { skeleton_id },
            _ => {
                return Err(CircuitMapError::ImportConflict(format!(
                    "import run {} does not name exactly one seed",
                    r.id
                )))
            }
        };

        Ok(ImportRun {
            id: r.id,
            request: ImportRequest {
                seed,
                project_id: r.project_id,
                user_id: r.user_id,
                distance_threshold: r.distance_threshold,
                upstream_syn_count: u32::try_from(r.upstream_syn_count).unwrap_or(0),
                downstream_syn_count: u32::try_from(r.downstream_syn_count).unwrap_or(0),
                fetch_upstream: r.fetch_upstream,
                fetch_downstream: r.fetch_downstream,
                with_autapses: r.with_autapses,
                tags: r.tags,
                annotations: r.annotations,
                request_id: r.request_id,
            },
            status: ImportStatus::from_code(r.status)?,
            status_detail: r.status_detail,
            runtime: r.runtime,
            progress: RunProgress {
                n_imported_connectors: r.n_imported_connectors,
                n_imported_links: r.n_imported_links,
                n_upstream_partners: r.n_upstream_partners,
                n_downstream_partners: r.n_downstream_partners,
                n_expected_upstream: r.n_expected_upstream,
                n_expected_downstream: r.n_expected_downstream,
                skeleton_id: r.skeleton_id,
                txid: r.txid,
            },
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SegmentImportRow {
    id: i64,
    import_id: i64,
    source: String,
    segment_id: i64,
    voxel_x: f64,
    voxel_y: f64,
    voxel_z: f64,
    physical_x: f64,
    physical_y: f64,
    physical_z: f64,
    n_nodes: i32,
}

impl From<SegmentImportRow> for SegmentImport {
    fn from(r: SegmentImportRow) -> Self {
        SegmentImport {
            id: r.id,
            import_id: r.import_id,
            source: r.source,
            segment_id: r.segment_id,
            voxel: Point3::new(r.voxel_x, r.voxel_y, r.voxel_z),
            physical: Point3::new(r.physical_x, r.physical_y, r.physical_z),
            n_nodes: r.n_nodes,
        }
    }
}
