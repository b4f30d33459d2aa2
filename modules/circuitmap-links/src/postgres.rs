use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use circuitmap_common::{CircuitMapError, LinkRole, Point3, Result, SynapticLink};

use crate::store::LinkStore;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const LINKS_BY_PRE: &str = r#"
    SELECT id, segmentid_pre, segmentid_post,
           pre_x, pre_y, pre_z, post_x, post_y, post_z,
           scores, cleft_scores, cleft_id, dist, clust_con_offset, "offset",
           prob_min, prob_max, prob_sum, prob_mean, prob_count
    FROM circuitmap_synlinks
    WHERE segmentid_pre = $1
    ORDER BY id
"#;

const LINKS_BY_POST: &str = r#"
    SELECT id, segmentid_pre, segmentid_post,
           pre_x, pre_y, pre_z, post_x, post_y, post_z,
           scores, cleft_scores, cleft_id, dist, clust_con_offset, "offset",
           prob_min, prob_max, prob_sum, prob_mean, prob_count
    FROM circuitmap_synlinks
    WHERE segmentid_post = $1
    ORDER BY id
"#;

const LINKS_BY_OFFSET: &str = r#"
    SELECT id, segmentid_pre, segmentid_post,
           pre_x, pre_y, pre_z, post_x, post_y, post_z,
           scores, cleft_scores, cleft_id, dist, clust_con_offset, "offset",
           prob_min, prob_max, prob_sum, prob_mean, prob_count
    FROM circuitmap_synlinks
    WHERE "offset" = ANY($1)
    ORDER BY id
"#;

/// Synaptic link table in Postgres (`circuitmap_synlinks`).
#[derive(Clone)]
pub struct PgLinkStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgLinkStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Bound every query by `timeout`; elapsed queries surface as `StoreUnavailable`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CircuitMapError::unavailable(format!("{what}: {e}"))),
            Err(_) => Err(CircuitMapError::unavailable(format!(
                "{what}: timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl LinkStore for PgLinkStore {
    async fn links_for(&self, segment_id: i64, role: LinkRole) -> Result<Vec<SynapticLink>> {
        let sql = match role {
            LinkRole::Pre => LINKS_BY_PRE,
            LinkRole::Post => LINKS_BY_POST,
        };

        let rows = self
            .bounded(
                "links_for",
                sqlx::query_as::<_, SynlinkRow>(sql)
                    .bind(segment_id)
                    .fetch_all(&self.pool),
            )
            .await?;

        debug!(segment_id, %role, links = rows.len(), "Fetched synaptic links");
        Ok(rows.into_iter().map(SynapticLink::from).collect())
    }

    async fn representative_links_for(
        &self,
        offsets: &BTreeSet<i32>,
    ) -> Result<HashMap<i32, SynapticLink>> {
        if offsets.is_empty() {
            return Ok(HashMap::new());
        }

        let offsets: Vec<i32> = offsets.iter().copied().collect();
        let rows = self
            .bounded(
                "representative_links_for",
                sqlx::query_as::<_, SynlinkRow>(LINKS_BY_OFFSET)
                    .bind(&offsets)
                    .fetch_all(&self.pool),
            )
            .await?;

        debug!(
            requested = offsets.len(),
            found = rows.len(),
            "Fetched representative links"
        );

        let mut by_offset = HashMap::with_capacity(rows.len());
        for row in rows {
            let link = SynapticLink::from(row);
            by_offset.entry(link.offset).or_insert(link);
        }
        Ok(by_offset)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct SynlinkRow {
    id: i64,
    segmentid_pre: i64,
    segmentid_post: i64,
    pre_x: f64,
    pre_y: f64,
    pre_z: f64,
    post_x: f64,
    post_y: f64,
    post_z: f64,
    scores: f64,
    cleft_scores: i32,
    cleft_id: i64,
    dist: f64,
    clust_con_offset: i32,
    offset: i32,
    prob_min: i32,
    prob_max: i32,
    prob_sum: i32,
    prob_mean: i32,
    prob_count: i32,
}

impl From<SynlinkRow> for SynapticLink {
    fn from(r: SynlinkRow) -> Self {
        SynapticLink {
            id: r.id,
            segmentid_pre: r.segmentid_pre,
            segmentid_post: r.segmentid_post,
            pre: Point3::new(r.pre_x, r.pre_y, r.pre_z),
            post: Point3::new(r.post_x, r.post_y, r.post_z),
            scores: r.scores,
            cleft_scores: r.cleft_scores,
            cleft_id: r.cleft_id,
            dist: r.dist,
            clust_con_offset: r.clust_con_offset,
            offset: r.offset,
            prob_min: r.prob_min,
            prob_max: r.prob_max,
            prob_sum: r.prob_sum,
            prob_mean: r.prob_mean,
            prob_count: r.prob_count,
        }
    }
}
