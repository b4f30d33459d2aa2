use std::sync::Arc;

use async_trait::async_trait;

use circuitmap_common::Result;

use crate::request::{ImportRequest, ImportRun, NewSegmentImport, RunProgress, SegmentImport};
use crate::status::ImportStatus;

/// Persistence of import runs and their segment records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a queued run. Segment seeds also get their seed record.
    async fn enqueue(&self, request: &ImportRequest) -> Result<i64>;

    /// Move the oldest queued run to `Computing` and return it. Concurrent
    /// claimers never receive the same run.
    async fn claim_next(&self) -> Result<Option<ImportRun>>;

    async fn get(&self, run_id: i64) -> Result<Option<ImportRun>>;

    async fn segment_imports(&self, run_id: i64) -> Result<Vec<SegmentImport>>;

    async fn record_segment_import(&self, run_id: i64, record: &NewSegmentImport) -> Result<i64>;

    async fn set_segment_nodes(&self, segment_import_id: i64, n_nodes: i32) -> Result<()>;

    /// Move a live run to an intermediate status. Refused transitions are
    /// reported as `ImportConflict`.
    async fn set_status(&self, run_id: i64, status: ImportStatus) -> Result<()>;

    async fn update_progress(&self, run_id: i64, progress: &RunProgress) -> Result<()>;

    /// Record a terminal status unless the run is already terminal. Returns
    /// whether the run was updated.
    async fn finish(
        &self,
        run_id: i64,
        status: ImportStatus,
        detail: &str,
        runtime_secs: f64,
    ) -> Result<bool>;
}

#[async_trait]
impl<J: JobStore + ?Sized> JobStore for Arc<J> {
    async fn enqueue(&self, request: &ImportRequest) -> Result<i64> {
        (**self).enqueue(request).await
    }

    async fn claim_next(&self) -> Result<Option<ImportRun>> {
        (**self).claim_next().await
    }

    async fn get(&self, run_id: i64) -> Result<Option<ImportRun>> {
        (**self).get(run_id).await
    }

    async fn segment_imports(&self, run_id: i64) -> Result<Vec<SegmentImport>> {
        (**self).segment_imports(run_id).await
    }

    async fn record_segment_import(&self, run_id: i64, record: &NewSegmentImport) -> Result<i64> {
        (**self).record_segment_import(run_id, record).await
    }

    async fn set_segment_nodes(&self, segment_import_id: i64, n_nodes: i32) -> Result<()> {
        (**self).set_segment_nodes(segment_import_id, n_nodes).await
    }

    async fn set_status(&self, run_id: i64, status: ImportStatus) -> Result<()> {
        (**self).set_status(run_id, status).await
    }

    async fn update_progress(&self, run_id: i64, progress: &RunProgress) -> Result<()> {
        (**self).update_progress(run_id, progress).await
    }

    async fn finish(
        &self,
        run_id: i64,
        status: ImportStatus,
        detail: &str,
        runtime_secs: f64,
    ) -> Result<bool> {
        (**self).finish(run_id, status, detail, runtime_secs).await
    }
}
