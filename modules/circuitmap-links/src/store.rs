use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use circuitmap_common::{LinkRole, Result, SynapticLink};

/// Read-only access to raw synaptic links.
///
/// Implementations fail with `StoreUnavailable` when the backing store cannot be
/// reached. "No rows" is never an error.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// All links in which `segment_id` plays `role`, ordered by link id.
    async fn links_for(&self, segment_id: i64, role: LinkRole) -> Result<Vec<SynapticLink>>;

    /// Representative links keyed by their `offset`. Offsets without a row are absent.
    async fn representative_links_for(
        &self,
        offsets: &BTreeSet<i32>,
    ) -> Result<HashMap<i32, SynapticLink>>;
}

#[async_trait]
impl<S: LinkStore + ?Sized> LinkStore for Arc<S> {
    async fn links_for(&self, segment_id: i64, role: LinkRole) -> Result<Vec<SynapticLink>> {
        (**self).links_for(segment_id, role).await
    }

    async fn representative_links_for(
        &self,
        offsets: &BTreeSet<i32>,
    ) -> Result<HashMap<i32, SynapticLink>> {
        (**self).representative_links_for(offsets).await
    }
}

/// Cluster representative offsets referenced by `links` (only offsets > 0).
pub fn cluster_offsets<'a>(links: impl IntoIterator<Item = &'a SynapticLink>) -> BTreeSet<i32> {
    links
        .into_iter()
        .filter(|l| l.is_clustered())
        .map(|l| l.clust_con_offset)
        .collect()
}
