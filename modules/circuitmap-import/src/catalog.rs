use std::sync::Arc;

use async_trait::async_trait;

use circuitmap_common::{Result, SkeletonNode};
use circuitmap_spatial::Assignment;

use crate::skeleton::TreeNode;

/// A freshly built skeleton and the labels to attach with it.
#[derive(Debug, Clone)]
pub struct SkeletonWrite {
    pub project_id: i64,
    pub user_id: i64,
    pub segment_id: i64,
    /// Breadth-first order; the first node is the root.
    pub nodes: Vec<TreeNode>,
    /// Tags placed on the root node.
    pub tags: Vec<String>,
    /// Annotations placed on the neuron.
    pub annotations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkeletonWriteOutcome {
    pub skeleton_id: i64,
    /// False when another writer had already created the same root node.
    pub created: bool,
}

/// The host application's skeleton and connector tables.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Skeleton owning the lowest-ID treenode encoded for `segment_id` in
    /// `project_id`, if the segment was imported before.
    async fn find_imported_skeleton(&self, project_id: i64, segment_id: i64) -> Result<Option<i64>>;

    /// All nodes of `skeleton_id`, ordered by node ID.
    async fn skeleton_nodes(&self, project_id: i64, skeleton_id: i64) -> Result<Vec<SkeletonNode>>;

    /// Create neuron, skeleton, treenodes and labels in one transaction.
    async fn write_skeleton(&self, write: &SkeletonWrite) -> Result<SkeletonWriteOutcome>;

    /// Insert connectors and node links in one transaction, skipping rows that
    /// already exist. Returns the writing transaction's ID.
    async fn write_synapses(
        &self,
        project_id: i64,
        user_id: i64,
        skeleton_id: i64,
        assignment: &Assignment,
    ) -> Result<i64>;
}

#[async_trait]
impl<C: CatalogStore + ?Sized> CatalogStore for Arc<C> {
    async fn find_imported_skeleton(&self, project_id: i64, segment_id: i64) -> Result<Option<i64>> {
        (**self).find_imported_skeleton(project_id, segment_id).await
    }

    async fn skeleton_nodes(&self, project_id: i64, skeleton_id: i64) -> Result<Vec<SkeletonNode>> {
        (**self).skeleton_nodes(project_id, skeleton_id).await
    }

    async fn write_skeleton(&self, write: &SkeletonWrite) -> Result<SkeletonWriteOutcome> {
        (**self).write_skeleton(write).await
    }

    async fn write_synapses(
        &self,
        project_id: i64,
        user_id: i64,
        skeleton_id: i64,
        assignment: &Assignment,
    ) -> Result<i64> {
        (**self)
            .write_synapses(project_id, user_id, skeleton_id, assignment)
            .await
    }
}
