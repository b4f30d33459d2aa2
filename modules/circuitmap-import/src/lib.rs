pub mod catalog;
pub mod geometry;
pub mod importer;
pub mod jobs;
pub mod postgres;
pub mod request;
pub mod skeleton;
pub mod status;
pub mod worker;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use catalog::{CatalogStore, SkeletonWrite, SkeletonWriteOutcome};
pub use geometry::{GeometrySource, HttpSegmentation, SegmentGeometry, SegmentationSource};
pub use importer::{Importer, ImporterSettings};
pub use jobs::JobStore;
pub use postgres::{PgCatalog, PgJobStore};
pub use request::{ImportRequest, ImportRun, NewSegmentImport, RunProgress, SegmentImport, Seed};
pub use skeleton::{build_tree, SkeletonTree, TreeNode};
pub use status::ImportStatus;
pub use worker::ImportWorker;
