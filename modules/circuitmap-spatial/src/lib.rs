//! Maps raw synaptic links onto the nearest node of a target skeleton and
//! collapses them into a canonical set of connectors and node links.

pub mod assign;
pub mod kdtree;

pub use assign::{AssignParams, Assignment, ConnectorRecord, NodeLink, SynapseAssigner, LINK_CONFIDENCE};
pub use kdtree::KdTree;
