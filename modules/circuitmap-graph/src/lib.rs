//! Segment-level synaptic adjacency: expansion from a seed segment and
//! partner selection over the resulting graph.

pub mod expand;
pub mod partners;

pub use expand::{load_subgraph, SegmentGraph};
pub use partners::{postsynaptic_partners, presynaptic_partners};
