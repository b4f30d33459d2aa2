//! Deterministic ID encodings shared with previously imported data.
//!
//! Both schemes must stay bit-exact: re-importing a segment or a synaptic link
//! has to land on the same rows so that `ON CONFLICT DO NOTHING` keeps imports
//! idempotent.

use crate::error::{CircuitMapError, Result};

/// Maximum number of skeleton nodes a single segment may contribute.
pub const MAX_NODES_PER_SEGMENT: i64 = 100_000;

/// Maximum number of projects sharing one node ID space.
pub const MAX_PROJECTS: i64 = 10;

/// Multiplier applied to link offsets when deriving connector IDs.
pub const CONNECTOR_OFFSET_STRIDE: i64 = 10;

/// Encode the globally unique treenode ID of node `local_index` of `segment_id`
/// imported into `project_id`:
/// `segment * MAX_NODES_PER_SEGMENT * MAX_PROJECTS + local_index * MAX_PROJECTS + project`.
pub fn encode_node_id(segment_id: i64, local_index: i64, project_id: i64) -> Result<i64> {
    if segment_id < 0 {
        return Err(CircuitMapError::invalid(format!(
            "segment id {segment_id} is negative"
        )));
    }
    if !(0..MAX_NODES_PER_SEGMENT).contains(&local_index) {
        return Err(CircuitMapError::invalid(format!(
            "node index {local_index} outside 0..{MAX_NODES_PER_SEGMENT}"
        )));
    }
    if !(0..MAX_PROJECTS).contains(&project_id) {
        return Err(CircuitMapError::invalid(format!(
            "project id {project_id} outside 0..{MAX_PROJECTS}"
        )));
    }

    segment_id
        .checked_mul(MAX_NODES_PER_SEGMENT * MAX_PROJECTS)
        .and_then(|base| base.checked_add(local_index * MAX_PROJECTS + project_id))
        .ok_or_else(|| {
            CircuitMapError::invalid(format!("segment id {segment_id} overflows node id space"))
        })
}

/// Recover `(segment_id, local_index, project_id)` from an encoded node ID.
pub fn decode_node_id(node_id: i64) -> (i64, i64, i64) {
    let project_id = node_id % MAX_PROJECTS;
    let local_index = (node_id / MAX_PROJECTS) % MAX_NODES_PER_SEGMENT;
    let segment_id = node_id / (MAX_NODES_PER_SEGMENT * MAX_PROJECTS);
    (segment_id, local_index, project_id)
}

/// Connector ID for a link (or cluster representative) offset:
/// `base + offset * 10`.
pub fn encode_connector_id(base: i64, offset: i32) -> i64 {
    base + i64::from(offset) * CONNECTOR_OFFSET_STRIDE
}
