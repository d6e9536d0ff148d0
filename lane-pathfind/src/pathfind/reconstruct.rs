//! Reading a finished search back into an ordered list of positions.
//!
//! The search ran from the ends towards the starts, so following each lane's best
//! successor from the popped start entry walks the path in travel order.

use tracing::trace;

use super::error::PathFindError;
use super::queue::{BucketQueue, FrontierEntry};
use crate::network::{LaneGraph, LanePosition, NetworkDataError};

/// A path in travel order plus its length in metres.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedPath {
    pub positions: Vec<LanePosition>,
    pub length: f32,
}

fn is_end(position: &LanePosition, ends: &[Option<LanePosition>; 2]) -> bool {
    ends.iter().flatten().any(|end| end == position)
}

/// Walk successors from `found` until an end position is emitted.
///
/// When `found` is not itself an end, the start offset is emitted first (if it
/// differs from where the entry sits), then the entry's own position. Walks longer
/// than `max_positions` are reported as a broken successor chain.
pub fn reconstruct<G: LaneGraph + ?Sized>(
    graph: &G,
    queue: &BucketQueue,
    found: &FrontierEntry,
    start_offset: u8,
    ends: &[Option<LanePosition>; 2],
    max_length: f32,
    max_positions: usize,
) -> Result<ReconstructedPath, PathFindError> {
    let mut positions = Vec::new();
    let mut position = found.position;

    if !is_end(&position, ends) {
        if position.offset != start_offset {
            positions.push(position.with_offset(start_offset));
        }
        positions.push(position);
        position = queue.successor(found.lane_id).ok_or_else(|| {
            PathFindError::InternalInvariantViolation(format!(
                "start lane {} has no successor",
                found.lane_id
            ))
        })?;
    }

    loop {
        if positions.len() >= max_positions {
            return Err(PathFindError::InternalInvariantViolation(format!(
                "path exceeds {max_positions} positions"
            )));
        }
        positions.push(position);
        if is_end(&position, ends) {
            break;
        }
        let lane = graph.lane_id(position).ok_or_else(|| {
            NetworkDataError::LaneIndexOutOfRange {
                segment: position.segment,
                index: position.lane,
            }
        })?;
        position = queue.successor(lane).ok_or_else(|| {
            PathFindError::InternalInvariantViolation(format!("lane {lane} has no successor"))
        })?;
    }

    let length = found.cost * max_length;
    trace!(positions = positions.len(), length, "reconstructed path");
    Ok(ReconstructedPath { positions, length })
}
