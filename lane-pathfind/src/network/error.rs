//! Errors raised when the lane network is inconsistent.
//!
//! The search never aborts on these: the branch that hit one is skipped.

use super::{LaneId, NodeId, SegmentId};

/// The network returned data that cannot be followed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkDataError {
    /// A segment id did not resolve
    #[error("segment {0} does not exist")]
    MissingSegment(SegmentId),

    /// A node id did not resolve
    #[error("node {0} does not exist")]
    MissingNode(NodeId),

    /// A lane id did not resolve
    #[error("lane {0} does not exist")]
    MissingLane(LaneId),

    /// A lane index past the end of a segment's lane list
    #[error("segment {segment} has no lane at index {index}")]
    LaneIndexOutOfRange { segment: SegmentId, index: u8 },

    /// A node-attached lane list that never terminates
    #[error("node list on lane {0} does not terminate")]
    SpecialLaneLoop(LaneId),
}
