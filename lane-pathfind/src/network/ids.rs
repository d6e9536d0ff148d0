//! Identifier and position types for the lane network.

use std::fmt;

macro_rules! network_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            /// Wrap a raw identifier.
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Returns the raw identifier.
            pub const fn get(self) -> u32 {
                self.0
            }

            /// Returns the identifier as a table index.
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

network_id!(
    /// A road segment: the edge between two nodes, carrying an ordered set of lanes.
    SegmentId,
    "S"
);
network_id!(
    /// A node joining up to eight segments.
    NodeId,
    "N"
);
network_id!(
    /// A single lane on a segment.
    LaneId,
    "L"
);

/// A position on a lane: which segment, which lane index on it, and how far along.
///
/// Offsets run from 0 (at the segment's start node) to 255 (at its end node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LanePosition {
    pub segment: SegmentId,
    pub lane: u8,
    pub offset: u8,
}

impl LanePosition {
    /// Create a new lane position.
    pub const fn new(segment: SegmentId, lane: u8, offset: u8) -> Self {
        Self {
            segment,
            lane,
            offset,
        }
    }

    /// Same segment and lane, ignoring the offset.
    pub fn same_lane(&self, other: &LanePosition) -> bool {
        self.segment == other.segment && self.lane == other.lane
    }

    /// Returns this position moved to another offset on the same lane.
    pub fn with_offset(self, offset: u8) -> Self {
        Self { offset, ..self }
    }
}

impl fmt::Display for LanePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.segment, self.lane, self.offset)
    }
}
