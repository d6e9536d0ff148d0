//! Bit sets describing lanes, segments and nodes.

use bitflags::bitflags;

bitflags! {
    /// What kind of traffic a lane carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LaneType: u8 {
        const VEHICLE = 1 << 0;
        const PEDESTRIAN = 1 << 1;
        const PARKING = 1 << 2;
        const PUBLIC_TRANSPORT = 1 << 3;
        const TRANSPORT_VEHICLE = 1 << 4;
    }
}

bitflags! {
    /// Which vehicles may use a lane.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VehicleType: u16 {
        const CAR = 1 << 0;
        const METRO = 1 << 1;
        const TRAIN = 1 << 2;
        const SHIP = 1 << 3;
        const PLANE = 1 << 4;
        const BICYCLE = 1 << 5;
        const TRAM = 1 << 6;
    }
}

bitflags! {
    /// Travel direction of a lane relative to its segment.
    ///
    /// Avoid lanes are two-way lanes that are slow in one or both directions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Direction: u8 {
        const FORWARD = 1 << 0;
        const BACKWARD = 1 << 1;
        const AVOID_BACKWARD_BIT = 1 << 2;
        const AVOID_FORWARD_BIT = 1 << 3;

        const BOTH = Self::FORWARD.bits() | Self::BACKWARD.bits();
        const AVOID_BACKWARD = Self::BOTH.bits() | Self::AVOID_BACKWARD_BIT.bits();
        const AVOID_FORWARD = Self::BOTH.bits() | Self::AVOID_FORWARD_BIT.bits();
        const AVOID_BOTH = Self::BOTH.bits()
            | Self::AVOID_BACKWARD_BIT.bits()
            | Self::AVOID_FORWARD_BIT.bits();
    }
}

impl Direction {
    /// Swap forward and backward, including the avoid bits.
    pub fn invert(self) -> Self {
        let mut out = Direction::empty();
        if self.contains(Direction::FORWARD) {
            out |= Direction::BACKWARD;
        }
        if self.contains(Direction::BACKWARD) {
            out |= Direction::FORWARD;
        }
        if self.contains(Direction::AVOID_FORWARD_BIT) {
            out |= Direction::AVOID_BACKWARD_BIT;
        }
        if self.contains(Direction::AVOID_BACKWARD_BIT) {
            out |= Direction::AVOID_FORWARD_BIT;
        }
        out
    }

    /// Invert when the segment is flagged inverted.
    pub fn oriented(self, inverted: bool) -> Self {
        if inverted { self.invert() } else { self }
    }

    /// True when either avoid bit is set.
    pub fn is_avoid(self) -> bool {
        self.intersects(Direction::AVOID_BACKWARD_BIT | Direction::AVOID_FORWARD_BIT)
    }
}

bitflags! {
    /// Runtime state of a segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SegmentFlags: u16 {
        const INVERT = 1 << 0;
        const BLOCKED = 1 << 1;
        const HEAVY_BAN = 1 << 2;
        const CAR_BAN = 1 << 3;
        const PATH_FAILED = 1 << 4;
        const FLOODED = 1 << 5;
    }
}

bitflags! {
    /// Runtime state and shape of a node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u16 {
        const END = 1 << 0;
        const BEND = 1 << 1;
        const JUNCTION = 1 << 2;
        const TRANSITION = 1 << 3;
        const ONE_WAY_OUT = 1 << 4;
        const DISABLED = 1 << 5;
        const PEDESTRIAN_ONLY = 1 << 6;
    }
}

bitflags! {
    /// Turn arrows painted on a lane at its node end.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LaneArrows: u8 {
        const LEFT = 1 << 0;
        const FORWARD = 1 << 1;
        const RIGHT = 1 << 2;
    }
}
