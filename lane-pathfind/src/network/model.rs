//! Network records handed out by a [`LaneGraph`](super::LaneGraph).

use super::{
    Direction, LaneArrows, LaneId, LaneType, NodeFlags, NodeId, SegmentFlags, SegmentId,
    VehicleType,
};

/// A point in world space. `y` is height; the ground plane is `x`/`z`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// A ground-plane point at height zero.
    pub const fn flat(x: f32, z: f32) -> Self {
        Self { x, y: 0.0, z }
    }

    pub fn distance(self, other: Point) -> f32 {
        let (dx, dy, dz) = (other.x - self.x, other.y - self.y, other.z - self.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn lerp(self, other: Point, t: f32) -> Point {
        Point {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }

    /// Ground-plane unit vector from `self` towards `other`, or zero when they coincide.
    pub fn direction_to(self, other: Point) -> Point {
        let (dx, dz) = (other.x - self.x, other.z - self.z);
        let len = (dx * dx + dz * dz).sqrt();
        if len <= f32::EPSILON {
            return Point::default();
        }
        Point::flat(dx / len, dz / len)
    }

    /// Ground-plane dot product.
    pub fn dot_flat(self, other: Point) -> f32 {
        self.x * other.x + self.z * other.z
    }
}

/// Static description of a lane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneInfo {
    pub lane_type: LaneType,
    pub vehicle_type: VehicleType,
    /// Direction before any avoid restrictions.
    pub direction: Direction,
    /// Direction including avoid restrictions; this is what routing honours.
    pub final_direction: Direction,
    pub speed_limit: f32,
    /// Lateral position; positive is to the right of the segment's forward direction.
    pub lateral: f32,
    /// Index among lanes of the same type, vehicle type and direction, ordered by `lateral`.
    pub similar_lane_index: u8,
    pub similar_lane_count: u8,
}

impl LaneInfo {
    /// Whether the lane is usable by any of the given lane and vehicle types.
    pub fn check_type(&self, lane_types: LaneType, vehicle_types: VehicleType) -> bool {
        self.lane_type.intersects(lane_types)
            && (self.vehicle_type.intersects(vehicle_types) || self.vehicle_type.is_empty())
    }

    pub fn is_pedestrian(&self) -> bool {
        self.lane_type == LaneType::PEDESTRIAN
    }

    pub fn is_bicycle(&self) -> bool {
        self.lane_type == LaneType::VEHICLE && self.vehicle_type == VehicleType::BICYCLE
    }
}

/// A lane instance on a segment.
#[derive(Debug, Clone)]
pub struct Lane {
    pub id: LaneId,
    pub segment: SegmentId,
    /// Index of this lane in its segment's lane list.
    pub index: u8,
    pub info: LaneInfo,
    /// End point at the segment's start node.
    pub start: Point,
    /// End point at the segment's end node.
    pub end: Point,
    pub length: f32,
    pub arrows: LaneArrows,
    /// Range of lane indices (from the left) this lane feeds into, when known.
    pub targets: Option<(u8, u8)>,
    /// Head of the list of nodes attached along this lane.
    pub first_attached_node: Option<NodeId>,
}

impl Lane {
    /// Point at `t` in 0..=1 along the lane from its start-node end.
    pub fn position(&self, t: f32) -> Point {
        self.start.lerp(self.end, t.clamp(0.0, 1.0))
    }

    /// Point at a byte offset along the lane.
    pub fn position_at_offset(&self, offset: u8) -> Point {
        self.position(f32::from(offset) / 255.0)
    }
}

/// A road segment between two nodes.
#[derive(Debug, Clone)]
pub struct Segment {
    pub id: SegmentId,
    pub start_node: NodeId,
    pub end_node: NodeId,
    pub flags: SegmentFlags,
    pub average_length: f32,
    /// Lanes ordered by lane index.
    pub lanes: Vec<LaneId>,
    /// Unit vector from the start node into the segment.
    pub start_direction: Point,
    /// Unit vector from the end node into the segment.
    pub end_direction: Point,
    pub max_turn_angle_cos: f32,
    pub highway_rules: bool,
    /// Coarse congestion percentage used by stock cost randomization.
    pub traffic_density: u8,
}

impl Segment {
    pub fn is_inverted(&self) -> bool {
        self.flags.contains(SegmentFlags::INVERT)
    }

    /// Direction into the segment as seen from `node`.
    pub fn direction_at(&self, node: NodeId) -> Point {
        if node == self.start_node {
            self.start_direction
        } else {
            self.end_direction
        }
    }

    /// The node at the other end from `node`.
    pub fn other_node(&self, node: NodeId) -> NodeId {
        if node == self.start_node {
            self.end_node
        } else {
            self.start_node
        }
    }

    pub fn lane(&self, index: u8) -> Option<LaneId> {
        self.lanes.get(usize::from(index)).copied()
    }
}

/// A node and its connected segments.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub position: Point,
    pub flags: NodeFlags,
    /// Connected segments ordered counter-clockwise by outgoing angle.
    pub segments: Vec<SegmentId>,
    /// Lane this node is attached to, for stops and other special nodes.
    pub lane: Option<LaneId>,
    pub lane_offset: u8,
    /// Next node in the attachment list of `lane`.
    pub next_lane_node: Option<NodeId>,
}

impl Node {
    pub fn is_junction(&self) -> bool {
        self.flags.contains(NodeFlags::JUNCTION)
    }

    pub fn is_disabled(&self) -> bool {
        self.flags.contains(NodeFlags::DISABLED)
    }
}

/// How the other segments at a node lie relative to one arriving segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentGeometry {
    pub right_segments: u8,
    pub has_straight: bool,
    pub left_segments: u8,
    pub is_one_way: bool,
    pub incoming_one_way: bool,
    pub outgoing_one_way: bool,
}

/// Nearest lanes on either side of a lane, as `(lane index, lane id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeftRightLanes {
    pub left: Option<(u8, LaneId)>,
    pub right: Option<(u8, LaneId)>,
}
