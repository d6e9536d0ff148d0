//! The read-only view of the lane network the search runs against.

use super::{
    Direction, Lane, LaneId, LanePosition, LaneType, LeftRightLanes, Node, NodeId, Point,
    Segment, SegmentGeometry, SegmentId, VehicleType,
};

/// Read access to segments, nodes, lanes and the traffic density signal.
///
/// This abstraction allows the search to run against an in-memory network in tests
/// and against any other store that can answer these queries. Implementations must
/// be shareable between worker threads; the network may change between searches but
/// each search treats it as a snapshot.
pub trait LaneGraph: Send + Sync {
    /// Size for per-lane tables: one more than the largest lane id.
    fn lane_count(&self) -> usize;

    fn segment(&self, id: SegmentId) -> Option<&Segment>;

    fn node(&self, id: NodeId) -> Option<&Node>;

    fn lane(&self, id: LaneId) -> Option<&Lane>;

    /// Turn geometry of the other segments at `node`, seen from `segment`.
    fn segment_geometry(&self, segment: SegmentId, node: NodeId) -> Option<SegmentGeometry>;

    /// The next segment clockwise-to-the-right of `segment` around `node`.
    fn right_segment(&self, segment: SegmentId, node: NodeId) -> Option<SegmentId>;

    /// The next segment to the left of `segment` around `node`.
    fn left_segment(&self, segment: SegmentId, node: NodeId) -> Option<SegmentId>;

    /// Nearest compatible lanes to the left and right of `from_lane`, looking along
    /// `segment` towards `node`. Without a starting lane, returns the outermost
    /// compatible lanes on each side.
    fn left_and_right_lanes(
        &self,
        segment: SegmentId,
        node: NodeId,
        lane_types: LaneType,
        vehicle_types: VehicleType,
        from_lane: Option<u8>,
    ) -> LeftRightLanes;

    /// Smoothed traffic density of a lane in 0..=1. Read without synchronization.
    fn mean_traffic_density(&self, lane: LaneId) -> f32;

    /// Resolve a lane position to its lane id.
    fn lane_id(&self, position: LanePosition) -> Option<LaneId> {
        self.segment(position.segment)?.lane(position.lane)
    }

    /// Routing direction (segment inversion applied) and type of the lane at `position`.
    fn lane_direction_and_type(&self, position: LanePosition) -> Option<(Direction, LaneType)> {
        let segment = self.segment(position.segment)?;
        let lane = self.lane(segment.lane(position.lane)?)?;
        Some((
            lane.info.final_direction.oriented(segment.is_inverted()),
            lane.info.lane_type,
        ))
    }

    /// Whether the segment falls under highway lane rules.
    fn is_highway_rule_segment(&self, segment: SegmentId) -> bool {
        self.segment(segment).is_some_and(|s| s.highway_rules)
    }

    /// True when every vehicle lane of `segment` leads away from `node`.
    fn is_outgoing_one_way(&self, segment: SegmentId, node: NodeId) -> bool {
        let Some(seg) = self.segment(segment) else {
            return false;
        };
        let away = if node == seg.start_node {
            Direction::FORWARD
        } else {
            Direction::BACKWARD
        };
        let mut any = false;
        for &lane_id in &seg.lanes {
            let Some(lane) = self.lane(lane_id) else {
                continue;
            };
            if !lane
                .info
                .lane_type
                .intersects(LaneType::VEHICLE | LaneType::TRANSPORT_VEHICLE)
            {
                continue;
            }
            let dir = lane.info.direction.oriented(seg.is_inverted()) & Direction::BOTH;
            if dir != away {
                return false;
            }
            any = true;
        }
        any
    }

    /// The compatible lane on `segment` laterally closest to lane `from_lane`.
    fn closest_compatible_lane(
        &self,
        segment: SegmentId,
        from_lane: u8,
        lane_types: LaneType,
        vehicle_types: VehicleType,
    ) -> Option<(u8, LaneId)> {
        let seg = self.segment(segment)?;
        let origin = self.lane(seg.lane(from_lane)?)?.info.lateral;
        let mut best: Option<(f32, u8, LaneId)> = None;
        for (index, &lane_id) in seg.lanes.iter().enumerate() {
            let Some(lane) = self.lane(lane_id) else {
                continue;
            };
            if !lane.info.check_type(lane_types, vehicle_types) {
                continue;
            }
            let distance = (lane.info.lateral - origin).abs();
            if best.is_none_or(|(d, _, _)| distance < d) {
                best = Some((distance, index as u8, lane_id));
            }
        }
        best.map(|(_, index, id)| (index, id))
    }

    /// World position of a lane at a byte offset.
    fn lane_point(&self, lane: LaneId, offset: u8) -> Option<Point> {
        Some(self.lane(lane)?.position_at_offset(offset))
    }
}
