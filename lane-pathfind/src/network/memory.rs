//! In-memory lane network.
//!
//! [`RoadNetworkBuilder`] assembles nodes and segments from lane specs and derives
//! everything the search reads: node ordering and flags, lane geometry, similar-lane
//! indices and per-node turn geometry.

use std::collections::HashMap;
use std::f32::consts::{PI, TAU};

use tracing::debug;

use super::{
    Direction, Lane, LaneArrows, LaneGraph, LaneId, LaneInfo, LaneTrafficDensity, LaneType,
    LeftRightLanes, Node, NodeFlags, NodeId, Point, Segment, SegmentFlags, SegmentGeometry,
    SegmentId, SegmentSweep, VehicleType,
};

/// Walking speed used for sidewalks and footpaths.
pub const PEDESTRIAN_SPEED: f32 = 1.0;

/// Lane width used by the road presets.
const LANE_WIDTH: f32 = 4.0;

/// Turns within this angle of dead ahead count as straight.
const STRAIGHT_TOLERANCE: f32 = PI / 6.0;

/// Most segments a node can join.
pub const MAX_NODE_SEGMENTS: usize = 8;

/// Errors from building a network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// Node id not created by this builder
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// Segment id not created by this builder
    #[error("unknown segment {0}")]
    UnknownSegment(SegmentId),

    /// Lane index past the end of a segment
    #[error("segment {segment} has no lane {index}")]
    UnknownLane { segment: SegmentId, index: u8 },

    /// Node already joins the maximum number of segments
    #[error("node {0} already joins {MAX_NODE_SEGMENTS} segments")]
    NodeFull(NodeId),

    /// Segment starts and ends at the same node
    #[error("segment would start and end at node {0}")]
    SelfLoop(NodeId),
}

/// Description of one lane in a [`SegmentSpec`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneSpec {
    pub lane_type: LaneType,
    pub vehicle_type: VehicleType,
    pub direction: Direction,
    pub final_direction: Direction,
    pub speed_limit: f32,
    pub lateral: f32,
}

impl LaneSpec {
    /// A general traffic lane.
    pub fn car(direction: Direction, lateral: f32, speed_limit: f32) -> Self {
        Self {
            lane_type: LaneType::VEHICLE,
            vehicle_type: VehicleType::CAR,
            direction,
            final_direction: direction,
            speed_limit,
            lateral,
        }
    }

    /// A lane reserved for public transport vehicles.
    pub fn transit(direction: Direction, lateral: f32, speed_limit: f32) -> Self {
        Self {
            lane_type: LaneType::TRANSPORT_VEHICLE,
            ..Self::car(direction, lateral, speed_limit)
        }
    }

    pub fn bicycle(direction: Direction, lateral: f32, speed_limit: f32) -> Self {
        Self {
            vehicle_type: VehicleType::BICYCLE,
            ..Self::car(direction, lateral, speed_limit)
        }
    }

    /// A two-way walking lane.
    pub fn sidewalk(lateral: f32) -> Self {
        Self {
            lane_type: LaneType::PEDESTRIAN,
            vehicle_type: VehicleType::empty(),
            direction: Direction::BOTH,
            final_direction: Direction::BOTH,
            speed_limit: PEDESTRIAN_SPEED,
            lateral,
        }
    }

    /// Override the routed direction, e.g. with an avoid variant.
    pub fn with_final_direction(mut self, direction: Direction) -> Self {
        self.final_direction = direction;
        self
    }
}

/// Description of a segment's cross-section and rules.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSpec {
    pub lanes: Vec<LaneSpec>,
    pub highway_rules: bool,
    /// Sharpest turn allowed onto or off this segment, in degrees.
    pub max_turn_angle: f32,
    pub inverted: bool,
}

impl SegmentSpec {
    pub fn new(lanes: Vec<LaneSpec>) -> Self {
        Self {
            lanes,
            highway_rules: false,
            max_turn_angle: 180.0,
            inverted: false,
        }
    }

    /// Two-way road with `lanes_per_direction` car lanes each way, driving on the right.
    pub fn road(lanes_per_direction: u8, speed_limit: f32) -> Self {
        let mut lanes = Vec::new();
        for i in 0..lanes_per_direction {
            let lateral = f32::from(i) * LANE_WIDTH + LANE_WIDTH / 2.0;
            lanes.push(LaneSpec::car(Direction::FORWARD, lateral, speed_limit));
            lanes.push(LaneSpec::car(Direction::BACKWARD, -lateral, speed_limit));
        }
        Self::new(lanes)
    }

    /// One-way road running from the start node to the end node.
    pub fn one_way(lanes: u8, speed_limit: f32) -> Self {
        let half = f32::from(lanes) * LANE_WIDTH / 2.0;
        let lanes = (0..lanes)
            .map(|i| {
                let lateral = f32::from(i) * LANE_WIDTH + LANE_WIDTH / 2.0 - half;
                LaneSpec::car(Direction::FORWARD, lateral, speed_limit)
            })
            .collect();
        Self::new(lanes)
    }

    /// One-way road under highway lane rules.
    pub fn highway(lanes: u8, speed_limit: f32) -> Self {
        Self {
            highway_rules: true,
            ..Self::one_way(lanes, speed_limit)
        }
    }

    /// A walking path with a single two-way lane.
    pub fn footpath() -> Self {
        Self::new(vec![LaneSpec::sidewalk(0.0)])
    }

    /// Add a sidewalk on each side, outside the existing lanes.
    pub fn with_sidewalks(mut self) -> Self {
        let outer = self
            .lanes
            .iter()
            .map(|l| l.lateral.abs())
            .fold(0.0_f32, f32::max);
        let lateral = outer + LANE_WIDTH;
        self.lanes.push(LaneSpec::sidewalk(-lateral));
        self.lanes.push(LaneSpec::sidewalk(lateral));
        self
    }

    pub fn with_lane(mut self, lane: LaneSpec) -> Self {
        self.lanes.push(lane);
        self
    }

    pub fn with_highway_rules(mut self) -> Self {
        self.highway_rules = true;
        self
    }

    pub fn with_max_turn_angle(mut self, degrees: f32) -> Self {
        self.max_turn_angle = degrees;
        self
    }

    /// Mark the segment inverted: every lane's direction is flipped when routing.
    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }
}

/// Incrementally assembles a [`RoadNetwork`].
#[derive(Debug, Default)]
pub struct RoadNetworkBuilder {
    nodes: Vec<Node>,
    segments: Vec<Segment>,
    lanes: Vec<Lane>,
}

impl RoadNetworkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node at a position.
    pub fn add_node(&mut self, position: Point) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            position,
            flags: NodeFlags::empty(),
            segments: Vec::new(),
            lane: None,
            lane_offset: 0,
            next_lane_node: None,
        });
        id
    }

    /// Add a segment from `start` to `end` with the given lanes.
    ///
    /// Lanes are indexed in order of lateral position, left to right when looking
    /// from the start node towards the end node.
    pub fn add_segment(
        &mut self,
        start: NodeId,
        end: NodeId,
        spec: &SegmentSpec,
    ) -> Result<SegmentId, BuildError> {
        if start == end {
            return Err(BuildError::SelfLoop(start));
        }
        let start_pos = self.node_mut(start)?.position;
        let end_pos = self.node_mut(end)?.position;
        for node in [start, end] {
            if self.node_mut(node)?.segments.len() >= MAX_NODE_SEGMENTS {
                return Err(BuildError::NodeFull(node));
            }
        }

        let id = SegmentId::new(self.segments.len() as u32);
        let forward = start_pos.direction_to(end_pos);
        let right = Point::flat(forward.z, -forward.x);
        let backward = Point::flat(-forward.x, -forward.z);

        let mut specs = spec.lanes.clone();
        specs.sort_by(|a, b| a.lateral.total_cmp(&b.lateral));

        let mut lane_ids = Vec::with_capacity(specs.len());
        for (index, lane_spec) in specs.iter().enumerate() {
            let lane_id = LaneId::new(self.lanes.len() as u32);
            let shift = |p: Point| {
                Point::new(
                    p.x + right.x * lane_spec.lateral,
                    p.y,
                    p.z + right.z * lane_spec.lateral,
                )
            };
            let (a, d) = (shift(start_pos), shift(end_pos));
            self.lanes.push(Lane {
                id: lane_id,
                segment: id,
                index: index as u8,
                info: LaneInfo {
                    lane_type: lane_spec.lane_type,
                    vehicle_type: lane_spec.vehicle_type,
                    direction: lane_spec.direction,
                    final_direction: lane_spec.final_direction,
                    speed_limit: lane_spec.speed_limit,
                    lateral: lane_spec.lateral,
                    similar_lane_index: 0,
                    similar_lane_count: 1,
                },
                start: a,
                end: d,
                length: a.distance(d),
                arrows: LaneArrows::empty(),
                targets: None,
                first_attached_node: None,
            });
            lane_ids.push(lane_id);
        }

        self.segments.push(Segment {
            id,
            start_node: start,
            end_node: end,
            flags: if spec.inverted {
                SegmentFlags::INVERT
            } else {
                SegmentFlags::empty()
            },
            average_length: start_pos.distance(end_pos),
            lanes: lane_ids,
            start_direction: forward,
            end_direction: backward,
            max_turn_angle_cos: spec.max_turn_angle.to_radians().cos(),
            highway_rules: spec.highway_rules,
            traffic_density: 0,
        });
        self.node_mut(start)?.segments.push(id);
        self.node_mut(end)?.segments.push(id);
        Ok(id)
    }

    /// Add node flags on top of the ones derived at build time.
    pub fn set_node_flags(&mut self, node: NodeId, flags: NodeFlags) -> Result<(), BuildError> {
        self.node_mut(node)?.flags |= flags;
        Ok(())
    }

    pub fn set_segment_flags(
        &mut self,
        segment: SegmentId,
        flags: SegmentFlags,
    ) -> Result<(), BuildError> {
        self.segment_mut(segment)?.flags |= flags;
        Ok(())
    }

    pub fn set_segment_traffic(&mut self, segment: SegmentId, percent: u8) -> Result<(), BuildError> {
        self.segment_mut(segment)?.traffic_density = percent.min(100);
        Ok(())
    }

    pub fn set_lane_arrows(
        &mut self,
        segment: SegmentId,
        lane: u8,
        arrows: LaneArrows,
    ) -> Result<(), BuildError> {
        self.lane_mut(segment, lane)?.arrows = arrows;
        Ok(())
    }

    /// Restrict which lanes (by index from the left) a lane may feed.
    pub fn set_lane_targets(
        &mut self,
        segment: SegmentId,
        lane: u8,
        first: u8,
        last: u8,
    ) -> Result<(), BuildError> {
        self.lane_mut(segment, lane)?.targets = Some((first, last));
        Ok(())
    }

    /// Attach `node` to a lane at an offset, e.g. a stop on a sidewalk.
    pub fn attach_node(
        &mut self,
        node: NodeId,
        segment: SegmentId,
        lane: u8,
        offset: u8,
    ) -> Result<(), BuildError> {
        let lane_ref = self.lane_mut(segment, lane)?;
        let lane_id = lane_ref.id;
        let previous_head = lane_ref.first_attached_node.replace(node);
        let node_ref = self.node_mut(node)?;
        node_ref.lane = Some(lane_id);
        node_ref.lane_offset = offset;
        node_ref.next_lane_node = previous_head;
        Ok(())
    }

    /// Derive ordering, flags and geometry, and freeze the network.
    pub fn build(mut self) -> RoadNetwork {
        self.assign_similar_lanes();
        self.order_node_segments();
        self.derive_node_flags();

        let mut geometry = HashMap::new();
        for node in &self.nodes {
            for &segment in &node.segments {
                geometry.insert((segment, node.id), self.compute_geometry(segment, node));
            }
        }

        debug!(
            nodes = self.nodes.len(),
            segments = self.segments.len(),
            lanes = self.lanes.len(),
            "road network built"
        );

        let density = LaneTrafficDensity::new(self.lanes.len());
        RoadNetwork {
            nodes: self.nodes,
            segments: self.segments,
            lanes: self.lanes,
            geometry,
            density,
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, BuildError> {
        self.nodes
            .get_mut(id.index())
            .ok_or(BuildError::UnknownNode(id))
    }

    fn segment_mut(&mut self, id: SegmentId) -> Result<&mut Segment, BuildError> {
        self.segments
            .get_mut(id.index())
            .ok_or(BuildError::UnknownSegment(id))
    }

    fn lane_mut(&mut self, segment: SegmentId, index: u8) -> Result<&mut Lane, BuildError> {
        let lane_id = self
            .segment_mut(segment)?
            .lane(index)
            .ok_or(BuildError::UnknownLane { segment, index })?;
        self.lanes
            .get_mut(lane_id.index())
            .ok_or(BuildError::UnknownLane { segment, index })
    }

    fn assign_similar_lanes(&mut self) {
        for segment in &self.segments {
            for &lane_id in &segment.lanes {
                let info = self.lanes[lane_id.index()].info;
                let similar: Vec<f32> = segment
                    .lanes
                    .iter()
                    .map(|id| &self.lanes[id.index()].info)
                    .filter(|other| {
                        other.lane_type == info.lane_type
                            && other.vehicle_type == info.vehicle_type
                            && other.direction & Direction::BOTH == info.direction & Direction::BOTH
                    })
                    .map(|other| other.lateral)
                    .collect();
                let index = similar.iter().filter(|&&l| l < info.lateral).count();
                let lane = &mut self.lanes[lane_id.index()];
                lane.info.similar_lane_index = index as u8;
                lane.info.similar_lane_count = similar.len() as u8;
            }
        }
    }

    fn order_node_segments(&mut self) {
        let segments = &self.segments;
        for node in &mut self.nodes {
            let id = node.id;
            node.segments.sort_by(|a, b| {
                let angle = |s: &SegmentId| outward_angle(&segments[s.index()], id);
                angle(a).total_cmp(&angle(b))
            });
        }
    }

    fn derive_node_flags(&mut self) {
        for i in 0..self.nodes.len() {
            let node = &self.nodes[i];
            let mut flags = NodeFlags::empty();
            match node.segments.len() {
                0 => {}
                1 => flags |= NodeFlags::END,
                2 => {
                    let a = &self.segments[node.segments[0].index()];
                    let b = &self.segments[node.segments[1].index()];
                    if a.lanes.len() != b.lanes.len() {
                        flags |= NodeFlags::TRANSITION;
                    } else if a.direction_at(node.id).dot_flat(b.direction_at(node.id)) > -0.999 {
                        flags |= NodeFlags::BEND;
                    }
                }
                _ => flags |= NodeFlags::JUNCTION,
            }

            let vehicle_segments: Vec<&Segment> = node
                .segments
                .iter()
                .map(|s| &self.segments[s.index()])
                .filter(|s| self.has_motor_lanes(s))
                .collect();
            if node.segments.iter().all(|s| !self.has_motor_lanes(&self.segments[s.index()])) {
                flags |= NodeFlags::PEDESTRIAN_ONLY;
            } else if vehicle_segments
                .iter()
                .all(|s| self.leads_only_away(s, node.id))
            {
                flags |= NodeFlags::ONE_WAY_OUT;
            }
            self.nodes[i].flags |= flags;
        }
    }

    fn has_motor_lanes(&self, segment: &Segment) -> bool {
        segment.lanes.iter().any(|id| {
            let info = &self.lanes[id.index()].info;
            info.lane_type
                .intersects(LaneType::VEHICLE | LaneType::TRANSPORT_VEHICLE)
                && info.vehicle_type != VehicleType::BICYCLE
        })
    }

    fn travel_directions(&self, segment: &Segment) -> Vec<Direction> {
        segment
            .lanes
            .iter()
            .map(|id| &self.lanes[id.index()].info)
            .filter(|info| {
                info.lane_type
                    .intersects(LaneType::VEHICLE | LaneType::TRANSPORT_VEHICLE)
            })
            .map(|info| info.direction.oriented(segment.is_inverted()) & Direction::BOTH)
            .collect()
    }

    fn leads_only_away(&self, segment: &Segment, node: NodeId) -> bool {
        let away = if node == segment.start_node {
            Direction::FORWARD
        } else {
            Direction::BACKWARD
        };
        let dirs = self.travel_directions(segment);
        !dirs.is_empty() && dirs.iter().all(|&d| d == away)
    }

    fn leads_only_towards(&self, segment: &Segment, node: NodeId) -> bool {
        let towards = if node == segment.start_node {
            Direction::BACKWARD
        } else {
            Direction::FORWARD
        };
        let dirs = self.travel_directions(segment);
        !dirs.is_empty() && dirs.iter().all(|&d| d == towards)
    }

    fn compute_geometry(&self, segment_id: SegmentId, node: &Node) -> SegmentGeometry {
        let segment = &self.segments[segment_id.index()];
        let base = outward_angle(segment, node.id);

        let mut relative: Vec<f32> = node
            .segments
            .iter()
            .filter(|&&s| s != segment_id)
            .map(|s| {
                let angle = outward_angle(&self.segments[s.index()], node.id);
                (angle - base).rem_euclid(TAU) - PI
            })
            .collect();
        relative.sort_by(f32::total_cmp);

        let right_segments = relative.iter().filter(|&&t| t < -STRAIGHT_TOLERANCE).count();
        let has_straight = relative.iter().any(|t| t.abs() <= STRAIGHT_TOLERANCE);
        let left_segments = relative.len() - right_segments - usize::from(has_straight);

        let incoming_one_way = self.leads_only_towards(segment, node.id);
        let outgoing_one_way = self.leads_only_away(segment, node.id);
        SegmentGeometry {
            right_segments: right_segments as u8,
            has_straight,
            left_segments: left_segments as u8,
            is_one_way: incoming_one_way || outgoing_one_way,
            incoming_one_way,
            outgoing_one_way,
        }
    }
}

/// Angle in `[0, 2π)` of the segment's direction leaving `node`, counter-clockwise from +x.
fn outward_angle(segment: &Segment, node: NodeId) -> f32 {
    let dir = segment.direction_at(node);
    dir.z.atan2(dir.x).rem_euclid(TAU)
}

/// A complete lane network held in memory.
#[derive(Debug)]
pub struct RoadNetwork {
    nodes: Vec<Node>,
    segments: Vec<Segment>,
    lanes: Vec<Lane>,
    geometry: HashMap<(SegmentId, NodeId), SegmentGeometry>,
    density: LaneTrafficDensity,
}

impl RoadNetwork {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// The density signal. Writers share it with running searches.
    pub fn density(&self) -> &LaneTrafficDensity {
        &self.density
    }

    /// Replace a segment's flags between searches, e.g. to block it.
    pub fn set_segment_flags(&mut self, segment: SegmentId, flags: SegmentFlags) -> bool {
        match self.segments.get_mut(segment.index()) {
            Some(s) => {
                s.flags = flags;
                true
            }
            None => false,
        }
    }

    /// Refresh the density of every lane whose segment is due on `tick`.
    pub fn update_densities(&self, sweep: SegmentSweep, tick: u32) -> usize {
        let mut updated = 0;
        for segment in &self.segments {
            if !sweep.is_due(segment.id.get(), tick) {
                continue;
            }
            for &lane_id in &segment.lanes {
                let length = self.lanes[lane_id.index()].length;
                self.density.update_lane(lane_id, length);
                updated += 1;
            }
        }
        updated
    }
}

impl LaneGraph for RoadNetwork {
    fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id.index())
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    fn lane(&self, id: LaneId) -> Option<&Lane> {
        self.lanes.get(id.index())
    }

    fn segment_geometry(&self, segment: SegmentId, node: NodeId) -> Option<SegmentGeometry> {
        self.geometry.get(&(segment, node)).copied()
    }

    fn right_segment(&self, segment: SegmentId, node: NodeId) -> Option<SegmentId> {
        let list = &self.node(node)?.segments;
        let pos = list.iter().position(|&s| s == segment)?;
        list.get((pos + 1) % list.len()).copied()
    }

    fn left_segment(&self, segment: SegmentId, node: NodeId) -> Option<SegmentId> {
        let list = &self.node(node)?.segments;
        let pos = list.iter().position(|&s| s == segment)?;
        list.get((pos + list.len() - 1) % list.len()).copied()
    }

    fn left_and_right_lanes(
        &self,
        segment: SegmentId,
        node: NodeId,
        lane_types: LaneType,
        vehicle_types: VehicleType,
        from_lane: Option<u8>,
    ) -> LeftRightLanes {
        let Some(seg) = self.segment(segment) else {
            return LeftRightLanes::default();
        };
        // Lateral position as seen by someone walking along the segment towards `node`.
        let facing = |lane: &Lane| {
            if node == seg.end_node {
                lane.info.lateral
            } else {
                -lane.info.lateral
            }
        };
        let origin = from_lane
            .and_then(|i| seg.lane(i))
            .and_then(|id| self.lane(id))
            .map(facing);

        let mut result = LeftRightLanes::default();
        let mut best_left = f32::INFINITY;
        let mut best_right = f32::NEG_INFINITY;
        let mut nearest_left = f32::NEG_INFINITY;
        let mut nearest_right = f32::INFINITY;
        for (index, &lane_id) in seg.lanes.iter().enumerate() {
            let Some(lane) = self.lane(lane_id) else {
                continue;
            };
            if Some(index as u8) == from_lane || !lane.info.check_type(lane_types, vehicle_types) {
                continue;
            }
            let q = facing(lane);
            let entry = Some((index as u8, lane_id));
            match origin {
                Some(o) if q < o && q > nearest_left => {
                    nearest_left = q;
                    result.left = entry;
                }
                Some(o) if q > o && q < nearest_right => {
                    nearest_right = q;
                    result.right = entry;
                }
                Some(_) => {}
                None => {
                    if q < best_left {
                        best_left = q;
                        result.left = entry;
                    }
                    if q > best_right {
                        best_right = q;
                        result.right = entry;
                    }
                }
            }
        }
        result
    }

    fn mean_traffic_density(&self, lane: LaneId) -> f32 {
        self.density.mean(lane).clamp(0.0, 1.0)
    }
}
