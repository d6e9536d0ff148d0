//! The pedestrian and bicycle rule: crossings, footpaths and mode switches.

use super::{Crossing, LaneFilter, Relaxer, log_branch};
use crate::network::{
    Direction, LaneGraph, LaneId, LanePosition, LaneType, MAX_NODE_SEGMENTS, NetworkDataError,
    NodeFlags, NodeId, SegmentFlags, SegmentId, VehicleType,
};
use crate::pathfind::queue::FrontierEntry;

/// Walking further than this from the destination is not considered.
pub const MAX_WALK_DISTANCE: f32 = 1000.0;

/// Flat cost added for the first step off a zero-distance entry, in metres.
const FIRST_STEP_PENALTY: f32 = 100.0;

impl<G: LaneGraph + ?Sized> Relaxer<'_, G> {
    /// Expand a sidewalk entry at a node.
    pub(super) fn process_pedestrian_node(
        &mut self,
        at: &Crossing<'_>,
        from_left: &mut i32,
    ) -> Result<(), NetworkDataError> {
        let source = &at.source;
        let node = at.node;
        let prev_id = source.segment.id;
        let params = self.params;

        if !node.flags.contains(NodeFlags::PEDESTRIAN_ONLY) {
            let may_cross = node
                .flags
                .intersects(NodeFlags::END | NodeFlags::BEND | NodeFlags::JUNCTION);
            let near = self.graph.left_and_right_lanes(
                prev_id,
                node.id,
                LaneType::PEDESTRIAN,
                VehicleType::empty(),
                Some(source.entry.position.lane),
            );
            let mut left = near.left.map(|lane| (prev_id, lane));
            let mut right = near.right.map(|lane| (prev_id, lane));
            if left.is_none() {
                left = self.neighbour_sidewalk(prev_id, node.id, Side::Left);
            }
            if right.is_none() {
                right = self.neighbour_sidewalk(prev_id, node.id, Side::Right);
            }

            if let Some((segment, (index, lane))) = left
                && (segment != prev_id || may_cross)
            {
                let result = self.expand_ped_bicycle(at, segment, at.connect_offset, index, lane);
                log_branch(result, segment);
            }
            if let Some((segment, (index, lane))) = right
                && left.is_none_or(|(_, (_, l))| l != lane)
                && (segment != prev_id || may_cross)
            {
                let result = self.expand_ped_bicycle(at, segment, at.connect_offset, index, lane);
                log_branch(result, segment);
            }

            if params.vehicle_types.contains(VehicleType::BICYCLE) {
                let bicycle = self.graph.closest_compatible_lane(
                    prev_id,
                    source.entry.position.lane,
                    LaneType::VEHICLE,
                    VehicleType::BICYCLE,
                );
                if let Some((index, lane)) = bicycle {
                    let result = self.expand_ped_bicycle(at, prev_id, at.connect_offset, index, lane);
                    log_branch(result, prev_id);
                }
            }
        } else {
            let walk_only = LaneFilter {
                vehicle: false,
                pedestrian: true,
            };
            for &next in &node.segments {
                if next != prev_id {
                    let result = self.expand_segment(at, next, from_left, walk_only, None);
                    log_branch(result, next);
                }
            }
        }

        // Switch back to riding on this segment, unless a vehicle was already used.
        let mut lane_types = params.lane_types - LaneType::PEDESTRIAN;
        let vehicle_types = params.vehicle_types - VehicleType::BICYCLE;
        if source
            .entry
            .lanes_used
            .intersects(LaneType::VEHICLE | LaneType::TRANSPORT_VEHICLE)
        {
            lane_types -= LaneType::VEHICLE | LaneType::TRANSPORT_VEHICLE;
        }
        if lane_types.is_empty() || vehicle_types.is_empty() {
            return Ok(());
        }
        let Some((index, lane_id)) = self.graph.closest_compatible_lane(
            prev_id,
            source.entry.position.lane,
            lane_types,
            vehicle_types,
        ) else {
            return Ok(());
        };
        let lane = self.lane(lane_id)?;
        let connect = if source.segment.is_inverted() == lane.info.final_direction.contains(Direction::BACKWARD) {
            1
        } else {
            254
        };
        self.expand_ped_bicycle(at, prev_id, connect, index, lane_id)
    }

    /// Nearest sidewalk on the segments beside `segment` at `node`, searching
    /// outward on one side. On a left neighbour, the sidewalk nearest to us is its
    /// right-hand one, and the other way round.
    fn neighbour_sidewalk(
        &self,
        segment: SegmentId,
        node: NodeId,
        side: Side,
    ) -> Option<(SegmentId, (u8, LaneId))> {
        let step = |s: SegmentId| match side {
            Side::Left => self.graph.left_segment(s, node),
            Side::Right => self.graph.right_segment(s, node),
        };
        let mut current = step(segment);
        for _ in 0..MAX_NODE_SEGMENTS {
            let candidate = current.filter(|&s| s != segment)?;
            let lanes = self.graph.left_and_right_lanes(
                candidate,
                node,
                LaneType::PEDESTRIAN,
                VehicleType::empty(),
                None,
            );
            let facing = match side {
                Side::Left => lanes.right,
                Side::Right => lanes.left,
            };
            if let Some(lane) = facing {
                return Some((candidate, lane));
            }
            current = step(candidate);
        }
        None
    }

    /// Push one walking or cycling lane on `segment_id` as a predecessor.
    ///
    /// On the source segment itself, the candidate sits at the connect offset beside
    /// the source. Elsewhere it sits at the node end of the lane.
    pub(super) fn expand_ped_bicycle(
        &mut self,
        at: &Crossing<'_>,
        segment_id: SegmentId,
        connect_offset: u8,
        lane_index: u8,
        lane_id: LaneId,
    ) -> Result<(), NetworkDataError> {
        let segment = self.segment(segment_id)?;
        if segment
            .flags
            .intersects(SegmentFlags::PATH_FAILED | SegmentFlags::FLOODED)
        {
            return Ok(());
        }
        if usize::from(lane_index) >= segment.lanes.len() {
            return Err(NetworkDataError::LaneIndexOutOfRange {
                segment: segment_id,
                index: lane_index,
            });
        }
        let lane = self.lane(lane_id)?;
        let source = &at.source;
        let node = at.node;
        let params = self.params;

        let crossing = Crossing {
            connect_offset,
            ..*at
        };
        let prev_point = source.lane.position_at_offset(connect_offset);
        let (distance, offset) = if segment_id == source.segment.id {
            (
                lane.position_at_offset(connect_offset).distance(prev_point),
                connect_offset,
            )
        } else if node.id != segment.start_node {
            (lane.end.distance(prev_point), 255)
        } else {
            (lane.start.distance(prev_point), 0)
        };

        let (prev_method, mut prev_cost) = self.leave_source(&crossing, source.segment.average_length);
        let segments_to_junction = if self.is_junction_node(source.segment.other_node(node.id)) {
            1
        } else if node.segments.len() > 2 {
            0
        } else {
            source.entry.segments_to_junction + 1
        };

        let method_distance = if lane.info.lane_type.intersects(source.family()) {
            if source.entry.method_distance == 0.0 {
                prev_cost += FIRST_STEP_PENALTY / (0.25 * params.max_length);
            }
            prev_method + distance
        } else {
            0.0
        };
        if lane.info.is_pedestrian() && method_distance >= MAX_WALK_DISTANCE {
            return Ok(());
        }

        let speed_scale = (source.info().speed_limit + lane.info.speed_limit) * 0.25 * params.max_length;
        let mut entry = FrontierEntry {
            position: LanePosition::new(segment_id, lane_index, offset),
            lane_id,
            cost: prev_cost + distance / speed_scale,
            method_distance,
            direction: lane.info.final_direction.oriented(segment.is_inverted()),
            lanes_used: source.entry.lanes_used | lane.info.lane_type,
            segments_to_junction,
        };
        if !self.accept_start_lane(&mut entry, segment, &lane.info) {
            return Ok(());
        }
        self.apply_congestion(&mut entry, segment, &lane.info, speed_scale);
        self.offer(entry, source.entry.position);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}
