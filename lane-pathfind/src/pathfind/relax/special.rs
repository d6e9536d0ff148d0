//! Node-attached lanes: stops and other nodes that hang off a lane at an offset.

use tracing::debug;

use super::{Crossing, Relaxer};
use crate::network::{
    Direction, Lane, LaneGraph, LanePosition, NetworkDataError, SegmentFlags,
};
use crate::pathfind::queue::FrontierEntry;

/// Longest attached-node list followed before it is treated as corrupt.
pub const MAX_ATTACHED_NODES: usize = 32768;

impl<G: LaneGraph + ?Sized> Relaxer<'_, G> {
    /// Connect the source through its node to the lane that node is attached to.
    pub(super) fn expand_special_lane(
        &mut self,
        at: &Crossing<'_>,
        lane: &Lane,
    ) -> Result<(), NetworkDataError> {
        let segment = self.segment(lane.segment)?;
        if segment
            .flags
            .intersects(SegmentFlags::PATH_FAILED | SegmentFlags::FLOODED)
        {
            return Ok(());
        }
        let node = at.node;
        if node.is_disabled() {
            let start_disabled = self.node(segment.start_node)?.is_disabled();
            let end_disabled = self.node(segment.end_node)?.is_disabled();
            if !start_disabled && !end_disabled {
                return Ok(());
            }
        }

        let params = self.params;
        if !lane.info.check_type(params.lane_types, params.vehicle_types) {
            return Ok(());
        }

        let source = &at.source;
        let (prev_method, prev_cost) = self.leave_source(at, source.segment.average_length);
        let distance = lane
            .position_at_offset(node.lane_offset)
            .distance(source.lane.position_at_offset(at.connect_offset));
        let segments_to_junction = if self.is_junction_node(source.segment.other_node(node.id)) {
            1
        } else if node.segments.len() > 2 {
            0
        } else {
            source.entry.segments_to_junction + 1
        };
        let method_distance = if lane.info.lane_type.intersects(source.family()) {
            prev_method + distance
        } else {
            0.0
        };
        if lane.info.is_pedestrian() && method_distance >= super::pedestrian::MAX_WALK_DISTANCE {
            return Ok(());
        }

        let speed_scale = (source.info().speed_limit + lane.info.speed_limit) * 0.5 * params.max_length;
        let mut entry = FrontierEntry {
            position: LanePosition::new(segment.id, lane.index, node.lane_offset),
            lane_id: lane.id,
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

    /// Expand `item` through every node attached along its lane that it passes.
    ///
    /// A node behind the entry's direction of travel is skipped. When either end of
    /// the segment is disabled, only disabled attached nodes are used.
    pub(super) fn walk_attached_nodes(&mut self, item: &FrontierEntry) -> Result<(), NetworkDataError> {
        let lane = self.lane(item.lane_id)?;
        let Some(mut node_id) = lane.first_attached_node else {
            return Ok(());
        };
        let segment = self.segment(item.position.segment)?;
        let ends_disabled = self.node(segment.start_node)?.is_disabled()
            || self.node(segment.end_node)?.is_disabled();

        for _ in 0..MAX_ATTACHED_NODES {
            let node = self.node(node_id)?;
            let mut reachable = Direction::empty();
            if node.lane_offset <= item.position.offset {
                reachable |= Direction::FORWARD;
            }
            if node.lane_offset >= item.position.offset {
                reachable |= Direction::BACKWARD;
            }
            if item.direction.intersects(reachable) && (!ends_disabled || node.is_disabled()) {
                if let Err(err) = self.process_node(item, node_id, node.lane_offset, true) {
                    debug!(node = %node_id, error = %err, "skipping attached node");
                }
            }
            match node.next_lane_node {
                Some(next) => node_id = next,
                None => return Ok(()),
            }
        }
        Err(NetworkDataError::SpecialLaneLoop(item.lane_id))
    }
}
