//! Lane relaxation: turning one popped frontier entry into candidate predecessors.
//!
//! The search runs from the destination back towards the start, so every rule here
//! looks at the node *behind* the vehicle's direction of travel and asks which lanes
//! could have led onto the current one. Three rules cover the network:
//!
//! - the vehicle rule walks every other segment at a node, optionally filtered by
//!   lane arrows and the merge/split matcher ([`vehicle`]);
//! - the pedestrian rule crosses to neighbouring sidewalks and swaps between walking
//!   and riding on the same segment ([`pedestrian`]);
//! - the special-lane rule connects lanes to nodes attached along them, such as
//!   stops ([`special`]).
//!
//! Every candidate goes through the same final checks before it is pushed: the
//! start-lane acceptance test, the blocked and transit penalties, and cost clamping.

mod pedestrian;
mod special;
mod vehicle;

use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use super::config::{DriveSide, PathFindConfig, RoutingPolicy};
use super::cost::{lane_speed, offset_fraction};
use super::epoch::SearchEpoch;
use super::queue::{BucketQueue, FrontierEntry, PushOutcome};
use crate::network::{
    Direction, Lane, LaneGraph, LaneId, LaneInfo, LanePosition, LaneType, NetworkDataError, Node,
    NodeId, Segment, SegmentFlags, SegmentId, VehicleType,
};

/// Request parameters resolved against the network, fixed for one search.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Lanes the vehicle may start on, with the exact start positions.
    pub starts: [Option<(LaneId, LanePosition)>; 2],
    /// Lanes the search is seeded from.
    pub ends: [Option<LaneId>; 2],
    /// The lane the vehicle is parked on and its offset, for pedestrian hand-off.
    pub vehicle_lane: Option<(LaneId, u8)>,
    pub lane_types: LaneType,
    pub vehicle_types: VehicleType,
    /// Length budget that normalizes every cost.
    pub max_length: f32,
    pub heavy: bool,
    pub ignore_blocked: bool,
    pub stable: bool,
    /// The request is for a public transport vehicle.
    pub transit: bool,
    pub policy: RoutingPolicy,
}

impl SearchParams {
    pub fn is_start_or_end_lane(&self, lane: LaneId) -> bool {
        self.starts.iter().flatten().any(|(id, _)| *id == lane)
            || self.ends.iter().flatten().any(|id| *id == lane)
    }
}

/// The entry being expanded together with its resolved segment and lane.
#[derive(Clone, Copy)]
struct Source<'a> {
    entry: FrontierEntry,
    segment: &'a Segment,
    lane: &'a Lane,
}

impl Source<'_> {
    fn info(&self) -> &LaneInfo {
        &self.lane.info
    }

    /// Lane types that count as "the same kind" as the source lane.
    fn family(&self) -> LaneType {
        let lane_type = self.lane.info.lane_type;
        if lane_type.intersects(LaneType::VEHICLE | LaneType::TRANSPORT_VEHICLE) {
            lane_type | LaneType::VEHICLE | LaneType::TRANSPORT_VEHICLE
        } else {
            lane_type
        }
    }
}

/// A source entry being connected through a node at a given offset.
#[derive(Clone, Copy)]
struct Crossing<'a> {
    source: Source<'a>,
    node: &'a Node,
    /// Offset on the source lane where the connection is made.
    connect_offset: u8,
}

/// Which lane kinds a vehicle-rule expansion may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LaneFilter {
    vehicle: bool,
    pedestrian: bool,
}

/// Lane indices counted from the right and from the left in travel direction.
pub fn similar_indices(info: &LaneInfo, drive_side: DriveSide) -> (u8, u8) {
    let normal = match drive_side {
        DriveSide::Right => Direction::BACKWARD,
        DriveSide::Left => Direction::FORWARD,
    };
    let count = info.similar_lane_count.max(1);
    let index = info.similar_lane_index.min(count - 1);
    let from_right = if info.direction.intersects(normal) {
        index
    } else {
        count - index - 1
    };
    (from_right, count - from_right - 1)
}

/// Expands frontier entries for one search run.
pub struct Relaxer<'a, G: LaneGraph + ?Sized> {
    graph: &'a G,
    config: &'a PathFindConfig,
    params: &'a SearchParams,
    queue: &'a mut BucketQueue,
    rng: &'a mut ChaCha8Rng,
    epoch: SearchEpoch,
}

impl<'a, G: LaneGraph + ?Sized> Relaxer<'a, G> {
    pub fn new(
        graph: &'a G,
        config: &'a PathFindConfig,
        params: &'a SearchParams,
        queue: &'a mut BucketQueue,
        rng: &'a mut ChaCha8Rng,
    ) -> Self {
        let epoch = queue.epoch();
        Self {
            graph,
            config,
            params,
            queue,
            rng,
            epoch,
        }
    }

    /// Take the cheapest pending entry.
    pub fn pop(&mut self) -> Option<FrontierEntry> {
        self.queue.pop_min()
    }

    /// Push every predecessor of `item` into the queue.
    ///
    /// A failure in one branch skips that branch only. The error returned here means
    /// the entry itself could not be resolved, or its attached node list is corrupt.
    pub fn expand(&mut self, item: &FrontierEntry) -> Result<(), NetworkDataError> {
        let segment = self.segment(item.position.segment)?;
        let steps = [
            (Direction::FORWARD, segment.start_node, 0),
            (Direction::BACKWARD, segment.end_node, 255),
        ];
        for (direction, node, connect_offset) in steps {
            if !item.direction.contains(direction) {
                continue;
            }
            if let Err(err) = self.process_node(item, node, connect_offset, false) {
                debug!(position = %item.position, node = %node, error = %err, "skipping node");
            }
        }
        self.walk_attached_nodes(item)
    }

    /// Connect `item` through `node_id`. Middle nodes are nodes attached along the
    /// item's lane, where only the vehicle rule applies.
    fn process_node(
        &mut self,
        item: &FrontierEntry,
        node_id: NodeId,
        connect_offset: u8,
        is_middle: bool,
    ) -> Result<(), NetworkDataError> {
        let segment = self.segment(item.position.segment)?;
        let lane = self.lane(item.lane_id)?;
        let node = self.node(node_id)?;
        let at = Crossing {
            source: Source {
                entry: *item,
                segment,
                lane,
            },
            node,
            connect_offset,
        };

        let info = &lane.info;
        let count = i32::from(info.similar_lane_count.max(1));
        let index = i32::from(info.similar_lane_index);
        let mut from_left = if info.final_direction.contains(Direction::FORWARD) {
            index
        } else {
            count - index - 1
        };

        if is_middle {
            let pedestrian = info.is_pedestrian();
            let filter = LaneFilter {
                vehicle: !pedestrian,
                pedestrian,
            };
            for &next in &node.segments {
                let result = self.expand_segment(&at, next, &mut from_left, filter, None);
                log_branch(result, next);
            }
        } else if info.is_pedestrian() {
            self.process_pedestrian_node(&at, &mut from_left)?;
        } else {
            self.process_vehicle_node(&at, &mut from_left);
        }

        if let Some(special) = node.lane {
            let special_lane = self.lane(special)?;
            if special_lane.segment != segment.id {
                let result = self.expand_special_lane(&at, special_lane);
                log_branch(result, special_lane.segment);
            }
        }
        Ok(())
    }

    // ========== shared candidate rules ==========

    /// Cost and walked distance after leaving the source lane at the crossing.
    fn leave_source(&self, at: &Crossing<'_>, segment_cost: f32) -> (f32, f32) {
        let source = &at.source;
        let speed = lane_speed(
            at.connect_offset,
            source.entry.position.offset,
            source.segment,
            source.info(),
        );
        let travelled = offset_fraction(at.connect_offset, source.entry.position.offset) * segment_cost;
        (
            source.entry.method_distance + travelled,
            source.entry.cost + travelled / (speed * self.params.max_length),
        )
    }

    /// On a start lane, accept the candidate only when its direction reaches the start
    /// offset, and add the cost of the stretch between them.
    fn accept_start_lane(&self, entry: &mut FrontierEntry, segment: &Segment, info: &LaneInfo) -> bool {
        let Some((_, start)) = self
            .params
            .starts
            .iter()
            .flatten()
            .find(|(lane, _)| *lane == entry.lane_id)
        else {
            return true;
        };
        accept_start(entry, *start, segment, info, self.params.max_length)
    }

    /// Blocked and transit penalties. Returns true when the lane is blocked.
    fn apply_congestion(
        &self,
        entry: &mut FrontierEntry,
        segment: &Segment,
        info: &LaneInfo,
        speed_scale: f32,
    ) -> bool {
        let mut blocked = false;
        if !self.params.ignore_blocked
            && segment.flags.contains(SegmentFlags::BLOCKED)
            && info
                .lane_type
                .intersects(LaneType::VEHICLE | LaneType::TRANSPORT_VEHICLE)
        {
            entry.cost += 0.1;
            blocked = true;
        }
        if !self.params.transit && info.lane_type == LaneType::TRANSPORT_VEHICLE {
            entry.cost += 20.0 / speed_scale;
        }
        blocked
    }

    fn offer(&mut self, mut entry: FrontierEntry, successor: LanePosition) -> PushOutcome {
        if entry.cost < 0.0 {
            entry.cost = 0.0;
        }
        let outcome = self.queue.push(entry, successor);
        trace!(
            position = %entry.position,
            cost = entry.cost,
            ?outcome,
            "offer"
        );
        outcome
    }

    // ========== lookups ==========

    fn segment(&self, id: SegmentId) -> Result<&'a Segment, NetworkDataError> {
        self.graph
            .segment(id)
            .ok_or(NetworkDataError::MissingSegment(id))
    }

    fn node(&self, id: NodeId) -> Result<&'a Node, NetworkDataError> {
        self.graph.node(id).ok_or(NetworkDataError::MissingNode(id))
    }

    fn lane(&self, id: LaneId) -> Result<&'a Lane, NetworkDataError> {
        self.graph.lane(id).ok_or(NetworkDataError::MissingLane(id))
    }

    fn lane_at(&self, segment: &Segment, index: u8) -> Result<&'a Lane, NetworkDataError> {
        let id = segment
            .lane(index)
            .ok_or(NetworkDataError::LaneIndexOutOfRange {
                segment: segment.id,
                index,
            })?;
        self.lane(id)
    }

    fn is_junction_node(&self, id: NodeId) -> bool {
        self.graph.node(id).is_some_and(|n| n.segments.len() > 2)
    }
}

fn log_branch<T>(result: Result<T, NetworkDataError>, segment: SegmentId) {
    if let Err(err) = result {
        debug!(segment = %segment, error = %err, "skipping branch");
    }
}

/// The start-lane check on its own, shared with destination seeding.
pub fn accept_start(
    entry: &mut FrontierEntry,
    start: LanePosition,
    segment: &Segment,
    info: &LaneInfo,
    max_length: f32,
) -> bool {
    let offset = entry.position.offset;
    let reaches_forward = entry.direction.contains(Direction::FORWARD) && offset >= start.offset;
    let reaches_backward = entry.direction.contains(Direction::BACKWARD) && offset <= start.offset;
    if !reaches_forward && !reaches_backward {
        return false;
    }
    let speed = lane_speed(start.offset, offset, segment, info);
    entry.cost += offset_fraction(offset, start.offset) * segment.average_length / (speed * max_length);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Point;

    fn info(direction: Direction, index: u8, count: u8) -> LaneInfo {
        LaneInfo {
            lane_type: LaneType::VEHICLE,
            vehicle_type: VehicleType::CAR,
            direction,
            final_direction: direction,
            speed_limit: 10.0,
            lateral: 0.0,
            similar_lane_index: index,
            similar_lane_count: count,
        }
    }

    fn segment() -> Segment {
        Segment {
            id: SegmentId::new(0),
            start_node: NodeId::new(0),
            end_node: NodeId::new(1),
            flags: SegmentFlags::empty(),
            average_length: 100.0,
            lanes: vec![LaneId::new(0)],
            start_direction: Point::flat(1.0, 0.0),
            end_direction: Point::flat(-1.0, 0.0),
            max_turn_angle_cos: -1.0,
            highway_rules: false,
            traffic_density: 0,
        }
    }

    fn entry(offset: u8, direction: Direction) -> FrontierEntry {
        FrontierEntry {
            position: LanePosition::new(SegmentId::new(0), 0, offset),
            lane_id: LaneId::new(0),
            cost: 0.0,
            method_distance: 0.0,
            direction,
            lanes_used: LaneType::VEHICLE,
            segments_to_junction: 0,
        }
    }

    #[test]
    fn right_hand_indices_count_from_the_outside() {
        // Forward lanes: highest similar index is the outermost, rightmost lane.
        assert_eq!(similar_indices(&info(Direction::FORWARD, 1, 2), DriveSide::Right), (0, 1));
        assert_eq!(similar_indices(&info(Direction::FORWARD, 0, 2), DriveSide::Right), (1, 0));
        assert_eq!(similar_indices(&info(Direction::BACKWARD, 0, 2), DriveSide::Right), (0, 1));
    }

    #[test]
    fn left_hand_indices_mirror() {
        assert_eq!(similar_indices(&info(Direction::FORWARD, 1, 2), DriveSide::Left), (1, 0));
        assert_eq!(similar_indices(&info(Direction::FORWARD, 0, 3), DriveSide::Left), (0, 2));
    }

    #[test]
    fn start_lane_accepts_only_reachable_offsets() {
        let seg = segment();
        let lane = info(Direction::FORWARD, 0, 1);
        let start = LanePosition::new(SegmentId::new(0), 0, 100);

        let mut ahead = entry(255, Direction::FORWARD);
        assert!(accept_start(&mut ahead, start, &seg, &lane, 1000.0));
        let expected = (155.0 / 255.0) * 100.0 / (10.0 * 1000.0);
        assert!((ahead.cost - expected).abs() < 1e-6);

        let mut behind = entry(50, Direction::FORWARD);
        assert!(!accept_start(&mut behind, start, &seg, &lane, 1000.0));

        let mut backward = entry(50, Direction::BACKWARD);
        assert!(accept_start(&mut backward, start, &seg, &lane, 1000.0));

        let mut exact = entry(100, Direction::FORWARD);
        assert!(accept_start(&mut exact, start, &seg, &lane, 1000.0));
        assert_eq!(exact.cost, 0.0);
    }
}
