//! The vehicle rule: entering the current segment from the other segments at a node.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::{Crossing, LaneFilter, Relaxer, log_branch, similar_indices};
use crate::network::{
    Direction, LaneArrows, LaneGraph, LanePosition, LaneType, MAX_NODE_SEGMENTS,
    NetworkDataError, NodeFlags, SegmentFlags, SegmentId, VehicleType,
};
use crate::pathfind::cost::{LaneChange, lane_change_cost, stock_cost_factor};
use crate::pathfind::lane_match::match_lane;
use crate::pathfind::queue::FrontierEntry;

/// Most lanes considered per segment when matching with arrows.
const MAX_MATCHED_LANES: usize = 16;

/// Where the next segment lies relative to the current one, looking out of the node
/// along the current segment. Travel runs the other way, so a segment on the right
/// is reached by turning left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Approach {
    Right,
    Straight,
    Left,
}

impl Approach {
    fn classify(rights_remaining: i32, has_straight: bool) -> Self {
        if rights_remaining > 0 {
            Approach::Right
        } else if rights_remaining == 0 && has_straight {
            Approach::Straight
        } else {
            Approach::Left
        }
    }

    /// Whether a lane with these arrows may make this turn. Unmarked lanes only go
    /// straight.
    fn allows(self, arrows: LaneArrows) -> bool {
        match self {
            Approach::Right => arrows.contains(LaneArrows::LEFT),
            Approach::Left => arrows.contains(LaneArrows::RIGHT),
            Approach::Straight => arrows.contains(LaneArrows::FORWARD) || arrows.is_empty(),
        }
    }
}

/// What expanding one next segment reported back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct SegmentExpansion {
    /// A candidate lane was blocked, so the vehicle may have to turn around.
    pub blocked: bool,
}

/// Facts about the node and current lane that every arrow match reads.
struct MatchContext {
    approach: Approach,
    prev_right: u8,
    prev_left: u8,
    prev_count: u8,
    next_is_junction: bool,
    highway_split: bool,
    has_left: bool,
    has_right: bool,
    /// Vehicle lanes already entered from segments earlier in the sweep.
    lanes_taken: u32,
}

impl<G: LaneGraph + ?Sized> Relaxer<'_, G> {
    /// Sweep the node's segments from the right, then add the U-turn and the
    /// pedestrian hand-off when they apply.
    pub(super) fn process_vehicle_node(&mut self, at: &Crossing<'_>, from_left: &mut i32) {
        let source = &at.source;
        let node = at.node;
        let prev_id = source.segment.id;
        let params = self.params;

        let mut blocked = node.flags.intersects(NodeFlags::END | NodeFlags::ONE_WAY_OUT);
        let mut pedestrian_allowed = params.lane_types.contains(LaneType::PEDESTRIAN);
        let mut enable_pedestrian = false;
        let mut pedestrian_connect = 0;
        if pedestrian_allowed {
            if source.info().is_bicycle() {
                pedestrian_connect = at.connect_offset;
                enable_pedestrian = node.flags.contains(NodeFlags::PEDESTRIAN_ONLY);
            } else if let Some((lane, offset)) = params.vehicle_lane {
                if lane == source.entry.lane_id {
                    pedestrian_connect = offset;
                } else {
                    pedestrian_allowed = false;
                }
            } else if params.stable {
                pedestrian_connect = 128;
            } else {
                pedestrian_connect = self.rng.gen_range(1..=254);
            }
        }

        let geometry = self
            .graph
            .segment_geometry(prev_id, node.id)
            .unwrap_or_default();
        let (prev_right, prev_left) = similar_indices(source.info(), self.config.drive_side);
        let mut ctx = MatchContext {
            approach: Approach::Right,
            prev_right,
            prev_left,
            prev_count: source.info().similar_lane_count,
            next_is_junction: node.segments.len() > 2,
            highway_split: self.config.highway_rules
                && self.graph.is_outgoing_one_way(prev_id, node.id)
                && source.segment.highway_rules
                && node.segments.len() > 2,
            has_left: geometry.left_segments > 0,
            has_right: geometry.right_segments > 0,
            lanes_taken: 0,
        };
        let use_arrows = params.policy.uses_lane_arrows() && !enable_pedestrian;
        let filter = LaneFilter {
            vehicle: true,
            pedestrian: enable_pedestrian,
        };

        let mut rights_remaining = i32::from(geometry.right_segments);
        let mut next = self.graph.right_segment(prev_id, node.id);
        for _ in 0..MAX_NODE_SEGMENTS {
            let Some(next_id) = next else {
                break;
            };
            if next_id == prev_id {
                break;
            }
            ctx.approach = Approach::classify(rights_remaining, geometry.has_straight);

            let mut incoming = 0;
            let result = if use_arrows {
                match self.expand_with_arrows(at, next_id, from_left, &ctx, &mut incoming) {
                    Ok(expansion) => Ok(expansion),
                    Err(err) => {
                        debug!(segment = %next_id, error = %err, "lane matching failed, expanding all lanes");
                        self.expand_segment(at, next_id, from_left, filter, None)
                    }
                }
            } else {
                self.expand_segment(at, next_id, from_left, filter, None)
            };
            match result {
                Ok(expansion) => blocked |= expansion.blocked,
                Err(err) => debug!(segment = %next_id, error = %err, "skipping branch"),
            }

            ctx.lanes_taken += incoming;
            rights_remaining -= 1;
            next = self.graph.right_segment(next_id, node.id);
        }

        if blocked {
            let u_turn = LaneFilter {
                vehicle: true,
                pedestrian: false,
            };
            let result = self.expand_segment(at, prev_id, from_left, u_turn, None);
            log_branch(result, prev_id);
        }

        if pedestrian_allowed {
            let sidewalk = self.graph.closest_compatible_lane(
                prev_id,
                source.entry.position.lane,
                LaneType::PEDESTRIAN,
                params.vehicle_types,
            );
            if let Some((index, lane)) = sidewalk {
                let result = self.expand_ped_bicycle(at, prev_id, pedestrian_connect, index, lane);
                log_branch(result, prev_id);
            }
        }
    }

    /// Pick the one lane on `next_id` that feeds the current lane under the lane
    /// arrows, and expand only that lane. Without arrows on the segment, every lane
    /// is expanded instead.
    fn expand_with_arrows(
        &mut self,
        at: &Crossing<'_>,
        next_id: SegmentId,
        from_left: &mut i32,
        ctx: &MatchContext,
        incoming: &mut u32,
    ) -> Result<SegmentExpansion, NetworkDataError> {
        let next = self.segment(next_id)?;
        let params = self.params;
        let towards = if at.node.id != next.start_node {
            Direction::FORWARD
        } else {
            Direction::BACKWARD
        }
        .oriented(next.is_inverted());
        let driving_types = params.lane_types - LaneType::PEDESTRIAN - LaneType::PARKING;

        let mut candidates: Vec<u8> = Vec::with_capacity(MAX_MATCHED_LANES);
        let mut by_right: [Option<usize>; MAX_MATCHED_LANES] = [None; MAX_MATCHED_LANES];
        let mut by_left: [Option<usize>; MAX_MATCHED_LANES] = [None; MAX_MATCHED_LANES];
        let mut arrows_defined = false;
        for (index, &lane_id) in next.lanes.iter().enumerate() {
            let lane = self.lane(lane_id)?;
            let info = &lane.info;
            if !info.final_direction.intersects(towards)
                || !info.check_type(params.lane_types, params.vehicle_types)
            {
                continue;
            }
            if info.check_type(driving_types, params.vehicle_types) {
                *incoming += 1;
            }
            if !lane.arrows.is_empty() {
                arrows_defined = true;
            }
            if !ctx.approach.allows(lane.arrows) || candidates.len() >= MAX_MATCHED_LANES {
                continue;
            }
            let (right, left) = similar_indices(info, self.config.drive_side);
            let slot = candidates.len();
            candidates.push(index as u8);
            by_right[usize::from(right).min(MAX_MATCHED_LANES - 1)] = Some(slot);
            by_left[usize::from(left).min(MAX_MATCHED_LANES - 1)] = Some(slot);
        }

        let filter = LaneFilter {
            vehicle: true,
            pedestrian: false,
        };
        if !arrows_defined {
            return self.expand_segment(at, next_id, from_left, filter, None);
        }
        if candidates.is_empty() {
            return Ok(SegmentExpansion::default());
        }

        let lookup = |table: &[Option<usize>; MAX_MATCHED_LANES], index: i64| {
            usize::try_from(index)
                .ok()
                .and_then(|i| table.get(i).copied().flatten())
        };
        let chosen = if ctx.highway_split {
            let right = i64::from(ctx.prev_right);
            let left = i64::from(ctx.prev_left);
            match ctx.approach {
                Approach::Left => lookup(&by_right, right),
                Approach::Right => lookup(&by_left, left),
                Approach::Straight if ctx.has_left && ctx.has_right => {
                    lookup(&by_left, left - i64::from(ctx.lanes_taken))
                }
                Approach::Straight if ctx.has_left => lookup(&by_left, left),
                Approach::Straight => lookup(&by_right, right),
            }
        } else if candidates.len() == 1 {
            Some(0)
        } else {
            let target = if ctx.next_is_junction {
                ctx.prev_right
            } else {
                let mut rng = ChaCha8Rng::seed_from_u64(self.epoch.seed_for(next_id));
                match_lane(ctx.prev_right, ctx.prev_count, candidates.len() as u8, &mut rng).index
            };
            by_right
                .iter()
                .flatten()
                .take(usize::from(target) + 1)
                .last()
                .copied()
        };

        let Some(slot) = chosen else {
            return Ok(SegmentExpansion::default());
        };
        self.expand_segment(at, next_id, from_left, filter, Some(candidates[slot]))
    }

    /// Push the lanes of `next_id` that lead onto the source lane through the node.
    /// With `forced`, only that lane index is considered.
    pub(super) fn expand_segment(
        &mut self,
        at: &Crossing<'_>,
        next_id: SegmentId,
        from_left: &mut i32,
        filter: LaneFilter,
        forced: Option<u8>,
    ) -> Result<SegmentExpansion, NetworkDataError> {
        let mut outcome = SegmentExpansion::default();
        let next = self.segment(next_id)?;
        if next
            .flags
            .intersects(SegmentFlags::PATH_FAILED | SegmentFlags::FLOODED)
        {
            return Ok(outcome);
        }

        let source = &at.source;
        let node = at.node;
        let params = self.params;
        let config = self.config;

        let turn_limit = 0.01 - next.max_turn_angle_cos.min(source.segment.max_turn_angle_cos);
        if turn_limit < 1.0
            && source
                .segment
                .direction_at(node.id)
                .dot_flat(next.direction_at(node.id))
                >= turn_limit
        {
            return Ok(outcome);
        }

        let next_dir = if node.id != next.start_node {
            Direction::FORWARD
        } else {
            Direction::BACKWARD
        };
        let towards = next_dir.oriented(next.is_inverted());

        let info = source.info();
        let custom = params.policy.custom_lane_changing(params.transit);
        let (prev_right, _) = similar_indices(info, config.drive_side);
        let prev_density = self.graph.mean_traffic_density(source.entry.lane_id);

        let mut segment_cost = source.segment.average_length;
        if !custom && !params.stable {
            segment_cost *= stock_cost_factor(self.epoch, source.segment, &mut *self.rng);
        }
        if params.heavy && source.segment.flags.contains(SegmentFlags::HEAVY_BAN) {
            segment_cost *= if custom { 15.0 } else { 10.0 };
        } else if info.lane_type == LaneType::VEHICLE
            && info.vehicle_type == VehicleType::CAR
            && source.segment.flags.contains(SegmentFlags::CAR_BAN)
        {
            segment_cost *= if custom { 10.0 } else { 5.0 };
        }
        if params.transit && info.lane_type == LaneType::TRANSPORT_VEHICLE {
            segment_cost *= 0.95;
        }
        let family = source.family();
        let (prev_method, prev_cost) = self.leave_source(at, segment_cost);
        let prev_point = source.lane.position_at_offset(at.connect_offset);

        let mut lane_types = params.lane_types;
        let mut vehicle_types = params.vehicle_types;
        if !filter.vehicle {
            vehicle_types &= VehicleType::BICYCLE;
            if vehicle_types.is_empty() {
                lane_types -= LaneType::VEHICLE | LaneType::TRANSPORT_VEHICLE;
            }
        }
        if !filter.pedestrian {
            lane_types -= LaneType::PEDESTRIAN;
        }

        let transition = node.flags.contains(NodeFlags::TRANSITION);
        let next_is_junction = node.segments.len() > 2;
        let prev_is_junction = self.is_junction_node(source.segment.other_node(node.id));
        let target = config.lane_change_target(params.heavy);
        let change_lane = !prev_is_junction
            && !params.stable
            && forced.is_none()
            && custom
            && self.rng.gen_range(1..=target) == 1;
        let highway_move = config.highway_rules
            && next.highway_rules
            && self.graph.is_outgoing_one_way(source.segment.id, node.id);
        let sensitivity = config
            .sensitivity
            .for_vehicle(params.heavy, source.segment.highway_rules);

        let mut lane_index_from_left = *from_left;
        for (index, &lane_id) in next.lanes.iter().enumerate() {
            let index = index as u8;
            if let Some(forced) = forced {
                if index < forced {
                    continue;
                }
                if index > forced {
                    break;
                }
            }
            let lane = self.lane(lane_id)?;
            let next_info = &lane.info;
            if !next_info.final_direction.intersects(towards) {
                if next_info.lane_type.intersects(family) && next_info.vehicle_type == info.vehicle_type {
                    lane_index_from_left += 1;
                }
                continue;
            }
            if !next_info.check_type(lane_types, vehicle_types)
                || (next_id == source.segment.id && index == source.entry.position.lane)
            {
                continue;
            }

            let anchor = if custom && !params.stable {
                node.position
            } else if next_dir == Direction::FORWARD {
                lane.end
            } else {
                lane.start
            };
            let mut distance = anchor.distance(prev_point);
            if transition || (custom && prev_is_junction) {
                distance *= 2.0;
            }
            let speed_scale = (info.speed_limit + next_info.speed_limit) * 0.5 * params.max_length;

            let same_family = next_info.lane_type.intersects(family);
            let method_distance = if same_family { prev_method + distance } else { 0.0 };
            if next_info.lane_type == LaneType::PEDESTRIAN && method_distance >= 1000.0 {
                continue;
            }
            let segments_to_junction = if next_is_junction {
                0
            } else if prev_is_junction {
                1
            } else {
                source.entry.segments_to_junction + 1
            };
            let mut entry = FrontierEntry {
                position: LanePosition::new(
                    next_id,
                    index,
                    if next_dir == Direction::FORWARD { 255 } else { 0 },
                ),
                lane_id,
                cost: prev_cost + distance / speed_scale,
                method_distance,
                direction: next_dir,
                lanes_used: source.entry.lanes_used | next_info.lane_type,
                segments_to_junction,
            };
            if !self.accept_start_lane(&mut entry, next, next_info) {
                continue;
            }
            outcome.blocked |= self.apply_congestion(&mut entry, next, next_info, speed_scale);

            if !custom
                && same_family
                && next_info.vehicle_type == info.vehicle_type
                && let Some((first, last)) = lane.targets
                && (*from_left < i32::from(first) || *from_left >= i32::from(last))
            {
                entry.cost += (distance * 3.0 - 3.0).max(1.0) / speed_scale;
            }

            let custom_costs = custom
                && forced.is_none()
                && next_info.similar_lane_count > 1
                && !params.is_start_or_end_lane(lane_id);
            if custom_costs {
                let (next_right, _) = similar_indices(next_info, config.drive_side);
                let lane_distance = u32::from(next_right.abs_diff(prev_right));
                let change = LaneChange {
                    prev_density,
                    next_density: self.graph.mean_traffic_density(lane_id),
                    lane_distance,
                    max_lane_diff: u32::from(info.similar_lane_count.max(next_info.similar_lane_count)),
                    change_lane,
                    highway: highway_move && lane_distance > 0,
                    segments_to_junction,
                    sensitivity,
                };
                let total = lane_change_cost(&change, &mut *self.rng);
                entry.cost += total * next.average_length * config.path_cost_multiplier
                    / (next_info.speed_limit * params.max_length);
            }

            self.offer(entry, source.entry.position);
        }
        *from_left = lane_index_from_left;
        Ok(outcome)
    }
}
