//! Cost terms shared by the relaxation rules.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::epoch::SearchEpoch;
use crate::network::{Direction, LaneInfo, Segment};

/// Converts a byte offset difference to a fraction of the lane.
pub const OFFSET_SCALE: f32 = 1.0 / 255.0;

/// Divisors damping the traffic weight near junctions, `1.1^i`.
pub const TRAFFIC_WEIGHT_DAMPING: [f32; 6] = [1.0, 1.1, 1.21, 1.331, 1.4641, 1.61051];

/// Fraction of a lane between two offsets.
pub fn offset_fraction(a: u8, b: u8) -> f32 {
    f32::from(a.abs_diff(b)) * OFFSET_SCALE
}

/// Effective speed travelling from `start_offset` to `end_offset` on a lane.
///
/// Avoid lanes are crawled along: a tenth of the limit against their preferred
/// direction, a fifth otherwise.
pub fn lane_speed(start_offset: u8, end_offset: u8, segment: &Segment, info: &LaneInfo) -> f32 {
    let direction = info.final_direction.oriented(segment.is_inverted());
    if !direction.is_avoid() {
        return info.speed_limit;
    }
    if end_offset > start_offset && direction == Direction::AVOID_FORWARD {
        return info.speed_limit * 0.1;
    }
    if end_offset < start_offset && direction == Direction::AVOID_BACKWARD {
        return info.speed_limit * 0.1;
    }
    info.speed_limit * 0.2
}

/// Random segment cost multiplier used when lane changes are not traffic-aware.
///
/// The per-segment part depends only on the search epoch and the segment, so all
/// lanes of a segment see the same congestion within one search; the path part
/// varies per request.
pub fn stock_cost_factor<R: Rng + ?Sized>(
    epoch: SearchEpoch,
    segment: &Segment,
    path_rng: &mut R,
) -> f32 {
    let mut segment_rng = ChaCha8Rng::seed_from_u64(epoch.seed_for(segment.id));
    let congestion = 1000 + i32::from(segment.traffic_density) * 10;
    let base = segment_rng.gen_range(900..=congestion);
    let jitter = path_rng.gen_range(0..20);
    (base + jitter) as f32 * 0.001
}

/// Inputs to the traffic-aware lane-change cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneChange {
    /// Mean density of the lane being left, 0..=1.
    pub prev_density: f32,
    /// Mean density of the lane being entered, 0..=1.
    pub next_density: f32,
    /// Lanes crossed, counted between similar-lane indices from the right.
    pub lane_distance: u32,
    /// The larger similar-lane count of the two segments.
    pub max_lane_diff: u32,
    /// Whether this vehicle was randomly chosen to change lanes here.
    pub change_lane: bool,
    /// Highway rules apply to this move.
    pub highway: bool,
    pub segments_to_junction: u32,
    /// Traffic sensitivity for this vehicle class and road class.
    pub sensitivity: f32,
}

/// Unscaled lane-change cost: a blend of a random traffic term, a lane-crossing
/// term and, on highways near a junction, a junction term.
pub fn lane_change_cost<R: Rng + ?Sized>(input: &LaneChange, rng: &mut R) -> f32 {
    let max_diff = input.max_lane_diff.max(1) as f32;
    let dist = input.lane_distance as f32;

    let traffic_span = ((input.prev_density - input.next_density + 1.0) / 2.0).max(0.0);
    let traffic_cost = rng.gen_range(0.0..=traffic_span);

    let mut lane_change_cost = if input.lane_distance > 1 {
        ((dist * dist) / (max_diff * max_diff)).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let mut change_lane = input.change_lane;
    let mut junction_cost = 0.0;
    if input.highway {
        let deceleration_length = rng.gen_range(1..=4);
        if input.segments_to_junction <= deceleration_length {
            junction_cost = (dist / max_diff).clamp(0.0, 1.0);
            change_lane = false;
        }
    }

    if (input.lane_distance == 1 && !change_lane) || (input.lane_distance == 0 && change_lane) {
        lane_change_cost = 1.0 / (max_diff * max_diff);
    }

    let low = (input.sensitivity - 0.1).max(0.0);
    let high = (input.sensitivity + 0.1).min(1.0).max(low);
    let mut weight = rng.gen_range(low..=high);

    if input.highway {
        weight * traffic_cost + 0.2 * junction_cost + (0.8 - weight) * lane_change_cost
    } else {
        let factor = 5_u32.saturating_sub(input.segments_to_junction).max(1) as usize;
        weight /= TRAFFIC_WEIGHT_DAMPING[factor.min(TRAFFIC_WEIGHT_DAMPING.len() - 1)];
        weight * traffic_cost + (1.0 - weight) * lane_change_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{LaneType, NodeId, Point, SegmentFlags, SegmentId, VehicleType};

    fn segment(inverted: bool) -> Segment {
        Segment {
            id: SegmentId::new(3),
            start_node: NodeId::new(0),
            end_node: NodeId::new(1),
            flags: if inverted {
                SegmentFlags::INVERT
            } else {
                SegmentFlags::empty()
            },
            average_length: 100.0,
            lanes: Vec::new(),
            start_direction: Point::flat(1.0, 0.0),
            end_direction: Point::flat(-1.0, 0.0),
            max_turn_angle_cos: -1.0,
            highway_rules: false,
            traffic_density: 0,
        }
    }

    fn lane(final_direction: Direction) -> LaneInfo {
        LaneInfo {
            lane_type: LaneType::VEHICLE,
            vehicle_type: VehicleType::CAR,
            direction: Direction::BOTH,
            final_direction,
            speed_limit: 10.0,
            lateral: 2.0,
            similar_lane_index: 0,
            similar_lane_count: 1,
        }
    }

    fn input() -> LaneChange {
        LaneChange {
            prev_density: 0.5,
            next_density: 0.5,
            lane_distance: 0,
            max_lane_diff: 2,
            change_lane: false,
            highway: false,
            segments_to_junction: 10,
            sensitivity: 0.5,
        }
    }

    #[test]
    fn offset_fraction_is_symmetric() {
        assert_eq!(offset_fraction(0, 255), 1.0);
        assert_eq!(offset_fraction(255, 0), 1.0);
        assert_eq!(offset_fraction(10, 10), 0.0);
    }

    #[test]
    fn plain_lanes_run_at_the_limit() {
        assert_eq!(lane_speed(0, 255, &segment(false), &lane(Direction::FORWARD)), 10.0);
    }

    #[test]
    fn avoid_lanes_slow_down() {
        let seg = segment(false);
        assert_eq!(lane_speed(0, 255, &seg, &lane(Direction::AVOID_FORWARD)), 1.0);
        assert_eq!(lane_speed(255, 0, &seg, &lane(Direction::AVOID_FORWARD)), 2.0);
        assert_eq!(lane_speed(255, 0, &seg, &lane(Direction::AVOID_BACKWARD)), 1.0);
        assert_eq!(lane_speed(0, 255, &seg, &lane(Direction::AVOID_BOTH)), 2.0);
        // Inversion swaps which direction is avoided.
        assert_eq!(lane_speed(255, 0, &segment(true), &lane(Direction::AVOID_FORWARD)), 1.0);
    }

    #[test]
    fn stock_factor_stays_in_band() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut seg = segment(false);
        for epoch in 0..50 {
            let f = stock_cost_factor(SearchEpoch::new(epoch), &seg, &mut rng);
            assert!((0.9..1.02).contains(&f), "{f}");
        }
        seg.traffic_density = 100;
        for epoch in 0..50 {
            let f = stock_cost_factor(SearchEpoch::new(epoch), &seg, &mut rng);
            assert!((0.9..=2.02).contains(&f), "{f}");
        }
    }

    #[test]
    fn staying_in_lane_costs_only_traffic() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for _ in 0..100 {
            let cost = lane_change_cost(&input(), &mut rng);
            // Traffic term is at most 0.5 and weighted by at most 0.6.
            assert!((0.0..=0.3).contains(&cost), "{cost}");
        }
    }

    #[test]
    fn crossing_many_lanes_is_expensive() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let far = LaneChange {
            lane_distance: 3,
            max_lane_diff: 3,
            next_density: 1.0,
            prev_density: 0.0,
            sensitivity: 0.0,
            ..input()
        };
        for _ in 0..20 {
            let cost = lane_change_cost(&far, &mut rng);
            // Weight at most 0.1, so the capped crossing term dominates.
            assert!(cost >= 0.9, "{cost}");
        }
    }

    #[test]
    fn forced_change_penalizes_staying() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let stay = LaneChange {
            change_lane: true,
            sensitivity: 0.0,
            prev_density: 0.0,
            next_density: 1.0,
            ..input()
        };
        // Traffic span is zero, so only the 1/m² crossing term remains.
        let cost = lane_change_cost(&stay, &mut rng);
        let weight_max = 0.1 / TRAFFIC_WEIGHT_DAMPING[1];
        assert!(cost >= (1.0 - weight_max) * 0.25 - 1e-6 && cost <= 0.25 + 1e-6);
    }

    #[test]
    fn highway_near_junction_adds_junction_term() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let near = LaneChange {
            highway: true,
            lane_distance: 1,
            max_lane_diff: 2,
            segments_to_junction: 0,
            prev_density: 0.0,
            next_density: 1.0,
            sensitivity: 0.8,
            ..input()
        };
        for _ in 0..20 {
            let cost = lane_change_cost(&near, &mut rng);
            // Junction term 0.5 * 0.2, crossing term 0.25 weighted by 0.8 - w in [-0.1, 0.1].
            assert!((0.1 - 0.025 - 1e-6..=0.1 + 0.025 + 1e-6).contains(&cost), "{cost}");
        }
    }

    #[test]
    fn same_seed_same_cost() {
        let a = lane_change_cost(&input(), &mut ChaCha8Rng::seed_from_u64(7));
        let b = lane_change_cost(&input(), &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(a, b);
    }
}
