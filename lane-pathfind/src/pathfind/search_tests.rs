//! Scenario tests for the search driver over small hand-built networks.

use super::*;
use crate::network::{
    LaneArrows, LaneGraph, NodeId, Point, RoadNetwork, RoadNetworkBuilder, SegmentFlags,
    SegmentId, SegmentSpec, VehicleType,
};

const SEED: u64 = 7;

fn car(start: LanePosition, end: LanePosition, max_length: f32) -> PathRequest {
    PathRequest::new(start, end, LaneType::VEHICLE, VehicleType::CAR, max_length)
}

fn walker(start: LanePosition, end: LanePosition, max_length: f32) -> PathRequest {
    PathRequest::new(start, end, LaneType::PEDESTRIAN, VehicleType::empty(), max_length)
}

fn run(graph: &RoadNetwork, request: &PathRequest) -> SearchOutcome {
    SearchContext::new(graph.lane_count())
        .find_path(graph, &PathFindConfig::default(), request, SEED)
        .unwrap()
}

fn found(outcome: SearchOutcome) -> ReconstructedPath {
    match outcome {
        SearchOutcome::Found(path) => path,
        SearchOutcome::Exhausted => panic!("expected a path"),
    }
}

/// Segments visited, in order, without repeats of consecutive positions.
fn segments_of(path: &ReconstructedPath) -> Vec<SegmentId> {
    let mut out: Vec<SegmentId> = path.positions.iter().map(|p| p.segment).collect();
    out.dedup();
    out
}

/// Two-way segments through nodes spaced 100 apart along x.
fn line(nodes: usize) -> (RoadNetwork, Vec<SegmentId>) {
    let mut b = RoadNetworkBuilder::new();
    let ids: Vec<NodeId> = (0..nodes)
        .map(|i| b.add_node(Point::flat(i as f32 * 100.0, 0.0)))
        .collect();
    let spec = SegmentSpec::road(1, 10.0);
    let segments = ids
        .windows(2)
        .map(|w| b.add_segment(w[0], w[1], &spec).unwrap())
        .collect();
    (b.build(), segments)
}

/// A four-way junction with one-lane arms to the west, east, north and south.
struct Crossroads {
    graph: RoadNetwork,
    west: SegmentId,
    east: SegmentId,
    north: SegmentId,
    south: SegmentId,
}

fn crossroads(west_arrows: Option<LaneArrows>) -> Crossroads {
    let mut b = RoadNetworkBuilder::new();
    let centre = b.add_node(Point::flat(0.0, 0.0));
    let w = b.add_node(Point::flat(-100.0, 0.0));
    let e = b.add_node(Point::flat(100.0, 0.0));
    let n = b.add_node(Point::flat(0.0, 100.0));
    let s = b.add_node(Point::flat(0.0, -100.0));
    let road = SegmentSpec::road(1, 10.0);
    let west = b.add_segment(w, centre, &road).unwrap();
    let east = b.add_segment(centre, e, &road).unwrap();
    let north = b.add_segment(centre, n, &road).unwrap();
    let south = b.add_segment(s, centre, &road).unwrap();
    if let Some(arrows) = west_arrows {
        b.set_lane_arrows(west, 1, arrows).unwrap();
    }
    Crossroads {
        graph: b.build(),
        west,
        east,
        north,
        south,
    }
}

// ========== vehicles ==========

#[test]
fn single_lane_path_costs_length_over_speed() {
    let (graph, segs) = line(2);
    let start = LanePosition::new(segs[0], 1, 0);
    let end = LanePosition::new(segs[0], 1, 255);
    let path = found(run(&graph, &car(start, end, 1000.0)));

    assert_eq!(path.positions, vec![end]);
    assert!((path.length - 100.0 / 10.0).abs() < 1e-3);
}

#[test]
fn partial_lane_cost_is_proportional() {
    let (graph, segs) = line(2);
    let start = LanePosition::new(segs[0], 1, 51);
    let end = LanePosition::new(segs[0], 1, 153);
    let path = found(run(&graph, &car(start, end, 1000.0)));

    let expected = (102.0 / 255.0) * 100.0 / 10.0;
    assert!((path.length - expected).abs() < 1e-3);
}

#[test]
fn follows_a_straight_road() {
    let (graph, segs) = line(4);
    let start = LanePosition::new(segs[0], 1, 0);
    let end = LanePosition::new(segs[2], 1, 255);
    let path = found(run(&graph, &car(start, end, 2000.0)));

    assert_eq!(segments_of(&path), vec![segs[0], segs[1], segs[2]]);
    assert_eq!(path.positions.first(), Some(&start));
    assert_eq!(path.positions.last(), Some(&end));
    assert!(path.positions.iter().all(|p| p.lane == 1));
    assert!(path.length >= 300.0 / 10.0);
}

#[test]
fn disconnected_network_is_exhausted() {
    let mut b = RoadNetworkBuilder::new();
    let a = b.add_node(Point::flat(0.0, 0.0));
    let c = b.add_node(Point::flat(100.0, 0.0));
    let d = b.add_node(Point::flat(0.0, 500.0));
    let e = b.add_node(Point::flat(100.0, 500.0));
    let spec = SegmentSpec::road(1, 10.0);
    let s0 = b.add_segment(a, c, &spec).unwrap();
    let s1 = b.add_segment(d, e, &spec).unwrap();
    let graph = b.build();

    let request = car(
        LanePosition::new(s0, 1, 0),
        LanePosition::new(s1, 1, 255),
        1000.0,
    );
    assert_eq!(run(&graph, &request), SearchOutcome::Exhausted);
}

#[test]
fn alternative_end_on_the_start_lane_wins() {
    let (graph, segs) = line(4);
    let start = LanePosition::new(segs[0], 1, 0);
    let far = LanePosition::new(segs[2], 1, 255);
    let near = LanePosition::new(segs[0], 1, 200);
    let request = car(start, far, 2000.0).with_alternative_end(near);
    let path = found(run(&graph, &request));

    assert_eq!(path.positions.last(), Some(&near));
    assert_eq!(segments_of(&path), vec![segs[0]]);
}

#[test]
fn heavy_vehicles_detour_around_bans() {
    // West arm into A, a direct banned road A-B, a longer detour through C, and
    // an east arm out of B.
    let mut b = RoadNetworkBuilder::new();
    let w = b.add_node(Point::flat(-100.0, 0.0));
    let a = b.add_node(Point::flat(0.0, 0.0));
    let c = b.add_node(Point::flat(100.0, 100.0));
    let bb = b.add_node(Point::flat(200.0, 0.0));
    let x = b.add_node(Point::flat(300.0, 0.0));
    let road = SegmentSpec::road(1, 10.0);
    let west = b.add_segment(w, a, &road).unwrap();
    let direct = b.add_segment(a, bb, &road).unwrap();
    let up = b.add_segment(a, c, &road).unwrap();
    let down = b.add_segment(c, bb, &road).unwrap();
    let east = b.add_segment(bb, x, &road).unwrap();
    b.set_segment_flags(direct, SegmentFlags::HEAVY_BAN).unwrap();
    let graph = b.build();

    let start = LanePosition::new(west, 1, 0);
    let end = LanePosition::new(east, 1, 255);

    let light = found(run(&graph, &car(start, end, 5000.0)));
    assert_eq!(segments_of(&light), vec![west, direct, east]);

    let heavy_request = car(start, end, 5000.0).with_flags(RequestFlags::HEAVY_VEHICLE);
    let heavy = found(run(&graph, &heavy_request));
    assert_eq!(segments_of(&heavy), vec![west, up, down, east]);
}

#[test]
fn blocked_road_turns_vehicles_around() {
    let (mut graph, segs) = line(3);
    let start = LanePosition::new(segs[0], 1, 0);
    let end = LanePosition::new(segs[0], 0, 0);

    let open = found(run(&graph, &car(start, end, 2000.0)));
    assert!(segments_of(&open).contains(&segs[1]));

    assert!(graph.set_segment_flags(segs[1], SegmentFlags::BLOCKED));
    let blocked = found(run(&graph, &car(start, end, 2000.0)));
    assert!(!segments_of(&blocked).contains(&segs[1]));
    assert_eq!(
        blocked.positions,
        vec![start, LanePosition::new(segs[0], 1, 255), end]
    );
}

#[test]
fn ignore_blocked_drives_through() {
    let (mut graph, segs) = line(4);
    assert!(graph.set_segment_flags(segs[1], SegmentFlags::BLOCKED));
    let start = LanePosition::new(segs[0], 1, 0);
    let end = LanePosition::new(segs[2], 1, 255);
    let request = car(start, end, 2000.0).with_flags(RequestFlags::IGNORE_BLOCKED);
    let path = found(run(&graph, &request));
    assert_eq!(segments_of(&path), vec![segs[0], segs[1], segs[2]]);
}

#[test]
fn unmarked_junction_goes_straight_across() {
    let x = crossroads(None);
    let start = LanePosition::new(x.west, 1, 0);
    let end = LanePosition::new(x.east, 1, 255);
    let path = found(run(&x.graph, &car(start, end, 2000.0)));
    assert_eq!(segments_of(&path), vec![x.west, x.east]);
}

#[test]
fn lane_arrows_force_a_detour() {
    // The only lane out of the west arm may turn left only, so reaching the east
    // arm means turning north and coming back.
    let x = crossroads(Some(LaneArrows::LEFT));
    let start = LanePosition::new(x.west, 1, 0);
    let end = LanePosition::new(x.east, 1, 255);
    let path = found(run(&x.graph, &car(start, end, 5000.0)));

    let segments = segments_of(&path);
    assert_eq!(segments.first(), Some(&x.west));
    assert_eq!(segments.get(1), Some(&x.north));
    assert!(!segments.contains(&x.south));
    assert_eq!(path.positions.last(), Some(&end));
}

#[test]
fn relaxed_routing_ignores_arrows() {
    let x = crossroads(Some(LaneArrows::LEFT));
    let start = LanePosition::new(x.west, 1, 0);
    let end = LanePosition::new(x.east, 1, 255);
    let config = PathFindConfig {
        all_relaxed: true,
        ..PathFindConfig::default()
    };
    let outcome = SearchContext::new(x.graph.lane_count())
        .find_path(&x.graph, &config, &car(start, end, 2000.0), SEED)
        .unwrap();
    assert_eq!(segments_of(&found(outcome)), vec![x.west, x.east]);
}

// ========== pedestrians ==========

#[test]
fn walks_along_footpaths() {
    let mut b = RoadNetworkBuilder::new();
    let p: Vec<NodeId> = (0..3)
        .map(|i| b.add_node(Point::flat(i as f32 * 100.0, 0.0)))
        .collect();
    let f0 = b.add_segment(p[0], p[1], &SegmentSpec::footpath()).unwrap();
    let f1 = b.add_segment(p[1], p[2], &SegmentSpec::footpath()).unwrap();
    let graph = b.build();

    let start = LanePosition::new(f0, 0, 0);
    let end = LanePosition::new(f1, 0, 255);
    let path = found(run(&graph, &walker(start, end, 5000.0)));
    assert_eq!(
        path.positions,
        vec![start, LanePosition::new(f0, 0, 255), end]
    );
}

#[test]
fn walking_is_capped() {
    let mut b = RoadNetworkBuilder::new();
    let p: Vec<NodeId> = (0..5)
        .map(|i| b.add_node(Point::flat(i as f32 * 400.0, 0.0)))
        .collect();
    let f: Vec<SegmentId> = p
        .windows(2)
        .map(|w| b.add_segment(w[0], w[1], &SegmentSpec::footpath()).unwrap())
        .collect();
    let graph = b.build();

    let end = LanePosition::new(f[3], 0, 255);
    let near = walker(LanePosition::new(f[1], 0, 0), end, 10_000.0);
    assert!(matches!(run(&graph, &near), SearchOutcome::Found(_)));

    let far = walker(LanePosition::new(f[0], 0, 0), end, 10_000.0);
    assert_eq!(run(&graph, &far), SearchOutcome::Exhausted);
}

#[test]
fn pedestrians_cross_at_road_ends() {
    let mut b = RoadNetworkBuilder::new();
    let a = b.add_node(Point::flat(0.0, 0.0));
    let c = b.add_node(Point::flat(100.0, 0.0));
    let road = b
        .add_segment(a, c, &SegmentSpec::road(1, 10.0).with_sidewalks())
        .unwrap();
    let graph = b.build();

    // Lanes by lateral position: left sidewalk, two car lanes, right sidewalk.
    let start = LanePosition::new(road, 3, 128);
    let end = LanePosition::new(road, 0, 128);
    let path = found(run(&graph, &walker(start, end, 5000.0)));

    assert_eq!(path.positions.len(), 3);
    assert_eq!(path.positions[0], start);
    assert!(path.positions[1].same_lane(&start));
    assert!(matches!(path.positions[1].offset, 0 | 255));
    assert_eq!(path.positions[2], end);
}

#[test]
fn stops_connect_sidewalks_to_attached_paths() {
    let mut b = RoadNetworkBuilder::new();
    let a = b.add_node(Point::flat(-100.0, 0.0));
    let c = b.add_node(Point::flat(100.0, 0.0));
    let stop = b.add_node(Point::flat(0.0, 30.0));
    let park = b.add_node(Point::flat(0.0, 100.0));
    let road = b
        .add_segment(a, c, &SegmentSpec::road(1, 10.0).with_sidewalks())
        .unwrap();
    let path_seg = b.add_segment(stop, park, &SegmentSpec::footpath()).unwrap();
    b.attach_node(stop, road, 0, 128).unwrap();
    let graph = b.build();

    let start = LanePosition::new(road, 0, 0);
    let end = LanePosition::new(path_seg, 0, 255);
    let path = found(run(&graph, &walker(start, end, 5000.0)));
    assert_eq!(
        path.positions,
        vec![start, LanePosition::new(road, 0, 128), end]
    );
}

// ========== driver behaviour ==========

/// A 3x3 grid of two-lane-each-way roads, 100 apart. Returns the eastbound
/// segments keyed by their west node's grid coordinates.
fn grid() -> (RoadNetwork, Vec<((usize, usize), SegmentId)>) {
    let mut b = RoadNetworkBuilder::new();
    let mut nodes = Vec::new();
    for j in 0..3 {
        for i in 0..3 {
            nodes.push(b.add_node(Point::flat(i as f32 * 100.0, j as f32 * 100.0)));
        }
    }
    let at = |i: usize, j: usize| nodes[j * 3 + i];
    let road = SegmentSpec::road(2, 12.0);
    let mut eastbound = Vec::new();
    for j in 0..3 {
        for i in 0..3 {
            if i + 1 < 3 {
                let id = b.add_segment(at(i, j), at(i + 1, j), &road).unwrap();
                eastbound.push(((i, j), id));
            }
            if j + 1 < 3 {
                b.add_segment(at(i, j), at(i, j + 1), &road).unwrap();
            }
        }
    }
    (b.build(), eastbound)
}

#[test]
fn costs_fall_monotonically_towards_the_destination() {
    let (graph, eastbound) = grid();
    let seg = |key| {
        eastbound
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, id)| *id)
            .unwrap()
    };
    let start = LanePosition::new(seg((0, 0)), 3, 0);
    let end = LanePosition::new(seg((1, 2)), 3, 255);
    let request = car(start, end, 3000.0);

    for seed in 0..8 {
        let mut context = SearchContext::new(graph.lane_count());
        let outcome = context
            .find_path(&graph, &PathFindConfig::default(), &request, seed)
            .unwrap();
        let path = found(outcome);
        assert_eq!(path.positions.first().map(|p| p.segment), Some(start.segment));
        assert_eq!(path.positions.last(), Some(&end));

        let costs: Vec<f32> = path
            .positions
            .iter()
            .map(|p| {
                let lane = graph.lane_id(*p).unwrap();
                context.queue.entry_for(lane).unwrap().cost
            })
            .collect();
        assert!(costs.iter().all(|c| *c >= 0.0 && c.is_finite()));
        for pair in costs.windows(2) {
            assert!(pair[0] >= pair[1], "cost rose along the path: {costs:?}");
        }
    }
}

#[test]
fn same_seed_same_path() {
    let (graph, eastbound) = grid();
    let start = LanePosition::new(eastbound[0].1, 3, 0);
    let end = LanePosition::new(eastbound[5].1, 2, 255);
    let request = car(start, end, 3000.0);
    assert_eq!(run(&graph, &request), run(&graph, &request));
}

#[test]
fn contexts_are_reusable_across_searches() {
    let (graph, segs) = line(4);
    let mut context = SearchContext::new(graph.lane_count());
    let config = PathFindConfig::default();
    let forward = car(
        LanePosition::new(segs[0], 1, 0),
        LanePosition::new(segs[2], 1, 255),
        2000.0,
    );
    let back = car(
        LanePosition::new(segs[2], 0, 255),
        LanePosition::new(segs[0], 0, 0),
        2000.0,
    );
    for _ in 0..3 {
        let a = found(context.find_path(&graph, &config, &forward, SEED).unwrap());
        assert_eq!(segments_of(&a), vec![segs[0], segs[1], segs[2]]);
        let b = found(context.find_path(&graph, &config, &back, SEED).unwrap());
        assert_eq!(segments_of(&b), vec![segs[2], segs[1], segs[0]]);
    }
}

#[test]
fn unresolvable_positions_are_errors() {
    let (graph, segs) = line(2);
    let request = car(
        LanePosition::new(segs[0], 1, 0),
        LanePosition::new(segs[0], 7, 255),
        1000.0,
    );
    let err = SearchContext::new(graph.lane_count())
        .find_path(&graph, &PathFindConfig::default(), &request, SEED)
        .unwrap_err();
    assert!(matches!(
        err,
        PathFindError::MalformedNetworkData(NetworkDataError::LaneIndexOutOfRange { index: 7, .. })
    ));

    let request = car(
        LanePosition::new(SegmentId::new(99), 0, 0),
        LanePosition::new(segs[0], 1, 255),
        1000.0,
    );
    let err = SearchContext::new(graph.lane_count())
        .find_path(&graph, &PathFindConfig::default(), &request, SEED)
        .unwrap_err();
    assert!(matches!(
        err,
        PathFindError::MalformedNetworkData(NetworkDataError::MissingSegment(_))
    ));
}

#[test]
fn resolve_widens_vehicle_requests_to_transit_lanes() {
    let (graph, segs) = line(2);
    let request = car(
        LanePosition::new(segs[0], 1, 0),
        LanePosition::new(segs[0], 1, 255),
        1000.0,
    );
    let params = resolve(&graph, &PathFindConfig::default(), &request).unwrap();
    assert!(params.lane_types.contains(LaneType::TRANSPORT_VEHICLE));
    assert!(!params.transit);
    assert_eq!(params.policy, RoutingPolicy::AdvancedLaneMatching);

    let stock = PathFindConfig {
        stock_mode: true,
        ..PathFindConfig::default()
    };
    assert_eq!(
        resolve(&graph, &stock, &request).unwrap().policy,
        RoutingPolicy::Stock
    );
}
