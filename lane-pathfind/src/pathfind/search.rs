//! The search driver: seed, pop, check, expand.
//!
//! The search runs backwards from the end positions. It stops as soon as it pops an
//! entry on a start lane whose direction reaches the start offset, and the path is
//! then read off the successor links from that entry.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use super::config::{PathFindConfig, RoutingPolicy};
use super::error::PathFindError;
use super::queue::{BucketQueue, FrontierEntry};
use super::reconstruct::{ReconstructedPath, reconstruct};
use super::relax::{Relaxer, SearchParams, accept_start};
use super::units::{PathRequest, RequestFlags};
use crate::network::{Direction, LaneGraph, LaneId, LanePosition, LaneType, NetworkDataError};

/// How a search ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Found(ReconstructedPath),
    /// The queue ran dry without reaching a start lane.
    Exhausted,
}

/// Per-worker search state, reused across runs.
#[derive(Debug)]
pub struct SearchContext {
    queue: BucketQueue,
}

impl SearchContext {
    pub fn new(lane_count: usize) -> Self {
        Self {
            queue: BucketQueue::new(lane_count),
        }
    }

    pub fn lane_capacity(&self) -> usize {
        self.queue.lane_capacity()
    }

    /// Run one search for `request`. `seed` fixes the per-run randomness.
    pub fn find_path<G: LaneGraph + ?Sized>(
        &mut self,
        graph: &G,
        config: &PathFindConfig,
        request: &PathRequest,
        seed: u64,
    ) -> Result<SearchOutcome, PathFindError> {
        if graph.lane_count() > self.queue.lane_capacity() {
            self.queue = BucketQueue::new(graph.lane_count());
        }
        let params = resolve(graph, config, request)?;
        let epoch = self.queue.begin_search();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let ends = [Some(request.end_a), request.end_b];
        for end in ends.into_iter().flatten() {
            self.seed_end(graph, &params, end)?;
        }

        let mut expanded = 0usize;
        let found = {
            let mut relaxer = Relaxer::new(graph, config, &params, &mut self.queue, &mut rng);
            let mut found = None;
            while let Some(item) = relaxer.pop() {
                if let Some(start) = reached_start(&params, &item) {
                    found = Some((item, start));
                    break;
                }
                expanded += 1;
                if let Err(err) = relaxer.expand(&item) {
                    debug!(position = %item.position, error = %err, "skipping entry");
                }
            }
            found
        };

        let Some((item, start)) = found else {
            debug!(epoch = epoch.get(), expanded, "no path found");
            return Ok(SearchOutcome::Exhausted);
        };
        trace!(position = %item.position, cost = item.cost, expanded, "reached start");
        let path = reconstruct(
            graph,
            &self.queue,
            &item,
            start.offset,
            &ends,
            request.max_length,
            config.max_path_positions,
        )?;
        debug!(
            epoch = epoch.get(),
            expanded,
            positions = path.positions.len(),
            length = path.length,
            "path found"
        );
        Ok(SearchOutcome::Found(path))
    }

    /// Push a destination as a zero-cost entry, with the start-lane stretch added
    /// when the destination shares a lane with a start.
    fn seed_end<G: LaneGraph + ?Sized>(
        &mut self,
        graph: &G,
        params: &SearchParams,
        end: LanePosition,
    ) -> Result<(), PathFindError> {
        let lane_id = resolve_lane(graph, end)?;
        let (direction, lane_type) = graph
            .lane_direction_and_type(end)
            .ok_or(NetworkDataError::MissingLane(lane_id))?;
        let mut entry = FrontierEntry {
            position: end,
            lane_id,
            cost: 0.0,
            method_distance: 0.0,
            direction,
            lanes_used: lane_type,
            segments_to_junction: 0,
        };
        if let Some((_, start)) = params.starts.iter().flatten().find(|(l, _)| *l == lane_id) {
            let segment = graph
                .segment(end.segment)
                .ok_or(NetworkDataError::MissingSegment(end.segment))?;
            let lane = graph
                .lane(lane_id)
                .ok_or(NetworkDataError::MissingLane(lane_id))?;
            let mut approached = entry;
            if accept_start(&mut approached, *start, segment, &lane.info, params.max_length) {
                entry = approached;
            }
        }
        let outcome = self.queue.push(entry, end);
        trace!(position = %end, ?outcome, "seeded destination");
        Ok(())
    }
}

/// The start position `item` reaches, if it is on a start lane heading the right way.
fn reached_start(params: &SearchParams, item: &FrontierEntry) -> Option<LanePosition> {
    params.starts.iter().flatten().find_map(|(_, start)| {
        if !item.position.same_lane(start) {
            return None;
        }
        let forward = item.direction.contains(Direction::FORWARD)
            && item.position.offset >= start.offset;
        let backward = item.direction.contains(Direction::BACKWARD)
            && item.position.offset <= start.offset;
        (forward || backward).then_some(*start)
    })
}

fn resolve_lane<G: LaneGraph + ?Sized>(
    graph: &G,
    position: LanePosition,
) -> Result<LaneId, NetworkDataError> {
    let segment = graph
        .segment(position.segment)
        .ok_or(NetworkDataError::MissingSegment(position.segment))?;
    segment
        .lane(position.lane)
        .ok_or(NetworkDataError::LaneIndexOutOfRange {
            segment: position.segment,
            index: position.lane,
        })
}

/// Resolve a request against the network and fix the routing policy for the run.
pub fn resolve<G: LaneGraph + ?Sized>(
    graph: &G,
    config: &PathFindConfig,
    request: &PathRequest,
) -> Result<SearchParams, PathFindError> {
    request.validate()?;
    let transit = request.is_transit();
    let mut lane_types = request.lane_types;
    if lane_types.contains(LaneType::VEHICLE) {
        lane_types |= LaneType::TRANSPORT_VEHICLE;
    }

    let start = |p: LanePosition| resolve_lane(graph, p).map(|lane| (lane, p));
    let starts = [
        Some(start(request.start_a)?),
        request.start_b.map(start).transpose()?,
    ];
    let ends = [
        Some(resolve_lane(graph, request.end_a)?),
        request.end_b.map(|p| resolve_lane(graph, p)).transpose()?,
    ];
    let vehicle_lane = request
        .vehicle_position
        .map(|p| resolve_lane(graph, p).map(|lane| (lane, p.offset)))
        .transpose()?;

    Ok(SearchParams {
        starts,
        ends,
        vehicle_lane,
        lane_types,
        vehicle_types: request.vehicle_types,
        max_length: request.max_length,
        heavy: request.flags.contains(RequestFlags::HEAVY_VEHICLE),
        ignore_blocked: request.flags.contains(RequestFlags::IGNORE_BLOCKED),
        stable: request.flags.contains(RequestFlags::STABLE_PATH),
        transit,
        policy: RoutingPolicy::select(config, transit),
    })
}

#[cfg(test)]
#[path = "search_tests.rs"]
mod tests;
