//! The front door: owns the pool and the workers, admits requests.

use std::sync::Arc;

use tracing::{debug, info};

use super::config::PathFindConfig;
use super::error::PathFindError;
use super::units::{PathRequest, PathStatus, PathUnitId, PathUnitPool};
use super::worker::PathFinder;
use crate::network::{LaneGraph, LanePosition};

/// Owns the shared path unit pool and a set of [`PathFinder`] workers.
///
/// A created path belongs to the caller until [`PathManager::release_path`].
#[derive(Debug)]
pub struct PathManager<G: LaneGraph + 'static> {
    graph: Arc<G>,
    pool: Arc<PathUnitPool>,
    workers: Vec<PathFinder>,
}

impl<G: LaneGraph + 'static> PathManager<G> {
    /// Validate `config` and start its workers over `graph`.
    pub fn new(graph: Arc<G>, config: PathFindConfig) -> Result<Self, PathFindError> {
        config.validate()?;
        let config = Arc::new(config);
        let pool = Arc::new(PathUnitPool::new(
            config.unit_pool_capacity,
            config.lock_timeout(),
        ));
        let workers = (0..config.worker_count)
            .map(|index| {
                PathFinder::spawn(
                    index,
                    Arc::clone(&graph),
                    Arc::clone(&pool),
                    Arc::clone(&config),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            workers = workers.len(),
            pool = config.unit_pool_capacity,
            lanes = graph.lane_count(),
            "path manager started"
        );
        Ok(Self {
            graph,
            pool,
            workers,
        })
    }

    pub fn graph(&self) -> &Arc<G> {
        &self.graph
    }

    pub fn pool(&self) -> &Arc<PathUnitPool> {
        &self.pool
    }

    /// Validate and queue a request on the least loaded worker.
    pub fn create_path(&self, request: PathRequest) -> Result<PathUnitId, PathFindError> {
        self.submit(request, false)
    }

    /// Queue a request ahead of everything already waiting on its worker.
    pub fn create_path_urgent(&self, request: PathRequest) -> Result<PathUnitId, PathFindError> {
        self.submit(request, true)
    }

    fn submit(&self, request: PathRequest, skip_queue: bool) -> Result<PathUnitId, PathFindError> {
        request.validate()?;
        let worker = self
            .workers
            .iter()
            .min_by_key(|w| w.queued_count())
            .ok_or(PathFindError::QueueRejected)?;
        let unit = self.pool.create_path(request)?;
        if !worker.enqueue(unit, skip_queue) {
            self.pool.release_path(unit);
            return Err(PathFindError::QueueRejected);
        }
        debug!(unit = %unit, worker = worker.index(), skip_queue, "path queued");
        Ok(unit)
    }

    /// Block until every worker is idle.
    pub fn wait_for_all(&self) {
        for worker in &self.workers {
            worker.wait_for_all();
        }
    }

    /// Stop every worker. Queued requests are marked failed.
    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            worker.shutdown();
        }
    }

    pub fn status(&self, unit: PathUnitId) -> Option<PathStatus> {
        self.pool.status(unit)
    }

    /// Positions of a ready path, in travel order.
    pub fn path_positions(&self, unit: PathUnitId) -> Option<Vec<LanePosition>> {
        match self.pool.status(unit)? {
            PathStatus::Ready => self.pool.positions(unit),
            _ => None,
        }
    }

    pub fn path_length(&self, unit: PathUnitId) -> Option<f32> {
        match self.pool.status(unit)? {
            PathStatus::Ready => self.pool.total_length(unit),
            _ => None,
        }
    }

    /// Give up the caller's reference to a path.
    pub fn release_path(&self, unit: PathUnitId) {
        self.pool.release_path(unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{
        LaneType, Point, RoadNetwork, RoadNetworkBuilder, SegmentId, SegmentSpec, VehicleType,
    };
    use crate::pathfind::config::ConfigError;

    fn grid_row(segments: usize) -> (Arc<RoadNetwork>, Vec<SegmentId>) {
        let mut b = RoadNetworkBuilder::new();
        let nodes: Vec<_> = (0..=segments)
            .map(|i| b.add_node(Point::flat(i as f32 * 80.0, 0.0)))
            .collect();
        let spec = SegmentSpec::road(1, 10.0);
        let ids = nodes
            .windows(2)
            .map(|w| b.add_segment(w[0], w[1], &spec).unwrap())
            .collect();
        (Arc::new(b.build()), ids)
    }

    fn request(from: SegmentId, to: SegmentId) -> PathRequest {
        PathRequest::new(
            LanePosition::new(from, 1, 0),
            LanePosition::new(to, 1, 255),
            LaneType::VEHICLE,
            VehicleType::CAR,
            2000.0,
        )
    }

    #[test]
    fn rejects_invalid_config() {
        let (graph, _) = grid_row(1);
        let config = PathFindConfig::default().with_workers(0);
        let err = PathManager::new(graph, config).unwrap_err();
        assert!(matches!(
            err,
            PathFindError::InvalidConfig(ConfigError::OutOfRange { field: "worker_count", .. })
        ));
    }

    #[test]
    fn rejects_invalid_request() {
        let (graph, segs) = grid_row(2);
        let manager = PathManager::new(graph, PathFindConfig::default().with_workers(1)).unwrap();
        let mut bad = request(segs[0], segs[1]);
        bad.max_length = 0.0;
        assert!(matches!(
            manager.create_path(bad),
            Err(PathFindError::InvalidRequest(_))
        ));
        assert_eq!(manager.pool().live_units(), 0);
    }

    #[test]
    fn serves_requests_across_workers() {
        let (graph, segs) = grid_row(4);
        let manager = PathManager::new(graph, PathFindConfig::default().with_workers(2)).unwrap();
        let units: Vec<_> = (0..6)
            .map(|_| manager.create_path(request(segs[0], segs[3])).unwrap())
            .collect();
        manager.wait_for_all();

        for &unit in &units {
            assert_eq!(manager.status(unit), Some(PathStatus::Ready));
            let positions = manager.path_positions(unit).unwrap();
            assert_eq!(positions.last(), Some(&LanePosition::new(segs[3], 1, 255)));
            assert!(manager.path_length(unit).unwrap() > 0.0);
            manager.release_path(unit);
        }
        assert_eq!(manager.pool().live_units(), 0);
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let (graph, segs) = grid_row(2);
        let config = PathFindConfig::default()
            .with_workers(1)
            .with_pool_capacity(1);
        let manager = PathManager::new(graph, config).unwrap();
        let first = manager.create_path(request(segs[0], segs[1])).unwrap();
        assert!(matches!(
            manager.create_path(request(segs[0], segs[1])),
            Err(PathFindError::AllocationExhausted)
        ));
        manager.wait_for_all();
        manager.release_path(first);
    }

    #[test]
    fn shutdown_rejects_new_requests() {
        let (graph, segs) = grid_row(2);
        let mut manager =
            PathManager::new(graph, PathFindConfig::default().with_workers(1)).unwrap();
        manager.shutdown();
        assert!(matches!(
            manager.create_path(request(segs[0], segs[1])),
            Err(PathFindError::QueueRejected)
        ));
        assert_eq!(manager.pool().live_units(), 0);
    }
}
