//! Background path-finding workers.
//!
//! Each [`PathFinder`] owns one OS thread and a FIFO of path units. The thread
//! waits for work, runs one search at a time to completion, writes the result into
//! the shared pool and wakes anyone waiting on the queue. Lock order is always
//! queue, then pool.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::config::PathFindConfig;
use super::error::PathFindError;
use super::search::{SearchContext, SearchOutcome};
use super::units::{PathFindFlags, PathUnitId, PathUnitPool, lock_with_retry};
use crate::network::LaneGraph;

#[derive(Debug, Default)]
struct RequestQueue {
    pending: VecDeque<PathUnitId>,
    calculating: Option<PathUnitId>,
    terminated: bool,
}

impl RequestQueue {
    fn admit(&mut self, unit: PathUnitId, skip_queue: bool) {
        if skip_queue {
            self.pending.push_front(unit);
        } else {
            self.pending.push_back(unit);
        }
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.calculating.is_none()
    }
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<RequestQueue>,
    changed: Condvar,
    lock_timeout: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RequestQueue> {
        lock_with_retry(&self.queue, self.lock_timeout, "request queue")
    }
}

/// One background worker and its request queue.
#[derive(Debug)]
pub struct PathFinder {
    index: usize,
    shared: Arc<Shared>,
    pool: Arc<PathUnitPool>,
    handle: Option<JoinHandle<()>>,
}

impl PathFinder {
    /// Start worker `index` on its own thread.
    pub fn spawn<G: LaneGraph + 'static>(
        index: usize,
        graph: Arc<G>,
        pool: Arc<PathUnitPool>,
        config: Arc<PathFindConfig>,
    ) -> Result<Self, PathFindError> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(RequestQueue::default()),
            changed: Condvar::new(),
            lock_timeout: config.lock_timeout(),
        });
        let worker = Worker {
            index,
            shared: Arc::clone(&shared),
            pool: Arc::clone(&pool),
            context: SearchContext::new(graph.lane_count()),
            graph,
            config,
        };
        let handle = thread::Builder::new()
            .name(format!("pathfind-{index}"))
            .spawn(move || worker.run())
            .map_err(|e| PathFindError::WorkerSpawn(e.to_string()))?;

        Ok(Self {
            index,
            shared,
            pool,
            handle: Some(handle),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Queue `unit` for calculation, at the front when `skip_queue` is set.
    ///
    /// The worker takes its own reference to the unit for as long as it is queued.
    /// Returns false when the worker has shut down or the unit cannot take another
    /// reference.
    pub fn enqueue(&self, unit: PathUnitId, skip_queue: bool) -> bool {
        let mut queue = self.shared.lock();
        if queue.terminated {
            return false;
        }
        if !self.pool.add_reference(unit) {
            return false;
        }
        self.pool
            .update_flags(unit, PathFindFlags::QUEUED, PathFindFlags::empty());
        queue.admit(unit, skip_queue);
        self.shared.changed.notify_all();
        true
    }

    /// Requests waiting or being calculated.
    pub fn queued_count(&self) -> usize {
        let queue = self.shared.lock();
        queue.pending.len() + usize::from(queue.calculating.is_some())
    }

    /// Block until the queue is empty and no search is running, or the worker
    /// has shut down.
    pub fn wait_for_all(&self) {
        let mut queue = self.shared.lock();
        while !queue.terminated && !queue.is_idle() {
            self.shared
                .changed
                .wait_for(&mut queue, self.shared.lock_timeout);
        }
    }

    /// Stop the worker after its current search. Requests still queued are marked
    /// failed and released.
    pub fn shutdown(&mut self) {
        let abandoned: Vec<PathUnitId> = {
            let mut queue = self.shared.lock();
            queue.terminated = true;
            let abandoned = queue.pending.drain(..).collect();
            self.shared.changed.notify_all();
            abandoned
        };
        for &unit in &abandoned {
            self.pool.update_flags(unit, PathFindFlags::FAILED, PathFindFlags::QUEUED);
            self.pool.release_path(unit);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker = self.index, "path finder thread panicked");
            }
            info!(
                worker = self.index,
                abandoned = abandoned.len(),
                "path finder shut down"
            );
        }
    }
}

impl Drop for PathFinder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the worker thread.
struct Worker<G: LaneGraph> {
    index: usize,
    shared: Arc<Shared>,
    pool: Arc<PathUnitPool>,
    graph: Arc<G>,
    config: Arc<PathFindConfig>,
    context: SearchContext,
}

impl<G: LaneGraph> Worker<G> {
    fn run(mut self) {
        info!(worker = self.index, "path finder started");
        while let Some(unit) = self.next_unit() {
            self.calculate(unit);

            let mut queue = self.shared.lock();
            queue.calculating = None;
            self.pool.release_path(unit);
            self.shared.changed.notify_all();
        }
        debug!(worker = self.index, "path finder loop exited");
    }

    /// Wait for the next unit and mark it in flight. `None` once terminated.
    fn next_unit(&self) -> Option<PathUnitId> {
        let mut queue = self.shared.lock();
        loop {
            if queue.terminated {
                return None;
            }
            if let Some(unit) = queue.pending.pop_front() {
                queue.calculating = Some(unit);
                return Some(unit);
            }
            self.shared
                .changed
                .wait_for(&mut queue, self.shared.lock_timeout);
        }
    }

    fn calculate(&mut self, unit: PathUnitId) {
        self.pool
            .update_flags(unit, PathFindFlags::CALCULATING, PathFindFlags::QUEUED);
        let Some(request) = self.pool.request(unit) else {
            warn!(worker = self.index, unit = %unit, "queued unit has no request");
            self.pool.mark_failed(unit);
            return;
        };

        let graph = &*self.graph;
        let config = &*self.config;
        let context = &mut self.context;
        let seed = u64::from(unit.get());
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            context.find_path(graph, config, &request, seed)
        }));

        let stored = match result {
            Ok(Ok(SearchOutcome::Found(path))) => {
                debug!(
                    worker = self.index,
                    unit = %unit,
                    positions = path.positions.len(),
                    length = path.length,
                    "path ready"
                );
                self.pool.store_path(unit, &path.positions, path.length)
            }
            Ok(Ok(SearchOutcome::Exhausted)) => Err(PathFindError::NoPathFound),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                error!(worker = self.index, unit = %unit, "search panicked");
                self.context = SearchContext::new(self.graph.lane_count());
                Err(PathFindError::InternalInvariantViolation(
                    "search panicked".into(),
                ))
            }
        };

        if let Err(err) = stored {
            self.report(unit, &err);
            self.pool.mark_failed(unit);
        }
        self.pool
            .update_flags(unit, PathFindFlags::empty(), PathFindFlags::CALCULATING);
    }

    fn report(&self, unit: PathUnitId, err: &PathFindError) {
        match err {
            PathFindError::NoPathFound => {
                debug!(worker = self.index, unit = %unit, "no path found");
            }
            PathFindError::InternalInvariantViolation(_) => {
                error!(worker = self.index, unit = %unit, error = %err, "path failed");
            }
            _ => {
                warn!(worker = self.index, unit = %unit, error = %err, "path failed");
            }
        }
    }
}
