//! The path unit pool: requests, their status and their results.
//!
//! A path is stored as a chain of fixed-size chunks. The head chunk is created with
//! the request and carries it; further chunks are allocated when the result is
//! written. Chunks are reference counted through their head.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard};
use tracing::{trace, warn};

use super::error::PathFindError;
use crate::network::{LanePosition, LaneType, VehicleType};

/// Positions held by one chunk.
pub const POSITIONS_PER_UNIT: usize = 12;

bitflags! {
    /// Options carried by a request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RequestFlags: u8 {
        /// Heavy vehicles pay more on heavy-banned segments and change lanes less.
        const HEAVY_VEHICLE = 1 << 0;
        /// Blocked segments cost nothing extra.
        const IGNORE_BLOCKED = 1 << 1;
        /// No randomness: repeated searches give the same path.
        const STABLE_PATH = 1 << 2;
    }
}

bitflags! {
    /// Lifecycle state of a path unit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PathFindFlags: u8 {
        const QUEUED = 1 << 0;
        const CALCULATING = 1 << 1;
        const READY = 1 << 2;
        const FAILED = 1 << 3;
        const CREATED = 1 << 4;
    }
}

/// Coarse status of a request, as seen by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    Pending,
    Calculating,
    Ready,
    Failed,
}

impl PathStatus {
    pub fn from_flags(flags: PathFindFlags) -> Self {
        if flags.contains(PathFindFlags::FAILED) {
            PathStatus::Failed
        } else if flags.contains(PathFindFlags::READY) {
            PathStatus::Ready
        } else if flags.contains(PathFindFlags::CALCULATING) {
            PathStatus::Calculating
        } else {
            PathStatus::Pending
        }
    }

    /// Ready or failed; the unit will not change again.
    pub fn is_finished(self) -> bool {
        matches!(self, PathStatus::Ready | PathStatus::Failed)
    }
}

/// Handle to a path unit in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathUnitId(NonZeroU32);

impl PathUnitId {
    fn from_slot(slot: usize) -> Option<Self> {
        u32::try_from(slot + 1).ok().and_then(NonZeroU32::new).map(Self)
    }

    fn slot(self) -> usize {
        self.0.get() as usize - 1
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for PathUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// A request for a path from one of up to two start positions to one of up to two
/// end positions.
#[derive(Debug, Clone, PartialEq)]
pub struct PathRequest {
    pub start_a: LanePosition,
    pub start_b: Option<LanePosition>,
    pub end_a: LanePosition,
    pub end_b: Option<LanePosition>,
    /// Where the traveller's parked vehicle is, for walk-to-car hand-off.
    pub vehicle_position: Option<LanePosition>,
    pub lane_types: LaneType,
    pub vehicle_types: VehicleType,
    pub flags: RequestFlags,
    /// Length budget; costs are normalized by it.
    pub max_length: f32,
}

impl PathRequest {
    pub fn new(
        start: LanePosition,
        end: LanePosition,
        lane_types: LaneType,
        vehicle_types: VehicleType,
        max_length: f32,
    ) -> Self {
        Self {
            start_a: start,
            start_b: None,
            end_a: end,
            end_b: None,
            vehicle_position: None,
            lane_types,
            vehicle_types,
            flags: RequestFlags::empty(),
            max_length,
        }
    }

    pub fn with_alternative_start(mut self, start: LanePosition) -> Self {
        self.start_b = Some(start);
        self
    }

    pub fn with_alternative_end(mut self, end: LanePosition) -> Self {
        self.end_b = Some(end);
        self
    }

    pub fn with_vehicle_position(mut self, position: LanePosition) -> Self {
        self.vehicle_position = Some(position);
        self
    }

    pub fn with_flags(mut self, flags: RequestFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// A request for public transport vehicles.
    pub fn is_transit(&self) -> bool {
        self.lane_types.contains(LaneType::TRANSPORT_VEHICLE)
    }

    /// Reject requests no search could serve.
    pub fn validate(&self) -> Result<(), PathFindError> {
        if !(self.max_length.is_finite() && self.max_length > 0.0) {
            return Err(PathFindError::InvalidRequest("max length must be positive"));
        }
        if self.lane_types.is_empty() {
            return Err(PathFindError::InvalidRequest("no lane types"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct PathUnit {
    positions: Vec<LanePosition>,
    next: Option<PathUnitId>,
    /// This chunk's share of the path length.
    length: f32,
    flags: PathFindFlags,
    reference_count: u8,
    /// Set on head chunks only.
    request: Option<PathRequest>,
}

impl PathUnit {
    fn new(request: Option<PathRequest>) -> Self {
        Self {
            positions: Vec::with_capacity(POSITIONS_PER_UNIT),
            next: None,
            length: 0.0,
            flags: PathFindFlags::CREATED,
            reference_count: 1,
            request,
        }
    }
}

#[derive(Debug)]
struct PoolInner {
    units: Vec<Option<PathUnit>>,
    free: Vec<usize>,
}

impl PoolInner {
    fn allocate(&mut self, unit: PathUnit) -> Option<PathUnitId> {
        let slot = self.free.pop()?;
        self.units[slot] = Some(unit);
        PathUnitId::from_slot(slot)
    }

    fn get(&self, id: PathUnitId) -> Option<&PathUnit> {
        self.units.get(id.slot()).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, id: PathUnitId) -> Option<&mut PathUnit> {
        self.units.get_mut(id.slot()).and_then(Option::as_mut)
    }

    /// Free a chunk and everything chained after it.
    fn free_chain(&mut self, first: Option<PathUnitId>) {
        let mut next = first;
        let mut steps = 0;
        while let Some(id) = next {
            let Some(unit) = self.units.get_mut(id.slot()).and_then(Option::take) else {
                break;
            };
            self.free.push(id.slot());
            next = unit.next;
            steps += 1;
            if steps > self.units.len() {
                warn!(unit = %id, "path unit chain does not terminate");
                break;
            }
        }
    }
}

/// Lock `mutex`, retrying every `timeout` until it is free.
pub(crate) fn lock_with_retry<'a, T>(
    mutex: &'a Mutex<T>,
    timeout: Duration,
    what: &'static str,
) -> MutexGuard<'a, T> {
    loop {
        if let Some(guard) = mutex.try_lock_for(timeout) {
            return guard;
        }
        trace!(lock = what, "lock busy, retrying");
    }
}

/// Fixed-capacity pool of path units shared by the manager and every worker.
#[derive(Debug)]
pub struct PathUnitPool {
    inner: Mutex<PoolInner>,
    capacity: usize,
    lock_timeout: Duration,
}

impl PathUnitPool {
    pub fn new(capacity: usize, lock_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                units: vec![None; capacity],
                free: (0..capacity).rev().collect(),
            }),
            capacity,
            lock_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        lock_with_retry(&self.inner, self.lock_timeout, "path unit pool")
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks currently allocated.
    pub fn live_units(&self) -> usize {
        self.capacity - self.lock().free.len()
    }

    /// Allocate a head chunk for `request`, owned by the caller.
    pub fn create_path(&self, request: PathRequest) -> Result<PathUnitId, PathFindError> {
        self.lock()
            .allocate(PathUnit::new(Some(request)))
            .ok_or(PathFindError::AllocationExhausted)
    }

    /// Take another reference to a path. Returns false for unknown units or when the
    /// count would overflow.
    pub fn add_reference(&self, id: PathUnitId) -> bool {
        let mut inner = self.lock();
        match inner.get_mut(id) {
            Some(unit) if unit.reference_count < u8::MAX => {
                unit.reference_count += 1;
                true
            }
            _ => false,
        }
    }

    /// Drop one reference; the last one frees the whole chain.
    pub fn release_path(&self, id: PathUnitId) {
        let mut inner = self.lock();
        let Some(unit) = inner.get_mut(id) else {
            return;
        };
        unit.reference_count = unit.reference_count.saturating_sub(1);
        if unit.reference_count == 0 {
            inner.free_chain(Some(id));
        }
    }

    pub fn request(&self, id: PathUnitId) -> Option<PathRequest> {
        self.lock().get(id).and_then(|u| u.request.clone())
    }

    pub fn flags(&self, id: PathUnitId) -> Option<PathFindFlags> {
        self.lock().get(id).map(|u| u.flags)
    }

    pub fn status(&self, id: PathUnitId) -> Option<PathStatus> {
        self.flags(id).map(PathStatus::from_flags)
    }

    /// Set and clear status flags in one step. Returns false for unknown units.
    pub fn update_flags(&self, id: PathUnitId, set: PathFindFlags, clear: PathFindFlags) -> bool {
        let mut inner = self.lock();
        match inner.get_mut(id) {
            Some(unit) => {
                unit.flags = (unit.flags - clear) | set;
                true
            }
            None => false,
        }
    }

    pub fn mark_failed(&self, id: PathUnitId) -> bool {
        self.update_flags(id, PathFindFlags::FAILED, PathFindFlags::empty())
    }

    /// Every position of a path, head chunk first.
    pub fn positions(&self, id: PathUnitId) -> Option<Vec<LanePosition>> {
        let inner = self.lock();
        let mut out = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            let unit = inner.get(current)?;
            out.extend_from_slice(&unit.positions);
            next = unit.next;
            if out.len() > inner.units.len() * POSITIONS_PER_UNIT {
                return None;
            }
        }
        Some(out)
    }

    /// Each chunk's share of the path length, head chunk first.
    pub fn chunk_lengths(&self, id: PathUnitId) -> Option<Vec<f32>> {
        let inner = self.lock();
        let mut out = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            let unit = inner.get(current)?;
            out.push(unit.length);
            next = unit.next;
            if out.len() > inner.units.len() {
                return None;
            }
        }
        Some(out)
    }

    /// The length of a finished path.
    pub fn total_length(&self, id: PathUnitId) -> Option<f32> {
        self.chunk_lengths(id).map(|lengths| lengths.iter().sum())
    }

    /// Write a search result into the chunk chain headed by `id` and mark it ready.
    ///
    /// All chunks are allocated under one lock. If the pool runs out, the chunks
    /// taken so far are returned and the head is marked failed.
    pub fn store_path(
        &self,
        id: PathUnitId,
        positions: &[LanePosition],
        length: f32,
    ) -> Result<(), PathFindError> {
        let mut inner = self.lock();
        if inner.get(id).is_none() {
            return Err(PathFindError::InvalidRequest("unknown path unit"));
        }
        let total = positions.len().max(1);
        let mut chunks = positions.chunks(POSITIONS_PER_UNIT);
        let share = |count: usize| length * count as f32 / total as f32;

        let head_positions = chunks.next().unwrap_or(&[]);
        let mut extra = Vec::new();
        for chunk in chunks {
            let mut unit = PathUnit::new(None);
            unit.positions.extend_from_slice(chunk);
            unit.length = share(chunk.len());
            unit.flags = PathFindFlags::READY;
            match inner.allocate(unit) {
                Some(chunk_id) => extra.push(chunk_id),
                None => {
                    for chunk_id in extra {
                        inner.free_chain(Some(chunk_id));
                    }
                    if let Some(head) = inner.get_mut(id) {
                        head.flags |= PathFindFlags::FAILED;
                    }
                    warn!(unit = %id, positions = positions.len(), "path unit pool exhausted");
                    return Err(PathFindError::AllocationExhausted);
                }
            }
        }

        for pair in extra.windows(2) {
            if let Some(unit) = inner.get_mut(pair[0]) {
                unit.next = Some(pair[1]);
            }
        }
        let first_extra = extra.first().copied();
        let head = inner
            .get_mut(id)
            .ok_or(PathFindError::InvalidRequest("unknown path unit"))?;
        let stale = head.next.take();
        head.positions.clear();
        head.positions.extend_from_slice(head_positions);
        head.length = share(head_positions.len());
        head.next = first_extra;
        head.flags |= PathFindFlags::READY;
        inner.free_chain(stale);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::SegmentId;

    fn pool(capacity: usize) -> PathUnitPool {
        PathUnitPool::new(capacity, Duration::from_millis(10))
    }

    fn position(i: u32) -> LanePosition {
        LanePosition::new(SegmentId::new(i), 0, 255)
    }

    fn request() -> PathRequest {
        PathRequest::new(
            position(0),
            position(1),
            LaneType::VEHICLE,
            VehicleType::CAR,
            1000.0,
        )
    }

    #[test]
    fn create_and_release() {
        let pool = pool(4);
        let id = pool.create_path(request()).unwrap();
        assert_eq!(pool.live_units(), 1);
        assert_eq!(pool.status(id), Some(PathStatus::Pending));
        assert!(pool.add_reference(id));
        pool.release_path(id);
        assert_eq!(pool.live_units(), 1);
        pool.release_path(id);
        assert_eq!(pool.live_units(), 0);
        assert_eq!(pool.status(id), None);
    }

    #[test]
    fn chunk_lengths_sum_to_total() {
        for count in 1..=40u32 {
            let pool = pool(8);
            let id = pool.create_path(request()).unwrap();
            let positions: Vec<_> = (0..count).map(position).collect();
            pool.store_path(id, &positions, 120.0).unwrap();

            assert_eq!(pool.positions(id).unwrap(), positions);
            let lengths = pool.chunk_lengths(id).unwrap();
            assert_eq!(lengths.len(), (count as usize).div_ceil(POSITIONS_PER_UNIT));
            let total: f32 = lengths.iter().sum();
            assert!((total - 120.0).abs() < 1e-3, "{count}: {total}");
            assert_eq!(pool.status(id), Some(PathStatus::Ready));

            pool.release_path(id);
            assert_eq!(pool.live_units(), 0, "{count}");
        }
    }

    #[test]
    fn exhaustion_marks_failed_and_returns_chunks() {
        let pool = pool(2);
        let id = pool.create_path(request()).unwrap();
        let positions: Vec<_> = (0..30).map(position).collect();
        assert_eq!(
            pool.store_path(id, &positions, 10.0),
            Err(PathFindError::AllocationExhausted)
        );
        assert_eq!(pool.status(id), Some(PathStatus::Failed));
        assert_eq!(pool.live_units(), 1);
    }

    #[test]
    fn create_fails_when_full() {
        let pool = pool(1);
        let _held = pool.create_path(request()).unwrap();
        assert_eq!(
            pool.create_path(request()),
            Err(PathFindError::AllocationExhausted)
        );
    }

    #[test]
    fn flags_update_in_one_step() {
        let pool = pool(1);
        let id = pool.create_path(request()).unwrap();
        pool.update_flags(id, PathFindFlags::QUEUED, PathFindFlags::empty());
        pool.update_flags(id, PathFindFlags::CALCULATING, PathFindFlags::QUEUED);
        let flags = pool.flags(id).unwrap();
        assert!(flags.contains(PathFindFlags::CALCULATING | PathFindFlags::CREATED));
        assert!(!flags.contains(PathFindFlags::QUEUED));
        assert_eq!(pool.status(id), Some(PathStatus::Calculating));
    }

    #[test]
    fn request_validation() {
        assert!(request().validate().is_ok());
        let mut bad = request();
        bad.max_length = 0.0;
        assert!(matches!(bad.validate(), Err(PathFindError::InvalidRequest(_))));
        let mut bad = request();
        bad.lane_types = LaneType::empty();
        assert!(bad.validate().is_err());
        assert!(request().with_flags(RequestFlags::HEAVY_VEHICLE).flags.contains(RequestFlags::HEAVY_VEHICLE));
    }
}
