//! Bucketed priority queue over normalized path cost.
//!
//! Costs are normalized to roughly 0..1 by the request's length budget and
//! quantized into 1024 buckets of 64 slots. Popping scans buckets upward from a
//! floor that never moves back, so ordering is exact between buckets and
//! insertion-ordered within one. Each lane owns at most one live entry per search;
//! a cheaper push for the same lane replaces it and records a new best successor.

use tracing::trace;

use super::epoch::{LaneDecayTable, SearchEpoch};
use crate::network::{Direction, LaneId, LanePosition, LaneType};

pub const BUCKET_COUNT: usize = 1024;
pub const BUCKET_CAPACITY: usize = 64;

/// A partial path waiting to be expanded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrontierEntry {
    pub position: LanePosition,
    pub lane_id: LaneId,
    /// Accumulated cost, normalized by the length budget.
    pub cost: f32,
    /// Raw travelled distance, used to cap walking.
    pub method_distance: f32,
    /// Travel direction on the lane.
    pub direction: Direction,
    /// Lane types used so far on this partial path.
    pub lanes_used: LaneType,
    /// Segments since the last junction.
    pub segments_to_junction: u32,
}

/// What a push did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// New entry for a lane with none this search.
    Inserted,
    /// Replaced a costlier entry for the same lane.
    Improved,
    /// Not cheaper than the live entry, or that entry was already expanded.
    Ignored,
    /// Cost out of range or bucket full.
    Dropped,
}

impl PushOutcome {
    pub fn accepted(self) -> bool {
        matches!(self, PushOutcome::Inserted | PushOutcome::Improved)
    }
}

/// Map a normalized cost to its bucket, never below `floor`.
fn bucket_for(cost: f32, floor: usize) -> Option<usize> {
    if !cost.is_finite() {
        return None;
    }
    let raw = (cost * BUCKET_COUNT as f32).round();
    let bucket = if raw <= 0.0 { 0 } else { raw as usize };
    let bucket = bucket.max(floor);
    (bucket < BUCKET_COUNT).then_some(bucket)
}

/// The search frontier plus per-lane bookkeeping for one worker.
#[derive(Debug)]
pub struct BucketQueue {
    slots: Vec<Option<FrontierEntry>>,
    /// Next slot to pop in each bucket.
    heads: Vec<u8>,
    /// Filled slots in each bucket.
    lens: Vec<u8>,
    floor: usize,
    top: Option<usize>,
    decay: LaneDecayTable,
    successors: Vec<Option<LanePosition>>,
    epoch: SearchEpoch,
}

impl BucketQueue {
    /// Create an empty queue for lanes `0..lane_count`.
    pub fn new(lane_count: usize) -> Self {
        Self {
            slots: vec![None; BUCKET_COUNT * BUCKET_CAPACITY],
            heads: vec![0; BUCKET_COUNT],
            lens: vec![0; BUCKET_COUNT],
            floor: 0,
            top: None,
            decay: LaneDecayTable::new(lane_count),
            successors: vec![None; lane_count],
            epoch: SearchEpoch::default(),
        }
    }

    /// Start a new search: advance the epoch and empty the buckets.
    ///
    /// Per-lane records are invalidated by the epoch change alone, except when
    /// the epoch wraps, where the decay table is cleared.
    pub fn begin_search(&mut self) -> SearchEpoch {
        if self.epoch.advance() {
            trace!("search epoch wrapped, clearing decay table");
            self.decay.clear();
        }
        for bucket in 0..=self.top.unwrap_or(0) {
            let base = bucket * BUCKET_CAPACITY;
            self.slots[base..base + BUCKET_CAPACITY].fill(None);
        }
        self.heads.fill(0);
        self.lens.fill(0);
        self.floor = 0;
        self.top = None;
        self.epoch
    }

    pub fn epoch(&self) -> SearchEpoch {
        self.epoch
    }

    pub fn lane_capacity(&self) -> usize {
        self.decay.len()
    }

    /// Lowest bucket that may still be popped.
    pub fn floor(&self) -> usize {
        self.floor
    }

    /// Offer an entry. `successor` is the position this entry continues to, and
    /// becomes the lane's best successor when the entry is accepted.
    pub fn push(&mut self, entry: FrontierEntry, successor: LanePosition) -> PushOutcome {
        let lane = entry.lane_id;
        if lane.index() >= self.successors.len() {
            return PushOutcome::Dropped;
        }
        let Some(target) = bucket_for(entry.cost, self.floor) else {
            return PushOutcome::Dropped;
        };

        let Some(slot) = self.decay.live_slot(lane, self.epoch) else {
            if usize::from(self.lens[target]) >= BUCKET_CAPACITY {
                return PushOutcome::Dropped;
            }
            self.insert(target, entry, successor);
            return PushOutcome::Inserted;
        };

        let slot = usize::from(slot);
        let bucket = slot / BUCKET_CAPACITY;
        let index = slot % BUCKET_CAPACITY;
        let existing_cost = self.slots[slot].map_or(f32::INFINITY, |e| e.cost);
        if entry.cost >= existing_cost {
            return PushOutcome::Ignored;
        }
        if bucket < self.floor || (bucket == self.floor && index < usize::from(self.heads[bucket]))
        {
            return PushOutcome::Ignored;
        }

        if target == bucket {
            self.slots[slot] = Some(entry);
            self.successors[lane.index()] = Some(successor);
            return PushOutcome::Improved;
        }
        if usize::from(self.lens[target]) >= BUCKET_CAPACITY {
            return PushOutcome::Dropped;
        }

        // Fill the hole with the bucket's last entry so live slots stay contiguous.
        let last = bucket * BUCKET_CAPACITY + usize::from(self.lens[bucket]) - 1;
        if last != slot {
            let moved = self.slots[last].take();
            if let Some(moved_entry) = moved {
                self.decay.set(moved_entry.lane_id, self.epoch, slot as u16);
            }
            self.slots[slot] = moved;
        } else {
            self.slots[slot] = None;
        }
        self.lens[bucket] -= 1;

        self.insert(target, entry, successor);
        PushOutcome::Improved
    }

    fn insert(&mut self, bucket: usize, entry: FrontierEntry, successor: LanePosition) {
        let slot = bucket * BUCKET_CAPACITY + usize::from(self.lens[bucket]);
        self.slots[slot] = Some(entry);
        self.lens[bucket] += 1;
        self.decay.set(entry.lane_id, self.epoch, slot as u16);
        self.successors[entry.lane_id.index()] = Some(successor);
        self.top = Some(self.top.map_or(bucket, |t| t.max(bucket)));
    }

    /// Remove the cheapest entry.
    pub fn pop_min(&mut self) -> Option<FrontierEntry> {
        let top = self.top?;
        while self.floor <= top {
            let bucket = self.floor;
            if self.heads[bucket] < self.lens[bucket] {
                let slot = bucket * BUCKET_CAPACITY + usize::from(self.heads[bucket]);
                self.heads[bucket] += 1;
                if let Some(entry) = self.slots[slot] {
                    return Some(entry);
                }
                continue;
            }
            self.floor += 1;
        }
        None
    }

    /// The position `lane`'s best entry continues to.
    pub fn successor(&self, lane: LaneId) -> Option<LanePosition> {
        self.successors.get(lane.index()).copied().flatten()
    }

    /// The live entry for `lane` this search, whether or not it has been popped.
    pub fn entry_for(&self, lane: LaneId) -> Option<FrontierEntry> {
        let slot = self.decay.live_slot(lane, self.epoch)?;
        self.slots[usize::from(slot)]
    }

    /// Entries pushed but not yet popped.
    pub fn pending(&self) -> usize {
        (self.floor..BUCKET_COUNT)
            .map(|b| usize::from(self.lens[b] - self.heads[b]))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    #[cfg(test)]
    fn pending_lanes(&self) -> Vec<LaneId> {
        let mut lanes = Vec::new();
        for bucket in self.floor..BUCKET_COUNT {
            let base = bucket * BUCKET_CAPACITY;
            for i in usize::from(self.heads[bucket])..usize::from(self.lens[bucket]) {
                if let Some(e) = self.slots[base + i] {
                    lanes.push(e.lane_id);
                }
            }
        }
        lanes
    }
}
