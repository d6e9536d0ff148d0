//! Search epochs and the per-lane decay table.
//!
//! Instead of clearing per-lane state before every search, each record is tagged
//! with the epoch that wrote it. A record from any other epoch reads as absent.

use crate::network::{LaneId, SegmentId};

/// A 15-bit wrapping search counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchEpoch(u16);

impl SearchEpoch {
    const MASK: u16 = 0x7FFF;

    pub fn new(value: u16) -> Self {
        Self(value & Self::MASK)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// Move to the next epoch. Returns true when the counter wrapped to zero,
    /// which means every stored record must be invalidated.
    pub fn advance(&mut self) -> bool {
        self.0 = (self.0 + 1) & Self::MASK;
        self.0 == 0
    }

    /// Deterministic seed for randomness tied to this epoch and a segment.
    pub fn seed_for(self, segment: SegmentId) -> u64 {
        (u64::from(self.0) << 32) | u64::from(segment.get())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DecayRecord {
    epoch: u16,
    slot: u16,
}

impl DecayRecord {
    /// Never equal to a 15-bit epoch.
    const STALE: DecayRecord = DecayRecord {
        epoch: u16::MAX,
        slot: 0,
    };
}

/// Where each lane's queue entry lives, valid only for the epoch that wrote it.
#[derive(Debug, Clone)]
pub struct LaneDecayTable {
    records: Vec<DecayRecord>,
}

impl LaneDecayTable {
    pub fn new(lane_count: usize) -> Self {
        Self {
            records: vec![DecayRecord::STALE; lane_count],
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The queue slot of `lane` if it was recorded during `epoch`.
    pub fn live_slot(&self, lane: LaneId, epoch: SearchEpoch) -> Option<u16> {
        self.records
            .get(lane.index())
            .filter(|r| r.epoch == epoch.get())
            .map(|r| r.slot)
    }

    pub fn set(&mut self, lane: LaneId, epoch: SearchEpoch, slot: u16) {
        if let Some(record) = self.records.get_mut(lane.index()) {
            *record = DecayRecord {
                epoch: epoch.get(),
                slot,
            };
        }
    }

    /// Invalidate every record.
    pub fn clear(&mut self) {
        self.records.fill(DecayRecord::STALE);
    }
}
