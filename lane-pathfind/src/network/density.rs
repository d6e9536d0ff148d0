//! Per-lane traffic density bookkeeping.
//!
//! Writers (the simulation, or whoever drives vehicles along found paths) add
//! traffic and periodically fold it into a smoothed mean. The path search only
//! reads the mean, without synchronization; a slightly stale value is fine.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use super::LaneId;

/// Sweep masks indexed by simulation accuracy; lower accuracy updates less often.
const SWEEP_MASKS: [u32; 5] = [63, 127, 255, 511, 1023];

/// Lock-free per-lane traffic counters and smoothed density.
#[derive(Debug)]
pub struct LaneTrafficDensity {
    buffer: Vec<AtomicU32>,
    current: Vec<AtomicU8>,
    mean: Vec<AtomicU32>,
}

impl LaneTrafficDensity {
    /// Mean density every lane starts from.
    pub const INITIAL_MEAN: f32 = 0.5;

    /// Largest step the current density moves per update, in percent.
    const STEP: u8 = 5;

    /// Weight of the previous mean in the moving average.
    const SMOOTHING: f32 = 0.95;

    /// Create counters for lane ids `0..lane_count`.
    pub fn new(lane_count: usize) -> Self {
        Self {
            buffer: (0..lane_count).map(|_| AtomicU32::new(0)).collect(),
            current: (0..lane_count).map(|_| AtomicU8::new(0)).collect(),
            mean: (0..lane_count)
                .map(|_| AtomicU32::new(Self::INITIAL_MEAN.to_bits()))
                .collect(),
        }
    }

    /// Record traffic on a lane. Unknown lanes are ignored.
    pub fn add_traffic(&self, lane: LaneId, amount: u32) {
        if let Some(slot) = self.buffer.get(lane.index()) {
            // Saturate rather than wrap on heavily used lanes.
            let _ = slot.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_add(amount))
            });
        }
    }

    /// Fold the accumulated traffic of a lane into its density.
    ///
    /// The current density steps at most five points towards the measured load and
    /// the mean follows it with an exponential moving average.
    pub fn update_lane(&self, lane: LaneId, lane_length: f32) {
        let i = lane.index();
        let (Some(buffer), Some(current), Some(mean)) =
            (self.buffer.get(i), self.current.get(i), self.mean.get(i))
        else {
            return;
        };

        let traffic = buffer.swap(0, Ordering::Relaxed) as f32;
        let measured = if lane_length > 0.0 {
            (traffic / lane_length * 100.0).min(100.0) as u8
        } else {
            0
        };

        let previous = current.load(Ordering::Relaxed);
        let stepped = if measured > previous {
            previous.saturating_add(Self::STEP).min(measured)
        } else {
            previous.saturating_sub(Self::STEP).max(measured)
        };
        current.store(stepped, Ordering::Relaxed);

        let old_mean = f32::from_bits(mean.load(Ordering::Relaxed));
        let new_mean =
            Self::SMOOTHING * old_mean + (1.0 - Self::SMOOTHING) * f32::from(stepped) * 0.01;
        mean.store(new_mean.to_bits(), Ordering::Relaxed);
    }

    /// Smoothed density in 0..=1. Unknown lanes read as the initial mean.
    pub fn mean(&self, lane: LaneId) -> f32 {
        self.mean
            .get(lane.index())
            .map(|m| f32::from_bits(m.load(Ordering::Relaxed)))
            .unwrap_or(Self::INITIAL_MEAN)
    }

    /// Last stepped density percentage.
    pub fn current(&self, lane: LaneId) -> u8 {
        self.current
            .get(lane.index())
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Traffic accumulated since the last update.
    pub fn pending_traffic(&self, lane: LaneId) -> u32 {
        self.buffer
            .get(lane.index())
            .map(|b| b.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Decides which segments refresh their densities on a given simulation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSweep {
    mask: u32,
}

impl SegmentSweep {
    /// Build a sweep for a simulation accuracy level in 0..=4. Out-of-range levels clamp.
    pub fn new(sim_accuracy: u8) -> Self {
        let level = usize::from(sim_accuracy).min(SWEEP_MASKS.len() - 1);
        Self {
            mask: SWEEP_MASKS[level],
        }
    }

    /// Number of ticks between two refreshes of the same segment.
    pub fn period(&self) -> u32 {
        self.mask + 1
    }

    /// Whether `segment` is refreshed on `tick`.
    pub fn is_due(&self, segment: u32, tick: u32) -> bool {
        segment & self.mask == tick & self.mask
    }
}
