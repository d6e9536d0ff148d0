//! Lane merge and split matching.
//!
//! When the number of compatible lanes changes from one segment to the next, each
//! lane on the previous segment is mapped to one lane on the next so that traffic
//! spreads symmetrically. Lane indices here count from the right in travel order.

use rand::Rng;

/// The lane picked on the next segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneMatch {
    /// Index before clamping; may fall outside the next segment on splits.
    pub raw: i32,
    /// Index clamped to `0..next_count`.
    pub index: u8,
}

/// Map lane `prev_index` of `prev_count` similar lanes onto `next_count` lanes.
///
/// Outer lanes of a merge fan out over the extra lanes at random; inner lanes keep
/// a symmetric offset. When the two counts differ in parity, the middle lanes pick
/// one of the two nearest offsets at random. Both counts must be at least one.
pub fn match_lane<R: Rng + ?Sized>(
    prev_index: u8,
    prev_count: u8,
    next_count: u8,
    rng: &mut R,
) -> LaneMatch {
    let p = i32::from(prev_count.max(1));
    let n = i32::from(next_count.max(1));
    let idx = i32::from(prev_index).min(p - 1);
    let same_parity = p % 2 == n % 2;

    let raw = if p < n {
        if same_parity {
            let a = (n - p) / 2;
            if p == 1 {
                rng.gen_range(0..=n - 1)
            } else if idx == 0 {
                rng.gen_range(0..=a)
            } else if idx == p - 1 {
                rng.gen_range(idx + a..=n - 1)
            } else {
                idx + a
            }
        } else {
            let a = (n - p - 1) / 2;
            let b = (n - p + 1) / 2;
            if p == 1 {
                rng.gen_range(0..=n - 1)
            } else if idx == 0 {
                rng.gen_range(0..=b)
            } else if idx == p - 1 {
                rng.gen_range(idx + a..=n - 1)
            } else if rng.gen_bool(0.5) {
                idx + a
            } else {
                idx + b
            }
        }
    } else if same_parity {
        idx - (p - n) / 2
    } else {
        let a = (p - n - 1) / 2;
        if rng.gen_bool(0.5) { idx - a } else { idx - a - 1 }
    };

    LaneMatch {
        raw,
        index: raw.clamp(0, n - 1) as u8,
    }
}
