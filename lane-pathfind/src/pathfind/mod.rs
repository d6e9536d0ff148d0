//! Lane-level path finding.
//!
//! Requests are created through a [`PathManager`], which hands them to background
//! [`PathFinder`] workers. Each worker searches backwards from the destination over
//! a [`BucketQueue`] of lane entries, relaxing through vehicle, pedestrian and
//! node-attached lanes, and writes the path into the shared [`PathUnitPool`] as a
//! chain of fixed-size chunks.

mod config;
mod cost;
mod epoch;
mod error;
mod lane_match;
mod manager;
mod queue;
mod reconstruct;
mod relax;
mod search;
mod units;
mod worker;

pub use config::{ConfigError, DriveSide, PathFindConfig, RoutingPolicy, TrafficSensitivity};
pub use cost::{LaneChange, lane_change_cost, lane_speed, stock_cost_factor};
pub use epoch::SearchEpoch;
pub use error::PathFindError;
pub use lane_match::{LaneMatch, match_lane};
pub use manager::PathManager;
pub use queue::{BUCKET_CAPACITY, BUCKET_COUNT, BucketQueue, FrontierEntry, PushOutcome};
pub use reconstruct::{ReconstructedPath, reconstruct};
pub use relax::{Relaxer, SearchParams};
pub use search::{SearchContext, SearchOutcome};
pub use units::{
    POSITIONS_PER_UNIT, PathFindFlags, PathRequest, PathStatus, PathUnitId, PathUnitPool,
    RequestFlags,
};
pub use worker::PathFinder;
