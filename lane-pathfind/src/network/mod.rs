//! The lane network the search runs over.
//!
//! The engine only sees the network through [`LaneGraph`]. [`RoadNetwork`] is an
//! in-memory implementation with its own [`LaneTrafficDensity`] signal.

mod density;
mod error;
mod flags;
mod graph;
mod ids;
mod memory;
mod model;

pub use density::{LaneTrafficDensity, SegmentSweep};
pub use error::NetworkDataError;
pub use flags::{Direction, LaneArrows, LaneType, NodeFlags, SegmentFlags, VehicleType};
pub use graph::LaneGraph;
pub use ids::{LaneId, LanePosition, NodeId, SegmentId};
pub use memory::{
    BuildError, LaneSpec, MAX_NODE_SEGMENTS, PEDESTRIAN_SPEED, RoadNetwork, RoadNetworkBuilder,
    SegmentSpec,
};
pub use model::{Lane, LaneInfo, LeftRightLanes, Node, Point, Segment, SegmentGeometry};
