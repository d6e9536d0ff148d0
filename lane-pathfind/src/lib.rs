//! Lane-level path finding over a road network.
//!
//! [`network`] describes the lanes, segments and nodes a search runs over and the
//! traffic density signal that steers it. [`pathfind`] holds the search itself,
//! the path unit pool its results are written to, and the background workers that
//! serve requests.

pub mod network;
pub mod pathfind;
