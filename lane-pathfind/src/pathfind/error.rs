//! Errors from path requests and the workers that serve them.

use super::config::ConfigError;
use crate::network::NetworkDataError;

/// Why a path request did not produce a path.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PathFindError {
    /// The queue ran dry before reaching a start lane
    #[error("no path found")]
    NoPathFound,

    /// The path unit pool has no free chunk left
    #[error("path unit pool exhausted")]
    AllocationExhausted,

    /// The network could not be followed
    #[error("malformed network data: {0}")]
    MalformedNetworkData(#[from] NetworkDataError),

    /// A reconstruction walk broke a structural guarantee
    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),

    /// The request was rejected before it was queued
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    /// The worker would not accept more work
    #[error("request queue rejected the request")]
    QueueRejected,

    /// A worker thread could not be started
    #[error("failed to spawn worker: {0}")]
    WorkerSpawn(String),

    /// The configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::SegmentId;

    #[test]
    fn error_display() {
        assert_eq!(PathFindError::NoPathFound.to_string(), "no path found");

        let err = PathFindError::InvalidRequest("no end position");
        assert_eq!(err.to_string(), "invalid request: no end position");

        let err: PathFindError = NetworkDataError::MissingSegment(SegmentId::new(3)).into();
        assert_eq!(
            err.to_string(),
            "malformed network data: segment S3 does not exist"
        );

        let err = PathFindError::InternalInvariantViolation("successor loop".into());
        assert_eq!(err.to_string(), "internal invariant violated: successor loop");
    }
}
