//! Coordination error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while coordinating instances
///
/// Everything except `InvalidKey` is handled inside the coordinator and only
/// ever shows up in logs.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Invalid coordination key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("Unable to create shared memory segment {name:?}: {source}")]
    SegmentCreateFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to start local socket server at {path}: {source}")]
    EndpointListenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Owner unreachable during {stage}: {detail}")]
    RemoteUnreachable { stage: &'static str, detail: String },

    #[error("Owner reported malformed version {0:?}")]
    MalformedRemoteVersion(String),

    #[error("Unexpected reply from owner: {0:?}")]
    Protocol(String),
}

impl CoordinationError {
    pub(crate) fn unreachable(stage: &'static str, err: impl std::fmt::Display) -> Self {
        CoordinationError::RemoteUnreachable {
            stage,
            detail: err.to_string(),
        }
    }

    pub(crate) fn timed_out(stage: &'static str, after: Duration) -> Self {
        CoordinationError::RemoteUnreachable {
            stage,
            detail: format!("timed out after {:?}", after),
        }
    }

    /// Check if the coordinator should fall back to claiming ownership
    pub fn is_recoverable_by_claim(&self) -> bool {
        match self {
            CoordinationError::RemoteUnreachable { .. } => true,
            CoordinationError::Protocol(_) => true,
            CoordinationError::MalformedRemoteVersion(_) => false,
            CoordinationError::InvalidKey { .. } => false,
            CoordinationError::SegmentCreateFailed { .. } => false,
            CoordinationError::EndpointListenFailed { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_out_mentions_duration() {
        let err = CoordinationError::timed_out("connect", Duration::from_secs(3));
        assert_eq!(err.to_string(), "Owner unreachable during connect: timed out after 3s");
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(CoordinationError::unreachable("read", "eof").is_recoverable_by_claim());
        assert!(CoordinationError::Protocol("nope".to_string()).is_recoverable_by_claim());
        assert!(!CoordinationError::MalformedRemoteVersion("x".to_string()).is_recoverable_by_claim());
        assert!(
            !CoordinationError::InvalidKey {
                key: "a/b".to_string(),
                reason: "bad",
            }
            .is_recoverable_by_claim()
        );
    }
}
