//! Error types for source resolution, dispatch and pinning.

use thiserror::Error;

use crate::classify::Protocol;

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, GatherError>;

/// Pinning was requested on metadata that lacks a required field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PinError {
    #[error("empty URL")]
    EmptyUrl,

    #[error("latest commit not set")]
    LatestCommitNotSet,

    #[error("image digest not set")]
    DigestNotSet,
}

/// Errors produced while resolving, classifying or gathering a source.
#[derive(Debug, Error)]
pub enum GatherError {
    /// The macro syntax in a source descriptor is malformed.
    #[error("parsing source template {descriptor:?}: {message}")]
    Template { descriptor: String, message: String },

    /// A cluster-indirection source does not follow `k8s*::<kind>/<ns>/<name>[#key]`.
    #[error("parsing cluster source {reference:?}: {message}")]
    ClusterSource { reference: String, message: String },

    #[error("unknown resolver {name:?}")]
    UnknownResolver { name: String },

    #[error("resolver named {name:?} already registered")]
    DuplicateResolver { name: String },

    #[error("unsupported source protocol: {token}")]
    UnsupportedProtocol { token: String },

    /// The classifier produced a tag with no registered gatherer.
    #[error("unsupported source protocol: no gatherer registered for {protocol}")]
    NoGatherer { protocol: Protocol },

    #[error("gatherer for {protocol} already registered")]
    DuplicateGatherer { protocol: Protocol },

    #[error("resolver {name:?} failed: {source:#}")]
    Resolver {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{protocol} gatherer failed: {source:#}")]
    Gatherer {
        protocol: Protocol,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Pin(#[from] PinError),

    #[error("cluster indirection exceeded {limit} hops: {}", chain.join(" -> "))]
    IndirectionLimit { limit: usize, chain: Vec<String> },

    #[error("cluster indirection cycle at {reference:?}")]
    IndirectionCycle { reference: String },
}

impl GatherError {
    /// True when the error came from the caller's cancellation or deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}
