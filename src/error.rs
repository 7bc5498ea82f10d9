//! Error types for the disruption budget controller.
//!
//! API failures are requeued by the dispatcher, stale-state failures (the
//! object is already gone) are absorbed by the executor, and invariant
//! violations fail a single reconciliation attempt without taking the process
//! down.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    /// The target object no longer exists on the server.
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    /// Converting between the local and the wire representation failed.
    #[error("serialization error for {kind}: {source}")]
    Serialization {
        kind: &'static str,
        source: serde_json::Error,
    },

    /// A queue key that is not of the form `namespace/name`.
    #[error("invalid key {0:?}")]
    InvalidKey(String),

    /// A programming invariant was broken while deciding what to do.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Some of the actions of a plan failed. The remaining ones were still attempted.
    #[error("{failed} of {attempted} actions failed, first error: {first}")]
    Plan {
        failed: usize,
        attempted: usize,
        first: Box<Error>,
    },

    /// A watch stream ended before delivering its initial listing.
    #[error("watch for {0} ended before the cache synced")]
    CacheSync(&'static str),
}

impl Error {
    /// Whether this error only says that the object was already removed.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(response),
            } => response.code == 404,
            _ => false,
        }
    }

    pub fn is_invariant(&self) -> bool {
        matches!(self, Error::Invariant(_))
    }
}
