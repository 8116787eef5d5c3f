use std::time::Duration;

use thiserror::Error;

/// Errors raised by the lifecycle controller and the object store.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed caller input, detected before any store call.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The store reports the object does not exist.
    #[error("{kind} `{id}` not found")]
    NotFound { kind: String, id: String },

    /// Apply rejected due to field ownership held by another manager.
    #[error("apply of {kind} `{id}` conflicts with another field manager: {message}")]
    Conflict {
        kind: String,
        id: String,
        message: String,
    },

    /// Any other store call failure.
    #[error("failed to {verb} {api_version}/{kind} `{id}`: {source}")]
    Transport {
        verb: &'static str,
        api_version: String,
        kind: String,
        id: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to serialize object as JSON (this is a bug): {0}")]
    SerializeJson(#[source] serde_json::Error),

    #[error("failed to serialize object as YAML (this is a bug): {0}")]
    SerializeYaml(#[source] serde_yaml::Error),

    /// The condition was not satisfied before the deadline.
    /// The mutation that preceded the wait is not rolled back.
    #[error("condition on `{path}` was not satisfied after {waited:?}")]
    WaitTimeout { path: String, waited: Duration },

    /// The caller stopped the operation before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The controller was constructed without a store.
    #[error("offline mode: no cluster connection is configured")]
    Offline,
}

impl Error {
    /// Whether this is the distinguished not-found kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
