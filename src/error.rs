//! Error types for the CouchDB operator

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Transport-level failure talking to a CouchDB node
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// CouchDB answered with a non-success status
    #[error("couchdb error {status} ({error}): {reason}")]
    CouchDb {
        /// HTTP status code returned by the node
        status: u16,
        /// CouchDB error code, e.g. `unauthorized`
        error: String,
        /// Human-readable reason reported by CouchDB
        reason: String,
    },

    /// An admin credential declaration could not be dereferenced
    #[error("failed to resolve {variable} from {reference}: {message}")]
    Credentials {
        /// Environment variable being resolved
        variable: String,
        /// Reference that failed, e.g. `secret couchdb-admin/password`
        reference: String,
        /// What went wrong
        message: String,
    },

    /// Validation error for resource specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid process configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a credential resolution error
    pub fn credentials(
        variable: impl Into<String>,
        reference: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Credentials {
            variable: variable.into(),
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true if this is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(e)) if e.code == 404)
    }
}
