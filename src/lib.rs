//! CouchDB Operator - event-driven Kubernetes operator for multi-node CouchDB clusters
//!
//! The operator watches `CouchDB` custom resources and the member pods that back
//! them. Adding a resource scales its pod fleet up to the desired size; once every
//! member is running and ready, the operator joins all members to a seed node
//! exactly once and records the result on the resource.
//!
//! # Modules
//!
//! - [`crd`] - The `CouchDB` custom resource and its runtime bootstrap flag
//! - [`controller`] - Scale reconciler, bootstrap orchestrator and their adapters
//! - [`credentials`] - Admin credential resolution from inline values, Secrets and ConfigMaps
//! - [`couchdb`] - Administrative API client used to join nodes
//! - [`workload`] - Member pod template builder
//! - [`dispatch`] - Watch event classification and the two event loops
//! - [`probe`] - Readiness flag and health endpoint
//! - [`config`] - Process configuration
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod couchdb;
pub mod credentials;
pub mod crd;
pub mod dispatch;
pub mod error;
pub mod probe;
pub mod telemetry;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Labels and annotations
// =============================================================================

/// Label key identifying the application every member pod belongs to
pub const LABEL_APP: &str = "app";

/// Value of [`LABEL_APP`] on every member pod
pub const APP_NAME: &str = "couchdb";

/// Label key carrying the owning cluster's name on every member pod
pub const LABEL_CLUSTER: &str = "cluster";

/// Annotation on the `CouchDB` resource recording whether the cluster was joined
pub const INITIALIZED_ANNOTATION: &str = "couchdb.org/initialized";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "couchdb-operator";

// =============================================================================
// CouchDB defaults
// =============================================================================

/// Default CouchDB version when the resource omits it or leaves it blank
pub const DEFAULT_COUCHDB_VERSION: &str = "2.1.0";

/// Default image repository when the resource omits it or leaves it blank
pub const DEFAULT_BASE_IMAGE: &str = "nicolai86/couchdb";

/// Environment variable holding the admin username inside the container
pub const ADMIN_USER_ENV: &str = "COUCHDB_USER";

/// Environment variable holding the admin password inside the container
pub const ADMIN_PASSWORD_ENV: &str = "COUCHDB_PASSWORD";

/// Admin username used when no declaration provides one
pub const DEFAULT_ADMIN_USER: &str = "admin";

/// Admin password used when no declaration provides one
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// Client API port, also the target of readiness checks and cluster joins
pub const CLIENT_PORT: u16 = 5984;

/// Node-local API port
pub const NODE_LOCAL_PORT: u16 = 5986;

/// Erlang port mapper port used for node discovery
pub const EPMD_PORT: u16 = 4369;

/// Erlang distribution port used for inter-node transport
pub const INET_PORT: u16 = 9100;

/// Label selector matching every member pod of `cluster`
pub fn member_selector(cluster: &str) -> String {
    format!("{LABEL_APP}={APP_NAME},{LABEL_CLUSTER}={cluster}")
}
