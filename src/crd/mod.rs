//! Custom Resource Definitions for the CouchDB operator
//!
//! This module contains the `CouchDB` resource and its supporting types.

mod couchdb;
mod types;

pub use couchdb::{initialized_value, CouchDB, CouchDbSpec, CouchDbStatus, RuntimeState};
pub use types::{CouchDbState, EnvVar, EnvVarSource, KeySelector, PodPolicy};

use kube::CustomResourceExt;

use crate::Error;

/// Name of the `CouchDB` CustomResourceDefinition object
pub const CRD_NAME: &str = "couchdbs.stable.couchdb.org";

/// The `CouchDB` CRD rendered as YAML
pub fn crd_yaml() -> Result<String, Error> {
    serde_yaml::to_string(&CouchDB::crd()).map_err(|e| Error::serialization(e.to_string()))
}
