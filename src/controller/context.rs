//! Shared controller context

use std::sync::Arc;

use kube::Client;

use super::clients::{ClusterStore, KubeClusterStore, KubePodFleet, PodFleet};
use crate::couchdb::{CouchDbAdmin, HttpCouchDbAdmin};
use crate::credentials::{KeyValueStore, KubeKeyValueStore};
use crate::Error;

/// Controller context containing the adapters both event loops use
///
/// ```ignore
/// let ctx = Context::new(client)?;
/// ```
pub struct Context {
    /// Member pod create/list/delete
    pub pods: Arc<dyn PodFleet>,
    /// `CouchDB` resource reads and writes
    pub clusters: Arc<dyn ClusterStore>,
    /// Secret/ConfigMap lookups for credential resolution
    pub secrets: Arc<dyn KeyValueStore>,
    /// CouchDB administrative API
    pub admin: Arc<dyn CouchDbAdmin>,
}

impl Context {
    /// Create a context backed by the Kubernetes API and the CouchDB HTTP API
    ///
    /// Fails only if the HTTP client cannot be constructed.
    pub fn new(client: Client) -> Result<Self, Error> {
        Ok(Self {
            pods: Arc::new(KubePodFleet::new(client.clone())),
            clusters: Arc::new(KubeClusterStore::new(client.clone())),
            secrets: Arc::new(KubeKeyValueStore::new(client)),
            admin: Arc::new(HttpCouchDbAdmin::new()?),
        })
    }

    /// Create a context for testing with custom mock adapters
    ///
    /// For production code, use [`Context::new`].
    #[cfg(test)]
    pub fn for_testing(
        pods: Arc<dyn PodFleet>,
        clusters: Arc<dyn ClusterStore>,
        secrets: Arc<dyn KeyValueStore>,
        admin: Arc<dyn CouchDbAdmin>,
    ) -> Self {
        Self {
            pods,
            clusters,
            secrets,
            admin,
        }
    }
}
