//! Kubernetes adapters used by the controllers
//!
//! The traits here are the seams between the controller logic and the API
//! server, so the logic can be exercised against mocks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use crate::crd::{initialized_value, CouchDB, CouchDbStatus};
use crate::{member_selector, Error, INITIALIZED_ANNOTATION};

/// Create, list and delete member pods
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodFleet: Send + Sync {
    /// Create `pod` in `namespace`
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), Error>;

    /// List every member pod of `cluster`, in API server order
    async fn list_members(&self, namespace: &str, cluster: &str) -> Result<Vec<Pod>, Error>;

    /// Delete pod `name`; a pod that no longer exists counts as deleted
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Point reads and writes against `CouchDB` resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Read cluster `name`; `Ok(None)` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CouchDB>, Error>;

    /// Persist the bootstrap flag annotation
    async fn set_initialized(
        &self,
        namespace: &str,
        name: &str,
        initialized: bool,
    ) -> Result<(), Error>;

    /// Replace the status subresource
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CouchDbStatus,
    ) -> Result<(), Error>;
}

/// [`PodFleet`] backed by the Kubernetes API
pub struct KubePodFleet {
    client: Client,
}

impl KubePodFleet {
    /// Create a new KubePodFleet wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodFleet for KubePodFleet {
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), pod).await?;
        Ok(())
    }

    async fn list_members(&self, namespace: &str, cluster: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&member_selector(cluster));
        Ok(api.list(&params).await?.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = Error::from(e);
                // Already gone is as good as deleted.
                if err.is_not_found() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// [`ClusterStore`] backed by the Kubernetes API
pub struct KubeClusterStore {
    client: Client,
}

impl KubeClusterStore {
    /// Create a new KubeClusterStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CouchDB>, Error> {
        let api: Api<CouchDB> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn set_initialized(
        &self,
        namespace: &str,
        name: &str,
        initialized: bool,
    ) -> Result<(), Error> {
        let api: Api<CouchDB> = Api::namespaced(self.client.clone(), namespace);
        let annotations = BTreeMap::from([(
            INITIALIZED_ANNOTATION.to_string(),
            initialized_value(initialized).to_string(),
        )]);
        let patch = serde_json::json!({ "metadata": { "annotations": annotations } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CouchDbStatus,
    ) -> Result<(), Error> {
        let api: Api<CouchDB> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
