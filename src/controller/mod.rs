//! Controller implementations for the CouchDB CRD
//!
//! Two independent pieces of logic share one [`Context`]:
//!
//! - [`scale`] reacts to `CouchDB` resource events and keeps the member pod
//!   count at the desired size
//! - [`bootstrap`] reacts to member pod updates and joins a fully ready
//!   fleet into one cluster

pub mod bootstrap;
mod clients;
mod context;
pub mod scale;

pub use bootstrap::{
    assess_members, on_pod_added, on_pod_deleted, on_pod_updated, BootstrapPhase,
};
pub use clients::{ClusterStore, KubeClusterStore, KubePodFleet, PodFleet};
pub use context::Context;
pub use scale::{on_cluster_added, on_cluster_deleted, on_cluster_updated, FleetChange};

#[cfg(test)]
pub use clients::{MockClusterStore, MockPodFleet};
