//! Cluster scale reconciler
//!
//! Reacts to `CouchDB` add/update/delete events by creating or removing
//! member pods. Scaling only ever happens in response to resource events;
//! pod events never create pods.

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::Context;
use crate::crd::{CouchDB, CouchDbStatus};
use crate::workload::{generate_pod_name, MemberPodTemplate};

/// Result of a batch of independent pod calls
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FleetChange {
    /// Calls that succeeded
    pub succeeded: usize,
    /// Calls that failed and were logged
    pub failed: usize,
}

/// Handle a newly observed `CouchDB` resource.
///
/// Clears the bootstrap flag, then creates one pod per missing member. A
/// re-add (for example after a watch relist) clears the flag as well.
/// Every create is independent: a failure is logged and the next create
/// still runs.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn on_cluster_added(cluster: &CouchDB, ctx: &Context) -> FleetChange {
    let name = cluster.name_any();
    let Some(namespace) = cluster.namespace() else {
        warn!("couchdb resource has no namespace, ignoring");
        return FleetChange::default();
    };
    info!(%namespace, size = cluster.spec.size, "adding couchdb cluster");

    if let Err(e) = ctx.clusters.set_initialized(&namespace, &name, false).await {
        warn!(error = %e, "failed to reset bootstrap flag");
    }

    let members = match ctx.pods.list_members(&namespace, &name).await {
        Ok(members) => members,
        Err(e) => {
            warn!(error = %e, "could not list member pods");
            return FleetChange::default();
        }
    };

    let desired = cluster.spec.size as usize;
    let missing = desired.saturating_sub(members.len());
    info!(current = members.len(), desired, missing, "computed member shortfall");

    let template = MemberPodTemplate::for_cluster(cluster);
    let mut change = FleetChange::default();
    for i in 0..missing {
        let pod_name = generate_pod_name();
        debug!(index = i, pod = %pod_name, "creating member pod");
        match ctx.pods.create_pod(&namespace, &template.build(pod_name.clone())).await {
            Ok(()) => change.succeeded += 1,
            Err(e) => {
                warn!(pod = %pod_name, error = %e, "failed to create member pod");
                change.failed += 1;
            }
        }
    }

    let message = format!(
        "{} of {} members present, {} created, {} failed",
        members.len() + change.succeeded,
        desired,
        change.succeeded,
        change.failed
    );
    if let Err(e) = ctx
        .clusters
        .patch_status(&namespace, &name, &CouchDbStatus::processed(message))
        .await
    {
        warn!(error = %e, "failed to update cluster status");
    }

    change
}

/// Handle a change to an existing `CouchDB` resource.
///
/// Spec changes are not applied to running clusters.
#[instrument(skip(old, new), fields(cluster = %new.name_any()))]
pub async fn on_cluster_updated(old: &CouchDB, new: &CouchDB) {
    debug!(
        old_uid = ?old.uid(),
        new_uid = ?new.uid(),
        "couchdb resource updated, nothing to do"
    );
}

/// Handle removal of a `CouchDB` resource by deleting every member pod.
///
/// Deletion is best effort: a failed delete is logged and the remaining
/// members are still removed.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn on_cluster_deleted(cluster: &CouchDB, ctx: &Context) -> FleetChange {
    let name = cluster.name_any();
    let Some(namespace) = cluster.namespace() else {
        warn!("couchdb resource has no namespace, ignoring");
        return FleetChange::default();
    };
    info!(%namespace, "removing couchdb cluster");

    let members = match ctx.pods.list_members(&namespace, &name).await {
        Ok(members) => members,
        Err(e) => {
            warn!(error = %e, "could not list member pods for deletion");
            return FleetChange::default();
        }
    };
    info!(count = members.len(), "deleting member pods");

    let mut change = FleetChange::default();
    for pod in &members {
        let pod_name = pod.name_any();
        match ctx.pods.delete_pod(&namespace, &pod_name).await {
            Ok(()) => change.succeeded += 1,
            Err(e) => {
                warn!(pod = %pod_name, uid = ?pod.uid(), error = %e, "could not delete member pod");
                change.failed += 1;
            }
        }
    }

    change
}
