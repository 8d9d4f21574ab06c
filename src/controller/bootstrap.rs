//! Cluster bootstrap orchestrator
//!
//! Member pods come up as independent single-node CouchDB instances. Once a
//! cluster has its full complement of ready members, every member except the
//! seed is joined to the seed through the admin API, exactly once per
//! resource generation. Pod update events drive the whole sequence; the
//! persisted `initialized` flag is what keeps it from running twice.
//!
//! ```text
//! Unknown -> Unclustered -> ReadyToJoin -> Joining -> Initialized
//! ```

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::Context;
use crate::couchdb::AddNodeRequest;
use crate::credentials::resolve_admin_credentials;
use crate::crd::{CouchDB, CouchDbStatus, RuntimeState};
use crate::workload::MemberPod;
use crate::CLIENT_PORT;

/// Where a cluster stands in the bootstrap sequence
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BootstrapPhase {
    /// The owning resource could not be read
    #[default]
    Unknown,
    /// Not every desired member exists and is ready
    Unclustered,
    /// Every member is ready and the join has not run
    ReadyToJoin,
    /// Join requests were issued but the flag could not be persisted
    Joining,
    /// The join sequence has run for this resource
    Initialized,
}

impl std::fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Unclustered => "Unclustered",
            Self::ReadyToJoin => "ReadyToJoin",
            Self::Joining => "Joining",
            Self::Initialized => "Initialized",
        };
        f.write_str(s)
    }
}

/// Decide whether `members` are ready to be joined into a cluster of
/// `desired` nodes.
///
/// Surplus members count as a mismatch just like missing ones.
pub fn assess_members(desired: u32, members: &[MemberPod]) -> BootstrapPhase {
    if members.len() != desired as usize {
        return BootstrapPhase::Unclustered;
    }
    if members.iter().all(MemberPod::is_ready) {
        BootstrapPhase::ReadyToJoin
    } else {
        BootstrapPhase::Unclustered
    }
}

/// Log a member pod appearing
pub fn on_pod_added(pod: &MemberPod) {
    debug!(pod = %pod.name, cluster = %pod.cluster, phase = %pod.phase, "member pod added");
}

/// Log a member pod going away
pub fn on_pod_deleted(pod: &MemberPod) {
    debug!(pod = %pod.name, cluster = %pod.cluster, "member pod deleted");
}

/// Handle a change to a member pod by trying to bootstrap its cluster.
///
/// Every gate that does not pass ends the attempt silently; a later pod
/// event retries it. Returns the phase the attempt ended in.
#[instrument(skip(pod, ctx), fields(pod = %pod.name, cluster = %pod.cluster))]
pub async fn on_pod_updated(pod: &MemberPod, ctx: &Context) -> BootstrapPhase {
    let namespace = pod.namespace.as_str();

    let cluster = match ctx.clusters.get(namespace, &pod.cluster).await {
        Ok(Some(cluster)) => cluster,
        Ok(None) => return BootstrapPhase::Unknown,
        Err(e) => {
            warn!(error = %e, "could not read owning couchdb resource");
            return BootstrapPhase::Unknown;
        }
    };

    let state = RuntimeState::of(&cluster);
    if state.initialized {
        debug!(message = %state.message, "cluster already initialized");
        return BootstrapPhase::Initialized;
    }

    let members: Vec<MemberPod> = match ctx.pods.list_members(namespace, &pod.cluster).await {
        Ok(pods) => pods.iter().filter_map(MemberPod::from_pod).collect(),
        Err(e) => {
            warn!(error = %e, "could not list member pods");
            return BootstrapPhase::Unclustered;
        }
    };

    let phase = assess_members(cluster.spec.size, &members);
    if phase != BootstrapPhase::ReadyToJoin {
        debug!(
            members = members.len(),
            ready = members.iter().filter(|m| m.is_ready()).count(),
            desired = cluster.spec.size,
            "cluster not ready to join"
        );
        return phase;
    }

    join_members(&cluster, namespace, &members, ctx).await
}

/// Join every member but the first to the first, then persist the flag.
///
/// Individual join failures are logged and do not stop the remaining joins
/// or the flag write. Failing to resolve credentials aborts before any join
/// so the next pod event can retry.
async fn join_members(
    cluster: &CouchDB,
    namespace: &str,
    members: &[MemberPod],
    ctx: &Context,
) -> BootstrapPhase {
    let name = cluster.name_any();
    let Some((seed, joiners)) = members.split_first() else {
        return BootstrapPhase::Unclustered;
    };

    let env = cluster.spec.pod_policy().couchdb_env;
    let credentials = match resolve_admin_credentials(&env, namespace, ctx.secrets.as_ref()).await
    {
        Ok(credentials) => credentials,
        Err(e) => {
            warn!(error = %e, "could not resolve admin credentials, not joining");
            return BootstrapPhase::ReadyToJoin;
        }
    };

    info!(seed = %seed.name, joiners = joiners.len(), "joining members to seed");

    let mut joined = 0;
    for member in joiners {
        let (Some(seed_address), Some(address)) = (&seed.address, &member.address) else {
            warn!(seed = %seed.name, member = %member.name, "member has no pod address, skipping join");
            continue;
        };
        let request = AddNodeRequest::new(address.as_str(), CLIENT_PORT, &credentials);
        match ctx.admin.add_node(seed_address, &credentials, &request).await {
            Ok(()) => {
                info!(member = %member.name, %address, "member joined");
                joined += 1;
            }
            Err(e) => warn!(member = %member.name, %address, error = %e, "join failed"),
        }
    }

    if let Err(e) = ctx.clusters.set_initialized(namespace, &name, true).await {
        warn!(error = %e, "failed to persist bootstrap flag");
        return BootstrapPhase::Joining;
    }

    let message = format!(
        "joined {} of {} members to seed {}",
        joined,
        joiners.len(),
        seed.name
    );
    if let Err(e) = ctx
        .clusters
        .patch_status(namespace, &name, &CouchDbStatus::processed(message))
        .await
    {
        warn!(error = %e, "failed to update cluster status");
    }

    BootstrapPhase::Initialized
}
