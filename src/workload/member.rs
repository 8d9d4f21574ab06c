//! Member pod view
//!
//! The operator only cares about a handful of fields of a member pod; this
//! module extracts them from the full Kubernetes object.

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::{APP_NAME, LABEL_APP, LABEL_CLUSTER};

/// Pod lifecycle phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PodPhase {
    /// Accepted but not all containers are running yet
    Pending,
    /// Bound to a node and all containers started
    Running,
    /// All containers exited successfully
    Succeeded,
    /// All containers exited and at least one failed
    Failed,
    /// Phase could not be determined
    #[default]
    Unknown,
}

impl PodPhase {
    fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// What the operator knows about one member pod
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemberPod {
    /// Pod UID
    pub uid: String,
    /// Pod name
    pub name: String,
    /// Pod namespace
    pub namespace: String,
    /// Owning cluster, from the `cluster` label
    pub cluster: String,
    /// Lifecycle phase
    pub phase: PodPhase,
    /// One flag per container status: ready and running
    pub container_ready: Vec<bool>,
    /// Pod IP, once assigned
    pub address: Option<String>,
}

impl MemberPod {
    /// Extract the member view of `pod`.
    ///
    /// Returns `None` unless the pod carries `app=couchdb` and a `cluster`
    /// label; such pods are not members of any cluster this operator manages.
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let labels = pod.labels();
        if labels.get(LABEL_APP).map(String::as_str) != Some(APP_NAME) {
            return None;
        }
        let cluster = labels.get(LABEL_CLUSTER)?.clone();

        let status = pod.status.as_ref();
        let container_ready = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| {
                statuses
                    .iter()
                    .map(|cs| {
                        cs.ready && cs.state.as_ref().is_some_and(|st| st.running.is_some())
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            uid: pod.uid().unwrap_or_default(),
            name: pod.name_any(),
            namespace: pod.namespace().unwrap_or_default(),
            cluster,
            phase: PodPhase::parse(status.and_then(|s| s.phase.as_deref())),
            container_ready,
            address: status
                .and_then(|s| s.pod_ip.clone())
                .filter(|ip| !ip.is_empty()),
        })
    }

    /// Running with every container ready
    pub fn is_ready(&self) -> bool {
        self.phase == PodPhase::Running && self.container_ready.iter().all(|ready| *ready)
    }
}
