//! Member pod template
//!
//! Pure data assembly: a [`MemberPodTemplate`] collects everything needed to
//! describe one CouchDB member and [`MemberPodTemplate::build`] turns it into
//! a Kubernetes `Pod`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapKeySelector, Container, ContainerPort, EnvVar as K8sEnvVar, EnvVarSource,
    ExecAction, HTTPGetAction, ObjectFieldSelector, Pod, PodAffinityTerm, PodAntiAffinity,
    PodSpec, Probe, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{CouchDB, EnvVar};
use crate::{
    ADMIN_PASSWORD_ENV, ADMIN_USER_ENV, APP_NAME, CLIENT_PORT, DEFAULT_ADMIN_PASSWORD,
    DEFAULT_ADMIN_USER, EPMD_PORT, INET_PORT, LABEL_APP, LABEL_CLUSTER, NODE_LOCAL_PORT,
};

/// Name of the CouchDB container inside every member pod
pub const CONTAINER_NAME: &str = "couchdb";

/// Env var carrying the pod's own IP, used by CouchDB as its node name
pub const NODENAME_ENV: &str = "NODENAME";

/// Name of the client API port, referenced by the readiness probe
pub const CLIENT_PORT_NAME: &str = "standalone";

const PROBE_INITIAL_DELAY_SECONDS: i32 = 20;
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// Everything needed to describe one member pod
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemberPodTemplate {
    /// Owning cluster name
    pub cluster: String,
    /// Namespace of the owning cluster
    pub namespace: String,
    /// Container image including tag
    pub image: String,
    /// User-supplied labels, merged under the reserved ones
    pub labels: BTreeMap<String, String>,
    /// Optional node selector
    pub node_selector: BTreeMap<String, String>,
    /// Require members of the same cluster on distinct nodes
    pub anti_affinity: bool,
    /// User env declarations, in order
    pub env: Vec<EnvVar>,
}

impl MemberPodTemplate {
    /// Template for a member of `cluster`
    pub fn for_cluster(cluster: &CouchDB) -> Self {
        let policy = cluster.spec.pod_policy();
        Self {
            cluster: cluster.name_any(),
            namespace: cluster.namespace().unwrap_or_default(),
            image: cluster.spec.image(),
            labels: policy.labels,
            node_selector: policy.node_selector,
            anti_affinity: policy.anti_affinity,
            env: policy.couchdb_env,
        }
    }

    /// Labels carried by the pod. `app` and `cluster` always win over
    /// user-supplied values.
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        labels.insert(LABEL_APP.to_string(), APP_NAME.to_string());
        labels.insert(LABEL_CLUSTER.to_string(), self.cluster.clone());
        labels
    }

    /// Build the pod under the given name
    pub fn build(&self, name: impl Into<String>) -> Pod {
        let node_selector = (!self.node_selector.is_empty()).then(|| self.node_selector.clone());

        Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels()),
                annotations: Some(BTreeMap::new()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Always".to_string()),
                dns_policy: Some("ClusterFirstWithHostNet".to_string()),
                subdomain: Some(self.cluster.clone()),
                containers: vec![self.container()],
                node_selector,
                affinity: self.anti_affinity.then(|| self.affinity()),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn container(&self) -> Container {
        Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(self.image.clone()),
            env: Some(self.container_env()),
            ports: Some(vec![
                port("node-local", NODE_LOCAL_PORT),
                port(CLIENT_PORT_NAME, CLIENT_PORT),
                port("epmd", EPMD_PORT),
                port("inet", INET_PORT),
            ]),
            liveness_probe: Some(Probe {
                initial_delay_seconds: Some(PROBE_INITIAL_DELAY_SECONDS),
                exec: Some(ExecAction {
                    command: Some(vec!["pidof".to_string(), "beam.smp".to_string()]),
                }),
                ..Default::default()
            }),
            readiness_probe: Some(Probe {
                initial_delay_seconds: Some(PROBE_INITIAL_DELAY_SECONDS),
                http_get: Some(HTTPGetAction {
                    path: Some("/".to_string()),
                    port: IntOrString::String(CLIENT_PORT_NAME.to_string()),
                    scheme: Some("HTTP".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Container environment: user declarations in order, admin defaults for
    /// whichever of the two credentials was not declared, then `NODENAME`.
    ///
    /// Only the first declaration of a name is kept. An admin credential
    /// declared with neither a value nor a reference gets its default, the
    /// same value the join requests authenticate with.
    fn container_env(&self) -> Vec<K8sEnvVar> {
        let mut env: Vec<K8sEnvVar> = Vec::with_capacity(self.env.len() + 3);
        for decl in self.env.iter().filter(|e| e.name != NODENAME_ENV) {
            if env.iter().any(|e| e.name == decl.name) {
                continue;
            }
            let entry = match admin_default(&decl.name) {
                Some(default) if !decl.has_source() => K8sEnvVar {
                    name: decl.name.clone(),
                    value: Some(default.to_string()),
                    value_from: None,
                },
                _ => to_k8s_env(decl),
            };
            env.push(entry);
        }

        for (name, default) in [
            (ADMIN_USER_ENV, DEFAULT_ADMIN_USER),
            (ADMIN_PASSWORD_ENV, DEFAULT_ADMIN_PASSWORD),
        ] {
            if !self.env.iter().any(|e| e.name == name) {
                env.push(K8sEnvVar {
                    name: name.to_string(),
                    value: Some(default.to_string()),
                    value_from: None,
                });
            }
        }

        env.push(K8sEnvVar {
            name: NODENAME_ENV.to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "status.podIP".to_string(),
                    api_version: None,
                }),
                ..Default::default()
            }),
        });

        env
    }

    fn affinity(&self) -> Affinity {
        Affinity {
            pod_anti_affinity: Some(PodAntiAffinity {
                required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                    label_selector: Some(LabelSelector {
                        match_labels: Some(BTreeMap::from([(
                            LABEL_CLUSTER.to_string(),
                            self.cluster.clone(),
                        )])),
                        ..Default::default()
                    }),
                    topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn port(name: &str, number: u16) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: i32::from(number),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn admin_default(name: &str) -> Option<&'static str> {
    match name {
        ADMIN_USER_ENV => Some(DEFAULT_ADMIN_USER),
        ADMIN_PASSWORD_ENV => Some(DEFAULT_ADMIN_PASSWORD),
        _ => None,
    }
}

fn to_k8s_env(decl: &EnvVar) -> K8sEnvVar {
    let value_from = decl.value_from.as_ref().map(|source| EnvVarSource {
        secret_key_ref: source.secret_key_ref.as_ref().map(|s| SecretKeySelector {
            name: s.name.clone(),
            key: s.key.clone(),
            optional: s.optional,
        }),
        config_map_key_ref: source.config_map_key_ref.as_ref().map(|s| ConfigMapKeySelector {
            name: s.name.clone(),
            key: s.key.clone(),
            optional: s.optional,
        }),
        ..Default::default()
    });

    K8sEnvVar {
        name: decl.name.clone(),
        value: decl.value.clone(),
        value_from: if decl.value.is_some() { None } else { value_from },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> MemberPodTemplate {
        MemberPodTemplate {
            cluster: "books".to_string(),
            namespace: "db".to_string(),
            image: "nicolai86/couchdb:2.1.0".to_string(),
            ..Default::default()
        }
    }

    fn env_names(pod: &Pod) -> Vec<String> {
        pod.spec.as_ref().unwrap().containers[0]
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    /// Story: user labels can never hijack pod ownership
    ///
    /// Every list and selector the operator issues depends on `app` and
    /// `cluster`, so a user-supplied value for either is ignored.
    #[test]
    fn story_reserved_labels_override_user_labels() {
        let mut t = template();
        t.labels = BTreeMap::from([
            ("app".to_string(), "postgres".to_string()),
            ("cluster".to_string(), "other".to_string()),
            ("team".to_string(), "storage".to_string()),
        ]);

        let labels = t.build("couchdb-1").metadata.labels.unwrap();
        assert_eq!(labels.get("app").map(String::as_str), Some("couchdb"));
        assert_eq!(labels.get("cluster").map(String::as_str), Some("books"));
        assert_eq!(labels.get("team").map(String::as_str), Some("storage"));
    }

    #[test]
    fn pod_runs_single_couchdb_container_with_fixed_ports() {
        let pod = template().build("couchdb-1");
        assert_eq!(pod.metadata.name.as_deref(), Some("couchdb-1"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("db"));

        let spec = pod.spec.unwrap();
        assert_eq!(spec.subdomain.as_deref(), Some("books"));
        assert_eq!(spec.restart_policy.as_deref(), Some("Always"));
        assert_eq!(spec.containers.len(), 1);

        let container = &spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("nicolai86/couchdb:2.1.0"));
        let mut ports: Vec<i32> = container
            .ports
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.container_port)
            .collect();
        ports.sort_unstable();
        assert_eq!(ports, vec![4369, 5984, 5986, 9100]);
    }

    #[test]
    fn probes_check_process_and_client_port() {
        let spec = template().build("couchdb-1").spec.unwrap();
        let container = &spec.containers[0];

        let liveness = container.liveness_probe.as_ref().unwrap();
        assert_eq!(
            liveness.exec.as_ref().unwrap().command.as_deref(),
            Some(&["pidof".to_string(), "beam.smp".to_string()][..])
        );

        let readiness = container.readiness_probe.as_ref().unwrap();
        assert_eq!(
            readiness.http_get.as_ref().unwrap().port,
            IntOrString::String("standalone".to_string())
        );
    }

    #[test]
    fn default_admin_env_is_injected_before_nodename() {
        let pod = template().build("couchdb-1");
        assert_eq!(
            env_names(&pod),
            vec!["COUCHDB_USER", "COUCHDB_PASSWORD", "NODENAME"]
        );

        let env = pod.spec.unwrap().containers[0].env.clone().unwrap();
        let nodename = env.last().unwrap();
        assert_eq!(
            nodename
                .value_from
                .as_ref()
                .and_then(|s| s.field_ref.as_ref())
                .map(|f| f.field_path.as_str()),
            Some("status.podIP")
        );
    }

    #[test]
    fn user_env_is_kept_in_order_and_nodename_is_reserved() {
        let mut t = template();
        t.env = vec![
            EnvVar::inline("ERL_FLAGS", "-setcookie monster"),
            EnvVar::from_secret(ADMIN_PASSWORD_ENV, "admin", "password"),
            EnvVar::inline(NODENAME_ENV, "spoofed"),
        ];

        let pod = t.build("couchdb-1");
        assert_eq!(
            env_names(&pod),
            vec!["ERL_FLAGS", "COUCHDB_PASSWORD", "COUCHDB_USER", "NODENAME"]
        );

        let env = pod.spec.unwrap().containers[0].env.clone().unwrap();
        let password = &env[1];
        assert!(password.value.is_none());
        let secret = password
            .value_from
            .as_ref()
            .and_then(|s| s.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(secret.name, "admin");
        assert_eq!(secret.key, "password");
    }

    /// Story: an admin credential declared without a value still matches
    /// what the join requests send
    ///
    /// Credential resolution falls back to the default for such a
    /// declaration, so the container has to carry that same default.
    #[test]
    fn story_empty_admin_declaration_gets_the_default_value() {
        let mut t = template();
        let mut password = EnvVar::inline(ADMIN_PASSWORD_ENV, "unused");
        password.value = None;
        t.env = vec![password, EnvVar::inline(ADMIN_PASSWORD_ENV, "later")];

        let pod = t.build("couchdb-1");
        assert_eq!(
            env_names(&pod),
            vec!["COUCHDB_PASSWORD", "COUCHDB_USER", "NODENAME"]
        );

        let env = pod.spec.unwrap().containers[0].env.clone().unwrap();
        assert_eq!(env[0].value.as_deref(), Some(DEFAULT_ADMIN_PASSWORD));
        assert!(env[0].value_from.is_none());
        assert_eq!(env[1].value.as_deref(), Some(DEFAULT_ADMIN_USER));
    }

    #[test]
    fn optional_reference_is_passed_through() {
        let mut t = template();
        let mut user = EnvVar::from_secret(ADMIN_USER_ENV, "admin", "user");
        if let Some(selector) = user
            .value_from
            .as_mut()
            .and_then(|s| s.secret_key_ref.as_mut())
        {
            selector.optional = Some(true);
        }
        t.env = vec![user];

        let env = t.build("couchdb-1").spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        let secret = env[0]
            .value_from
            .as_ref()
            .and_then(|s| s.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(secret.optional, Some(true));
    }

    #[test]
    fn no_scheduling_hints_by_default() {
        let spec = template().build("couchdb-1").spec.unwrap();
        assert!(spec.node_selector.is_none());
        assert!(spec.affinity.is_none());
    }

    #[test]
    fn anti_affinity_is_required_and_keyed_on_cluster_label() {
        let mut t = template();
        t.anti_affinity = true;
        t.node_selector = BTreeMap::from([("disk".to_string(), "ssd".to_string())]);

        let spec = t.build("couchdb-1").spec.unwrap();
        assert_eq!(
            spec.node_selector.unwrap().get("disk").map(String::as_str),
            Some("ssd")
        );

        let terms = spec
            .affinity
            .unwrap()
            .pod_anti_affinity
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].topology_key, "kubernetes.io/hostname");
        let match_labels = terms[0]
            .label_selector
            .as_ref()
            .unwrap()
            .match_labels
            .as_ref()
            .unwrap();
        assert_eq!(match_labels.get("cluster").map(String::as_str), Some("books"));
    }
}
