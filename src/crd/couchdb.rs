//! CouchDB Custom Resource Definition
//!
//! A `CouchDB` resource describes the desired shape of one database cluster:
//! which image to run, how many members it has and how their pods are placed.
//! Whether the cluster has already been joined is tracked separately as an
//! annotation, see [`RuntimeState`].

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CouchDbState, PodPolicy};

/// Specification for a CouchDB cluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "stable.couchdb.org",
    version = "v1",
    kind = "CouchDB",
    plural = "couchdbs",
    shortname = "cdb",
    status = "CouchDbStatus",
    namespaced,
    printcolumn = r#"{"name":"Size","type":"integer","jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Initialized","type":"string","jsonPath":".metadata.annotations.couchdb\\.org/initialized"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CouchDbSpec {
    /// CouchDB version, used as the image tag
    #[serde(default = "default_version")]
    pub version: String,

    /// Image repository without tag
    #[serde(default = "default_base_image")]
    pub base_image: String,

    /// Desired number of member pods
    #[serde(default)]
    pub size: u32,

    /// Pod policy applied to every member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodPolicy>,
}

fn default_version() -> String {
    crate::DEFAULT_COUCHDB_VERSION.to_string()
}

fn default_base_image() -> String {
    crate::DEFAULT_BASE_IMAGE.to_string()
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    let value = value.trim();
    if value.is_empty() {
        default
    } else {
        value
    }
}

impl CouchDbSpec {
    /// Full image reference `<baseImage>:<version>`
    ///
    /// A blank `baseImage` or `version` takes the default, like an absent one.
    pub fn image(&self) -> String {
        format!(
            "{}:{}",
            or_default(&self.base_image, crate::DEFAULT_BASE_IMAGE),
            or_default(&self.version, crate::DEFAULT_COUCHDB_VERSION)
        )
    }

    /// Pod policy, or the empty policy when none is set
    pub fn pod_policy(&self) -> PodPolicy {
        self.pod.clone().unwrap_or_default()
    }
}

/// Status for a CouchDB cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CouchDbStatus {
    /// Whether the operator has handled the resource
    #[serde(default)]
    pub state: CouchDbState,

    /// Human-readable message about the last action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CouchDbStatus {
    /// Status in the `Processed` state with a message
    pub fn processed(message: impl Into<String>) -> Self {
        Self {
            state: CouchDbState::Processed,
            message: Some(message.into()),
        }
    }
}

/// Bootstrap bookkeeping persisted on the resource
///
/// The flag lives in the [`crate::INITIALIZED_ANNOTATION`] annotation as the
/// literal strings `"true"` or `"false"`; anything else reads as false.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeState {
    /// The cluster join sequence has run
    pub initialized: bool,
    /// Last status message
    pub message: String,
}

impl RuntimeState {
    /// Read the runtime state of a resource
    pub fn of(cluster: &CouchDB) -> Self {
        Self {
            initialized: is_initialized(cluster.annotations()),
            message: cluster
                .status
                .as_ref()
                .and_then(|s| s.message.clone())
                .unwrap_or_default(),
        }
    }
}

fn is_initialized(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .get(crate::INITIALIZED_ANNOTATION)
        .is_some_and(|v| v == "true")
}

/// Annotation value for the bootstrap flag
pub fn initialized_value(initialized: bool) -> &'static str {
    if initialized {
        "true"
    } else {
        "false"
    }
}
