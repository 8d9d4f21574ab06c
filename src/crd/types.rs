//! Supporting types for the CouchDB CRD

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pod placement and configuration policy for member pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodPolicy {
    /// Labels attached to every member pod. `app` and `cluster` are reserved
    /// and cannot be overridden.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Node labels a node must carry for a member pod to be scheduled on it
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Keep members of the same cluster off the same node
    #[serde(default)]
    pub anti_affinity: bool,

    /// Environment variables for the CouchDB container, in order.
    /// `COUCHDB_USER` and `COUCHDB_PASSWORD` double as the admin credentials
    /// used to join the cluster.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub couchdb_env: Vec<EnvVar>,
}

/// Environment variable declaration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,

    /// Inline value; takes precedence over `valueFrom`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// External source for the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    /// Inline `name=value` declaration
    pub fn inline(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    /// Declaration whose value lives in a Secret key
    pub fn from_secret(
        name: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(KeySelector::new(secret, key)),
                config_map_key_ref: None,
            }),
        }
    }

    /// Returns true if the declaration has an inline value or a Secret or
    /// ConfigMap reference
    pub fn has_source(&self) -> bool {
        self.value.is_some()
            || self
                .value_from
                .as_ref()
                .is_some_and(|s| s.secret_key_ref.is_some() || s.config_map_key_ref.is_some())
    }

    /// Declaration whose value lives in a ConfigMap key
    pub fn from_config_map(
        name: impl Into<String>,
        config_map: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: None,
                config_map_key_ref: Some(KeySelector::new(config_map, key)),
            }),
        }
    }
}

/// Where an environment variable's value comes from
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    /// Key of a Secret in the cluster's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeySelector>,

    /// Key of a ConfigMap in the cluster's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeySelector>,
}

/// Selects a key of a Secret or ConfigMap
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct KeySelector {
    /// Object name
    pub name: String,

    /// Key within the object's data
    pub key: String,

    /// Let the pod start without the variable when the object or key is
    /// missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl KeySelector {
    /// Required selector for `name`/`key`
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            optional: None,
        }
    }

    /// Returns true if a missing target should be tolerated
    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(false)
    }
}

/// Processing state reported in the resource status
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum CouchDbState {
    /// Not yet handled by the operator
    #[default]
    None,
    /// Member pods were requested for the cluster
    Processed,
}

impl std::fmt::Display for CouchDbState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Processed => write!(f, "Processed"),
        }
    }
}
