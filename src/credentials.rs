//! Admin credential resolution
//!
//! The admin username and password used to join a cluster are declared the
//! same way as any other container environment variable: inline, or by
//! reference to a Secret or ConfigMap key in the cluster's namespace.
//! Resolution happens on every bootstrap attempt and nothing is cached.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{EnvVar, KeySelector};
use crate::{Error, ADMIN_PASSWORD_ENV, ADMIN_USER_ENV, DEFAULT_ADMIN_PASSWORD, DEFAULT_ADMIN_USER};

/// Resolved CouchDB admin credentials
#[derive(Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    /// Admin username
    pub username: String,
    /// Admin password
    pub password: String,
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Default for AdminCredentials {
    fn default() -> Self {
        Self {
            username: DEFAULT_ADMIN_USER.to_string(),
            password: DEFAULT_ADMIN_PASSWORD.to_string(),
        }
    }
}

/// Point reads against Secrets and ConfigMaps
///
/// `Ok(None)` means the object or the key does not exist; `Err` is reserved
/// for failures to reach the API.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read `key` from Secret `name`, decoded as UTF-8
    async fn secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, Error>;

    /// Read `key` from ConfigMap `name`
    async fn config_map_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, Error>;
}

/// [`KeyValueStore`] backed by the Kubernetes API
pub struct KubeKeyValueStore {
    client: Client,
}

impl KubeKeyValueStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeyValueStore for KubeKeyValueStore {
    async fn secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = api.get_opt(name).await? else {
            return Ok(None);
        };

        if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
            let value = String::from_utf8(bytes.0.clone()).map_err(|e| {
                Error::serialization(format!(
                    "secret {namespace}/{name} key {key} is not valid UTF-8: {e}"
                ))
            })?;
            return Ok(Some(value));
        }

        Ok(secret.string_data.and_then(|mut d| d.remove(key)))
    }

    async fn config_map_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = api.get_opt(name).await?;
        Ok(config_map.and_then(|cm| cm.data).and_then(|mut d| d.remove(key)))
    }
}

/// Resolve admin credentials from ordered env declarations
///
/// For each of `COUCHDB_USER` and `COUCHDB_PASSWORD` the first declaration
/// wins. An inline value is used as is; otherwise the Secret or ConfigMap
/// reference is dereferenced in `namespace`. A variable that is not declared,
/// or declared with neither a value nor a reference, falls back to the
/// built-in default, matching what the member pod template injects. Any
/// failed dereference aborts the whole resolution, optional references
/// included, so a partial pair is never returned.
pub async fn resolve_admin_credentials(
    env: &[EnvVar],
    namespace: &str,
    store: &dyn KeyValueStore,
) -> Result<AdminCredentials, Error> {
    let username = resolve_variable(env, ADMIN_USER_ENV, namespace, store)
        .await?
        .unwrap_or_else(|| DEFAULT_ADMIN_USER.to_string());
    let password = resolve_variable(env, ADMIN_PASSWORD_ENV, namespace, store)
        .await?
        .unwrap_or_else(|| DEFAULT_ADMIN_PASSWORD.to_string());

    Ok(AdminCredentials { username, password })
}

async fn resolve_variable(
    env: &[EnvVar],
    variable: &str,
    namespace: &str,
    store: &dyn KeyValueStore,
) -> Result<Option<String>, Error> {
    let Some(decl) = env.iter().find(|e| e.name == variable) else {
        return Ok(None);
    };

    if !decl.has_source() {
        return Ok(None);
    }
    if let Some(value) = &decl.value {
        return Ok(Some(value.clone()));
    }
    let Some(source) = &decl.value_from else {
        return Ok(None);
    };

    if let Some(selector) = &source.secret_key_ref {
        let value = store
            .secret_value(namespace, &selector.name, &selector.key)
            .await
            .map_err(|e| Error::credentials(variable, describe("secret", selector), e.to_string()))?;
        return dereferenced(variable, "secret", selector, value);
    }

    if let Some(selector) = &source.config_map_key_ref {
        let value = store
            .config_map_value(namespace, &selector.name, &selector.key)
            .await
            .map_err(|e| {
                Error::credentials(variable, describe("configmap", selector), e.to_string())
            })?;
        return dereferenced(variable, "configmap", selector, value);
    }

    Ok(None)
}

fn dereferenced(
    variable: &str,
    kind: &str,
    selector: &KeySelector,
    value: Option<String>,
) -> Result<Option<String>, Error> {
    // A missing optional target leaves the container without the variable,
    // so there is no password the join could use either.
    let reason = if selector.is_optional() {
        "optional reference missing, container has no value"
    } else {
        "object or key not found"
    };
    match value {
        Some(v) => Ok(Some(v)),
        None => {
            debug!(%variable, reference = %describe(kind, selector), reason, "reference not resolved");
            Err(Error::credentials(variable, describe(kind, selector), reason))
        }
    }
}

fn describe(kind: &str, selector: &KeySelector) -> String {
    format!("{kind} {}/{}", selector.name, selector.key)
}
