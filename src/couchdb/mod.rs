//! CouchDB administrative API client
//!
//! Only the one call the operator needs is modelled: asking a seed node to
//! add another node to its cluster via `POST /_cluster_setup`.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::credentials::AdminCredentials;
use crate::Error;

/// Path of the cluster setup endpoint
pub const CLUSTER_SETUP_PATH: &str = "/_cluster_setup";

/// Default timeout for a single admin request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of an `add_node` cluster setup request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddNodeRequest {
    /// Always `add_node`
    pub action: String,
    /// Address of the node joining the cluster
    pub host: String,
    /// Client API port of the joining node
    pub port: u16,
    /// Admin username on the joining node
    pub username: String,
    /// Admin password on the joining node
    pub password: String,
}

impl AddNodeRequest {
    /// Request to add `host:port` using `credentials`
    pub fn new(host: impl Into<String>, port: u16, credentials: &AdminCredentials) -> Self {
        Self {
            action: "add_node".to_string(),
            host: host.into(),
            port,
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        }
    }
}

/// Error body returned by CouchDB for non-success responses
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    reason: String,
}

/// Administrative operations against a CouchDB node
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CouchDbAdmin: Send + Sync {
    /// Ask the node at `seed` (host or IP) to add `node` to its cluster,
    /// authenticating with `credentials`.
    async fn add_node(
        &self,
        seed: &str,
        credentials: &AdminCredentials,
        node: &AddNodeRequest,
    ) -> Result<(), Error>;
}

/// [`CouchDbAdmin`] over plain HTTP
pub struct HttpCouchDbAdmin {
    http: reqwest::Client,
    port: u16,
}

impl HttpCouchDbAdmin {
    /// Client talking to the standard client API port
    pub fn new() -> Result<Self, Error> {
        Self::with_port(crate::CLIENT_PORT, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Client talking to `port` on every seed
    pub fn with_port(port: u16, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, port })
    }

    /// Cluster setup URL on `seed`, which may be a host name or an IPv4 or
    /// IPv6 address
    fn setup_url(&self, seed: &str) -> Result<reqwest::Url, Error> {
        let host = match seed.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{ip}]"),
            _ => seed.to_string(),
        };
        reqwest::Url::parse(&format!("http://{}:{}{}", host, self.port, CLUSTER_SETUP_PATH))
            .map_err(|e| Error::validation(format!("invalid seed address {seed}: {e}")))
    }
}

#[async_trait]
impl CouchDbAdmin for HttpCouchDbAdmin {
    async fn add_node(
        &self,
        seed: &str,
        credentials: &AdminCredentials,
        node: &AddNodeRequest,
    ) -> Result<(), Error> {
        let response = self
            .http
            .post(self.setup_url(seed)?)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .json(node)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        debug!(%seed, host = %node.host, response = %body, "add_node accepted");
        Ok(())
    }
}

fn api_error(status: reqwest::StatusCode, body: &str) -> Error {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(e) => Error::CouchDb {
            status: status.as_u16(),
            error: e.error,
            reason: e.reason,
        },
        Err(_) => Error::CouchDb {
            status: status.as_u16(),
            error: status
                .canonical_reason()
                .unwrap_or("unknown")
                .to_lowercase()
                .replace(' ', "_"),
            reason: body.trim().to_string(),
        },
    }
}
