//! Process configuration
//!
//! Every setting can be given as a flag or through the environment, which is
//! how the operator's Deployment passes its own namespace and pod name via
//! the downward API.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::telemetry::LogFormat;
use crate::Error;

/// Default bind address of the health endpoint
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// CouchDB operator - provisions and bootstraps multi-node CouchDB clusters
#[derive(Parser, Debug, Clone)]
#[command(name = "couchdb-operator", version, about, long_about = None)]
pub struct OperatorConfig {
    /// Print the CouchDB CRD manifest and exit
    #[arg(long)]
    pub crd: bool,

    /// Namespace the operator itself runs in
    #[arg(long, env = "OPERATOR_NAMESPACE")]
    pub namespace: Option<String>,

    /// Name of the operator's own pod
    #[arg(long = "pod-name", env = "OPERATOR_NAME")]
    pub pod_name: Option<String>,

    /// Kubeconfig file; in-cluster or default config is used when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Bind address of the health endpoint
    #[arg(long = "listen-addr", env = "LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: SocketAddr,

    /// Log format
    #[arg(long = "log-format", env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Shorthand for `--log-format json`
    #[arg(long = "log-json")]
    pub log_json: bool,
}

/// Identity of the running operator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorIdentity {
    /// Namespace the operator runs in
    pub namespace: String,
    /// Operator pod name
    pub pod_name: String,
}

impl OperatorConfig {
    /// Effective log format
    pub fn log_format(&self) -> LogFormat {
        if self.log_json {
            LogFormat::Json
        } else {
            self.log_format
        }
    }

    /// The operator's own namespace and pod name
    ///
    /// Both are required to run the controllers; an empty value counts as
    /// missing.
    pub fn identity(&self) -> Result<OperatorIdentity, Error> {
        let namespace = required(&self.namespace, "OPERATOR_NAMESPACE")?;
        let pod_name = required(&self.pod_name, "OPERATOR_NAME")?;
        Ok(OperatorIdentity {
            namespace,
            pod_name,
        })
    }
}

fn required(value: &Option<String>, variable: &str) -> Result<String, Error> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(Error::config(format!("{variable} must be set"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> OperatorConfig {
        let argv = std::iter::once("couchdb-operator").chain(args.iter().copied());
        OperatorConfig::try_parse_from(argv).expect("arguments should parse")
    }

    #[test]
    fn defaults_apply_when_only_identity_is_given() {
        let config = parse(&["--namespace", "ops", "--pod-name", "couchdb-operator-0"]);

        assert!(!config.crd);
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR.parse().unwrap());
        assert_eq!(config.log_format(), LogFormat::Text);
        assert_eq!(
            config.identity().unwrap(),
            OperatorIdentity {
                namespace: "ops".to_string(),
                pod_name: "couchdb-operator-0".to_string(),
            }
        );
    }

    /// Story: an operator without its identity refuses to start
    #[test]
    fn story_missing_identity_is_a_config_error() {
        let config = parse(&["--namespace", "ops"]);
        let err = config.identity().expect_err("pod name is required");
        assert!(matches!(err, Error::Config(ref m) if m.contains("OPERATOR_NAME")));

        let config = parse(&["--namespace", "  ", "--pod-name", "op"]);
        let err = config.identity().expect_err("blank namespace is missing");
        assert!(matches!(err, Error::Config(ref m) if m.contains("OPERATOR_NAMESPACE")));
    }

    #[test]
    fn crd_flag_needs_no_identity() {
        let config = parse(&["--crd"]);
        assert!(config.crd);
    }

    #[test]
    fn log_json_overrides_log_format() {
        assert_eq!(parse(&["--log-json"]).log_format(), LogFormat::Json);
        assert_eq!(parse(&["--log-format", "json"]).log_format(), LogFormat::Json);
    }

    #[test]
    fn invalid_listen_addr_is_rejected() {
        let argv = ["couchdb-operator", "--listen-addr", "not-an-addr"];
        assert!(OperatorConfig::try_parse_from(argv).is_err());
    }
}
