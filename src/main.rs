//! CouchDB Operator - provisions and bootstraps multi-node CouchDB clusters

use std::sync::Arc;

use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, CustomResourceExt};

use couchdb_operator::config::OperatorConfig;
use couchdb_operator::controller::Context;
use couchdb_operator::crd::{crd_yaml, CouchDB, CRD_NAME};
use couchdb_operator::dispatch::{run_cluster_loop, run_pod_loop};
use couchdb_operator::probe::{self, ReadinessFlag};
use couchdb_operator::telemetry::init_tracing;
use couchdb_operator::FIELD_MANAGER;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();

    if config.crd {
        println!("{}", crd_yaml()?);
        return Ok(());
    }

    init_tracing(config.log_format())?;

    let identity = config.identity()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = %identity.namespace,
        pod = %identity.pod_name,
        "starting couchdb operator"
    );

    let client = build_client(&config).await?;

    if let Err(e) = ensure_crd_installed(&client).await {
        tracing::warn!(error = %e, "could not install CouchDB CRD, assuming it exists");
    }

    let ctx = Arc::new(Context::new(client.clone())?);

    let ready = ReadinessFlag::new();
    let health = tokio::spawn(probe::serve(config.listen_addr, ready.clone()));

    let clusters = tokio::spawn(run_cluster_loop(client.clone(), ctx.clone()));
    let pods = tokio::spawn(run_pod_loop(client, ctx));
    ready.set_ready();
    tracing::info!("controllers started");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
        }
        result = clusters => {
            tracing::error!(?result, "couchdb resource loop exited");
        }
        result = pods => {
            tracing::error!(?result, "member pod loop exited");
        }
    }

    health.abort();
    Ok(())
}

/// Build a client from `--kubeconfig` when given, otherwise from the
/// in-cluster or default configuration
async fn build_client(config: &OperatorConfig) -> anyhow::Result<Client> {
    let kube_config = match &config.kubeconfig {
        Some(path) => {
            tracing::info!(path = %path.display(), "using kubeconfig file");
            let kubeconfig = Kubeconfig::read_from(path)?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => kube::Config::infer().await?,
    };
    Ok(Client::try_from(kube_config)?)
}

/// Install or update the CouchDB CRD with server-side apply
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!(crd = CRD_NAME, "installing CRD");
    crds.patch(CRD_NAME, &params, &Patch::Apply(&CouchDB::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {}: {}", CRD_NAME, e))?;
    Ok(())
}
