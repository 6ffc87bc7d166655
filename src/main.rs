// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use addon_operator::config::Config;
use addon_operator::kubernetes::{create_client, wait_for_crd, ClusterApi, KubeClusterApi};
use addon_operator::manifest::{DirectoryManifestSource, ManifestSource};
use addon_operator::reconcilers::AddonReconciler;
use addon_operator::types::{ArgoCD, ConfigSync};

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG wins over LOG_LEVEL
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into())))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting addon operator");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: instance={}, manifests={}, workers={}",
        config.engine_instance,
        config.manifest_dir.display(),
        config.workers
    );

    let client = create_client(&config).await?;
    info!("Connected to Kubernetes cluster");

    info!("Waiting for addon CRDs to become available...");
    wait_for_crd::<ArgoCD>(&client).await;
    wait_for_crd::<ConfigSync>(&client).await;

    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeClusterApi::new(client.clone()));
    let manifests: Arc<dyn ManifestSource> =
        Arc::new(DirectoryManifestSource::new(config.manifest_dir.clone()));

    // ArgoCD children are forced into one namespace, ConfigSync keeps the manifests' namespaces
    let argocd = AddonReconciler::<ArgoCD>::new(
        client.clone(),
        cluster.clone(),
        manifests.clone(),
        &config,
        Some(config.argocd_namespace.clone()),
    );
    let configsync =
        AddonReconciler::<ConfigSync>::new(client, cluster, manifests, &config, None);

    info!("Starting reconcilers...");
    tokio::try_join!(argocd.run(), configsync.run())?;

    info!("All reconcilers stopped");
    Ok(())
}
