// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster client creation and the kube-backed [`ClusterApi`].

use crate::config::Config;
use crate::constants::OPERATOR_NAME;
use crate::error::ClusterError;
use crate::kubernetes::api::{ClusterApi, ResolvedKind, WatchEvent};
use crate::manifest::KindKey;
use anyhow::Context;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::core::DynamicObject;
use kube::config::KubeConfigOptions;
use kube::discovery::{self, Scope};
use kube_runtime::{watcher, WatchStreamExt};
use kube::{Client, Config as KConfig, ResourceExt};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

/// Create a client for the target cluster, optionally from a named kubeconfig context
pub async fn create_client(config: &Config) -> anyhow::Result<Client> {
    let client_config = match &config.kube_context {
        Some(context) => {
            info!("Using kubeconfig context '{}'", context);
            let options = KubeConfigOptions {
                context: Some(context.clone()),
                ..Default::default()
            };
            KConfig::from_kubeconfig(&options)
                .await
                .with_context(|| format!("Failed to load kubeconfig context '{}'", context))?
        }
        None => KConfig::infer()
            .await
            .context("Failed to infer cluster configuration")?,
    };

    Client::try_from(client_config).context("Failed to create client")
}

/// [`ClusterApi`] on top of a kube [`Client`] with dynamic objects.
pub struct KubeClusterApi {
    client: Client,
    resolved: Mutex<HashMap<KindKey, ResolvedKind>>,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    fn api(&self, kind: &ResolvedKind, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if kind.namespaced => {
                Api::namespaced_with(self.client.clone(), ns, &kind.resource)
            }
            _ => Api::all_with(self.client.clone(), &kind.resource),
        }
    }

    fn cached(&self, kind: &KindKey) -> Option<ResolvedKind> {
        self.resolved
            .lock()
            .ok()
            .and_then(|cache| cache.get(kind).cloned())
    }
}

fn apply_params(dry_run: bool) -> PatchParams {
    let params = PatchParams::apply(OPERATOR_NAME).force();
    if dry_run {
        params.dry_run()
    } else {
        params
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    #[instrument(skip(self), fields(kind = %kind))]
    async fn resolve(&self, kind: &KindKey) -> Result<ResolvedKind, ClusterError> {
        if let Some(resolved) = self.cached(kind) {
            return Ok(resolved);
        }

        let (resource, caps) = discovery::pinned_kind(&self.client, &kind.gvk()).await?;
        let resolved = ResolvedKind::new(resource, matches!(caps.scope, Scope::Namespaced));
        debug!(
            "Resolved {} to resource '{}' (namespaced: {})",
            kind, resolved.resource.plural, resolved.namespaced
        );

        if let Ok(mut cache) = self.resolved.lock() {
            cache.insert(kind.clone(), resolved.clone());
        }
        Ok(resolved)
    }

    async fn get(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        Ok(self.api(kind, namespace).get_opt(name).await?)
    }

    async fn list(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let lp = ListParams::default().labels(selector);
        Ok(self.api(kind, namespace).list(&lp).await?.items)
    }

    #[instrument(skip_all, fields(object = %obj.name_any(), dry_run = dry_run))]
    async fn apply(
        &self,
        kind: &ResolvedKind,
        obj: &DynamicObject,
        dry_run: bool,
    ) -> Result<DynamicObject, ClusterError> {
        Ok(self
            .api(kind, obj.namespace().as_deref())
            .patch(&obj.name_any(), &apply_params(dry_run), &Patch::Apply(obj))
            .await?)
    }

    async fn delete(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError> {
        match self
            .api(kind, namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match ClusterError::from(e) {
                ClusterError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn update_status(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<(), ClusterError> {
        let patch = serde_json::json!({ "status": status });
        self.api(kind, namespace)
            .patch_status(
                name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    fn watch(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        selector: &str,
    ) -> BoxStream<'static, Result<WatchEvent, ClusterError>> {
        let config = watcher::Config::default().labels(selector);
        watcher(self.api(kind, namespace), config)
            .default_backoff()
            .filter_map(|event| async move {
                match event {
                    Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                        Some(Ok(WatchEvent::Applied(obj)))
                    }
                    Ok(watcher::Event::Delete(obj)) => Some(Ok(WatchEvent::Deleted(obj))),
                    Ok(_) => None,
                    Err(e) => Some(Err(ClusterError::Unavailable(e.to_string()))),
                }
            })
            .boxed()
    }
}
