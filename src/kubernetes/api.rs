// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The object-store boundary the reconcile engine talks to.

use crate::error::ClusterError;
use crate::manifest::KindKey;
use async_trait::async_trait;
use futures::stream::BoxStream;
use kube::core::{ApiResource, DynamicObject};

/// A kind resolved against the cluster's discovery information
#[derive(Clone, Debug)]
pub struct ResolvedKind {
    pub resource: ApiResource,
    pub namespaced: bool,
}

impl ResolvedKind {
    pub fn new(resource: ApiResource, namespaced: bool) -> Self {
        Self {
            resource,
            namespaced,
        }
    }

    pub fn key(&self) -> KindKey {
        KindKey::new(
            &self.resource.group,
            &self.resource.version,
            &self.resource.kind,
        )
    }
}

#[derive(Clone, Debug)]
pub enum WatchEvent {
    Applied(DynamicObject),
    Deleted(DynamicObject),
}

impl WatchEvent {
    pub fn object(&self) -> &DynamicObject {
        match self {
            WatchEvent::Applied(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

/// Generic get/list/apply/delete/watch over any group-version-kind,
/// plus a status update that never touches the main resource.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn resolve(&self, kind: &KindKey) -> Result<ResolvedKind, ClusterError>;

    async fn get(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError>;

    /// List objects matching a label selector; `namespace = None` lists across all namespaces
    async fn list(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError>;

    /// Server-side apply `obj` under the operator's field manager, creating it
    /// when absent. Fields the manager applied before and `obj` no longer sets
    /// are removed. With `dry_run` the server returns the would-be result
    /// without persisting it.
    async fn apply(
        &self,
        kind: &ResolvedKind,
        obj: &DynamicObject,
        dry_run: bool,
    ) -> Result<DynamicObject, ClusterError>;

    /// Delete an object. Deleting an object that is already gone succeeds.
    async fn delete(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError>;

    async fn update_status(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<(), ClusterError>;

    fn watch(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        selector: &str,
    ) -> BoxStream<'static, Result<WatchEvent, ClusterError>>;
}
