// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Converges the cluster towards a transformed object set and prunes owned
//! objects that are no longer desired.
//!
//! Objects are written with server-side apply under the operator's field
//! manager, so fields dropped from a manifest are dropped from the cluster too.

use crate::constants::FOUNDATIONAL_KINDS;
use crate::error::ClusterError;
use crate::kubernetes::{ClusterApi, ResolvedKind};
use crate::manifest::{KindKey, ObjectKey, ObjectSet};
use crate::ownership::Ownership;
use futures::{stream, StreamExt};
use kube::core::DynamicObject;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyFailure {
    pub object: String,
    pub error: ClusterError,
}

impl std::fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.object, self.error)
    }
}

/// What one apply pass did
#[derive(Clone, Debug, Default)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: Vec<ApplyFailure>,
    pub pruned: usize,
    pub prune_failed: Vec<ApplyFailure>,
    /// Resolved kinds of the desired set, in first-seen order
    pub kinds: Vec<ResolvedKind>,
}

impl ApplyReport {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.failed.len()
    }

    fn record(&mut self, result: Result<Outcome, ApplyFailure>) {
        match result {
            Ok(Outcome::Created) => self.created += 1,
            Ok(Outcome::Updated) => self.updated += 1,
            Ok(Outcome::Unchanged) => self.unchanged += 1,
            Err(failure) => self.failed.push(failure),
        }
    }
}

pub struct Applier {
    cluster: Arc<dyn ClusterApi>,
    concurrency: usize,
    prune: bool,
}

impl Applier {
    pub fn new(cluster: Arc<dyn ClusterApi>, concurrency: usize, prune: bool) -> Self {
        Self {
            cluster,
            concurrency: concurrency.max(1),
            prune,
        }
    }

    /// Apply every object, then prune owned objects of `objects`' kinds and of
    /// `watched` kinds that are not in `objects`.
    ///
    /// Per-object failures are collected in the report. A connectivity failure
    /// aborts the pass with an error.
    #[instrument(skip_all, fields(source = %ownership.source_name(), objects = objects.len()))]
    pub async fn apply(
        &self,
        objects: &ObjectSet,
        ownership: &Ownership,
        watched: &[ResolvedKind],
    ) -> Result<ApplyReport, ClusterError> {
        let mut report = ApplyReport::default();
        let (foundational, rest): (Vec<_>, Vec<_>) = objects.iter().partition(|o| {
            o.types
                .as_ref()
                .is_some_and(|t| FOUNDATIONAL_KINDS.contains(&t.kind.as_str()))
        });

        for obj in foundational {
            let result = self.apply_one(obj).await;
            abort_on_connectivity(&result)?;
            report.record(result);
        }

        let pending: Vec<_> = rest.into_iter().map(|obj| self.apply_one(obj)).collect();
        let results: Vec<_> = stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        for result in results {
            abort_on_connectivity(&result)?;
            report.record(result);
        }

        report.kinds = self.resolve_kinds(objects).await?;

        if self.prune {
            let mut candidates: BTreeMap<KindKey, ResolvedKind> = BTreeMap::new();
            for kind in report.kinds.iter().chain(watched) {
                candidates.entry(kind.key()).or_insert_with(|| kind.clone());
            }
            let desired = objects.keys();
            for kind in candidates.values() {
                self.prune_kind(kind, &desired, ownership, &mut report)
                    .await?;
            }
        }

        info!(
            "Applied: {} created, {} updated, {} unchanged, {} failed, {} pruned",
            report.created,
            report.updated,
            report.unchanged,
            report.failed.len(),
            report.pruned
        );
        Ok(report)
    }

    async fn resolve_kinds(&self, objects: &ObjectSet) -> Result<Vec<ResolvedKind>, ClusterError> {
        let mut kinds = Vec::new();
        for key in objects.kinds() {
            match self.cluster.resolve(&key).await {
                Ok(kind) => kinds.push(kind),
                Err(e) if e.is_connectivity() => return Err(e),
                // already reported per object
                Err(e) => debug!("Kind {} is not served: {}", key, e),
            }
        }
        Ok(kinds)
    }

    #[instrument(skip_all, fields(object = %describe(obj)))]
    async fn apply_one(&self, obj: &DynamicObject) -> Result<Outcome, ApplyFailure> {
        let fail = |error: ClusterError| ApplyFailure {
            object: describe(obj),
            error,
        };

        let key = KindKey::of(obj).ok_or_else(|| fail(ClusterError::Invalid("missing kind".into())))?;
        let kind = self.cluster.resolve(&key).await.map_err(fail)?;

        let mut desired = obj.clone();
        if !kind.namespaced {
            desired.metadata.namespace = None;
        } else if desired.namespace().map_or(true, |ns| ns.is_empty()) {
            return Err(fail(ClusterError::Invalid(
                "namespaced object has no namespace".to_string(),
            )));
        }

        let name = desired.name_any();
        let live = self
            .cluster
            .get(&kind, desired.namespace().as_deref(), &name)
            .await
            .map_err(fail)?;

        let Some(live) = live else {
            self.cluster.apply(&kind, &desired, false).await.map_err(fail)?;
            debug!("Created");
            return Ok(Outcome::Created);
        };

        // the dry run carries server-side defaulting, so it only differs from
        // live when applying would change something
        let preview = self.cluster.apply(&kind, &desired, true).await.map_err(fail)?;
        if comparable(&preview).map_err(fail)? == comparable(&live).map_err(fail)? {
            return Ok(Outcome::Unchanged);
        }

        self.cluster.apply(&kind, &desired, false).await.map_err(fail)?;
        debug!("Updated");
        Ok(Outcome::Updated)
    }

    async fn prune_kind(
        &self,
        kind: &ResolvedKind,
        desired: &BTreeSet<ObjectKey>,
        ownership: &Ownership,
        report: &mut ApplyReport,
    ) -> Result<(), ClusterError> {
        let live = match self.cluster.list(kind, None, &ownership.selector()).await {
            Ok(live) => live,
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => {
                warn!("Failed to list {} for pruning: {}", kind.key(), e);
                report.prune_failed.push(ApplyFailure {
                    object: kind.key().to_string(),
                    error: e,
                });
                return Ok(());
            }
        };

        for obj in live {
            if obj.metadata.deletion_timestamp.is_some()
                || !ownership.is_marked(&obj)
                || is_desired(desired, kind, &obj)
            {
                continue;
            }

            let namespace = obj.namespace();
            match self
                .cluster
                .delete(kind, namespace.as_deref(), &obj.name_any())
                .await
            {
                Ok(()) => {
                    info!("Pruned {}", describe(&obj));
                    report.pruned += 1;
                }
                Err(e) if e.is_connectivity() => return Err(e),
                Err(e) => {
                    warn!("Failed to prune {}: {}", describe(&obj), e);
                    report.prune_failed.push(ApplyFailure {
                        object: describe(&obj),
                        error: e,
                    });
                }
            }
        }
        Ok(())
    }
}

fn abort_on_connectivity(result: &Result<Outcome, ApplyFailure>) -> Result<(), ClusterError> {
    match result {
        Err(failure) if failure.error.is_connectivity() => Err(failure.error.clone()),
        _ => Ok(()),
    }
}

/// Cluster-scoped desired objects may still carry a namespace from the manifest
fn is_desired(desired: &BTreeSet<ObjectKey>, kind: &ResolvedKind, live: &DynamicObject) -> bool {
    let Some(key) = ObjectKey::of(live) else {
        return false;
    };
    if kind.namespaced {
        desired.contains(&key)
    } else {
        desired
            .iter()
            .any(|d| d.kind == key.kind && d.name == key.name)
    }
}

/// The object without fields the server rewrites on every write
fn comparable(obj: &DynamicObject) -> Result<serde_json::Value, ClusterError> {
    let mut value = serde_json::to_value(obj).map_err(|e| ClusterError::Invalid(e.to_string()))?;
    if let Some(metadata) = value.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        metadata.remove("resourceVersion");
        metadata.remove("managedFields");
    }
    Ok(value)
}

fn describe(obj: &DynamicObject) -> String {
    match ObjectKey::of(obj) {
        Some(key) => key.to_string(),
        None => obj.name_any(),
    }
}
