// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Addon reconciler: drives render → transform → apply → status for every
//! source object of one addon kind.
//!
//! Scheduling is left to the kube-runtime controller: it keeps at most one
//! pass in flight per source, collapses triggers that arrive during a pass and
//! requeues every source after the resync interval. Child events reach it
//! through [`ChildWatches`] as extra reconcile triggers.

use crate::apply::{Applier, ApplyReport};
use crate::config::Config;
use crate::constants::labels;
use crate::error::{ReconcileError, Result};
use crate::kubernetes::{ClusterApi, ResolvedKind};
use crate::manifest::{ManifestSelector, ManifestSource, Renderer};
use crate::ownership::{source_label_key, Ownership};
use crate::status::{self, PassResult};
use crate::transform::{Pipeline, TransformContext};
use crate::types::{AddonObject, CommonStatus};
use crate::watch::{ChildMapper, ChildWatches};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::{Stream, StreamExt};
use kube::core::ApiResource;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::watcher::Config as WatcherConfig;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, field, info, instrument, warn, Span};

/// Label values are limited to 63 characters
const MAX_SOURCE_NAME: usize = 63;

/// Where a reconcile pass currently is, recorded as the `phase` field of the
/// pass span
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Rendering,
    Transforming,
    Applying,
    StatusUpdating,
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn enter(phase: Phase) {
    Span::current().record("phase", field::display(phase));
    debug!("Entering {}", phase);
}

/// Shared state of all passes of one reconciler
pub struct AddonContext<K> {
    cluster: Arc<dyn ClusterApi>,
    renderer: Renderer,
    pipeline: Pipeline,
    applier: Applier,
    watches: ChildWatches,
    instance: String,
    source_kind: ResolvedKind,
    transient_failure_threshold: u32,
    resync_interval: Duration,
    backoff_base: Duration,
    backoff_max: Duration,
    /// Consecutive failed passes per source name
    failures: Mutex<HashMap<String, u32>>,
    _source: PhantomData<fn() -> K>,
}

impl<K: AddonObject> AddonContext<K> {
    /// `trigger` receives the name of a source whenever one of its children changes
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        source: Arc<dyn ManifestSource>,
        config: &Config,
        namespace: Option<String>,
        trigger: UnboundedSender<String>,
    ) -> Self {
        let source_kind = ResolvedKind::new(ApiResource::erase::<K>(&()), false);
        let mapper = ChildMapper::new(&source_label_key::<K>(), &K::kind(&()));
        let watches = ChildWatches::new(
            cluster.clone(),
            trigger,
            &config.engine_instance,
            mapper,
            config.watch_namespace.clone(),
        );
        let pipeline = Pipeline::standard(namespace);
        debug!("{} transforms: {}", K::kind(&()), pipeline.names().join(" -> "));

        Self {
            renderer: Renderer::new(source),
            pipeline,
            applier: Applier::new(cluster.clone(), config.apply_concurrency, config.prune),
            watches,
            instance: config.engine_instance.clone(),
            source_kind,
            transient_failure_threshold: config.transient_failure_threshold.max(1),
            resync_interval: config.resync_interval,
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
            failures: Mutex::new(HashMap::new()),
            cluster,
            _source: PhantomData,
        }
    }

    fn failure_counts(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consecutive failed passes of a source
    pub fn failures(&self, name: &str) -> u32 {
        self.failure_counts().get(name).copied().unwrap_or(0)
    }

    /// Count one more failed pass and return the new total
    fn record_failure(&self, name: &str) -> u32 {
        let mut counts = self.failure_counts();
        let failures = counts.entry(name.to_string()).or_insert(0);
        *failures += 1;
        *failures
    }

    fn forget(&self, name: &str) {
        self.failure_counts().remove(name);
    }

    /// Delay before retry number `failures`: `base * 2^(failures-1)`, capped
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.saturating_sub(1).min(20);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }

    /// Run one pass for a source and report failures on its status
    #[instrument(skip_all, fields(source = %source.name_any(), phase = field::Empty))]
    pub async fn reconcile_source(&self, source: &K) -> Result<()> {
        let name = source.name_any();
        let result = self.pass(source).await;
        match &result {
            Ok(()) => {
                enter(Phase::Idle);
                self.forget(&name);
            }
            Err(e) if e.is_fatal() => {
                enter(Phase::Error);
                error!("Cannot reconcile {}: {}", name, e);
                self.report_failure(source, e).await;
            }
            Err(e @ ReconcileError::TransientCluster(_)) => {
                enter(Phase::Error);
                // error_policy is about to count this one
                let failures = self.failures(&name) + 1;
                warn!("Transient failure #{}: {}", failures, e);
                if failures >= self.transient_failure_threshold {
                    self.report_failure(source, e).await;
                }
            }
            Err(e @ ReconcileError::Cluster(_)) => {
                enter(Phase::Error);
                warn!("{}", e);
                self.report_failure(source, e).await;
            }
            Err(e) => {
                // apply and prune errors are already on the status
                enter(Phase::Error);
                warn!("{}", e);
            }
        }
        result
    }

    async fn pass(&self, source: &K) -> Result<()> {
        let name = source.name_any();
        if name.len() > MAX_SOURCE_NAME {
            return Err(ReconcileError::InvalidSource(format!(
                "name '{}' is longer than {} characters",
                name, MAX_SOURCE_NAME
            )));
        }

        enter(Phase::Rendering);
        let spec = source.common_spec();
        let selector = ManifestSelector {
            component: source.component_name().to_string(),
            channel: spec.channel.clone(),
            version: spec.version.clone(),
        };
        let rendered = self.renderer.render(&selector).await?;

        enter(Phase::Transforming);
        let ownership = Ownership::for_source(&self.instance, source);
        let ctx = self.transform_context(source, &ownership);
        let objects = self.pipeline.run(&ctx, rendered.objects)?;

        enter(Phase::Applying);
        let report = self
            .applier
            .apply(&objects, &ownership, &self.watches.registry().kinds())
            .await?;

        enter(Phase::StatusUpdating);
        let verdicts =
            status::observe(self.cluster.as_ref(), &objects, &report.kinds, &ownership).await?;
        let health = status::aggregate(verdicts.iter().map(|v| v.health));
        info!("{} children, aggregate health {}", verdicts.len(), health);

        let pass = PassResult {
            generation: source.meta().generation,
            version: Some(rendered.version),
            health: Some(health),
            errors: pass_errors(&report),
            failure: None,
        };
        self.write_status(source, status::build_status(source.common_status(), pass))
            .await?;

        let started = self.watches.ensure(&report.kinds);
        if started > 0 {
            debug!("Registered {} new child watches", started);
        }

        if !report.failed.is_empty() {
            return Err(ReconcileError::ApplyPartialFailure {
                failed: report.failed.len(),
                total: report.total(),
            });
        }
        if !report.prune_failed.is_empty() {
            return Err(ReconcileError::Prune(report.prune_failed.len()));
        }
        Ok(())
    }

    fn transform_context(&self, source: &K, ownership: &Ownership) -> TransformContext {
        let owner_reference = source.controller_owner_ref(&()).map(|mut owner| {
            owner.block_owner_deletion = Some(true);
            owner
        });

        TransformContext {
            labels: BTreeMap::from([(
                labels::APP.to_string(),
                source.component_name().to_string(),
            )]),
            ownership: ownership.clone(),
            owner_reference,
            patches: source.patch_spec().patches.clone(),
        }
    }

    async fn report_failure(&self, source: &K, err: &ReconcileError) {
        let pass = PassResult {
            generation: source.meta().generation,
            version: None,
            health: None,
            errors: vec![err.to_string()],
            failure: Some((err.reason().to_string(), err.to_string())),
        };
        let status = status::build_status(source.common_status(), pass);
        if let Err(e) = self.write_status(source, status).await {
            warn!("Failed to record failure on status: {}", e);
        }
    }

    /// Write the status through the status subresource, skipping no-op writes
    async fn write_status(&self, source: &K, status: CommonStatus) -> Result<()> {
        if source.common_status() == Some(&status) {
            debug!("Status unchanged");
            return Ok(());
        }

        let mut updated = source.clone();
        updated.set_common_status(status);
        self.cluster
            .update_status(&self.source_kind, None, &source.name_any(), &status_patch(&updated)?)
            .await?;
        Ok(())
    }
}

fn pass_errors(report: &ApplyReport) -> Vec<String> {
    report
        .failed
        .iter()
        .chain(&report.prune_failed)
        .map(ToString::to_string)
        .collect()
}

/// Merge patch body for the status of `source`. Fields that serialize as
/// absent are sent as null so stale values are cleared.
fn status_patch<K: AddonObject>(source: &K) -> Result<Value> {
    let mut value = serde_json::to_value(source)?["status"].take();
    if let Value::Object(map) = &mut value {
        for field in ["observedGeneration", "phase", "version", "errors", "conditions"] {
            map.entry(field).or_insert(Value::Null);
        }
    }
    Ok(value)
}

async fn reconcile<K: AddonObject>(source: Arc<K>, ctx: Arc<AddonContext<K>>) -> Result<Action> {
    ctx.reconcile_source(&source).await?;
    Ok(Action::requeue(ctx.resync_interval))
}

fn error_policy<K: AddonObject>(
    source: Arc<K>,
    error: &ReconcileError,
    ctx: Arc<AddonContext<K>>,
) -> Action {
    let name = source.name_any();
    // retrying cannot fix a fatal error, only a spec or manifest change can
    if error.is_fatal() {
        ctx.forget(&name);
        return Action::requeue(ctx.resync_interval);
    }
    let failures = ctx.record_failure(&name);
    let delay = ctx.backoff(failures);
    debug!("Retrying {} {} in {:?}", K::kind(&()), name, delay);
    Action::requeue(delay)
}

/// Turn source names pushed by the child watches into controller triggers
fn source_refs<K: AddonObject>(
    names: impl Stream<Item = String> + Send + 'static,
) -> impl Stream<Item = ObjectRef<K>> + Send + 'static {
    names.map(|name| ObjectRef::new(&name))
}

/// Runs the controller for one addon kind.
pub struct AddonReconciler<K> {
    api: Api<K>,
    ctx: Arc<AddonContext<K>>,
    triggers: UnboundedReceiver<String>,
    workers: u16,
}

impl<K: AddonObject> AddonReconciler<K> {
    pub fn new(
        client: Client,
        cluster: Arc<dyn ClusterApi>,
        source: Arc<dyn ManifestSource>,
        config: &Config,
        namespace: Option<String>,
    ) -> Self {
        let (trigger, triggers) = mpsc::unbounded();
        Self {
            api: Api::all(client),
            ctx: Arc::new(AddonContext::new(cluster, source, config, namespace, trigger)),
            triggers,
            workers: u16::try_from(config.workers.max(1)).unwrap_or(u16::MAX),
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let kind = K::kind(&());
        info!(
            "Starting {} reconciler with {} workers, resync every {:?}",
            kind, self.workers, self.ctx.resync_interval
        );

        Controller::new(self.api, WatcherConfig::default())
            .with_config(controller::Config::default().concurrency(self.workers))
            .reconcile_on(source_refs::<K>(self.triggers))
            .shutdown_on_signal()
            .run(reconcile::<K>, error_policy::<K>, self.ctx)
            .for_each(|res| async move {
                match res {
                    Ok((source, _)) => debug!("Reconciled {}", source),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        info!("{} reconciler stopped", kind);
        Ok(())
    }
}
