// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Child watch fan-in.
//!
//! One watch per child kind is shared by every source object of a reconciler.
//! Events on owned children are mapped back to the owning source's name and
//! sent to the reconciler as a trigger.

use crate::kubernetes::{ClusterApi, ResolvedKind, WatchEvent};
use crate::manifest::KindKey;
use crate::ownership::kind_selector;
use futures::channel::mpsc::UnboundedSender;
use futures::StreamExt;
use kube::core::DynamicObject;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Kinds with an active watch. Shared by all workers; the lock guards only the
/// check-and-insert of a kind.
#[derive(Default)]
pub struct WatchRegistry {
    kinds: Mutex<HashMap<KindKey, ResolvedKind>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the kind was not registered before
    pub fn register(&self, kind: &ResolvedKind) -> bool {
        let mut kinds = self.kinds.lock().unwrap_or_else(PoisonError::into_inner);
        let key = kind.key();
        if kinds.contains_key(&key) {
            return false;
        }
        kinds.insert(key, kind.clone());
        true
    }

    pub fn kinds(&self) -> Vec<ResolvedKind> {
        self.kinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.kinds.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Maps child events to source names for one source kind
#[derive(Clone, Debug)]
pub struct ChildMapper {
    /// Ownership label key, e.g. `addons.configdelivery.anthos.io/argocd`
    source_key: String,
    /// Source kind as it appears in owner references
    source_kind: String,
}

impl ChildMapper {
    pub fn new(source_key: &str, source_kind: &str) -> Self {
        Self {
            source_key: source_key.to_string(),
            source_kind: source_kind.to_string(),
        }
    }

    /// The owning source's name: the ownership label, falling back to a
    /// controller owner reference of the source kind
    pub fn source_of(&self, obj: &DynamicObject) -> Option<String> {
        if let Some(name) = obj.labels().get(&self.source_key) {
            return Some(name.clone());
        }
        obj.owner_references()
            .iter()
            .find(|r| r.kind == self.source_kind && r.controller.unwrap_or(false))
            .map(|r| r.name.clone())
    }
}

pub struct ChildWatches {
    cluster: Arc<dyn ClusterApi>,
    registry: Arc<WatchRegistry>,
    trigger: UnboundedSender<String>,
    mapper: ChildMapper,
    selector: String,
    namespace: Option<String>,
}

impl ChildWatches {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        trigger: UnboundedSender<String>,
        instance: &str,
        mapper: ChildMapper,
        namespace: Option<String>,
    ) -> Self {
        Self {
            cluster,
            registry: Arc::new(WatchRegistry::new()),
            trigger,
            selector: kind_selector(instance, &mapper.source_key),
            mapper,
            namespace,
        }
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    /// Start a watch for every kind not watched yet. Returns how many were started.
    pub fn ensure(&self, kinds: &[ResolvedKind]) -> usize {
        kinds
            .iter()
            .filter(|kind| self.registry.register(kind))
            .map(|kind| self.spawn(kind))
            .count()
    }

    fn spawn(&self, kind: &ResolvedKind) {
        let key = kind.key();
        info!("Watching child kind {}", key);

        let namespace = self.namespace.as_deref().filter(|_| kind.namespaced);
        let mut events = self.cluster.watch(kind, namespace, &self.selector);
        let trigger = self.trigger.clone();
        let mapper = self.mapper.clone();

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => dispatch(&mapper, &trigger, &event),
                    Err(e) => warn!("Watch on {} failed: {}", key, e),
                }
            }
            debug!("Watch on {} ended", key);
        });
    }
}

fn dispatch(mapper: &ChildMapper, trigger: &UnboundedSender<String>, event: &WatchEvent) {
    let obj = event.object();
    match mapper.source_of(obj) {
        Some(source) => {
            debug!("Child {} changed, triggering {}", obj.name_any(), source);
            if trigger.unbounded_send(source).is_err() {
                debug!("Reconciler is gone, dropping trigger");
            }
        }
        None => debug!("Ignoring event for unowned object {}", obj.name_any()),
    }
}
