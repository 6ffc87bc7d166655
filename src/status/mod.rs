// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Aggregated health of a source object's children and the status built from it.

pub mod health;

use crate::error::ClusterError;
use crate::kubernetes::{ClusterApi, ResolvedKind};
use crate::manifest::{KindKey, ObjectKey, ObjectSet};
use crate::ownership::Ownership;
use crate::types::{CommonStatus, Condition, Health};
use kube::ResourceExt;
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

pub use health::assess;

pub mod conditions {
    pub const READY: &str = "Ready";
    pub const RECONCILING: &str = "Reconciling";
    pub const STALLED: &str = "Stalled";
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildHealth {
    pub object: ObjectKey,
    pub health: Health,
}

/// Healthy iff every verdict is Healthy, Failed if any is Failed, InProgress otherwise
pub fn aggregate<I>(verdicts: I) -> Health
where
    I: IntoIterator<Item = Health>,
{
    let mut all_healthy = true;
    for verdict in verdicts {
        match verdict {
            Health::Failed => return Health::Failed,
            Health::Healthy => {}
            Health::InProgress | Health::Unknown => all_healthy = false,
        }
    }
    if all_healthy {
        Health::Healthy
    } else {
        Health::InProgress
    }
}

/// Read the owned children fresh from the cluster and assess each desired object.
/// Desired objects that are missing, or whose kind is not served, are Unknown.
#[instrument(skip_all, fields(source = %ownership.source_name()))]
pub async fn observe(
    cluster: &dyn ClusterApi,
    objects: &ObjectSet,
    kinds: &[ResolvedKind],
    ownership: &Ownership,
) -> Result<Vec<ChildHealth>, ClusterError> {
    let resolved: HashMap<KindKey, &ResolvedKind> = kinds.iter().map(|k| (k.key(), k)).collect();
    let mut live = HashMap::new();

    for key in objects.kinds() {
        let Some(kind) = resolved.get(&key) else {
            continue;
        };
        match cluster.list(kind, None, &ownership.selector()).await {
            Ok(items) => {
                for item in items {
                    let namespace = item.namespace().filter(|_| kind.namespaced);
                    live.insert((key.clone(), namespace, item.name_any()), item);
                }
            }
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => warn!("Failed to list {} for status: {}", key, e),
        }
    }

    let verdicts = objects
        .keys()
        .into_iter()
        .map(|object| {
            let namespaced = resolved.get(&object.kind).map_or(true, |k| k.namespaced);
            let namespace = object.namespace.clone().filter(|_| namespaced);
            let health = live
                .get(&(object.kind.clone(), namespace, object.name.clone()))
                .map_or(Health::Unknown, assess);
            debug!("{} is {}", object, health);
            ChildHealth { object, health }
        })
        .collect();
    Ok(verdicts)
}

/// Everything one pass learned that ends up in the status
#[derive(Clone, Debug, Default)]
pub struct PassResult {
    pub generation: Option<i64>,
    /// Package version, kept from the previous status when rendering failed
    pub version: Option<String>,
    pub health: Option<Health>,
    pub errors: Vec<String>,
    /// Condition reason and message of a failed pass
    pub failure: Option<(String, String)>,
}

/// Build the status for a pass, starting from the previous status so unchanged
/// conditions keep their transition time.
pub fn build_status(previous: Option<&CommonStatus>, pass: PassResult) -> CommonStatus {
    let mut status = previous.cloned().unwrap_or_default();
    let health = match (&pass.failure, pass.health) {
        (_, Some(health)) => health,
        (Some(_), None) => Health::Failed,
        (None, None) => Health::Unknown,
    };

    status.observed_generation = pass.generation;
    status.healthy = health == Health::Healthy;
    status.phase = Some(health);
    if pass.version.is_some() {
        status.version = pass.version;
    }
    status.errors = pass.errors;

    let (reason, message) = match (&pass.failure, health) {
        (Some((reason, message)), _) => (reason.clone(), message.clone()),
        (None, Health::Healthy) => ("Healthy".to_string(), String::new()),
        (None, Health::Failed) => (
            "ComponentFailed".to_string(),
            "one or more components failed".to_string(),
        ),
        (None, _) => (
            "InProgress".to_string(),
            "waiting for components to become ready".to_string(),
        ),
    };

    status.set_condition(Condition::new(
        conditions::READY,
        health == Health::Healthy,
        &reason,
        message.clone(),
    ));
    status.set_condition(Condition::new(
        conditions::RECONCILING,
        matches!(health, Health::InProgress | Health::Unknown),
        &reason,
        String::new(),
    ));
    status.set_condition(Condition::new(
        conditions::STALLED,
        health == Health::Failed,
        &reason,
        if health == Health::Failed { message } else { String::new() },
    ));
    status
}
