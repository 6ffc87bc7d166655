// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Ownership marker stamped onto every child object.
//!
//! The marker is two labels: `app.kubernetes.io/managed-by=<engine instance>`
//! and `<group>/<kind>=<source name>` (e.g. `addons.configdelivery.anthos.io/argocd=argocd`).
//! Both must be present for an object to be attributed to a source, which keeps
//! objects of other sources, other engine instances and hand-made objects out of
//! pruning and status aggregation.

use crate::constants::labels;
use kube::core::DynamicObject;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ownership {
    instance: String,
    source_key: String,
    source_name: String,
}

impl Ownership {
    pub fn new(instance: &str, source_key: &str, source_name: &str) -> Self {
        Self {
            instance: instance.to_string(),
            source_key: source_key.to_string(),
            source_name: source_name.to_string(),
        }
    }

    pub fn for_source<K: Resource<DynamicType = ()>>(instance: &str, source: &K) -> Self {
        Self::new(instance, &source_label_key::<K>(), &source.name_any())
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (labels::MANAGED_BY.to_string(), self.instance.clone()),
            (self.source_key.clone(), self.source_name.clone()),
        ])
    }

    /// Label selector matching exactly this source's children
    pub fn selector(&self) -> String {
        format!(
            "{}={},{}={}",
            labels::MANAGED_BY,
            self.instance,
            self.source_key,
            self.source_name
        )
    }

    pub fn is_marked(&self, obj: &DynamicObject) -> bool {
        let existing = obj.labels();
        existing.get(labels::MANAGED_BY) == Some(&self.instance)
            && existing.get(&self.source_key) == Some(&self.source_name)
    }
}

/// Label key naming the owning source, `<group>/<lowercase kind>`
pub fn source_label_key<K: Resource<DynamicType = ()>>() -> String {
    format!("{}/{}", K::group(&()), K::kind(&()).to_lowercase())
}

/// Selector matching the children of every source of one kind, used by child watches
pub fn kind_selector(instance: &str, source_key: &str) -> String {
    format!("{}={},{}", labels::MANAGED_BY, instance, source_key)
}
