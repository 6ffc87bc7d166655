// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Rendered object sets and the identity used to diff them against the cluster.

use kube::core::{DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::fmt;

/// Group, version and kind of an object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KindKey {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl KindKey {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        KindKey {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Split an `apiVersion` such as `apps/v1` (or core `v1`) into group and version
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => KindKey::new(group, version, kind),
            None => KindKey::new("", api_version, kind),
        }
    }

    pub fn of(obj: &DynamicObject) -> Option<Self> {
        let types = obj.types.as_ref()?;
        if types.api_version.is_empty() || types.kind.is_empty() {
            return None;
        }
        Some(KindKey::from_api_version(&types.api_version, &types.kind))
    }

    /// Same as [`KindKey::of`] for an untyped JSON document
    pub fn of_value(doc: &serde_json::Value) -> Option<Self> {
        let api_version = doc.get("apiVersion")?.as_str().filter(|s| !s.is_empty())?;
        let kind = doc.get("kind")?.as_str().filter(|s| !s.is_empty())?;
        Some(KindKey::from_api_version(api_version, kind))
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }
}

impl fmt::Display for KindKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.api_version(), self.kind)
    }
}

/// Identity of an object: two objects are the same iff their keys are equal
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: KindKey,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn of(obj: &DynamicObject) -> Option<Self> {
        let name = obj.metadata.name.clone().filter(|n| !n.is_empty())?;
        Some(ObjectKey {
            kind: KindKey::of(obj)?,
            namespace: obj.namespace().filter(|ns| !ns.is_empty()),
            name,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Ordered sequence of object descriptions produced by one reconcile pass
#[derive(Clone, Debug, Default)]
pub struct ObjectSet {
    items: Vec<DynamicObject>,
}

impl ObjectSet {
    pub fn new(items: Vec<DynamicObject>) -> Self {
        ObjectSet { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DynamicObject> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DynamicObject> {
        self.items.iter_mut()
    }

    pub fn push(&mut self, obj: DynamicObject) {
        self.items.push(obj);
    }

    pub fn into_vec(self) -> Vec<DynamicObject> {
        self.items
    }

    pub fn keys(&self) -> BTreeSet<ObjectKey> {
        self.items.iter().filter_map(ObjectKey::of).collect()
    }

    /// The first identity that occurs more than once
    pub fn first_duplicate(&self) -> Option<ObjectKey> {
        let mut seen = BTreeSet::new();
        self.items
            .iter()
            .filter_map(ObjectKey::of)
            .find(|key| !seen.insert(key.clone()))
    }

    /// Distinct kinds in first-seen order
    pub fn kinds(&self) -> Vec<KindKey> {
        let mut seen = BTreeSet::new();
        self.items
            .iter()
            .filter_map(KindKey::of)
            .filter(|k| seen.insert(k.clone()))
            .collect()
    }

    pub fn find(&self, kind: &str, name: &str) -> Option<&DynamicObject> {
        self.items.iter().find(|o| {
            o.types.as_ref().is_some_and(|t| t.kind == kind) && o.metadata.name.as_deref() == Some(name)
        })
    }
}

impl FromIterator<DynamicObject> for ObjectSet {
    fn from_iter<I: IntoIterator<Item = DynamicObject>>(iter: I) -> Self {
        ObjectSet::new(iter.into_iter().collect())
    }
}
