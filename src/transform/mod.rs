// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Ordered, pure transformations over a rendered object set.
//!
//! Transforms run entirely in memory before any cluster call, so a failing
//! transform never leaves a partially transformed set behind.

pub mod labels;
pub mod namespace;
pub mod patch;

use crate::error::TransformError;
use crate::manifest::ObjectSet;
use crate::ownership::Ownership;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub use labels::{add_labels, stamp_ownership};
pub use namespace::set_namespace;
pub use patch::apply_patches;

/// Per-source inputs shared by all transforms of one pass
#[derive(Clone, Debug)]
pub struct TransformContext {
    /// Static labels, e.g. `k8s-app: argocd`
    pub labels: BTreeMap<String, String>,
    pub ownership: Ownership,
    pub owner_reference: Option<OwnerReference>,
    pub patches: Vec<serde_json::Value>,
}

type TransformFn =
    dyn Fn(&TransformContext, ObjectSet) -> Result<ObjectSet, TransformError> + Send + Sync;

#[derive(Clone)]
pub struct Transform {
    name: &'static str,
    func: Arc<TransformFn>,
}

impl Transform {
    pub fn new<F>(name: &'static str, func: F) -> Self
    where
        F: Fn(&TransformContext, ObjectSet) -> Result<ObjectSet, TransformError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn apply(&self, ctx: &TransformContext, objects: ObjectSet) -> Result<ObjectSet, TransformError> {
        (self.func)(ctx, objects)
    }
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transform").field("name", &self.name).finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    transforms: Vec<Transform>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Label injection, ownership, optional namespace forcing, then user patches
    pub fn standard(namespace: Option<String>) -> Self {
        let pipeline = Pipeline::new().then(add_labels()).then(stamp_ownership());
        let pipeline = match namespace {
            Some(ns) => pipeline.then(set_namespace(ns)),
            None => pipeline,
        };
        pipeline.then(apply_patches())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(Transform::name).collect()
    }

    /// Run every transform in order. The result must not hold two objects with
    /// the same identity, e.g. after namespace forcing folded two together.
    pub fn run(&self, ctx: &TransformContext, objects: ObjectSet) -> Result<ObjectSet, TransformError> {
        let objects = self.transforms.iter().try_fold(objects, |objects, transform| {
            debug!("Running transform {} over {} objects", transform.name(), objects.len());
            transform.apply(ctx, objects)
        })?;
        match objects.first_duplicate() {
            Some(key) => Err(TransformError::Duplicate(key.to_string())),
            None => Ok(objects),
        }
    }
}
