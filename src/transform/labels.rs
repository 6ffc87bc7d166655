// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Static labels and the ownership marker.

use crate::manifest::ObjectSet;
use crate::transform::{Transform, TransformContext};
use kube::core::DynamicObject;
use kube::ResourceExt;

/// Add the context's static labels to every object
pub fn add_labels() -> Transform {
    Transform::new("add-labels", |ctx, mut objects: ObjectSet| {
        for obj in objects.iter_mut() {
            obj.labels_mut().extend(ctx.labels.clone());
        }
        Ok(objects)
    })
}

/// Stamp the ownership labels and the owner reference onto every object
pub fn stamp_ownership() -> Transform {
    Transform::new("stamp-ownership", |ctx, mut objects: ObjectSet| {
        for obj in objects.iter_mut() {
            mark_owned(ctx, obj);
        }
        Ok(objects)
    })
}

/// Everything a child created by the engine carries: static labels, ownership
/// labels and owner reference. Used for objects synthesized mid-pipeline.
pub fn stamp_child(ctx: &TransformContext, obj: &mut DynamicObject) {
    obj.labels_mut().extend(ctx.labels.clone());
    mark_owned(ctx, obj);
}

fn mark_owned(ctx: &TransformContext, obj: &mut DynamicObject) {
    obj.labels_mut().extend(ctx.ownership.labels());

    if let Some(owner) = &ctx.owner_reference {
        let refs = obj.owner_references_mut();
        match refs.iter_mut().find(|r| r.uid == owner.uid) {
            Some(existing) => *existing = owner.clone(),
            None => refs.push(owner.clone()),
        }
    }
}
