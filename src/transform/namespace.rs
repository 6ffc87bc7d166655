// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Forces namespaced objects into one target namespace.
//!
//! Some upstream bundles leave `metadata.namespace` empty and expect to be
//! applied with a kube context pointing at the right namespace. The target
//! namespace object is synthesized when the bundle does not ship one.

use crate::constants::is_cluster_scoped;
use crate::manifest::ObjectSet;
use crate::transform::labels::stamp_child;
use crate::transform::Transform;
use kube::api::ObjectMeta;
use kube::core::{DynamicObject, TypeMeta};
use tracing::{debug, info};

pub fn set_namespace(namespace: String) -> Transform {
    Transform::new("set-namespace", move |ctx, mut objects: ObjectSet| {
        let mut forced = 0;
        for obj in objects.iter_mut() {
            let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
            if is_cluster_scoped(kind) {
                continue;
            }
            obj.metadata.namespace = Some(namespace.clone());
            forced += 1;
        }
        debug!("Set namespace {} on {} objects", namespace, forced);

        if objects.find("Namespace", &namespace).is_none() {
            let mut ns = namespace_object(&namespace);
            stamp_child(ctx, &mut ns);
            objects.push(ns);
            info!("Added namespace {} to the object set", namespace);
        }

        Ok(objects)
    })
}

fn namespace_object(name: &str) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: "v1".to_string(),
            kind: "Namespace".to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        data: serde_json::Value::Object(Default::default()),
    }
}
