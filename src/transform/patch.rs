// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! User-declared patches from the source object's spec.
//!
//! Two document shapes are accepted:
//!
//! * strategic merge: a partial object naming its target through
//!   `apiVersion`, `kind` and `metadata.name` (optionally `metadata.namespace`);
//! * JSON patch (RFC 6902): `{ "target": { "kind", "name", ... }, "patch": [ops] }`.
//!
//! Patches apply in declaration order. Any patch that is malformed, fails or
//! matches nothing fails the whole transform.

use crate::error::{PatchError, TransformError};
use crate::manifest::{KindKey, ObjectKey, ObjectSet};
use crate::transform::Transform;
use kube::core::DynamicObject;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

pub fn apply_patches() -> Transform {
    Transform::new("apply-patches", |ctx, objects| {
        apply_all(objects, &ctx.patches).map_err(|source| TransformError::Patch {
            transform: "apply-patches".to_string(),
            source,
        })
    })
}

#[derive(Debug, Default, Deserialize)]
struct Target {
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    version: Option<String>,
    kind: String,
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

impl Target {
    fn matches(&self, doc: &Value) -> bool {
        let Some(kind) = KindKey::of_value(doc) else {
            return false;
        };
        let name = doc.pointer("/metadata/name").and_then(Value::as_str);
        let namespace = doc.pointer("/metadata/namespace").and_then(Value::as_str);

        kind.kind == self.kind
            && name == Some(self.name.as_str())
            && self.group.as_ref().map_or(true, |g| *g == kind.group)
            && self.version.as_ref().map_or(true, |v| *v == kind.version)
            && self
                .namespace
                .as_ref()
                .map_or(true, |ns| namespace == Some(ns.as_str()))
    }

    fn describe(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{} {}/{}", self.kind, ns, self.name),
            None => format!("{} {}", self.kind, self.name),
        }
    }
}

enum Operation {
    StrategicMerge(Value),
    JsonPatch(json_patch::Patch),
}

struct PatchDocument {
    target: Target,
    operation: Operation,
}

impl PatchDocument {
    fn parse(index: usize, raw: &Value) -> Result<Self, PatchError> {
        let malformed = |reason: String| PatchError::Malformed { index, reason };

        let Some(map) = raw.as_object() else {
            return Err(malformed("patch must be an object".to_string()));
        };

        if let (Some(target), Some(ops)) = (map.get("target"), map.get("patch")) {
            let target: Target = serde_json::from_value(target.clone())
                .map_err(|e| malformed(format!("invalid target: {}", e)))?;
            let ops: json_patch::Patch = serde_json::from_value(ops.clone())
                .map_err(|e| malformed(format!("invalid JSON patch: {}", e)))?;
            return Ok(PatchDocument {
                target,
                operation: Operation::JsonPatch(ops),
            });
        }

        let kind = KindKey::of_value(raw)
            .ok_or_else(|| malformed("missing apiVersion or kind".to_string()))?;
        let name = raw
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing metadata.name".to_string()))?;
        let namespace = raw
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(String::from);

        Ok(PatchDocument {
            target: Target {
                group: Some(kind.group),
                version: Some(kind.version),
                kind: kind.kind,
                name: name.to_string(),
                namespace,
            },
            operation: Operation::StrategicMerge(raw.clone()),
        })
    }

    fn apply(&self, index: usize, doc: &mut Value) -> Result<(), PatchError> {
        match &self.operation {
            Operation::StrategicMerge(patch) => {
                strategic_merge(doc, patch, None);
                Ok(())
            }
            Operation::JsonPatch(ops) => {
                // json_patch leaves the document untouched when an operation fails
                json_patch::patch(doc, ops).map_err(|e| PatchError::Apply {
                    index,
                    object: self.target.describe(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Apply every patch in order to a copy of the set; the input is only
/// replaced when all patches succeed.
pub fn apply_all(objects: ObjectSet, patches: &[Value]) -> Result<ObjectSet, PatchError> {
    if patches.is_empty() {
        return Ok(objects);
    }

    let mut docs = objects
        .into_vec()
        .into_iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PatchError::Malformed {
            index: 0,
            reason: format!("object is not serializable: {}", e),
        })?;

    for (index, raw) in patches.iter().enumerate() {
        let patch = PatchDocument::parse(index, raw)?;
        let mut matched = 0;
        for doc in docs.iter_mut().filter(|d| patch.target.matches(d)) {
            patch.apply(index, doc)?;
            matched += 1;
        }
        if matched == 0 {
            return Err(PatchError::NoTarget {
                index,
                target: patch.target.describe(),
            });
        }
        debug!("Patch #{} applied to {}", index, patch.target.describe());
    }

    docs.into_iter()
        .enumerate()
        .map(|(index, doc)| {
            let obj: DynamicObject =
                serde_json::from_value(doc).map_err(|e| PatchError::Apply {
                    index,
                    object: "patched object".to_string(),
                    reason: e.to_string(),
                })?;
            if ObjectKey::of(&obj).is_none() {
                return Err(PatchError::Apply {
                    index,
                    object: obj.metadata.name.clone().unwrap_or_default(),
                    reason: "patch removed the object's identity".to_string(),
                });
            }
            Ok(obj)
        })
        .collect()
}

/// List fields merged by key instead of replaced
fn merge_key(field: &str) -> Option<&'static str> {
    match field {
        "containers" | "initContainers" | "ephemeralContainers" | "env" | "volumes"
        | "imagePullSecrets" | "hostAliases" => Some("name"),
        "volumeMounts" | "volumeDevices" => Some("mountPath"),
        "ports" => Some("containerPort"),
        "tolerations" => Some("key"),
        _ => None,
    }
}

fn strategic_merge(target: &mut Value, patch: &Value, field: Option<&str>) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => merge_maps(target, patch),
        (Value::Array(target), Value::Array(patch)) => {
            match field.and_then(|f| list_key(f, target, patch)) {
                Some(key) => merge_keyed_list(target, patch, key),
                None => *target = patch.clone(),
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn merge_maps(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        if value.is_null() {
            target.remove(key);
        } else if let Some(existing) = target.get_mut(key) {
            strategic_merge(existing, value, Some(key));
        } else {
            target.insert(key.clone(), strip_directives(value));
        }
    }
}

fn list_key(field: &str, target: &[Value], patch: &[Value]) -> Option<&'static str> {
    let key = merge_key(field)?;
    // Service ports are keyed by `port`, container ports by `containerPort`
    let key = if key == "containerPort" && patch.iter().any(|p| p.get("port").is_some()) {
        "port"
    } else {
        key
    };
    let keyed = |v: &Value| v.get(key).is_some();
    (target.iter().all(keyed) && patch.iter().all(keyed)).then_some(key)
}

fn merge_keyed_list(target: &mut Vec<Value>, patch: &[Value], key: &str) {
    for item in patch {
        let id = item.get(key);
        let position = target.iter().position(|t| t.get(key) == id);
        let delete = item.get("$patch").and_then(Value::as_str) == Some("delete");

        match (position, delete) {
            (Some(pos), true) => {
                target.remove(pos);
            }
            (Some(pos), false) => strategic_merge(&mut target[pos], item, None),
            (None, true) => {}
            (None, false) => target.push(strip_directives(item)),
        }
    }
}

fn strip_directives(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !k.starts_with("$patch"))
                .map(|(k, v)| (k.clone(), strip_directives(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_directives).collect()),
        other => other.clone(),
    }
}
