// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Turns a manifest bundle into an ordered object set.

use crate::error::RenderError;
use crate::manifest::objects::{KindKey, ObjectSet};
use crate::manifest::source::{ManifestSelector, ManifestSource};
use kube::core::DynamicObject;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Clone, Debug)]
pub struct Rendered {
    pub version: String,
    pub objects: ObjectSet,
}

#[derive(Clone)]
pub struct Renderer {
    source: Arc<dyn ManifestSource>,
}

impl Renderer {
    pub fn new(source: Arc<dyn ManifestSource>) -> Self {
        Self { source }
    }

    /// Resolve the selector and parse the bundle. Identical inputs always yield
    /// the same objects in the same order.
    #[instrument(skip(self), fields(component = %selector.component))]
    pub async fn render(&self, selector: &ManifestSelector) -> Result<Rendered, RenderError> {
        let resolved = self.source.resolve(selector).await?;
        let objects = parse_manifest(&resolved.content)?;
        debug!(
            "Rendered {} objects for {}@{}",
            objects.len(),
            selector.component,
            resolved.version
        );
        Ok(Rendered {
            version: resolved.version,
            objects,
        })
    }
}

/// Parse a multi-document YAML bundle. Empty documents are skipped and `List`
/// documents are flattened in place.
pub fn parse_manifest(content: &str) -> Result<ObjectSet, RenderError> {
    let mut objects = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = Value::deserialize(document)
            .map_err(|e| RenderError::Malformed(format!("document {}: {}", index, e)))?;
        collect(value, index, &mut objects)?;
    }

    let objects = ObjectSet::new(objects);
    if let Some(key) = objects.first_duplicate() {
        return Err(RenderError::Malformed(format!(
            "object {} appears more than once",
            key
        )));
    }
    Ok(objects)
}

fn collect(value: Value, index: usize, out: &mut Vec<DynamicObject>) -> Result<(), RenderError> {
    match value {
        Value::Null => Ok(()),
        Value::Object(ref map) if is_list(map) => {
            let Some(Value::Array(items)) = map.get("items").cloned() else {
                return Ok(());
            };
            for item in items {
                collect(item, index, out)?;
            }
            Ok(())
        }
        Value::Object(_) => {
            let obj: DynamicObject = serde_json::from_value(value)
                .map_err(|e| RenderError::Malformed(format!("document {}: {}", index, e)))?;
            validate(&obj, index)?;
            out.push(obj);
            Ok(())
        }
        other => Err(RenderError::Malformed(format!(
            "document {} is not an object: {}",
            index, other
        ))),
    }
}

fn is_list(map: &serde_json::Map<String, Value>) -> bool {
    map.get("kind")
        .and_then(Value::as_str)
        .is_some_and(|k| k == "List" || (k.ends_with("List") && map.contains_key("items")))
}

fn validate(obj: &DynamicObject, index: usize) -> Result<(), RenderError> {
    if KindKey::of(obj).is_none() {
        return Err(RenderError::Malformed(format!(
            "document {} is missing apiVersion or kind",
            index
        )));
    }
    if obj.metadata.name.as_deref().map_or(true, str::is_empty) {
        return Err(RenderError::Malformed(format!(
            "document {} is missing metadata.name",
            index
        )));
    }
    Ok(())
}
