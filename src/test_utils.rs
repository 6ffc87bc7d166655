// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a mocked Kubernetes HTTP endpoint, an in-memory cluster and
//! a static manifest source.

use crate::constants::is_cluster_scoped;
use crate::error::{ClusterError, RenderError};
use crate::kubernetes::{ClusterApi, ResolvedKind, WatchEvent};
use crate::manifest::{KindKey, ManifestSelector, ManifestSource, ObjectKey, ResolvedManifest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use http::{Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::core::{ApiResource, DynamicObject};
use kube::{Client, ResourceExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tower::Service;

/// A recorded request: method, path with query and body
pub type RecordedRequest = (String, String, Bytes);

/// A mock HTTP service that returns predefined responses based on request paths.
/// Clones share their responses and request log.
#[derive(Clone, Default)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to `method` requests whose path starts with `path`
    pub fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses.lock().unwrap().insert(
            (method.to_string(), path.to_string()),
            (status, body.to_string()),
        );
        self
    }

    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock().unwrap();

        if let Some(resp) = responses.get(&(method.to_string(), path.to_string())) {
            return Some(resp.clone());
        }

        responses
            .iter()
            .find(|((m, p), _)| m == method && path.starts_with(p.as_str()))
            .map(|(_, resp)| resp.clone())
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let uri = req
            .uri()
            .path_and_query()
            .map_or_else(|| path.clone(), |pq| pq.to_string());
        let response = self.find_response(&method, &path);
        let requests = self.requests.clone();

        Box::pin(async move {
            let body = req.into_body().collect().await?.to_bytes();
            requests.lock().unwrap().push((method, uri, body));

            let (status, body) = response.unwrap_or_else(|| {
                (404, not_found_json("resource", "unknown"))
            });
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))?)
        })
    }
}

pub fn configmap_json(name: &str, namespace: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": "test-uid",
            "resourceVersion": "1"
        },
        "data": {}
    })
    .to_string()
}

pub fn not_found_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

/// Number of mutating calls a [`FakeCluster`] has served
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Calls {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub status_updates: usize,
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    /// Last configuration applied by the operator's field manager, per object
    applied: HashMap<ObjectKey, Value>,
    resource_version: u64,
    calls: Calls,
    watched: Vec<(KindKey, String)>,
    statuses: Vec<(String, Value)>,
    write_failures: HashMap<String, ClusterError>,
    delete_failures: HashMap<String, ClusterError>,
    unavailable: bool,
}

impl FakeState {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn check_available(&self) -> Result<(), ClusterError> {
        if self.unavailable {
            return Err(ClusterError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

/// In-memory object store implementing [`ClusterApi`].
pub struct FakeCluster {
    state: Mutex<FakeState>,
    events: broadcast::Sender<(KindKey, WatchEvent)>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            state: Mutex::new(FakeState::default()),
            events,
        }
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as-is, bypassing call counters, and notify watchers
    pub fn put(&self, mut obj: DynamicObject) {
        let key = ObjectKey::of(&obj).expect("object needs apiVersion, kind and name");
        let event_kind = key.kind.clone();
        {
            let mut state = self.state.lock().unwrap();
            obj.metadata.resource_version = Some(state.next_version());
            if obj.metadata.uid.is_none() {
                obj.metadata.uid = Some(format!("uid-{}", key.name));
            }
            state.objects.insert(key, obj.clone());
        }
        let _ = self.events.send((event_kind, WatchEvent::Applied(obj)));
    }

    /// Modify a stored object in place, e.g. to report readiness
    pub fn modify(&self, kind: &str, name: &str, f: impl FnOnce(&mut DynamicObject)) {
        let updated = {
            let mut state = self.state.lock().unwrap();
            let version = state.next_version();
            let (key, obj) = state
                .objects
                .iter_mut()
                .find(|(k, _)| k.kind.kind == kind && k.name == name)
                .expect("object to modify exists");
            f(obj);
            obj.metadata.resource_version = Some(version);
            (key.kind.clone(), obj.clone())
        };
        let _ = self.events.send((updated.0, WatchEvent::Applied(updated.1)));
    }

    pub fn object(&self, kind: &str, name: &str) -> Option<DynamicObject> {
        self.objects(kind).into_iter().find(|o| o.name_any() == name)
    }

    pub fn objects(&self, kind: &str) -> Vec<DynamicObject> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .iter()
            .filter(|(k, _)| k.kind.kind == kind)
            .map(|(_, o)| o.clone())
            .collect()
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().unwrap().calls
    }

    pub fn reset_calls(&self) {
        self.state.lock().unwrap().calls = Calls::default();
    }

    /// Kinds and selectors of every watch opened so far
    pub fn watched(&self) -> Vec<(KindKey, String)> {
        self.state.lock().unwrap().watched.clone()
    }

    /// Status of a source object after its last status write
    pub fn last_status(&self, name: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .statuses
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.clone())
    }

    /// Fail applies and status writes for objects with this name
    pub fn fail_writes(&self, name: &str, err: ClusterError) {
        self.state
            .lock()
            .unwrap()
            .write_failures
            .insert(name.to_string(), err);
    }

    pub fn fail_deletes(&self, name: &str, err: ClusterError) {
        self.state
            .lock()
            .unwrap()
            .delete_failures
            .insert(name.to_string(), err);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.write_failures.clear();
        state.delete_failures.clear();
        state.unavailable = false;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }
}

/// Server-side apply as the API server does it for a single field manager:
/// fields the previous configuration set and `config` drops are removed, the
/// rest of `config` is merged over live, and defaulting runs on the result.
/// Lists are atomic.
fn server_side_apply(
    live: Option<&DynamicObject>,
    previous: Option<&Value>,
    config: &Value,
) -> Result<DynamicObject, ClusterError> {
    let mut merged = match live {
        Some(live) => serde_json::to_value(live).map_err(|e| ClusterError::Invalid(e.to_string()))?,
        None => Value::Object(Default::default()),
    };
    if let Some(previous) = previous {
        drop_released(&mut merged, previous, config);
    }
    json_patch::merge(&mut merged, config);
    apply_defaults(&mut merged);
    serde_json::from_value(merged).map_err(|e| ClusterError::Invalid(e.to_string()))
}

fn drop_released(target: &mut Value, previous: &Value, config: &Value) {
    let (Some(target), Some(previous)) = (target.as_object_mut(), previous.as_object()) else {
        return;
    };
    for (field, before) in previous {
        match config.get(field) {
            None => {
                target.remove(field);
            }
            Some(now) if before.is_object() && now.is_object() => {
                if let Some(child) = target.get_mut(field) {
                    drop_released(child, before, now);
                }
            }
            Some(_) => {}
        }
    }
}

/// Admission defaulting: pod template containers get an image pull policy
fn apply_defaults(obj: &mut Value) {
    let Some(containers) = obj
        .pointer_mut("/spec/template/spec/containers")
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    for container in containers.iter_mut().filter_map(Value::as_object_mut) {
        container
            .entry("imagePullPolicy")
            .or_insert_with(|| Value::String("IfNotPresent".to_string()));
    }
}

/// Matches `k=v` and bare `k` (exists) requirements
pub fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .all(|requirement| match requirement.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(requirement),
        })
}

fn key_for(kind: &ResolvedKind, namespace: Option<&str>, name: &str) -> ObjectKey {
    ObjectKey {
        kind: kind.key(),
        namespace: namespace.filter(|_| kind.namespaced).map(String::from),
        name: name.to_string(),
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn resolve(&self, kind: &KindKey) -> Result<ResolvedKind, ClusterError> {
        self.state.lock().unwrap().check_available()?;
        Ok(ResolvedKind::new(
            ApiResource::from_gvk(&kind.gvk()),
            !is_cluster_scoped(&kind.kind),
        ))
    }

    async fn get(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        let state = self.state.lock().unwrap();
        state.check_available()?;
        Ok(state.objects.get(&key_for(kind, namespace, name)).cloned())
    }

    async fn list(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let state = self.state.lock().unwrap();
        state.check_available()?;
        let key = kind.key();
        Ok(state
            .objects
            .iter()
            .filter(|(k, _)| k.kind == key)
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .filter(|(_, o)| selector_matches(selector, o.labels()))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn apply(
        &self,
        kind: &ResolvedKind,
        obj: &DynamicObject,
        dry_run: bool,
    ) -> Result<DynamicObject, ClusterError> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.check_available()?;
            if let Some(err) = state.write_failures.get(&obj.name_any()) {
                return Err(err.clone());
            }
            let key = key_for(kind, obj.namespace().as_deref(), &obj.name_any());
            let config =
                serde_json::to_value(obj).map_err(|e| ClusterError::Invalid(e.to_string()))?;
            let live = state.objects.get(&key).cloned();
            let mut result = server_side_apply(live.as_ref(), state.applied.get(&key), &config)?;
            if dry_run {
                return Ok(result);
            }

            result.metadata.resource_version = Some(state.next_version());
            if result.metadata.uid.is_none() {
                result.metadata.uid = Some(format!("uid-{}", key.name));
            }
            if live.is_some() {
                state.calls.updates += 1;
            } else {
                state.calls.creates += 1;
            }
            state.applied.insert(key.clone(), config);
            state.objects.insert(key, result.clone());
            result
        };
        let _ = self
            .events
            .send((kind.key(), WatchEvent::Applied(result.clone())));
        Ok(result)
    }

    async fn delete(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError> {
        let removed = {
            let mut state = self.state.lock().unwrap();
            state.check_available()?;
            if let Some(err) = state.delete_failures.get(name) {
                return Err(err.clone());
            }
            let removed = state.objects.remove(&key_for(kind, namespace, name));
            if removed.is_some() {
                state.calls.deletes += 1;
            }
            removed
        };
        if let Some(obj) = removed {
            let _ = self.events.send((kind.key(), WatchEvent::Deleted(obj)));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
        status: &Value,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.check_available()?;
        if let Some(err) = state.write_failures.get(name) {
            return Err(err.clone());
        }
        let key = key_for(kind, namespace, name);
        // merge patch semantics: null removes a field
        let merged = match state.objects.get_mut(&key) {
            Some(obj) => {
                json_patch::merge(&mut obj.data, &serde_json::json!({ "status": status }));
                obj.data["status"].clone()
            }
            None => return Err(ClusterError::NotFound(key.to_string())),
        };
        state.calls.status_updates += 1;
        state.statuses.push((name.to_string(), merged));
        Ok(())
    }

    fn watch(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        selector: &str,
    ) -> BoxStream<'static, Result<WatchEvent, ClusterError>> {
        let key = kind.key();
        self.state
            .lock()
            .unwrap()
            .watched
            .push((key.clone(), selector.to_string()));

        let namespace = namespace.filter(|_| kind.namespaced).map(String::from);
        let selector = selector.to_string();
        let rx = self.events.subscribe();

        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter_map(move |(kind, event)| {
            let obj = event.object();
            let keep = kind == key
                && namespace
                    .as_deref()
                    .map_or(true, |ns| obj.namespace().as_deref() == Some(ns))
                && selector_matches(&selector, obj.labels());
            async move { keep.then_some(Ok(event)) }
        })
        .boxed()
    }
}

/// Manifest source answering from in-memory bundles
#[derive(Clone, Debug, Default)]
pub struct StaticManifestSource {
    packages: Vec<(String, String, String)>,
    channels: HashMap<String, HashMap<String, String>>,
}

impl StaticManifestSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a package; the last package registered for a component is
    /// what the default channel points at unless set with [`Self::with_channel`]
    pub fn with(mut self, component: &str, version: &str, content: &str) -> Self {
        self.packages
            .push((component.to_string(), version.to_string(), content.to_string()));
        self.channels
            .entry(crate::constants::manifest::DEFAULT_CHANNEL.to_string())
            .or_default()
            .insert(component.to_string(), version.to_string());
        self
    }

    pub fn with_channel(mut self, channel: &str, component: &str, version: &str) -> Self {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(component.to_string(), version.to_string());
        self
    }
}

#[async_trait]
impl ManifestSource for StaticManifestSource {
    async fn resolve(&self, selector: &ManifestSelector) -> Result<ResolvedManifest, RenderError> {
        let version = match &selector.version {
            Some(version) => version.clone(),
            None => {
                let channel = self
                    .channels
                    .get(selector.channel())
                    .ok_or_else(|| RenderError::UnknownChannel(selector.channel().to_string()))?;
                channel.get(&selector.component).cloned().ok_or_else(|| {
                    RenderError::ComponentNotInChannel {
                        channel: selector.channel().to_string(),
                        component: selector.component.clone(),
                    }
                })?
            }
        };

        self.packages
            .iter()
            .rev()
            .find(|(c, v, _)| *c == selector.component && *v == version)
            .map(|(_, v, content)| ResolvedManifest {
                version: v.clone(),
                content: content.clone(),
            })
            .ok_or(RenderError::PackageNotFound {
                component: selector.component.clone(),
                version,
            })
    }
}
