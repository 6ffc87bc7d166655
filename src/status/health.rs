// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-object readiness verdicts computed from the object's reported status.

use crate::types::Health;
use kube::core::DynamicObject;
use serde_json::Value;

/// Kinds without a status that are ready as soon as they exist
const STATIC_KINDS: &[&str] = &[
    "ClusterRole",
    "ClusterRoleBinding",
    "ConfigMap",
    "Endpoints",
    "IngressClass",
    "LimitRange",
    "MutatingWebhookConfiguration",
    "NetworkPolicy",
    "PodDisruptionBudget",
    "PriorityClass",
    "ResourceQuota",
    "Role",
    "RoleBinding",
    "Secret",
    "ServiceAccount",
    "StorageClass",
    "ValidatingWebhookConfiguration",
];

pub fn assess(obj: &DynamicObject) -> Health {
    if obj.metadata.deletion_timestamp.is_some() {
        return Health::InProgress;
    }

    let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
    let status = obj.data.get("status").unwrap_or(&Value::Null);

    if !matches!(kind, "Namespace" | "Service" | "CustomResourceDefinition")
        && !STATIC_KINDS.contains(&kind)
        && !observed_current(obj, status)
    {
        return Health::InProgress;
    }

    match kind {
        "Deployment" => deployment(obj, status),
        "StatefulSet" => stateful_set(obj, status),
        "DaemonSet" => daemon_set(status),
        "ReplicaSet" => ready_at_least(status, "readyReplicas", desired_replicas(obj)),
        "Pod" => pod(status),
        "Job" => job(status),
        "Service" => service(obj, status),
        "PersistentVolumeClaim" => match str_field(status, "phase") {
            Some("Bound") => Health::Healthy,
            Some("Lost") => Health::Failed,
            _ => Health::InProgress,
        },
        "Namespace" => match str_field(status, "phase") {
            Some("Terminating") => Health::InProgress,
            _ => Health::Healthy,
        },
        "CustomResourceDefinition" => match condition(status, "Established") {
            Some("True") => Health::Healthy,
            _ => Health::InProgress,
        },
        k if STATIC_KINDS.contains(&k) => Health::Healthy,
        _ => generic(status),
    }
}

/// The controller has seen the latest spec, when both generations are known
fn observed_current(obj: &DynamicObject, status: &Value) -> bool {
    match (
        obj.metadata.generation,
        status.get("observedGeneration").and_then(Value::as_i64),
    ) {
        (Some(generation), Some(observed)) => observed >= generation,
        _ => true,
    }
}

fn desired_replicas(obj: &DynamicObject) -> i64 {
    obj.data
        .pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .unwrap_or(1)
}

fn int_field(status: &Value, field: &str) -> i64 {
    status.get(field).and_then(Value::as_i64).unwrap_or(0)
}

fn str_field<'a>(status: &'a Value, field: &str) -> Option<&'a str> {
    status.get(field).and_then(Value::as_str)
}

/// Status value of the condition with the given type
fn condition<'a>(status: &'a Value, condition_type: &str) -> Option<&'a str> {
    status
        .get("conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(condition_type))?
        .get("status")?
        .as_str()
}

fn condition_reason<'a>(status: &'a Value, condition_type: &str) -> Option<&'a str> {
    status
        .get("conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(condition_type))?
        .get("reason")?
        .as_str()
}

fn ready_at_least(status: &Value, field: &str, desired: i64) -> Health {
    if int_field(status, field) >= desired {
        Health::Healthy
    } else {
        Health::InProgress
    }
}

fn deployment(obj: &DynamicObject, status: &Value) -> Health {
    if condition_reason(status, "Progressing") == Some("ProgressDeadlineExceeded") {
        return Health::Failed;
    }

    let desired = desired_replicas(obj);
    if int_field(status, "updatedReplicas") >= desired
        && int_field(status, "availableReplicas") >= desired
    {
        Health::Healthy
    } else {
        Health::InProgress
    }
}

fn stateful_set(obj: &DynamicObject, status: &Value) -> Health {
    let desired = desired_replicas(obj);
    let rolled_out = match (str_field(status, "currentRevision"), str_field(status, "updateRevision")) {
        (Some(current), Some(update)) => current == update,
        _ => int_field(status, "updatedReplicas") >= desired,
    };

    if rolled_out && int_field(status, "readyReplicas") >= desired {
        Health::Healthy
    } else {
        Health::InProgress
    }
}

fn daemon_set(status: &Value) -> Health {
    let Some(desired) = status.get("desiredNumberScheduled").and_then(Value::as_i64) else {
        return Health::InProgress;
    };
    if int_field(status, "updatedNumberScheduled") >= desired
        && int_field(status, "numberAvailable") >= desired
    {
        Health::Healthy
    } else {
        Health::InProgress
    }
}

fn pod(status: &Value) -> Health {
    match str_field(status, "phase") {
        Some("Succeeded") => Health::Healthy,
        Some("Failed") => Health::Failed,
        Some("Running") if condition(status, "Ready") == Some("True") => Health::Healthy,
        _ => Health::InProgress,
    }
}

fn job(status: &Value) -> Health {
    if condition(status, "Failed") == Some("True") {
        Health::Failed
    } else if condition(status, "Complete") == Some("True") {
        Health::Healthy
    } else {
        Health::InProgress
    }
}

fn service(obj: &DynamicObject, status: &Value) -> Health {
    if obj.data.pointer("/spec/type").and_then(Value::as_str) != Some("LoadBalancer") {
        return Health::Healthy;
    }
    let ingress = status
        .pointer("/loadBalancer/ingress")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    if ingress > 0 {
        Health::Healthy
    } else {
        Health::InProgress
    }
}

/// Custom resources following the Ready / Stalled condition convention
fn generic(status: &Value) -> Health {
    if condition(status, "Stalled") == Some("True") {
        return Health::Failed;
    }
    match condition(status, "Ready") {
        Some("True") => Health::Healthy,
        Some(_) => Health::InProgress,
        None => Health::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn deployment_with(status: Value) -> DynamicObject {
        obj(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "argocd-server", "generation": 2 },
            "spec": { "replicas": 2 },
            "status": status
        }))
    }

    #[test]
    fn test_deployment() {
        let ready = deployment_with(json!({
            "observedGeneration": 2, "replicas": 2, "updatedReplicas": 2, "availableReplicas": 2
        }));
        assert_eq!(assess(&ready), Health::Healthy);

        let rolling = deployment_with(json!({
            "observedGeneration": 2, "updatedReplicas": 1, "availableReplicas": 2
        }));
        assert_eq!(assess(&rolling), Health::InProgress);

        let stale = deployment_with(json!({
            "observedGeneration": 1, "updatedReplicas": 2, "availableReplicas": 2
        }));
        assert_eq!(assess(&stale), Health::InProgress);

        let stuck = deployment_with(json!({
            "observedGeneration": 2,
            "conditions": [{ "type": "Progressing", "status": "False", "reason": "ProgressDeadlineExceeded" }]
        }));
        assert_eq!(assess(&stuck), Health::Failed);
    }

    #[test]
    fn test_statefulset_waits_for_revision() {
        let sts = |current: &str| {
            obj(json!({
                "apiVersion": "apps/v1",
                "kind": "StatefulSet",
                "metadata": { "name": "redis" },
                "spec": { "replicas": 1 },
                "status": { "readyReplicas": 1, "currentRevision": current, "updateRevision": "r2" }
            }))
        };
        assert_eq!(assess(&sts("r2")), Health::Healthy);
        assert_eq!(assess(&sts("r1")), Health::InProgress);
    }

    #[test]
    fn test_daemonset() {
        let ds = |available: i64| {
            obj(json!({
                "apiVersion": "apps/v1",
                "kind": "DaemonSet",
                "metadata": { "name": "agent" },
                "status": { "desiredNumberScheduled": 3, "updatedNumberScheduled": 3, "numberAvailable": available }
            }))
        };
        assert_eq!(assess(&ds(3)), Health::Healthy);
        assert_eq!(assess(&ds(2)), Health::InProgress);
    }

    #[test]
    fn test_pod_and_job() {
        let pod = |phase: &str| {
            obj(json!({
                "apiVersion": "v1", "kind": "Pod", "metadata": { "name": "p" },
                "status": { "phase": phase, "conditions": [{ "type": "Ready", "status": "True" }] }
            }))
        };
        assert_eq!(assess(&pod("Running")), Health::Healthy);
        assert_eq!(assess(&pod("Pending")), Health::InProgress);
        assert_eq!(assess(&pod("Failed")), Health::Failed);

        let job = obj(json!({
            "apiVersion": "batch/v1", "kind": "Job", "metadata": { "name": "migrate" },
            "status": { "conditions": [{ "type": "Failed", "status": "True" }] }
        }));
        assert_eq!(assess(&job), Health::Failed);
    }

    #[test]
    fn test_static_and_service_kinds() {
        let cm = obj(json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "cm" } }));
        assert_eq!(assess(&cm), Health::Healthy);

        let cluster_ip = obj(json!({
            "apiVersion": "v1", "kind": "Service", "metadata": { "name": "svc" },
            "spec": { "type": "ClusterIP" }
        }));
        assert_eq!(assess(&cluster_ip), Health::Healthy);

        let pending_lb = obj(json!({
            "apiVersion": "v1", "kind": "Service", "metadata": { "name": "svc" },
            "spec": { "type": "LoadBalancer" }, "status": { "loadBalancer": {} }
        }));
        assert_eq!(assess(&pending_lb), Health::InProgress);
    }

    #[test]
    fn test_crd_requires_established() {
        let crd = |established: &str| {
            obj(json!({
                "apiVersion": "apiextensions.k8s.io/v1",
                "kind": "CustomResourceDefinition",
                "metadata": { "name": "applications.argoproj.io" },
                "status": { "conditions": [{ "type": "Established", "status": established }] }
            }))
        };
        assert_eq!(assess(&crd("True")), Health::Healthy);
        assert_eq!(assess(&crd("False")), Health::InProgress);
    }

    #[test]
    fn test_unrecognized_kind_without_conditions_is_unknown() {
        let app = obj(json!({
            "apiVersion": "argoproj.io/v1alpha1", "kind": "AppProject", "metadata": { "name": "default" }
        }));
        assert_eq!(assess(&app), Health::Unknown);

        let stalled = obj(json!({
            "apiVersion": "example.com/v1", "kind": "Widget", "metadata": { "name": "w" },
            "status": { "conditions": [{ "type": "Stalled", "status": "True" }] }
        }));
        assert_eq!(assess(&stalled), Health::Failed);
    }

    #[test]
    fn test_terminating_object_is_in_progress() {
        let mut cm = obj(json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "cm" } }));
        cm.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        assert_eq!(assess(&cm), Health::InProgress);
    }
}
