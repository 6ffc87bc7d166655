// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Label keys stamped onto every child object
pub mod labels {
    /// Static per-component label, e.g. `k8s-app: argocd`
    pub const APP: &str = "k8s-app";
    /// Identifies the engine instance that owns the object
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
}

/// The field manager name used for create/update calls
pub const OPERATOR_NAME: &str = "addon-operator";

/// Kinds that are never namespaced. Anything else is assumed to be namespaced
/// until discovery says otherwise.
pub const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "ClusterIssuer",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "IngressClass",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PodSecurityPolicy",
    "PriorityClass",
    "RuntimeClass",
    "StorageClass",
    "ValidatingWebhookConfiguration",
];

/// Kinds applied sequentially before everything else
pub const FOUNDATIONAL_KINDS: &[&str] = &["Namespace", "CustomResourceDefinition"];

/// Manifest source defaults
pub mod manifest {
    pub const DEFAULT_CHANNEL: &str = "stable";
    pub const CHANNELS_DIR: &str = "channels";
    pub const PACKAGES_DIR: &str = "packages";
    pub const MANIFEST_FILE: &str = "manifest.yaml";
}

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}
