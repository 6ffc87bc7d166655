// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities: the cluster boundary, client creation and CRD discovery.

pub mod api;
pub mod client;
pub mod crd;

pub use api::{ClusterApi, ResolvedKind, WatchEvent};
pub use client::{create_client, KubeClusterApi};
pub use crd::wait_for_crd;
