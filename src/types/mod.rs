// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Addon custom resources.

pub mod argocd;
pub mod common;
pub mod configsync;

pub use argocd::ArgoCD;
pub use common::{AddonObject, CommonSpec, CommonStatus, Condition, Health, PatchSpec};
pub use configsync::ConfigSync;
