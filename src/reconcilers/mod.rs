// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Reconcilers that turn source objects into applied, health-checked children.

pub mod addon;

pub use addon::{AddonContext, AddonReconciler, Phase};
