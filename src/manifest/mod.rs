// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Manifest resolution and rendering.

pub mod objects;
pub mod renderer;
pub mod source;

pub use objects::{KindKey, ObjectKey, ObjectSet};
pub use renderer::{parse_manifest, Rendered, Renderer};
pub use source::{DirectoryManifestSource, ManifestSelector, ManifestSource, ResolvedManifest};
