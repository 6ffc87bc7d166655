// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resolution of a channel/version selector to a manifest bundle.

use crate::constants::manifest::{CHANNELS_DIR, DEFAULT_CHANNEL, MANIFEST_FILE, PACKAGES_DIR};
use crate::error::RenderError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// What to render for one source object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestSelector {
    pub component: String,
    pub channel: Option<String>,
    pub version: Option<String>,
}

impl ManifestSelector {
    pub fn channel(&self) -> &str {
        self.channel.as_deref().unwrap_or(DEFAULT_CHANNEL)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedManifest {
    pub version: String,
    /// Multi-document YAML bundle
    pub content: String,
}

#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn resolve(&self, selector: &ManifestSelector) -> Result<ResolvedManifest, RenderError>;
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    manifests: Vec<ChannelEntry>,
}

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    name: String,
    version: String,
}

/// Reads `channels/<channel>` and `packages/<component>/<version>/manifest.yaml`
/// below a base directory.
#[derive(Clone, Debug)]
pub struct DirectoryManifestSource {
    base: PathBuf,
}

impl DirectoryManifestSource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    async fn channel_version(&self, selector: &ManifestSelector) -> Result<String, RenderError> {
        let channel_name = selector.channel();
        validate_path_segment(channel_name)?;

        let path = self.base.join(CHANNELS_DIR).join(channel_name);
        let raw = read(&path)
            .await?
            .ok_or_else(|| RenderError::UnknownChannel(channel_name.to_string()))?;
        let channel: Channel = serde_yaml::from_str(&raw).map_err(|e| {
            RenderError::Malformed(format!("channel '{}': {}", channel_name, e))
        })?;

        channel
            .manifests
            .into_iter()
            .filter(|m| m.name == selector.component)
            .last()
            .map(|m| m.version)
            .ok_or_else(|| RenderError::ComponentNotInChannel {
                channel: channel_name.to_string(),
                component: selector.component.clone(),
            })
    }
}

#[async_trait]
impl ManifestSource for DirectoryManifestSource {
    #[instrument(skip(self), fields(base = %self.base.display()))]
    async fn resolve(&self, selector: &ManifestSelector) -> Result<ResolvedManifest, RenderError> {
        validate_path_segment(&selector.component)?;

        let version = match &selector.version {
            Some(v) => v.clone(),
            None => self.channel_version(selector).await?,
        };
        validate_path_segment(&version)?;

        let path = self
            .base
            .join(PACKAGES_DIR)
            .join(&selector.component)
            .join(&version)
            .join(MANIFEST_FILE);
        debug!("Reading manifest bundle {}", path.display());

        let content = read(&path)
            .await?
            .ok_or_else(|| RenderError::PackageNotFound {
                component: selector.component.clone(),
                version: version.clone(),
            })?;

        Ok(ResolvedManifest { version, content })
    }
}

fn validate_path_segment(segment: &str) -> Result<(), RenderError> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['/', '\\']) {
        return Err(RenderError::InvalidSelector(format!(
            "'{}' is not a valid channel, component or version name",
            segment
        )));
    }
    Ok(())
}

async fn read(path: &Path) -> Result<Option<String>, RenderError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RenderError::Io(format!("{}: {}", path.display(), e))),
    }
}
