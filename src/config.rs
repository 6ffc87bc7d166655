// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Value of the managed-by label; must stay stable across restarts so
    /// previously created objects are still recognised for pruning
    pub engine_instance: String,
    /// Directory holding `channels/` and `packages/`
    pub manifest_dir: PathBuf,
    /// Namespace every namespaced ArgoCD child is forced into
    pub argocd_namespace: String,
    /// Scopes child watches of namespaced kinds to a single namespace
    pub watch_namespace: Option<String>,
    /// Kubeconfig context of the target cluster
    pub kube_context: Option<String>,
    pub workers: usize,
    pub apply_concurrency: usize,
    pub prune: bool,
    pub resync_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Consecutive transient failures before the source is reported as Failed
    pub transient_failure_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            engine_instance: crate::constants::OPERATOR_NAME.to_string(),
            manifest_dir: PathBuf::from("."),
            argocd_namespace: "argocd".to_string(),
            watch_namespace: None,
            kube_context: None,
            workers: 2,
            apply_concurrency: 8,
            prune: true,
            resync_interval: Duration::from_secs(600),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(300),
            transient_failure_threshold: 5,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let workers: usize = parse_or(&lookup, "WORKERS", defaults.workers)?;
        if workers == 0 {
            anyhow::bail!("WORKERS must be at least 1");
        }
        let resync_secs: u64 = parse_or(
            &lookup,
            "RESYNC_INTERVAL_SECS",
            defaults.resync_interval.as_secs(),
        )?;
        if resync_secs == 0 {
            anyhow::bail!("RESYNC_INTERVAL_SECS must be at least 1");
        }

        Ok(Config {
            engine_instance: lookup("ENGINE_INSTANCE").unwrap_or(defaults.engine_instance),
            manifest_dir: lookup("MANIFEST_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.manifest_dir),
            argocd_namespace: lookup("ARGOCD_NAMESPACE").unwrap_or(defaults.argocd_namespace),
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|s| !s.is_empty()),
            kube_context: lookup("KUBE_CONTEXT").filter(|s| !s.is_empty()),
            workers,
            apply_concurrency: parse_or(&lookup, "APPLY_CONCURRENCY", defaults.apply_concurrency)?
                .max(1),
            prune: parse_or(&lookup, "PRUNE", defaults.prune)?,
            resync_interval: Duration::from_secs(resync_secs),
            backoff_base: Duration::from_millis(parse_or(
                &lookup,
                "BACKOFF_BASE_MS",
                defaults.backoff_base.as_millis() as u64,
            )?),
            backoff_max: Duration::from_secs(parse_or(
                &lookup,
                "BACKOFF_MAX_SECS",
                defaults.backoff_max.as_secs(),
            )?),
            transient_failure_threshold: parse_or(
                &lookup,
                "TRANSIENT_FAILURE_THRESHOLD",
                defaults.transient_failure_threshold,
            )?,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}
