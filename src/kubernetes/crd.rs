// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking

use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::error::ClusterError;
use kube::core::GroupVersionKind;
use kube::{discovery, Client, Resource};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Wait until the API server serves the CRD of `K`, polling with exponential
/// backoff starting at POLL_INTERVAL_SECS seconds.
pub async fn wait_for_crd<K: Resource<DynamicType = ()>>(client: &Client) {
    let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match crd_served(client, &gvk).await {
            Ok(true) => {
                info!("{} CRD ({}) is available", gvk.kind, gvk.api_version());
                return;
            }
            Ok(false) => {
                info!(
                    "{} CRD ({}) not yet available, waiting {} seconds...",
                    gvk.kind,
                    gvk.api_version(),
                    interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for {} CRD: {}, retrying in {} seconds...",
                    gvk.kind, e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;
        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

/// Whether the group-version lists the kind. A group-version that is not
/// served at all counts as not available.
async fn crd_served(client: &Client, gvk: &GroupVersionKind) -> Result<bool, ClusterError> {
    match discovery::pinned_kind(client, gvk).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Discovery(_)) => Ok(false),
        Err(e) => match ClusterError::from(e) {
            ClusterError::NotFound(_) => Ok(false),
            other => Err(other),
        },
    }
}
