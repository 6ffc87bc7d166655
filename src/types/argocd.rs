// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::types::common::{AddonObject, CommonSpec, CommonStatus, PatchSpec};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(
    group = "addons.configdelivery.anthos.io",
    version = "v1alpha1",
    kind = "ArgoCD",
    plural = "argocds"
)]
#[kube(status = "ArgoCDStatus")]
#[kube(printcolumn = r#"{"name":"Healthy","type":"boolean","jsonPath":".status.healthy"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(flatten)]
    pub patch: PatchSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDStatus {
    #[serde(flatten)]
    pub common: CommonStatus,
}

impl AddonObject for ArgoCD {
    fn component_name(&self) -> &'static str {
        "argocd"
    }

    fn common_spec(&self) -> &CommonSpec {
        &self.spec.common
    }

    fn patch_spec(&self) -> &PatchSpec {
        &self.spec.patch
    }

    fn common_status(&self) -> Option<&CommonStatus> {
        self.status.as_ref().map(|s| &s.common)
    }

    fn set_common_status(&mut self, status: CommonStatus) {
        self.status = Some(ArgoCDStatus { common: status });
    }
}
