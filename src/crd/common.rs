//! # Common Configuration
//!
//! Configuration blocks shared by `ExternalSecretsConfig` (per-deployment) and
//! `ExternalSecretsManager` (operator-wide). Values set on the per-deployment
//! resource take precedence over the operator-wide ones.

use k8s_openapi::api::core::v1::Affinity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Enabled/Disabled switch used by optional features
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
pub enum Mode {
    Enabled,
    #[default]
    Disabled,
}

impl Mode {
    #[must_use]
    pub fn is_enabled(self) -> bool {
        self == Mode::Enabled
    }
}

/// Settings applied to every managed workload
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonConfigs {
    /// Labels added to every managed object
    /// Keys under reserved domains (kubernetes.io, k8s.io, openshift.io, external-secrets.io) are dropped
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations added to every managed workload and its pod template
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Compute resources for operand containers
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    /// Scheduling constraints for operand pods
    #[serde(default)]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub affinity: Option<Affinity>,
    /// Tolerations for operand pods
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    /// Node selector for operand pods
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Proxy settings propagated to operand containers
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
}

/// Container resource requirements as user input
///
/// Quantities stay strings here; they are validated and converted to
/// `k8s_openapi` quantities by the desired-state builder.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

impl ResourceRequirements {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty() && self.requests.is_empty()
    }
}

/// Pod toleration as user input
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(default)]
    pub key: Option<String>,
    /// Exists or Equal (default Equal)
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    /// NoSchedule, PreferNoSchedule or NoExecute; empty matches all effects
    #[serde(default)]
    pub effect: Option<String>,
    #[serde(default)]
    pub toleration_seconds: Option<i64>,
}

/// Outbound proxy settings
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub https_proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Option<String>,
}

impl ProxyConfig {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.http_proxy.as_deref().is_none_or(str::is_empty)
            && self.https_proxy.as_deref().is_none_or(str::is_empty)
            && self.no_proxy.as_deref().is_none_or(str::is_empty)
    }
}
