//! # ExternalSecretsManager
//!
//! Operator-wide configuration. Its common configs sit below the per-deployment
//! `ExternalSecretsConfig` values in precedence.

use crate::crd::{CommonConfigs, ConditionalStatus, LogLevel};
use serde::{Deserialize, Serialize};

#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[kube(
    kind = "ExternalSecretsManager",
    group = "operator.openshift.io",
    version = "v1alpha1",
    status = "crate::crd::ExternalSecretsManagerStatus",
    shortname = "esm",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretsManagerSpec {
    #[serde(default)]
    pub global_config: Option<GlobalConfig>,
}

/// Defaults applied to all operand workloads
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    #[serde(flatten)]
    pub common: CommonConfigs,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretsManagerStatus {
    #[serde(flatten)]
    pub conditional: ConditionalStatus,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl ExternalSecretsManagerSpec {
    /// Common configs from the global block, if any
    #[must_use]
    pub fn common(&self) -> Option<&CommonConfigs> {
        self.global_config.as_ref().map(|g| &g.common)
    }
}
