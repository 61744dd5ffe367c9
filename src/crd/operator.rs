//! # ExternalSecretsOperator
//!
//! Status-only top resource. The status fan-in controller republishes the
//! conditions of every cooperating controller here, one bucket per controller.

use crate::crd::ControllerStatus;
use serde::{Deserialize, Serialize};

#[allow(
    clippy::empty_structs_with_brackets,
    reason = "spec must serialize as an empty object"
)]
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[kube(
    kind = "ExternalSecretsOperator",
    group = "operator.openshift.io",
    version = "v1alpha1",
    status = "crate::crd::ExternalSecretsOperatorStatus",
    shortname = "eso"
)]
pub struct ExternalSecretsOperatorSpec {}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretsOperatorStatus {
    /// One entry per cooperating controller, keyed by controller name
    #[serde(default)]
    pub controller_statuses: Vec<ControllerStatus>,
    /// Last time any bucket changed (RFC3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
}

impl ExternalSecretsOperatorStatus {
    #[must_use]
    pub fn controller(&self, name: &str) -> Option<&ControllerStatus> {
        self.controller_statuses.iter().find(|s| s.name == name)
    }
}
