//! # Status Types
//!
//! Condition and controller-status types shared by every custom resource status.

use serde::{Deserialize, Serialize};

/// Condition represents one observation of a resource's state
///
/// Unique by `type` within its holder.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (Ready, Degraded)
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Machine-readable reason for the last transition
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
    /// Generation of the holder this condition was computed from
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Last time `status` changed (RFC3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
}

impl Condition {
    #[must_use]
    pub fn new(r#type: &str, status: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            reason: Some(reason.to_string()),
            message: Some(message.into()),
            observed_generation: None,
            last_transition_time: None,
        }
    }

    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Condition list embedded in every status struct
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ConditionalStatus {
    /// Find a condition by type
    #[must_use]
    pub fn get(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// True when the condition of the given type exists and is `True`
    #[must_use]
    pub fn is_true(&self, r#type: &str) -> bool {
        self.get(r#type).is_some_and(Condition::is_true)
    }
}

/// Health of one cooperating controller, republished by the status fan-in
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    /// Identity of the controller owning this bucket
    pub name: String,
    #[serde(flatten)]
    pub conditional: ConditionalStatus,
    /// Generation of the child resource the conditions were computed from
    #[serde(default)]
    pub observed_generation: Option<i64>,
}
