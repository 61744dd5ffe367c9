//! # ExternalSecretsConfig
//!
//! Per-deployment configuration of the external-secrets operand. This is the
//! primary resource: one reconcile pass converges the whole operand from it.

use crate::crd::{CommonConfigs, ConditionalStatus, LogLevel, Mode};
use serde::{Deserialize, Serialize};

/// ExternalSecretsConfig Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: operator.openshift.io/v1alpha1
/// kind: ExternalSecretsConfig
/// metadata:
///   name: cluster
/// spec:
///   appConfig:
///     logLevel: debug
///   controllerConfig:
///     certProvider:
///       certManager:
///         mode: Enabled
///         injectAnnotations: true
///         issuerRef:
///           name: cluster-issuer
///           kind: ClusterIssuer
///   plugins:
///     bitwardenSecretManagerProvider:
///       mode: Enabled
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[kube(
    kind = "ExternalSecretsConfig",
    group = "operator.openshift.io",
    version = "v1alpha1",
    status = "crate::crd::ExternalSecretsConfigStatus",
    shortname = "esc",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Degraded", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Degraded\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretsConfigSpec {
    /// Operand application settings
    #[serde(default)]
    pub app_config: ApplicationConfig,
    /// Operator-side settings for the operand controllers
    #[serde(default)]
    pub controller_config: ControllerConfigSpec,
    /// Optional provider plugins
    #[serde(default)]
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationConfig {
    /// Operand log level; falls back to the global config, then INFO
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    /// Restrict the operand controller to a single namespace
    #[serde(default)]
    pub operating_namespace: Option<String>,
    #[serde(default)]
    pub webhook_config: Option<WebhookConfig>,
    #[serde(flatten)]
    pub common: CommonConfigs,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// How often the webhook checks its serving certificate (duration string, e.g. "5m")
    #[serde(default)]
    pub certificate_check_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfigSpec {
    #[serde(default)]
    pub cert_provider: Option<CertProvidersConfig>,
    /// Labels applied to managed objects, above the global config labels
    #[serde(default)]
    pub labels: std::collections::BTreeMap<String, String>,
    /// Additional egress policies for operand components
    #[serde(default)]
    pub network_policies: Vec<NetworkPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertProvidersConfig {
    #[serde(default)]
    pub cert_manager: Option<CertManagerConfig>,
}

/// cert-manager integration for the webhook and plugin serving certificates
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertManagerConfig {
    #[serde(default)]
    pub mode: Mode,
    /// Annotate webhook configurations so cert-manager injects the CA bundle
    #[serde(default)]
    pub inject_annotations: bool,
    #[serde(default)]
    pub issuer_ref: Option<ObjectReference>,
    #[serde(default)]
    pub certificate_duration: Option<String>,
    #[serde(default)]
    pub certificate_renew_before: Option<String>,
}

/// Reference to a cert-manager issuer
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

/// User-declared egress policy for one operand component
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicy {
    pub name: String,
    /// ExternalSecretsCoreController or BitwardenSDKServer
    pub component_name: String,
    #[serde(default)]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields_list")]
    pub egress: Vec<k8s_openapi::api::networking::v1::NetworkPolicyEgressRule>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginsConfig {
    #[serde(default)]
    pub bitwarden_secret_manager_provider: Option<BitwardenSecretManagerProvider>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BitwardenSecretManagerProvider {
    #[serde(default)]
    pub mode: Mode,
    /// Existing secret holding the plugin's TLS material when cert-manager is not used
    #[serde(default)]
    pub secret_ref: Option<SecretReference>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
pub struct SecretReference {
    pub name: String,
}

/// Status of the ExternalSecretsConfig resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretsConfigStatus {
    #[serde(flatten)]
    pub conditional: ConditionalStatus,
    /// Generation of the spec the current conditions describe
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// external-secrets image currently deployed
    #[serde(default)]
    pub external_secrets_image: Option<String>,
    /// bitwarden-sdk-server image currently deployed
    #[serde(default)]
    pub bitwarden_sdk_server_image: Option<String>,
}

impl ExternalSecretsConfigSpec {
    /// cert-manager settings, only when the mode is enabled
    #[must_use]
    pub fn cert_manager(&self) -> Option<&CertManagerConfig> {
        self.controller_config
            .cert_provider
            .as_ref()
            .and_then(|p| p.cert_manager.as_ref())
            .filter(|c| c.mode.is_enabled())
    }

    /// Bitwarden plugin settings, only when the mode is enabled
    #[must_use]
    pub fn bitwarden(&self) -> Option<&BitwardenSecretManagerProvider> {
        self.plugins
            .bitwarden_secret_manager_provider
            .as_ref()
            .filter(|b| b.mode.is_enabled())
    }
}
