//! # Custom Resource Definitions
//!
//! CRD types read and written by the operator.
//!
//! ## Module Structure
//!
//! - `config.rs` - `ExternalSecretsConfig`, the per-deployment primary resource
//! - `manager.rs` - `ExternalSecretsManager`, operator-wide global config
//! - `operator.rs` - `ExternalSecretsOperator`, status-only aggregate of controller health
//! - `common.rs` - configuration blocks shared by the two config kinds
//! - `status.rs` - conditions and controller-status buckets
//! - `certificate.rs` - client model of the optional cert-manager `Certificate`
//! - `logging.rs` - operand log level

mod certificate;
mod common;
mod config;
mod logging;
mod manager;
mod operator;
mod status;

pub use certificate::{Certificate, CertificatePrivateKey, CertificateSpec, IssuerRef};
pub use common::{CommonConfigs, Mode, ProxyConfig, ResourceRequirements, Toleration};
pub use config::{
    ApplicationConfig, BitwardenSecretManagerProvider, CertManagerConfig, CertProvidersConfig,
    ControllerConfigSpec, ExternalSecretsConfig, ExternalSecretsConfigSpec,
    ExternalSecretsConfigStatus, NetworkPolicy, ObjectReference, PluginsConfig, SecretReference,
    WebhookConfig,
};
pub use logging::LogLevel;
pub use manager::{
    ExternalSecretsManager, ExternalSecretsManagerSpec, ExternalSecretsManagerStatus, GlobalConfig,
};
pub use operator::{ExternalSecretsOperator, ExternalSecretsOperatorSpec, ExternalSecretsOperatorStatus};
pub use status::{Condition, ConditionalStatus, ControllerStatus};

/// Schema for embedded Kubernetes types whose full OpenAPI schema is owned by the API server
pub(crate) fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

/// List variant of [`preserve_unknown_fields`]
pub(crate) fn preserve_unknown_fields_list(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    })
}
