//! # Desired State Builder
//!
//! Turns the `ExternalSecretsConfig` spec, the optional global config and the
//! operand images from the environment into the ordered list of objects one pass
//! converges, plus the objects to delete because their feature is off.
//!
//! ## Precedence
//!
//! - Labels: global config < config common labels < controller labels < identity labels
//! - Overlays (resources, affinity, tolerations, node selector, proxy): config wins over global, per field
//! - Log level: config, then global, then `info`
//!
//! Inclusion of optional objects depends on the cert-manager mode (and whether
//! cert-manager is installed) and on the bitwarden plugin mode.

pub mod labels;
pub mod network_policy;
pub mod overlay;
pub mod validation;
pub mod workloads;

use crate::assets::{self, asset};
use crate::config::ControllerConfig;
use crate::constants::{
    CERT_MANAGER_INJECT_CA_ANNOTATION, DEFAULT_CERTIFICATE_CHECK_INTERVAL,
    ENV_BITWARDEN_IMAGE, ENV_EXTERNAL_SECRETS_IMAGE, OPERAND_NAMESPACE,
};
use crate::controller::capability::{Capability, CapabilityRegistry};
use crate::controller::errors::ReconcileError;
use crate::controller::resources::{
    Inclusion, ManagedKind, ManagedObject, ObjectKey, ResourceDescriptor, StaleObject,
};
use crate::crd::{
    BitwardenSecretManagerProvider, CertManagerConfig, Certificate, ExternalSecretsConfigSpec,
    GlobalConfig, IssuerRef, LogLevel, NetworkPolicy as NetworkPolicySpec,
};
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use overlay::WorkloadOverlay;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use workloads::WorkloadSettings;

/// Name of the bitwarden TLS material (Certificate, its Secret and the pod volume)
pub const BITWARDEN_TLS_NAME: &str = "bitwarden-tls-certs";

/// Certificate the webhook configurations take their CA bundle from
const WEBHOOK_CERTIFICATE: &str = "external-secrets-webhook";

/// Merged view of every configuration input of one pass
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredConfig {
    pub log_level: LogLevel,
    pub operating_namespace: Option<String>,
    pub certificate_check_interval: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub overlay: WorkloadOverlay,
    /// Set only when cert-manager mode is enabled
    pub cert_manager: Option<CertManagerConfig>,
    /// Set only when the plugin is enabled
    pub bitwarden: Option<BitwardenSecretManagerProvider>,
    pub network_policies: Vec<NetworkPolicySpec>,
    pub external_secrets_image: String,
    pub bitwarden_image: Option<String>,
}

impl DesiredConfig {
    /// Merge and validate every input
    ///
    /// # Errors
    ///
    /// Irrecoverable on invalid user input or a missing image reference.
    pub fn merge(
        spec: &ExternalSecretsConfigSpec,
        global: Option<&GlobalConfig>,
        config: &ControllerConfig,
    ) -> Result<Self, ReconcileError> {
        let app = &spec.app_config;
        let global_common = global.map(|g| &g.common);

        let mut errors = validation::validate_common(&app.common, "spec.appConfig");
        validation::validate_labels(
            &spec.controller_config.labels,
            "spec.controllerConfig.labels",
            &mut errors,
        );
        if let Some(common) = global_common {
            errors.extend(validation::validate_common(
                common,
                "ExternalSecretsManager spec.globalConfig",
            ));
        }
        if let Some(namespace) = &app.operating_namespace {
            if !validation::is_dns_label(namespace) {
                errors.push(format!("spec.appConfig.operatingNamespace: invalid namespace {namespace:?}"));
            }
        }
        let certificate_check_interval = app
            .webhook_config
            .as_ref()
            .and_then(|w| w.certificate_check_interval.clone())
            .unwrap_or_else(|| DEFAULT_CERTIFICATE_CHECK_INTERVAL.to_string());
        if !validation::is_duration(&certificate_check_interval) {
            errors.push(format!(
                "spec.appConfig.webhookConfig.certificateCheckInterval: invalid duration {certificate_check_interval:?}"
            ));
        }
        let cert_manager = spec.cert_manager().cloned();
        if let Some(cm) = &cert_manager {
            validate_cert_manager(cm, &mut errors);
        }
        let bitwarden = spec.bitwarden().cloned();
        if let Some(bw) = &bitwarden {
            let has_secret = bw.secret_ref.as_ref().is_some_and(|s| !s.name.is_empty());
            if cert_manager.is_none() && !has_secret {
                errors.push(
                    "spec.plugins.bitwardenSecretManagerProvider.secretRef: required when cert-manager mode is disabled"
                        .to_string(),
                );
            }
        }
        if !errors.is_empty() {
            return Err(ReconcileError::irrecoverable("InvalidConfiguration", errors.join("; ")));
        }

        let external_secrets_image = config.external_secrets_image.clone().ok_or_else(|| {
            ReconcileError::irrecoverable(
                "MissingImage",
                format!("environment variable {ENV_EXTERNAL_SECRETS_IMAGE} is not set"),
            )
        })?;
        let bitwarden_image = match &bitwarden {
            Some(_) => Some(config.bitwarden_image.clone().ok_or_else(|| {
                ReconcileError::irrecoverable(
                    "MissingImage",
                    format!("environment variable {ENV_BITWARDEN_IMAGE} is not set"),
                )
            })?),
            None => None,
        };

        let empty = BTreeMap::new();
        let labels = labels::merge_labels(&[
            global_common.map_or(&empty, |c| &c.labels),
            &app.common.labels,
            &spec.controller_config.labels,
        ]);
        let annotations = labels::merge_annotations(&[
            global_common.map_or(&empty, |c| &c.annotations),
            &app.common.annotations,
        ]);

        Ok(Self {
            log_level: app
                .log_level
                .or_else(|| global.and_then(|g| g.log_level))
                .unwrap_or_default(),
            operating_namespace: app.operating_namespace.clone(),
            certificate_check_interval,
            labels,
            annotations,
            overlay: WorkloadOverlay::resolve(&app.common, global_common),
            cert_manager,
            bitwarden,
            network_policies: spec.controller_config.network_policies.clone(),
            external_secrets_image,
            bitwarden_image,
        })
    }

    #[must_use]
    pub fn cert_manager_enabled(&self) -> bool {
        self.cert_manager.is_some()
    }

    #[must_use]
    pub fn bitwarden_enabled(&self) -> bool {
        self.bitwarden.is_some()
    }
}

fn validate_cert_manager(cm: &CertManagerConfig, errors: &mut Vec<String>) {
    let path = "spec.controllerConfig.certProvider.certManager";
    match &cm.issuer_ref {
        Some(issuer) if !issuer.name.is_empty() => {
            if let Some(kind) = issuer.kind.as_deref() {
                if !matches!(kind, "Issuer" | "ClusterIssuer") && issuer.group.is_none() {
                    errors.push(format!("{path}.issuerRef.kind: unsupported issuer kind {kind:?}"));
                }
            }
        }
        _ => errors.push(format!("{path}.issuerRef.name: required when mode is Enabled")),
    }
    for (field, value) in [
        ("certificateDuration", &cm.certificate_duration),
        ("certificateRenewBefore", &cm.certificate_renew_before),
    ] {
        if let Some(value) = value {
            if !validation::is_duration(value) {
                errors.push(format!("{path}.{field}: invalid duration {value:?}"));
            }
        }
    }
}

/// Output of one build
#[derive(Debug, Clone)]
pub struct DesiredState {
    /// Objects to converge, in application order
    pub descriptors: Vec<ResourceDescriptor>,
    /// Objects of disabled features to delete
    pub stale: Vec<StaleObject>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub external_secrets_image: String,
    pub bitwarden_image: Option<String>,
}

impl DesiredState {
    /// Descriptor for `kind` `name`, if part of the desired set
    #[must_use]
    pub fn find(&self, kind: ManagedKind, name: &str) -> Option<&ResourceDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.kind == kind && d.key.name == name)
    }
}

/// Build the desired state of one pass
///
/// # Errors
///
/// Irrecoverable on invalid input, a missing image, or cert-manager mode enabled
/// while the Certificate kind is not installed.
pub fn build(
    spec: &ExternalSecretsConfigSpec,
    global: Option<&GlobalConfig>,
    config: &ControllerConfig,
    capabilities: &CapabilityRegistry,
) -> Result<DesiredState, ReconcileError> {
    let desired = DesiredConfig::merge(spec, global, config)?;
    build_from(&desired, capabilities)
}

/// Build from an already merged configuration
///
/// # Errors
///
/// See [`build`].
pub fn build_from(
    desired: &DesiredConfig,
    capabilities: &CapabilityRegistry,
) -> Result<DesiredState, ReconcileError> {
    if desired.cert_manager_enabled() && !capabilities.has_certificates() {
        return Err(ReconcileError::irrecoverable(
            "CapabilityMissing",
            format!(
                "cert-manager mode is enabled but {} is not installed in the cluster",
                Capability::Certificates
            ),
        ));
    }

    let mut builder = Builder::new(desired);
    builder.namespace()?;
    builder.service_accounts()?;
    builder.certificates()?;
    builder.secrets()?;
    builder.rbac()?;
    builder.network_policies()?;
    builder.services()?;
    builder.deployments()?;
    builder.webhooks()?;

    let mut descriptors = builder.descriptors;
    descriptors.sort_by_key(|d| d.kind);

    let mut stale = Vec::new();
    if !desired.bitwarden_enabled() && capabilities.has_certificates() {
        stale.push(StaleObject {
            kind: ManagedKind::Certificate,
            key: ObjectKey::namespaced(OPERAND_NAMESPACE, BITWARDEN_TLS_NAME),
        });
    }

    Ok(DesiredState {
        descriptors,
        stale,
        labels: desired.labels.clone(),
        annotations: desired.annotations.clone(),
        external_secrets_image: desired.external_secrets_image.clone(),
        bitwarden_image: desired.bitwarden_image.clone(),
    })
}

/// Decode an embedded template
fn load<K: DeserializeOwned>(name: &'static str) -> Result<K, ReconcileError> {
    serde_yaml::from_slice(asset(name)).map_err(|e| {
        ReconcileError::irrecoverable("AssetDecodeFailed", format!("failed to decode asset {name}: {e}"))
            .with_cause(e)
    })
}

struct Builder<'a> {
    desired: &'a DesiredConfig,
    descriptors: Vec<ResourceDescriptor>,
}

impl<'a> Builder<'a> {
    fn new(desired: &'a DesiredConfig) -> Self {
        Self {
            desired,
            descriptors: Vec::new(),
        }
    }

    fn add(&mut self, name: &'static str, inclusion: Inclusion, mut object: ManagedObject) {
        let namespaced = object.kind().is_namespaced();
        let meta = object.metadata_mut();
        if namespaced {
            meta.namespace = Some(OPERAND_NAMESPACE.to_string());
        }
        meta.labels
            .get_or_insert_with(BTreeMap::new)
            .extend(self.desired.labels.clone());
        self.descriptors
            .push(ResourceDescriptor::new(name, inclusion, object));
    }

    fn add_asset<K: DeserializeOwned>(
        &mut self,
        name: &'static str,
        inclusion: Inclusion,
        wrap: fn(K) -> ManagedObject,
    ) -> Result<(), ReconcileError> {
        let object = wrap(load(name)?);
        self.add(name, inclusion, object);
        Ok(())
    }

    fn namespace(&mut self) -> Result<(), ReconcileError> {
        self.add_asset::<Namespace>(assets::NAMESPACE, Inclusion::Always, ManagedObject::Namespace)
    }

    fn service_accounts(&mut self) -> Result<(), ReconcileError> {
        self.add_asset::<ServiceAccount>(
            assets::SERVICE_ACCOUNT_CONTROLLER,
            Inclusion::Always,
            ManagedObject::ServiceAccount,
        )?;
        self.add_asset::<ServiceAccount>(
            assets::SERVICE_ACCOUNT_WEBHOOK,
            Inclusion::Always,
            ManagedObject::ServiceAccount,
        )?;
        if !self.desired.cert_manager_enabled() {
            self.add_asset::<ServiceAccount>(
                assets::SERVICE_ACCOUNT_CERT_CONTROLLER,
                Inclusion::CertManagerDisabled,
                ManagedObject::ServiceAccount,
            )?;
        }
        if self.desired.bitwarden_enabled() {
            self.add_asset::<ServiceAccount>(
                assets::SERVICE_ACCOUNT_BITWARDEN,
                Inclusion::BitwardenEnabled,
                ManagedObject::ServiceAccount,
            )?;
        }
        Ok(())
    }

    fn certificates(&mut self) -> Result<(), ReconcileError> {
        let Some(cm) = &self.desired.cert_manager else {
            return Ok(());
        };
        let mut names = vec![assets::CERTIFICATE_WEBHOOK];
        if self.desired.bitwarden_enabled() {
            names.push(assets::CERTIFICATE_BITWARDEN);
        }
        for name in names {
            let mut certificate: Certificate = load(name)?;
            if let Some(issuer) = &cm.issuer_ref {
                certificate.spec.issuer_ref = IssuerRef {
                    name: issuer.name.clone(),
                    kind: issuer.kind.clone(),
                    group: issuer.group.clone(),
                };
            }
            certificate.spec.duration.clone_from(&cm.certificate_duration);
            certificate.spec.renew_before.clone_from(&cm.certificate_renew_before);
            self.add(name, Inclusion::CertManagerEnabled, ManagedObject::Certificate(certificate));
        }
        Ok(())
    }

    fn secrets(&mut self) -> Result<(), ReconcileError> {
        if self.desired.cert_manager_enabled() {
            return Ok(());
        }
        self.add_asset::<Secret>(assets::SECRET_WEBHOOK, Inclusion::CertManagerDisabled, ManagedObject::Secret)
    }

    fn rbac(&mut self) -> Result<(), ReconcileError> {
        for name in [
            assets::CLUSTER_ROLE_CONTROLLER,
            assets::CLUSTER_ROLE_VIEW,
            assets::CLUSTER_ROLE_EDIT,
        ] {
            self.add_asset::<ClusterRole>(name, Inclusion::Always, ManagedObject::ClusterRole)?;
        }
        self.add_asset::<ClusterRoleBinding>(
            assets::CLUSTER_ROLE_BINDING_CONTROLLER,
            Inclusion::Always,
            ManagedObject::ClusterRoleBinding,
        )?;
        if !self.desired.cert_manager_enabled() {
            self.add_asset::<ClusterRole>(
                assets::CLUSTER_ROLE_CERT_CONTROLLER,
                Inclusion::CertManagerDisabled,
                ManagedObject::ClusterRole,
            )?;
            self.add_asset::<ClusterRoleBinding>(
                assets::CLUSTER_ROLE_BINDING_CERT_CONTROLLER,
                Inclusion::CertManagerDisabled,
                ManagedObject::ClusterRoleBinding,
            )?;
        }
        self.add_asset::<Role>(assets::ROLE_LEADER_ELECTION, Inclusion::Always, ManagedObject::Role)?;
        self.add_asset::<RoleBinding>(
            assets::ROLE_BINDING_LEADER_ELECTION,
            Inclusion::Always,
            ManagedObject::RoleBinding,
        )
    }

    fn network_policies(&mut self) -> Result<(), ReconcileError> {
        for name in [
            assets::NETWORK_POLICY_DENY_ALL,
            assets::NETWORK_POLICY_MAIN_CONTROLLER,
            assets::NETWORK_POLICY_WEBHOOK,
            assets::NETWORK_POLICY_DNS,
        ] {
            self.add_asset::<NetworkPolicy>(name, Inclusion::Always, ManagedObject::NetworkPolicy)?;
        }
        if !self.desired.cert_manager_enabled() {
            self.add_asset::<NetworkPolicy>(
                assets::NETWORK_POLICY_CERT_CONTROLLER,
                Inclusion::CertManagerDisabled,
                ManagedObject::NetworkPolicy,
            )?;
        }
        if self.desired.bitwarden_enabled() {
            self.add_asset::<NetworkPolicy>(
                assets::NETWORK_POLICY_BITWARDEN,
                Inclusion::BitwardenEnabled,
                ManagedObject::NetworkPolicy,
            )?;
        }
        let reserved = network_policy::built_in_names()?;
        for policy in network_policy::render(&self.desired.network_policies, &reserved)? {
            self.add(
                "controllerConfig.networkPolicies",
                Inclusion::UserNetworkPolicy,
                ManagedObject::NetworkPolicy(policy),
            );
        }
        Ok(())
    }

    fn services(&mut self) -> Result<(), ReconcileError> {
        self.add_asset::<Service>(assets::SERVICE_WEBHOOK, Inclusion::Always, ManagedObject::Service)?;
        self.add_asset::<Service>(assets::SERVICE_METRICS, Inclusion::Always, ManagedObject::Service)?;
        if !self.desired.cert_manager_enabled() {
            self.add_asset::<Service>(
                assets::SERVICE_CERT_CONTROLLER_METRICS,
                Inclusion::CertManagerDisabled,
                ManagedObject::Service,
            )?;
        }
        if self.desired.bitwarden_enabled() {
            self.add_asset::<Service>(
                assets::SERVICE_BITWARDEN,
                Inclusion::BitwardenEnabled,
                ManagedObject::Service,
            )?;
        }
        Ok(())
    }

    fn settings(&self, image: &'a str, args: Vec<(&'static str, String)>) -> WorkloadSettings<'a> {
        WorkloadSettings {
            image,
            args,
            overlay: Some(&self.desired.overlay),
            labels: Some(&self.desired.labels),
            annotations: Some(&self.desired.annotations),
        }
    }

    fn deployment(name: &'static str, settings: &WorkloadSettings<'_>) -> Result<Deployment, ReconcileError> {
        let mut deployment: Deployment = load(name)?;
        workloads::customize(&mut deployment, settings);
        Ok(deployment)
    }

    fn deployments(&mut self) -> Result<(), ReconcileError> {
        let desired = self.desired;
        let image = desired.external_secrets_image.as_str();
        let log_level = desired.log_level.as_arg().to_string();
        let leader_election = ("--enable-leader-election", "true".to_string());

        let mut controller_args = vec![("--loglevel", log_level.clone())];
        if let Some(namespace) = &desired.operating_namespace {
            controller_args.push(("--namespace", namespace.clone()));
        }
        controller_args.push(leader_election.clone());
        let settings = self.settings(image, controller_args);
        let controller = Self::deployment(assets::DEPLOYMENT_CONTROLLER, &settings)?;
        self.add(assets::DEPLOYMENT_CONTROLLER, Inclusion::Always, ManagedObject::Deployment(controller));

        let settings = self.settings(
            image,
            vec![
                ("--loglevel", log_level.clone()),
                ("--check-interval", desired.certificate_check_interval.clone()),
            ],
        );
        let webhook = Self::deployment(assets::DEPLOYMENT_WEBHOOK, &settings)?;
        self.add(assets::DEPLOYMENT_WEBHOOK, Inclusion::Always, ManagedObject::Deployment(webhook));

        if !desired.cert_manager_enabled() {
            let settings = self.settings(image, vec![("--loglevel", log_level), leader_election]);
            let cert_controller =
                Self::deployment(assets::DEPLOYMENT_CERT_CONTROLLER, &settings)?;
            self.add(
                assets::DEPLOYMENT_CERT_CONTROLLER,
                Inclusion::CertManagerDisabled,
                ManagedObject::Deployment(cert_controller),
            );
        }

        if let (Some(bitwarden), Some(bitwarden_image)) = (&desired.bitwarden, &desired.bitwarden_image) {
            let settings = self.settings(bitwarden_image, Vec::new());
            let mut deployment =
                Self::deployment(assets::DEPLOYMENT_BITWARDEN, &settings)?;
            let secret_name = bitwarden
                .secret_ref
                .as_ref()
                .map(|s| s.name.as_str())
                .filter(|n| !n.is_empty())
                .unwrap_or(BITWARDEN_TLS_NAME);
            workloads::set_secret_volume(&mut deployment, BITWARDEN_TLS_NAME, secret_name);
            self.add(
                assets::DEPLOYMENT_BITWARDEN,
                Inclusion::BitwardenEnabled,
                ManagedObject::Deployment(deployment),
            );
        }
        Ok(())
    }

    fn webhooks(&mut self) -> Result<(), ReconcileError> {
        let inject = self
            .desired
            .cert_manager
            .as_ref()
            .is_some_and(|cm| cm.inject_annotations);
        for name in [
            assets::VALIDATING_WEBHOOK_SECRET_STORE,
            assets::VALIDATING_WEBHOOK_EXTERNAL_SECRET,
        ] {
            let mut webhook: ValidatingWebhookConfiguration = load(name)?;
            if inject {
                webhook
                    .metadata
                    .annotations
                    .get_or_insert_with(BTreeMap::new)
                    .insert(
                        CERT_MANAGER_INJECT_CA_ANNOTATION.to_string(),
                        format!("{OPERAND_NAMESPACE}/{WEBHOOK_CERTIFICATE}"),
                    );
            }
            self.add(name, Inclusion::Always, ManagedObject::ValidatingWebhookConfiguration(webhook));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        CertProvidersConfig, Mode, ObjectReference, PluginsConfig, SecretReference,
    };

    fn config() -> ControllerConfig {
        ControllerConfig {
            external_secrets_image: Some("quay.io/external-secrets/external-secrets:v0.10.0".to_string()),
            bitwarden_image: Some("ghcr.io/external-secrets/bitwarden-sdk-server:v0.3.1".to_string()),
            ..ControllerConfig::default()
        }
    }

    fn with_cert_manager(spec: &mut ExternalSecretsConfigSpec, inject: bool) {
        spec.controller_config.cert_provider = Some(CertProvidersConfig {
            cert_manager: Some(CertManagerConfig {
                mode: Mode::Enabled,
                inject_annotations: inject,
                issuer_ref: Some(ObjectReference {
                    name: "cluster-issuer".to_string(),
                    kind: Some("ClusterIssuer".to_string()),
                    group: None,
                }),
                ..CertManagerConfig::default()
            }),
        });
    }

    fn with_bitwarden(spec: &mut ExternalSecretsConfigSpec, secret: Option<&str>) {
        spec.plugins = PluginsConfig {
            bitwarden_secret_manager_provider: Some(BitwardenSecretManagerProvider {
                mode: Mode::Enabled,
                secret_ref: secret.map(|name| SecretReference {
                    name: name.to_string(),
                }),
            }),
        };
    }

    fn names(state: &DesiredState, kind: ManagedKind) -> Vec<String> {
        state
            .descriptors
            .iter()
            .filter(|d| d.kind == kind)
            .map(|d| d.key.name.clone())
            .collect()
    }

    #[test]
    fn test_default_set_is_ordered_and_complete() {
        let state = build(
            &ExternalSecretsConfigSpec::default(),
            None,
            &config(),
            &CapabilityRegistry::none(),
        )
        .unwrap();

        let kinds: Vec<ManagedKind> = state.descriptors.iter().map(|d| d.kind).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);
        assert_eq!(kinds[0], ManagedKind::Namespace);

        assert_eq!(
            names(&state, ManagedKind::ServiceAccount),
            vec![
                "external-secrets",
                "external-secrets-webhook",
                "external-secrets-cert-controller"
            ]
        );
        assert!(names(&state, ManagedKind::Certificate).is_empty());
        assert_eq!(names(&state, ManagedKind::Secret), vec!["external-secrets-webhook"]);
        assert_eq!(names(&state, ManagedKind::Deployment).len(), 3);
        assert_eq!(names(&state, ManagedKind::ValidatingWebhookConfiguration).len(), 2);
        assert!(state.stale.is_empty());
    }

    #[test]
    fn test_every_object_carries_identity_labels_and_namespace() {
        let state = build(
            &ExternalSecretsConfigSpec::default(),
            None,
            &config(),
            &CapabilityRegistry::none(),
        )
        .unwrap();
        for descriptor in &state.descriptors {
            let meta = descriptor.desired.metadata();
            assert_eq!(
                meta.labels.as_ref().and_then(|l| l.get("app")).map(String::as_str),
                Some("external-secrets"),
                "{}",
                descriptor.describe()
            );
            assert_eq!(
                meta.namespace.is_some(),
                descriptor.kind.is_namespaced(),
                "{}",
                descriptor.describe()
            );
        }
    }

    #[test]
    fn test_cert_manager_without_capability_is_irrecoverable() {
        let mut spec = ExternalSecretsConfigSpec::default();
        with_cert_manager(&mut spec, false);
        let err = build(&spec, None, &config(), &CapabilityRegistry::none()).unwrap_err();
        assert!(err.is_irrecoverable());
        assert_eq!(err.reason, "CapabilityMissing");
        assert!(err.message.contains("cert-manager.io/v1/Certificate"));
    }

    #[test]
    fn test_cert_manager_replaces_cert_controller() {
        let mut spec = ExternalSecretsConfigSpec::default();
        with_cert_manager(&mut spec, true);
        with_bitwarden(&mut spec, None);
        let caps = CapabilityRegistry::new([Capability::Certificates]);
        let state = build(&spec, None, &config(), &caps).unwrap();

        assert_eq!(
            names(&state, ManagedKind::Certificate),
            vec!["external-secrets-webhook", "bitwarden-tls-certs"]
        );
        assert!(names(&state, ManagedKind::Secret).is_empty());
        assert!(!names(&state, ManagedKind::Deployment).contains(&"external-secrets-cert-controller".to_string()));
        assert!(names(&state, ManagedKind::Deployment).contains(&"bitwarden-sdk-server".to_string()));

        let Some(ManagedObject::Certificate(cert)) = state
            .find(ManagedKind::Certificate, "external-secrets-webhook")
            .map(|d| &d.desired)
        else {
            panic!("webhook certificate missing");
        };
        assert_eq!(cert.spec.issuer_ref.name, "cluster-issuer");

        let Some(ManagedObject::ValidatingWebhookConfiguration(hook)) = state
            .find(ManagedKind::ValidatingWebhookConfiguration, "secretstore-validate")
            .map(|d| &d.desired)
        else {
            panic!("webhook configuration missing");
        };
        assert_eq!(
            hook.metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(CERT_MANAGER_INJECT_CA_ANNOTATION))
                .map(String::as_str),
            Some("external-secrets/external-secrets-webhook")
        );
        assert!(state.stale.is_empty());
    }

    #[test]
    fn test_disabled_bitwarden_certificate_is_stale_when_capability_present() {
        let caps = CapabilityRegistry::new([Capability::Certificates]);
        let state = build(&ExternalSecretsConfigSpec::default(), None, &config(), &caps).unwrap();
        assert_eq!(state.stale.len(), 1);
        assert_eq!(state.stale[0].key.name, "bitwarden-tls-certs");
    }

    #[test]
    fn test_bitwarden_without_tls_source_is_irrecoverable() {
        let mut spec = ExternalSecretsConfigSpec::default();
        with_bitwarden(&mut spec, None);
        let err = build(&spec, None, &config(), &CapabilityRegistry::none()).unwrap_err();
        assert!(err.is_irrecoverable());
        assert!(err.message.contains("secretRef"));
    }

    #[test]
    fn test_bitwarden_uses_secret_ref_and_its_image() {
        let mut spec = ExternalSecretsConfigSpec::default();
        with_bitwarden(&mut spec, Some("my-bitwarden-tls"));
        let state = build(&spec, None, &config(), &CapabilityRegistry::none()).unwrap();
        let Some(ManagedObject::Deployment(deployment)) = state
            .find(ManagedKind::Deployment, "bitwarden-sdk-server")
            .map(|d| &d.desired)
        else {
            panic!("bitwarden deployment missing");
        };
        assert_eq!(
            workloads::image_of(deployment),
            Some("ghcr.io/external-secrets/bitwarden-sdk-server:v0.3.1")
        );
        let pod = deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(
            pod.volumes.as_ref().unwrap()[0]
                .secret
                .as_ref()
                .unwrap()
                .secret_name
                .as_deref(),
            Some("my-bitwarden-tls")
        );
        assert_eq!(
            state.bitwarden_image.as_deref(),
            Some("ghcr.io/external-secrets/bitwarden-sdk-server:v0.3.1")
        );
    }

    #[test]
    fn test_missing_image_is_irrecoverable() {
        let err = build(
            &ExternalSecretsConfigSpec::default(),
            None,
            &ControllerConfig::default(),
            &CapabilityRegistry::none(),
        )
        .unwrap_err();
        assert!(err.is_irrecoverable());
        assert!(err.message.contains("RELATED_IMAGE_EXTERNAL_SECRETS"));
    }

    #[test]
    fn test_controller_args_and_log_level_fallback() {
        let mut spec = ExternalSecretsConfigSpec::default();
        spec.app_config.operating_namespace = Some("team-a".to_string());
        let global = GlobalConfig {
            log_level: Some(LogLevel::Debug),
            ..GlobalConfig::default()
        };
        let state = build(&spec, Some(&global), &config(), &CapabilityRegistry::none()).unwrap();
        let Some(ManagedObject::Deployment(deployment)) = state
            .find(ManagedKind::Deployment, "external-secrets")
            .map(|d| &d.desired)
        else {
            panic!("controller deployment missing");
        };
        let args = deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .args
            .clone()
            .unwrap();
        assert!(args.contains(&"--loglevel=debug".to_string()));
        assert!(args.contains(&"--namespace=team-a".to_string()));
        assert!(args.contains(&"--enable-leader-election=true".to_string()));
    }

    #[test]
    fn test_label_precedence_reaches_objects() {
        let mut spec = ExternalSecretsConfigSpec::default();
        spec.app_config.common.labels = BTreeMap::from([
            ("a".to_string(), "2".to_string()),
            ("app.kubernetes.io/managed-by".to_string(), "me".to_string()),
        ]);
        let global = GlobalConfig {
            common: crate::crd::CommonConfigs {
                labels: BTreeMap::from([("a".to_string(), "1".to_string())]),
                ..crate::crd::CommonConfigs::default()
            },
            ..GlobalConfig::default()
        };
        let state = build(&spec, Some(&global), &config(), &CapabilityRegistry::none()).unwrap();
        assert_eq!(state.labels.get("a").map(String::as_str), Some("2"));
        assert_eq!(
            state.labels.get("app.kubernetes.io/managed-by").map(String::as_str),
            Some("external-secrets-operator")
        );
    }

    #[test]
    fn test_invalid_overlay_reports_field_path() {
        let mut spec = ExternalSecretsConfigSpec::default();
        spec.app_config.common.resources = Some(crate::crd::ResourceRequirements {
            limits: BTreeMap::from([("cpu".to_string(), "100m".to_string())]),
            requests: BTreeMap::from([("cpu".to_string(), "2".to_string())]),
        });
        let err = build(&spec, None, &config(), &CapabilityRegistry::none()).unwrap_err();
        assert!(err.is_irrecoverable());
        assert!(err.message.contains("spec.appConfig.resources.requests[cpu]"));
    }

    #[test]
    fn test_user_network_policies_are_added() {
        let mut spec = ExternalSecretsConfigSpec::default();
        spec.controller_config.network_policies = vec![NetworkPolicySpec {
            name: "allow-vault-egress".to_string(),
            component_name: "ExternalSecretsCoreController".to_string(),
            egress: Vec::new(),
        }];
        let state = build(&spec, None, &config(), &CapabilityRegistry::none()).unwrap();
        let descriptor = state
            .find(ManagedKind::NetworkPolicy, "allow-vault-egress")
            .unwrap();
        assert_eq!(descriptor.inclusion, Inclusion::UserNetworkPolicy);
    }
}
