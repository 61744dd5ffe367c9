//! # Drift Detection
//!
//! Per-kind comparison of a live object against its desired form.
//!
//! Each predicate compares only fields this operator owns and is ANDed with a
//! kind-agnostic label-set predicate. An empty or unset desired value means "no
//! opinion" and is skipped, so values other actors set on the live object stay.
//! A non-empty desired value always wins when it differs.

use crate::constants::CERT_MANAGER_INJECT_CA_ANNOTATION;
use crate::controller::quantity;
use crate::controller::resources::ManagedObject;
use crate::crd::CertificateSpec;
use k8s_openapi::api::admissionregistration::v1::{ValidatingWebhook, ValidatingWebhookConfiguration};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements, Service, Volume};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::trace;

/// Whether `live` has drifted from `desired`
#[must_use]
pub fn has_drifted(live: &ManagedObject, desired: &ManagedObject) -> bool {
    if labels_differ(live.metadata(), desired.metadata()) {
        trace!(object = %desired.describe(), "labels differ");
        return true;
    }
    match (live, desired) {
        (ManagedObject::Namespace(_), ManagedObject::Namespace(_))
        | (ManagedObject::Secret(_), ManagedObject::Secret(_)) => false,
        (ManagedObject::ServiceAccount(l), ManagedObject::ServiceAccount(d)) => {
            opt_differs(&l.automount_service_account_token, &d.automount_service_account_token)
        }
        (ManagedObject::Certificate(l), ManagedObject::Certificate(d)) => {
            certificate_differs(&l.spec, &d.spec)
        }
        (ManagedObject::ClusterRole(l), ManagedObject::ClusterRole(d)) => {
            list_differs(&l.rules, &d.rules) || opt_differs(&l.aggregation_rule, &d.aggregation_rule)
        }
        (ManagedObject::Role(l), ManagedObject::Role(d)) => list_differs(&l.rules, &d.rules),
        (ManagedObject::ClusterRoleBinding(l), ManagedObject::ClusterRoleBinding(d)) => {
            binding_differs(l, d)
        }
        (ManagedObject::RoleBinding(l), ManagedObject::RoleBinding(d)) => binding_differs(l, d),
        (ManagedObject::NetworkPolicy(l), ManagedObject::NetworkPolicy(d)) => {
            owned_fields_differ(&l.spec, &d.spec)
        }
        (ManagedObject::Service(l), ManagedObject::Service(d)) => service_differs(l, d),
        (ManagedObject::Deployment(l), ManagedObject::Deployment(d)) => deployment_differs(l, d),
        (
            ManagedObject::ValidatingWebhookConfiguration(l),
            ManagedObject::ValidatingWebhookConfiguration(d),
        ) => webhook_configuration_differs(l, d),
        _ => true,
    }
}

/// Label-set equality, skipped when nothing is desired
#[must_use]
pub fn labels_differ(live: &ObjectMeta, desired: &ObjectMeta) -> bool {
    map_differs(&live.labels, &desired.labels)
}

fn opt_differs<T: PartialEq>(live: &Option<T>, desired: &Option<T>) -> bool {
    desired.is_some() && live != desired
}

fn list_differs<T: PartialEq>(live: &Option<Vec<T>>, desired: &Option<Vec<T>>) -> bool {
    match desired {
        Some(d) if !d.is_empty() => live.as_deref().unwrap_or_default() != d.as_slice(),
        _ => false,
    }
}

fn map_differs(
    live: &Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) -> bool {
    match desired {
        Some(d) if !d.is_empty() => live.as_ref() != Some(d),
        _ => false,
    }
}

/// Every desired entry must be present in live; extra live entries are ignored
fn map_subset_differs(
    live: &Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) -> bool {
    let Some(desired) = desired else {
        return false;
    };
    let empty = BTreeMap::new();
    let live = live.as_ref().unwrap_or(&empty);
    desired.iter().any(|(k, v)| live.get(k) != Some(v))
}

/// Compare the top-level fields set in `desired` after JSON encoding
///
/// Used where the API server fills in defaults beside the owned fields.
fn owned_fields_differ<T: Serialize>(live: &Option<T>, desired: &Option<T>) -> bool {
    let Some(desired) = desired else {
        return false;
    };
    let (Ok(serde_json::Value::Object(d)), Ok(l)) =
        (serde_json::to_value(desired), serde_json::to_value(live))
    else {
        return true;
    };
    d.iter()
        .filter(|(_, v)| !is_empty_json(v))
        .any(|(k, v)| l.get(k) != Some(v))
}

fn is_empty_json(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn certificate_differs(live: &CertificateSpec, desired: &CertificateSpec) -> bool {
    live.secret_name != desired.secret_name
        || live.issuer_ref != desired.issuer_ref
        || (!desired.dns_names.is_empty() && live.dns_names != desired.dns_names)
        || opt_differs(&live.common_name, &desired.common_name)
        || opt_differs(&live.duration, &desired.duration)
        || opt_differs(&live.renew_before, &desired.renew_before)
        || opt_differs(&live.private_key, &desired.private_key)
}

/// Objects that bind subjects to a role
pub trait BindingLike {
    fn subjects(&self) -> &[Subject];
    fn role_ref(&self) -> &RoleRef;
}

impl BindingLike for ClusterRoleBinding {
    fn subjects(&self) -> &[Subject] {
        self.subjects.as_deref().unwrap_or_default()
    }

    fn role_ref(&self) -> &RoleRef {
        &self.role_ref
    }
}

impl BindingLike for RoleBinding {
    fn subjects(&self) -> &[Subject] {
        self.subjects.as_deref().unwrap_or_default()
    }

    fn role_ref(&self) -> &RoleRef {
        &self.role_ref
    }
}

fn binding_differs<B: BindingLike>(live: &B, desired: &B) -> bool {
    live.role_ref() != desired.role_ref()
        || (!desired.subjects().is_empty() && live.subjects() != desired.subjects())
}

fn service_differs(live: &Service, desired: &Service) -> bool {
    let (Some(l), Some(d)) = (live.spec.as_ref(), desired.spec.as_ref()) else {
        return desired.spec.is_some();
    };
    if map_differs(&l.selector, &d.selector) || opt_differs(&l.type_, &d.type_) {
        return true;
    }
    let desired_ports = d.ports.as_deref().unwrap_or_default();
    let live_ports = l.ports.as_deref().unwrap_or_default();
    if desired_ports.is_empty() {
        return false;
    }
    desired_ports.len() != live_ports.len()
        || desired_ports.iter().zip(live_ports).any(|(d, l)| {
            d.port != l.port
                || d.name != l.name
                || opt_differs(&l.target_port, &d.target_port)
                || opt_differs(&l.protocol, &d.protocol)
        })
}

fn deployment_differs(live: &Deployment, desired: &Deployment) -> bool {
    let (Some(l), Some(d)) = (live.spec.as_ref(), desired.spec.as_ref()) else {
        return desired.spec.is_some();
    };
    if opt_differs(&l.replicas, &d.replicas) {
        return true;
    }
    let empty = ObjectMeta::default();
    let live_template_meta = l.template.metadata.as_ref().unwrap_or(&empty);
    let desired_template_meta = d.template.metadata.as_ref().unwrap_or(&empty);
    if map_differs(&live_template_meta.labels, &desired_template_meta.labels)
        || map_subset_differs(&live_template_meta.annotations, &desired_template_meta.annotations)
    {
        return true;
    }
    match (l.template.spec.as_ref(), d.template.spec.as_ref()) {
        (Some(l), Some(d)) => pod_spec_differs(l, d),
        (None, Some(_)) => true,
        _ => false,
    }
}

fn pod_spec_differs(live: &PodSpec, desired: &PodSpec) -> bool {
    opt_differs(&live.service_account_name, &desired.service_account_name)
        || map_differs(&live.node_selector, &desired.node_selector)
        || list_differs(&live.tolerations, &desired.tolerations)
        || opt_differs(&live.affinity, &desired.affinity)
        || volumes_differ(
            live.volumes.as_deref().unwrap_or_default(),
            desired.volumes.as_deref().unwrap_or_default(),
        )
        || desired.containers.len() != live.containers.len()
        || desired
            .containers
            .iter()
            .zip(&live.containers)
            .any(|(d, l)| container_differs(l, d))
}

fn container_differs(live: &Container, desired: &Container) -> bool {
    live.name != desired.name
        || opt_differs(&live.image, &desired.image)
        || list_differs(&live.command, &desired.command)
        || list_differs(&live.args, &desired.args)
        || list_differs(&live.env, &desired.env)
        || list_differs(&live.volume_mounts, &desired.volume_mounts)
        || resources_differ(live.resources.as_ref(), desired.resources.as_ref())
        || desired.ports.as_deref().unwrap_or_default().iter().any(|d| {
            !live
                .ports
                .as_deref()
                .unwrap_or_default()
                .iter()
                .any(|l| l.container_port == d.container_port && l.name == d.name)
        })
}

/// Volumes are matched by name and source secret; the API server defaults the rest
fn volumes_differ(live: &[Volume], desired: &[Volume]) -> bool {
    desired.iter().any(|d| {
        let secret_name = |v: &Volume| v.secret.as_ref().and_then(|s| s.secret_name.clone());
        !live
            .iter()
            .any(|l| l.name == d.name && secret_name(l) == secret_name(d))
    })
}

/// Quantities are compared by value, so `1000m` equals `1`
fn resources_differ(live: Option<&ResourceRequirements>, desired: Option<&ResourceRequirements>) -> bool {
    let Some(desired) = desired else {
        return false;
    };
    let empty = ResourceRequirements::default();
    let live = live.unwrap_or(&empty);
    quantities_differ(live.limits.as_ref(), desired.limits.as_ref())
        || quantities_differ(live.requests.as_ref(), desired.requests.as_ref())
}

fn quantities_differ(
    live: Option<&BTreeMap<String, Quantity>>,
    desired: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let Some(desired) = desired.filter(|d| !d.is_empty()) else {
        return false;
    };
    let empty = BTreeMap::new();
    let live = live.unwrap_or(&empty);
    desired.len() != live.len()
        || desired
            .iter()
            .any(|(name, d)| live.get(name).is_none_or(|l| !quantity::same_value(&l.0, &d.0)))
}

fn webhook_configuration_differs(
    live: &ValidatingWebhookConfiguration,
    desired: &ValidatingWebhookConfiguration,
) -> bool {
    let inject = |meta: &ObjectMeta| {
        meta.annotations
            .as_ref()
            .and_then(|a| a.get(CERT_MANAGER_INJECT_CA_ANNOTATION).cloned())
    };
    if inject(&live.metadata) != inject(&desired.metadata) {
        return true;
    }
    let live_hooks = live.webhooks.as_deref().unwrap_or_default();
    desired.webhooks.as_deref().unwrap_or_default().iter().any(|d| {
        live_hooks
            .iter()
            .find(|l| l.name == d.name)
            .is_none_or(|l| webhook_differs(l, d))
    })
}

/// The CA bundle is injected by another actor and never compared
fn webhook_differs(live: &ValidatingWebhook, desired: &ValidatingWebhook) -> bool {
    let service_differs = match (
        live.client_config.service.as_ref(),
        desired.client_config.service.as_ref(),
    ) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(l), Some(d)) => {
            l.name != d.name
                || l.namespace != d.namespace
                || opt_differs(&l.path, &d.path)
                || opt_differs(&l.port, &d.port)
        }
    };
    service_differs
        || opt_differs(&live.client_config.url, &desired.client_config.url)
        || list_differs(&live.rules, &desired.rules)
        || opt_differs(&live.failure_policy, &desired.failure_policy)
        || opt_differs(&live.timeout_seconds, &desired.timeout_seconds)
        || live.side_effects != desired.side_effects
        || (!desired.admission_review_versions.is_empty()
            && live.admission_review_versions != desired.admission_review_versions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::admissionregistration::v1::WebhookClientConfig;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{PodTemplateSpec, ServicePort, ServiceSpec};
    use k8s_openapi::ByteString;

    fn labelled(labels: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            name: Some("x".to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..ObjectMeta::default()
        }
    }

    fn deployment(image: &str, cpu: &str, labels: &[(&str, &str)]) -> Deployment {
        Deployment {
            metadata: labelled(labels),
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: Some(labelled(labels)),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "external-secrets".to_string(),
                            image: Some(image.to_string()),
                            resources: Some(ResourceRequirements {
                                requests: Some(BTreeMap::from([(
                                    "cpu".to_string(),
                                    Quantity(cpu.to_string()),
                                )])),
                                ..ResourceRequirements::default()
                            }),
                            ..Container::default()
                        }],
                        ..PodSpec::default()
                    }),
                },
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        }
    }

    #[test]
    fn test_identical_deployments_do_not_drift() {
        let d = ManagedObject::Deployment(deployment("img:1", "100m", &[("app", "external-secrets")]));
        assert!(!has_drifted(&d, &d.clone()));
    }

    #[test]
    fn test_label_change_is_drift() {
        let live = ManagedObject::Deployment(deployment("img:1", "100m", &[("app", "tampered")]));
        let desired =
            ManagedObject::Deployment(deployment("img:1", "100m", &[("app", "external-secrets")]));
        assert!(has_drifted(&live, &desired));
    }

    #[test]
    fn test_image_change_is_drift() {
        let live = ManagedObject::Deployment(deployment("img:1", "100m", &[]));
        let desired = ManagedObject::Deployment(deployment("img:2", "100m", &[]));
        assert!(has_drifted(&live, &desired));
    }

    #[test]
    fn test_normalized_quantities_are_not_drift() {
        let live = ManagedObject::Deployment(deployment("img:1", "1", &[]));
        let desired = ManagedObject::Deployment(deployment("img:1", "1000m", &[]));
        assert!(!has_drifted(&live, &desired));
    }

    #[test]
    fn test_untracked_fields_are_ignored() {
        let desired = deployment("img:1", "100m", &[]);
        let mut live = desired.clone();
        if let Some(spec) = live.spec.as_mut() {
            spec.progress_deadline_seconds = Some(600);
            if let Some(pod) = spec.template.spec.as_mut() {
                pod.termination_grace_period_seconds = Some(30);
                pod.containers[0].termination_message_path = Some("/dev/termination-log".to_string());
            }
        }
        assert!(!has_drifted(
            &ManagedObject::Deployment(live),
            &ManagedObject::Deployment(desired)
        ));
    }

    #[test]
    fn test_empty_desired_labels_are_no_opinion() {
        let live = labelled(&[("team", "a")]);
        let desired = ObjectMeta::default();
        assert!(!labels_differ(&live, &desired));
    }

    #[test]
    fn test_service_defaults_are_not_drift() {
        let port = |protocol: Option<&str>, node_port: Option<i32>| ServicePort {
            name: Some("webhook".to_string()),
            port: 443,
            protocol: protocol.map(str::to_string),
            node_port,
            ..ServicePort::default()
        };
        let desired = Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![port(None, None)]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        };
        let live = Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![port(Some("TCP"), Some(30000))]),
                cluster_ip: Some("10.0.0.1".to_string()),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        };
        assert!(!service_differs(&live, &desired));
    }

    #[test]
    fn test_binding_subject_change_is_drift() {
        let subject = |name: &str| Subject {
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: Some("external-secrets".to_string()),
            ..Subject::default()
        };
        let binding = |name: &str| ClusterRoleBinding {
            subjects: Some(vec![subject(name)]),
            ..ClusterRoleBinding::default()
        };
        assert!(binding_differs(&binding("other"), &binding("external-secrets")));
        assert!(!binding_differs(&binding("external-secrets"), &binding("external-secrets")));

        let rb = |name: &str| RoleBinding {
            subjects: Some(vec![subject(name)]),
            ..RoleBinding::default()
        };
        assert!(binding_differs(&rb("other"), &rb("external-secrets")));
    }

    #[test]
    fn test_webhook_ca_bundle_is_never_compared() {
        let hook = |ca: Option<ByteString>| ValidatingWebhook {
            name: "validate.externalsecret.external-secrets.io".to_string(),
            side_effects: "None".to_string(),
            client_config: WebhookClientConfig {
                ca_bundle: ca,
                ..WebhookClientConfig::default()
            },
            ..ValidatingWebhook::default()
        };
        let live = ValidatingWebhookConfiguration {
            webhooks: Some(vec![hook(Some(ByteString(b"injected".to_vec())))]),
            ..ValidatingWebhookConfiguration::default()
        };
        let desired = ValidatingWebhookConfiguration {
            webhooks: Some(vec![hook(None)]),
            ..ValidatingWebhookConfiguration::default()
        };
        assert!(!webhook_configuration_differs(&live, &desired));
    }

    #[test]
    fn test_missing_inject_annotation_is_drift() {
        let mut desired = ValidatingWebhookConfiguration::default();
        desired.metadata.annotations = Some(BTreeMap::from([(
            CERT_MANAGER_INJECT_CA_ANNOTATION.to_string(),
            "external-secrets/external-secrets-webhook".to_string(),
        )]));
        let live = ValidatingWebhookConfiguration::default();
        assert!(webhook_configuration_differs(&live, &desired));
    }

    #[test]
    fn test_network_policy_compares_owned_fields_only() {
        use k8s_openapi::api::networking::v1::NetworkPolicy;
        let desired: NetworkPolicy = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "allow-to-dns"},
            "spec": {"podSelector": {}, "policyTypes": ["Egress"], "egress": [{"ports": [{"protocol": "UDP", "port": 5353}]}]}
        }))
        .unwrap();
        let mut live = desired.clone();
        assert!(!has_drifted(
            &ManagedObject::NetworkPolicy(live.clone()),
            &ManagedObject::NetworkPolicy(desired.clone())
        ));
        if let Some(spec) = live.spec.as_mut() {
            spec.policy_types = Some(vec!["Ingress".to_string()]);
        }
        assert!(has_drifted(
            &ManagedObject::NetworkPolicy(live),
            &ManagedObject::NetworkPolicy(desired)
        ));
    }
}
