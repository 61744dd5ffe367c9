//! # Update Merge
//!
//! Builds the object sent on a replace: the live object with the operator-owned
//! fields of the desired object written over it. The owned fields are the ones
//! the drift detector compares, so a merged object never drifts again. Anything
//! else on the live object (fields other actors default or set, annotations,
//! unknown fields of the Certificate spec) is sent back unchanged.

use crate::constants::CERT_MANAGER_INJECT_CA_ANNOTATION;
use crate::controller::resources::{ManagedKind, ManagedObject};
use crate::crd::CertificateSpec;
use k8s_openapi::api::admissionregistration::v1::{ValidatingWebhook, ValidatingWebhookConfiguration};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements, Service, ServicePort, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// Merge the owned fields of `desired` onto `live` for a full replace
///
/// Labels follow the desired set. Annotations are the union of live and desired,
/// except the CA-injection annotation on webhook configurations, which is owned
/// here. The live resourceVersion stays, so the replace is optimistic.
#[must_use]
pub fn prepare_update(live: &ManagedObject, desired: &ManagedObject) -> ManagedObject {
    let mut merged = live.clone();
    merge_meta(merged.metadata_mut(), desired.metadata(), desired.kind());

    match (&mut merged, desired) {
        (ManagedObject::ServiceAccount(m), ManagedObject::ServiceAccount(d)) => {
            set_opt(&mut m.automount_service_account_token, &d.automount_service_account_token);
        }
        (ManagedObject::Certificate(m), ManagedObject::Certificate(d)) => {
            merge_certificate(&mut m.spec, &d.spec);
        }
        (ManagedObject::ClusterRole(m), ManagedObject::ClusterRole(d)) => {
            set_list(&mut m.rules, &d.rules);
            set_opt(&mut m.aggregation_rule, &d.aggregation_rule);
        }
        (ManagedObject::Role(m), ManagedObject::Role(d)) => set_list(&mut m.rules, &d.rules),
        (ManagedObject::ClusterRoleBinding(m), ManagedObject::ClusterRoleBinding(d)) => {
            m.role_ref.clone_from(&d.role_ref);
            set_list(&mut m.subjects, &d.subjects);
        }
        (ManagedObject::RoleBinding(m), ManagedObject::RoleBinding(d)) => {
            m.role_ref.clone_from(&d.role_ref);
            set_list(&mut m.subjects, &d.subjects);
        }
        (ManagedObject::NetworkPolicy(m), ManagedObject::NetworkPolicy(d)) => {
            m.spec = overlay_fields(m.spec.take(), d.spec.as_ref());
        }
        (ManagedObject::Service(m), ManagedObject::Service(d)) => merge_service(m, d),
        (ManagedObject::Deployment(m), ManagedObject::Deployment(d)) => merge_deployment(m, d),
        (
            ManagedObject::ValidatingWebhookConfiguration(m),
            ManagedObject::ValidatingWebhookConfiguration(d),
        ) => merge_webhooks(m, d),
        // Namespace and Secret carry no owned fields beyond metadata
        _ => {}
    }
    merged
}

fn merge_meta(meta: &mut ObjectMeta, desired: &ObjectMeta, kind: ManagedKind) {
    set_map(&mut meta.labels, &desired.labels);

    let desired_injects = desired
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(CERT_MANAGER_INJECT_CA_ANNOTATION));
    let mut annotations = meta.annotations.take().unwrap_or_default();
    annotations.extend(desired.annotations.clone().unwrap_or_default());
    if kind == ManagedKind::ValidatingWebhookConfiguration && !desired_injects {
        annotations.remove(CERT_MANAGER_INJECT_CA_ANNOTATION);
    }
    meta.annotations = (!annotations.is_empty()).then_some(annotations);
}

fn set_opt<T: Clone>(live: &mut Option<T>, desired: &Option<T>) {
    if desired.is_some() {
        live.clone_from(desired);
    }
}

fn set_list<T: Clone>(live: &mut Option<Vec<T>>, desired: &Option<Vec<T>>) {
    if desired.as_ref().is_some_and(|d| !d.is_empty()) {
        live.clone_from(desired);
    }
}

fn set_map(live: &mut Option<BTreeMap<String, String>>, desired: &Option<BTreeMap<String, String>>) {
    if desired.as_ref().is_some_and(|d| !d.is_empty()) {
        live.clone_from(desired);
    }
}

/// Write every non-empty top-level field of `desired` over `live` in JSON form
///
/// Falls back to `desired` when either side fails to round-trip.
fn overlay_fields<T>(live: Option<T>, desired: Option<&T>) -> Option<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    let Some(desired) = desired else {
        return live;
    };
    let Some(current) = live else {
        return Some(desired.clone());
    };
    let (Ok(serde_json::Value::Object(mut base)), Ok(serde_json::Value::Object(owned))) =
        (serde_json::to_value(&current), serde_json::to_value(desired))
    else {
        return Some(desired.clone());
    };
    for (key, value) in owned {
        let empty = match &value {
            serde_json::Value::Null => true,
            serde_json::Value::Array(a) => a.is_empty(),
            serde_json::Value::Object(o) => o.is_empty(),
            _ => false,
        };
        if !empty {
            base.insert(key, value);
        }
    }
    Some(serde_json::from_value(serde_json::Value::Object(base)).unwrap_or_else(|_| desired.clone()))
}

fn merge_certificate(live: &mut CertificateSpec, desired: &CertificateSpec) {
    live.secret_name.clone_from(&desired.secret_name);
    live.issuer_ref.clone_from(&desired.issuer_ref);
    if !desired.dns_names.is_empty() {
        live.dns_names.clone_from(&desired.dns_names);
    }
    set_opt(&mut live.common_name, &desired.common_name);
    set_opt(&mut live.duration, &desired.duration);
    set_opt(&mut live.renew_before, &desired.renew_before);
    set_opt(&mut live.private_key, &desired.private_key);
}

fn merge_service(live: &mut Service, desired: &Service) {
    let Some(d) = desired.spec.as_ref() else {
        return;
    };
    let spec = live.spec.get_or_insert_with(Default::default);
    set_map(&mut spec.selector, &d.selector);
    set_opt(&mut spec.type_, &d.type_);

    let desired_ports = d.ports.as_deref().unwrap_or_default();
    if desired_ports.is_empty() {
        return;
    }
    let live_ports = spec.ports.take().unwrap_or_default();
    spec.ports = Some(
        desired_ports
            .iter()
            .map(|dp| {
                let Some(lp) = live_ports.iter().find(|lp| match &dp.name {
                    Some(_) => lp.name == dp.name,
                    None => lp.port == dp.port,
                }) else {
                    return dp.clone();
                };
                let mut port = ServicePort {
                    name: dp.name.clone(),
                    port: dp.port,
                    ..lp.clone()
                };
                set_opt(&mut port.target_port, &dp.target_port);
                set_opt(&mut port.protocol, &dp.protocol);
                port
            })
            .collect(),
    );
}

fn merge_deployment(live: &mut Deployment, desired: &Deployment) {
    let Some(d) = desired.spec.as_ref() else {
        return;
    };
    if live.spec.is_none() {
        live.spec = Some(d.clone());
        return;
    }
    let Some(spec) = live.spec.as_mut() else {
        return;
    };
    set_opt(&mut spec.replicas, &d.replicas);

    if let Some(desired_meta) = d.template.metadata.as_ref() {
        let meta = spec.template.metadata.get_or_insert_with(ObjectMeta::default);
        set_map(&mut meta.labels, &desired_meta.labels);
        if let Some(desired_annotations) = desired_meta.annotations.as_ref() {
            meta.annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(desired_annotations.clone());
        }
    }

    match (spec.template.spec.as_mut(), d.template.spec.as_ref()) {
        (Some(pod), Some(desired_pod)) => merge_pod_spec(pod, desired_pod),
        (None, Some(desired_pod)) => spec.template.spec = Some(desired_pod.clone()),
        _ => {}
    }
}

fn merge_pod_spec(live: &mut PodSpec, desired: &PodSpec) {
    set_opt(&mut live.service_account_name, &desired.service_account_name);
    set_map(&mut live.node_selector, &desired.node_selector);
    set_list(&mut live.tolerations, &desired.tolerations);
    set_opt(&mut live.affinity, &desired.affinity);

    if let Some(desired_volumes) = desired.volumes.as_ref() {
        let volumes = live.volumes.get_or_insert_with(Vec::new);
        for volume in desired_volumes {
            upsert_volume(volumes, volume);
        }
    }

    let live_containers = std::mem::take(&mut live.containers);
    live.containers = desired
        .containers
        .iter()
        .map(|d| match live_containers.iter().find(|l| l.name == d.name) {
            Some(l) => merge_container(l.clone(), d),
            None => d.clone(),
        })
        .collect();
}

fn upsert_volume(volumes: &mut Vec<Volume>, desired: &Volume) {
    let secret_name = |v: &Volume| v.secret.as_ref().and_then(|s| s.secret_name.clone());
    match volumes.iter_mut().find(|v| v.name == desired.name) {
        Some(existing) if secret_name(existing) == secret_name(desired) => {}
        Some(existing) => *existing = desired.clone(),
        None => volumes.push(desired.clone()),
    }
}

fn merge_container(mut live: Container, desired: &Container) -> Container {
    set_opt(&mut live.image, &desired.image);
    set_list(&mut live.command, &desired.command);
    set_list(&mut live.args, &desired.args);
    set_list(&mut live.env, &desired.env);
    set_list(&mut live.volume_mounts, &desired.volume_mounts);
    if let Some(d) = desired.resources.as_ref() {
        let resources = live.resources.get_or_insert_with(ResourceRequirements::default);
        if d.limits.as_ref().is_some_and(|l| !l.is_empty()) {
            resources.limits.clone_from(&d.limits);
        }
        if d.requests.as_ref().is_some_and(|r| !r.is_empty()) {
            resources.requests.clone_from(&d.requests);
        }
    }
    for port in desired.ports.iter().flatten() {
        let ports = live.ports.get_or_insert_with(Vec::new);
        if !ports
            .iter()
            .any(|p| p.container_port == port.container_port && p.name == port.name)
        {
            ports.push(port.clone());
        }
    }
    live
}

fn merge_webhooks(live: &mut ValidatingWebhookConfiguration, desired: &ValidatingWebhookConfiguration) {
    let hooks = live.webhooks.get_or_insert_with(Vec::new);
    for d in desired.webhooks.iter().flatten() {
        match hooks.iter_mut().find(|h| h.name == d.name) {
            Some(hook) => merge_webhook(hook, d),
            None => hooks.push(d.clone()),
        }
    }
}

/// The CA bundle is kept unless the desired hook carries one
fn merge_webhook(live: &mut ValidatingWebhook, desired: &ValidatingWebhook) {
    set_opt(&mut live.client_config.service, &desired.client_config.service);
    set_opt(&mut live.client_config.url, &desired.client_config.url);
    set_opt(&mut live.client_config.ca_bundle, &desired.client_config.ca_bundle);
    set_list(&mut live.rules, &desired.rules);
    set_opt(&mut live.failure_policy, &desired.failure_policy);
    set_opt(&mut live.timeout_seconds, &desired.timeout_seconds);
    live.side_effects.clone_from(&desired.side_effects);
    if !desired.admission_review_versions.is_empty() {
        live.admission_review_versions
            .clone_from(&desired.admission_review_versions);
    }
}
