//! Deployment customisation: image, arguments, proxy environment, overlays and
//! metadata on top of the embedded deployment templates.

use crate::controller::desired::overlay::WorkloadOverlay;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, EnvVar};
use std::collections::BTreeMap;

/// Per-deployment settings
#[derive(Debug, Clone, Default)]
pub struct WorkloadSettings<'a> {
    pub image: &'a str,
    /// `(flag, value)` pairs rendered as `flag=value`
    pub args: Vec<(&'static str, String)>,
    pub overlay: Option<&'a WorkloadOverlay>,
    pub labels: Option<&'a BTreeMap<String, String>>,
    pub annotations: Option<&'a BTreeMap<String, String>>,
}

/// Set `flag=value`, replacing an existing occurrence of `flag`
pub fn set_arg(args: &mut Vec<String>, flag: &str, value: &str) {
    let rendered = format!("{flag}={value}");
    let prefix = format!("{flag}=");
    match args.iter_mut().find(|a| a.starts_with(&prefix) || a.as_str() == flag) {
        Some(existing) => *existing = rendered,
        None => args.push(rendered),
    }
}

/// Set a plain environment variable, replacing an existing one
pub fn set_env(env: &mut Vec<EnvVar>, name: &str, value: &str) {
    match env.iter_mut().find(|e| e.name == name) {
        Some(existing) => {
            existing.value = Some(value.to_string());
            existing.value_from = None;
        }
        None => env.push(EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        }),
    }
}

fn customize_container(container: &mut Container, settings: &WorkloadSettings<'_>) {
    container.image = Some(settings.image.to_string());

    if !settings.args.is_empty() {
        let args = container.args.get_or_insert_with(Vec::new);
        for (flag, value) in &settings.args {
            set_arg(args, flag, value);
        }
    }

    if let Some(overlay) = settings.overlay {
        let proxy_env = overlay.proxy_env();
        if !proxy_env.is_empty() {
            let env = container.env.get_or_insert_with(Vec::new);
            for (name, value) in &proxy_env {
                set_env(env, name, value);
            }
        }
        if let Some(resources) = &overlay.resources {
            container.resources = Some(resources.clone());
        }
    }
}

/// Apply `settings` to every container and to the pod template
pub fn customize(deployment: &mut Deployment, settings: &WorkloadSettings<'_>) {
    if let Some(labels) = settings.labels {
        deployment
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.clone());
    }
    if let Some(annotations) = settings.annotations.filter(|a| !a.is_empty()) {
        deployment
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations.clone());
    }

    let Some(spec) = deployment.spec.as_mut() else {
        return;
    };
    let template = &mut spec.template;
    {
        let meta = template.metadata.get_or_insert_with(Default::default);
        if let Some(labels) = settings.labels {
            meta.labels.get_or_insert_with(BTreeMap::new).extend(labels.clone());
        }
        if let Some(annotations) = settings.annotations.filter(|a| !a.is_empty()) {
            meta.annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(annotations.clone());
        }
    }

    let Some(pod) = template.spec.as_mut() else {
        return;
    };
    for container in &mut pod.containers {
        customize_container(container, settings);
    }
    if let Some(overlay) = settings.overlay {
        if overlay.affinity.is_some() {
            pod.affinity.clone_from(&overlay.affinity);
        }
        if !overlay.tolerations.is_empty() {
            pod.tolerations = Some(overlay.tolerations.clone());
        }
        if !overlay.node_selector.is_empty() {
            pod.node_selector = Some(overlay.node_selector.clone());
        }
    }
}

/// Point the secret volume `volume` at `secret_name`
pub fn set_secret_volume(deployment: &mut Deployment, volume: &str, secret_name: &str) {
    let volumes = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .and_then(|p| p.volumes.as_mut());
    for v in volumes.into_iter().flatten() {
        if v.name == volume {
            if let Some(secret) = v.secret.as_mut() {
                secret.secret_name = Some(secret_name.to_string());
            }
        }
    }
}

/// Image of the first container, for status reporting
#[must_use]
pub fn image_of(deployment: &Deployment) -> Option<&str> {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.image.as_deref())
}
