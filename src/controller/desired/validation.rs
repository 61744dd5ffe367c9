//! Validation of user-supplied workload overlays.
//!
//! Checks follow the platform's own rules for pod specs so that an invalid
//! overlay fails the pass with a field path instead of a rejected write.

use crate::controller::quantity;
use crate::crd::{CommonConfigs, ResourceRequirements, Toleration};
use k8s_openapi::api::core::v1::{
    Affinity, NodeSelectorTerm, PodAffinityTerm, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("DNS subdomain regex is valid")
});

static NAME_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("name regex is valid")
});

static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("DNS label regex is valid"));

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+(\.[0-9]+)?(ns|us|µs|ms|s|m|h))+$").expect("duration regex is valid")
});

const STANDARD_RESOURCES: &[&str] = &["cpu", "memory", "ephemeral-storage"];
const TOLERATION_EFFECTS: &[&str] = &["NoSchedule", "PreferNoSchedule", "NoExecute"];
const NODE_SELECTOR_OPERATORS: &[&str] = &["In", "NotIn", "Exists", "DoesNotExist", "Gt", "Lt"];
const LABEL_SELECTOR_OPERATORS: &[&str] = &["In", "NotIn", "Exists", "DoesNotExist"];

/// `name` or `prefix/name`, as used for label keys and resource names
#[must_use]
pub fn is_qualified_name(value: &str) -> bool {
    let (prefix, name) = match value.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, value),
    };
    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > 253 || !DNS_SUBDOMAIN.is_match(prefix) {
            return false;
        }
    }
    !name.is_empty() && name.len() <= 63 && NAME_PART.is_match(name)
}

#[must_use]
pub fn is_label_value(value: &str) -> bool {
    value.is_empty() || (value.len() <= 63 && NAME_PART.is_match(value))
}

#[must_use]
pub fn is_dns_subdomain(value: &str) -> bool {
    !value.is_empty() && value.len() <= 253 && DNS_SUBDOMAIN.is_match(value)
}

/// RFC 1123 label, as required for namespace names
#[must_use]
pub fn is_dns_label(value: &str) -> bool {
    !value.is_empty() && value.len() <= 63 && DNS_LABEL.is_match(value)
}

/// Duration string such as `5m`, `1h30m` or `2160h`
#[must_use]
pub fn is_duration(value: &str) -> bool {
    DURATION.is_match(value)
}

/// Validate a common-configs block found at `path`; returns one message per problem
#[must_use]
pub fn validate_common(common: &CommonConfigs, path: &str) -> Vec<String> {
    let mut errors = Vec::new();
    validate_labels(&common.labels, &format!("{path}.labels"), &mut errors);
    validate_annotation_keys(&common.annotations, &format!("{path}.annotations"), &mut errors);
    if let Some(resources) = &common.resources {
        validate_resources(resources, &format!("{path}.resources"), &mut errors);
    }
    if let Some(affinity) = &common.affinity {
        validate_affinity(affinity, &format!("{path}.affinity"), &mut errors);
    }
    for (i, toleration) in common.tolerations.iter().enumerate() {
        validate_toleration(toleration, &format!("{path}.tolerations[{i}]"), &mut errors);
    }
    validate_labels(&common.node_selector, &format!("{path}.nodeSelector"), &mut errors);
    errors
}

pub fn validate_labels(labels: &BTreeMap<String, String>, path: &str, errors: &mut Vec<String>) {
    for (key, value) in labels {
        if !is_qualified_name(key) {
            errors.push(format!("{path}[{key}]: invalid key, must be a qualified name"));
        }
        if !is_label_value(value) {
            errors.push(format!("{path}[{key}]: invalid value {value:?}"));
        }
    }
}

fn validate_annotation_keys(annotations: &BTreeMap<String, String>, path: &str, errors: &mut Vec<String>) {
    for key in annotations.keys() {
        if !is_qualified_name(key) {
            errors.push(format!("{path}[{key}]: invalid key, must be a qualified name"));
        }
    }
}

fn is_resource_name(name: &str) -> bool {
    STANDARD_RESOURCES.contains(&name)
        || name
            .strip_prefix("hugepages-")
            .is_some_and(quantity::is_valid)
        || (name.contains('/') && is_qualified_name(name))
}

pub fn validate_resources(resources: &ResourceRequirements, path: &str, errors: &mut Vec<String>) {
    let mut check = |section: &str, values: &BTreeMap<String, String>| {
        for (name, value) in values {
            let field = format!("{path}.{section}[{name}]");
            if !is_resource_name(name) {
                errors.push(format!("{field}: unsupported resource name"));
            }
            match quantity::parse(value) {
                None => errors.push(format!("{field}: invalid quantity {value:?}")),
                Some(v) if v < 0.0 => errors.push(format!("{field}: must be greater than or equal to 0")),
                Some(_) => {}
            }
        }
    };
    check("limits", &resources.limits);
    check("requests", &resources.requests);

    for (name, request) in &resources.requests {
        let Some(limit) = resources.limits.get(name) else {
            continue;
        };
        if let (Some(r), Some(l)) = (quantity::parse(request), quantity::parse(limit)) {
            if r > l {
                errors.push(format!(
                    "{path}.requests[{name}]: must be less than or equal to {name} limit of {limit}"
                ));
            }
        }
    }
}

pub fn validate_toleration(toleration: &Toleration, path: &str, errors: &mut Vec<String>) {
    let key = toleration.key.as_deref().unwrap_or_default();
    let operator = toleration.operator.as_deref().unwrap_or("Equal");
    let value = toleration.value.as_deref().unwrap_or_default();
    let effect = toleration.effect.as_deref().unwrap_or_default();

    if !key.is_empty() && !is_qualified_name(key) {
        errors.push(format!("{path}.key: invalid key {key:?}"));
    }
    match operator {
        "Equal" | "" => {
            if key.is_empty() {
                errors.push(format!("{path}.operator: must be Exists when key is empty"));
            }
            if !is_label_value(value) {
                errors.push(format!("{path}.value: invalid value {value:?}"));
            }
        }
        "Exists" => {
            if !value.is_empty() {
                errors.push(format!("{path}.value: must be empty when operator is Exists"));
            }
        }
        other => errors.push(format!("{path}.operator: unsupported operator {other:?}, expected Equal or Exists")),
    }
    if !effect.is_empty() && !TOLERATION_EFFECTS.contains(&effect) {
        errors.push(format!("{path}.effect: unsupported effect {effect:?}"));
    }
    if toleration.toleration_seconds.is_some() && effect != "NoExecute" {
        errors.push(format!("{path}.tolerationSeconds: only valid with effect NoExecute"));
    }
}

pub fn validate_affinity(affinity: &Affinity, path: &str, errors: &mut Vec<String>) {
    if let Some(node) = &affinity.node_affinity {
        let node_path = format!("{path}.nodeAffinity");
        if let Some(required) = &node.required_during_scheduling_ignored_during_execution {
            let required_path = format!("{node_path}.requiredDuringSchedulingIgnoredDuringExecution");
            if required.node_selector_terms.is_empty() {
                errors.push(format!("{required_path}.nodeSelectorTerms: must have at least one term"));
            }
            for (i, term) in required.node_selector_terms.iter().enumerate() {
                validate_node_selector_term(term, &format!("{required_path}.nodeSelectorTerms[{i}]"), errors);
            }
        }
        for (i, preferred) in node
            .preferred_during_scheduling_ignored_during_execution
            .iter()
            .flatten()
            .enumerate()
        {
            let preferred_path = format!("{node_path}.preferredDuringSchedulingIgnoredDuringExecution[{i}]");
            validate_weight(preferred.weight, &preferred_path, errors);
            validate_node_selector_term(&preferred.preference, &format!("{preferred_path}.preference"), errors);
        }
    }
    if let Some(pod) = &affinity.pod_affinity {
        validate_pod_terms(
            pod.required_during_scheduling_ignored_during_execution.as_deref(),
            pod.preferred_during_scheduling_ignored_during_execution.as_deref(),
            &format!("{path}.podAffinity"),
            errors,
        );
    }
    if let Some(anti) = &affinity.pod_anti_affinity {
        validate_pod_terms(
            anti.required_during_scheduling_ignored_during_execution.as_deref(),
            anti.preferred_during_scheduling_ignored_during_execution.as_deref(),
            &format!("{path}.podAntiAffinity"),
            errors,
        );
    }
}

fn validate_weight(weight: i32, path: &str, errors: &mut Vec<String>) {
    if !(1..=100).contains(&weight) {
        errors.push(format!("{path}.weight: must be in the range 1-100"));
    }
}

fn validate_node_selector_term(term: &NodeSelectorTerm, path: &str, errors: &mut Vec<String>) {
    for (i, requirement) in term.match_expressions.iter().flatten().enumerate() {
        let field = format!("{path}.matchExpressions[{i}]");
        if !is_qualified_name(&requirement.key) {
            errors.push(format!("{field}.key: invalid key {:?}", requirement.key));
        }
        let values = requirement.values.as_deref().unwrap_or_default();
        match requirement.operator.as_str() {
            "In" | "NotIn" if values.is_empty() => {
                errors.push(format!("{field}.values: must be specified for operator {}", requirement.operator));
            }
            "Exists" | "DoesNotExist" if !values.is_empty() => {
                errors.push(format!("{field}.values: may not be specified for operator {}", requirement.operator));
            }
            "Gt" | "Lt" if values.len() != 1 || values[0].parse::<i64>().is_err() => {
                errors.push(format!("{field}.values: must be a single integer for operator {}", requirement.operator));
            }
            op if !NODE_SELECTOR_OPERATORS.contains(&op) => {
                errors.push(format!("{field}.operator: unsupported operator {op:?}"));
            }
            _ => {}
        }
    }
    for (i, requirement) in term.match_fields.iter().flatten().enumerate() {
        if requirement.key != "metadata.name" {
            errors.push(format!("{path}.matchFields[{i}].key: only metadata.name is supported"));
        }
    }
}

fn validate_pod_terms(
    required: Option<&[PodAffinityTerm]>,
    preferred: Option<&[WeightedPodAffinityTerm]>,
    path: &str,
    errors: &mut Vec<String>,
) {
    for (i, term) in required.unwrap_or_default().iter().enumerate() {
        validate_pod_affinity_term(
            term,
            &format!("{path}.requiredDuringSchedulingIgnoredDuringExecution[{i}]"),
            errors,
        );
    }
    for (i, weighted) in preferred.unwrap_or_default().iter().enumerate() {
        let weighted_path = format!("{path}.preferredDuringSchedulingIgnoredDuringExecution[{i}]");
        validate_weight(weighted.weight, &weighted_path, errors);
        validate_pod_affinity_term(
            &weighted.pod_affinity_term,
            &format!("{weighted_path}.podAffinityTerm"),
            errors,
        );
    }
}

fn validate_pod_affinity_term(term: &PodAffinityTerm, path: &str, errors: &mut Vec<String>) {
    if term.topology_key.is_empty() {
        errors.push(format!("{path}.topologyKey: can not be empty"));
    } else if !is_qualified_name(&term.topology_key) {
        errors.push(format!("{path}.topologyKey: invalid key {:?}", term.topology_key));
    }
    if let Some(selector) = &term.label_selector {
        validate_label_selector(selector, &format!("{path}.labelSelector"), errors);
    }
    if let Some(selector) = &term.namespace_selector {
        validate_label_selector(selector, &format!("{path}.namespaceSelector"), errors);
    }
    for (i, namespace) in term.namespaces.iter().flatten().enumerate() {
        if !is_dns_label(namespace) {
            errors.push(format!("{path}.namespaces[{i}]: invalid namespace {namespace:?}"));
        }
    }
}

fn validate_label_selector(selector: &LabelSelector, path: &str, errors: &mut Vec<String>) {
    if let Some(labels) = &selector.match_labels {
        validate_labels(labels, &format!("{path}.matchLabels"), errors);
    }
    for (i, requirement) in selector.match_expressions.iter().flatten().enumerate() {
        let field = format!("{path}.matchExpressions[{i}]");
        if !is_qualified_name(&requirement.key) {
            errors.push(format!("{field}.key: invalid key {:?}", requirement.key));
        }
        let values = requirement.values.as_deref().unwrap_or_default();
        match requirement.operator.as_str() {
            "In" | "NotIn" if values.is_empty() => {
                errors.push(format!("{field}.values: must be specified for operator {}", requirement.operator));
            }
            "Exists" | "DoesNotExist" if !values.is_empty() => {
                errors.push(format!("{field}.values: may not be specified for operator {}", requirement.operator));
            }
            op if !LABEL_SELECTOR_OPERATORS.contains(&op) => {
                errors.push(format!("{field}.operator: unsupported operator {op:?}"));
            }
            _ => {}
        }
    }
}
