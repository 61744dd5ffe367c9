//! User-declared egress policies.
//!
//! Each entry of `controllerConfig.networkPolicies` becomes one NetworkPolicy
//! selecting the pods of the named component.

use crate::assets;
use crate::constants::{LABEL_NAME, OPERAND_NAMESPACE};
use crate::controller::desired::validation::is_dns_subdomain;
use crate::controller::errors::ReconcileError;
use crate::crd::NetworkPolicy as NetworkPolicySpec;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use serde_json::json;
use std::collections::BTreeSet;

/// Component name to the `app.kubernetes.io/name` value of its pods
const COMPONENTS: &[(&str, &str)] = &[
    ("ExternalSecretsCoreController", "external-secrets"),
    ("BitwardenSDKServer", "bitwarden-sdk-server"),
];

/// Pod selector value for a component, `None` when the component is unknown
#[must_use]
pub fn component_selector(component: &str) -> Option<&'static str> {
    COMPONENTS
        .iter()
        .find(|(name, _)| *name == component)
        .map(|(_, selector)| *selector)
}

/// Templates of the policies the operator ships, whether or not enabled this pass
const BUILT_IN: &[&str] = &[
    assets::NETWORK_POLICY_DENY_ALL,
    assets::NETWORK_POLICY_MAIN_CONTROLLER,
    assets::NETWORK_POLICY_WEBHOOK,
    assets::NETWORK_POLICY_DNS,
    assets::NETWORK_POLICY_CERT_CONTROLLER,
    assets::NETWORK_POLICY_BITWARDEN,
];

/// Object names taken by the shipped policies
pub fn built_in_names() -> Result<BTreeSet<String>, ReconcileError> {
    BUILT_IN
        .iter()
        .map(|&asset| {
            super::load::<NetworkPolicy>(asset).map(|p| p.metadata.name.unwrap_or_default())
        })
        .collect()
}

/// Render every user policy
///
/// Unknown components, bad names and names in `reserved` are irrecoverable.
pub fn render(
    policies: &[NetworkPolicySpec],
    reserved: &BTreeSet<String>,
) -> Result<Vec<NetworkPolicy>, ReconcileError> {
    let mut seen = BTreeSet::new();
    let mut rendered = Vec::with_capacity(policies.len());
    for (i, policy) in policies.iter().enumerate() {
        let path = format!("spec.controllerConfig.networkPolicies[{i}]");
        if !is_dns_subdomain(&policy.name) {
            return Err(ReconcileError::irrecoverable(
                "InvalidNetworkPolicy",
                format!("{path}.name: invalid name {:?}", policy.name),
            ));
        }
        if reserved.contains(&policy.name) {
            return Err(ReconcileError::irrecoverable(
                "InvalidNetworkPolicy",
                format!(
                    "{path}.name: {:?} is already used by a network policy the operator manages",
                    policy.name
                ),
            ));
        }
        if !seen.insert(policy.name.as_str()) {
            return Err(ReconcileError::irrecoverable(
                "InvalidNetworkPolicy",
                format!("{path}.name: duplicate network policy {:?}", policy.name),
            ));
        }
        let selector = component_selector(&policy.component_name).ok_or_else(|| {
            ReconcileError::irrecoverable(
                "InvalidNetworkPolicy",
                format!(
                    "{path}.componentName: unknown component {:?}, expected one of {}",
                    policy.component_name,
                    COMPONENTS
                        .iter()
                        .map(|(name, _)| *name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )
        })?;
        rendered.push(render_one(policy, selector)?);
    }
    Ok(rendered)
}

fn render_one(policy: &NetworkPolicySpec, selector: &str) -> Result<NetworkPolicy, ReconcileError> {
    let value = json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "NetworkPolicy",
        "metadata": {
            "name": policy.name,
            "namespace": OPERAND_NAMESPACE,
        },
        "spec": {
            "podSelector": { "matchLabels": { LABEL_NAME: selector } },
            "policyTypes": ["Egress"],
            "egress": policy.egress,
        },
    });
    serde_json::from_value(value).map_err(|e| {
        ReconcileError::irrecoverable(
            "InvalidNetworkPolicy",
            format!("network policy {:?} could not be rendered: {e}", policy.name),
        )
        .with_cause(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(name: &str, component: &str) -> NetworkPolicySpec {
        NetworkPolicySpec {
            name: name.to_string(),
            component_name: component.to_string(),
            egress: Vec::new(),
        }
    }

    #[test]
    fn test_known_component_selects_its_pods() {
        let rendered =
            render(&[policy("allow-vault", "ExternalSecretsCoreController")], &BTreeSet::new())
                .unwrap();
        let spec = rendered[0].spec.as_ref().unwrap();
        let value = serde_json::to_value(spec).unwrap();
        assert_eq!(
            value["podSelector"]["matchLabels"]["app.kubernetes.io/name"],
            "external-secrets"
        );
        assert_eq!(value["policyTypes"], json!(["Egress"]));
        assert_eq!(rendered[0].metadata.namespace.as_deref(), Some("external-secrets"));
    }

    #[test]
    fn test_unknown_component_is_irrecoverable() {
        let err = render(&[policy("allow-x", "Nope")], &BTreeSet::new()).unwrap_err();
        assert!(err.is_irrecoverable());
        assert!(err.message.contains("componentName"));
        assert!(err.message.contains("Nope"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = render(
            &[
                policy("allow", "BitwardenSDKServer"),
                policy("allow", "ExternalSecretsCoreController"),
            ],
            &BTreeSet::new(),
        )
        .unwrap_err();
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn test_built_in_names_cannot_be_reused() {
        let reserved = built_in_names().unwrap();
        assert!(reserved.contains("allow-to-dns"));
        assert_eq!(reserved.len(), BUILT_IN.len());

        let err = render(&[policy("allow-to-dns", "ExternalSecretsCoreController")], &reserved)
            .unwrap_err();
        assert!(err.is_irrecoverable());
        assert!(err.message.contains("networkPolicies[0].name"), "{}", err.message);
    }
}
