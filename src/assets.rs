//! # Assets
//!
//! Static manifest templates for every object the operator manages, embedded at
//! compile time and looked up by name.
//!
//! Asset names are fixed constants. Asking for a name that is not embedded is a
//! programming error and panics.

pub const NAMESPACE: &str = "namespace.yaml";

pub const SERVICE_ACCOUNT_CONTROLLER: &str = "serviceaccount-external-secrets.yaml";
pub const SERVICE_ACCOUNT_WEBHOOK: &str = "serviceaccount-external-secrets-webhook.yaml";
pub const SERVICE_ACCOUNT_CERT_CONTROLLER: &str =
    "serviceaccount-external-secrets-cert-controller.yaml";
pub const SERVICE_ACCOUNT_BITWARDEN: &str = "serviceaccount-bitwarden-sdk-server.yaml";

pub const CERTIFICATE_WEBHOOK: &str = "certificate-webhook.yaml";
pub const CERTIFICATE_BITWARDEN: &str = "certificate-bitwarden.yaml";

pub const SECRET_WEBHOOK: &str = "secret-webhook.yaml";

pub const CLUSTER_ROLE_CONTROLLER: &str = "clusterrole-controller.yaml";
pub const CLUSTER_ROLE_VIEW: &str = "clusterrole-view.yaml";
pub const CLUSTER_ROLE_EDIT: &str = "clusterrole-edit.yaml";
pub const CLUSTER_ROLE_CERT_CONTROLLER: &str = "clusterrole-cert-controller.yaml";
pub const CLUSTER_ROLE_BINDING_CONTROLLER: &str = "clusterrolebinding-controller.yaml";
pub const CLUSTER_ROLE_BINDING_CERT_CONTROLLER: &str = "clusterrolebinding-cert-controller.yaml";
pub const ROLE_LEADER_ELECTION: &str = "role-leaderelection.yaml";
pub const ROLE_BINDING_LEADER_ELECTION: &str = "rolebinding-leaderelection.yaml";

pub const NETWORK_POLICY_DENY_ALL: &str = "networkpolicy-deny-all-traffic.yaml";
pub const NETWORK_POLICY_MAIN_CONTROLLER: &str =
    "networkpolicy-allow-api-server-egress-for-main-controller.yaml";
pub const NETWORK_POLICY_WEBHOOK: &str = "networkpolicy-allow-api-server-egress-for-webhook.yaml";
pub const NETWORK_POLICY_DNS: &str = "networkpolicy-allow-to-dns.yaml";
pub const NETWORK_POLICY_CERT_CONTROLLER: &str =
    "networkpolicy-allow-api-server-egress-for-cert-controller.yaml";
pub const NETWORK_POLICY_BITWARDEN: &str =
    "networkpolicy-allow-api-server-egress-for-bitwarden-sever.yaml";

pub const SERVICE_WEBHOOK: &str = "service-webhook.yaml";
pub const SERVICE_METRICS: &str = "service-metrics.yaml";
pub const SERVICE_CERT_CONTROLLER_METRICS: &str = "service-cert-controller-metrics.yaml";
pub const SERVICE_BITWARDEN: &str = "service-bitwarden-sdk-server.yaml";

pub const DEPLOYMENT_CONTROLLER: &str = "deployment-external-secrets.yaml";
pub const DEPLOYMENT_WEBHOOK: &str = "deployment-webhook.yaml";
pub const DEPLOYMENT_CERT_CONTROLLER: &str = "deployment-cert-controller.yaml";
pub const DEPLOYMENT_BITWARDEN: &str = "deployment-bitwarden-sdk-server.yaml";

pub const VALIDATING_WEBHOOK_SECRET_STORE: &str = "validatingwebhook-secretstore.yaml";
pub const VALIDATING_WEBHOOK_EXTERNAL_SECRET: &str = "validatingwebhook-externalsecret.yaml";

static ASSETS: &[(&str, &[u8])] = &[
    (NAMESPACE, include_bytes!("../assets/namespace.yaml")),
    (SERVICE_ACCOUNT_CONTROLLER, include_bytes!("../assets/serviceaccount-external-secrets.yaml")),
    (SERVICE_ACCOUNT_WEBHOOK, include_bytes!("../assets/serviceaccount-external-secrets-webhook.yaml")),
    (SERVICE_ACCOUNT_CERT_CONTROLLER, include_bytes!("../assets/serviceaccount-external-secrets-cert-controller.yaml")),
    (SERVICE_ACCOUNT_BITWARDEN, include_bytes!("../assets/serviceaccount-bitwarden-sdk-server.yaml")),
    (CERTIFICATE_WEBHOOK, include_bytes!("../assets/certificate-webhook.yaml")),
    (CERTIFICATE_BITWARDEN, include_bytes!("../assets/certificate-bitwarden.yaml")),
    (SECRET_WEBHOOK, include_bytes!("../assets/secret-webhook.yaml")),
    (CLUSTER_ROLE_CONTROLLER, include_bytes!("../assets/clusterrole-controller.yaml")),
    (CLUSTER_ROLE_VIEW, include_bytes!("../assets/clusterrole-view.yaml")),
    (CLUSTER_ROLE_EDIT, include_bytes!("../assets/clusterrole-edit.yaml")),
    (CLUSTER_ROLE_CERT_CONTROLLER, include_bytes!("../assets/clusterrole-cert-controller.yaml")),
    (CLUSTER_ROLE_BINDING_CONTROLLER, include_bytes!("../assets/clusterrolebinding-controller.yaml")),
    (CLUSTER_ROLE_BINDING_CERT_CONTROLLER, include_bytes!("../assets/clusterrolebinding-cert-controller.yaml")),
    (ROLE_LEADER_ELECTION, include_bytes!("../assets/role-leaderelection.yaml")),
    (ROLE_BINDING_LEADER_ELECTION, include_bytes!("../assets/rolebinding-leaderelection.yaml")),
    (NETWORK_POLICY_DENY_ALL, include_bytes!("../assets/networkpolicy-deny-all-traffic.yaml")),
    (NETWORK_POLICY_MAIN_CONTROLLER, include_bytes!("../assets/networkpolicy-allow-api-server-egress-for-main-controller.yaml")),
    (NETWORK_POLICY_WEBHOOK, include_bytes!("../assets/networkpolicy-allow-api-server-egress-for-webhook.yaml")),
    (NETWORK_POLICY_DNS, include_bytes!("../assets/networkpolicy-allow-to-dns.yaml")),
    (NETWORK_POLICY_CERT_CONTROLLER, include_bytes!("../assets/networkpolicy-allow-api-server-egress-for-cert-controller.yaml")),
    (NETWORK_POLICY_BITWARDEN, include_bytes!("../assets/networkpolicy-allow-api-server-egress-for-bitwarden-sever.yaml")),
    (SERVICE_WEBHOOK, include_bytes!("../assets/service-webhook.yaml")),
    (SERVICE_METRICS, include_bytes!("../assets/service-metrics.yaml")),
    (SERVICE_CERT_CONTROLLER_METRICS, include_bytes!("../assets/service-cert-controller-metrics.yaml")),
    (SERVICE_BITWARDEN, include_bytes!("../assets/service-bitwarden-sdk-server.yaml")),
    (DEPLOYMENT_CONTROLLER, include_bytes!("../assets/deployment-external-secrets.yaml")),
    (DEPLOYMENT_WEBHOOK, include_bytes!("../assets/deployment-webhook.yaml")),
    (DEPLOYMENT_CERT_CONTROLLER, include_bytes!("../assets/deployment-cert-controller.yaml")),
    (DEPLOYMENT_BITWARDEN, include_bytes!("../assets/deployment-bitwarden-sdk-server.yaml")),
    (VALIDATING_WEBHOOK_SECRET_STORE, include_bytes!("../assets/validatingwebhook-secretstore.yaml")),
    (VALIDATING_WEBHOOK_EXTERNAL_SECRET, include_bytes!("../assets/validatingwebhook-externalsecret.yaml")),
];

/// Raw bytes of the named asset
///
/// # Panics
///
/// Panics when `name` is not an embedded asset.
#[must_use]
pub fn asset(name: &str) -> &'static [u8] {
    ASSETS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, bytes)| *bytes)
        .unwrap_or_else(|| panic!("asset {name} is not embedded"))
}

/// Names of every embedded asset
pub fn names() -> impl Iterator<Item = &'static str> {
    ASSETS.iter().map(|(n, _)| *n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_asset_is_valid_yaml_with_a_name() {
        for name in names() {
            let value: serde_yaml::Value = serde_yaml::from_slice(asset(name))
                .unwrap_or_else(|e| panic!("{name} does not parse: {e}"));
            assert!(
                value["metadata"]["name"].as_str().is_some(),
                "{name} has no metadata.name"
            );
        }
    }

    #[test]
    #[should_panic(expected = "is not embedded")]
    fn test_unknown_asset_panics() {
        let _ = asset("no-such-asset.yaml");
    }
}
