//! Workload overlays (resources, affinity, tolerations, node selector, proxy).
//!
//! Each field is taken from the config resource when set there, otherwise from
//! the global config. User input types are converted field by field into the
//! `k8s_openapi` pod-spec types.

use crate::crd::{CommonConfigs, ProxyConfig, ResourceRequirements, Toleration};
use k8s_openapi::api::core::v1 as core;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Overlay applied to every managed workload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkloadOverlay {
    pub resources: Option<core::ResourceRequirements>,
    pub affinity: Option<core::Affinity>,
    pub tolerations: Vec<core::Toleration>,
    pub node_selector: BTreeMap<String, String>,
    pub proxy: Option<ProxyConfig>,
}

impl WorkloadOverlay {
    /// Resolve each field from `primary`, falling back to `global`
    #[must_use]
    pub fn resolve(primary: &CommonConfigs, global: Option<&CommonConfigs>) -> Self {
        let resources = primary
            .resources
            .as_ref()
            .filter(|r| !r.is_empty())
            .or_else(|| global.and_then(|g| g.resources.as_ref()).filter(|r| !r.is_empty()))
            .map(to_resource_requirements);

        let affinity = primary
            .affinity
            .clone()
            .or_else(|| global.and_then(|g| g.affinity.clone()));

        let tolerations: &[Toleration] = if primary.tolerations.is_empty() {
            global.map(|g| g.tolerations.as_slice()).unwrap_or_default()
        } else {
            &primary.tolerations
        };
        let tolerations = tolerations.iter().map(to_toleration).collect();

        let node_selector = if primary.node_selector.is_empty() {
            global.map(|g| g.node_selector.clone()).unwrap_or_default()
        } else {
            primary.node_selector.clone()
        };

        let proxy = primary
            .proxy
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| global.and_then(|g| g.proxy.clone()).filter(|p| !p.is_empty()));

        Self {
            resources,
            affinity,
            tolerations,
            node_selector,
            proxy,
        }
    }

    /// Proxy variables to set on every container, in a stable order
    #[must_use]
    pub fn proxy_env(&self) -> Vec<(&'static str, String)> {
        let Some(proxy) = &self.proxy else {
            return Vec::new();
        };
        [
            ("HTTP_PROXY", &proxy.http_proxy),
            ("HTTPS_PROXY", &proxy.https_proxy),
            ("NO_PROXY", &proxy.no_proxy),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (name, v.to_string()))
        })
        .collect()
    }
}

fn quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    (!values.is_empty()).then(|| {
        values
            .iter()
            .map(|(name, value)| (name.clone(), Quantity(value.clone())))
            .collect()
    })
}

#[must_use]
pub fn to_resource_requirements(input: &ResourceRequirements) -> core::ResourceRequirements {
    core::ResourceRequirements {
        limits: quantities(&input.limits),
        requests: quantities(&input.requests),
        ..core::ResourceRequirements::default()
    }
}

#[must_use]
pub fn to_toleration(input: &Toleration) -> core::Toleration {
    core::Toleration {
        key: input.key.clone(),
        operator: input.operator.clone(),
        value: input.value.clone(),
        effect: input.effect.clone(),
        toleration_seconds: input.toleration_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common_with_selector(zone: &str) -> CommonConfigs {
        CommonConfigs {
            node_selector: BTreeMap::from([("zone".to_string(), zone.to_string())]),
            ..CommonConfigs::default()
        }
    }

    #[test]
    fn test_primary_wins_per_field() {
        let mut primary = common_with_selector("a");
        primary.tolerations = Vec::new();
        let mut global = common_with_selector("b");
        global.tolerations = vec![Toleration {
            operator: Some("Exists".to_string()),
            ..Toleration::default()
        }];

        let overlay = WorkloadOverlay::resolve(&primary, Some(&global));
        assert_eq!(overlay.node_selector.get("zone").map(String::as_str), Some("a"));
        assert_eq!(overlay.tolerations.len(), 1);
        assert_eq!(overlay.tolerations[0].operator.as_deref(), Some("Exists"));
    }

    #[test]
    fn test_resources_are_converted() {
        let primary = CommonConfigs {
            resources: Some(ResourceRequirements {
                limits: BTreeMap::from([("memory".to_string(), "1Gi".to_string())]),
                requests: BTreeMap::new(),
            }),
            ..CommonConfigs::default()
        };
        let overlay = WorkloadOverlay::resolve(&primary, None);
        let resources = overlay.resources.unwrap();
        assert_eq!(
            resources.limits.unwrap().get("memory"),
            Some(&Quantity("1Gi".to_string()))
        );
        assert!(resources.requests.is_none());
    }

    #[test]
    fn test_proxy_falls_back_to_global() {
        let global = CommonConfigs {
            proxy: Some(ProxyConfig {
                http_proxy: Some("http://proxy:3128".to_string()),
                https_proxy: None,
                no_proxy: Some(".cluster.local".to_string()),
            }),
            ..CommonConfigs::default()
        };
        let overlay = WorkloadOverlay::resolve(&CommonConfigs::default(), Some(&global));
        assert_eq!(
            overlay.proxy_env(),
            vec![
                ("HTTP_PROXY", "http://proxy:3128".to_string()),
                ("NO_PROXY", ".cluster.local".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_inputs_give_empty_overlay() {
        assert_eq!(
            WorkloadOverlay::resolve(&CommonConfigs::default(), None),
            WorkloadOverlay::default()
        );
    }
}
