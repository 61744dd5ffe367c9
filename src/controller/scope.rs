//! # Watch Scope
//!
//! The change-notification set of the config controller: only objects carrying
//! the operator's identity label, plus the Certificate kind when cert-manager is
//! installed. Every event maps back to the singleton `ExternalSecretsConfig`.

use crate::constants::{LABEL_APP, LABEL_APP_VALUE, SINGLETON_NAME};
use crate::controller::capability::CapabilityRegistry;
use crate::controller::resources::ManagedKind;
use crate::crd::ExternalSecretsConfig;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::Resource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchScope {
    kinds: Vec<ManagedKind>,
}

impl WatchScope {
    #[must_use]
    pub fn new(capabilities: &CapabilityRegistry) -> Self {
        let kinds = ManagedKind::ALL
            .into_iter()
            .filter(|kind| *kind != ManagedKind::Certificate || capabilities.has_certificates())
            .collect();
        Self { kinds }
    }

    #[must_use]
    pub fn kinds(&self) -> &[ManagedKind] {
        &self.kinds
    }

    #[must_use]
    pub fn includes(&self, kind: ManagedKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// `app=external-secrets`
    #[must_use]
    pub fn label_selector() -> String {
        format!("{LABEL_APP}={LABEL_APP_VALUE}")
    }

    #[must_use]
    pub fn watcher_config() -> watcher::Config {
        watcher::Config::default().labels(&Self::label_selector())
    }
}

/// Map a change on a managed object to the config singleton
///
/// Objects without the identity label are dropped even if a watch delivered them.
pub fn to_config_singleton<K: Resource>(object: K) -> Option<ObjectRef<ExternalSecretsConfig>> {
    let labelled = object
        .meta()
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_APP))
        .is_some_and(|v| v == LABEL_APP_VALUE);
    labelled.then(|| ObjectRef::new(SINGLETON_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::capability::Capability;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn test_certificate_kind_watched_only_when_present() {
        assert!(!WatchScope::new(&CapabilityRegistry::none()).includes(ManagedKind::Certificate));
        let scope = WatchScope::new(&CapabilityRegistry::new([Capability::Certificates]));
        assert!(scope.includes(ManagedKind::Certificate));
        assert_eq!(scope.kinds().len(), ManagedKind::ALL.len());
    }

    #[test]
    fn test_label_selector() {
        assert_eq!(WatchScope::label_selector(), "app=external-secrets");
    }

    #[test]
    fn test_only_labelled_objects_map_to_singleton() {
        let labelled = Deployment {
            metadata: ObjectMeta {
                name: Some("external-secrets".to_string()),
                labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    "external-secrets".to_string(),
                )])),
                ..ObjectMeta::default()
            },
            ..Deployment::default()
        };
        let target = to_config_singleton(labelled).unwrap();
        assert_eq!(target.name, "cluster");
        assert!(to_config_singleton(Deployment::default()).is_none());
    }
}
