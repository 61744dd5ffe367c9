//! # Capability Detection
//!
//! Optional cluster extensions are discovered once at startup. The resulting
//! [`CapabilityRegistry`] is read-only afterwards and travels in the reconciler
//! context.

use crate::constants::{CERT_MANAGER_CERTIFICATE_KIND, CERT_MANAGER_GROUP, CERT_MANAGER_VERSION};
use crate::observability::metrics;
use kube::api::GroupVersionKind;
use kube::discovery::Discovery;
use kube::Client;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{info, warn};

/// Optional extension kinds the operator can make use of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// `cert-manager.io/v1 Certificate`
    Certificates,
}

impl Capability {
    pub const ALL: [Capability; 1] = [Capability::Certificates];

    #[must_use]
    pub fn gvk(self) -> GroupVersionKind {
        match self {
            Capability::Certificates => GroupVersionKind::gvk(
                CERT_MANAGER_GROUP,
                CERT_MANAGER_VERSION,
                CERT_MANAGER_CERTIFICATE_KIND,
            ),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Certificates => "cert-manager.io/v1/Certificate",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of optional extension kinds confirmed present
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityRegistry {
    present: BTreeSet<Capability>,
}

impl CapabilityRegistry {
    pub fn new(present: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            present: present.into_iter().collect(),
        }
    }

    /// Registry with no optional extension
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has(&self, capability: Capability) -> bool {
        self.present.contains(&capability)
    }

    #[must_use]
    pub fn has_certificates(&self) -> bool {
        self.has(Capability::Certificates)
    }

    /// Query API discovery for every known capability
    ///
    /// # Errors
    ///
    /// Returns the discovery failure; a missing group is not an error.
    pub async fn detect(client: Client) -> Result<Self, kube::Error> {
        let discovery = Discovery::new(client)
            .filter(&[CERT_MANAGER_GROUP])
            .run()
            .await?;

        let mut present = BTreeSet::new();
        for capability in Capability::ALL {
            let found = discovery.resolve_gvk(&capability.gvk()).is_some();
            metrics::set_capability_present(capability.as_str(), found);
            if found {
                info!(capability = %capability, "Optional capability detected");
                present.insert(capability);
            } else {
                warn!(
                    capability = %capability,
                    "Optional capability not installed; features depending on it will fail until it is installed and the operator restarted"
                );
            }
        }
        Ok(Self { present })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_has_nothing() {
        let registry = CapabilityRegistry::none();
        assert!(!registry.has_certificates());
    }

    #[test]
    fn test_registry_reports_present_capabilities() {
        let registry = CapabilityRegistry::new([Capability::Certificates]);
        assert!(registry.has_certificates());
        assert_eq!(Capability::Certificates.gvk().kind, "Certificate");
        assert_eq!(Capability::Certificates.gvk().group, "cert-manager.io");
    }
}
