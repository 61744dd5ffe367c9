//! # Managed Resources
//!
//! Closed set of object kinds the operator manages, the typed object wrapper the
//! driver and drift detector dispatch on, and the resource descriptors produced by
//! the desired-state builder.

use crate::crd::Certificate;
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::fmt;

/// Kinds of object the operator creates and keeps converged
///
/// Declaration order is the application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManagedKind {
    Namespace,
    ServiceAccount,
    Certificate,
    Secret,
    ClusterRole,
    ClusterRoleBinding,
    Role,
    RoleBinding,
    NetworkPolicy,
    Service,
    Deployment,
    ValidatingWebhookConfiguration,
}

impl ManagedKind {
    pub const ALL: [ManagedKind; 12] = [
        ManagedKind::Namespace,
        ManagedKind::ServiceAccount,
        ManagedKind::Certificate,
        ManagedKind::Secret,
        ManagedKind::ClusterRole,
        ManagedKind::ClusterRoleBinding,
        ManagedKind::Role,
        ManagedKind::RoleBinding,
        ManagedKind::NetworkPolicy,
        ManagedKind::Service,
        ManagedKind::Deployment,
        ManagedKind::ValidatingWebhookConfiguration,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ManagedKind::Namespace => "Namespace",
            ManagedKind::ServiceAccount => "ServiceAccount",
            ManagedKind::Certificate => "Certificate",
            ManagedKind::Secret => "Secret",
            ManagedKind::ClusterRole => "ClusterRole",
            ManagedKind::ClusterRoleBinding => "ClusterRoleBinding",
            ManagedKind::Role => "Role",
            ManagedKind::RoleBinding => "RoleBinding",
            ManagedKind::NetworkPolicy => "NetworkPolicy",
            ManagedKind::Service => "Service",
            ManagedKind::Deployment => "Deployment",
            ManagedKind::ValidatingWebhookConfiguration => "ValidatingWebhookConfiguration",
        }
    }

    #[must_use]
    pub fn is_namespaced(self) -> bool {
        !matches!(
            self,
            ManagedKind::Namespace
                | ManagedKind::ClusterRole
                | ManagedKind::ClusterRoleBinding
                | ManagedKind::ValidatingWebhookConfiguration
        )
    }
}

impl fmt::Display for ManagedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name/namespace key of a managed object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A typed object of one of the managed kinds
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedObject {
    Namespace(Namespace),
    ServiceAccount(ServiceAccount),
    Certificate(Certificate),
    Secret(Secret),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    Role(Role),
    RoleBinding(RoleBinding),
    NetworkPolicy(NetworkPolicy),
    Service(Service),
    Deployment(Deployment),
    ValidatingWebhookConfiguration(ValidatingWebhookConfiguration),
}

macro_rules! with_object {
    ($value:expr, $o:ident => $body:expr) => {
        match $value {
            ManagedObject::Namespace($o) => $body,
            ManagedObject::ServiceAccount($o) => $body,
            ManagedObject::Certificate($o) => $body,
            ManagedObject::Secret($o) => $body,
            ManagedObject::ClusterRole($o) => $body,
            ManagedObject::ClusterRoleBinding($o) => $body,
            ManagedObject::Role($o) => $body,
            ManagedObject::RoleBinding($o) => $body,
            ManagedObject::NetworkPolicy($o) => $body,
            ManagedObject::Service($o) => $body,
            ManagedObject::Deployment($o) => $body,
            ManagedObject::ValidatingWebhookConfiguration($o) => $body,
        }
    };
}

impl ManagedObject {
    #[must_use]
    pub fn kind(&self) -> ManagedKind {
        match self {
            ManagedObject::Namespace(_) => ManagedKind::Namespace,
            ManagedObject::ServiceAccount(_) => ManagedKind::ServiceAccount,
            ManagedObject::Certificate(_) => ManagedKind::Certificate,
            ManagedObject::Secret(_) => ManagedKind::Secret,
            ManagedObject::ClusterRole(_) => ManagedKind::ClusterRole,
            ManagedObject::ClusterRoleBinding(_) => ManagedKind::ClusterRoleBinding,
            ManagedObject::Role(_) => ManagedKind::Role,
            ManagedObject::RoleBinding(_) => ManagedKind::RoleBinding,
            ManagedObject::NetworkPolicy(_) => ManagedKind::NetworkPolicy,
            ManagedObject::Service(_) => ManagedKind::Service,
            ManagedObject::Deployment(_) => ManagedKind::Deployment,
            ManagedObject::ValidatingWebhookConfiguration(_) => {
                ManagedKind::ValidatingWebhookConfiguration
            }
        }
    }

    #[must_use]
    pub fn metadata(&self) -> &ObjectMeta {
        with_object!(self, o => &o.metadata)
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        with_object!(self, o => &mut o.metadata)
    }

    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::from_meta(self.metadata())
    }

    /// `Kind namespace/name`, for messages and events
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} {}", self.kind(), self.key())
    }
}

/// Why a descriptor is part of the desired set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inclusion {
    Always,
    /// Operand cert-controller runs because cert-manager is not used
    CertManagerDisabled,
    /// cert-manager mode enabled and the Certificate kind is served
    CertManagerEnabled,
    BitwardenEnabled,
    /// One entry of `controllerConfig.networkPolicies`
    UserNetworkPolicy,
}

/// One target object of a reconcile pass
///
/// Built fresh on every pass and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub kind: ManagedKind,
    pub key: ObjectKey,
    /// Template the object was rendered from
    pub asset: &'static str,
    pub inclusion: Inclusion,
    pub desired: ManagedObject,
}

impl ResourceDescriptor {
    #[must_use]
    pub fn new(asset: &'static str, inclusion: Inclusion, desired: ManagedObject) -> Self {
        Self {
            kind: desired.kind(),
            key: desired.key(),
            asset,
            inclusion,
            desired,
        }
    }

    /// Whether `live` differs from this descriptor in any field the operator owns
    #[must_use]
    pub fn has_drifted(&self, live: &ManagedObject) -> bool {
        crate::controller::drift::has_drifted(live, &self.desired)
    }

    /// `live` with the owned fields of this descriptor written over it
    #[must_use]
    pub fn prepare_update(&self, live: &ManagedObject) -> ManagedObject {
        crate::controller::merge::prepare_update(live, &self.desired)
    }

    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} {}", self.kind, self.key)
    }
}

/// Object deleted because the feature that produced it is disabled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleObject {
    pub kind: ManagedKind,
    pub key: ObjectKey,
}

impl StaleObject {
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} {}", self.kind, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_order_is_dependency_order() {
        let mut sorted = ManagedKind::ALL;
        sorted.sort();
        assert_eq!(sorted, ManagedKind::ALL);
        assert_eq!(ManagedKind::ALL[0], ManagedKind::Namespace);
        assert_eq!(ManagedKind::ALL[11], ManagedKind::ValidatingWebhookConfiguration);
    }

    #[test]
    fn test_object_key_display() {
        assert_eq!(ObjectKey::namespaced("ns", "a").to_string(), "ns/a");
        assert_eq!(ObjectKey::cluster("a").to_string(), "a");
    }
}
