//! # Object Store
//!
//! Client seam used by the reconciliation driver: typed get/create/replace/delete
//! over the managed kinds. [`KubeStore`] talks to the API server; [`InMemoryStore`]
//! keeps objects in memory with API-server-like conflict semantics for tests.

use crate::constants::{OPERAND_NAMESPACE, OPERATOR_NAME};
use crate::controller::errors::api_error;
use crate::controller::resources::{ManagedKind, ManagedObject, ObjectKey};
use crate::crd::Certificate;
use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Resource};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist
    async fn get(&self, kind: ManagedKind, key: &ObjectKey) -> Result<Option<ManagedObject>, kube::Error>;
    async fn create(&self, object: &ManagedObject) -> Result<ManagedObject, kube::Error>;
    /// Full replace, guarded by the object's resourceVersion
    async fn replace(&self, object: &ManagedObject) -> Result<ManagedObject, kube::Error>;
    async fn delete(&self, kind: ManagedKind, key: &ObjectKey) -> Result<(), kube::Error>;
}

/// API-server backed store using one typed `Api` per kind
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: Resource<Scope = ClusterResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }

    fn namespaced<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace.unwrap_or(OPERAND_NAMESPACE))
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(OPERATOR_NAME.to_string()),
        ..PostParams::default()
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, kind: ManagedKind, key: &ObjectKey) -> Result<Option<ManagedObject>, kube::Error> {
        let ns = key.namespace.as_deref();
        let name = key.name.as_str();
        Ok(match kind {
            ManagedKind::Namespace => self
                .cluster::<Namespace>()
                .get_opt(name)
                .await?
                .map(ManagedObject::Namespace),
            ManagedKind::ServiceAccount => self
                .namespaced::<ServiceAccount>(ns)
                .get_opt(name)
                .await?
                .map(ManagedObject::ServiceAccount),
            ManagedKind::Certificate => self
                .namespaced::<Certificate>(ns)
                .get_opt(name)
                .await?
                .map(ManagedObject::Certificate),
            ManagedKind::Secret => self
                .namespaced::<Secret>(ns)
                .get_opt(name)
                .await?
                .map(ManagedObject::Secret),
            ManagedKind::ClusterRole => self
                .cluster::<ClusterRole>()
                .get_opt(name)
                .await?
                .map(ManagedObject::ClusterRole),
            ManagedKind::ClusterRoleBinding => self
                .cluster::<ClusterRoleBinding>()
                .get_opt(name)
                .await?
                .map(ManagedObject::ClusterRoleBinding),
            ManagedKind::Role => self
                .namespaced::<Role>(ns)
                .get_opt(name)
                .await?
                .map(ManagedObject::Role),
            ManagedKind::RoleBinding => self
                .namespaced::<RoleBinding>(ns)
                .get_opt(name)
                .await?
                .map(ManagedObject::RoleBinding),
            ManagedKind::NetworkPolicy => self
                .namespaced::<NetworkPolicy>(ns)
                .get_opt(name)
                .await?
                .map(ManagedObject::NetworkPolicy),
            ManagedKind::Service => self
                .namespaced::<Service>(ns)
                .get_opt(name)
                .await?
                .map(ManagedObject::Service),
            ManagedKind::Deployment => self
                .namespaced::<Deployment>(ns)
                .get_opt(name)
                .await?
                .map(ManagedObject::Deployment),
            ManagedKind::ValidatingWebhookConfiguration => self
                .cluster::<ValidatingWebhookConfiguration>()
                .get_opt(name)
                .await?
                .map(ManagedObject::ValidatingWebhookConfiguration),
        })
    }

    async fn create(&self, object: &ManagedObject) -> Result<ManagedObject, kube::Error> {
        let pp = post_params();
        let ns = object.metadata().namespace.as_deref();
        Ok(match object {
            ManagedObject::Namespace(o) => ManagedObject::Namespace(self.cluster().create(&pp, o).await?),
            ManagedObject::ServiceAccount(o) => {
                ManagedObject::ServiceAccount(self.namespaced(ns).create(&pp, o).await?)
            }
            ManagedObject::Certificate(o) => {
                ManagedObject::Certificate(self.namespaced(ns).create(&pp, o).await?)
            }
            ManagedObject::Secret(o) => ManagedObject::Secret(self.namespaced(ns).create(&pp, o).await?),
            ManagedObject::ClusterRole(o) => {
                ManagedObject::ClusterRole(self.cluster().create(&pp, o).await?)
            }
            ManagedObject::ClusterRoleBinding(o) => {
                ManagedObject::ClusterRoleBinding(self.cluster().create(&pp, o).await?)
            }
            ManagedObject::Role(o) => ManagedObject::Role(self.namespaced(ns).create(&pp, o).await?),
            ManagedObject::RoleBinding(o) => {
                ManagedObject::RoleBinding(self.namespaced(ns).create(&pp, o).await?)
            }
            ManagedObject::NetworkPolicy(o) => {
                ManagedObject::NetworkPolicy(self.namespaced(ns).create(&pp, o).await?)
            }
            ManagedObject::Service(o) => ManagedObject::Service(self.namespaced(ns).create(&pp, o).await?),
            ManagedObject::Deployment(o) => {
                ManagedObject::Deployment(self.namespaced(ns).create(&pp, o).await?)
            }
            ManagedObject::ValidatingWebhookConfiguration(o) => {
                ManagedObject::ValidatingWebhookConfiguration(self.cluster().create(&pp, o).await?)
            }
        })
    }

    async fn replace(&self, object: &ManagedObject) -> Result<ManagedObject, kube::Error> {
        let pp = post_params();
        let key = object.key();
        let ns = key.namespace.as_deref();
        let name = key.name.as_str();
        Ok(match object {
            ManagedObject::Namespace(o) => {
                ManagedObject::Namespace(self.cluster().replace(name, &pp, o).await?)
            }
            ManagedObject::ServiceAccount(o) => {
                ManagedObject::ServiceAccount(self.namespaced(ns).replace(name, &pp, o).await?)
            }
            ManagedObject::Certificate(o) => {
                ManagedObject::Certificate(self.namespaced(ns).replace(name, &pp, o).await?)
            }
            ManagedObject::Secret(o) => {
                ManagedObject::Secret(self.namespaced(ns).replace(name, &pp, o).await?)
            }
            ManagedObject::ClusterRole(o) => {
                ManagedObject::ClusterRole(self.cluster().replace(name, &pp, o).await?)
            }
            ManagedObject::ClusterRoleBinding(o) => {
                ManagedObject::ClusterRoleBinding(self.cluster().replace(name, &pp, o).await?)
            }
            ManagedObject::Role(o) => ManagedObject::Role(self.namespaced(ns).replace(name, &pp, o).await?),
            ManagedObject::RoleBinding(o) => {
                ManagedObject::RoleBinding(self.namespaced(ns).replace(name, &pp, o).await?)
            }
            ManagedObject::NetworkPolicy(o) => {
                ManagedObject::NetworkPolicy(self.namespaced(ns).replace(name, &pp, o).await?)
            }
            ManagedObject::Service(o) => {
                ManagedObject::Service(self.namespaced(ns).replace(name, &pp, o).await?)
            }
            ManagedObject::Deployment(o) => {
                ManagedObject::Deployment(self.namespaced(ns).replace(name, &pp, o).await?)
            }
            ManagedObject::ValidatingWebhookConfiguration(o) => {
                ManagedObject::ValidatingWebhookConfiguration(self.cluster().replace(name, &pp, o).await?)
            }
        })
    }

    async fn delete(&self, kind: ManagedKind, key: &ObjectKey) -> Result<(), kube::Error> {
        let dp = DeleteParams::default();
        let ns = key.namespace.as_deref();
        let name = key.name.as_str();
        match kind {
            ManagedKind::Namespace => {
                self.cluster::<Namespace>().delete(name, &dp).await?;
            }
            ManagedKind::ServiceAccount => {
                self.namespaced::<ServiceAccount>(ns).delete(name, &dp).await?;
            }
            ManagedKind::Certificate => {
                self.namespaced::<Certificate>(ns).delete(name, &dp).await?;
            }
            ManagedKind::Secret => {
                self.namespaced::<Secret>(ns).delete(name, &dp).await?;
            }
            ManagedKind::ClusterRole => {
                self.cluster::<ClusterRole>().delete(name, &dp).await?;
            }
            ManagedKind::ClusterRoleBinding => {
                self.cluster::<ClusterRoleBinding>().delete(name, &dp).await?;
            }
            ManagedKind::Role => {
                self.namespaced::<Role>(ns).delete(name, &dp).await?;
            }
            ManagedKind::RoleBinding => {
                self.namespaced::<RoleBinding>(ns).delete(name, &dp).await?;
            }
            ManagedKind::NetworkPolicy => {
                self.namespaced::<NetworkPolicy>(ns).delete(name, &dp).await?;
            }
            ManagedKind::Service => {
                self.namespaced::<Service>(ns).delete(name, &dp).await?;
            }
            ManagedKind::Deployment => {
                self.namespaced::<Deployment>(ns).delete(name, &dp).await?;
            }
            ManagedKind::ValidatingWebhookConfiguration => {
                self.cluster::<ValidatingWebhookConfiguration>()
                    .delete(name, &dp)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Store operation, as recorded by [`InMemoryStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreOp {
    Get,
    Create,
    Replace,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub kind: ManagedKind,
    pub key: ObjectKey,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    code: u16,
    reason: String,
    remaining: u32,
}

#[derive(Debug, Default)]
struct InMemoryState {
    objects: BTreeMap<(ManagedKind, ObjectKey), ManagedObject>,
    calls: Vec<StoreCall>,
    failures: BTreeMap<(StoreOp, ManagedKind, String), InjectedFailure>,
    next_version: u64,
}

/// In-memory store with resourceVersion checks, call recording and failure injection
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seed a live object, as if another actor created it
    pub fn insert(&self, mut object: ManagedObject) {
        let mut state = self.lock();
        state.next_version += 1;
        object.metadata_mut().resource_version = Some(state.next_version.to_string());
        state.objects.insert((object.kind(), object.key()), object);
    }

    /// Drop a live object, as if another actor deleted it
    pub fn remove(&self, kind: ManagedKind, key: &ObjectKey) -> Option<ManagedObject> {
        self.lock().objects.remove(&(kind, key.clone()))
    }

    #[must_use]
    pub fn object(&self, kind: ManagedKind, key: &ObjectKey) -> Option<ManagedObject> {
        self.lock().objects.get(&(kind, key.clone())).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Calls of the given operation since the last [`InMemoryStore::clear_calls`]
    #[must_use]
    pub fn count(&self, op: StoreOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Fail the next `times` calls of `op` on `kind`/`name` with an API error
    pub fn fail(&self, op: StoreOp, kind: ManagedKind, name: &str, code: u16, reason: &str, times: u32) {
        self.lock().failures.insert(
            (op, kind, name.to_string()),
            InjectedFailure {
                code,
                reason: reason.to_string(),
                remaining: times,
            },
        );
    }

    fn record(&self, op: StoreOp, kind: ManagedKind, key: &ObjectKey) -> Result<(), kube::Error> {
        let mut state = self.lock();
        state.calls.push(StoreCall {
            op,
            kind,
            key: key.clone(),
        });
        let slot = (op, kind, key.name.clone());
        if let Some(failure) = state.failures.get_mut(&slot) {
            if failure.remaining > 0 {
                failure.remaining -= 1;
                return Err(api_error(failure.code, &failure.reason, "injected failure"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, kind: ManagedKind, key: &ObjectKey) -> Result<Option<ManagedObject>, kube::Error> {
        self.record(StoreOp::Get, kind, key)?;
        Ok(self.object(kind, key))
    }

    async fn create(&self, object: &ManagedObject) -> Result<ManagedObject, kube::Error> {
        let (kind, key) = (object.kind(), object.key());
        self.record(StoreOp::Create, kind, &key)?;
        let mut state = self.lock();
        if state.objects.contains_key(&(kind, key.clone())) {
            return Err(api_error(409, "AlreadyExists", &format!("{kind} {key} already exists")));
        }
        state.next_version += 1;
        let mut stored = object.clone();
        stored.metadata_mut().resource_version = Some(state.next_version.to_string());
        state.objects.insert((kind, key), stored.clone());
        Ok(stored)
    }

    async fn replace(&self, object: &ManagedObject) -> Result<ManagedObject, kube::Error> {
        let (kind, key) = (object.kind(), object.key());
        self.record(StoreOp::Replace, kind, &key)?;
        let mut state = self.lock();
        let Some(current) = state.objects.get(&(kind, key.clone())) else {
            return Err(api_error(404, "NotFound", &format!("{kind} {key} not found")));
        };
        if current.metadata().resource_version != object.metadata().resource_version {
            return Err(api_error(409, "Conflict", "the object has been modified"));
        }
        state.next_version += 1;
        let mut stored = object.clone();
        stored.metadata_mut().resource_version = Some(state.next_version.to_string());
        state.objects.insert((kind, key), stored.clone());
        Ok(stored)
    }

    async fn delete(&self, kind: ManagedKind, key: &ObjectKey) -> Result<(), kube::Error> {
        self.record(StoreOp::Delete, kind, key)?;
        match self.lock().objects.remove(&(kind, key.clone())) {
            Some(_) => Ok(()),
            None => Err(api_error(404, "NotFound", &format!("{kind} {key} not found"))),
        }
    }
}
