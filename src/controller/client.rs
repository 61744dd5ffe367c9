//! # Custom Resource Client
//!
//! Narrow read/patch surface over the operator's own cluster-scoped custom
//! resources. Finalizer and status writes carry the resourceVersion they were
//! computed from so a concurrent writer surfaces as a conflict.

use crate::constants::OPERATOR_NAME;
use crate::controller::errors::api_error;
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::core::ClusterResourceScope;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Mutex;

#[async_trait]
pub trait ResourceClient<K>: Send + Sync {
    /// Fetch by name; `None` when absent
    async fn get(&self, name: &str) -> Result<Option<K>, kube::Error>;

    async fn create(&self, object: &K) -> Result<K, kube::Error>;

    /// Replace `metadata.finalizers`
    async fn patch_finalizers(
        &self,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<K, kube::Error>;

    /// Merge `status` into the status subresource
    async fn patch_status(
        &self,
        name: &str,
        resource_version: Option<&str>,
        status: Value,
    ) -> Result<K, kube::Error>;
}

/// Client backed by the API server
pub struct KubeResourceClient<K> {
    api: Api<K>,
}

impl<K> std::fmt::Debug for KubeResourceClient<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceClient").finish_non_exhaustive()
    }
}

impl<K> KubeResourceClient<K>
where
    K: Resource<Scope = ClusterResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn with_resource_version(mut patch: Value, resource_version: Option<&str>) -> Value {
    if let Some(rv) = resource_version {
        patch["metadata"]["resourceVersion"] = json!(rv);
    }
    patch
}

#[async_trait]
impl<K> ResourceClient<K> for KubeResourceClient<K>
where
    K: Resource<Scope = ClusterResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
    <K as Resource>::DynamicType: Default,
{
    async fn get(&self, name: &str) -> Result<Option<K>, kube::Error> {
        self.api.get_opt(name).await
    }

    async fn create(&self, object: &K) -> Result<K, kube::Error> {
        let params = PostParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..PostParams::default()
        };
        self.api.create(&params, object).await
    }

    async fn patch_finalizers(
        &self,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<K, kube::Error> {
        let patch = with_resource_version(json!({ "metadata": { "finalizers": finalizers } }), resource_version);
        self.api
            .patch(name, &PatchParams::apply(OPERATOR_NAME), &Patch::Merge(patch))
            .await
    }

    async fn patch_status(
        &self,
        name: &str,
        resource_version: Option<&str>,
        status: Value,
    ) -> Result<K, kube::Error> {
        let patch = with_resource_version(json!({ "status": status }), resource_version);
        self.api
            .patch_status(name, &PatchParams::apply(OPERATOR_NAME), &Patch::Merge(patch))
            .await
    }
}

/// Which [`InMemoryResourceClient`] call a failure is injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOp {
    Get,
    Create,
    PatchFinalizers,
    PatchStatus,
}

#[derive(Debug)]
struct Failure {
    op: ClientOp,
    code: u16,
    reason: String,
    remaining: u32,
}

#[derive(Debug, Default)]
struct ClientState {
    objects: BTreeMap<String, Value>,
    version: u64,
    status_writes: usize,
    finalizer_writes: usize,
    failures: Vec<Failure>,
}

/// In-memory client used by tests
///
/// Objects are kept as JSON; patches are applied with JSON merge-patch rules and
/// every write bumps `metadata.resourceVersion`.
#[derive(Debug)]
pub struct InMemoryResourceClient<K> {
    state: Mutex<ClientState>,
    _kind: std::marker::PhantomData<fn() -> K>,
}

impl<K> InMemoryResourceClient<K>
where
    K: Serialize + DeserializeOwned + Resource,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClientState::default()),
            _kind: std::marker::PhantomData,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Store `object` as-is, assigning a fresh resourceVersion
    pub fn insert(&self, object: &K) {
        let mut state = self.lock();
        if let Ok(value) = serde_json::to_value(object) {
            let name = value["metadata"]["name"].as_str().unwrap_or_default().to_string();
            state.version += 1;
            let mut value = value;
            value["metadata"]["resourceVersion"] = json!(state.version.to_string());
            state.objects.insert(name, value);
        }
    }

    /// Current stored object
    #[must_use]
    pub fn object(&self, name: &str) -> Option<K> {
        let state = self.lock();
        state
            .objects
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    #[must_use]
    pub fn status_writes(&self) -> usize {
        self.lock().status_writes
    }

    #[must_use]
    pub fn finalizer_writes(&self) -> usize {
        self.lock().finalizer_writes
    }

    /// Bump the stored resourceVersion as if another writer touched the object
    pub fn touch(&self, name: &str) {
        let mut state = self.lock();
        state.version += 1;
        let version = state.version.to_string();
        if let Some(value) = state.objects.get_mut(name) {
            value["metadata"]["resourceVersion"] = json!(version);
        }
    }

    /// Fail the next `times` calls of `op` with the given API status
    pub fn fail(&self, op: ClientOp, code: u16, reason: &str, times: u32) {
        self.lock().failures.push(Failure {
            op,
            code,
            reason: reason.to_string(),
            remaining: times,
        });
    }

    fn injected(state: &mut ClientState, op: ClientOp) -> Result<(), kube::Error> {
        if let Some(failure) = state
            .failures
            .iter_mut()
            .find(|f| f.op == op && f.remaining > 0)
        {
            failure.remaining -= 1;
            return Err(api_error(failure.code, &failure.reason, "injected failure"));
        }
        Ok(())
    }

    fn patch(
        &self,
        op: ClientOp,
        name: &str,
        resource_version: Option<&str>,
        patch: &Value,
    ) -> Result<K, kube::Error> {
        let mut state = self.lock();
        Self::injected(&mut state, op)?;
        state.version += 1;
        let version = state.version.to_string();
        let Some(current) = state.objects.get_mut(name) else {
            return Err(api_error(404, "NotFound", &format!("{name} not found")));
        };
        if let Some(rv) = resource_version {
            if current["metadata"]["resourceVersion"].as_str() != Some(rv) {
                return Err(api_error(409, "Conflict", "the object has been modified"));
            }
        }
        merge_patch(current, patch);
        current["metadata"]["resourceVersion"] = json!(version);
        let result = serde_json::from_value(current.clone()).map_err(kube::Error::SerdeError)?;
        match op {
            ClientOp::PatchStatus => state.status_writes += 1,
            ClientOp::PatchFinalizers => state.finalizer_writes += 1,
            ClientOp::Get | ClientOp::Create => {}
        }
        Ok(result)
    }
}

/// RFC 7386 JSON merge patch
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[async_trait]
impl<K> ResourceClient<K> for InMemoryResourceClient<K>
where
    K: Serialize + DeserializeOwned + Resource + Send + Sync,
{
    async fn get(&self, name: &str) -> Result<Option<K>, kube::Error> {
        let mut state = self.lock();
        Self::injected(&mut state, ClientOp::Get)?;
        state
            .objects
            .get(name)
            .map(|v| serde_json::from_value(v.clone()).map_err(kube::Error::SerdeError))
            .transpose()
    }

    async fn create(&self, object: &K) -> Result<K, kube::Error> {
        let mut state = self.lock();
        Self::injected(&mut state, ClientOp::Create)?;
        let mut value = serde_json::to_value(object).map_err(kube::Error::SerdeError)?;
        let name = value["metadata"]["name"].as_str().unwrap_or_default().to_string();
        if state.objects.contains_key(&name) {
            return Err(api_error(409, "AlreadyExists", &format!("{name} already exists")));
        }
        state.version += 1;
        value["metadata"]["resourceVersion"] = json!(state.version.to_string());
        state.objects.insert(name, value.clone());
        serde_json::from_value(value).map_err(kube::Error::SerdeError)
    }

    async fn patch_finalizers(
        &self,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<K, kube::Error> {
        self.patch(
            ClientOp::PatchFinalizers,
            name,
            resource_version,
            &json!({ "metadata": { "finalizers": finalizers } }),
        )
    }

    async fn patch_status(
        &self,
        name: &str,
        resource_version: Option<&str>,
        status: Value,
    ) -> Result<K, kube::Error> {
        self.patch(ClientOp::PatchStatus, name, resource_version, &json!({ "status": status }))
    }
}
