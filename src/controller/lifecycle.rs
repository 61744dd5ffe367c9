//! # Lifecycle Manager
//!
//! Finalizer handling for the primary resource.
//!
//! ```text
//! Active ──(deletionTimestamp set)──> Terminating ──(cleanup done, finalizer removed)──> Removed
//! ```
//!
//! The finalizer is added before any operand object is created and is removed
//! only once the cleanup handler reports completion.

use crate::constants::EVENT_CLEANUP_SKIPPED;
use crate::controller::client::ResourceClient;
use crate::controller::errors::{is_not_found, ReconcileError};
use crate::controller::events::{actions, EventPublisher};
use crate::controller::retry::{retry_on_conflict, RetryPolicy};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::ObjectMeta;
use kube::runtime::events::EventType;
use kube::Resource;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No deletion requested
    Active,
    /// Deletion requested; our finalizer still holds the object
    Terminating,
    /// Deletion requested and our finalizer is gone; nothing left to do
    Removed,
}

#[must_use]
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

#[must_use]
pub fn state_of(meta: &ObjectMeta, finalizer: &str) -> LifecycleState {
    match (meta.deletion_timestamp.is_some(), has_finalizer(meta, finalizer)) {
        (false, _) => LifecycleState::Active,
        (true, true) => LifecycleState::Terminating,
        (true, false) => LifecycleState::Removed,
    }
}

/// Result of a cleanup attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupResult {
    /// Cleanup finished; the finalizer may be removed
    Done,
    /// Try again after the delay; the finalizer stays
    Requeue(Duration),
}

/// Delete-time cleanup hook for the primary resource
#[async_trait]
pub trait CleanupHandler: Send + Sync {
    async fn cleanup(&self, owner: &ObjectReference) -> Result<CleanupResult, ReconcileError>;
}

/// Cleanup that records a warning event and reports completion
///
/// Operand objects are left in place.
pub struct EventOnlyCleanup {
    events: Arc<dyn EventPublisher>,
}

impl std::fmt::Debug for EventOnlyCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventOnlyCleanup").finish_non_exhaustive()
    }
}

impl EventOnlyCleanup {
    #[must_use]
    pub fn new(events: Arc<dyn EventPublisher>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl CleanupHandler for EventOnlyCleanup {
    async fn cleanup(&self, owner: &ObjectReference) -> Result<CleanupResult, ReconcileError> {
        warn!(
            resource.name = owner.name.as_deref().unwrap_or_default(),
            "Operand objects are not removed on delete"
        );
        self.events
            .publish(
                owner,
                EventType::Warning,
                EVENT_CLEANUP_SKIPPED,
                actions::CLEANUP,
                Some("Managed external-secrets objects are left in place; remove them manually if no longer needed".to_string()),
            )
            .await;
        Ok(CleanupResult::Done)
    }
}

/// Add `finalizer` to the named object if it is missing
///
/// Returns `true` when a write was made. Idempotent.
pub async fn ensure_finalizer<K>(
    client: &dyn ResourceClient<K>,
    name: &str,
    finalizer: &str,
    retry: RetryPolicy,
) -> Result<bool, ReconcileError>
where
    K: Resource + Send + Sync,
{
    let result = retry_on_conflict(retry, || async move {
        let Some(current) = client.get(name).await? else {
            return Ok(false);
        };
        let meta = current.meta();
        if has_finalizer(meta, finalizer) {
            return Ok(false);
        }
        let mut finalizers = meta.finalizers.clone().unwrap_or_default();
        finalizers.push(finalizer.to_string());
        client
            .patch_finalizers(name, meta.resource_version.as_deref(), &finalizers)
            .await?;
        Ok(true)
    })
    .await
    .map_err(|e| ReconcileError::from_kube("FinalizerUpdateFailed", &format!("add finalizer to {name}"), e))?;

    if result {
        info!(resource.name = name, finalizer, "Added finalizer");
    }
    Ok(result)
}

/// Remove `finalizer` from the named object
///
/// Returns `true` when a write was made. An object that is already gone counts
/// as done.
pub async fn remove_finalizer<K>(
    client: &dyn ResourceClient<K>,
    name: &str,
    finalizer: &str,
    retry: RetryPolicy,
) -> Result<bool, ReconcileError>
where
    K: Resource + Send + Sync,
{
    let result = retry_on_conflict(retry, || async move {
        let Some(current) = client.get(name).await? else {
            return Ok(false);
        };
        let meta = current.meta();
        if !has_finalizer(meta, finalizer) {
            return Ok(false);
        }
        let finalizers: Vec<String> = meta
            .finalizers
            .iter()
            .flatten()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect();
        match client
            .patch_finalizers(name, meta.resource_version.as_deref(), &finalizers)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    })
    .await
    .map_err(|e| {
        ReconcileError::from_kube("FinalizerUpdateFailed", &format!("remove finalizer from {name}"), e)
    })?;

    if result {
        info!(resource.name = name, finalizer, "Removed finalizer");
    } else {
        debug!(resource.name = name, finalizer, "Finalizer already absent");
    }
    Ok(result)
}

/// Run cleanup for a terminating object, then release it
///
/// Returns the requeue delay when cleanup asks for one; the finalizer stays in
/// that case.
pub async fn finalize<K>(
    client: &dyn ResourceClient<K>,
    cleanup: &dyn CleanupHandler,
    owner: &ObjectReference,
    finalizer: &str,
    retry: RetryPolicy,
) -> Result<Option<Duration>, ReconcileError>
where
    K: Resource + Send + Sync,
{
    let name = owner.name.clone().unwrap_or_default();
    match cleanup.cleanup(owner).await? {
        CleanupResult::Requeue(delay) => {
            debug!(resource.name = name.as_str(), ?delay, "Cleanup requested a requeue");
            Ok(Some(delay))
        }
        CleanupResult::Done => {
            remove_finalizer(client, &name, finalizer, retry).await?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FINALIZER;
    use crate::controller::client::{ClientOp, InMemoryResourceClient};
    use crate::controller::events::RecordingEventPublisher;
    use crate::crd::{ExternalSecretsConfig, ExternalSecretsConfigSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn deleted_at() -> Time {
        serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        }
    }

    fn config() -> ExternalSecretsConfig {
        ExternalSecretsConfig::new("cluster", ExternalSecretsConfigSpec::default())
    }

    fn owner() -> ObjectReference {
        ObjectReference {
            name: Some("cluster".to_string()),
            ..ObjectReference::default()
        }
    }

    struct Requeueing;

    #[async_trait]
    impl CleanupHandler for Requeueing {
        async fn cleanup(&self, _owner: &ObjectReference) -> Result<CleanupResult, ReconcileError> {
            Ok(CleanupResult::Requeue(Duration::from_secs(5)))
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut meta = ObjectMeta::default();
        assert_eq!(state_of(&meta, FINALIZER), LifecycleState::Active);
        meta.deletion_timestamp = Some(deleted_at());
        assert_eq!(state_of(&meta, FINALIZER), LifecycleState::Removed);
        meta.finalizers = Some(vec![FINALIZER.to_string()]);
        assert_eq!(state_of(&meta, FINALIZER), LifecycleState::Terminating);
    }

    #[tokio::test]
    async fn test_ensure_finalizer_is_idempotent() {
        let client = InMemoryResourceClient::<ExternalSecretsConfig>::new();
        client.insert(&config());

        assert!(ensure_finalizer(&client, "cluster", FINALIZER, policy()).await.unwrap());
        assert!(!ensure_finalizer(&client, "cluster", FINALIZER, policy()).await.unwrap());
        assert_eq!(client.finalizer_writes(), 1);

        let stored = client.object("cluster").unwrap();
        assert!(has_finalizer(&stored.metadata, FINALIZER));
    }

    #[tokio::test]
    async fn test_ensure_finalizer_keeps_foreign_finalizers() {
        let client = InMemoryResourceClient::<ExternalSecretsConfig>::new();
        let mut object = config();
        object.metadata.finalizers = Some(vec!["other/finalizer".to_string()]);
        client.insert(&object);

        ensure_finalizer(&client, "cluster", FINALIZER, policy()).await.unwrap();
        let finalizers = client.object("cluster").unwrap().metadata.finalizers.unwrap();
        assert_eq!(finalizers, vec!["other/finalizer".to_string(), FINALIZER.to_string()]);
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let client = InMemoryResourceClient::<ExternalSecretsConfig>::new();
        client.insert(&config());
        client.fail(ClientOp::PatchFinalizers, 409, "Conflict", 2);

        assert!(ensure_finalizer(&client, "cluster", FINALIZER, policy()).await.unwrap());
        assert_eq!(client.finalizer_writes(), 1);
    }

    #[tokio::test]
    async fn test_forbidden_is_irrecoverable() {
        let client = InMemoryResourceClient::<ExternalSecretsConfig>::new();
        client.insert(&config());
        client.fail(ClientOp::PatchFinalizers, 403, "Forbidden", 1);

        let err = ensure_finalizer(&client, "cluster", FINALIZER, policy()).await.unwrap_err();
        assert!(err.is_irrecoverable());
        assert_eq!(err.reason, "FinalizerUpdateFailed");
    }

    #[tokio::test]
    async fn test_finalize_removes_finalizer_after_cleanup() {
        let client = InMemoryResourceClient::<ExternalSecretsConfig>::new();
        let mut object = config();
        object.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        client.insert(&object);
        let events = Arc::new(RecordingEventPublisher::new());
        let cleanup = EventOnlyCleanup::new(events.clone());

        let requeue = finalize(&client, &cleanup, &owner(), FINALIZER, policy()).await.unwrap();

        assert_eq!(requeue, None);
        let stored = client.object("cluster").unwrap();
        assert!(!has_finalizer(&stored.metadata, FINALIZER));
        let warnings = events.with_reason(EVENT_CLEANUP_SKIPPED);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].warning);
    }

    #[tokio::test]
    async fn test_finalize_keeps_finalizer_when_cleanup_requeues() {
        let client = InMemoryResourceClient::<ExternalSecretsConfig>::new();
        let mut object = config();
        object.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        client.insert(&object);

        let requeue = finalize(&client, &Requeueing, &owner(), FINALIZER, policy()).await.unwrap();

        assert_eq!(requeue, Some(Duration::from_secs(5)));
        assert_eq!(client.finalizer_writes(), 0);
    }

    #[tokio::test]
    async fn test_remove_finalizer_on_missing_object_is_done() {
        let client = InMemoryResourceClient::<ExternalSecretsConfig>::new();
        assert!(!remove_finalizer(&client, "cluster", FINALIZER, policy()).await.unwrap());
    }
}
