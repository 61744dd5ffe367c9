//! # Reconciliation Driver
//!
//! Applies an ordered list of [`ResourceDescriptor`]s: create what is missing,
//! update what drifted, leave the rest alone. The first failing descriptor stops
//! the pass; the next pass replays the list from the start.

use crate::constants::{EVENT_ALREADY_EXISTS, EVENT_CREATED, EVENT_DELETED, EVENT_RECONCILED};
use crate::controller::errors::{api_error, is_not_found, ReconcileError};
use crate::controller::events::{actions, EventPublisher};
use crate::controller::resources::{ResourceDescriptor, StaleObject};
use crate::controller::retry::{retry_on_conflict, RetryPolicy};
use crate::controller::store::ObjectStore;
use crate::observability::metrics;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use tracing::{debug, info, warn};

/// What happened to one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

/// Per-pass counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl ApplySummary {
    fn record(&mut self, applied: Applied) {
        match applied {
            Applied::Created => self.created += 1,
            Applied::Updated => self.updated += 1,
            Applied::Unchanged => self.unchanged += 1,
        }
    }

    /// Whether the pass wrote anything
    #[must_use]
    pub fn changed(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

pub struct Driver<'a> {
    store: &'a dyn ObjectStore,
    events: &'a dyn EventPublisher,
    /// Resource the events are recorded on
    owner: ObjectReference,
    retry: RetryPolicy,
    /// The owner has never completed a pass
    first_reconcile: bool,
}

impl<'a> Driver<'a> {
    #[must_use]
    pub fn new(
        store: &'a dyn ObjectStore,
        events: &'a dyn EventPublisher,
        owner: ObjectReference,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            events,
            owner,
            retry,
            first_reconcile: false,
        }
    }

    #[must_use]
    pub fn first_reconcile(mut self, first: bool) -> Self {
        self.first_reconcile = first;
        self
    }

    /// Apply every descriptor in order, stopping at the first failure
    pub async fn apply(&self, descriptors: &[ResourceDescriptor]) -> Result<ApplySummary, ReconcileError> {
        let mut summary = ApplySummary::default();
        for descriptor in descriptors {
            summary.record(self.apply_one(descriptor).await?);
        }
        Ok(summary)
    }

    pub async fn apply_one(&self, descriptor: &ResourceDescriptor) -> Result<Applied, ReconcileError> {
        let identity = descriptor.describe();
        let live = self
            .store
            .get(descriptor.kind, &descriptor.key)
            .await
            .map_err(|e| ReconcileError::from_kube("GetFailed", &format!("fetch {identity}"), e))?;

        let Some(live) = live else {
            self.store
                .create(&descriptor.desired)
                .await
                .map_err(|e| ReconcileError::from_kube("CreateFailed", &format!("create {identity}"), e))?;
            info!(kind = %descriptor.kind, object = %descriptor.key, "Created managed object");
            metrics::increment_objects_created(descriptor.kind.as_str());
            self.publish(EventType::Normal, EVENT_CREATED, actions::CREATE, format!("Created {identity}"))
                .await;
            return Ok(Applied::Created);
        };

        if self.first_reconcile {
            warn!(kind = %descriptor.kind, object = %descriptor.key, "Managed object already exists");
            self.publish(
                EventType::Warning,
                EVENT_ALREADY_EXISTS,
                actions::RECONCILE,
                format!("{identity} already exists and will be reconciled"),
            )
            .await;
        }

        if !descriptor.has_drifted(&live) {
            debug!(kind = %descriptor.kind, object = %descriptor.key, "Managed object up to date");
            return Ok(Applied::Unchanged);
        }

        self.update(descriptor)
            .await
            .map_err(|e| ReconcileError::from_kube("UpdateFailed", &format!("update {identity}"), e))?;
        info!(kind = %descriptor.kind, object = %descriptor.key, "Reconciled drifted managed object");
        metrics::increment_objects_updated(descriptor.kind.as_str());
        self.publish(
            EventType::Normal,
            EVENT_RECONCILED,
            actions::UPDATE,
            format!("Reconciled {identity} back to its desired state"),
        )
        .await;
        Ok(Applied::Updated)
    }

    /// Replace the live object with the desired one, re-reading on every conflict
    async fn update(&self, descriptor: &ResourceDescriptor) -> Result<(), kube::Error> {
        let store = self.store;
        retry_on_conflict(self.retry, || async move {
            let current = store
                .get(descriptor.kind, &descriptor.key)
                .await?
                .ok_or_else(|| api_error(404, "NotFound", &format!("{} disappeared", descriptor.describe())))?;
            store.replace(&descriptor.prepare_update(&current)).await
        })
        .await
        .map(|_| ())
    }

    /// Delete objects whose feature was disabled; absent objects count as deleted
    pub async fn delete_stale(&self, stale: &[StaleObject]) -> Result<usize, ReconcileError> {
        let mut deleted = 0;
        for object in stale {
            let identity = object.describe();
            match self.store.delete(object.kind, &object.key).await {
                Ok(()) => {
                    info!(kind = %object.kind, object = %object.key, "Deleted managed object of disabled feature");
                    metrics::increment_objects_deleted(object.kind.as_str());
                    self.publish(EventType::Normal, EVENT_DELETED, actions::DELETE, format!("Deleted {identity}"))
                        .await;
                    deleted += 1;
                }
                Err(e) if is_not_found(&e) => {
                    debug!(kind = %object.kind, object = %object.key, "Stale object already absent");
                }
                Err(e) => {
                    return Err(ReconcileError::from_kube("DeleteFailed", &format!("delete {identity}"), e));
                }
            }
        }
        Ok(deleted)
    }

    async fn publish(&self, type_: EventType, reason: &str, action: &str, note: String) {
        self.events
            .publish(&self.owner, type_, reason, action, Some(note))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::errors::ErrorKind;
    use crate::controller::events::RecordingEventPublisher;
    use crate::controller::resources::{Inclusion, ManagedKind, ManagedObject, ObjectKey};
    use crate::controller::store::{InMemoryStore, StoreOp};
    use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn labels(value: &str) -> Option<BTreeMap<String, String>> {
        Some(BTreeMap::from([("app".to_string(), value.to_string())]))
    }

    fn namespace(value: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(
            "namespace.yaml",
            Inclusion::Always,
            ManagedObject::Namespace(Namespace {
                metadata: ObjectMeta {
                    name: Some("external-secrets".to_string()),
                    labels: labels(value),
                    ..ObjectMeta::default()
                },
                ..Namespace::default()
            }),
        )
    }

    fn service_account() -> ResourceDescriptor {
        ResourceDescriptor::new(
            "serviceaccount-external-secrets.yaml",
            Inclusion::Always,
            ManagedObject::ServiceAccount(ServiceAccount {
                metadata: ObjectMeta {
                    name: Some("external-secrets".to_string()),
                    namespace: Some("external-secrets".to_string()),
                    labels: labels("external-secrets"),
                    ..ObjectMeta::default()
                },
                ..ServiceAccount::default()
            }),
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_apply_creates_then_is_idempotent() {
        let store = InMemoryStore::new();
        let events = RecordingEventPublisher::new();
        let driver = Driver::new(&store, &events, ObjectReference::default(), policy());
        let descriptors = vec![namespace("external-secrets"), service_account()];

        let first = driver.apply(&descriptors).await.unwrap();
        assert_eq!(first.created, 2);
        assert_eq!(events.with_reason(EVENT_CREATED).len(), 2);

        store.clear_calls();
        let second = driver.apply(&descriptors).await.unwrap();
        assert_eq!(second.unchanged, 2);
        assert_eq!(store.count(StoreOp::Create), 0);
        assert_eq!(store.count(StoreOp::Replace), 0);
    }

    #[tokio::test]
    async fn test_drift_is_repaired_with_one_update() {
        let store = InMemoryStore::new();
        let events = RecordingEventPublisher::new();
        store.insert(namespace("edited").desired);
        let driver = Driver::new(&store, &events, ObjectReference::default(), policy());

        let applied = driver.apply_one(&namespace("external-secrets")).await.unwrap();
        assert_eq!(applied, Applied::Updated);
        assert_eq!(store.count(StoreOp::Replace), 1);
        assert_eq!(events.with_reason(EVENT_RECONCILED).len(), 1);
        let live = store
            .object(ManagedKind::Namespace, &ObjectKey::cluster("external-secrets"))
            .unwrap();
        assert_eq!(live.metadata().labels, labels("external-secrets"));
    }

    #[tokio::test]
    async fn test_first_reconcile_warns_about_existing_objects() {
        let store = InMemoryStore::new();
        let events = RecordingEventPublisher::new();
        store.insert(namespace("external-secrets").desired);
        let driver =
            Driver::new(&store, &events, ObjectReference::default(), policy()).first_reconcile(true);

        driver.apply_one(&namespace("external-secrets")).await.unwrap();
        let warnings = events.with_reason(EVENT_ALREADY_EXISTS);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].warning);
    }

    #[tokio::test]
    async fn test_failure_stops_the_pass() {
        let store = InMemoryStore::new();
        let events = RecordingEventPublisher::new();
        store.fail(StoreOp::Create, ManagedKind::Namespace, "external-secrets", 403, "Forbidden", 1);
        let driver = Driver::new(&store, &events, ObjectReference::default(), policy());

        let err = driver
            .apply(&[namespace("external-secrets"), service_account()])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Irrecoverable);
        assert!(err.message.contains("Namespace external-secrets"));
        assert!(store
            .calls()
            .iter()
            .all(|c| c.kind == ManagedKind::Namespace));
    }

    #[tokio::test]
    async fn test_update_conflicts_are_retried() {
        let store = InMemoryStore::new();
        let events = RecordingEventPublisher::new();
        store.insert(namespace("edited").desired);
        store.fail(StoreOp::Replace, ManagedKind::Namespace, "external-secrets", 409, "Conflict", 2);
        let driver = Driver::new(&store, &events, ObjectReference::default(), policy());

        assert_eq!(
            driver.apply_one(&namespace("external-secrets")).await.unwrap(),
            Applied::Updated
        );
        assert_eq!(store.count(StoreOp::Replace), 3);
    }

    #[tokio::test]
    async fn test_delete_stale_treats_not_found_as_success() {
        let store = InMemoryStore::new();
        let events = RecordingEventPublisher::new();
        let driver = Driver::new(&store, &events, ObjectReference::default(), policy());
        let stale = [StaleObject {
            kind: ManagedKind::Certificate,
            key: ObjectKey::namespaced("external-secrets", "bitwarden-tls-certs"),
        }];

        assert_eq!(driver.delete_stale(&stale).await.unwrap(), 0);
        assert!(events.events().is_empty());
    }
}
