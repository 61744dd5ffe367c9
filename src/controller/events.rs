//! # Events
//!
//! Kubernetes Event publishing for the reconcilers.
//!
//! Events are fire-and-forget: a failed publish is logged and never fails the
//! reconcile pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use std::sync::Mutex;
use tracing::warn;

/// Event action strings (ACTION column of `kubectl get events`)
pub mod actions {
    pub const CREATE: &str = "Create";
    pub const UPDATE: &str = "Update";
    pub const RECONCILE: &str = "Reconcile";
    pub const DELETE: &str = "Delete";
    pub const CLEANUP: &str = "Cleanup";
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event on `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `controller_name` becomes the event's reporting component
    #[must_use]
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// An event captured by [`RecordingEventPublisher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: Option<String>,
    pub warning: bool,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

/// Publisher that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Events with the given reason
    #[must_use]
    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.reason == reason)
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(RecordedEvent {
                object: resource_ref.name.clone(),
                warning: matches!(type_, EventType::Warning),
                reason: reason.to_string(),
                action: action.to_string(),
                note,
            });
    }
}
