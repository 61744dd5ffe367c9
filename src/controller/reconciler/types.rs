//! # Types
//!
//! Shared context handed to every reconciler by the controller runtime.

use crate::config::SharedControllerConfig;
use crate::constants::CONFIG_CONTROLLER_NAME;
use crate::controller::backoff::BackoffState;
use crate::controller::capability::CapabilityRegistry;
use crate::controller::client::{KubeResourceClient, ResourceClient};
use crate::controller::events::{EventPublisher, KubeEventPublisher};
use crate::controller::lifecycle::{CleanupHandler, EventOnlyCleanup};
use crate::controller::retry::RetryPolicy;
use crate::controller::store::{KubeStore, ObjectStore};
use crate::crd::{ExternalSecretsConfig, ExternalSecretsManager, ExternalSecretsOperator};
use kube::{Client, Resource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Reconciler context
///
/// Every client seam is a trait object so tests can run the reconcilers
/// against in-memory fakes.
#[derive(Clone)]
pub struct Context {
    /// Managed operand objects
    pub store: Arc<dyn ObjectStore>,
    pub events: Arc<dyn EventPublisher>,
    pub cleanup: Arc<dyn CleanupHandler>,
    pub configs: Arc<dyn ResourceClient<ExternalSecretsConfig>>,
    pub managers: Arc<dyn ResourceClient<ExternalSecretsManager>>,
    pub operators: Arc<dyn ResourceClient<ExternalSecretsOperator>>,
    /// Optional extensions found at startup; read-only afterwards
    pub capabilities: Arc<CapabilityRegistry>,
    pub config: SharedControllerConfig,
    /// Backoff state per resource key, used by the error policy
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("capabilities", &self.capabilities)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Context backed by the API server
    #[must_use]
    pub fn new(
        client: Client,
        capabilities: CapabilityRegistry,
        config: SharedControllerConfig,
    ) -> Self {
        let events: Arc<dyn EventPublisher> =
            Arc::new(KubeEventPublisher::new(client.clone(), CONFIG_CONTROLLER_NAME));
        Self {
            store: Arc::new(KubeStore::new(client.clone())),
            cleanup: Arc::new(EventOnlyCleanup::new(Arc::clone(&events))),
            events,
            configs: Arc::new(KubeResourceClient::new(client.clone())),
            managers: Arc::new(KubeResourceClient::new(client.clone())),
            operators: Arc::new(KubeResourceClient::new(client)),
            capabilities: Arc::new(capabilities),
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }

    /// Backoff bookkeeping key for a resource
    #[must_use]
    pub fn backoff_key<K: Resource<DynamicType = ()>>(name: &str) -> String {
        format!("{}/{name}", K::kind(&()))
    }

    /// Forget accumulated error backoff after a successful pass
    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(key) {
                state.reset();
            }
        }
    }
}
