//! Shared harness for the reconcile tests
//!
//! Builds a [`Context`] over in-memory fakes so a whole pass can run without
//! an API server.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use external_secrets_operator::config::ControllerConfig;
use external_secrets_operator::constants::SINGLETON_NAME;
use external_secrets_operator::controller::capability::{Capability, CapabilityRegistry};
use external_secrets_operator::controller::client::InMemoryResourceClient;
use external_secrets_operator::controller::errors::ReconcileError;
use external_secrets_operator::controller::events::RecordingEventPublisher;
use external_secrets_operator::controller::lifecycle::EventOnlyCleanup;
use external_secrets_operator::controller::reconciler::{
    reconcile_config, reconcile_manager, reconcile_operator, Context,
};
use external_secrets_operator::controller::store::InMemoryStore;
use external_secrets_operator::crd::{
    ExternalSecretsConfig, ExternalSecretsConfigSpec, ExternalSecretsManager,
    ExternalSecretsManagerSpec, ExternalSecretsOperator, ExternalSecretsOperatorSpec,
};
use kube::runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const EXTERNAL_SECRETS_IMAGE: &str = "quay.io/external-secrets/external-secrets:v0.14.0";
pub const BITWARDEN_IMAGE: &str = "ghcr.io/external-secrets/bitwarden-sdk-server:v0.4.0";

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub events: Arc<RecordingEventPublisher>,
    pub configs: Arc<InMemoryResourceClient<ExternalSecretsConfig>>,
    pub managers: Arc<InMemoryResourceClient<ExternalSecretsManager>>,
    pub operators: Arc<InMemoryResourceClient<ExternalSecretsOperator>>,
    pub context: Arc<Context>,
}

pub fn controller_config() -> ControllerConfig {
    ControllerConfig {
        external_secrets_image: Some(EXTERNAL_SECRETS_IMAGE.to_string()),
        bitwarden_image: Some(BITWARDEN_IMAGE.to_string()),
        conflict_retry_delay_ms: 1,
        ..ControllerConfig::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with(CapabilityRegistry::none(), controller_config())
    }

    pub fn with_cert_manager() -> Self {
        Self::with(CapabilityRegistry::new([Capability::Certificates]), controller_config())
    }

    pub fn with(capabilities: CapabilityRegistry, config: ControllerConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(RecordingEventPublisher::new());
        let configs = Arc::new(InMemoryResourceClient::new());
        let managers = Arc::new(InMemoryResourceClient::new());
        let operators = Arc::new(InMemoryResourceClient::new());
        let context = Arc::new(Context {
            store: store.clone(),
            events: events.clone(),
            cleanup: Arc::new(EventOnlyCleanup::new(events.clone())),
            configs: configs.clone(),
            managers: managers.clone(),
            operators: operators.clone(),
            capabilities: Arc::new(capabilities),
            config: Arc::new(config),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        });
        Self {
            store,
            events,
            configs,
            managers,
            operators,
            context,
        }
    }

    /// Store the config singleton with `spec`
    pub fn apply_config(&self, spec: ExternalSecretsConfigSpec) {
        let mut object = ExternalSecretsConfig::new(SINGLETON_NAME, spec);
        object.metadata.generation = Some(1);
        self.configs.insert(&object);
    }

    pub fn apply_manager(&self, spec: ExternalSecretsManagerSpec) {
        let mut object = ExternalSecretsManager::new(SINGLETON_NAME, spec);
        object.metadata.generation = Some(1);
        self.managers.insert(&object);
    }

    pub fn apply_operator(&self) {
        self.operators
            .insert(&ExternalSecretsOperator::new(SINGLETON_NAME, ExternalSecretsOperatorSpec {}));
    }

    pub fn config(&self) -> ExternalSecretsConfig {
        self.configs.object(SINGLETON_NAME).expect("config singleton stored")
    }

    /// One config pass over the currently stored singleton, as the watch would deliver it
    pub async fn reconcile_config(&self) -> Result<Action, ReconcileError> {
        reconcile_config(Arc::new(self.config()), self.context.clone()).await
    }

    pub async fn reconcile_manager(&self) -> Result<Action, ReconcileError> {
        let manager = self.managers.object(SINGLETON_NAME).expect("manager singleton stored");
        reconcile_manager(Arc::new(manager), self.context.clone()).await
    }

    pub async fn reconcile_operator(&self) -> Result<Action, ReconcileError> {
        let operator = self.operators.object(SINGLETON_NAME).expect("operator singleton stored");
        reconcile_operator(Arc::new(operator), self.context.clone()).await
    }
}
