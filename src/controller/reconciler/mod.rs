//! # Reconciler
//!
//! Reconcile functions for the three custom resources, all keyed on the
//! `cluster` singleton.
//!
//! - `config`: converges the operand from `ExternalSecretsConfig`
//! - `manager`: validates `ExternalSecretsManager` and keeps its conditions current
//! - `operator`: republishes controller health into `ExternalSecretsOperator`
//! - `types`: the shared [`Context`]

pub mod config;
pub mod manager;
pub mod operator;
pub mod types;

pub use config::reconcile_config;
pub use manager::reconcile_manager;
pub use operator::reconcile_operator;
pub use types::Context;

use crate::constants::SINGLETON_NAME;
use crate::controller::client::ResourceClient;
use crate::controller::errors::{is_already_exists, ReconcileError};
use crate::crd::{
    ExternalSecretsManager, ExternalSecretsManagerSpec, ExternalSecretsOperator,
    ExternalSecretsOperatorSpec,
};
use kube::Resource;
use tracing::{debug, info};

/// Create the manager and operator singletons if they do not exist yet
///
/// The `ExternalSecretsConfig` singleton is user-owned and never created here.
pub async fn ensure_singletons(ctx: &Context) -> Result<(), ReconcileError> {
    create_if_missing(
        ctx.managers.as_ref(),
        ExternalSecretsManager::new(SINGLETON_NAME, ExternalSecretsManagerSpec::default()),
    )
    .await?;
    create_if_missing(
        ctx.operators.as_ref(),
        ExternalSecretsOperator::new(SINGLETON_NAME, ExternalSecretsOperatorSpec {}),
    )
    .await
}

async fn create_if_missing<K>(client: &dyn ResourceClient<K>, object: K) -> Result<(), ReconcileError>
where
    K: Resource<DynamicType = ()> + Send + Sync,
{
    let kind = K::kind(&()).to_string();
    let existing = client.get(SINGLETON_NAME).await.map_err(|e| {
        ReconcileError::from_kube("GetFailed", &format!("fetch {kind} {SINGLETON_NAME}"), e)
    })?;
    if existing.is_some() {
        debug!(resource.kind = kind.as_str(), "Singleton already exists");
        return Ok(());
    }
    match client.create(&object).await {
        Ok(_) => {
            info!(resource.kind = kind.as_str(), resource.name = SINGLETON_NAME, "Created singleton");
            Ok(())
        }
        Err(e) if is_already_exists(&e) => Ok(()),
        Err(e) => Err(ReconcileError::from_kube(
            "CreateFailed",
            &format!("create {kind} {SINGLETON_NAME}"),
            e,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::controller::capability::CapabilityRegistry;
    use crate::controller::client::InMemoryResourceClient;
    use crate::controller::events::NoopEventPublisher;
    use crate::controller::lifecycle::EventOnlyCleanup;
    use crate::controller::store::InMemoryStore;
    use crate::crd::ExternalSecretsConfig;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_singletons_are_created_once() {
        let managers = Arc::new(InMemoryResourceClient::<ExternalSecretsManager>::new());
        let operators = Arc::new(InMemoryResourceClient::<ExternalSecretsOperator>::new());
        let events = Arc::new(NoopEventPublisher);
        let ctx = Context {
            store: Arc::new(InMemoryStore::new()),
            cleanup: Arc::new(EventOnlyCleanup::new(events.clone())),
            events,
            configs: Arc::new(InMemoryResourceClient::<ExternalSecretsConfig>::new()),
            managers: managers.clone(),
            operators: operators.clone(),
            capabilities: Arc::new(CapabilityRegistry::none()),
            config: Arc::new(ControllerConfig::default()),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        };

        ensure_singletons(&ctx).await.unwrap();
        ensure_singletons(&ctx).await.unwrap();

        assert!(managers.object(SINGLETON_NAME).is_some());
        assert!(operators.object(SINGLETON_NAME).is_some());
    }
}
