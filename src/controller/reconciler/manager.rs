//! # ExternalSecretsManager Reconciler
//!
//! Validates the operator-wide global config and keeps its Ready/Degraded
//! conditions current. The per-deployment pass consumes the same global config;
//! the watch setup re-triggers it whenever this resource changes.

use crate::constants::{MANAGER_CONTROLLER_NAME, SINGLETON_NAME};
use crate::controller::desired::validation::validate_common;
use crate::controller::errors::{ReconcileError, ReconcileOutcome};
use crate::controller::reconciler::types::Context;
use crate::controller::status::{now, outcome_conditions, update_status, upsert_conditions};
use crate::crd::{ExternalSecretsManager, ExternalSecretsManagerSpec};
use crate::observability::metrics;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

pub async fn reconcile_manager(
    obj: Arc<ExternalSecretsManager>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let name = obj.name_any();
    if name != SINGLETON_NAME {
        debug!(resource.name = name.as_str(), "Ignoring ExternalSecretsManager that is not the singleton");
        return Ok(Action::await_change());
    }

    let span = info_span!(
        "reconcile",
        resource.kind = "ExternalSecretsManager",
        resource.name = name.as_str()
    );
    async move {
        metrics::increment_reconciliations(MANAGER_CONTROLLER_NAME);
        let start = Instant::now();

        let outcome = ReconcileOutcome::from(validate(&obj.spec));
        if let Some(e) = outcome.error() {
            metrics::increment_reconciliation_errors(MANAGER_CONTROLLER_NAME, outcome.as_str());
            warn!(error = %e, "Global config is invalid");
        }

        let generation = obj.metadata.generation;
        let conditions = outcome_conditions(&outcome);
        let timestamp = now();
        let written = update_status(
            ctx.managers.as_ref(),
            &name,
            ctx.retry_policy(),
            |current: &ExternalSecretsManager| {
                let stored = current.status.clone().unwrap_or_default();
                let mut status = stored.clone();
                upsert_conditions(&mut status.conditional.conditions, conditions.clone(), generation, &timestamp);
                status.observed_generation = generation;
                (status != stored).then_some(status)
            },
        )
        .await;

        metrics::observe_reconciliation_duration(MANAGER_CONTROLLER_NAME, start.elapsed().as_secs_f64());
        match written {
            Ok(_) => {
                ctx.reset_backoff(&Context::backoff_key::<ExternalSecretsManager>(&name));
                Ok(Action::await_change())
            }
            Err(status_err) => Err(match outcome {
                ReconcileOutcome::Success => status_err,
                ReconcileOutcome::Irrecoverable(e) | ReconcileOutcome::RetryRequired(e) => {
                    e.with_status_failure(status_err)
                }
            }),
        }
    }
    .instrument(span)
    .await
}

/// Validate the global overlay
///
/// # Errors
///
/// Irrecoverable `InvalidConfiguration` listing every offending field.
pub fn validate(spec: &ExternalSecretsManagerSpec) -> Result<(), ReconcileError> {
    let Some(common) = spec.common() else {
        return Ok(());
    };
    let errors = validate_common(common, "spec.globalConfig");
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::irrecoverable("InvalidConfiguration", errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{GlobalConfig, Toleration};

    #[test]
    fn test_empty_global_config_is_valid() {
        assert!(validate(&ExternalSecretsManagerSpec::default()).is_ok());
    }

    #[test]
    fn test_invalid_label_is_reported_with_its_path() {
        let mut global = GlobalConfig::default();
        global
            .common
            .labels
            .insert("not a label!".to_string(), "y".to_string());
        let spec = ExternalSecretsManagerSpec {
            global_config: Some(global),
        };
        let err = validate(&spec).unwrap_err();
        assert!(err.is_irrecoverable());
        assert!(err.message.contains("spec.globalConfig.labels"), "{}", err.message);
    }

    #[test]
    fn test_invalid_toleration_is_reported() {
        let mut global = GlobalConfig::default();
        global.common.tolerations.push(Toleration {
            operator: Some("Exists".to_string()),
            value: Some("v".to_string()),
            ..Toleration::default()
        });
        let spec = ExternalSecretsManagerSpec {
            global_config: Some(global),
        };
        assert!(validate(&spec).is_err());
    }
}
