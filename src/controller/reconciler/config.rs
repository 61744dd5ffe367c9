//! # ExternalSecretsConfig Reconciler
//!
//! One pass converges the whole operand from the `cluster` singleton:
//!
//! 1. Lifecycle: release a terminating object, otherwise make sure our finalizer is present
//! 2. Build the desired state from the spec, the global config and the capability registry
//! 3. Apply every descriptor in dependency order, then delete objects for disabled features
//! 4. Record the outcome as Ready/Degraded conditions
//!
//! Business failures never reach the runtime as errors. Irrecoverable failures
//! wait for a spec change; retryable ones requeue after the configured interval.
//! Only a failure to record status is returned, and the error policy backs it off.

use crate::constants::{CONFIG_CONTROLLER_NAME, FINALIZER, SINGLETON_NAME};
use crate::controller::desired::{self, DesiredState};
use crate::controller::driver::{ApplySummary, Driver};
use crate::controller::errors::{ReconcileError, ReconcileOutcome};
use crate::controller::lifecycle::{ensure_finalizer, finalize, state_of, LifecycleState};
use crate::controller::reconciler::types::Context;
use crate::controller::status::{now, outcome_conditions, update_status, upsert_conditions};
use crate::crd::{ExternalSecretsConfig, GlobalConfig};
use crate::observability::metrics;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub async fn reconcile_config(
    obj: Arc<ExternalSecretsConfig>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let name = obj.name_any();
    if name != SINGLETON_NAME {
        debug!(resource.name = name.as_str(), "Ignoring ExternalSecretsConfig that is not the singleton");
        return Ok(Action::await_change());
    }

    let span = info_span!(
        "reconcile",
        resource.kind = "ExternalSecretsConfig",
        resource.name = name.as_str(),
        resource.generation = obj.metadata.generation.unwrap_or_default()
    );
    async move {
        metrics::increment_reconciliations(CONFIG_CONTROLLER_NAME);
        let start = Instant::now();
        let result = run(&obj, &ctx).await;
        metrics::observe_reconciliation_duration(CONFIG_CONTROLLER_NAME, start.elapsed().as_secs_f64());
        result
    }
    .instrument(span)
    .await
}

async fn run(obj: &ExternalSecretsConfig, ctx: &Context) -> Result<Action, ReconcileError> {
    let name = obj.name_any();
    let owner = obj.object_ref(&());
    let retry = ctx.retry_policy();

    match state_of(&obj.metadata, FINALIZER) {
        LifecycleState::Removed => return Ok(Action::await_change()),
        LifecycleState::Terminating => {
            info!("ExternalSecretsConfig is being deleted");
            return match finalize(ctx.configs.as_ref(), ctx.cleanup.as_ref(), &owner, FINALIZER, retry).await {
                Ok(Some(delay)) => Ok(Action::requeue(delay)),
                Ok(None) => Ok(Action::await_change()),
                Err(e) => Ok(decide(ctx, &ReconcileOutcome::from(Err(e)))),
            };
        }
        LifecycleState::Active => {}
    }

    let converged = converge(obj, ctx).await;
    let (outcome, state) = match converged {
        Ok((state, summary)) => {
            if summary.changed() {
                info!(
                    created = summary.created,
                    updated = summary.updated,
                    deleted = summary.deleted,
                    "Operand converged"
                );
            } else {
                debug!(unchanged = summary.unchanged, "Operand already converged");
            }
            (ReconcileOutcome::Success, Some(state))
        }
        Err(e) => (ReconcileOutcome::from(Err(e)), None),
    };

    if let Err(status_err) = record(ctx, &name, obj.metadata.generation, &outcome, state.as_ref()).await {
        metrics::increment_reconciliation_errors(CONFIG_CONTROLLER_NAME, status_err.kind.as_str());
        return Err(match outcome {
            ReconcileOutcome::Success => status_err,
            ReconcileOutcome::Irrecoverable(e) | ReconcileOutcome::RetryRequired(e) => {
                e.with_status_failure(status_err)
            }
        });
    }

    if outcome.is_success() {
        ctx.reset_backoff(&Context::backoff_key::<ExternalSecretsConfig>(&name));
    }
    Ok(decide(ctx, &outcome))
}

/// Finalizer, desired state, apply, stale deletion
async fn converge(
    obj: &ExternalSecretsConfig,
    ctx: &Context,
) -> Result<(DesiredState, ApplySummary), ReconcileError> {
    let name = obj.name_any();
    let retry = ctx.retry_policy();
    ensure_finalizer(ctx.configs.as_ref(), &name, FINALIZER, retry).await?;

    let global = fetch_global(ctx).await?;
    let state = desired::build(&obj.spec, global.as_ref(), &ctx.config, &ctx.capabilities)?;

    let first_reconcile = obj
        .status
        .as_ref()
        .is_none_or(|s| s.conditional.conditions.is_empty());
    let driver = Driver::new(ctx.store.as_ref(), ctx.events.as_ref(), obj.object_ref(&()), retry)
        .first_reconcile(first_reconcile);

    let mut summary = driver.apply(&state.descriptors).await?;
    summary.deleted = driver.delete_stale(&state.stale).await?;
    Ok((state, summary))
}

/// Global config of the `ExternalSecretsManager` singleton, if one exists
async fn fetch_global(ctx: &Context) -> Result<Option<GlobalConfig>, ReconcileError> {
    let manager = ctx.managers.get(SINGLETON_NAME).await.map_err(|e| {
        ReconcileError::from_kube(
            "GetFailed",
            &format!("fetch ExternalSecretsManager {SINGLETON_NAME}"),
            e,
        )
    })?;
    Ok(manager.and_then(|m| m.spec.global_config))
}

/// Write the outcome conditions, plus the deployed images on success
async fn record(
    ctx: &Context,
    name: &str,
    generation: Option<i64>,
    outcome: &ReconcileOutcome,
    state: Option<&DesiredState>,
) -> Result<bool, ReconcileError> {
    let conditions = outcome_conditions(outcome);
    let timestamp = now();
    update_status(ctx.configs.as_ref(), name, ctx.retry_policy(), |current: &ExternalSecretsConfig| {
        let stored = current.status.clone().unwrap_or_default();
        let mut status = stored.clone();
        upsert_conditions(&mut status.conditional.conditions, conditions.clone(), generation, &timestamp);
        status.observed_generation = generation;
        if let Some(state) = state {
            status.external_secrets_image = Some(state.external_secrets_image.clone());
            status.bitwarden_sdk_server_image = state.bitwarden_image.clone();
        }
        (status != stored).then_some(status)
    })
    .await
}

/// Turn a recorded outcome into the runtime's next action
fn decide(ctx: &Context, outcome: &ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::Success => Action::await_change(),
        ReconcileOutcome::Irrecoverable(e) => {
            metrics::increment_reconciliation_errors(CONFIG_CONTROLLER_NAME, outcome.as_str());
            error!(reason = e.reason.as_str(), error = %e, "Reconciliation failed; waiting for a spec change");
            Action::await_change()
        }
        ReconcileOutcome::RetryRequired(e) => {
            metrics::increment_reconciliation_errors(CONFIG_CONTROLLER_NAME, outcome.as_str());
            metrics::increment_requeues("retry-required");
            let delay = ctx.config.requeue_interval();
            warn!(reason = e.reason.as_str(), error = %e, requeue_secs = delay.as_secs(), "Reconciliation will be retried");
            Action::requeue(delay)
        }
    }
}
