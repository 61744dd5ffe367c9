//! # Status Fan-in
//!
//! Republishes the conditions of the config and manager controllers inside
//! `ExternalSecretsOperator/cluster`, one `controllerStatuses` bucket per
//! controller. Nothing is written unless a bucket actually changed.

use crate::constants::{
    CONFIG_CONTROLLER_NAME, MANAGER_CONTROLLER_NAME, SINGLETON_NAME, STATUS_CONTROLLER_NAME,
};
use crate::controller::errors::ReconcileError;
use crate::controller::reconciler::types::Context;
use crate::controller::status::{merge_bucket, now, update_status};
use crate::crd::{ControllerStatus, ExternalSecretsOperator, ExternalSecretsOperatorStatus};
use crate::observability::metrics;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

pub async fn reconcile_operator(
    obj: Arc<ExternalSecretsOperator>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let name = obj.name_any();
    if name != SINGLETON_NAME {
        debug!(resource.name = name.as_str(), "Ignoring ExternalSecretsOperator that is not the singleton");
        return Ok(Action::await_change());
    }

    let span = info_span!(
        "reconcile",
        resource.kind = "ExternalSecretsOperator",
        resource.name = name.as_str()
    );
    async move {
        metrics::increment_reconciliations(STATUS_CONTROLLER_NAME);
        let buckets = collect(&ctx).await?;
        let timestamp = now();
        let written = update_status(
            ctx.operators.as_ref(),
            &name,
            ctx.retry_policy(),
            |current: &ExternalSecretsOperator| {
                fan_in(current.status.as_ref(), buckets.clone(), &timestamp)
            },
        )
        .await
        .inspect_err(|e| {
            metrics::increment_reconciliation_errors(STATUS_CONTROLLER_NAME, e.kind.as_str());
        })?;
        if written {
            info!("Controller statuses updated");
        }
        ctx.reset_backoff(&Context::backoff_key::<ExternalSecretsOperator>(&name));
        Ok(Action::await_change())
    }
    .instrument(span)
    .await
}

/// Current bucket of every cooperating controller whose resource exists
async fn collect(ctx: &Context) -> Result<Vec<ControllerStatus>, ReconcileError> {
    let mut buckets = Vec::new();

    let config = ctx.configs.get(SINGLETON_NAME).await.map_err(|e| {
        ReconcileError::from_kube("GetFailed", &format!("fetch ExternalSecretsConfig {SINGLETON_NAME}"), e)
    })?;
    if let Some(status) = config.and_then(|c| c.status) {
        buckets.push(ControllerStatus {
            name: CONFIG_CONTROLLER_NAME.to_string(),
            conditional: status.conditional,
            observed_generation: status.observed_generation,
        });
    }

    let manager = ctx.managers.get(SINGLETON_NAME).await.map_err(|e| {
        ReconcileError::from_kube("GetFailed", &format!("fetch ExternalSecretsManager {SINGLETON_NAME}"), e)
    })?;
    if let Some(status) = manager.and_then(|m| m.status) {
        buckets.push(ControllerStatus {
            name: MANAGER_CONTROLLER_NAME.to_string(),
            conditional: status.conditional,
            observed_generation: status.observed_generation,
        });
    }

    Ok(buckets)
}

/// Merge `buckets` into the stored status
///
/// `None` when every bucket already matches; otherwise the new status with
/// `lastTransitionTime` set to `now`.
#[must_use]
pub fn fan_in(
    stored: Option<&ExternalSecretsOperatorStatus>,
    buckets: Vec<ControllerStatus>,
    now: &str,
) -> Option<ExternalSecretsOperatorStatus> {
    let mut status = stored.cloned().unwrap_or_default();
    let mut changed = false;
    for bucket in buckets {
        changed |= merge_bucket(&mut status.controller_statuses, bucket);
    }
    changed.then(|| {
        status.last_transition_time = Some(now.to_string());
        status
    })
}
