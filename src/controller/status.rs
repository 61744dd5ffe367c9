//! # Status Aggregator
//!
//! Condition upsert, outcome-to-condition mapping, controller-status buckets and
//! the conflict-retried status write shared by every reconciler.
//!
//! Writes are only issued when the computed status differs from the stored one,
//! so a status write never re-triggers a pass that writes status again.

use crate::constants::{
    CONDITION_DEGRADED, CONDITION_READY, REASON_FAILED, REASON_IN_PROGRESS, REASON_NO_FAILURE,
    REASON_READY,
};
use crate::controller::client::ResourceClient;
use crate::controller::errors::{ReconcileError, ReconcileOutcome};
use crate::controller::retry::{retry_on_conflict, RetryPolicy};
use crate::crd::{Condition, ControllerStatus};
use crate::observability::metrics;
use kube::Resource;
use serde::Serialize;
use tracing::debug;

/// Current time as stored in `lastTransitionTime`
#[must_use]
pub fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Insert or update one condition, keyed by type
///
/// Returns `true` when anything changed. `lastTransitionTime` moves only when the
/// status flips (or the condition is new); reason, message and generation are
/// refreshed in place.
pub fn upsert_condition(
    conditions: &mut Vec<Condition>,
    mut condition: Condition,
    generation: Option<i64>,
    now: &str,
) -> bool {
    condition.observed_generation = generation;
    match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        None => {
            condition.last_transition_time = Some(now.to_string());
            conditions.push(condition);
            true
        }
        Some(existing) => {
            if existing.status == condition.status
                && existing.reason == condition.reason
                && existing.message == condition.message
                && existing.observed_generation == condition.observed_generation
            {
                return false;
            }
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.clone()
            } else {
                Some(now.to_string())
            };
            *existing = condition;
            true
        }
    }
}

/// Upsert every condition; `true` when any changed
pub fn upsert_conditions(
    conditions: &mut Vec<Condition>,
    updates: Vec<Condition>,
    generation: Option<i64>,
    now: &str,
) -> bool {
    let mut changed = false;
    for condition in updates {
        changed |= upsert_condition(conditions, condition, generation, now);
    }
    changed
}

/// Ready/Degraded pair describing a pass outcome
#[must_use]
pub fn outcome_conditions(outcome: &ReconcileOutcome) -> Vec<Condition> {
    match outcome {
        ReconcileOutcome::Success => vec![
            Condition::new(CONDITION_READY, true, REASON_READY, "reconciliation successful"),
            Condition::new(CONDITION_DEGRADED, false, REASON_NO_FAILURE, ""),
        ],
        ReconcileOutcome::Irrecoverable(e) => vec![
            Condition::new(CONDITION_DEGRADED, true, REASON_FAILED, e.message.clone()),
            Condition::new(CONDITION_READY, false, REASON_FAILED, e.message.clone()),
        ],
        ReconcileOutcome::RetryRequired(e) => vec![
            Condition::new(CONDITION_READY, false, REASON_IN_PROGRESS, e.message.clone()),
            Condition::new(CONDITION_DEGRADED, false, REASON_NO_FAILURE, ""),
        ],
    }
}

/// Replace the bucket with the same name, or append it
///
/// Returns `true` when the stored bucket list changed.
pub fn merge_bucket(statuses: &mut Vec<ControllerStatus>, bucket: ControllerStatus) -> bool {
    match statuses.iter_mut().find(|s| s.name == bucket.name) {
        Some(existing) if *existing == bucket => false,
        Some(existing) => {
            *existing = bucket;
            true
        }
        None => {
            statuses.push(bucket);
            statuses.sort_by(|a, b| a.name.cmp(&b.name));
            true
        }
    }
}

/// Recompute and persist the status of `name`
///
/// `compute` runs against a freshly read object on every attempt and returns
/// `None` when nothing needs writing. Returns whether a write was made; a
/// missing object is not an error.
pub async fn update_status<K, S, F>(
    client: &dyn ResourceClient<K>,
    name: &str,
    retry: RetryPolicy,
    compute: F,
) -> Result<bool, ReconcileError>
where
    K: Resource<DynamicType = ()> + Send + Sync,
    S: Serialize,
    F: Fn(&K) -> Option<S> + Sync,
{
    let kind = K::kind(&()).to_string();
    let compute = &compute;
    let written = retry_on_conflict(retry, || async move {
        let Some(current) = client.get(name).await? else {
            return Ok(false);
        };
        let Some(status) = compute(&current) else {
            return Ok(false);
        };
        let status = serde_json::to_value(status).map_err(kube::Error::SerdeError)?;
        client
            .patch_status(name, current.meta().resource_version.as_deref(), status)
            .await?;
        Ok(true)
    })
    .await
    .map_err(|e| ReconcileError::from_kube("StatusUpdateFailed", &format!("update status of {kind} {name}"), e))?;

    if written {
        metrics::increment_status_writes(&kind);
        debug!(resource.kind = kind.as_str(), resource.name = name, "Status updated");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::client::{ClientOp, InMemoryResourceClient};
    use crate::crd::{
        ConditionalStatus, ExternalSecretsManager, ExternalSecretsManagerSpec, ExternalSecretsManagerStatus,
    };
    use std::time::Duration;

    const T0: &str = "2026-01-01T00:00:00Z";
    const T1: &str = "2026-01-01T00:05:00Z";

    fn ready(status: bool, message: &str) -> Condition {
        Condition::new(CONDITION_READY, status, if status { REASON_READY } else { REASON_FAILED }, message)
    }

    #[test]
    fn test_same_condition_twice_is_not_a_change() {
        let mut conditions = Vec::new();
        assert!(upsert_condition(&mut conditions, ready(true, "ok"), Some(1), T0));
        assert!(!upsert_condition(&mut conditions, ready(true, "ok"), Some(1), T1));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time.as_deref(), Some(T0));
    }

    #[test]
    fn test_message_change_keeps_transition_time() {
        let mut conditions = Vec::new();
        upsert_condition(&mut conditions, ready(false, "first"), Some(1), T0);
        assert!(upsert_condition(&mut conditions, ready(false, "second"), Some(1), T1));
        assert_eq!(conditions[0].message.as_deref(), Some("second"));
        assert_eq!(conditions[0].last_transition_time.as_deref(), Some(T0));
    }

    #[test]
    fn test_status_flip_moves_transition_time() {
        let mut conditions = Vec::new();
        upsert_condition(&mut conditions, ready(false, "x"), Some(1), T0);
        assert!(upsert_condition(&mut conditions, ready(true, "x"), Some(1), T1));
        assert_eq!(conditions[0].last_transition_time.as_deref(), Some(T1));
    }

    #[test]
    fn test_new_generation_refreshes_observed_generation() {
        let mut conditions = Vec::new();
        upsert_condition(&mut conditions, ready(true, "ok"), Some(1), T0);
        assert!(upsert_condition(&mut conditions, ready(true, "ok"), Some(2), T1));
        assert_eq!(conditions[0].observed_generation, Some(2));
    }

    #[test]
    fn test_outcome_conditions() {
        let ok = outcome_conditions(&ReconcileOutcome::Success);
        assert!(ok.iter().any(|c| c.r#type == CONDITION_READY && c.is_true()));
        assert!(ok.iter().any(|c| c.r#type == CONDITION_DEGRADED && !c.is_true()));

        let failed = outcome_conditions(&ReconcileOutcome::Irrecoverable(ReconcileError::irrecoverable(
            "Forbidden",
            "denied",
        )));
        let degraded = failed.iter().find(|c| c.r#type == CONDITION_DEGRADED).unwrap();
        assert!(degraded.is_true());
        assert!(degraded.message.as_deref().unwrap().contains("denied"));
        let not_ready = failed.iter().find(|c| c.r#type == CONDITION_READY).unwrap();
        assert!(!not_ready.is_true());
        assert_eq!(not_ready.message, degraded.message);

        let retry = outcome_conditions(&ReconcileOutcome::RetryRequired(ReconcileError::retry_required(
            "Conflict", "later",
        )));
        let ready = retry.iter().find(|c| c.r#type == CONDITION_READY).unwrap();
        assert_eq!(ready.reason.as_deref(), Some(REASON_IN_PROGRESS));
    }

    #[test]
    fn test_merge_bucket_only_reports_real_changes() {
        let bucket = ControllerStatus {
            name: "a".to_string(),
            conditional: ConditionalStatus {
                conditions: vec![ready(true, "ok")],
            },
            observed_generation: Some(1),
        };
        let mut statuses = Vec::new();
        assert!(merge_bucket(&mut statuses, bucket.clone()));
        assert!(!merge_bucket(&mut statuses, bucket.clone()));

        let mut changed = bucket;
        changed.observed_generation = Some(2);
        assert!(merge_bucket(&mut statuses, changed));
        assert_eq!(statuses.len(), 1);
    }

    #[tokio::test]
    async fn test_update_status_skips_when_nothing_to_write() {
        let client = InMemoryResourceClient::<ExternalSecretsManager>::new();
        client.insert(&ExternalSecretsManager::new("cluster", ExternalSecretsManagerSpec::default()));
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        };

        let compute = |m: &ExternalSecretsManager| {
            let mut status = m.status.clone().unwrap_or_default();
            upsert_condition(&mut status.conditional.conditions, ready(true, "ok"), Some(1), T0)
                .then_some(status)
        };
        assert!(update_status(&client, "cluster", policy, compute).await.unwrap());
        assert!(!update_status(&client, "cluster", policy, compute).await.unwrap());
        assert_eq!(client.status_writes(), 1);
    }

    #[tokio::test]
    async fn test_update_status_retries_conflicts_and_classifies_failures() {
        let client = InMemoryResourceClient::<ExternalSecretsManager>::new();
        client.insert(&ExternalSecretsManager::new("cluster", ExternalSecretsManagerSpec::default()));
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        let compute = |_: &ExternalSecretsManager| {
            Some(ExternalSecretsManagerStatus {
                observed_generation: Some(1),
                ..ExternalSecretsManagerStatus::default()
            })
        };

        client.fail(ClientOp::PatchStatus, 409, "Conflict", 1);
        assert!(update_status(&client, "cluster", policy, compute).await.unwrap());

        client.fail(ClientOp::PatchStatus, 401, "Unauthorized", 1);
        let err = update_status(&client, "cluster", policy, compute).await.unwrap_err();
        assert!(err.is_irrecoverable());
        assert_eq!(err.reason, "StatusUpdateFailed");
    }
}
