//! # Error Policy
//!
//! Error handling and backoff for the controller watch loops.
//!
//! Reconcile functions only return an error when recording status failed; those
//! errors are requeued here with a per-resource Fibonacci backoff. Watch stream
//! errors are classified and delayed before the stream is polled again.

use crate::constants::{OPERAND_NAMESPACE, OPERATOR_NAME};
use crate::controller::backoff::BackoffState;
use crate::controller::errors::ReconcileError;
use crate::controller::reconciler::Context;
use crate::observability::metrics;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Requeue a failed reconcile with Fibonacci backoff
///
/// Backoff state is tracked per resource key so one failing resource does not
/// slow the others down. A successful pass resets it.
pub fn handle_reconciliation_error<K>(obj: Arc<K>, error: &ReconcileError, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let name = obj.name_any();
    let kind = K::kind(&());

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = %kind,
        resource.name = name.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    error!(reason = error.reason.as_str(), kind = error.kind.as_str(), "Reconciliation error for {}: {}", name, error);

    let resource_key = Context::backoff_key::<K>(&name);
    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(resource_key).or_insert_with(BackoffState::default);
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (60, 0)
        }
    };

    let next_trigger_time =
        chrono::Utc::now() + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    info!(
        backoff_secs = backoff_seconds,
        error_count,
        next_retry = next_trigger_time.to_rfc3339().as_str(),
        "Retrying with Fibonacci backoff"
    );

    metrics::increment_requeues("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Watch stream failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 401: RBAC revoked or token expired
    Unauthorized,
    /// 410: resourceVersion too old
    Expired,
    /// 429: API server storage reinitializing
    TooManyRequests,
    /// 404: CRD missing or resource deleted
    NotFound,
    Other,
}

/// Classify a watch stream error by its rendered text
///
/// 404 is checked before 401 because a plain-text 404 body surfaces as a decode
/// error whose chain also mentions the failed watch.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found {
        WatchErrorKind::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorKind::TooManyRequests
    } else if is_not_found {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Handle a watch stream error
///
/// Returns `None` to drop the item, `Some(())` to pass it on.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(tracing::Level::WARN, "controller.watch.error", error = %error_string);
    let _error_guard = error_span.enter();

    match classify_watch_error(error_string) {
        WatchErrorKind::Unauthorized => {
            error!("Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
            error!("SRE Diagnostics:");
            error!("   1. Verify ClusterRole '{OPERATOR_NAME}' still exists:");
            error!("      kubectl get clusterrole {OPERATOR_NAME}");
            error!("   2. Verify the ClusterRoleBinding still binds the ServiceAccount:");
            error!("      kubectl get clusterrolebinding {OPERATOR_NAME} -o yaml");
            error!("   3. Verify RBAC permissions are still active:");
            error!(
                "      kubectl auth can-i watch externalsecretsconfigs.operator.openshift.io --as=system:serviceaccount:{OPERAND_NAMESPACE}-operator:{OPERATOR_NAME}"
            );
            error!("   4. If RBAC was recently changed, restart the operator pod");
            warn!(
                "Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "Watch resource version expired - this is normal during pod restarts, watch will restart");
            None
        }
        WatchErrorKind::TooManyRequests => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            backoff.store(current_backoff.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            warn!(
                "Resource not found (404) - this may be normal if the resource was deleted or a CRD is missing. Error: {}",
                error_string
            );
            Some(())
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_error() {
        assert_eq!(classify_watch_error("ApiError: Unauthorized (401)"), WatchErrorKind::Unauthorized);
        assert_eq!(classify_watch_error("too old resource version: 1 (2)"), WatchErrorKind::Expired);
        assert_eq!(classify_watch_error("storage is (re)initializing"), WatchErrorKind::TooManyRequests);
        assert_eq!(classify_watch_error("WatchFailed: invalid type: integer `404`"), WatchErrorKind::NotFound);
        assert_eq!(classify_watch_error("connection reset by peer"), WatchErrorKind::Other);
    }

    #[test]
    fn test_not_found_wins_over_unauthorized() {
        assert_eq!(
            classify_watch_error("Unauthorized watch of ObjectNotFound"),
            WatchErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_too_many_requests_doubles_backoff_up_to_max() {
        let backoff = Arc::new(AtomicU64::new(1));
        handle_watch_stream_error("429 TooManyRequests", &backoff, 3, Duration::from_millis(1)).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 2);
        handle_watch_stream_error("429 TooManyRequests", &backoff, 3, Duration::from_millis(1)).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 3);
    }
}
