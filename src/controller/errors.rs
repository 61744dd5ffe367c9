//! # Reconcile Errors
//!
//! Two-valued failure taxonomy for a reconcile pass.
//!
//! Every client failure is wrapped once where it happens, with a description of
//! the operation and a classified [`ErrorKind`]. The original cause is kept as the
//! error source. `Irrecoverable` failures stop the pass and wait for a spec change;
//! everything else is `RetryRequired` and is requeued after a delay.

use thiserror::Error;

/// Retry taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retrying without a spec change cannot help
    Irrecoverable,
    /// Transient; the pass is requeued
    RetryRequired,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Irrecoverable => "irrecoverable",
            ErrorKind::RetryRequired => "retry_required",
        }
    }
}

/// Underlying cause of a [`ReconcileError`]
#[derive(Debug, Error)]
pub enum Cause {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// A failure to record status on top of the failure being recorded
    #[error("{original}; additionally failed to update status: {status}")]
    Aggregate {
        original: Box<ReconcileError>,
        status: Box<ReconcileError>,
    },
}

#[derive(Debug, Error)]
#[error("{reason}: {message}")]
pub struct ReconcileError {
    pub kind: ErrorKind,
    /// Short machine-readable reason, e.g. `CreateFailed`
    pub reason: String,
    /// Human-readable message naming the object or field involved
    pub message: String,
    #[source]
    pub cause: Option<Cause>,
}

impl ReconcileError {
    pub fn irrecoverable(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Irrecoverable,
            reason: reason.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn retry_required(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::RetryRequired,
            reason: reason.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Wrap a client failure, classifying it and naming the operation that failed
    ///
    /// `operation` reads as a sentence fragment, e.g. `"create Deployment external-secrets/external-secrets"`.
    pub fn from_kube(reason: impl Into<String>, operation: &str, err: kube::Error) -> Self {
        Self {
            kind: classify(&err),
            reason: reason.into(),
            message: format!("failed to {operation}: {err}"),
            cause: Some(Cause::Kube(err)),
        }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    #[must_use]
    pub fn is_irrecoverable(&self) -> bool {
        self.kind == ErrorKind::Irrecoverable
    }

    /// Combine a status-write failure with the failure being recorded
    ///
    /// The original kind and reason are kept; neither error is dropped.
    #[must_use]
    pub fn with_status_failure(self, status: ReconcileError) -> Self {
        let kind = self.kind;
        let reason = self.reason.clone();
        let message = format!("{}; additionally failed to update status: {}", self.message, status.message);
        Self {
            kind,
            reason,
            message,
            cause: Some(Cause::Aggregate {
                original: Box::new(self),
                status: Box::new(status),
            }),
        }
    }
}

/// Classify a client failure
///
/// Non-API failures (transport, timeouts, decode errors from a flaky connection)
/// are always `RetryRequired`.
#[must_use]
pub fn classify(err: &kube::Error) -> ErrorKind {
    match err {
        kube::Error::Api(response) => classify_status(response.code, &response.reason),
        _ => ErrorKind::RetryRequired,
    }
}

/// Classify an API status by HTTP code and status reason
#[must_use]
pub fn classify_status(code: u16, reason: &str) -> ErrorKind {
    match (code, reason) {
        (401, _) | (_, "Unauthorized") => ErrorKind::Irrecoverable,
        (403, _) | (_, "Forbidden") => ErrorKind::Irrecoverable,
        (422, _) | (_, "Invalid") => ErrorKind::Irrecoverable,
        (400, _) | (_, "BadRequest") => ErrorKind::Irrecoverable,
        (503, _) | (_, "ServiceUnavailable") => ErrorKind::Irrecoverable,
        _ => ErrorKind::RetryRequired,
    }
}

#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

/// Optimistic-concurrency conflict (stale resourceVersion)
#[must_use]
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409 && response.reason != "AlreadyExists")
}

#[must_use]
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists")
}

/// Result of one complete reconcile pass
#[derive(Debug)]
pub enum ReconcileOutcome {
    Success,
    Irrecoverable(ReconcileError),
    RetryRequired(ReconcileError),
}

impl ReconcileOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ReconcileOutcome::Success)
    }

    /// Error carried by a failed outcome
    #[must_use]
    pub fn error(&self) -> Option<&ReconcileError> {
        match self {
            ReconcileOutcome::Success => None,
            ReconcileOutcome::Irrecoverable(e) | ReconcileOutcome::RetryRequired(e) => Some(e),
        }
    }

    /// Label used in metrics and logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Success => "success",
            ReconcileOutcome::Irrecoverable(_) => ErrorKind::Irrecoverable.as_str(),
            ReconcileOutcome::RetryRequired(_) => ErrorKind::RetryRequired.as_str(),
        }
    }
}

impl From<Result<(), ReconcileError>> for ReconcileOutcome {
    fn from(result: Result<(), ReconcileError>) -> Self {
        match result {
            Ok(()) => ReconcileOutcome::Success,
            Err(e) => match e.kind {
                ErrorKind::Irrecoverable => ReconcileOutcome::Irrecoverable(e),
                ErrorKind::RetryRequired => ReconcileOutcome::RetryRequired(e),
            },
        }
    }
}

/// Build an API error response, as returned by the API server
#[must_use]
pub fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    })
}
