//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Name of the singleton instance of every custom resource this operator reads
pub const SINGLETON_NAME: &str = "cluster";

/// Namespace the external-secrets operand is installed into
pub const OPERAND_NAMESPACE: &str = "external-secrets";

/// Field manager / reporting component used for writes and events
pub const OPERATOR_NAME: &str = "external-secrets-operator";

/// Controller identity for the per-deployment `ExternalSecretsConfig` reconciler
pub const CONFIG_CONTROLLER_NAME: &str = "external-secrets-config-controller";

/// Controller identity for the operator-wide `ExternalSecretsManager` reconciler
pub const MANAGER_CONTROLLER_NAME: &str = "external-secrets-manager-controller";

/// Controller identity for the status fan-in reconciler
pub const STATUS_CONTROLLER_NAME: &str = "external-secrets-status-controller";

/// Finalizer placed on `ExternalSecretsConfig` before any operand object is created
pub const FINALIZER: &str = "externalsecretsconfig.operator.openshift.io/finalizer";

/// Identity label carried by every managed object (also the watch label selector)
pub const LABEL_APP: &str = "app";
pub const LABEL_APP_VALUE: &str = "external-secrets";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";

/// Pod selector label used by workloads and network policies
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Label domains users may not set on managed objects
pub const RESERVED_LABEL_DOMAINS: &[&str] =
    &["kubernetes.io", "k8s.io", "openshift.io", "external-secrets.io"];

/// Annotation cert-manager's CA injector reads on webhook configurations
pub const CERT_MANAGER_INJECT_CA_ANNOTATION: &str = "cert-manager.io/inject-ca-from";

/// API group / kind of the optional cert-manager extension
pub const CERT_MANAGER_GROUP: &str = "cert-manager.io";
pub const CERT_MANAGER_VERSION: &str = "v1";
pub const CERT_MANAGER_CERTIFICATE_KIND: &str = "Certificate";

/// Environment variable carrying the external-secrets operand image
pub const ENV_EXTERNAL_SECRETS_IMAGE: &str = "RELATED_IMAGE_EXTERNAL_SECRETS";

/// Environment variable carrying the bitwarden-sdk-server plugin image
pub const ENV_BITWARDEN_IMAGE: &str = "RELATED_IMAGE_BITWARDEN_SDK_SERVER";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default delayed requeue for passes that ended in a retryable failure (seconds)
pub const DEFAULT_REQUEUE_INTERVAL_SECS: u64 = 30;

/// Default number of optimistic-concurrency attempts for finalizer/status/update writes
pub const DEFAULT_CONFLICT_RETRY_ATTEMPTS: u32 = 5;

/// Default delay between optimistic-concurrency attempts (milliseconds)
pub const DEFAULT_CONFLICT_RETRY_DELAY_MS: u64 = 10;

/// Default exponential backoff starting value for watch restarts (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value for watch restarts (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default webhook certificate check interval passed to the operand
pub const DEFAULT_CERTIFICATE_CHECK_INTERVAL: &str = "5m";

/// Condition types
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_DEGRADED: &str = "Degraded";

/// Condition reasons
pub const REASON_READY: &str = "Ready";
pub const REASON_IN_PROGRESS: &str = "InProgress";
pub const REASON_FAILED: &str = "Failed";
pub const REASON_NO_FAILURE: &str = "NoFailure";

/// Event reasons
pub const EVENT_CREATED: &str = "Created";
pub const EVENT_RECONCILED: &str = "Reconciled";
pub const EVENT_ALREADY_EXISTS: &str = "ResourceAlreadyExists";
pub const EVENT_CLEANUP_SKIPPED: &str = "CleanupSkipped";
pub const EVENT_DELETED: &str = "Deleted";
