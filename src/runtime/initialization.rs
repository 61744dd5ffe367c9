//! # Initialization
//!
//! Operator startup: rustls, tracing, metrics, the probe server, the Kubernetes
//! client, capability detection and the reconciler context.

use crate::config::{ControllerConfig, ServerConfig, SharedControllerConfig};
use crate::controller::capability::CapabilityRegistry;
use crate::controller::reconciler::{ensure_singletons, Context};
use crate::crd::{ExternalSecretsConfig, ExternalSecretsManager, ExternalSecretsOperator};
use crate::observability;
use crate::server::{start_server, ServerState};
use anyhow::Result;
use kube::api::{Api, ListParams};
use kube::{Client, CustomResourceExt};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Reconciler context shared by the three controllers
    pub context: Arc<Context>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    pub controller_config: SharedControllerConfig,
    pub server_config: ServerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Initialize the operator runtime
///
/// - rustls crypto provider setup
/// - tracing subscriber setup
/// - metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - capability detection
/// - singleton bootstrap
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before any TLS connection; a second install is harmless.
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    let controller_config = Arc::new(ControllerConfig::from_env());
    let server_config = ServerConfig::from_env();

    init_tracing(&controller_config);
    if !provider_installed {
        warn!("rustls crypto provider was already installed");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        built = env!("BUILD_DATETIME"),
        commit = env!("BUILD_GIT_HASH"),
        "Starting External Secrets Operator"
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = Arc::clone(&server_state);
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default().await?;

    let capabilities = detect_capabilities(client.clone(), &controller_config).await;
    let context = Arc::new(Context::new(
        client.clone(),
        capabilities,
        Arc::clone(&controller_config),
    ));

    check_crds_queryable(&client).await;
    if let Err(e) = ensure_singletons(&context).await {
        // The watch still starts; the singletons can be created by hand.
        error!(error = %e, "Failed to create operator singletons");
    }

    if controller_config.external_secrets_image.is_none() {
        warn!(
            "{} is not set; ExternalSecretsConfig reconciliation will fail until it is",
            crate::constants::ENV_EXTERNAL_SECRETS_IMAGE
        );
    }

    info!("Operator initialized, starting watch loops...");

    Ok(InitializationResult {
        client,
        context,
        server_state,
        controller_config,
        server_config,
    })
}

/// `RUST_LOG` wins; otherwise the configured level applies to this crate
fn init_tracing(config: &ControllerConfig) {
    let default_filter = format!("external_secrets_operator={}", config.log_level.to_lowercase());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let result = if config.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if let Err(e) = result {
        warn!("Tracing subscriber init returned error (may already be initialized): {}", e);
    }
}

/// Capability registry, or an empty one when detection is off or fails
async fn detect_capabilities(client: Client, config: &ControllerConfig) -> CapabilityRegistry {
    if !config.capability_detection_enabled {
        info!("Capability detection disabled; optional extensions treated as absent");
        return CapabilityRegistry::none();
    }
    match CapabilityRegistry::detect(client).await {
        Ok(registry) => registry,
        Err(e) => {
            warn!(error = %e, "Capability detection failed; optional extensions treated as absent");
            CapabilityRegistry::none()
        }
    }
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = server_config.startup_timeout();
    let poll_interval = server_config.poll_interval();
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready() {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// Log a remediation hint for every custom resource kind the API server cannot list
async fn check_crds_queryable(client: &Client) {
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.check_crds",
        operation = "check_crds_queryable"
    );
    let _guard = span.enter();

    report_crd(
        Api::<ExternalSecretsConfig>::all(client.clone()).list(&ListParams::default().limit(1)).await,
        ExternalSecretsConfig::crd_name(),
    );
    report_crd(
        Api::<ExternalSecretsManager>::all(client.clone()).list(&ListParams::default().limit(1)).await,
        ExternalSecretsManager::crd_name(),
    );
    report_crd(
        Api::<ExternalSecretsOperator>::all(client.clone()).list(&ListParams::default().limit(1)).await,
        ExternalSecretsOperator::crd_name(),
    );
}

fn report_crd<K>(result: Result<kube::core::ObjectList<K>, kube::Error>, crd_name: &str)
where
    K: Clone,
{
    match result {
        Ok(list) => info!(crd = crd_name, existing = list.items.len(), "CRD is queryable"),
        Err(e) => {
            error!(crd = crd_name, error = %e, "CRD is not queryable");
            error!("Install the CRDs before starting the operator:");
            error!("   cargo run --bin crdgen | kubectl apply -f -");
            error!("   kubectl get crd {crd_name}");
        }
    }
}
