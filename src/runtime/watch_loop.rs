//! # Watch Loop
//!
//! Runs the three controllers side by side:
//!
//! - config: `ExternalSecretsConfig`, re-triggered by any labelled operand object
//!   and by changes to `ExternalSecretsManager`
//! - manager: `ExternalSecretsManager`
//! - status: `ExternalSecretsOperator`, re-triggered by either config kind
//!
//! Each controller restarts after its stream ends until shutdown is requested.

use crate::config::SharedControllerConfig;
use crate::constants::{
    CONFIG_CONTROLLER_NAME, MANAGER_CONTROLLER_NAME, SINGLETON_NAME, STATUS_CONTROLLER_NAME,
};
use crate::controller::reconciler::{reconcile_config, reconcile_manager, reconcile_operator, Context};
use crate::controller::resources::ManagedKind;
use crate::controller::scope::{to_config_singleton, WatchScope};
use crate::crd::{Certificate, ExternalSecretsConfig, ExternalSecretsManager, ExternalSecretsOperator};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::server::ServerState;
use futures::{Stream, StreamExt};
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::Api;
use kube::Client;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{controller, watcher, Controller};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Run every controller until shutdown
pub async fn run_watch_loop(
    client: Client,
    context: Arc<Context>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, initiating graceful shutdown...");
        shutdown_server_state.set_ready(false);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    let scope = WatchScope::new(&context.capabilities);
    info!(kinds = ?scope.kinds(), selector = WatchScope::label_selector().as_str(), "Watch scope");

    let config_loop = supervise(
        CONFIG_CONTROLLER_NAME,
        Arc::clone(&server_state),
        Arc::clone(&controller_config),
        |backoff| {
            let controller = config_controller(&client, &scope)
                .shutdown_on_signal()
                .run(
                    reconcile_config,
                    |obj, error, ctx| handle_reconciliation_error(obj, error, ctx),
                    Arc::clone(&context),
                );
            drain(controller, backoff, Arc::clone(&controller_config))
        },
    );

    let manager_loop = supervise(
        MANAGER_CONTROLLER_NAME,
        Arc::clone(&server_state),
        Arc::clone(&controller_config),
        |backoff| {
            let controller = Controller::new(
                Api::<ExternalSecretsManager>::all(client.clone()),
                watcher::Config::default().any_semantic(),
            )
            .shutdown_on_signal()
            .run(
                reconcile_manager,
                |obj, error, ctx| handle_reconciliation_error(obj, error, ctx),
                Arc::clone(&context),
            );
            drain(controller, backoff, Arc::clone(&controller_config))
        },
    );

    let status_loop = supervise(
        STATUS_CONTROLLER_NAME,
        Arc::clone(&server_state),
        Arc::clone(&controller_config),
        |backoff| {
            let controller = Controller::new(
                Api::<ExternalSecretsOperator>::all(client.clone()),
                watcher::Config::default().any_semantic(),
            )
            .watches(
                Api::<ExternalSecretsConfig>::all(client.clone()),
                watcher::Config::default(),
                |_| Some(ObjectRef::<ExternalSecretsOperator>::new(SINGLETON_NAME)),
            )
            .watches(
                Api::<ExternalSecretsManager>::all(client.clone()),
                watcher::Config::default(),
                |_| Some(ObjectRef::<ExternalSecretsOperator>::new(SINGLETON_NAME)),
            )
            .shutdown_on_signal()
            .run(
                reconcile_operator,
                |obj, error, ctx| handle_reconciliation_error(obj, error, ctx),
                Arc::clone(&context),
            );
            drain(controller, backoff, Arc::clone(&controller_config))
        },
    );

    tokio::join!(config_loop, manager_loop, status_loop);

    info!("Operator stopped gracefully");
    Ok(())
}

/// The config controller with one watch per kind in scope
fn config_controller(client: &Client, scope: &WatchScope) -> Controller<ExternalSecretsConfig> {
    let controller = Controller::new(
        Api::<ExternalSecretsConfig>::all(client.clone()),
        watcher::Config::default().any_semantic(),
    )
    .watches(
        Api::<ExternalSecretsManager>::all(client.clone()),
        watcher::Config::default(),
        |_| Some(ObjectRef::<ExternalSecretsConfig>::new(SINGLETON_NAME)),
    );
    scope
        .kinds()
        .iter()
        .fold(controller, |controller, kind| watch_managed(controller, client, *kind))
}

fn watch_managed(
    controller: Controller<ExternalSecretsConfig>,
    client: &Client,
    kind: ManagedKind,
) -> Controller<ExternalSecretsConfig> {
    let wc = WatchScope::watcher_config();
    let c = client.clone();
    match kind {
        ManagedKind::Namespace => controller.watches(Api::<Namespace>::all(c), wc, to_config_singleton),
        ManagedKind::ServiceAccount => {
            controller.watches(Api::<ServiceAccount>::all(c), wc, to_config_singleton)
        }
        ManagedKind::Certificate => controller.watches(Api::<Certificate>::all(c), wc, to_config_singleton),
        ManagedKind::Secret => controller.watches(Api::<Secret>::all(c), wc, to_config_singleton),
        ManagedKind::ClusterRole => controller.watches(Api::<ClusterRole>::all(c), wc, to_config_singleton),
        ManagedKind::ClusterRoleBinding => {
            controller.watches(Api::<ClusterRoleBinding>::all(c), wc, to_config_singleton)
        }
        ManagedKind::Role => controller.watches(Api::<Role>::all(c), wc, to_config_singleton),
        ManagedKind::RoleBinding => controller.watches(Api::<RoleBinding>::all(c), wc, to_config_singleton),
        ManagedKind::NetworkPolicy => {
            controller.watches(Api::<NetworkPolicy>::all(c), wc, to_config_singleton)
        }
        ManagedKind::Service => controller.watches(Api::<Service>::all(c), wc, to_config_singleton),
        ManagedKind::Deployment => controller.watches(Api::<Deployment>::all(c), wc, to_config_singleton),
        ManagedKind::ValidatingWebhookConfiguration => controller.watches(
            Api::<ValidatingWebhookConfiguration>::all(c),
            wc,
            to_config_singleton,
        ),
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Restart one controller whenever its stream ends, until shutdown
async fn supervise<F, Fut>(
    controller: &'static str,
    server_state: Arc<ServerState>,
    config: SharedControllerConfig,
    mut run_once: F,
) where
    F: FnMut(Arc<AtomicU64>) -> Fut,
    Fut: Future<Output = ()>,
{
    let backoff_duration_ms = Arc::new(AtomicU64::new(config.backoff_start_ms));

    loop {
        if !server_state.is_ready() {
            info!(controller, "Shutdown requested, exiting watch loop");
            break;
        }

        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop",
            controller
        );
        info!(controller, "Starting controller watch loop...");
        run_once(Arc::clone(&backoff_duration_ms)).instrument(watch_span).await;

        if !server_state.is_ready() {
            info!(controller, "Shutdown requested, exiting watch loop");
            break;
        }

        let delay = config.watch_restart_delay_after_end_duration();
        warn!(
            controller,
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }
}

/// Consume a controller stream
///
/// Reconcile failures are only logged; the error policy already requeues them.
/// Watch failures are classified and delayed.
async fn drain<S, T, R>(stream: S, backoff: Arc<AtomicU64>, config: SharedControllerConfig)
where
    S: Stream<Item = Result<T, controller::Error<R, watcher::Error>>>,
    R: std::error::Error + 'static,
{
    stream
        .filter_map(move |x| {
            let backoff = Arc::clone(&backoff);
            let config = Arc::clone(&config);
            async move {
                match &x {
                    Ok(_) => {
                        backoff.store(config.backoff_start_ms, Ordering::Relaxed);
                        debug!("watch.event.success");
                        Some(x)
                    }
                    Err(controller::Error::ReconcilerFailed(error, object)) => {
                        warn!(object = %object, error = %error, "Reconcile failed");
                        None
                    }
                    Err(controller::Error::ObjectNotFound(object)) => {
                        debug!(object = %object, "Object no longer exists");
                        None
                    }
                    Err(e) => {
                        let error_string = format!("{e:?}");
                        handle_watch_stream_error(
                            &error_string,
                            &backoff,
                            config.backoff_max_ms,
                            config.watch_restart_delay_duration(),
                        )
                        .await
                        .map(|()| x)
                    }
                }
            }
        })
        .for_each(|_| futures::future::ready(()))
        .await;
}
