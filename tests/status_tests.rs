//! # Status Integration Tests
//!
//! Conditions on the config and manager singletons, and their fan-in into
//! `ExternalSecretsOperator/cluster`.

mod common;

use common::Harness;
use external_secrets_operator::constants::{
    CONFIG_CONTROLLER_NAME, MANAGER_CONTROLLER_NAME, SINGLETON_NAME,
};
use external_secrets_operator::controller::reconciler::ensure_singletons;
use external_secrets_operator::controller::store::StoreOp;
use external_secrets_operator::crd::{
    ExternalSecretsConfigSpec, ExternalSecretsManagerSpec, GlobalConfig, Toleration,
};
use kube::runtime::controller::Action;

fn invalid_global() -> ExternalSecretsManagerSpec {
    let mut global = GlobalConfig::default();
    global.common.tolerations.push(Toleration {
        operator: Some("Exists".to_string()),
        value: Some("v".to_string()),
        ..Toleration::default()
    });
    ExternalSecretsManagerSpec {
        global_config: Some(global),
    }
}

#[tokio::test]
async fn test_conditions_do_not_churn() {
    let harness = Harness::new();
    harness.apply_config(ExternalSecretsConfigSpec::default());
    harness.reconcile_config().await.unwrap();

    let first = harness.config().status.unwrap();
    let writes = harness.configs.status_writes();

    harness.reconcile_config().await.unwrap();
    harness.reconcile_config().await.unwrap();

    assert_eq!(harness.configs.status_writes(), writes);
    let ready = |s: &external_secrets_operator::crd::ExternalSecretsConfigStatus| {
        s.conditional.get("Ready").and_then(|c| c.last_transition_time.clone())
    };
    assert_eq!(ready(&harness.config().status.unwrap()), ready(&first));
}

#[tokio::test]
async fn test_manager_reports_invalid_global_config() {
    let harness = Harness::new();
    harness.apply_manager(invalid_global());

    let action = harness.reconcile_manager().await.unwrap();

    assert_eq!(action, Action::await_change());
    let status = harness.managers.object(SINGLETON_NAME).unwrap().status.unwrap();
    assert!(status.conditional.is_true("Degraded"));
    assert!(!status.conditional.is_true("Ready"));
    assert_eq!(status.observed_generation, Some(1));
}

#[tokio::test]
async fn test_invalid_global_config_blocks_the_operand() {
    let harness = Harness::new();
    harness.apply_manager(invalid_global());
    harness.apply_config(ExternalSecretsConfigSpec::default());

    let action = harness.reconcile_config().await.unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(harness.store.count(StoreOp::Create), 0);
    let degraded = harness.config().status.unwrap();
    let message = degraded.conditional.get("Degraded").and_then(|c| c.message.clone()).unwrap_or_default();
    assert!(message.contains("ExternalSecretsManager"), "{message}");
}

#[tokio::test]
async fn test_fan_in_republishes_controller_conditions() {
    let harness = Harness::new();
    ensure_singletons(&harness.context).await.unwrap();
    harness.apply_config(ExternalSecretsConfigSpec::default());
    harness.reconcile_config().await.unwrap();
    harness.reconcile_manager().await.unwrap();

    harness.reconcile_operator().await.unwrap();

    let status = harness.operators.object(SINGLETON_NAME).unwrap().status.unwrap();
    assert_eq!(status.controller_statuses.len(), 2);
    assert!(status.last_transition_time.is_some());
    for name in [CONFIG_CONTROLLER_NAME, MANAGER_CONTROLLER_NAME] {
        let bucket = status.controller(name).unwrap_or_else(|| panic!("{name} bucket"));
        assert!(bucket.conditional.is_true("Ready"), "{name}");
    }

    let writes = harness.operators.status_writes();
    harness.reconcile_operator().await.unwrap();
    assert_eq!(harness.operators.status_writes(), writes);
}

#[tokio::test]
async fn test_fan_in_follows_a_degraded_controller() {
    let harness = Harness::new();
    harness.apply_operator();
    harness.apply_manager(ExternalSecretsManagerSpec::default());
    harness.reconcile_manager().await.unwrap();
    harness.reconcile_operator().await.unwrap();

    harness.apply_manager(invalid_global());
    harness.reconcile_manager().await.unwrap();
    harness.reconcile_operator().await.unwrap();

    let status = harness.operators.object(SINGLETON_NAME).unwrap().status.unwrap();
    assert_eq!(status.controller_statuses.len(), 1);
    let manager = status.controller(MANAGER_CONTROLLER_NAME).unwrap();
    assert!(manager.conditional.is_true("Degraded"));
    assert!(status.controller(CONFIG_CONTROLLER_NAME).is_none());
}
