//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `external_secrets_operator_reconciliations_total` - Reconcile passes by controller
//! - `external_secrets_operator_reconciliation_errors_total` - Failed passes by controller and error kind
//! - `external_secrets_operator_reconciliation_duration_seconds` - Duration of reconcile passes
//! - `external_secrets_operator_objects_created_total` - Managed objects created, by kind
//! - `external_secrets_operator_objects_updated_total` - Managed objects updated after drift, by kind
//! - `external_secrets_operator_objects_deleted_total` - Managed objects deleted on feature disable, by kind
//! - `external_secrets_operator_requeues_total` - Requeues by reason
//! - `external_secrets_operator_status_writes_total` - Status subresource writes, by resource kind
//! - `external_secrets_operator_capability_present` - 1 when an optional extension kind is served

use anyhow::Result;
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "external_secrets_operator_reconciliations_total",
            "Total number of reconcile passes",
        ),
        &["controller"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "external_secrets_operator_reconciliation_errors_total",
            "Total number of failed reconcile passes",
        ),
        &["controller", "kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "external_secrets_operator_reconciliation_duration_seconds",
            "Duration of reconcile passes in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["controller"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static OBJECTS_CREATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "external_secrets_operator_objects_created_total",
            "Total number of managed objects created",
        ),
        &["kind"],
    )
    .expect("Failed to create OBJECTS_CREATED_TOTAL metric - this should never happen")
});

static OBJECTS_UPDATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "external_secrets_operator_objects_updated_total",
            "Total number of managed objects updated to repair drift",
        ),
        &["kind"],
    )
    .expect("Failed to create OBJECTS_UPDATED_TOTAL metric - this should never happen")
});

static OBJECTS_DELETED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "external_secrets_operator_objects_deleted_total",
            "Total number of managed objects deleted because their feature was disabled",
        ),
        &["kind"],
    )
    .expect("Failed to create OBJECTS_DELETED_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "external_secrets_operator_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static STATUS_WRITES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "external_secrets_operator_status_writes_total",
            "Total number of status subresource writes",
        ),
        &["resource"],
    )
    .expect("Failed to create STATUS_WRITES_TOTAL metric - this should never happen")
});

static CAPABILITY_PRESENT: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        prometheus::Opts::new(
            "external_secrets_operator_capability_present",
            "Whether an optional extension kind was discovered at startup",
        ),
        &["capability"],
    )
    .expect("Failed to create CAPABILITY_PRESENT metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
/// Register every metric with [`REGISTRY`]; fails if called twice
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_UPDATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CAPABILITY_PRESENT.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(controller: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[controller]).inc();
}

pub fn increment_reconciliation_errors(controller: &str, kind: &str) {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[controller, kind])
        .inc();
}

pub fn observe_reconciliation_duration(controller: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[controller])
        .observe(duration);
}

pub fn increment_objects_created(kind: &str) {
    OBJECTS_CREATED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_objects_updated(kind: &str) {
    OBJECTS_UPDATED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_objects_deleted(kind: &str) {
    OBJECTS_DELETED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_requeues(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_status_writes(resource: &str) {
    STATUS_WRITES_TOTAL.with_label_values(&[resource]).inc();
}

pub fn set_capability_present(capability: &str, present: bool) {
    CAPABILITY_PRESENT
        .with_label_values(&[capability])
        .set(i64::from(present));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.with_label_values(&["test"]).get();
        increment_reconciliations("test");
        let after = RECONCILIATIONS_TOTAL.with_label_values(&["test"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_reconciliation_errors_by_kind() {
        let before = RECONCILIATION_ERRORS_TOTAL
            .with_label_values(&["test", "irrecoverable"])
            .get();
        increment_reconciliation_errors("test", "irrecoverable");
        let after = RECONCILIATION_ERRORS_TOTAL
            .with_label_values(&["test", "irrecoverable"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_observe_reconciliation_duration() {
        observe_reconciliation_duration("test", 0.25);
        assert!(
            RECONCILIATION_DURATION
                .with_label_values(&["test"])
                .get_sample_count()
                >= 1
        );
    }

    #[test]
    fn test_object_counters_are_per_kind() {
        let before = OBJECTS_CREATED_TOTAL.with_label_values(&["Namespace"]).get();
        let other = OBJECTS_CREATED_TOTAL.with_label_values(&["Service"]).get();
        increment_objects_created("Namespace");
        assert_eq!(
            OBJECTS_CREATED_TOTAL.with_label_values(&["Namespace"]).get(),
            before + 1u64
        );
        assert_eq!(OBJECTS_CREATED_TOTAL.with_label_values(&["Service"]).get(), other);
    }

    #[test]
    fn test_set_capability_present() {
        set_capability_present("test-capability", true);
        assert_eq!(
            CAPABILITY_PRESENT
                .with_label_values(&["test-capability"])
                .get(),
            1
        );
        set_capability_present("test-capability", false);
        assert_eq!(
            CAPABILITY_PRESENT
                .with_label_values(&["test-capability"])
                .get(),
            0
        );
    }
}
