//! Prometheus metrics for the Kata operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `kata_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `kata_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `kata_config_phase` (gauge): 1 for the current phase of each KataConfig, 0 otherwise.
//! - `kata_config_nodes_total` (gauge): nodes targeted by the installation cycle.
//! - `kata_config_install_completed_nodes` (gauge): nodes that finished installing.
//! - `kata_config_uninstall_completed_nodes` (gauge): nodes that finished uninstalling.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use super::phase::Phase;
use crate::crd::KataConfigStatus;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "kataconfig"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind, see `Error::kind`
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KataConfigLabels {
    pub name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    pub name: String,
    pub phase: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets. Uninstall passes include the pool
        // settle delay and land in the top bucket.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static KATA_CONFIG_PHASE: Lazy<Family<PhaseLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static NODES_TOTAL: Lazy<Family<KataConfigLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static INSTALL_COMPLETED_NODES: Lazy<Family<KataConfigLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static UNINSTALL_COMPLETED_NODES: Lazy<Family<KataConfigLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "kata_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "kata_reconcile_errors",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "kata_config_phase",
        "Current reconciliation phase of the KataConfig (1 = active phase)",
        KATA_CONFIG_PHASE.clone(),
    );
    registry.register(
        "kata_config_nodes_total",
        "Nodes targeted by the current installation cycle",
        NODES_TOTAL.clone(),
    );
    registry.register(
        "kata_config_install_completed_nodes",
        "Nodes that finished installing the Kata runtime",
        INSTALL_COMPLETED_NODES.clone(),
    );
    registry.register(
        "kata_config_uninstall_completed_nodes",
        "Nodes that finished uninstalling the Kata runtime",
        UNINSTALL_COMPLETED_NODES.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

/// Publish the phase and progress counters of a KataConfig
pub fn set_kata_config_state(name: &str, phase: Phase, status: &KataConfigStatus) {
    for candidate in Phase::ALL {
        let labels = PhaseLabels {
            name: name.to_string(),
            phase: candidate.as_str().to_string(),
        };
        KATA_CONFIG_PHASE
            .get_or_create(&labels)
            .set(i64::from(candidate == phase));
    }

    let labels = KataConfigLabels {
        name: name.to_string(),
    };
    NODES_TOTAL
        .get_or_create(&labels)
        .set(i64::from(status.total_nodes_count));
    INSTALL_COMPLETED_NODES.get_or_create(&labels).set(i64::from(
        status.installation_status.completed.completed_nodes_count,
    ));
    UNINSTALL_COMPLETED_NODES.get_or_create(&labels).set(i64::from(
        status.un_installation_status.completed.completed_nodes_count,
    ));
}
