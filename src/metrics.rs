//! Reconciliation Metrics
//!
//! Prometheus counters and histograms for reconciliation passes.

use crate::error::Result;
use crate::reconcile::{PassReport, Stage};
use crate::resources::ResourceKind;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Metrics recorded by the reconciler
#[derive(Clone)]
pub struct ReconcileMetrics {
    passes: IntCounterVec,
    created: IntCounterVec,
    duration: HistogramVec,
}

impl ReconcileMetrics {
    /// Create the metrics and register them with `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        let passes = IntCounterVec::new(
            Opts::new("nfd_reconcile_passes_total", "Reconciliation passes by stage and result"),
            &["stage", "result"],
        )?;
        let created = IntCounterVec::new(
            Opts::new("nfd_resources_created_total", "Managed resources created by kind"),
            &["kind"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "nfd_reconcile_duration_seconds",
                "Duration of reconciliation passes",
            ),
            &["stage"],
        )?;

        registry.register(Box::new(passes.clone()))?;
        registry.register(Box::new(created.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            passes,
            created,
            duration,
        })
    }

    pub fn record_created(&self, kind: ResourceKind) {
        self.created.with_label_values(&[kind.kind()]).inc();
    }

    pub fn observe_pass(&self, stage: Stage, result: &Result<PassReport>, elapsed: Duration) {
        let outcome = if result.is_ok() { "success" } else { "error" };
        self.passes
            .with_label_values(&[stage.as_str(), outcome])
            .inc();
        self.duration
            .with_label_values(&[stage.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn passes(&self, stage: Stage, outcome: &str) -> u64 {
        self.passes
            .with_label_values(&[stage.as_str(), outcome])
            .get()
    }

    pub fn created(&self, kind: ResourceKind) -> u64 {
        self.created.with_label_values(&[kind.kind()]).get()
    }
}
