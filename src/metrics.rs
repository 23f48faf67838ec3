//! Prometheus metrics
//!
//! All collectors live in an owned [`Registry`] so that tests and several
//! in-process components never clash on the global default registry.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Operator metrics
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    provisioning_operations: IntCounterVec,
    provisioning_duration: HistogramVec,
    convergence_attempts: HistogramVec,
}

impl Metrics {
    /// Create and register all collectors
    pub fn new() -> Result<Arc<Self>> {
        let registry = Registry::new_custom(Some("local_volume_operator".into()), None)
            .map_err(metrics_error)?;

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "reconciliations_total",
                "LocalStorageClass reconciliations by action and result",
            ),
            &["action", "result"],
        )
        .map_err(metrics_error)?;

        let provisioning_operations = IntCounterVec::new(
            Opts::new(
                "provisioning_operations_total",
                "Volume provisioning operations by operation and result",
            ),
            &["operation", "result"],
        )
        .map_err(metrics_error)?;

        let provisioning_duration = HistogramVec::new(
            HistogramOpts::new(
                "provisioning_duration_seconds",
                "Duration of volume provisioning operations",
            )
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["operation"],
        )
        .map_err(metrics_error)?;

        let convergence_attempts = HistogramVec::new(
            HistogramOpts::new(
                "convergence_attempts",
                "Status polls needed for a logical volume to converge",
            )
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 20.0, 60.0, 120.0, 600.0]),
            &["operation"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(reconciliations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(provisioning_operations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(provisioning_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(convergence_attempts.clone()))
            .map_err(metrics_error)?;

        Ok(Arc::new(Self {
            registry,
            reconciliations,
            provisioning_operations,
            provisioning_duration,
            convergence_attempts,
        }))
    }

    pub fn record_reconcile(&self, action: &str, success: bool) {
        self.reconciliations
            .with_label_values(&[action, result_label(success)])
            .inc();
    }

    pub fn record_provisioning(&self, operation: &str, success: bool, elapsed: Duration) {
        self.provisioning_operations
            .with_label_values(&[operation, result_label(success)])
            .inc();
        self.provisioning_duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_convergence(&self, operation: &str, attempts: u32) {
        self.convergence_attempts
            .with_label_values(&[operation])
            .observe(f64::from(attempts));
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn result_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}
