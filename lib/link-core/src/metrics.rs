//! Prometheus metrics for Import reconciliation

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Metrics recorded by the reconciler
#[derive(Clone)]
pub struct ReconcileMetrics {
    /// Reconciliations by outcome
    pub reconcile_total: IntCounterVec,
    /// Duration of a full reconciliation including retries
    pub reconcile_duration_seconds: Histogram,
    /// Retries caused by transient store failures
    pub reconcile_retries_total: IntCounter,
}

impl ReconcileMetrics {
    /// Create the metrics and register them with `registry`
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let reconcile_total = IntCounterVec::new(
            Opts::new("link_reconcile_total", "Import reconciliations by result"),
            &["result"],
        )?;

        let reconcile_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "link_reconcile_duration_seconds",
            "Import reconciliation latency in seconds",
        ))?;

        let reconcile_retries_total = IntCounter::new(
            "link_reconcile_retries_total",
            "Reconciliation retries after transient store failures",
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;
        registry.register(Box::new(reconcile_retries_total.clone()))?;

        Ok(Self {
            reconcile_total,
            reconcile_duration_seconds,
            reconcile_retries_total,
        })
    }

    pub fn record(&self, result: &str) {
        self.reconcile_total.with_label_values(&[result]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let registry = Registry::new();
        let metrics = ReconcileMetrics::new(&registry).unwrap();
        metrics.record("valid");
        metrics.record("valid");
        assert_eq!(metrics.reconcile_total.with_label_values(&["valid"]).get(), 2);
        assert!(ReconcileMetrics::new(&registry).is_err());
    }
}
