//! Prometheus metrics for connection decisions

use prometheus::{IntCounterVec, Opts, Registry};

#[derive(Clone)]
pub struct PolicyMetrics {
    /// Decisions by outcome
    pub decisions_total: IntCounterVec,
    /// Endpoint selections by strategy
    pub lb_selections_total: IntCounterVec,
}

impl PolicyMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let decisions_total = IntCounterVec::new(
            Opts::new("link_policy_decisions_total", "Connection decisions by outcome"),
            &["action"],
        )?;
        let lb_selections_total = IntCounterVec::new(
            Opts::new("link_lb_selections_total", "Endpoint selections by load-balancing strategy"),
            &["strategy"],
        )?;

        registry.register(Box::new(decisions_total.clone()))?;
        registry.register(Box::new(lb_selections_total.clone()))?;

        Ok(Self {
            decisions_total,
            lb_selections_total,
        })
    }
}
