//! # Prometheus Metrics
//!
//! Operational metrics for the operator node, scraped at `/metrics` on the
//! metrics port. Everything is registered in a dedicated
//! [`prometheus::Registry`] under the `childchain` prefix.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Metric handles for the node. Cloning shares the underlying metrics.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Light transactions admitted into the pending pool.
    pub light_txs_accepted_total: IntCounter,
    /// Light transactions refused, labelled by error code.
    pub light_txs_rejected_total: IntCounterVec,
    /// Checkpoints that reached `AwaitingCommit`.
    pub checkpoints_built_total: IntCounter,
    pub stages_committed_total: IntCounter,
    pub stages_rolled_back_total: IntCounter,
    /// Highest committed stage.
    pub stage_height: IntGauge,
    /// Receipts admitted but not yet committed.
    pub pending_receipts: IntGauge,
    /// Largest leaf bucket in the last receipt tree.
    pub max_collision: IntGauge,
    /// Wall time of checkpoint builds in seconds.
    pub tree_build_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("childchain".into()), None)?;

        let light_txs_accepted_total = IntCounter::new(
            "light_txs_accepted_total",
            "Light transactions admitted into the pending pool",
        )?;
        registry.register(Box::new(light_txs_accepted_total.clone()))?;

        let light_txs_rejected_total = IntCounterVec::new(
            Opts::new(
                "light_txs_rejected_total",
                "Light transactions refused, by error code",
            ),
            &["code"],
        )?;
        registry.register(Box::new(light_txs_rejected_total.clone()))?;

        let checkpoints_built_total = IntCounter::new(
            "checkpoints_built_total",
            "Checkpoints built and awaiting commit",
        )?;
        registry.register(Box::new(checkpoints_built_total.clone()))?;

        let stages_committed_total =
            IntCounter::new("stages_committed_total", "Stages committed to the parent chain")?;
        registry.register(Box::new(stages_committed_total.clone()))?;

        let stages_rolled_back_total =
            IntCounter::new("stages_rolled_back_total", "Stages rolled back")?;
        registry.register(Box::new(stages_rolled_back_total.clone()))?;

        let stage_height = IntGauge::new("stage_height", "Highest committed stage")?;
        registry.register(Box::new(stage_height.clone()))?;

        let pending_receipts = IntGauge::new(
            "pending_receipts",
            "Receipts admitted but not yet committed",
        )?;
        registry.register(Box::new(pending_receipts.clone()))?;

        let max_collision = IntGauge::new(
            "max_collision",
            "Largest leaf bucket in the most recent receipt tree",
        )?;
        registry.register(Box::new(max_collision.clone()))?;

        let tree_build_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "tree_build_seconds",
                "Time to replay receipts and build stage trees",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(tree_build_seconds.clone()))?;

        Ok(Self {
            registry,
            light_txs_accepted_total,
            light_txs_rejected_total,
            checkpoints_built_total,
            stages_committed_total,
            stages_rolled_back_total,
            stage_height,
            pending_receipts,
            max_collision,
            tree_build_seconds,
        })
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_are_prefixed() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.light_txs_accepted_total.inc();
        metrics
            .light_txs_rejected_total
            .with_label_values(&["WRONG_SIGNATURE"])
            .inc();
        metrics.stage_height.set(4);

        let text = metrics.encode().unwrap();
        assert!(text.contains("childchain_light_txs_accepted_total 1"));
        assert!(text.contains("childchain_light_txs_rejected_total{code=\"WRONG_SIGNATURE\"} 1"));
        assert!(text.contains("childchain_stage_height 4"));
    }
}
