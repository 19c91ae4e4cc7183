//! # Prometheus Metrics
//!
//! Cursor positions and lag of every catch-up loop, plus keeper activity.
//! Scraped at `/metrics` on the configured metrics port.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] prefixed
//! `velock_`, so they never collide with the default global registry.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use velock_contracts::{EngineStatus, SyncReport};

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Sync rounds run by the keeper or via `POST /sync`.
    pub keeper_rounds_total: IntCounter,
    /// Rounds that stopped at a work bound before every cursor caught up.
    pub keeper_partial_rounds_total: IntCounter,
    /// Rounds that failed with an engine error.
    pub keeper_errors_total: IntCounter,
    /// Snapshots written to disk.
    pub snapshots_written_total: IntCounter,
    /// Number of global points in the escrow ledger.
    pub escrow_epoch: IntGauge,
    pub escrow_weeks_behind: IntGauge,
    pub controller_weeks_behind: IntGauge,
    pub mining_epoch: IntGauge,
    pub gauges: IntGauge,
    /// Emission weeks not yet bucketed, per channel.
    pub channel_token_weeks_behind: IntGaugeVec,
    /// Supply weeks not yet snapshotted, per channel.
    pub channel_supply_weeks_behind: IntGaugeVec,
    pub fee_token_weeks_behind: IntGauge,
    pub fee_supply_weeks_behind: IntGauge,
    /// Wall time of one sync round, write lock held.
    pub sync_round_seconds: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let metric = IntCounter::new(name, help)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let metric = IntGauge::new(name, help)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn channel_gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGaugeVec> {
    let metric = IntGaugeVec::new(Opts::new(name, help), &["channel"])?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("velock".into()), None)?;

        let sync_round_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "sync_round_seconds",
                "Time spent in one sync round with the engine write lock held",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;
        registry.register(Box::new(sync_round_seconds.clone()))?;

        Ok(Self {
            keeper_rounds_total: counter(&registry, "keeper_rounds_total", "Sync rounds run")?,
            keeper_partial_rounds_total: counter(
                &registry,
                "keeper_partial_rounds_total",
                "Sync rounds that stopped before every cursor caught up",
            )?,
            keeper_errors_total: counter(
                &registry,
                "keeper_errors_total",
                "Sync rounds that failed",
            )?,
            snapshots_written_total: counter(
                &registry,
                "snapshots_written_total",
                "Engine snapshots written to disk",
            )?,
            escrow_epoch: gauge(&registry, "escrow_epoch", "Global points in the escrow ledger")?,
            escrow_weeks_behind: gauge(
                &registry,
                "escrow_weeks_behind",
                "Weeks between the last global escrow point and now",
            )?,
            controller_weeks_behind: gauge(
                &registry,
                "controller_weeks_behind",
                "Weeks the total weight history trails now",
            )?,
            mining_epoch: gauge(&registry, "mining_epoch", "Current inflation epoch")?,
            gauges: gauge(&registry, "gauges", "Registered reward channels")?,
            channel_token_weeks_behind: channel_gauge(
                &registry,
                "channel_token_weeks_behind",
                "Emission weeks not yet bucketed by a reward channel",
            )?,
            channel_supply_weeks_behind: channel_gauge(
                &registry,
                "channel_supply_weeks_behind",
                "Supply weeks not yet snapshotted by a reward channel",
            )?,
            fee_token_weeks_behind: gauge(
                &registry,
                "fee_token_weeks_behind",
                "Weeks since fees were last bucketed",
            )?,
            fee_supply_weeks_behind: gauge(
                &registry,
                "fee_supply_weeks_behind",
                "Supply weeks not yet snapshotted by the fee distributor",
            )?,
            sync_round_seconds,
            registry,
        })
    }

    /// Records the outcome of one sync round.
    pub fn observe_round(&self, report: &SyncReport, seconds: f64) {
        self.keeper_rounds_total.inc();
        if !report.caught_up() {
            self.keeper_partial_rounds_total.inc();
        }
        self.sync_round_seconds.observe(seconds);
    }

    /// Refreshes every lag gauge from an engine status.
    pub fn observe_status(&self, status: &EngineStatus) {
        self.escrow_epoch.set(clamp(status.escrow_epoch));
        self.escrow_weeks_behind.set(clamp(status.escrow_weeks_behind));
        self.controller_weeks_behind.set(clamp(status.controller_weeks_behind));
        self.mining_epoch.set(status.mining_epoch);
        self.gauges.set(i64::from(status.n_gauges));
        for ch in &status.channels {
            let label = ch.channel.to_string();
            self.channel_token_weeks_behind
                .with_label_values(&[&label])
                .set(clamp(ch.token_weeks_behind));
            self.channel_supply_weeks_behind
                .with_label_values(&[&label])
                .set(clamp(ch.supply_weeks_behind));
        }
        self.fee_token_weeks_behind.set(clamp(status.fee_token_weeks_behind));
        self.fee_supply_weeks_behind.set(clamp(status.fee_supply_weeks_behind));
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

/// Shared metrics state passed to axum handlers.
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
    use velock_contracts::ChannelStatus;
    use velock_protocol::{Address, Amount, Progress};

    fn status() -> EngineStatus {
        EngineStatus {
            now: 0,
            last_timestamp: 0,
            last_height: 0,
            escrow_epoch: 7,
            escrow_weeks_behind: 3,
            controller_weeks_behind: 2,
            mining_epoch: 1,
            inflation_started: true,
            rate: Amount::one(),
            n_gauge_types: 1,
            n_gauges: 1,
            channels: vec![ChannelStatus {
                channel: Address::from_low_u64(0x6A),
                token_time_cursor: 0,
                time_cursor: 0,
                token_weeks_behind: 4,
                supply_weeks_behind: 5,
            }],
            fee_token_weeks_behind: 0,
            fee_supply_weeks_behind: 1,
        }
    }

    #[test]
    fn encodes_lag_gauges() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.observe_status(&status());
        let text = metrics.encode().unwrap();
        assert!(text.contains("velock_escrow_epoch 7"));
        assert!(text.contains("velock_escrow_weeks_behind 3"));
        assert!(text.contains(
            "velock_channel_supply_weeks_behind{channel=\"0x000000000000000000000000000000000000006a\"} 5"
        ));
    }

    #[test]
    fn partial_rounds_counted_separately() {
        let metrics = NodeMetrics::new().unwrap();
        let done = SyncReport {
            escrow: Progress::idle(),
            schedule: Progress::idle(),
            controller: Progress::done(3),
            channels: Progress::idle(),
            fees: Progress::idle(),
        };
        let partial = SyncReport {
            escrow: Progress::partial(255),
            ..done
        };
        metrics.observe_round(&done, 0.001);
        metrics.observe_round(&partial, 0.002);
        assert_eq!(metrics.keeper_rounds_total.get(), 2);
        assert_eq!(metrics.keeper_partial_rounds_total.get(), 1);
    }
}
