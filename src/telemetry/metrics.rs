//! Prometheus metrics

use std::time::Duration;

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// Order placement round trip
    OrderPlacement,
    /// Token renewal HTTP call
    TokenRenewal,
}

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Orders accepted by the venue
    OrdersSubmitted,
    /// Orders terminally rejected (risk or venue)
    OrdersRejected,
    /// Orders failed on transport error
    OrdersFailed,
    /// Resubmissions after venue rejections
    OrderRetries,
    /// Pre-trade risk rejections
    RiskRejections,
    /// Fills applied to the order ledger
    Fills,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Unrealized P&L
    UnrealizedPnl,
    /// Realized P&L
    RealizedPnl,
    /// Daily P&L seen by the risk gate
    DailyPnl,
    /// Symbols with a nonzero position
    OpenPositions,
}

impl LatencyMetric {
    fn name(self) -> &'static str {
        match self {
            LatencyMetric::OrderPlacement => "tv_order_placement_latency_ms",
            LatencyMetric::TokenRenewal => "tv_token_renewal_latency_ms",
        }
    }
}

impl CounterMetric {
    fn name(self) -> &'static str {
        match self {
            CounterMetric::OrdersSubmitted => "tv_orders_submitted_total",
            CounterMetric::OrdersRejected => "tv_orders_rejected_total",
            CounterMetric::OrdersFailed => "tv_orders_failed_total",
            CounterMetric::OrderRetries => "tv_order_retries_total",
            CounterMetric::RiskRejections => "tv_risk_rejections_total",
            CounterMetric::Fills => "tv_fills_total",
        }
    }
}

impl GaugeMetric {
    fn name(self) -> &'static str {
        match self {
            GaugeMetric::UnrealizedPnl => "tv_unrealized_pnl_usd",
            GaugeMetric::RealizedPnl => "tv_realized_pnl_usd",
            GaugeMetric::DailyPnl => "tv_daily_pnl_usd",
            GaugeMetric::OpenPositions => "tv_open_positions",
        }
    }
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    metrics::histogram!(metric.name()).record(duration.as_secs_f64() * 1000.0);
}

/// Bump a counter by one
pub fn increment(metric: CounterMetric) {
    metrics::counter!(metric.name()).increment(1);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    metrics::gauge!(metric.name()).set(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed() {
        assert_eq!(CounterMetric::OrdersSubmitted.name(), "tv_orders_submitted_total");
        assert_eq!(GaugeMetric::UnrealizedPnl.name(), "tv_unrealized_pnl_usd");
        assert!(LatencyMetric::OrderPlacement.name().starts_with("tv_"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        increment(CounterMetric::Fills);
        set_gauge(GaugeMetric::OpenPositions, 2.0);
        record_latency(LatencyMetric::TokenRenewal, Duration::from_millis(3));
    }
}
