// =============================================================================
// METRICS MODULE
// =============================================================================
// Prometheus metrics for the order service.
//
// METRIC TYPES USED:
// - Counter: Only goes up (requests, orders, notifications)
// - Histogram: Distribution of values in buckets (latency)
// =============================================================================

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// METRIC NAMES
// =============================================================================

/// Labels: method, endpoint, status
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

/// Labels: method, endpoint
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Labels: operation (place_order, cancel_order, ...)
pub const DB_QUERY_DURATION_SECONDS: &str = "db_query_duration_seconds";

pub const ORDERS_PLACED_TOTAL: &str = "orders_placed_total";

pub const ORDERS_CANCELLED_TOTAL: &str = "orders_cancelled_total";

/// Labels: status (target fulfillment status)
pub const ORDER_STATUS_TRANSITIONS_TOTAL: &str = "order_status_transitions_total";

/// Labels: kind (order_status, courier_approval, newsletter), outcome (sent/failed)
pub const NOTIFICATIONS_TOTAL: &str = "notifications_total";

// =============================================================================
// SETUP FUNCTION
// =============================================================================
/// Install the global Prometheus recorder and return the render handle.
pub fn setup_metrics() -> Result<PrometheusHandle> {
    // 1ms .. 10s
    let latency_buckets = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full(DB_QUERY_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency in seconds");
    describe_histogram!(
        DB_QUERY_DURATION_SECONDS,
        "Latency of workflow database work in seconds"
    );
    describe_counter!(ORDERS_PLACED_TOTAL, "Orders successfully placed");
    describe_counter!(ORDERS_CANCELLED_TOTAL, "Orders cancelled and refunded");
    describe_counter!(
        ORDER_STATUS_TRANSITIONS_TOTAL,
        "Fulfillment status updates by target status"
    );
    describe_counter!(NOTIFICATIONS_TOTAL, "Outbound email attempts by outcome");

    Ok(handle)
}

/// Handle that renders without being installed globally (tests).
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .record(duration_secs);
}

pub fn record_db_query(operation: &str, duration_secs: f64) {
    histogram!(
        DB_QUERY_DURATION_SECONDS,
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

pub fn record_order_placed() {
    counter!(ORDERS_PLACED_TOTAL).increment(1);
}

pub fn record_order_cancelled() {
    counter!(ORDERS_CANCELLED_TOTAL).increment(1);
}

pub fn record_status_transition(status: &str) {
    counter!(
        ORDER_STATUS_TRANSITIONS_TOTAL,
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_notification(kind: &str, success: bool) {
    let outcome = if success { "sent" } else { "failed" };
    counter!(
        NOTIFICATIONS_TOTAL,
        "kind" => kind.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
