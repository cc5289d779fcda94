use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // MongoDB
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Realtime
    pub static ref REALTIME_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "realtime_connections_active",
        "Number of registered realtime connections"
    )
    .unwrap();

    pub static ref NOTIFICATION_DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "notification_deliveries_total",
        "Realtime notification pushes by outcome",
        &["outcome"]
    )
    .unwrap();

    // Background jobs
    pub static ref JOB_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "job_ticks_total",
        "Background job ticks",
        &["job", "status"]
    )
    .unwrap();

    // Business
    pub static ref QUIZ_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_attempts_total",
        "Quiz attempts by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref AUTH_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "auth_failures_total",
        "Rejected authentication attempts",
        &["reason"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Times a database call and records its outcome
pub async fn track_db_operation<F, T>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

pub fn record_delivery(delivered: bool) {
    let outcome = if delivered { "delivered" } else { "dropped" };
    NOTIFICATION_DELIVERIES_TOTAL
        .with_label_values(&[outcome])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_metrics_includes_registered_families() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();
        JOB_TICKS_TOTAL
            .with_label_values(&["section_expiry", "success"])
            .inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("http_requests_total"));
        assert!(output.contains("job_ticks_total"));
    }

    #[test]
    fn test_record_delivery_labels() {
        let before = NOTIFICATION_DELIVERIES_TOTAL
            .with_label_values(&["dropped"])
            .get();
        record_delivery(false);
        assert!(
            NOTIFICATION_DELIVERIES_TOTAL
                .with_label_values(&["dropped"])
                .get()
                > before
        );
    }

    #[tokio::test]
    async fn test_track_db_operation_passes_result_through() {
        let value = track_db_operation("find", "test", async { Ok::<_, anyhow::Error>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(
            DB_OPERATIONS_TOTAL
                .with_label_values(&["find", "test", "success"])
                .get()
                >= 1
        );
    }
}
