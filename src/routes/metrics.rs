use axum::http::StatusCode;
use prometheus::{Encoder, TextEncoder};

/// GET /metrics: Prometheus scrape endpoint for resolver, gate and provisioning counters.
pub async fn metrics_handler() -> Result<String, StatusCode> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
