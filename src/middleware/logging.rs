//! Request logging middleware.
//!
//! One line per request with method, path, status and latency. Query strings
//! are dropped so bearer tokens passed as `?token=` never reach the logs.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Paths polled often enough to only log at debug level
const QUIET_PATHS: &[&str] = &["/health", "/"];

pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    if status >= 500 {
        warn!(method = %method, path = %path, status, latency_ms, "Request failed (5xx)");
    } else if QUIET_PATHS.contains(&path.as_str()) {
        debug!(method = %method, path = %path, status, latency_ms, "Request completed");
    } else {
        info!(method = %method, path = %path, status, latency_ms, "Request completed");
    }

    response
}
