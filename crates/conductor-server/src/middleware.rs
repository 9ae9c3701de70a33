use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::time::{Duration, Instant};

/// Response header carrying the request's processing time.
pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Formats a duration as milliseconds with two decimals, e.g. `"12.34ms"`.
pub fn format_process_time(elapsed: Duration) -> String {
    format!("{:.2}ms", elapsed.as_secs_f64() * 1000.0)
}

/// Request logging middleware.
///
/// Logs method, path, status and processing time of every request and sets
/// the `X-Process-Time` header on the response.
pub async fn request_log_middleware(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let mut response = next.run(req).await;

    let elapsed = start.elapsed();
    let process_time = format_process_time(elapsed);
    let status = response.status();

    if status.is_server_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            process_time = %process_time,
            "request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            process_time = %process_time,
            "request completed"
        );
    }

    if let Ok(value) = HeaderValue::from_str(&process_time) {
        response.headers_mut().insert(PROCESS_TIME_HEADER, value);
    }
    response
}
