use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::events::unix_now;

/// Wall-clock time the request was received, unix seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestStart(pub f64);

/// Outermost middleware: stamps [`RequestStart`] before anything else runs
/// and logs a one-liner once the response is ready.
pub async fn request_start_middleware(mut req: Request, next: Next) -> Response {
    req.extensions_mut().insert(RequestStart(unix_now()));

    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let start = Instant::now();
    let response = next.run(req).await;
    let us = start.elapsed().as_micros() as u64;

    tracing::info!(
        status = response.status().as_u16(),
        %method,
        path = %path,
        elapsed_us = us,
        "request handled"
    );

    response
}
