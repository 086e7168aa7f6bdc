use std::time::Instant;

use async_trait::async_trait;
use tracing::Instrument;
use uuid::Uuid;

use sato_core::{HandlerResult, Interceptor, Next, Request};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Wraps each request in a span and logs status and latency.
///
/// Reuses an incoming `x-request-id` or mints one, and echoes it on the
/// response.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(&self, req: Request, next: Next) -> HandlerResult {
        let request_id = req
            .header(REQUEST_ID_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let span = tracing::info_span!(
            "request",
            method = %req.method(),
            path = %req.path(),
            request_id = %request_id,
        );

        let started = Instant::now();
        let result = next.run(req).instrument(span.clone()).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let _entered = span.enter();
        match result {
            Ok(response) => {
                tracing::info!(status = response.status(), latency_ms, "request completed");
                Ok(response.with_header(REQUEST_ID_HEADER, request_id))
            }
            Err(err) => {
                tracing::info!(error = %err, latency_ms, "request failed");
                Err(err)
            }
        }
    }
}
