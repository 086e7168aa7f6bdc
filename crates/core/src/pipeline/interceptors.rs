use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;

use super::{error_response, HandlerResult, Interceptor, Next};
use crate::cache::TtlCache;
use crate::transport::{Method, Request, Response};

pub(super) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Outermost wrapper on every route: turns errors and panics into responses.
///
/// Server-side detail is logged here and never sent to the client.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorInterceptor;

#[async_trait]
impl Interceptor for ErrorInterceptor {
    async fn intercept(&self, req: Request, next: Next) -> HandlerResult {
        let method = req.method();
        let path = req.path().to_string();

        match AssertUnwindSafe(async move { next.run(req).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                if err.is_client_error() {
                    tracing::debug!(%method, %path, error = %err, "request failed");
                } else {
                    tracing::error!(%method, %path, error = ?err, "handler failed");
                }
                Ok(error_response(&err))
            }
            Err(payload) => {
                tracing::error!(
                    %method,
                    %path,
                    panic = panic_message(payload.as_ref()),
                    "handler panicked"
                );
                Ok(error_response(&crate::error::KernelError::internal("handler panicked")))
            }
        }
    }
}

/// Caches successful GET responses for a fixed TTL.
///
/// The key is the path, the sorted query string and the method, so
/// `/users?limit=1` and `/users?limit=50` are cached separately.
#[derive(Clone)]
pub struct CacheInterceptor {
    cache: Arc<TtlCache<String, Response>>,
}

impl CacheInterceptor {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(TtlCache::new(ttl)),
        }
    }

    pub fn cache(&self) -> &TtlCache<String, Response> {
        &self.cache
    }
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    async fn intercept(&self, req: Request, next: Next) -> HandlerResult {
        if req.method() != Method::Get {
            return next.run(req).await;
        }

        let key = cache_key(&req);
        if let Some(hit) = self.cache.get(&key) {
            tracing::trace!(%key, "cache hit");
            return Ok(hit.with_header("x-cache", "HIT"));
        }

        let response = next.run(req).await?;
        if response.is_success() {
            self.cache.set(key, response.clone());
        }
        Ok(response)
    }
}

fn cache_key(req: &Request) -> String {
    let query = req
        .query_pairs()
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}:{}", req.path(), query, req.method())
}
