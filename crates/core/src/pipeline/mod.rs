//! Per-route execution pipeline.
//!
//! ```text
//! Request
//!   ↓
//! 1. Guards        controller-level, then route-level; first rejection → 401
//!   ↓
//! 2. Pipes         declaration order, one argument each; first failure → 400
//!   ↓
//! 3. Interceptors  ErrorInterceptor (always outermost), global, controller, route
//!   ↓
//! 4. Handler       captured at declaration time
//! ```
//!
//! A [`BoundRoute`] is the fully resolved chain for one route. It is built once
//! when the registry is compiled and then shared by every request.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::adapter::AdapterRegistry;
use crate::error::{ErrorKind, KernelError};
use crate::transport::{status, Method, Request, Response};
use crate::value::Value;

pub mod interceptors;
pub mod pipes;

pub use interceptors::{CacheInterceptor, ErrorInterceptor};

/// Result of a handler or interceptor.
pub type HandlerResult = Result<Response, KernelError>;

/// A route handler with its controller already captured.
pub type Handler = Arc<dyn Fn(Request) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Wrap an async function as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

/// Reason a guard gave for rejecting a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct AccessDenied {
    reason: String,
}

impl AccessDenied {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<AccessDenied> for KernelError {
    fn from(value: AccessDenied) -> Self {
        KernelError::AccessDenied(value.reason)
    }
}

/// Decides whether a request may proceed.
///
/// Guards may stash data for later stages in [`Request::extensions_mut`].
pub trait Guard: Send + Sync {
    fn can_activate(&self, req: &mut Request) -> Result<(), AccessDenied>;
}

impl<F> Guard for F
where
    F: Fn(&mut Request) -> Result<(), AccessDenied> + Send + Sync,
{
    fn can_activate(&self, req: &mut Request) -> Result<(), AccessDenied> {
        self(req)
    }
}

/// What a pipe gets besides the value itself.
pub struct PipeContext<'a> {
    adapters: &'a AdapterRegistry,
    argument: &'a str,
}

impl<'a> PipeContext<'a> {
    pub fn new(adapters: &'a AdapterRegistry, argument: &'a str) -> Self {
        Self { adapters, argument }
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        self.adapters
    }

    /// Name of the argument being transformed (`"body"` for the payload).
    pub fn argument(&self) -> &str {
        self.argument
    }
}

/// Transforms or validates one argument.
pub trait Pipe: Send + Sync {
    fn transform(&self, value: Value, cx: &PipeContext<'_>) -> Result<Value, KernelError>;
}

/// Where a pipe reads its input from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentSource {
    Param(String),
    Query(String),
    Body,
}

impl ArgumentSource {
    pub fn name(&self) -> &str {
        match self {
            ArgumentSource::Param(name) | ArgumentSource::Query(name) => name,
            ArgumentSource::Body => "body",
        }
    }

    fn read(&self, req: &Request) -> Value {
        let raw = match self {
            ArgumentSource::Param(name) => req.param(name).map(Value::from),
            ArgumentSource::Query(name) => req.query(name).map(Value::from),
            ArgumentSource::Body => req.body().cloned().map(Value::from),
        };
        raw.unwrap_or_else(Value::null)
    }
}

/// A pipe bound to an argument source.
#[derive(Clone)]
pub struct PipeBinding {
    source: ArgumentSource,
    pipe: Arc<dyn Pipe>,
}

impl PipeBinding {
    pub fn new(source: ArgumentSource, pipe: impl Pipe + 'static) -> Self {
        Self {
            source,
            pipe: Arc::new(pipe),
        }
    }

    pub fn param(name: impl Into<String>, pipe: impl Pipe + 'static) -> Self {
        Self::new(ArgumentSource::Param(name.into()), pipe)
    }

    pub fn query(name: impl Into<String>, pipe: impl Pipe + 'static) -> Self {
        Self::new(ArgumentSource::Query(name.into()), pipe)
    }

    pub fn body(pipe: impl Pipe + 'static) -> Self {
        Self::new(ArgumentSource::Body, pipe)
    }

    pub fn source(&self) -> &ArgumentSource {
        &self.source
    }
}

impl core::fmt::Debug for PipeBinding {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PipeBinding").field("source", &self.source).finish()
    }
}

/// Wraps the downstream call.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, req: Request, next: Next) -> HandlerResult;
}

/// The rest of the interceptor chain, ending in the handler.
pub struct Next {
    chain: Arc<[Arc<dyn Interceptor>]>,
    position: usize,
    handler: Handler,
}

impl Next {
    pub fn new(chain: Arc<[Arc<dyn Interceptor>]>, handler: Handler) -> Self {
        Self {
            chain,
            position: 0,
            handler,
        }
    }

    pub fn run(self, req: Request) -> BoxFuture<'static, HandlerResult> {
        match self.chain.get(self.position).cloned() {
            Some(interceptor) => {
                let next = Next {
                    chain: self.chain,
                    position: self.position + 1,
                    handler: self.handler,
                };
                Box::pin(async move { interceptor.intercept(req, next).await })
            }
            None => (self.handler)(req),
        }
    }
}

/// Map a failure to the response the client sees.
///
/// Server-side failures never leak their detail; callers log it first.
pub fn error_response(err: &KernelError) -> Response {
    match err.kind() {
        ErrorKind::AccessDenied => Response::error(status::UNAUTHORIZED, "unauthorized", err.to_string()),
        ErrorKind::ValidationFailure | ErrorKind::AdaptationFailure => {
            Response::error(status::BAD_REQUEST, "validation_error", err.to_string())
        }
        ErrorKind::NotFound => Response::error(status::NOT_FOUND, "not_found", err.to_string()),
        _ => Response::error(
            status::INTERNAL_SERVER_ERROR,
            "internal_error",
            "internal server error",
        ),
    }
}

/// A route with its whole pipeline resolved.
pub struct BoundRoute {
    method: Method,
    path: String,
    handler_name: String,
    guards: Vec<Arc<dyn Guard>>,
    pipes: Vec<PipeBinding>,
    chain: Arc<[Arc<dyn Interceptor>]>,
    handler: Handler,
    adapters: Arc<AdapterRegistry>,
}

impl BoundRoute {
    /// `interceptors` excludes the error interceptor, which is always added
    /// as the outermost wrapper.
    pub fn new(
        method: Method,
        path: impl Into<String>,
        handler_name: impl Into<String>,
        guards: Vec<Arc<dyn Guard>>,
        pipes: Vec<PipeBinding>,
        interceptors: Vec<Arc<dyn Interceptor>>,
        handler: Handler,
        adapters: Arc<AdapterRegistry>,
    ) -> Self {
        let chain: Vec<Arc<dyn Interceptor>> = std::iter::once(Arc::new(ErrorInterceptor) as Arc<dyn Interceptor>)
            .chain(interceptors)
            .collect();
        Self {
            method,
            path: path.into(),
            handler_name: handler_name.into(),
            guards,
            pipes,
            chain: chain.into(),
            handler,
            adapters,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    /// Run the pipeline. Never fails: every error becomes a response, and a
    /// panic in a guard, pipe, interceptor or handler becomes a 500.
    pub async fn dispatch(&self, req: Request) -> Response {
        match AssertUnwindSafe(self.run(req)).catch_unwind().await {
            Ok(response) => response,
            Err(payload) => {
                tracing::error!(
                    method = %self.method,
                    path = %self.path,
                    panic = interceptors::panic_message(payload.as_ref()),
                    "pipeline panicked"
                );
                error_response(&KernelError::internal("pipeline panicked"))
            }
        }
    }

    async fn run(&self, mut req: Request) -> Response {
        if let Err(denied) = self.run_guards(&mut req) {
            tracing::warn!(
                method = %self.method,
                path = %self.path,
                reason = denied.reason(),
                "request rejected by guard"
            );
            return error_response(&denied.into());
        }

        if let Err(err) = self.run_pipes(&mut req) {
            tracing::debug!(method = %self.method, path = %self.path, error = %err, "pipe rejected argument");
            return error_response(&err);
        }

        match Next::new(self.chain.clone(), self.handler.clone()).run(req).await {
            Ok(response) => response,
            Err(err) => error_response(&err),
        }
    }

    fn run_guards(&self, req: &mut Request) -> Result<(), AccessDenied> {
        self.guards.iter().try_for_each(|guard| guard.can_activate(req))
    }

    fn run_pipes(&self, req: &mut Request) -> Result<(), KernelError> {
        for binding in &self.pipes {
            let name = binding.source.name().to_string();
            let input = match req.take_arg(&name) {
                Some(current) => current,
                None => binding.source.read(req),
            };
            let cx = PipeContext::new(&self.adapters, &name);
            let output = binding.pipe.transform(input, &cx).map_err(|err| match err.kind() {
                ErrorKind::ValidationFailure | ErrorKind::AdaptationFailure => err,
                _ => KernelError::validation(format!("argument `{name}`: {err}")),
            })?;
            req.set_arg(name, output);
        }
        Ok(())
    }
}

impl core::fmt::Debug for BoundRoute {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BoundRoute")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handler", &self.handler_name)
            .field("guards", &self.guards.len())
            .field("pipes", &self.pipes)
            .field("interceptors", &self.chain.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pipes::ParseIntPipe;
    use serde_json::json;
    use std::sync::Mutex;

    type Trace = Arc<Mutex<Vec<String>>>;

    struct Recording {
        label: &'static str,
        trace: Trace,
    }

    impl Guard for Recording {
        fn can_activate(&self, _req: &mut Request) -> Result<(), AccessDenied> {
            self.trace.lock().unwrap().push(format!("guard:{}", self.label));
            Ok(())
        }
    }

    impl Pipe for Recording {
        fn transform(&self, value: Value, _cx: &PipeContext<'_>) -> Result<Value, KernelError> {
            self.trace.lock().unwrap().push(format!("pipe:{}", self.label));
            Ok(value)
        }
    }

    #[async_trait]
    impl Interceptor for Recording {
        async fn intercept(&self, req: Request, next: Next) -> HandlerResult {
            self.trace.lock().unwrap().push(format!("before:{}", self.label));
            let res = next.run(req).await;
            self.trace.lock().unwrap().push(format!("after:{}", self.label));
            res
        }
    }

    fn rec(label: &'static str, trace: &Trace) -> Recording {
        Recording {
            label,
            trace: trace.clone(),
        }
    }

    fn recording_handler(trace: &Trace) -> Handler {
        let trace = trace.clone();
        handler(move |_req| {
            let trace = trace.clone();
            async move {
                trace.lock().unwrap().push("handler".into());
                Ok(Response::ok(json!({"ok": true})))
            }
        })
    }

    fn route(
        guards: Vec<Arc<dyn Guard>>,
        pipes: Vec<PipeBinding>,
        interceptors: Vec<Arc<dyn Interceptor>>,
        handler: Handler,
    ) -> BoundRoute {
        BoundRoute::new(
            Method::Get,
            "/things/:id",
            "find_one",
            guards,
            pipes,
            interceptors,
            handler,
            Arc::new(AdapterRegistry::new()),
        )
    }

    #[tokio::test]
    async fn stages_run_in_fixed_order() {
        let trace: Trace = Arc::default();
        let r = route(
            vec![Arc::new(rec("controller", &trace)), Arc::new(rec("route", &trace))],
            vec![PipeBinding::param("id", rec("id", &trace))],
            vec![Arc::new(rec("outer", &trace)), Arc::new(rec("inner", &trace))],
            recording_handler(&trace),
        );

        let res = r.dispatch(Request::new(Method::Get, "/things/1").with_param("id", "1")).await;
        assert_eq!(res.status(), status::OK);
        assert_eq!(
            *trace.lock().unwrap(),
            vec![
                "guard:controller",
                "guard:route",
                "pipe:id",
                "before:outer",
                "before:inner",
                "handler",
                "after:inner",
                "after:outer",
            ]
        );
    }

    #[tokio::test]
    async fn failing_guard_short_circuits_everything() {
        let trace: Trace = Arc::default();
        let deny: Arc<dyn Guard> =
            Arc::new(|_req: &mut Request| -> Result<(), AccessDenied> { Err(AccessDenied::new("no token")) });
        let r = route(
            vec![deny, Arc::new(rec("route", &trace))],
            vec![PipeBinding::param("id", rec("id", &trace))],
            vec![Arc::new(rec("outer", &trace))],
            recording_handler(&trace),
        );

        let res = r.dispatch(Request::new(Method::Get, "/things/1")).await;
        assert_eq!(res.status(), status::UNAUTHORIZED);
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_pipe_is_a_bad_request_and_skips_the_handler() {
        let trace: Trace = Arc::default();
        let r = route(
            vec![],
            vec![PipeBinding::param("id", ParseIntPipe)],
            vec![Arc::new(rec("outer", &trace))],
            recording_handler(&trace),
        );

        let res = r.dispatch(Request::new(Method::Get, "/things/x").with_param("id", "x")).await;
        assert_eq!(res.status(), status::BAD_REQUEST);
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn piped_arguments_reach_the_handler_typed() {
        let r = route(
            vec![],
            vec![PipeBinding::param("id", ParseIntPipe)],
            vec![],
            handler(|req: Request| async move {
                let id = *req.arg::<i64>("id")?;
                Ok(Response::ok(json!({ "id": id + 1 })))
            }),
        );

        let res = r.dispatch(Request::new(Method::Get, "/things/41").with_param("id", "41")).await;
        assert_eq!(res.body(), &crate::transport::Body::Json(json!({"id": 42})));
    }

    #[tokio::test]
    async fn interceptor_can_short_circuit() {
        struct Block;
        #[async_trait]
        impl Interceptor for Block {
            async fn intercept(&self, _req: Request, _next: Next) -> HandlerResult {
                Ok(Response::text(status::CONFLICT, "blocked"))
            }
        }

        let trace: Trace = Arc::default();
        let r = route(vec![], vec![], vec![Arc::new(Block)], recording_handler(&trace));
        let res = r.dispatch(Request::new(Method::Get, "/things/1")).await;
        assert_eq!(res.status(), status::CONFLICT);
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn handler_errors_are_mapped_by_kind() {
        let cases = [
            (KernelError::access_denied("nope"), status::UNAUTHORIZED),
            (KernelError::validation("bad"), status::BAD_REQUEST),
            (KernelError::not_found("user", "7"), status::NOT_FOUND),
            (KernelError::internal("db down"), status::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let err = Arc::new(Mutex::new(Some(err)));
            let r = route(
                vec![],
                vec![],
                vec![],
                handler(move |_req| {
                    let err = err.clone();
                    async move { Err(err.lock().unwrap().take().unwrap()) }
                }),
            );
            let res = r.dispatch(Request::new(Method::Get, "/")).await;
            assert_eq!(res.status(), expected);
        }
    }

    #[tokio::test]
    async fn panicking_pipe_is_an_internal_error() {
        let trace: Trace = Arc::default();
        let r = route(
            vec![],
            vec![PipeBinding::param(
                "id",
                pipes::CustomPipe::new(|_value: &Value| -> Result<(), String> { panic!("pipe bug") }),
            )],
            vec![Arc::new(rec("outer", &trace))],
            recording_handler(&trace),
        );

        let res = r.dispatch(Request::new(Method::Get, "/things/1").with_param("id", "1")).await;
        assert_eq!(res.status(), status::INTERNAL_SERVER_ERROR);
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn panicking_guard_is_an_internal_error() {
        let trace: Trace = Arc::default();
        let explode: Arc<dyn Guard> =
            Arc::new(|_req: &mut Request| -> Result<(), AccessDenied> { panic!("guard bug") });
        let r = route(vec![explode], vec![], vec![], recording_handler(&trace));

        let res = r.dispatch(Request::new(Method::Get, "/things/1")).await;
        assert_eq!(res.status(), status::INTERNAL_SERVER_ERROR);
        let crate::transport::Body::Json(body) = res.body() else {
            panic!("expected json body");
        };
        assert_eq!(body["error"], "internal_error");
        assert!(!body.to_string().contains("guard bug"));
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_errors_hide_their_detail() {
        let r = route(
            vec![],
            vec![],
            vec![],
            handler(|_req| async { Err(KernelError::internal("password=hunter2")) }),
        );
        let res = r.dispatch(Request::new(Method::Get, "/")).await;
        let crate::transport::Body::Json(body) = res.body() else {
            panic!("expected json body");
        };
        assert!(!body.to_string().contains("hunter2"));
    }
}
