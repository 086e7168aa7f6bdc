//! Binds compiled routes onto an `axum::Router`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{MethodFilter, MethodRouter};
use axum::{Json, Router};
use serde_json::json;

use sato_core::transport::status;
use sato_core::{Body, BoundRoute, KernelError, KernelResult, Method, Request, Response};

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn method_filter(method: Method) -> MethodFilter {
    match method {
        Method::Get => MethodFilter::GET,
        Method::Post => MethodFilter::POST,
        Method::Put => MethodFilter::PUT,
        Method::Delete => MethodFilter::DELETE,
        Method::Patch => MethodFilter::PATCH,
    }
}

/// `/users/:id` and `/users/:name` collide in the router.
fn route_shape(path: &str) -> String {
    path.split('/')
        .map(|seg| if seg.starts_with(':') { ":" } else { seg })
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the kernel request from the extracted parts.
fn to_request(
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    body: &Bytes,
) -> Result<Request, axum::response::Response> {
    let mut req = Request::new(method, uri.path());
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            req = req.with_header(name.as_str(), value);
        }
    }
    for (name, value) in params {
        req = req.with_param(name, value);
    }
    for (name, value) in query {
        req = req.with_query(name, value);
    }
    if !body.is_empty() {
        let json: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
            json_error(StatusCode::BAD_REQUEST, "invalid_json", format!("request body is not valid JSON: {e}"))
        })?;
        req = req.with_body(json);
    }
    Ok(req)
}

/// Turn a kernel response into an axum response.
pub fn into_axum(response: Response) -> axum::response::Response {
    let (code, headers, body) = response.into_parts();
    let code = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut out = match body {
        Body::Empty => code.into_response(),
        Body::Json(value) => (code, Json(value)).into_response(),
        Body::Text(text) => (code, text).into_response(),
        Body::Bytes(bytes) => (code, bytes).into_response(),
    };
    for (name, value) in headers {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                out.headers_mut().append(name, value);
            }
            _ => tracing::warn!("dropping invalid response header"),
        }
    }
    out
}

/// One axum route per full path, one method handler per bound route.
pub fn bind(routes: Vec<BoundRoute>) -> KernelResult<Router> {
    let mut shapes: HashMap<String, String> = HashMap::new();
    let mut by_path: BTreeMap<String, MethodRouter> = BTreeMap::new();

    for route in routes {
        let path = route.path().to_string();
        let shape = route_shape(&path);
        if let Some(existing) = shapes.get(&shape).filter(|existing| **existing != path) {
            return Err(KernelError::duplicate(
                "route",
                format!("{path} (conflicts with {existing})"),
            ));
        }
        shapes.insert(shape, path.clone());

        let method = route.method();
        tracing::debug!(%method, path = %path, handler = route.handler_name(), "route bound");

        let route = Arc::new(route);
        let endpoint = move |uri: Uri,
                             headers: HeaderMap,
                             params: Option<Path<HashMap<String, String>>>,
                             Query(query): Query<HashMap<String, String>>,
                             body: Bytes| {
            let route = route.clone();
            async move {
                let params = params.map(|Path(p)| p).unwrap_or_default();
                match to_request(method, &uri, &headers, params, query, &body) {
                    Ok(req) => into_axum(route.dispatch(req).await),
                    Err(rejection) => rejection,
                }
            }
        };

        let method_router = by_path.remove(&path).unwrap_or_else(MethodRouter::new);
        by_path.insert(path, method_router.on(method_filter(method), endpoint));
    }

    let router = by_path
        .into_iter()
        .fold(Router::new(), |router, (path, methods)| router.route(&path, methods))
        .fallback(|| async {
            into_axum(Response::error(status::NOT_FOUND, "not_found", "no route matches this request"))
        });
    Ok(router)
}
