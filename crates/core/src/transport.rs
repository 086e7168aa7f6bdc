//! Transport contract: the narrow request/response surface the kernel needs.
//!
//! The HTTP server converts its own request type into a [`Request`] and turns a
//! [`Response`] back into a wire response. Nothing in the kernel depends on a
//! particular server.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{KernelError, KernelResult};
use crate::value::Value;

/// Response status codes used by the kernel.
pub mod status {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const NO_CONTENT: u16 = 204;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const CONFLICT: u16 = 409;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    pub const ALL: [Method; 5] = [Method::Get, Method::Post, Method::Put, Method::Delete, Method::Patch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }
}

impl core::fmt::Display for Method {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| KernelError::validation(format!("unsupported method: {s}")))
    }
}

/// Per-request typed storage (guards put the authenticated principal here).
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|prev| prev.downcast::<T>().ok().map(|b| *b))
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.map.get(&TypeId::of::<T>()).and_then(|b| b.downcast_ref::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast::<T>().ok().map(|b| *b))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl core::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Extensions").field("len", &self.map.len()).finish()
    }
}

/// An inbound request as seen by guards, pipes, interceptors and handlers.
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    headers: HashMap<String, String>,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Option<serde_json::Value>,
    args: HashMap<String, Value>,
    extensions: Extensions,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            params: HashMap::new(),
            query: HashMap::new(),
            body: None,
            args: HashMap::new(),
            extensions: Extensions::default(),
        }
    }

    /// Header names are stored lower-cased; lookups are case-insensitive.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Query pairs sorted by name.
    pub fn query_pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        pairs.sort_unstable();
        pairs
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    /// Decode the JSON body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> KernelResult<T> {
        let body = self
            .body
            .as_ref()
            .ok_or_else(|| KernelError::validation("request body is empty"))?;
        serde_json::from_value(body.clone())
            .map_err(|e| KernelError::validation(format!("invalid request body: {e}")))
    }

    /// A value produced by the route's pipes.
    pub fn arg<T: std::any::Any>(&self, name: &str) -> KernelResult<&T> {
        let value = self
            .args
            .get(name)
            .ok_or_else(|| KernelError::validation(format!("missing argument `{name}`")))?;
        value.downcast_ref::<T>().ok_or_else(|| {
            KernelError::internal(format!(
                "argument `{name}` is {}, not {}",
                value.type_key(),
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn set_arg(&mut self, name: impl Into<String>, value: Value) {
        self.args.insert(name.into(), value);
    }

    pub fn take_arg(&mut self, name: &str) -> Option<Value> {
        self.args.remove(name)
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(serde_json::Value),
    Text(String),
    Bytes(Vec<u8>),
}

/// An outbound response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Body,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn ok(body: serde_json::Value) -> Self {
        Self::json(status::OK, body)
    }

    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Json(body),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Text(body.into()),
        }
    }

    pub fn bytes(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Bytes(body),
        }
    }

    pub fn no_content() -> Self {
        Self::new(status::NO_CONTENT)
    }

    /// Error payload shape shared by every kernel-generated failure.
    pub fn error(status: u16, code: &str, message: impl Into<String>) -> Self {
        Self::json(
            status,
            json!({
                "error": code,
                "message": message.into(),
            }),
        )
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_parts(self) -> (u16, Vec<(String, String)>, Body) {
        (self.status, self.headers, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive() {
        let req = Request::new(Method::Get, "/").with_header("Authorization", "Bearer x");
        assert_eq!(req.header("authorization"), Some("Bearer x"));
        assert_eq!(req.header("AUTHORIZATION"), Some("Bearer x"));
    }

    #[test]
    fn json_body_decodes_into_target_shape() {
        #[derive(Deserialize)]
        struct Login {
            user: String,
        }
        let req = Request::new(Method::Post, "/login").with_body(json!({"user": "ada"}));
        assert_eq!(req.json::<Login>().unwrap().user, "ada");
        assert!(Request::new(Method::Post, "/").json::<Login>().is_err());
    }

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
        assert!("TRACE".parse::<Method>().is_err());
    }

    #[test]
    fn extensions_are_keyed_by_type() {
        let mut ext = Extensions::default();
        assert!(ext.insert(5u32).is_none());
        assert_eq!(ext.insert(6u32), Some(5));
        assert_eq!(ext.get::<u32>(), Some(&6));
        assert!(ext.get::<u64>().is_none());
        assert_eq!(ext.remove::<u32>(), Some(6));
        assert!(ext.is_empty());
    }

    #[test]
    fn args_report_missing_and_mistyped_values() {
        let mut req = Request::new(Method::Get, "/users/7");
        assert!(req.arg::<i64>("id").is_err());
        req.set_arg("id", Value::from(7i64));
        assert_eq!(*req.arg::<i64>("id").unwrap(), 7);
        assert!(req.arg::<String>("id").is_err());
    }
}
