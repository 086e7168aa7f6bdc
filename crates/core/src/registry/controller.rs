use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use crate::pipeline::{handler, Guard, Handler, HandlerResult, Interceptor, PipeBinding};
use crate::transport::{Method, Request};

/// Handle issued by [`super::Registry::declare_controller`].
///
/// Carries the issuing registry's identity, so a handle from another
/// registry never resolves here even when its index is in range.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ControllerId {
    pub(super) registry: u64,
    pub(super) index: usize,
}

/// Declaration of a controller and its routes.
///
/// ```ignore
/// let users = registry.declare_controller(
///     ControllerOptions::new(Arc::new(UsersController::default()))
///         .path("/users")
///         .get("/:id", "find_one", |ctl, req| async move { ctl.find_one(req).await }),
/// )?;
/// ```
pub struct ControllerOptions<C> {
    instance: Arc<C>,
    path: Option<String>,
    guards: Vec<Arc<dyn Guard>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    routes: Vec<Route>,
}

impl<C: Send + Sync + 'static> ControllerOptions<C> {
    pub fn new(instance: Arc<C>) -> Self {
        Self {
            instance,
            path: None,
            guards: Vec::new(),
            interceptors: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn guard(mut self, guard: impl Guard + 'static) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    pub fn interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Declare a route. `f` receives the controller instance captured here.
    pub fn route<F, Fut>(mut self, method: Method, path: &str, handler_name: &str, f: F) -> Self
    where
        F: Fn(Arc<C>, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let instance = self.instance.clone();
        let handler = handler(move |req| f(instance.clone(), req));
        self.routes.push(Route::new(method, path, handler_name, handler));
        self
    }

    pub fn get<F, Fut>(self, path: &str, handler_name: &str, f: F) -> Self
    where
        F: Fn(Arc<C>, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Get, path, handler_name, f)
    }

    pub fn post<F, Fut>(self, path: &str, handler_name: &str, f: F) -> Self
    where
        F: Fn(Arc<C>, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Post, path, handler_name, f)
    }

    pub fn put<F, Fut>(self, path: &str, handler_name: &str, f: F) -> Self
    where
        F: Fn(Arc<C>, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Put, path, handler_name, f)
    }

    pub fn delete<F, Fut>(self, path: &str, handler_name: &str, f: F) -> Self
    where
        F: Fn(Arc<C>, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Delete, path, handler_name, f)
    }

    pub fn patch<F, Fut>(self, path: &str, handler_name: &str, f: F) -> Self
    where
        F: Fn(Arc<C>, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Patch, path, handler_name, f)
    }

    pub(super) fn into_controller(self, id: ControllerId) -> Controller {
        let type_name = std::any::type_name::<C>();
        let path = match self.path {
            Some(path) if !path.is_empty() => path,
            _ => default_path(type_name),
        };
        Controller {
            id,
            type_name,
            path,
            guards: self.guards,
            interceptors: self.interceptors,
            routes: self.routes,
        }
    }
}

/// `/` + the lower-cased type name without module path or generics.
pub(super) fn default_path(type_name: &str) -> String {
    let bare = type_name.split('<').next().unwrap_or(type_name);
    let last = bare.rsplit("::").next().unwrap_or(bare);
    format!("/{}", last.to_lowercase())
}

/// Join a controller prefix and a route path into the full route path.
pub(super) fn join_paths(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{path}"),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{path}"),
    }
}

/// A declared controller.
pub struct Controller {
    pub(super) id: ControllerId,
    pub(super) type_name: &'static str,
    pub(super) path: String,
    pub(super) guards: Vec<Arc<dyn Guard>>,
    pub(super) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(super) routes: Vec<Route>,
}

impl Controller {
    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn guard_count(&self) -> usize {
        self.guards.len()
    }

    pub(super) fn route_mut(&mut self, handler_name: &str) -> Option<&mut Route> {
        self.routes.iter_mut().find(|r| r.handler_name == handler_name)
    }
}

impl core::fmt::Debug for Controller {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Controller")
            .field("id", &self.id)
            .field("type", &self.type_name)
            .field("path", &self.path)
            .field("routes", &self.routes)
            .finish()
    }
}

/// A declared route.
pub struct Route {
    pub(super) method: Method,
    pub(super) path: String,
    pub(super) handler_name: String,
    pub(super) handler: Handler,
    pub(super) guards: Vec<Arc<dyn Guard>>,
    pub(super) pipes: Vec<PipeBinding>,
    pub(super) interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Route {
    fn new(method: Method, path: &str, handler_name: &str, handler: Handler) -> Self {
        Self {
            method,
            path: path.to_string(),
            handler_name: handler_name.to_string(),
            handler,
            guards: Vec::new(),
            pipes: Vec::new(),
            interceptors: Vec::new(),
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

    pub fn pipes(&self) -> &[PipeBinding] {
        &self.pipes
    }
}

impl core::fmt::Debug for Route {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handler", &self.handler_name)
            .finish()
    }
}

/// One row of the route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub method: Method,
    pub path: String,
    pub handler: String,
    pub controller: String,
    pub guards: usize,
    pub pipes: usize,
    pub interceptors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UsersController;

    #[test]
    fn default_path_is_the_lowercased_type_name() {
        assert_eq!(default_path("app::http::UsersController"), "/userscontroller");
        assert_eq!(default_path("Wrapper<app::Inner>"), "/wrapper");
        assert_eq!(
            default_path(std::any::type_name::<UsersController>()),
            "/userscontroller"
        );
    }

    #[test]
    fn paths_join_without_doubled_slashes() {
        assert_eq!(join_paths("/users", "/:id"), "/users/:id");
        assert_eq!(join_paths("/users/", ":id"), "/users/:id");
        assert_eq!(join_paths("/users", ""), "/users");
        assert_eq!(join_paths("/users", "/"), "/users");
        assert_eq!(join_paths("/", "/health"), "/health");
        assert_eq!(join_paths("/", "/"), "/");
    }
}
