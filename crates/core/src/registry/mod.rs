//! Declaration-time metadata: modules, controllers, routes and their
//! guards, pipes and interceptors.
//!
//! The registry is filled through `&mut` during bootstrap. Once the
//! application moves it behind an `Arc` it is read-only; [`Registry::compile`]
//! turns it into the [`BoundRoute`]s served per request.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::adapter::AdapterRegistry;
use crate::error::{KernelError, KernelResult};
use crate::pipeline::{BoundRoute, Guard, Interceptor, PipeBinding};
use crate::transport::Method;

mod controller;
mod module;

pub use controller::{Controller, ControllerId, ControllerOptions, Route, RouteInfo};
pub use module::{Module, ModuleOptions};

use controller::join_paths;

struct GlobalInterceptor {
    scope: Option<String>,
    interceptor: Arc<dyn Interceptor>,
}

impl GlobalInterceptor {
    fn applies_to(&self, path: &str) -> bool {
        match &self.scope {
            None => true,
            Some(scope) => {
                let scope = scope.trim_end_matches('/');
                path == scope
                    || scope.is_empty()
                    || path
                        .strip_prefix(scope)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

pub struct Registry {
    id: u64,
    modules: Vec<Module>,
    controllers: Vec<Controller>,
    interceptors: Vec<GlobalInterceptor>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            modules: Vec::new(),
            controllers: Vec::new(),
            interceptors: Vec::new(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_controller<C: Send + Sync + 'static>(
        &mut self,
        options: ControllerOptions<C>,
    ) -> KernelResult<ControllerId> {
        let id = ControllerId {
            registry: self.id,
            index: self.controllers.len(),
        };
        let controller = options.into_controller(id);

        if !controller.path.starts_with('/') {
            return Err(KernelError::validation(format!(
                "controller path must start with '/': {}",
                controller.path
            )));
        }

        let mut taken: HashSet<(Method, String)> = self
            .controllers
            .iter()
            .flat_map(|c| c.routes.iter().map(|r| (r.method, join_paths(&c.path, &r.path))))
            .collect();
        for route in &controller.routes {
            let full = join_paths(&controller.path, &route.path);
            if !taken.insert((route.method, full.clone())) {
                return Err(KernelError::duplicate("route", format!("{} {full}", route.method)));
            }
        }

        tracing::debug!(
            controller = controller.type_name,
            path = %controller.path,
            routes = controller.routes.len(),
            "controller declared"
        );
        self.controllers.push(controller);
        Ok(id)
    }

    pub fn declare_module(&mut self, options: ModuleOptions) -> KernelResult<()> {
        if self.find_module(&options.name).is_some() {
            return Err(KernelError::duplicate("module", options.name));
        }

        let mut imported = Vec::with_capacity(options.imports.len());
        for import in &options.imports {
            let module = self
                .find_module(import)
                .ok_or_else(|| KernelError::validation(format!("invalid import: {import}")))?;
            imported.push(module);
        }

        if let Some(id) = options.controllers.iter().find(|id| self.controller(**id).is_none()) {
            return Err(KernelError::validation(format!(
                "controller must be a declared handle: {id:?}"
            )));
        }

        if options.providers.iter().any(|p| p.name().is_empty()) {
            return Err(KernelError::validation("provider must be a named handle"));
        }

        for export in &options.exports {
            let owned = options.providers.iter().any(|p| p.name() == export);
            let reexported = imported.iter().any(|m| m.exports_provider(export));
            if !owned && !reexported {
                return Err(KernelError::validation(format!(
                    "module `{}` exports unknown provider: {export}",
                    options.name
                )));
            }
        }

        tracing::debug!(
            module = %options.name,
            imports = options.imports.len(),
            controllers = options.controllers.len(),
            providers = options.providers.len(),
            "module declared"
        );
        self.modules.push(options.into());
        Ok(())
    }

    pub fn attach_guards(
        &mut self,
        controller: ControllerId,
        handler_name: &str,
        guards: Vec<Arc<dyn Guard>>,
    ) -> KernelResult<()> {
        self.route_mut(controller, handler_name)?.guards.extend(guards);
        Ok(())
    }

    pub fn attach_pipes(
        &mut self,
        controller: ControllerId,
        handler_name: &str,
        pipes: Vec<PipeBinding>,
    ) -> KernelResult<()> {
        self.route_mut(controller, handler_name)?.pipes.extend(pipes);
        Ok(())
    }

    pub fn attach_interceptors(
        &mut self,
        controller: ControllerId,
        handler_name: &str,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> KernelResult<()> {
        self.route_mut(controller, handler_name)?.interceptors.extend(interceptors);
        Ok(())
    }

    /// Register an interceptor for every route, or only for routes under
    /// `scope` when given.
    pub fn use_interceptor(&mut self, interceptor: Arc<dyn Interceptor>, scope: Option<&str>) {
        self.interceptors.push(GlobalInterceptor {
            scope: scope.map(str::to_string),
            interceptor,
        });
    }

    pub fn list_controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn list_modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn controller(&self, id: ControllerId) -> Option<&Controller> {
        if id.registry != self.id {
            return None;
        }
        self.controllers.get(id.index)
    }

    pub fn find_module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Find the route serving a concrete request path (`:name` segments
    /// match any value).
    pub fn find_route(&self, method: Method, path: &str) -> Option<RouteInfo> {
        self.controllers.iter().find_map(|c| {
            c.routes
                .iter()
                .find(|r| r.method == method && path_matches(&join_paths(&c.path, &r.path), path))
                .map(|r| self.route_info(c, r))
        })
    }

    /// The route table, in declaration order.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.controllers
            .iter()
            .flat_map(|c| c.routes.iter().map(move |r| (c, r)))
            .map(|(c, r)| self.route_info(c, r))
            .collect()
    }

    /// Resolve every route's full pipeline.
    pub fn compile(&self, adapters: Arc<AdapterRegistry>) -> KernelResult<Vec<BoundRoute>> {
        let mut bound = Vec::new();
        for controller in &self.controllers {
            for route in &controller.routes {
                let full = join_paths(&controller.path, &route.path);

                let guards: Vec<Arc<dyn Guard>> =
                    controller.guards.iter().chain(&route.guards).cloned().collect();

                let interceptors: Vec<Arc<dyn Interceptor>> = self
                    .interceptors
                    .iter()
                    .filter(|g| g.applies_to(&full))
                    .map(|g| g.interceptor.clone())
                    .chain(controller.interceptors.iter().cloned())
                    .chain(route.interceptors.iter().cloned())
                    .collect();

                tracing::debug!(
                    method = %route.method,
                    path = %full,
                    handler = %route.handler_name,
                    guards = guards.len(),
                    pipes = route.pipes.len(),
                    interceptors = interceptors.len(),
                    "route compiled"
                );

                bound.push(BoundRoute::new(
                    route.method,
                    full,
                    route.handler_name.clone(),
                    guards,
                    route.pipes.clone(),
                    interceptors,
                    route.handler.clone(),
                    adapters.clone(),
                ));
            }
        }
        Ok(bound)
    }

    fn route_mut(&mut self, controller: ControllerId, handler_name: &str) -> KernelResult<&mut Route> {
        let controller = self
            .controllers
            .get_mut(controller.index)
            .filter(|_| controller.registry == self.id)
            .ok_or_else(|| KernelError::not_found("controller", format!("{controller:?}")))?;
        let type_name = controller.type_name;
        controller
            .route_mut(handler_name)
            .ok_or_else(|| KernelError::not_found("route", format!("{type_name}::{handler_name}")))
    }

    fn route_info(&self, controller: &Controller, route: &Route) -> RouteInfo {
        let path = join_paths(&controller.path, &route.path);
        let global = self.interceptors.iter().filter(|g| g.applies_to(&path)).count();
        RouteInfo {
            method: route.method,
            handler: route.handler_name.clone(),
            controller: controller.type_name.to_string(),
            guards: controller.guards.len() + route.guards.len(),
            pipes: route.pipes.len(),
            interceptors: global + controller.interceptors.len() + route.interceptors.len(),
            path,
        }
    }
}

fn path_matches(template: &str, path: &str) -> bool {
    let mut template = template.split('/').filter(|s| !s.is_empty());
    let mut path = path.split('/').filter(|s| !s.is_empty());
    loop {
        match (template.next(), path.next()) {
            (None, None) => return true,
            (Some(t), Some(p)) if t.starts_with(':') || t == p => continue,
            _ => return false,
        }
    }
}
