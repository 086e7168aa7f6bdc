//! Application bootstrap.
//!
//! ```text
//! App::new(config)          container gets "config" and "events"
//!   declare modules/controllers, attach guards/pipes/interceptors
//!   register plugins
//! App::build()              plugins register → module providers → plugins start
//!                           → compile → bind → /health, /routes
//! Server::serve(listener)   until ctrl-c, then plugins stop
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use sato_core::pipeline::CacheInterceptor;
use sato_core::{
    AdapterRegistry, Config, Container, ControllerId, ControllerOptions, Interceptor, KernelError, KernelResult,
    Method, ModuleOptions, Plugin, PluginContext, PluginManager, Registry,
};
use sato_events::EventBus;

use crate::interceptors::LoggingInterceptor;
use crate::router;

/// Served by every [`Server`]; controllers may not declare GET on these.
pub const BUILTIN_PATHS: [&str; 2] = ["/health", "/routes"];

pub struct App {
    config: Config,
    registry: Registry,
    container: Arc<Container>,
    adapters: Arc<AdapterRegistry>,
    plugins: PluginManager,
    events: Arc<EventBus>,
    /// Modules whose providers are already in the container.
    provided: usize,
}

impl App {
    pub fn new(config: Config) -> KernelResult<Self> {
        let container = Arc::new(Container::new());
        let events = Arc::new(EventBus::new());
        container.register("config", Arc::new(config.clone()))?;
        container.register("events", events.clone())?;

        let mut registry = Registry::new();
        registry.use_interceptor(Arc::new(LoggingInterceptor), None);
        if config.cache.enabled {
            registry.use_interceptor(
                Arc::new(CacheInterceptor::new(Duration::from_secs(config.cache.ttl_secs))),
                None,
            );
        }

        Ok(Self {
            config,
            registry,
            container,
            adapters: Arc::new(AdapterRegistry::new()),
            plugins: PluginManager::new(),
            events,
            provided: 0,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn adapters(&self) -> &Arc<AdapterRegistry> {
        &self.adapters
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Direct access for `attach_*` calls.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Declare a module and put its providers in the container.
    pub fn declare_module(&mut self, options: ModuleOptions) -> KernelResult<()> {
        self.registry.declare_module(options)?;
        self.register_module_providers()
    }

    pub fn declare_controller<C: Send + Sync + 'static>(
        &mut self,
        options: ControllerOptions<C>,
    ) -> KernelResult<ControllerId> {
        self.registry.declare_controller(options)
    }

    pub fn use_interceptor(&mut self, interceptor: Arc<dyn Interceptor>, scope: Option<&str>) {
        self.registry.use_interceptor(interceptor, scope);
    }

    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) -> KernelResult<()> {
        self.plugins.register_plugin(plugin)
    }

    /// Freeze the declarations and produce a servable router.
    pub fn build(mut self) -> KernelResult<Server> {
        self.plugins.initialize_all(&mut PluginContext {
            registry: &mut self.registry,
            container: &self.container,
            adapters: &self.adapters,
        })?;
        self.register_module_providers()?;
        if let Some(taken) = self
            .registry
            .routes()
            .into_iter()
            .find(|r| r.method == Method::Get && BUILTIN_PATHS.contains(&r.path.as_str()))
        {
            return Err(KernelError::duplicate(
                "route",
                format!("GET {} (reserved by the server, claimed by {})", taken.path, taken.controller),
            ));
        }
        self.plugins.start_all()?;

        let registry = Arc::new(self.registry);
        let routes = registry.routes();
        let bound = registry.compile(self.adapters.clone())?;
        let mut app_router = router::bind(bound)?;

        for route in &routes {
            tracing::info!(
                method = %route.method,
                path = %route.path,
                handler = %route.handler,
                controller = %route.controller,
                "route"
            );
        }

        let name = self.config.app.name.clone();
        app_router = app_router
            .route(
                "/health",
                get(move || {
                    let name = name.clone();
                    async move { Json(json!({ "status": "ok", "name": name })) }
                }),
            )
            .route("/routes", get(move || {
                let routes = routes.clone();
                async move { Json(routes) }
            }));

        tracing::info!(
            app = %self.config.app.name,
            env = %self.config.app.env,
            modules = registry.list_modules().len(),
            controllers = registry.list_controllers().len(),
            "application built"
        );

        Ok(Server {
            router: app_router,
            registry,
            container: self.container,
            plugins: self.plugins,
            events: self.events,
            config: self.config,
        })
    }

    fn register_module_providers(&mut self) -> KernelResult<()> {
        let modules = self.registry.list_modules();
        for module in &modules[self.provided..] {
            for provider in module.providers() {
                self.container.register_provider(provider.clone())?;
            }
        }
        self.provided = modules.len();
        Ok(())
    }
}

/// A built application: frozen registry, bound router, started plugins.
pub struct Server {
    router: Router,
    registry: Arc<Registry>,
    container: Arc<Container>,
    plugins: PluginManager,
    events: Arc<EventBus>,
    config: Config,
}

impl Server {
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// Bind `0.0.0.0:<app.port>` and serve until ctrl-c.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.app.port)).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves, then stop plugins.
    pub async fn serve<F>(mut self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(addr = %listener.local_addr()?, "listening");
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(shutdown)
            .await?;
        tracing::info!("shutting down");
        self.plugins.stop_all()?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
