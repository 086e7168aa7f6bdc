//! `sato-core`: the framework kernel.
//!
//! Declaration-time registries (modules, controllers, routes), the
//! dependency-injection container, the type adapter registry, and the
//! guard → pipe → interceptor → handler pipeline. Nothing here knows about a
//! concrete HTTP server; see the transport contract in [`transport`].

pub mod adapter;
pub mod cache;
pub mod config;
pub mod container;
pub mod error;
pub mod pipeline;
pub mod plugin;
pub mod registry;
pub mod transport;
pub mod value;

pub use adapter::{AdaptError, AdapterRegistry};
pub use cache::TtlCache;
pub use config::{Config, ConfigError};
pub use container::{Binding, Container, InjectError, Injectable, Provider};
pub use error::{ErrorKind, KernelError, KernelResult, LifecyclePhase};
pub use pipeline::{
    handler, AccessDenied, ArgumentSource, BoundRoute, Guard, Handler, HandlerResult, Interceptor, Next, Pipe,
    PipeBinding, PipeContext,
};
pub use plugin::{Plugin, PluginContext, PluginManager, PluginState};
pub use registry::{ControllerId, ControllerOptions, ModuleOptions, Registry, RouteInfo};
pub use transport::{Body, Method, Request, Response};
pub use value::{TypeKey, Value};
