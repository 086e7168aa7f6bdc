//! Demo application: a small users API.
//!
//! - `GET    /users?limit=n`  public, `limit` defaults to 20, must be 1..=100
//! - `GET    /users/:id`      public
//! - `POST   /users`          bearer token with role `admin`
//! - `DELETE /users/:id`      bearer token with permission `users.delete`
//! - `GET    /audit`          contributed by [`AuditPlugin`]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::json;

use sato_auth::{JwtValidator, TokenValidator};
use sato_core::pipeline::pipes::{DefaultPipe, JsonPipe, ParseIntPipe, RangePipe};
use sato_core::transport::status;
use sato_core::{
    Binding, Config, ControllerOptions, Guard, HandlerResult, Injectable, KernelError, KernelResult, ModuleOptions,
    PipeBinding, Plugin, PluginContext, Provider, Request, Response,
};
use sato_events::{Event, EventBus, EventEnvelope};

use crate::app::App;
use crate::guards::{BearerGuard, PermissionsGuard, RolesGuard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Default)]
pub struct UserStore {
    users: RwLock<BTreeMap<i64, User>>,
    next_id: AtomicI64,
}

impl UserStore {
    pub fn list(&self, limit: usize) -> Vec<User> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: i64) -> Option<User> {
        self.users.read().unwrap_or_else(PoisonError::into_inner).get(&id).cloned()
    }

    pub fn insert(&self, name: String, email: String) -> User {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let user = User { id, name, email };
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, user.clone());
        user
    }

    pub fn remove(&self, id: i64) -> Option<User> {
        self.users.write().unwrap_or_else(PoisonError::into_inner).remove(&id)
    }
}

#[derive(Default)]
pub struct UsersController {
    store: Option<Arc<UserStore>>,
    events: Option<Arc<EventBus>>,
}

impl Injectable for UsersController {
    fn bindings() -> Vec<Binding<Self>> {
        sato_core::bindings![
            store: UserStore => "users.store",
            events: EventBus => "events",
        ]
    }
}

impl UsersController {
    fn store(&self) -> KernelResult<&UserStore> {
        self.store
            .as_deref()
            .ok_or_else(|| KernelError::internal("users.store was not injected"))
    }

    async fn list(&self, req: Request) -> HandlerResult {
        let limit = *req.arg::<i64>("limit")?;
        let users = self.store()?.list(usize::try_from(limit).unwrap_or(0));
        Ok(Response::ok(json!({ "users": users })))
    }

    async fn find_one(&self, req: Request) -> HandlerResult {
        let id = *req.arg::<i64>("id")?;
        let user = self
            .store()?
            .get(id)
            .ok_or_else(|| KernelError::not_found("user", id.to_string()))?;
        Ok(Response::ok(json!(user)))
    }

    async fn create(&self, req: Request) -> HandlerResult {
        let dto = req.arg::<CreateUser>("body")?;
        if dto.name.trim().is_empty() {
            return Err(KernelError::validation("name must not be empty"));
        }
        if !dto.email.contains('@') {
            return Err(KernelError::validation("email must contain '@'"));
        }

        let user = self.store()?.insert(dto.name.trim().to_string(), dto.email.clone());
        if let Some(events) = &self.events {
            events
                .publish(&EventEnvelope::new("user.created", json!(user)))
                .map_err(KernelError::internal)?;
        }
        Ok(Response::json(status::CREATED, json!(user)))
    }

    async fn remove(&self, req: Request) -> HandlerResult {
        let id = *req.arg::<i64>("id")?;
        self.store()?
            .remove(id)
            .ok_or_else(|| KernelError::not_found("user", id.to_string()))?;
        Ok(Response::no_content())
    }
}

/// Counts `user.created` events and serves the count at `/audit`.
#[derive(Debug, Default)]
pub struct AuditPlugin {
    seen: Arc<AtomicUsize>,
}

impl AuditPlugin {
    pub fn seen(&self) -> usize {
        self.seen.load(Ordering::SeqCst)
    }
}

struct AuditController {
    seen: Arc<AtomicUsize>,
}

impl Plugin for AuditPlugin {
    fn name(&self) -> &str {
        "audit"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn register(&self, cx: &mut PluginContext<'_>) -> anyhow::Result<()> {
        let events = cx.container.resolve::<EventBus>("events")?;
        let seen = self.seen.clone();
        events.subscribe("user.created", move |event: &dyn Event| {
            seen.fetch_add(1, Ordering::SeqCst);
            tracing::info!(event = event.name(), payload = %event.payload(), "audit");
            Ok(())
        })?;

        cx.registry.declare_controller(
            ControllerOptions::new(Arc::new(AuditController {
                seen: self.seen.clone(),
            }))
            .path("/audit")
            .get("/", "summary", |ctl, _req| async move {
                Ok(Response::ok(json!({ "user.created": ctl.seen.load(Ordering::SeqCst) })))
            }),
        )?;
        Ok(())
    }

    fn start(&self) -> anyhow::Result<()> {
        tracing::info!(plugin = self.name(), "audit trail active");
        Ok(())
    }
}

/// Wire the demo onto a fresh [`App`].
pub fn build_demo(config: Config) -> anyhow::Result<App> {
    let validator: Arc<dyn TokenValidator> = Arc::new(JwtValidator::new(&config.auth.secret));
    let mut app = App::new(config)?;

    app.declare_module(
        ModuleOptions::new("storage")
            .provider(Provider::new("users.store", Arc::new(UserStore::default())))
            .export("users.store"),
    )?;

    let mut controller = UsersController::default();
    app.container().inject(&mut controller)?;

    let users = app.declare_controller(
        ControllerOptions::new(Arc::new(controller))
            .path("/users")
            .get("/", "list", |ctl, req| async move { ctl.list(req).await })
            .get("/:id", "find_one", |ctl, req| async move { ctl.find_one(req).await })
            .post("/", "create", |ctl, req| async move { ctl.create(req).await })
            .delete("/:id", "remove", |ctl, req| async move { ctl.remove(req).await }),
    )?;
    app.declare_module(ModuleOptions::new("users").import("storage").controller(users))?;

    let bearer: Arc<dyn Guard> = Arc::new(BearerGuard::new(validator));
    let registry = app.registry_mut();
    registry.attach_pipes(
        users,
        "list",
        vec![
            PipeBinding::query("limit", DefaultPipe::new("20".to_string())),
            PipeBinding::query("limit", ParseIntPipe),
            PipeBinding::query("limit", RangePipe::new(1.0, 100.0)),
        ],
    )?;
    registry.attach_pipes(users, "find_one", vec![PipeBinding::param("id", ParseIntPipe)])?;
    registry.attach_guards(users, "create", vec![bearer.clone(), Arc::new(RolesGuard::new(["admin"]))])?;
    registry.attach_pipes(users, "create", vec![PipeBinding::body(JsonPipe::<CreateUser>::new())])?;
    registry.attach_guards(
        users,
        "remove",
        vec![bearer, Arc::new(PermissionsGuard::new(["users.delete"]))],
    )?;
    registry.attach_pipes(users, "remove", vec![PipeBinding::param("id", ParseIntPipe)])?;

    app.register_plugin(Arc::new(AuditPlugin::default()))?;
    Ok(app)
}
