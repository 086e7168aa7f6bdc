use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde_json::json;

use sato_api::App;
use sato_api::demo::build_demo;
use sato_api::guards::HeaderGuard;
use sato_auth::{Claims, JwtValidator};
use sato_core::pipeline::pipes::ParseIntPipe;
use sato_core::{
    AccessDenied, Config, ControllerOptions, ErrorKind, HandlerResult, Interceptor, Next, PipeBinding, Request,
    Response,
};

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(app: App) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let router = app.build().expect("failed to build app").router();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { base_url, handle }
    }

    async fn demo() -> Self {
        Self::spawn(build_demo(config()).unwrap()).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.app.name = "black-box".to_string();
    config.auth.secret = SECRET.to_string();
    config
}

fn mint_jwt(roles: &[&'static str], permissions: &[&'static str]) -> String {
    let mut claims = Claims::new("tester", Utc::now() - ChronoDuration::seconds(1), ChronoDuration::minutes(10));
    for role in roles {
        claims = claims.with_role(*role);
    }
    for permission in permissions {
        claims = claims.with_permission(*permission);
    }
    JwtValidator::new(SECRET).issue(&claims).expect("failed to encode jwt")
}

#[tokio::test]
async fn health_and_route_table_are_served() {
    let srv = TestServer::demo().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "status": "ok", "name": "black-box" }));

    let routes: Vec<serde_json::Value> = client.get(srv.url("/routes")).send().await.unwrap().json().await.unwrap();
    let create = routes
        .iter()
        .find(|r| r["handler"] == "create")
        .expect("create route listed");
    assert_eq!(create["method"], "POST");
    assert_eq!(create["path"], "/users");
    assert_eq!(create["guards"], 2);
    assert!(routes.iter().any(|r| r["path"] == "/audit"));
}

#[tokio::test]
async fn guards_reject_before_anything_else_runs() {
    let srv = TestServer::demo().await;
    let client = reqwest::Client::new();

    // Invalid body too: the guard answers first.
    let res = client
        .post(srv.url("/users"))
        .json(&json!({ "nope": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let viewer = mint_jwt(&["viewer"], &[]);
    let res = client
        .post(srv.url("/users"))
        .bearer_auth(&viewer)
        .json(&json!({ "name": "Ada", "email": "ada@example.org" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(srv.url("/users"))
        .bearer_auth("garbage")
        .json(&json!({ "name": "Ada", "email": "ada@example.org" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn users_lifecycle_create_get_list_delete() {
    let srv = TestServer::demo().await;
    let client = reqwest::Client::new();
    let admin = mint_jwt(&["admin"], &["users.*"]);

    let res = client
        .post(srv.url("/users"))
        .bearer_auth(&admin)
        .json(&json!({ "name": "  Ada ", "email": "ada@example.org" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["name"], "Ada");

    let res = client.get(srv.url(&format!("/users/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    let user: serde_json::Value = res.json().await.unwrap();
    assert_eq!(user["email"], "ada@example.org");

    let list: serde_json::Value = client.get(srv.url("/users")).send().await.unwrap().json().await.unwrap();
    assert_eq!(list["users"].as_array().unwrap().len(), 1);

    let audit: serde_json::Value = client.get(srv.url("/audit")).send().await.unwrap().json().await.unwrap();
    assert_eq!(audit["user.created"], 1);

    let res = client
        .delete(srv.url(&format!("/users/{id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client.get(srv.url(&format!("/users/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn pipes_reject_bad_arguments_with_400() {
    let srv = TestServer::demo().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/users/abc")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let res = client.get(srv.url("/users?limit=500")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client.get(srv.url("/users?limit=5")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let admin = mint_jwt(&["admin"], &[]);
    let res = client
        .post(srv.url("/users"))
        .bearer_auth(&admin)
        .json(&json!({ "name": "Ada" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url("/users"))
        .bearer_auth(&admin)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn permission_guard_protects_deletes() {
    let srv = TestServer::demo().await;
    let client = reqwest::Client::new();

    let reader = mint_jwt(&["admin"], &["users.read"]);
    let res = client
        .delete(srv.url("/users/1"))
        .bearer_auth(&reader)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_routes_are_json_404s() {
    let srv = TestServer::demo().await;
    let res = reqwest::get(srv.url("/nowhere")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

struct Probe;

#[tokio::test]
async fn handler_panics_become_500_and_the_server_keeps_serving() {
    let mut app = App::new(config()).unwrap();
    app.declare_controller(
        ControllerOptions::new(Arc::new(Probe))
            .path("/probe")
            .get("/panic", "panic", |_ctl, _req| async move {
                if true {
                    panic!("handler blew up");
                }
                Ok(Response::no_content())
            })
            .get("/ok", "ok", |_ctl, _req| async { Ok(Response::ok(json!({ "ok": true }))) }),
    )
    .unwrap();
    let srv = TestServer::spawn(app).await;

    let res = reqwest::get(srv.url("/probe/panic")).await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "error": "internal_error", "message": "internal server error" }));

    let res = reqwest::get(srv.url("/probe/ok")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

struct Tag {
    label: &'static str,
    trace: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Interceptor for Tag {
    async fn intercept(&self, req: Request, next: Next) -> HandlerResult {
        self.trace.lock().unwrap().push(format!("before:{}", self.label));
        let res = next.run(req).await;
        self.trace.lock().unwrap().push(format!("after:{}", self.label));
        res
    }
}

#[tokio::test]
async fn interceptors_nest_global_then_controller_then_route() {
    let trace: Arc<Mutex<Vec<String>>> = Arc::default();
    let tag = |label| Tag {
        label,
        trace: trace.clone(),
    };

    let mut app = App::new(config()).unwrap();
    app.use_interceptor(Arc::new(tag("global")), None);
    app.use_interceptor(Arc::new(tag("elsewhere")), Some("/other"));

    let handler_trace = trace.clone();
    let ctl = app
        .declare_controller(
            ControllerOptions::new(Arc::new(Probe))
                .path("/items")
                .interceptor(tag("controller"))
                .guard(HeaderGuard::present("x-client"))
                .get("/:id", "find_one", move |_ctl, req: Request| {
                    let trace = handler_trace.clone();
                    async move {
                        trace.lock().unwrap().push("handler".to_string());
                        let id = *req.arg::<i64>("id")?;
                        Ok(Response::ok(json!({ "id": id })))
                    }
                }),
        )
        .unwrap();
    let registry = app.registry_mut();
    registry
        .attach_interceptors(ctl, "find_one", vec![Arc::new(tag("route"))])
        .unwrap();
    registry
        .attach_pipes(ctl, "find_one", vec![PipeBinding::param("id", ParseIntPipe)])
        .unwrap();
    assert!(registry.attach_pipes(ctl, "missing", vec![]).is_err());

    let srv = TestServer::spawn(app).await;
    let client = reqwest::Client::new();

    // Guard failure: no interceptor runs.
    let res = client.get(srv.url("/items/7")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(trace.lock().unwrap().is_empty());

    let res = client
        .get(srv.url("/items/7"))
        .header("x-client", "it")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["id"], 7);

    assert_eq!(
        *trace.lock().unwrap(),
        [
            "before:global",
            "before:controller",
            "before:route",
            "handler",
            "after:route",
            "after:controller",
            "after:global",
        ]
    );
}

struct Routes;

#[test]
fn controllers_cannot_claim_the_builtin_endpoints() {
    let mut app = App::new(config()).unwrap();
    app.declare_controller(
        ControllerOptions::new(Arc::new(Probe))
            .path("/health")
            .get("/", "health", |_ctl, _req| async { Ok(Response::no_content()) }),
    )
    .unwrap();
    let err = app.build().err().expect("GET /health is reserved");
    assert_eq!(err.kind(), ErrorKind::DuplicateRegistration);

    // Default path of `Routes` is `/routes`.
    let mut app = App::new(config()).unwrap();
    app.declare_controller(
        ControllerOptions::new(Arc::new(Routes)).get("/", "list", |_ctl, _req| async { Ok(Response::no_content()) }),
    )
    .unwrap();
    let err = app.build().err().expect("GET /routes is reserved");
    assert_eq!(err.kind(), ErrorKind::DuplicateRegistration);
}

#[tokio::test]
async fn other_methods_may_share_a_builtin_path() {
    let mut app = App::new(config()).unwrap();
    app.declare_controller(
        ControllerOptions::new(Arc::new(Probe))
            .path("/health")
            .post("/", "ping", |_ctl, _req| async { Ok(Response::ok(json!({ "pong": true }))) }),
    )
    .unwrap();
    let srv = TestServer::spawn(app).await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let res = client.post(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn guard_panics_become_500_responses() {
    let mut app = App::new(config()).unwrap();
    app.declare_controller(
        ControllerOptions::new(Arc::new(Probe))
            .path("/fragile")
            .guard(|_req: &mut Request| -> Result<(), AccessDenied> { panic!("guard bug") })
            .get("/", "index", |_ctl, _req| async { Ok(Response::no_content()) }),
    )
    .unwrap();
    let srv = TestServer::spawn(app).await;

    let res = reqwest::get(srv.url("/fragile")).await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "internal_error");
}

#[tokio::test]
async fn cached_lists_are_keyed_by_query_string() {
    let mut config = config();
    config.cache.enabled = true;
    let srv = TestServer::spawn(build_demo(config).unwrap()).await;
    let client = reqwest::Client::new();
    let admin = mint_jwt(&["admin"], &[]);

    for (name, email) in [("Ada", "ada@example.org"), ("Grace", "grace@example.org")] {
        let res = client
            .post(srv.url("/users"))
            .bearer_auth(&admin)
            .json(&json!({ "name": name, "email": email }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let one: serde_json::Value = client.get(srv.url("/users?limit=1")).send().await.unwrap().json().await.unwrap();
    let two: serde_json::Value = client.get(srv.url("/users?limit=5")).send().await.unwrap().json().await.unwrap();
    assert_eq!(one["users"].as_array().unwrap().len(), 1);
    assert_eq!(two["users"].as_array().unwrap().len(), 2);

    let res = client.get(srv.url("/users?limit=5")).send().await.unwrap();
    assert_eq!(res.headers().get("x-cache").map(|v| v.to_str().unwrap()), Some("HIT"));
}
