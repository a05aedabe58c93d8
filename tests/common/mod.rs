//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use storefront::auth::hash_password;
use storefront::clock::ManualClock;
use storefront::config::ServerConfig;
use storefront::db::{NewUser, Store, UserRecord};
use storefront::observability::MemorySink;
use storefront::pipeline::{RequestState, StateTrail};
use storefront::routing::RouteTable;
use storefront::HttpServer;

pub const TEST_SECRET: &str = "integration-test-secret";
pub const SEED_USERNAME: &str = "ana";
pub const SEED_EMAIL: &str = "ana@example.com";
pub const SEED_PASSWORD: &str = "correct-horse";

/// Defaults with a small pool and a cheap bcrypt cost.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.auth.jwt_secret = TEST_SECRET.to_string();
    config.auth.bcrypt_cost = 4;
    config.pool.max_connections = 2;
    config.pool.acquire_timeout_ms = 100;
    config.database.url = "sqlite::memory:".to_string();
    config
}

pub struct TestApp {
    pub server: HttpServer,
    pub clock: Arc<ManualClock>,
    pub audit: MemorySink,
    pub store: Arc<Store>,
}

impl TestApp {
    /// Application routes over the demo catalogue with one seeded user.
    pub async fn spawn(config: ServerConfig) -> Self {
        Self::build(config, None).await
    }

    /// Custom routes, same components.
    pub async fn with_routes(config: ServerConfig, routes: RouteTable) -> Self {
        Self::build(config, Some(routes)).await
    }

    async fn build(config: ServerConfig, routes: Option<RouteTable>) -> Self {
        let store = Arc::new(Store::open(&config.database).await.unwrap());
        seed_user(&store, SEED_USERNAME, SEED_EMAIL, SEED_PASSWORD).await;

        let clock = Arc::new(ManualClock::new());
        let audit = MemorySink::new();
        let mut builder = HttpServer::builder(config, Arc::clone(&store))
            .clock(clock.clone())
            .audit_sink(Arc::new(audit.clone()));
        if let Some(routes) = routes {
            builder = builder.routes(routes);
        }

        Self {
            server: builder.build(),
            clock,
            audit,
            store,
        }
    }

    pub fn router(&self) -> Router {
        self.server.router()
    }

    pub fn leased(&self) -> usize {
        self.server.pipeline().pool().status().leased
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        send(self.router(), request).await
    }

    /// Log the seeded user in from `client` and return the token.
    pub async fn login(&self, client: [u8; 4]) -> String {
        let response = self
            .send(json_request(
                Method::POST,
                "/api/login",
                client,
                &serde_json::json!({ "email": SEED_EMAIL, "password": SEED_PASSWORD }),
            ))
            .await;
        assert_eq!(response.status, StatusCode::OK, "login failed: {:?}", response.body);
        response.json()["token"]
            .as_str()
            .expect("token in login response")
            .to_string()
    }

    /// Wait for the audit writer to record at least `count` events matching `pred`.
    pub async fn audited<F>(&self, count: usize, pred: F) -> Vec<storefront::observability::SecurityEvent>
    where
        F: Fn(&storefront::observability::SecurityEvent) -> bool,
    {
        for _ in 0..50 {
            let events: Vec<_> = self.audit.events().into_iter().filter(|e| pred(e)).collect();
            if events.len() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} matching audit events, got {:?}", self.audit.events());
    }
}

pub async fn seed_user(store: &Arc<Store>, username: &str, email: &str, password: &str) -> UserRecord {
    let mut conn = store.connect().await.unwrap();
    conn.insert_user(NewUser {
        username: username.into(),
        email: email.into(),
        password_hash: hash_password(password, 4).await.unwrap(),
    })
    .await
    .unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub trail: Vec<RequestState>,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body)
            .unwrap_or_else(|e| panic!("body is not JSON ({e}): {}", self.body))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn send(router: Router, request: Request<Body>) -> TestResponse {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let trail = response
        .extensions()
        .get::<StateTrail>()
        .map(|trail| trail.0.clone())
        .unwrap_or_default();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    TestResponse {
        status,
        headers,
        trail,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    }
}

/// A request as if it arrived from `client` over a real socket.
pub fn request(method: Method, path: &str, client: [u8; 4]) -> Request<Body> {
    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((client, 40_000))));
    request
}

pub fn authed_request(method: Method, path: &str, client: [u8; 4], token: &str) -> Request<Body> {
    let mut request = request(method, path, client);
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    request
}

pub fn json_request(method: Method, path: &str, client: [u8; 4], body: &Value) -> Request<Body> {
    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((client, 40_000))));
    request
}
