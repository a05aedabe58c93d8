//! End-to-end behavior of the request pipeline, driven through the full
//! router without a socket.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::json;
use tokio::sync::Notify;

use storefront::db::DbError;
use storefront::auth::{hash_password, verify_password};
use storefront::error::{ApiError, MSG_INTERNAL, MSG_TIMEOUT, MSG_TOO_LARGE};
use storefront::observability::EventKind;
use storefront::pipeline::{Handler, HandlerContext, HandlerResult, RequestState};
use storefront::routing::{Access, RouteTable};

mod common;
use common::{authed_request, json_request, request, test_config, TestApp, SEED_EMAIL, SEED_PASSWORD};

const CLIENT: [u8; 4] = [10, 0, 0, 1];
const OTHER_CLIENT: [u8; 4] = [10, 0, 0, 2];

#[tokio::test]
async fn login_tier_rejects_the_sixth_attempt() {
    let app = TestApp::spawn(test_config()).await;

    let first = app
        .send(json_request(
            Method::POST,
            "/api/login",
            CLIENT,
            &json!({ "email": SEED_EMAIL, "password": common::SEED_PASSWORD }),
        ))
        .await;
    assert_eq!(first.status, StatusCode::OK);
    let token = first.json()["token"].as_str().unwrap().to_string();
    assert!(!token.is_empty());
    assert_eq!(first.json()["user"]["email"], SEED_EMAIL);

    for _ in 0..4 {
        let wrong = app
            .send(json_request(
                Method::POST,
                "/api/login",
                CLIENT,
                &json!({ "email": SEED_EMAIL, "password": "wrong-password" }),
            ))
            .await;
        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.json(), json!({ "error": "Credenciales incorrectas" }));
    }

    let sixth = app
        .send(json_request(
            Method::POST,
            "/api/login",
            CLIENT,
            &json!({ "email": SEED_EMAIL, "password": common::SEED_PASSWORD }),
        ))
        .await;
    assert_eq!(sixth.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(sixth.header("retry-after").is_some());
    assert_eq!(sixth.header("ratelimit-remaining"), Some("0"));

    // Another client has its own window.
    app.login(OTHER_CLIENT).await;

    app.audited(4, |e| e.kind == EventKind::LoginFailure).await;
    app.audited(1, |e| e.kind == EventKind::RateLimitExceeded).await;
}

#[tokio::test]
async fn login_window_reopens_after_it_expires() {
    let app = TestApp::spawn(test_config()).await;
    let wrong = json!({ "email": SEED_EMAIL, "password": "nope" });

    for _ in 0..5 {
        app.send(json_request(Method::POST, "/api/login", CLIENT, &wrong)).await;
    }
    let blocked = app
        .send(json_request(Method::POST, "/api/login", CLIENT, &wrong))
        .await;
    assert_eq!(blocked.status, StatusCode::TOO_MANY_REQUESTS);

    app.clock.advance(Duration::from_secs(15 * 60));
    app.login(CLIENT).await;
}

#[tokio::test]
async fn login_validates_its_body() {
    let app = TestApp::spawn(test_config()).await;

    let missing = app
        .send(json_request(Method::POST, "/api/login", CLIENT, &json!({ "email": SEED_EMAIL })))
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);

    let unknown = app
        .send(json_request(
            Method::POST,
            "/api/login",
            CLIENT,
            &json!({ "email": "nobody@example.com", "password": "whatever" }),
        ))
        .await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.json(), json!({ "error": "Credenciales incorrectas" }));
}

#[tokio::test]
async fn unknown_email_costs_a_password_check() {
    let app = TestApp::spawn(test_config()).await;

    let hash = hash_password("reference", 4).await.unwrap();
    let mut baseline = Duration::MAX;
    for _ in 0..3 {
        let started = std::time::Instant::now();
        verify_password("reference", &hash).await.unwrap();
        baseline = baseline.min(started.elapsed());
    }

    let started = std::time::Instant::now();
    let unknown = app
        .send(json_request(
            Method::POST,
            "/api/login",
            CLIENT,
            &json!({ "email": "nobody@example.com", "password": "whatever" }),
        ))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert!(
        elapsed >= baseline / 2,
        "unknown email answered in {elapsed:?}, one bcrypt check takes {baseline:?}"
    );
    let failures = app.audited(1, |e| e.kind == EventKind::LoginFailure).await;
    assert_eq!(failures[0].detail.as_deref(), Some("unknown email"));
}

#[tokio::test]
async fn oversized_bodies_are_413_json() {
    let mut config = test_config();
    config.security.max_body_size = 16;
    let app = TestApp::spawn(config).await;
    let body = json!({ "username": "ana", "email": "ana@example.com", "password": "x".repeat(64) });

    let chunked = app
        .send(json_request(Method::POST, "/api/users", CLIENT, &body))
        .await;
    assert_eq!(chunked.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(chunked.json(), json!({ "error": MSG_TOO_LARGE }));
    assert_eq!(chunked.header("x-content-type-options"), Some("nosniff"));

    let mut declared = json_request(Method::POST, "/api/users", CLIENT, &body);
    let length = body.to_string().len().to_string();
    declared
        .headers_mut()
        .insert(axum::http::header::CONTENT_LENGTH, length.parse().unwrap());
    let declared = app.send(declared).await;
    assert_eq!(declared.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(declared.json(), json!({ "error": MSG_TOO_LARGE }));

    assert_eq!(app.leased(), 0);
}

#[tokio::test]
async fn state_trail_follows_route_access() {
    use RequestState::*;

    let app = TestApp::spawn(test_config()).await;
    let admitted = [Received, HeadersApplied, Logged, GlobalRateChecked];

    let public = app.send(request(Method::GET, "/api/getData", CLIENT)).await;
    assert_eq!(
        public.trail,
        [&admitted[..], &[ConnectionLeased, Handled, Finalized][..]].concat()
    );

    let sensitive = app
        .send(json_request(
            Method::POST,
            "/api/login",
            CLIENT,
            &json!({ "email": SEED_EMAIL, "password": SEED_PASSWORD }),
        ))
        .await;
    assert_eq!(sensitive.status, StatusCode::OK);
    assert_eq!(
        sensitive.trail,
        [&admitted[..], &[ConnectionLeased, RouteRateChecked, Handled, Finalized][..]].concat()
    );
    let token = sensitive.json()["token"].as_str().unwrap().to_string();

    let protected = app
        .send(authed_request(Method::GET, "/api/products", CLIENT, &token))
        .await;
    assert_eq!(
        protected.trail,
        [&admitted[..], &[ConnectionLeased, Authenticated, Handled, Finalized][..]].concat()
    );

    let anonymous = app.send(request(Method::GET, "/api/products", CLIENT)).await;
    assert_eq!(
        anonymous.trail,
        [&admitted[..], &[ConnectionLeased, Rejected, Finalized][..]].concat()
    );

    let unmatched = app.send(request(Method::GET, "/api/nothing", CLIENT)).await;
    assert_eq!(unmatched.trail, [&admitted[..], &[Rejected, Finalized][..]].concat());
}

#[tokio::test]
async fn products_require_a_valid_token() {
    let app = TestApp::spawn(test_config()).await;

    let anonymous = app.send(request(Method::GET, "/api/products", CLIENT)).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert_eq!(anonymous.json(), json!({ "error": "Se requiere autenticación" }));

    let token = app.login(CLIENT).await;
    let listed = app
        .send(authed_request(Method::GET, "/api/products", CLIENT, &token))
        .await;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.json().as_array().map(Vec::len), Some(3));

    app.audited(1, |e| e.kind == EventKind::AuthFailure).await;
    assert_eq!(app.leased(), 0);
}

#[tokio::test]
async fn tampered_and_expired_tokens_are_forbidden() {
    let app = TestApp::spawn(test_config()).await;
    let token = app.login(CLIENT).await;

    let mut tampered = token.clone();
    tampered.push('x');
    let response = app
        .send(authed_request(Method::GET, "/api/users", CLIENT, &tampered))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.json(), json!({ "error": "Token inválido o expirado" }));

    app.clock.advance(Duration::from_secs(3600));
    let expired = app
        .send(authed_request(Method::GET, "/api/users", CLIENT, &token))
        .await;
    assert_eq!(expired.status, StatusCode::FORBIDDEN);
    assert_eq!(expired.json(), json!({ "error": "Token inválido o expirado" }));
}

#[tokio::test]
async fn protected_route_echoes_the_identity() {
    let app = TestApp::spawn(test_config()).await;
    let token = app.login(CLIENT).await;

    let response = app
        .send(authed_request(Method::GET, "/api/protected", CLIENT, &token))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["user"]["email"], SEED_EMAIL);
}

#[tokio::test]
async fn registration_creates_users_without_exposing_hashes() {
    let app = TestApp::spawn(test_config()).await;
    let new_user = json!({ "username": "luis", "email": "luis@example.com", "password": "secreto1" });

    let created = app
        .send(json_request(Method::POST, "/api/users", CLIENT, &new_user))
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.json()["email"], "luis@example.com");
    assert!(created.json().get("password_hash").is_none());
    assert!(!created.body.contains("secreto1"));

    let duplicate = app
        .send(json_request(Method::POST, "/api/users", CLIENT, &new_user))
        .await;
    assert_eq!(duplicate.status, StatusCode::BAD_REQUEST);

    let invalid = app
        .send(json_request(
            Method::POST,
            "/api/users",
            CLIENT,
            &json!({ "username": "x", "email": "not-an-email", "password": "secreto1" }),
        ))
        .await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    assert!(invalid.json()["error"].is_string());

    let token = app.login(CLIENT).await;
    let users = app
        .send(authed_request(Method::GET, "/api/users", CLIENT, &token))
        .await;
    assert_eq!(users.status, StatusCode::OK);
    assert_eq!(users.json().as_array().map(Vec::len), Some(2));
    assert!(!users.body.contains("password"));

    app.audited(1, |e| e.kind == EventKind::UserRegistered).await;
}

#[tokio::test]
async fn public_routes_answer_with_text() {
    let app = TestApp::spawn(test_config()).await;

    let greeting = app.send(request(Method::GET, "/api/getData", CLIENT)).await;
    assert_eq!(greeting.status, StatusCode::OK);
    assert_eq!(greeting.body, "Hola desde el backend");

    let root = app.send(request(Method::GET, "/", CLIENT)).await;
    assert_eq!(root.status, StatusCode::OK);
}

#[tokio::test]
async fn every_response_carries_security_and_rate_headers() {
    let app = TestApp::spawn(test_config()).await;

    let ok = app.send(request(Method::GET, "/api/getData", CLIENT)).await;
    let rejected = app.send(request(Method::GET, "/api/users", CLIENT)).await;
    let missing = app.send(request(Method::GET, "/no/such/path", CLIENT)).await;

    for response in [&ok, &rejected, &missing] {
        assert_eq!(response.header("x-content-type-options"), Some("nosniff"));
        assert_eq!(response.header("x-frame-options"), Some("SAMEORIGIN"));
        assert!(response.header("strict-transport-security").is_some());
        assert!(response.header("x-powered-by").is_none());
        assert_eq!(response.header("ratelimit-limit"), Some("100"));
        assert!(response.header("x-request-id").is_some());
    }
    assert_eq!(ok.header("ratelimit-remaining"), Some("99"));
}

#[tokio::test]
async fn unmatched_requests_never_lease() {
    let app = TestApp::spawn(test_config()).await;

    let missing = app.send(request(Method::GET, "/api/nothing", CLIENT)).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.json(), json!({ "error": "Ruta no encontrada" }));

    let wrong_method = app.send(request(Method::DELETE, "/api/users", CLIENT)).await;
    assert_eq!(wrong_method.status, StatusCode::METHOD_NOT_ALLOWED);

    let status = app.server.pipeline().pool().status();
    assert_eq!(status.leases_granted, 0);
    assert_eq!(status.leased, 0);
}

#[tokio::test]
async fn global_tier_applies_to_every_route() {
    let mut config = test_config();
    config.rate_limit.global.max_requests = 3;
    let app = TestApp::spawn(config).await;

    for path in ["/api/getData", "/", "/api/nothing"] {
        let response = app.send(request(Method::GET, path, CLIENT)).await;
        assert_ne!(response.status, StatusCode::TOO_MANY_REQUESTS);
    }

    let limited = app.send(request(Method::GET, "/api/getData", CLIENT)).await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        limited.json(),
        json!({ "error": "Demasiadas solicitudes, intente más tarde" })
    );
    assert_eq!(limited.header("ratelimit-limit"), Some("3"));

    let other = app.send(request(Method::GET, "/api/getData", OTHER_CLIENT)).await;
    assert_eq!(other.status, StatusCode::OK);

    let limiter = app.server.pipeline().limiter();
    assert!(!limiter.is_empty());
    app.clock.advance(Duration::from_secs(15 * 60));
    limiter.sweep();
    assert!(limiter.is_empty());
}

#[tokio::test]
async fn disabled_rate_limiting_admits_everything() {
    let mut config = test_config();
    config.rate_limit.enabled = false;
    config.rate_limit.global.max_requests = 1;
    let app = TestApp::spawn(config).await;

    for _ in 0..5 {
        let response = app.send(request(Method::GET, "/api/getData", CLIENT)).await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.header("ratelimit-limit").is_none());
    }
}

fn failing(_ctx: &mut HandlerContext, _req: Request<Body>) -> BoxFuture<'_, HandlerResult> {
    async {
        Err(ApiError::Database(DbError::Query(
            "connection reset while running with password=hunter2".into(),
        )))
    }
    .boxed()
}

fn explode() -> HandlerResult {
    panic!("handler blew up")
}

fn panicking(_ctx: &mut HandlerContext, _req: Request<Body>) -> BoxFuture<'_, HandlerResult> {
    async { explode() }.boxed()
}

fn healthy(ctx: &mut HandlerContext, _req: Request<Body>) -> BoxFuture<'_, HandlerResult> {
    async move {
        let products = ctx.db().list_products().await?;
        Ok(products.len().to_string().into_response())
    }
    .boxed()
}

fn faulty_routes() -> RouteTable {
    RouteTable::new()
        .route(Method::GET, "/fail", "fail", Access::public(), failing)
        .route(Method::GET, "/panic", "panic", Access::public(), panicking)
        .route(Method::GET, "/ok", "ok", Access::public(), healthy)
}

#[tokio::test]
async fn failing_handlers_release_their_lease() {
    let app = TestApp::with_routes(test_config(), faulty_routes()).await;

    // More failures than the pool has connections.
    for _ in 0..5 {
        let failed = app.send(request(Method::GET, "/fail", CLIENT)).await;
        assert_eq!(failed.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failed.json(), json!({ "error": MSG_INTERNAL }));
        assert!(!failed.body.contains("hunter2"));

        let panicked = app.send(request(Method::GET, "/panic", CLIENT)).await;
        assert_eq!(panicked.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(panicked.json(), json!({ "error": MSG_INTERNAL }));
    }

    assert_eq!(app.leased(), 0);
    let status = app.server.pipeline().pool().status();
    assert_eq!(status.leases_granted, status.leases_returned);

    let ok = app.send(request(Method::GET, "/ok", CLIENT)).await;
    assert_eq!(ok.status, StatusCode::OK);
    assert_eq!(ok.body, "3");

    let errors = app.audited(10, |e| e.kind == EventKind::HandlerError).await;
    let detail = errors[0].detail.as_deref().unwrap_or_default();
    assert!(detail.contains("password=[redacted]"), "{detail}");
    assert!(!detail.contains("hunter2"));
}

fn slow(_ctx: &mut HandlerContext, _req: Request<Body>) -> BoxFuture<'_, HandlerResult> {
    async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok("too late".into_response())
    }
    .boxed()
}

#[tokio::test]
async fn handler_deadline_answers_with_json_and_releases() {
    let mut config = test_config();
    config.timeouts.request_secs = 1;
    let routes = RouteTable::new()
        .route(Method::GET, "/slow", "slow", Access::public(), slow)
        .route(Method::GET, "/ok", "ok", Access::public(), healthy);
    let app = TestApp::with_routes(config, routes).await;

    let started = std::time::Instant::now();
    let timed_out = app.send(request(Method::GET, "/slow", CLIENT)).await;
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(timed_out.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(timed_out.json(), json!({ "error": MSG_TIMEOUT }));
    assert_eq!(timed_out.header("x-content-type-options"), Some("nosniff"));
    assert_eq!(timed_out.header("ratelimit-limit"), Some("100"));
    assert_eq!(
        timed_out.trail[timed_out.trail.len() - 2..],
        [RequestState::Errored, RequestState::Finalized]
    );
    assert_eq!(app.leased(), 0);

    let errors = app.audited(1, |e| e.kind == EventKind::HandlerError).await;
    assert!(errors[0].detail.as_deref().unwrap_or_default().contains("deadline"));

    let ok = app.send(request(Method::GET, "/ok", CLIENT)).await;
    assert_eq!(ok.status, StatusCode::OK);
}

/// Holds its lease until released by the test.
struct Gate(Arc<Notify>);

impl Handler for Gate {
    fn call<'a>(&'a self, _ctx: &'a mut HandlerContext, _req: Request<Body>) -> BoxFuture<'a, HandlerResult> {
        async move {
            self.0.notified().await;
            Ok(Response::new(Body::from("released")))
        }
        .boxed()
    }
}

#[tokio::test]
async fn exhausted_pool_returns_503_without_leaking() {
    let mut config = test_config();
    config.pool.max_connections = 1;
    let gate = Arc::new(Notify::new());
    let routes = RouteTable::new()
        .route(Method::GET, "/hold", "hold", Access::public(), Gate(Arc::clone(&gate)))
        .route(Method::GET, "/ok", "ok", Access::public(), healthy);
    let app = TestApp::with_routes(config, routes).await;

    let router = app.router();
    let holder = tokio::spawn(common::send(router, request(Method::GET, "/hold", CLIENT)));
    for _ in 0..50 {
        if app.leased() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(app.leased(), 1);

    let refused = app.send(request(Method::GET, "/ok", OTHER_CLIENT)).await;
    assert_eq!(refused.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        refused.json(),
        json!({ "error": "Servicio no disponible, intente más tarde" })
    );

    gate.notify_one();
    let held = holder.await.unwrap();
    assert_eq!(held.status, StatusCode::OK);
    assert_eq!(held.body, "released");
    assert_eq!(app.leased(), 0);

    let ok = app.send(request(Method::GET, "/ok", OTHER_CLIENT)).await;
    assert_eq!(ok.status, StatusCode::OK);
}

#[tokio::test]
async fn queued_request_gets_the_released_connection() {
    let mut config = test_config();
    config.pool.max_connections = 1;
    config.pool.acquire_timeout_ms = 2_000;
    let gate = Arc::new(Notify::new());
    let routes = RouteTable::new()
        .route(Method::GET, "/hold", "hold", Access::public(), Gate(Arc::clone(&gate)))
        .route(Method::GET, "/ok", "ok", Access::public(), healthy);
    let app = TestApp::with_routes(config, routes).await;

    let holder = tokio::spawn(common::send(app.router(), request(Method::GET, "/hold", CLIENT)));
    for _ in 0..50 {
        if app.leased() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let waiter = tokio::spawn(common::send(app.router(), request(Method::GET, "/ok", OTHER_CLIENT)));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(app.server.pipeline().pool().status().waiting, 1);

    gate.notify_one();
    assert_eq!(holder.await.unwrap().status, StatusCode::OK);
    assert_eq!(waiter.await.unwrap().status, StatusCode::OK);
    assert_eq!(app.leased(), 0);
}
