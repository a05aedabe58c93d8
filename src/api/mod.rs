//! Application endpoints.
//!
//! | Method | Path              | Access                | Handler               |
//! |--------|-------------------|-----------------------|-----------------------|
//! | GET    | `/`               | public                | [`root`]              |
//! | GET    | `/api/getData`    | public                | [`get_data`]          |
//! | GET    | `/api/users`      | protected             | [`users::list`]       |
//! | POST   | `/api/users`      | public                | [`users::create`]     |
//! | POST   | `/api/login`      | sensitive (login tier)| [`login::login`]      |
//! | GET    | `/api/products`   | protected             | [`products::list`]    |
//! | GET    | `/api/protected`  | protected             | [`login::whoami`]     |

pub mod login;
pub mod products;
pub mod users;

use axum::{
    body::Body,
    extract::FromRequest,
    http::{Method, Request, StatusCode},
    response::IntoResponse,
    Json,
};
use futures_util::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;

use crate::config::RateLimitConfig;
use crate::error::ApiError;
use crate::pipeline::{HandlerContext, HandlerResult};
use crate::routing::{Access, RouteTable};
use crate::security::RateTier;

/// The application's route table.
pub fn routes(config: &RateLimitConfig) -> RouteTable {
    let login_tier = RateTier::from_config("login", &config.login);

    RouteTable::new()
        .route(Method::GET, "/", "root", Access::public(), root)
        .route(Method::GET, "/api/getData", "get_data", Access::public(), get_data)
        .route(Method::GET, "/api/users", "list_users", Access::protected(), users::list)
        .route(Method::POST, "/api/users", "create_user", Access::public(), users::create)
        .route(Method::POST, "/api/login", "login", Access::sensitive(login_tier), login::login)
        .route(Method::GET, "/api/products", "list_products", Access::protected(), products::list)
        .route(Method::GET, "/api/protected", "protected", Access::protected(), login::whoami)
}

pub fn root(_ctx: &mut HandlerContext, _request: Request<Body>) -> BoxFuture<'_, HandlerResult> {
    async { Ok("API funcionando".into_response()) }.boxed()
}

/// Legacy greeting kept for older clients.
pub fn get_data(_ctx: &mut HandlerContext, _request: Request<Body>) -> BoxFuture<'_, HandlerResult> {
    async { Ok("Hola desde el backend".into_response()) }.boxed()
}

/// Decode a JSON body. An oversized body is a 413; any other rejection a 400.
pub(crate) async fn read_json<T: DeserializeOwned>(request: Request<Body>) -> Result<T, ApiError> {
    let Json(value) = Json::<T>::from_request(request, &())
        .await
        .map_err(|rejection| match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge,
            _ => ApiError::Validation(format!("JSON inválido: {}", rejection.body_text())),
        })?;
    Ok(value)
}
