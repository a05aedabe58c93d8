//! Credential exchange.
//!
//! `POST /api/login` trades an email and password for a signed token.
//! Unknown email and wrong password produce the same client response;
//! only the audit trail records which one it was.

use axum::{body::Body, http::Request, response::IntoResponse, Json};
use futures_util::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;

use crate::api::read_json;
use crate::auth::{hash_password, verify_password, AuthError, Identity};
use crate::error::ApiError;
use crate::observability::{EventKind, SecurityEvent};
use crate::pipeline::{HandlerContext, HandlerResult};

/// Verified against on unknown emails so both failure paths pay one bcrypt round.
static DECOY_HASH: OnceCell<String> = OnceCell::const_new();

async fn decoy_hash(cost: u32) -> Result<&'static str, AuthError> {
    DECOY_HASH
        .get_or_try_init(|| hash_password("storefront-decoy-password", cost))
        .await
        .map(String::as_str)
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

/// `POST /api/login`
pub fn login(ctx: &mut HandlerContext, request: Request<Body>) -> BoxFuture<'_, HandlerResult> {
    async move {
        let body: LoginRequest = read_json(request).await?;
        let email = body.email.trim();
        if email.is_empty() || body.password.is_empty() {
            return Err(ApiError::Validation("Email y contraseña son requeridos".into()));
        }

        let Some(user) = ctx.db().find_user_by_email(email).await? else {
            let decoy = decoy_hash(ctx.bcrypt_cost()).await?;
            verify_password(&body.password, decoy).await?;
            return Err(reject(ctx, "unknown email"));
        };
        if !verify_password(&body.password, &user.password_hash).await? {
            return Err(reject(ctx, "password mismatch"));
        }

        let identity = Identity {
            id: user.id,
            username: user.username,
            email: user.email,
        };
        let token = ctx.authenticator().issue(&identity)?;

        ctx.audit().emit(
            SecurityEvent::new(EventKind::LoginSuccess, "login succeeded", ctx.origin())
                .with_detail(format!("user_id={}", identity.id)),
        );
        Ok(Json(json!({ "token": token, "user": identity })).into_response())
    }
    .boxed()
}

fn reject(ctx: &HandlerContext, reason: &'static str) -> ApiError {
    ctx.audit().emit(
        SecurityEvent::new(EventKind::LoginFailure, "login failed", ctx.origin()).with_detail(reason),
    );
    ApiError::InvalidCredentials(reason)
}

/// `GET /api/protected`
pub fn whoami(ctx: &mut HandlerContext, _request: Request<Body>) -> BoxFuture<'_, HandlerResult> {
    async move {
        let Some(identity) = ctx.identity() else {
            return Err(ApiError::AuthMissing);
        };
        Ok(Json(json!({
            "message": "Acceso concedido",
            "user": identity,
        }))
        .into_response())
    }
    .boxed()
}
