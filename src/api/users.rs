//! User listing and registration.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::IntoResponse,
    Json,
};
use futures_util::future::{BoxFuture, FutureExt};
use serde::Deserialize;

use crate::api::read_json;
use crate::auth::hash_password;
use crate::db::{DbError, NewUser};
use crate::error::ApiError;
use crate::observability::{EventKind, SecurityEvent};
use crate::pipeline::{HandlerContext, HandlerResult};

const MAX_USERNAME_LEN: usize = 50;
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
struct Registration {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

impl Registration {
    fn validate(&self) -> Result<(), ApiError> {
        let username = self.username.trim();
        if username.is_empty() {
            return Err(ApiError::Validation("El nombre de usuario es requerido".into()));
        }
        if username.chars().count() > MAX_USERNAME_LEN {
            return Err(ApiError::Validation(format!(
                "El nombre de usuario no puede superar {MAX_USERNAME_LEN} caracteres"
            )));
        }
        if !is_plausible_email(self.email.trim()) {
            return Err(ApiError::Validation("Email inválido".into()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::Validation(format!(
                "La contraseña debe tener al menos {MIN_PASSWORD_LEN} caracteres"
            )));
        }
        Ok(())
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// `GET /api/users`
pub fn list(ctx: &mut HandlerContext, _request: Request<Body>) -> BoxFuture<'_, HandlerResult> {
    async move {
        let users = ctx.db().list_users().await?;
        Ok(Json(users).into_response())
    }
    .boxed()
}

/// `POST /api/users`
pub fn create(ctx: &mut HandlerContext, request: Request<Body>) -> BoxFuture<'_, HandlerResult> {
    async move {
        let registration: Registration = read_json(request).await?;
        registration.validate()?;

        let password_hash = hash_password(&registration.password, ctx.bcrypt_cost()).await?;
        let user = NewUser {
            username: registration.username.trim().to_string(),
            email: registration.email.trim().to_string(),
            password_hash,
        };

        let record = match ctx.db().insert_user(user).await {
            Ok(record) => record,
            Err(DbError::UniqueViolation(_)) => {
                return Err(ApiError::Validation("El email ya está registrado".into()));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(user_id = record.id, "User registered");
        ctx.audit().emit(
            SecurityEvent::new(EventKind::UserRegistered, "user registered", ctx.origin())
                .with_detail(format!("user_id={}", record.id)),
        );

        Ok((StatusCode::CREATED, Json(record)).into_response())
    }
    .boxed()
}
