//! Request-level error taxonomy and its HTTP mapping.
//!
//! Every failure a client can observe is an [`ApiError`]. The client only ever
//! sees `{"error": <public message>}`; the `Display` text carries the detail
//! and goes to logs and audit events.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::auth::AuthError;
use crate::db::DbError;

pub const MSG_AUTH_REQUIRED: &str = "Se requiere autenticación";
pub const MSG_TOKEN_REJECTED: &str = "Token inválido o expirado";
pub const MSG_BAD_CREDENTIALS: &str = "Credenciales incorrectas";
pub const MSG_RATE_LIMITED: &str = "Demasiadas solicitudes, intente más tarde";
pub const MSG_UNAVAILABLE: &str = "Servicio no disponible, intente más tarde";
pub const MSG_INTERNAL: &str = "Error interno del servidor";
pub const MSG_NOT_FOUND: &str = "Ruta no encontrada";
pub const MSG_METHOD_NOT_ALLOWED: &str = "Método no permitido";
pub const MSG_TOO_LARGE: &str = "El cuerpo de la solicitud es demasiado grande";
pub const MSG_TIMEOUT: &str = "La solicitud tardó demasiado";

/// Failures that terminate a request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,

    #[error("missing credential")]
    AuthMissing,

    #[error("invalid credential")]
    AuthInvalid,

    #[error("expired credential")]
    AuthExpired,

    #[error("login rejected: {0}")]
    InvalidCredentials(&'static str),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("connection pool exhausted")]
    PoolExhausted,

    #[error("no route for path")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("handler exceeded its {limit:?} deadline")]
    Timeout { limit: Duration },

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("unhandled error: {0}")]
    Unhandled(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::AuthMissing | Self::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
            Self::AuthInvalid | Self::AuthExpired => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Database(_) | Self::Unhandled(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The text a client is allowed to see.
    pub fn public_message(&self) -> &str {
        match self {
            Self::Validation(detail) => detail,
            Self::PayloadTooLarge => MSG_TOO_LARGE,
            Self::AuthMissing => MSG_AUTH_REQUIRED,
            Self::AuthInvalid | Self::AuthExpired => MSG_TOKEN_REJECTED,
            Self::InvalidCredentials(_) => MSG_BAD_CREDENTIALS,
            Self::RateLimited { .. } => MSG_RATE_LIMITED,
            Self::PoolExhausted => MSG_UNAVAILABLE,
            Self::NotFound => MSG_NOT_FOUND,
            Self::MethodNotAllowed => MSG_METHOD_NOT_ALLOWED,
            Self::Timeout { .. } => MSG_TIMEOUT,
            Self::Database(_) | Self::Unhandled(_) => MSG_INTERNAL,
        }
    }

    /// Unexpected failures (500) as opposed to admission rejections.
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error() && !matches!(self, Self::PoolExhausted)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Missing => Self::AuthMissing,
            AuthError::Invalid(_) => Self::AuthInvalid,
            AuthError::Expired => Self::AuthExpired,
            AuthError::Issue(detail) => Self::Unhandled(detail),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status(),
            Json(json!({ "error": self.public_message() })),
        )
            .into_response();

        if let Self::RateLimited { retry_after } = &self {
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
