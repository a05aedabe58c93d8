//! Signed, time-bounded bearer credentials.
//!
//! Tokens are HS256 JWTs carrying `{id, username, email, iat, exp}`. Validity
//! is a pure function of the token, the process-wide secret and the clock;
//! the server keeps no session state and has no revocation list.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::clock::Clock;

/// The caller a credential speaks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// Token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    id: i64,
    username: String,
    email: String,
    iat: i64,
    exp: i64,
}

/// Issues and verifies credentials with one shared secret.
pub struct Authenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(secret: &str, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock, with no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
            clock,
        }
    }

    /// Sign a credential for `identity`, valid for the configured lifetime.
    pub fn issue(&self, identity: &Identity) -> Result<String, AuthError> {
        let iat = self.clock.unix_now();
        let claims = Claims {
            id: identity.id,
            username: identity.username.clone(),
            email: identity.email.clone(),
            iat,
            exp: iat + self.ttl.as_secs() as i64,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Issue(format!("JWT encoding error: {e}")))
    }

    /// Verify an `Authorization` header value.
    pub fn authenticate(&self, header: Option<&str>) -> Result<Identity, AuthError> {
        let token = bearer_token(header).ok_or(AuthError::Missing)?;
        self.verify(token)
    }

    /// Verify a raw token.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::Invalid(e.to_string()))?;
        let claims = data.claims;

        if self.clock.unix_now() >= claims.exp {
            return Err(AuthError::Expired);
        }

        Ok(Identity {
            id: claims.id,
            username: claims.username,
            email: claims.email,
        })
    }
}

/// Extract `<token>` from `Bearer <token>`.
fn bearer_token(header: Option<&str>) -> Option<&str> {
    let (scheme, token) = header?.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
