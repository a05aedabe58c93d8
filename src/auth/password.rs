//! Password hashing on the blocking pool.

use crate::auth::AuthError;

/// Hash a password using bcrypt.
///
/// Runs on the blocking thread pool.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    let password = password.to_string();

    tokio::task::spawn_blocking(move || {
        bcrypt::hash(password, cost).map_err(|e| AuthError::Issue(e.to_string()))
    })
    .await
    .map_err(|e| AuthError::Issue(format!("Task join error: {}", e)))?
}

/// Verify a password against a bcrypt hash.
///
/// `Ok(false)` on mismatch; `Err` only when the stored hash is unusable.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let password = password.to_string();
    let hash = hash.to_string();

    tokio::task::spawn_blocking(move || {
        bcrypt::verify(password, &hash).map_err(|e| AuthError::Issue(e.to_string()))
    })
    .await
    .map_err(|e| AuthError::Issue(format!("Task join error: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_then_verify() {
        let hash = hash_password("s3cret-pass", 4).await.unwrap();
        assert_ne!(hash, "s3cret-pass");
        assert!(verify_password("s3cret-pass", &hash).await.unwrap());
        assert!(!verify_password("wrong", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_hash_is_an_error() {
        assert!(verify_password("x", "not-a-bcrypt-hash").await.is_err());
    }
}
