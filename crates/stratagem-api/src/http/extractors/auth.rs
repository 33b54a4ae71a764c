//! API key authentication extractor.
//!
//! Extracts and verifies API keys from:
//! - `Authorization: Bearer <key>` header
//! - `X-API-Key: <key>` header
//!
//! Keys are SHA-256 hashed and compared against the `api_keys` table.
//! Every key belongs to a user; sessions and rate limit windows are
//! keyed by that user, so the extractor yields the owning user id.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};
use sqlx::Row;
use uuid::Uuid;

use crate::http::error::AppError;
use crate::state::AppState;

/// Authenticated request. Extracting this validates the API key and
/// resolves the user it belongs to.
#[derive(Debug)]
pub struct AuthenticatedUser(pub Uuid);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let api_key = extract_api_key(parts)?;
        let key_hash = hash_api_key(&api_key);

        let result = sqlx::query("SELECT id, user_id FROM api_keys WHERE key_hash = ?")
            .bind(&key_hash)
            .fetch_optional(&state.db_pool.reader)
            .await
            .map_err(|e| AppError::Internal(format!("Database error: {e}")))?;

        match result {
            Some(row) => {
                let key_id: String = row.get("id");
                let user_id: String = row.get("user_id");
                let user_id = user_id
                    .parse()
                    .map_err(|_| AppError::Internal("api_keys.user_id is not a UUID".to_string()))?;

                // Update last_used_at (best effort, don't fail the request)
                let now = chrono::Utc::now().to_rfc3339();
                let _ = sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
                    .bind(&now)
                    .bind(&key_id)
                    .execute(&state.db_pool.writer)
                    .await;

                Ok(AuthenticatedUser(user_id))
            }
            None => Err(AppError::Unauthorized(
                "Invalid API key. Provide a valid key via 'Authorization: Bearer <key>' or 'X-API-Key: <key>' header.".to_string(),
            )),
        }
    }
}

/// Extract the API key from request headers.
fn extract_api_key(parts: &Parts) -> Result<String, AppError> {
    // Try Authorization: Bearer <key>
    if let Some(auth) = parts.headers.get("authorization") {
        let auth_str = auth.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid Authorization header encoding".to_string())
        })?;
        if let Some(key) = auth_str.strip_prefix("Bearer ") {
            return Ok(key.trim().to_string());
        }
    }

    // Try X-API-Key header
    if let Some(key) = parts.headers.get("x-api-key") {
        let key_str = key
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid X-API-Key header encoding".to_string()))?;
        return Ok(key_str.trim().to_string());
    }

    Err(AppError::Unauthorized(
        "Missing API key. Provide via 'Authorization: Bearer <key>' or 'X-API-Key: <key>' header.".to_string(),
    ))
}

/// Compute SHA-256 hash of an API key (lowercase hex).
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{:x}", digest)
}

/// Generate the first API key and store its hash, or report that one
/// already exists.
///
/// Returns the plaintext key (shown to the operator once). The key is
/// owned by a seeded default user; single-operator deployments never
/// need more than that one row.
pub async fn ensure_api_key(state: &AppState) -> anyhow::Result<String> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM api_keys LIMIT 1")
        .fetch_optional(&state.db_pool.reader)
        .await?;

    if existing.is_some() {
        // Key already exists, user must know it from initial creation
        return Ok("(existing key - shown only on first creation)".to_string());
    }

    let user_id = ensure_default_user(state).await?;

    use rand::RngCore;
    let mut key_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key_bytes);
    let plaintext_key = format!(
        "sgm_{}",
        key_bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
    );

    let key_hash = hash_api_key(&plaintext_key);
    let id = Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO api_keys (id, user_id, key_hash, name, created_at) VALUES (?, ?, ?, 'default', ?)",
    )
    .bind(&id)
    .bind(user_id.to_string())
    .bind(&key_hash)
    .bind(&now)
    .execute(&state.db_pool.writer)
    .await?;

    Ok(plaintext_key)
}

async fn ensure_default_user(state: &AppState) -> anyhow::Result<Uuid> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT id FROM users ORDER BY created_at LIMIT 1")
            .fetch_optional(&state.db_pool.reader)
            .await?;

    if let Some((id,)) = existing {
        return Ok(id.parse()?);
    }

    let id = Uuid::now_v7();
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query("INSERT INTO users (id, name, created_at) VALUES (?, 'default', ?)")
        .bind(id.to_string())
        .bind(&now)
        .execute(&state.db_pool.writer)
        .await?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    use stratagem_infra::sqlite::pool::DatabasePool;
    use stratagem_types::config::ServiceConfig;

    async fn test_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        let state = AppState::from_parts(ServiceConfig::default(), dir.path().to_path_buf(), pool);
        std::mem::forget(dir);
        state
    }

    fn parts_with_header(name: &str, value: &str) -> Parts {
        let request = axum::http::Request::builder()
            .uri("/api/v1/sessions")
            .header(name, value)
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();
        parts
    }

    #[test]
    fn test_hash_api_key_is_stable_lowercase_hex() {
        let hash = hash_api_key("sgm_test");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash.to_lowercase());
        assert_eq!(hash, hash_api_key("sgm_test"));
    }

    #[tokio::test]
    async fn test_ensure_api_key_creates_then_reports_existing() {
        let state = test_state().await;

        let key = ensure_api_key(&state).await.unwrap();
        assert!(key.starts_with("sgm_"));
        assert_eq!(key.len(), "sgm_".len() + 64);

        let again = ensure_api_key(&state).await.unwrap();
        assert!(again.starts_with("(existing key"));
    }

    #[tokio::test]
    async fn test_bearer_key_authenticates_and_resolves_user() {
        let state = test_state().await;
        let key = ensure_api_key(&state).await.unwrap();

        let mut parts = parts_with_header("authorization", &format!("Bearer {key}"));
        let user = AuthenticatedUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();

        let (owner,): (String,) = sqlx::query_as("SELECT user_id FROM api_keys LIMIT 1")
            .fetch_one(&state.db_pool.reader)
            .await
            .unwrap();
        assert_eq!(user.0.to_string(), owner);
    }

    #[tokio::test]
    async fn test_x_api_key_header_authenticates() {
        let state = test_state().await;
        let key = ensure_api_key(&state).await.unwrap();

        let mut parts = parts_with_header("x-api-key", &key);
        assert!(
            AuthenticatedUser::from_request_parts(&mut parts, &state)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let state = test_state().await;
        ensure_api_key(&state).await.unwrap();

        let mut parts = parts_with_header("x-api-key", "sgm_definitely_wrong");
        let err = AuthenticatedUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_missing_key_rejected() {
        let state = test_state().await;

        let request = axum::http::Request::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();
        let err = AuthenticatedUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
