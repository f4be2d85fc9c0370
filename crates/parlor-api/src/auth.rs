use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{error, info, warn};

use parlor_db::{Database, StoreResult};
use parlor_types::api::{Claims, LoginRequest, LoginResponse, SignupRequest};

use crate::error::{ApiError, ApiJson};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

/// Shortest accepted password.
const MIN_PASSWORD_LEN: usize = 6;

/// Runs a store operation on the blocking pool, off the async runtime.
pub(crate) async fn db_call<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.to_string())
        })?
        .map_err(ApiError::from)
}

pub async fn signup(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    if req.name.trim().is_empty()
        || req.email.trim().is_empty()
        || req.phone.trim().is_empty()
        || req.password.len() < MIN_PASSWORD_LEN
    {
        return Err(ApiError::BadRequest("Invalid input data".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))?
        .to_string();

    let user = db_call(&state, move |db| {
        db.create_user(
            req.name.trim(),
            req.email.trim(),
            req.phone.trim(),
            &password_hash,
        )
    })
    .await?;

    info!("User {} signed up", user.id);
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid email or password".into());

    let email = req.email.trim().to_owned();
    let user = db_call(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or_else(invalid)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Internal(format!("stored password hash unreadable: {}", e)))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| {
            warn!("Failed login for user {}", user.id);
            invalid()
        })?;

    let token = create_token(&state.jwt_secret, state.token_ttl_hours, user.id, &user.name)
        .map_err(|e| ApiError::Internal(format!("token signing failed: {}", e)))?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        token,
    }))
}

pub fn create_token(
    secret: &str,
    ttl_hours: i64,
    user_id: i64,
    name: &str,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(ttl_hours)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let token = create_token("secret", 24, 7, "ana").unwrap();
        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.name, "ana");
    }

    #[test]
    fn token_rejects_wrong_secret_and_expiry() {
        let token = create_token("secret", 24, 7, "ana").unwrap();
        assert!(verify_token("other", &token).is_err());

        // Well past the default 60s leeway.
        let stale = create_token("secret", -2, 7, "ana").unwrap();
        assert!(verify_token("secret", &stale).is_err());
    }
}
