use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use tracing::warn;

use crate::auth::{AppState, db_call, verify_token};
use crate::error::ApiError;

/// Extract and validate the bearer JWT, then hand the caller's `Claims` to the
/// handler through request extensions. Tokens of users that no longer exist
/// are refused.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| ApiError::Unauthorized("Missing or invalid token".into()))?;

    let claims = verify_token(&state.jwt_secret, bearer.token()).map_err(|e| {
        warn!("Rejected bearer token: {}", e);
        ApiError::Unauthorized("Invalid token".into())
    })?;

    let user_id = claims.sub;
    if db_call(&state, move |db| db.get_user_by_id(user_id)).await?.is_none() {
        warn!("Bearer token for unknown user {}", user_id);
        return Err(ApiError::Unauthorized("Invalid token".into()));
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
