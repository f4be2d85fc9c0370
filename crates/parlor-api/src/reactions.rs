use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use parlor_types::api::{Claims, ReactionRequest};

use crate::auth::{AppState, db_call};
use crate::error::{ApiError, ApiJson, ApiPath};

/// POST /messages/{id}/reactions: 201 when the caller had no reaction yet,
/// 200 when an earlier emoji was replaced.
pub async fn add_or_update_reaction(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<i64>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<ReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (reaction, created) = db_call(&state, move |db| {
        db.upsert_reaction(message_id, claims.sub, &req.emoji)
    })
    .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(reaction)))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    db_call(&state, move |db| db.remove_reaction(message_id, claims.sub)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_reactions(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let reactions = db_call(&state, move |db| db.reactions_for_message(message_id)).await?;
    Ok(Json(reactions))
}
