use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use parlor_types::api::{
    Ack, Claims, MessageDraft, MessageUpdatedResponse, PageQuery, SearchRequest,
    SendMessageRequest, UpdateMessageRequest,
};

use crate::auth::{AppState, db_call};
use crate::error::{ApiError, ApiJson, ApiPath};

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = db_call(&state, move |db| {
        db.send_message(req.chat_id, claims.sub, &req.draft)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /chats/{id}/messages/bulk: body is a JSON array of drafts; either all
/// of them are stored or none is.
pub async fn send_bulk(
    State(state): State<AppState>,
    ApiPath(chat_id): ApiPath<i64>,
    Extension(claims): Extension<Claims>,
    ApiJson(drafts): ApiJson<Vec<MessageDraft>>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = db_call(&state, move |db| {
        db.send_messages(chat_id, claims.sub, &drafts)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(messages)))
}

pub async fn get_message(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let message = db_call(&state, move |db| db.get_message(message_id)).await?;
    Ok(Json(message))
}

/// GET /chats/{id}/messages?page=N: a missing, unparsable or non-positive page
/// means page 1. Pages past `u32::MAX` are clamped and come back empty.
pub async fn list_messages(
    State(state): State<AppState>,
    ApiPath(chat_id): ApiPath<i64>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = parse_page(query.page.as_deref());

    let page = db_call(&state, move |db| db.messages_in_chat(chat_id, page)).await?;
    Ok(Json(page))
}

pub async fn search_messages(
    State(state): State<AppState>,
    ApiPath(chat_id): ApiPath<i64>,
    ApiJson(req): ApiJson<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let found = db_call(&state, move |db| db.search_messages(chat_id, &req.text)).await?;
    Ok(Json(found))
}

pub async fn update_message(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = db_call(&state, move |db| db.update_message(message_id, &req.text)).await?;

    Ok(Json(MessageUpdatedResponse {
        success: true,
        message: "Message updated successfully".into(),
        message_id: message.id,
        updated_text: message.text,
    }))
}

pub async fn delete_message(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    db_call(&state, move |db| db.delete_message(message_id)).await?;
    Ok(Json(Ack::new("Message deleted successfully")))
}

/// GET /messages/private/{user_id}: history of the caller's 1:1 chat with
/// another user.
pub async fn private_messages(
    State(state): State<AppState>,
    ApiPath(other_id): ApiPath<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = db_call(&state, move |db| db.private_messages(claims.sub, other_id)).await?;
    Ok(Json(messages))
}

pub async fn mark_delivered(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    db_call(&state, move |db| db.mark_delivered(message_id)).await?;
    Ok(Json(Ack::new("Marked as delivered")))
}

pub async fn mark_read(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    db_call(&state, move |db| db.mark_read(message_id)).await?;
    Ok(Json(Ack::new("Marked as read")))
}

fn parse_page(raw: Option<&str>) -> u32 {
    raw.and_then(|p| p.trim().parse::<u64>().ok())
        .filter(|p| *p > 0)
        .map_or(1, |p| u32::try_from(p).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_parameter_is_lenient_and_clamped() {
        assert_eq!(parse_page(None), 1);
        assert_eq!(parse_page(Some("abc")), 1);
        assert_eq!(parse_page(Some("0")), 1);
        assert_eq!(parse_page(Some("-3")), 1);
        assert_eq!(parse_page(Some("7")), 7);
        assert_eq!(parse_page(Some("5000000000")), u32::MAX);
    }
}
